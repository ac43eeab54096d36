//! Main entry point for the chat client

use clap::{Parser, Subcommand};
use futures::StreamExt;
use llm_chat_stream::{
    backend::Protocol,
    chat::{check_model, ErrorLog, GenerationRequest, StreamEnd, StreamEvent, Transcript, Turn},
    config::{Settings, DEFAULT_CONFIG_PATH},
    ChatRuntime,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "chat-client", about = "Stream chat completions from local or hosted LLM backends")]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct Target {
    /// Backend protocol: lm_studio, ollama or hugging_face
    #[arg(long, short, default_value = "ollama", value_parser = parse_protocol)]
    protocol: Protocol,

    /// Base URL; auto-detected from the configured default when omitted
    #[arg(long)]
    url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Probe the protocol's default endpoint and report latency
    Probe {
        #[arg(long, short, default_value = "ollama", value_parser = parse_protocol)]
        protocol: Protocol,
    },
    /// List the models the backend offers
    Models {
        #[command(flatten)]
        target: Target,
    },
    /// Send a short prompt and classify the outcome
    Check {
        #[command(flatten)]
        target: Target,
        #[arg(long, short)]
        model: String,
    },
    /// Chat with a model; reads prompts from stdin when none is given
    Chat {
        #[command(flatten)]
        target: Target,
        #[arg(long, short)]
        model: String,
        prompt: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

fn parse_protocol(value: &str) -> Result<Protocol, String> {
    value.parse().map_err(|e: llm_chat_stream::AppError| e.to_string())
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    if settings.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load_from_path(&cli.config)?;
    init_logging(&settings);

    info!(config = %cli.config.display(), "Starting chat client");

    let runtime = ChatRuntime::new(settings)?;

    match cli.command {
        Command::Probe { protocol } => {
            let (base_url, test) = runtime.test_backend(protocol).await;
            println!(
                "{}: {} ({}, {:.2} ms)",
                protocol,
                base_url,
                if test.reachable { "reachable" } else { "unreachable" },
                test.latency_ms()
            );
        }
        Command::Models { target } => {
            let (base_url, api_key) = resolve_target(&runtime, &target).await;
            let models = runtime
                .catalog
                .list_models(target.protocol, &base_url, api_key.as_deref())
                .await;
            if models.is_empty() {
                eprintln!("No models found at {}", base_url);
            }
            for model in models {
                println!("{}", model);
            }
        }
        Command::Check { target, model } => {
            let (base_url, api_key) = resolve_target(&runtime, &target).await;
            let mut request = GenerationRequest::new(target.protocol, base_url, model, "")
                .with_system_prompt(runtime.settings.system_prompt.clone())
                .with_sampling(runtime.settings.sampling_params());
            request.api_key = api_key;
            let check = check_model(&runtime.client, request).await;
            println!("{}", serde_json::to_string_pretty(&check)?);
        }
        Command::Chat { target, model, prompt } => {
            let (base_url, api_key) = resolve_target(&runtime, &target).await;
            let session = Session {
                runtime: &runtime,
                protocol: target.protocol,
                base_url,
                api_key,
                model,
            };
            let error_log = ErrorLog::new();
            let mut transcript = Transcript::new();

            match prompt {
                Some(prompt) => session.turn(&mut transcript, &error_log, prompt).await?,
                None => {
                    let mut lines = BufReader::new(tokio::io::stdin()).lines();
                    while let Some(line) = lines.next_line().await? {
                        let line = line.trim();
                        if !line.is_empty() {
                            session.turn(&mut transcript, &error_log, line.to_string()).await?;
                        }
                    }
                }
            }

            for entry in error_log.entries() {
                eprintln!("[{}] {}", entry.at.format("%H:%M:%S"), entry.message);
            }
        }
        Command::Config => {
            print!("{}", runtime.settings.to_yaml()?);
        }
    }

    Ok(())
}

async fn resolve_target(runtime: &ChatRuntime, target: &Target) -> (String, Option<String>) {
    let api_key = runtime.settings.api_key(target.protocol);
    let base_url = match &target.url {
        Some(url) => url.clone(),
        None => runtime.resolver.resolve(target.protocol, api_key.as_deref()).await,
    };
    (base_url, api_key)
}

struct Session<'a> {
    runtime: &'a ChatRuntime,
    protocol: Protocol,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl Session<'_> {
    async fn turn(&self, transcript: &mut Transcript, error_log: &ErrorLog, prompt: String) -> anyhow::Result<()> {
        let settings = &self.runtime.settings;
        let history = transcript.history_window(settings.history_window);
        transcript.push(Turn::user(prompt.clone()));

        let mut request = GenerationRequest::new(self.protocol, self.base_url.clone(), self.model.clone(), prompt)
            .with_system_prompt(settings.system_prompt.clone())
            .with_history(history)
            .with_sampling(settings.sampling_params());
        request.api_key = self.api_key.clone();

        let cancel = CancellationToken::new();
        let ctrl_c = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let mut stdout = tokio::io::stdout();
        let mut stream = self.runtime.client.stream_chat_with_cancel(request, cancel);
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta(text) => {
                    transcript.append_to_reply(&text);
                    stdout.write_all(text.as_bytes()).await?;
                    stdout.flush().await?;
                }
                StreamEvent::End(end) => {
                    error_log.record(&end);
                    if end != StreamEnd::Done {
                        if let Some(message) = end.user_message() {
                            stdout.write_all(message.as_bytes()).await?;
                        }
                    }
                }
            }
        }
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        ctrl_c.abort();

        Ok(())
    }
}
