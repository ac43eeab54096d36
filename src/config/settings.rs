//! Application settings and configuration management

use crate::backend::http::{HttpClients, TlsPolicy};
use crate::backend::probe::ProbePolicy;
use crate::backend::protocol::{BackendRegistry, Protocol, ProtocolDescriptor};
use crate::chat::types::{SamplingParams, DEFAULT_HISTORY_WINDOW};
use crate::error::{AppError, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/chat-client.yaml";

/// Prefix of environment overrides, e.g. `CHAT_CLIENT__SAMPLING__TEMPERATURE`
pub const ENV_PREFIX: &str = "CHAT_CLIENT";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Sophia, a thoughtful assistant. Answer clearly, \
keep continuity with the earlier conversation, and say so when you are unsure.";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub system_prompt: String,
    pub sampling: SamplingConfig,
    /// Number of earlier turns sent with each prompt
    pub history_window: usize,
    pub probe: ProbeConfig,
    pub http: HttpConfig,
    /// Environment variable holding the API key for key-gated backends
    pub api_key_env: String,
    /// Per-protocol overrides, keyed by protocol name (`lm_studio`, `ollama`, `hugging_face`)
    pub backends: HashMap<String, BackendOverride>,
    pub logging: LoggingConfig,
}

/// Sampling defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub context_length: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        let params = SamplingParams::default();
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            context_length: params.context_length,
        }
    }
}

/// Reachability probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            max_attempts: 3,
            retry_interval_ms: 1000,
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub tls: TlsPolicy,
    pub connect_timeout_secs: u64,
    /// Longest wait for response headers or the next body chunk; 0 disables the limit
    pub idle_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            tls: TlsPolicy::default(),
            connect_timeout_secs: 10,
            idle_timeout_secs: 120,
        }
    }
}

/// Overrides applied on top of a built-in protocol descriptor
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            sampling: SamplingConfig::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
            probe: ProbeConfig::default(),
            http: HttpConfig::default(),
            api_key_env: "HF_TOKEN".to_string(),
            backends: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default file (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a YAML or TOML file (if present) and the environment
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        };

        let mut builder = Config::builder();
        if path.exists() {
            builder = builder.add_source(File::from(path).format(format));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render the effective settings as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AppError::config(format!("Failed to serialize settings: {}", e)))
    }

    /// Write the settings to a YAML file
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_yaml()?)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.sampling.temperature) {
            return Err(AppError::config("Temperature must be between 0 and 2"));
        }
        if !(0.0..=1.0).contains(&self.sampling.top_p) {
            return Err(AppError::config("top_p must be between 0 and 1"));
        }
        if self.sampling.context_length < 1000 {
            return Err(AppError::config("Context length must be at least 1000"));
        }
        if self.history_window == 0 {
            return Err(AppError::config("History window cannot be 0"));
        }
        if self.probe.max_attempts == 0 {
            return Err(AppError::config("Probe needs at least one attempt"));
        }

        for (name, backend) in &self.backends {
            name.parse::<Protocol>()?;
            if backend.base_url.as_deref().is_some_and(|url| url.trim().is_empty()) {
                return Err(AppError::config(format!("Backend '{}' has an empty base_url", name)));
            }
            if backend.max_context_tokens == Some(0) {
                return Err(AppError::config(format!(
                    "Backend '{}' max_context_tokens cannot be 0",
                    name
                )));
            }
        }

        Ok(())
    }

    fn override_for(&self, protocol: Protocol) -> Option<&BackendOverride> {
        self.backends
            .iter()
            .find(|(name, _)| name.parse::<Protocol>().ok() == Some(protocol))
            .map(|(_, o)| o)
    }

    /// Descriptor for a protocol with overrides applied
    pub fn descriptor(&self, protocol: Protocol) -> ProtocolDescriptor {
        let mut descriptor = ProtocolDescriptor::builtin(protocol);

        if let Some(o) = self.override_for(protocol) {
            if let Some(url) = &o.base_url {
                descriptor.default_base_url = url.clone();
            }
            if let Some(models) = &o.models {
                descriptor.models = models.clone();
            }
            if let Some(max) = o.max_context_tokens {
                descriptor.max_context_tokens = max;
            }
        }

        descriptor
    }

    /// Registry of all protocols with overrides applied
    pub fn registry(&self) -> BackendRegistry {
        BackendRegistry::with_descriptors(Protocol::ALL.iter().map(|p| self.descriptor(*p)))
    }

    /// API key for a protocol, read from the environment
    pub fn api_key(&self, protocol: Protocol) -> Option<String> {
        let var = self
            .override_for(protocol)
            .and_then(|o| o.api_key_env.as_deref())
            .unwrap_or(&self.api_key_env);

        std::env::var(var).ok().filter(|key| !key.is_empty())
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            context_length: self.sampling.context_length,
        }
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            timeout: Duration::from_secs(self.probe.timeout_secs),
            max_attempts: self.probe.max_attempts,
            retry_interval: Duration::from_millis(self.probe.retry_interval_ms),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.http.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn http_clients(&self) -> Result<HttpClients> {
        HttpClients::new(self.http.tls, Duration::from_secs(self.http.connect_timeout_secs))
    }
}
