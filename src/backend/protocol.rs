//! Backend protocol descriptors and the registry that serves them
//!
//! Each supported backend family is described once, as data: where it lives
//! by default, how it is probed, how the chat endpoint is derived from a base
//! URL and how its streaming body is framed. The chat client never branches
//! on the protocol itself, only on these fields.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Model used for POST-style reachability probes
pub const PROBE_MODEL: &str = "minimaxai/minimax-m1-80k";

/// Supported backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Local OpenAI-compatible server (LM Studio, llama.cpp, vLLM)
    LmStudio,
    /// Local Ollama server
    Ollama,
    /// Hosted router exposing a full chat-completions URL
    HuggingFace,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::LmStudio, Protocol::Ollama, Protocol::HuggingFace];

    /// Human readable name, as shown to users
    pub fn display_name(&self) -> &'static str {
        match self {
            Protocol::LmStudio => "LM Studio",
            Protocol::Ollama => "Ollama",
            Protocol::HuggingFace => "Hugging Face",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Protocol {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "lmstudio" | "openai" => Ok(Protocol::LmStudio),
            "ollama" => Ok(Protocol::Ollama),
            "huggingface" | "hf" => Ok(Protocol::HuggingFace),
            _ => Err(AppError::UnknownProtocol(s.to_string())),
        }
    }
}

/// How reachability of a base URL is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    /// Plain GET against the base URL
    Get,
    /// Minimal chat-completion POST, for backends that only answer POST
    ChatPost,
}

/// How the chat endpoint is derived from a base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointRule {
    /// Append a fixed path to the base URL
    Append(&'static str),
    /// The base URL already is the chat endpoint
    Verbatim,
}

impl EndpointRule {
    pub fn chat_endpoint(&self, base_url: &str) -> String {
        match self {
            EndpointRule::Append(path) => format!("{}{}", base_url.trim_end_matches('/'), path),
            EndpointRule::Verbatim => base_url.to_string(),
        }
    }
}

/// Framing of a streaming chat response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON object per line, terminated by `"done": true`
    NdJson,
    /// `data: <json>` lines terminated by `data: [DONE]`
    ServerSentEvents,
}

/// How the list of models is discovered for a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelListing {
    /// `GET <base>/api/tags`
    OllamaTags,
    /// `GET <base>/models`
    OpenAiModels,
    /// Only the configured list
    Configured,
}

/// Immutable description of a backend family
#[derive(Debug, Clone)]
pub struct ProtocolDescriptor {
    pub protocol: Protocol,
    pub default_base_url: String,
    pub requires_api_key: bool,
    pub probe_method: ProbeMethod,
    pub endpoint: EndpointRule,
    pub framing: Framing,
    pub model_listing: ModelListing,
    pub max_context_tokens: u32,
    pub models: Vec<String>,
}

impl ProtocolDescriptor {
    /// Built-in descriptor for a protocol
    pub fn builtin(protocol: Protocol) -> Self {
        match protocol {
            Protocol::LmStudio => Self {
                protocol,
                default_base_url: "http://127.0.0.1:1234/v1".to_string(),
                requires_api_key: false,
                probe_method: ProbeMethod::Get,
                endpoint: EndpointRule::Append("/chat/completions"),
                framing: Framing::ServerSentEvents,
                model_listing: ModelListing::OpenAiModels,
                max_context_tokens: 128_000,
                models: vec![],
            },
            Protocol::Ollama => Self {
                protocol,
                default_base_url: "http://127.0.0.1:11434".to_string(),
                requires_api_key: false,
                probe_method: ProbeMethod::Get,
                endpoint: EndpointRule::Append("/api/chat"),
                framing: Framing::NdJson,
                model_listing: ModelListing::OllamaTags,
                max_context_tokens: 128_000,
                models: vec![],
            },
            Protocol::HuggingFace => Self {
                protocol,
                default_base_url: "https://router.huggingface.co/novita/v3/openai/chat/completions"
                    .to_string(),
                requires_api_key: true,
                probe_method: ProbeMethod::ChatPost,
                endpoint: EndpointRule::Verbatim,
                framing: Framing::ServerSentEvents,
                model_listing: ModelListing::Configured,
                max_context_tokens: 40_000,
                models: vec![
                    "minimaxai/minimax-m1-80k".to_string(),
                    "minimaxai/minimax-text-01".to_string(),
                ],
            },
        }
    }

    /// Full chat endpoint for a base URL
    pub fn chat_endpoint(&self, base_url: &str) -> String {
        self.endpoint.chat_endpoint(base_url)
    }

    /// Clamp a requested context length to what this backend accepts
    pub fn clamp_max_tokens(&self, requested: u32) -> u32 {
        requested.min(self.max_context_tokens)
    }
}

/// Read-only lookup table of protocol descriptors
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    descriptors: HashMap<Protocol, ProtocolDescriptor>,
}

impl BackendRegistry {
    /// Registry holding the built-in descriptors
    pub fn new() -> Self {
        Self::with_descriptors(Protocol::ALL.iter().map(|p| ProtocolDescriptor::builtin(*p)))
    }

    /// Registry holding exactly the given descriptors
    pub fn with_descriptors(descriptors: impl IntoIterator<Item = ProtocolDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into_iter().map(|d| (d.protocol, d)).collect(),
        }
    }

    /// Descriptor for a protocol.
    ///
    /// Protocols missing from a custom registry fall back to their built-in
    /// descriptor, so a lookup never fails.
    pub fn get(&self, protocol: Protocol) -> ProtocolDescriptor {
        self.descriptors
            .get(&protocol)
            .cloned()
            .unwrap_or_else(|| ProtocolDescriptor::builtin(protocol))
    }

    /// Descriptor looked up by user-facing name
    pub fn lookup(&self, name: &str) -> crate::error::Result<ProtocolDescriptor> {
        let protocol: Protocol = name.parse()?;
        Ok(self.get(protocol))
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<_> = self.descriptors.keys().copied().collect();
        protocols.sort_by_key(|p| Protocol::ALL.iter().position(|q| q == p));
        protocols
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
