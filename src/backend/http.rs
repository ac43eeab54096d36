//! HTTP client construction shared by the prober, the model catalog and the
//! chat client

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Url,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::backend::protocol::ProtocolDescriptor;
use crate::error::{AppError, Result};

/// Certificate validation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Always validate certificates
    Verify,
    /// Skip validation for loopback hosts only (self-signed local servers)
    #[default]
    LoopbackOnly,
    /// Never validate certificates
    AcceptInvalid,
}

/// A pair of clients: one validating certificates, one that does not.
///
/// The policy decides per target URL which one is handed out.
#[derive(Debug, Clone)]
pub struct HttpClients {
    policy: TlsPolicy,
    verifying: Client,
    lenient: Client,
}

impl HttpClients {
    pub fn new(policy: TlsPolicy, connect_timeout: Duration) -> Result<Self> {
        let build = |accept_invalid: bool| {
            Client::builder()
                .connect_timeout(connect_timeout)
                .danger_accept_invalid_certs(accept_invalid)
                .build()
                .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
        };

        Ok(Self {
            policy,
            verifying: build(false)?,
            lenient: build(true)?,
        })
    }

    pub fn policy(&self) -> TlsPolicy {
        self.policy
    }

    /// Client to use for requests against `url`
    pub fn for_url(&self, url: &str) -> &Client {
        let lenient = match self.policy {
            TlsPolicy::Verify => false,
            TlsPolicy::AcceptInvalid => true,
            TlsPolicy::LoopbackOnly => is_loopback(url),
        };

        if lenient {
            &self.lenient
        } else {
            &self.verifying
        }
    }
}

/// Whether a URL points at this machine
pub fn is_loopback(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    match parsed.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

/// Request headers for a backend: JSON content type, plus a bearer token when
/// the backend is key-gated and a key was supplied
pub fn request_headers(descriptor: &ProtocolDescriptor, api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if descriptor.requires_api_key {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            match HeaderValue::from_str(&format!("Bearer {}", key)) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => {
                    tracing::warn!(backend = %descriptor.protocol, "API key is not a valid header value, sending without it");
                }
            }
        }
    }

    headers
}
