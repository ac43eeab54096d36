//! LLM Chat Stream
//!
//! A streaming chat-completion client for locally or remotely hosted LLM
//! backends. It detects which backend answers, sends chat requests in the
//! backend's dialect and decodes NDJSON or Server-Sent-Events bodies into an
//! ordered stream of text fragments.

pub mod backend;
pub mod chat;
pub mod config;
pub mod error;

pub use error::{AppError, Result};

use std::sync::Arc;
use std::time::Duration;

use backend::{BackendRegistry, BackendTest, EndpointProber, EndpointResolver, ModelCatalog, Protocol};
use chat::ChatClient;

/// Everything a session needs, wired from one set of settings
pub struct ChatRuntime {
    pub settings: config::Settings,
    pub registry: Arc<BackendRegistry>,
    pub prober: Arc<EndpointProber>,
    pub resolver: EndpointResolver<EndpointProber>,
    pub catalog: ModelCatalog,
    pub client: ChatClient,
}

impl ChatRuntime {
    pub fn new(settings: config::Settings) -> Result<Self> {
        settings.validate()?;

        let registry = Arc::new(settings.registry());
        let clients = settings.http_clients()?;
        let prober = Arc::new(EndpointProber::new(
            clients.clone(),
            registry.clone(),
            settings.probe_policy(),
        ));
        let resolver = EndpointResolver::new(prober.clone(), registry.clone());
        let catalog = ModelCatalog::new(
            clients.clone(),
            registry.clone(),
            Duration::from_secs(settings.probe.timeout_secs),
        );
        let client = ChatClient::new(clients, registry.clone()).with_idle_timeout(settings.idle_timeout());

        Ok(Self {
            settings,
            registry,
            prober,
            resolver,
            catalog,
            client,
        })
    }

    /// Time one reachability check of the configured endpoint for `protocol`
    pub async fn test_backend(&self, protocol: Protocol) -> (String, BackendTest) {
        let base_url = self.registry.get(protocol).default_base_url;
        let api_key = self.settings.api_key(protocol);
        let test = self.prober.measure(&base_url, protocol, api_key.as_deref()).await;
        (base_url, test)
    }
}
