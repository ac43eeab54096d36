//! Model discovery for a backend

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::http::{request_headers, HttpClients};
use crate::backend::protocol::{BackendRegistry, ModelListing, Protocol, ProtocolDescriptor};
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

/// Lists the models a backend offers
pub struct ModelCatalog {
    clients: HttpClients,
    registry: Arc<BackendRegistry>,
    timeout: Duration,
}

impl ModelCatalog {
    pub fn new(clients: HttpClients, registry: Arc<BackendRegistry>, timeout: Duration) -> Self {
        Self {
            clients,
            registry,
            timeout,
        }
    }

    /// Models available on `base_url`.
    ///
    /// Any failure falls back to the configured model list, which may be empty.
    pub async fn list_models(&self, protocol: Protocol, base_url: &str, api_key: Option<&str>) -> Vec<String> {
        let descriptor = self.registry.get(protocol);

        match self.fetch(&descriptor, base_url, api_key).await {
            Ok(models) => {
                debug!(backend = %protocol, url = %base_url, count = models.len(), "Fetched models");
                models
            }
            Err(e) => {
                warn!(backend = %protocol, url = %base_url, error = %e, "Model fetch failed, using configured models");
                descriptor.models.clone()
            }
        }
    }

    async fn fetch(&self, descriptor: &ProtocolDescriptor, base_url: &str, api_key: Option<&str>) -> Result<Vec<String>> {
        let path = match descriptor.model_listing {
            ModelListing::Configured => return Ok(descriptor.models.clone()),
            ModelListing::OllamaTags => "/api/tags",
            ModelListing::OpenAiModels => "/models",
        };
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);

        let response = self
            .clients
            .for_url(&url)
            .get(&url)
            .headers(request_headers(descriptor, api_key))
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::BackendError(format!(
                "Model listing returned {}",
                response.status()
            )));
        }

        let models = match descriptor.model_listing {
            ModelListing::OllamaTags => response
                .json::<OllamaTagsResponse>()
                .await?
                .models
                .into_iter()
                .map(|m| m.name)
                .collect(),
            _ => response
                .json::<ModelsResponse>()
                .await?
                .data
                .into_iter()
                .map(|m| m.id)
                .collect(),
        };

        Ok(models)
    }
}
