//! Picks the base URL to talk to for a protocol

use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::probe::Probe;
use crate::backend::protocol::{BackendRegistry, Protocol};

/// Result of a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub base_url: String,
    /// Whether the probe confirmed the URL. A `false` here still comes with
    /// the configured default, which callers may use at their own risk.
    pub reachable: bool,
}

/// Resolves the base URL for a protocol, falling back to the configured
/// default when the probe fails.
///
/// Every call probes afresh; nothing is cached here.
pub struct EndpointResolver<P> {
    prober: Arc<P>,
    registry: Arc<BackendRegistry>,
}

impl<P: Probe> EndpointResolver<P> {
    pub fn new(prober: Arc<P>, registry: Arc<BackendRegistry>) -> Self {
        Self { prober, registry }
    }

    /// Base URL to use for `protocol`
    pub async fn resolve(&self, protocol: Protocol, api_key: Option<&str>) -> String {
        self.resolve_detailed(protocol, api_key).await.base_url
    }

    /// Base URL plus whether it answered the probe
    pub async fn resolve_detailed(&self, protocol: Protocol, api_key: Option<&str>) -> Resolution {
        let default_url = self.registry.get(protocol).default_base_url;
        let reachable = self.prober.probe(&default_url, protocol, api_key).await;

        if reachable {
            info!(backend = %protocol, url = %default_url, "Auto-detected endpoint");
        } else {
            warn!(backend = %protocol, url = %default_url, "No endpoint detected, using configured default");
        }

        Resolution {
            base_url: default_url,
            reachable,
        }
    }
}
