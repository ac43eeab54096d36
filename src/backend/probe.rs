//! Reachability probing of backend base URLs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::backend::http::{request_headers, HttpClients};
use crate::backend::protocol::{BackendRegistry, ProbeMethod, Protocol, PROBE_MODEL};

/// Retry and timeout policy for a probe
#[derive(Debug, Clone)]
pub struct ProbePolicy {
    /// Per-attempt request timeout
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Pause between failed attempts
    pub retry_interval: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of the most recent probe of a base URL
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub reachable: bool,
    pub checked_at: DateTime<Utc>,
}

/// Connection test result, with the time the probe took
#[derive(Debug, Clone)]
pub struct BackendTest {
    pub reachable: bool,
    pub latency: Duration,
}

impl BackendTest {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Anything able to tell whether a base URL answers
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe with the prober's default policy. Never fails: errors count as
    /// unreachable.
    async fn probe(&self, base_url: &str, protocol: Protocol, api_key: Option<&str>) -> bool;
}

#[derive(Serialize)]
struct PingMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct PingRequest<'a> {
    model: &'a str,
    messages: [PingMessage<'a>; 1],
    max_tokens: u32,
}

/// HTTP prober with bounded retries
pub struct EndpointProber {
    clients: HttpClients,
    registry: Arc<BackendRegistry>,
    policy: ProbePolicy,
    last_results: DashMap<String, ProbeResult>,
}

impl EndpointProber {
    pub fn new(clients: HttpClients, registry: Arc<BackendRegistry>, policy: ProbePolicy) -> Self {
        Self {
            clients,
            registry,
            policy,
            last_results: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &ProbePolicy {
        &self.policy
    }

    /// Probe with an explicit policy
    pub async fn probe_with(
        &self,
        base_url: &str,
        protocol: Protocol,
        api_key: Option<&str>,
        policy: &ProbePolicy,
    ) -> bool {
        let reachable = self.run_attempts(base_url, protocol, api_key, policy).await;

        self.last_results.insert(
            base_url.to_string(),
            ProbeResult {
                reachable,
                checked_at: Utc::now(),
            },
        );

        reachable
    }

    async fn run_attempts(
        &self,
        base_url: &str,
        protocol: Protocol,
        api_key: Option<&str>,
        policy: &ProbePolicy,
    ) -> bool {
        let descriptor = self.registry.get(protocol);
        let client = self.clients.for_url(base_url);
        let headers = request_headers(&descriptor, api_key);
        let payload = PingRequest {
            model: PROBE_MODEL,
            messages: [PingMessage {
                role: "user",
                content: "ping",
            }],
            max_tokens: 10,
        };

        for attempt in 1..=policy.max_attempts {
            let request = match descriptor.probe_method {
                ProbeMethod::ChatPost => client.post(base_url).json(&payload),
                ProbeMethod::Get => client.get(base_url),
            };

            let result = request
                .headers(headers.clone())
                .timeout(policy.timeout)
                .send()
                .await;

            match result {
                Ok(response) if matches!(response.status().as_u16(), 200 | 201) => {
                    info!(backend = %protocol, url = %base_url, attempt, "Backend probe succeeded");
                    return true;
                }
                Ok(response) => {
                    warn!(
                        backend = %protocol,
                        url = %base_url,
                        attempt,
                        status = %response.status(),
                        "Backend probe failed"
                    );
                }
                Err(e) if e.is_builder() => {
                    tracing::error!(backend = %protocol, url = %base_url, error = %e, "Backend probe error");
                    return false;
                }
                Err(e) => {
                    warn!(backend = %protocol, url = %base_url, attempt, error = %e, "Backend probe failed");
                }
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.retry_interval).await;
            }
        }

        debug!(backend = %protocol, url = %base_url, attempts = policy.max_attempts, "Backend probe exhausted retries");
        false
    }

    /// Probe and report how long it took
    pub async fn measure(&self, base_url: &str, protocol: Protocol, api_key: Option<&str>) -> BackendTest {
        let start = Instant::now();
        let reachable = self.probe(base_url, protocol, api_key).await;
        let test = BackendTest {
            reachable,
            latency: start.elapsed(),
        };
        info!(
            backend = %protocol,
            url = %base_url,
            reachable,
            latency_ms = test.latency_ms(),
            "Backend test completed"
        );
        test
    }

    /// Most recent probe outcome for a base URL, if it was ever probed
    pub fn last_result(&self, base_url: &str) -> Option<ProbeResult> {
        self.last_results.get(base_url).map(|r| r.value().clone())
    }
}

#[async_trait]
impl Probe for EndpointProber {
    async fn probe(&self, base_url: &str, protocol: Protocol, api_key: Option<&str>) -> bool {
        let policy = self.policy.clone();
        self.probe_with(base_url, protocol, api_key, &policy).await
    }
}
