//! Backend module - protocol registry, probing, endpoint resolution and model discovery

pub mod http;
pub mod models;
pub mod probe;
pub mod protocol;
pub mod resolver;

pub use http::{HttpClients, TlsPolicy};
pub use models::ModelCatalog;
pub use probe::{BackendTest, EndpointProber, Probe, ProbePolicy, ProbeResult};
pub use protocol::{
    BackendRegistry, EndpointRule, Framing, ModelListing, ProbeMethod, Protocol, ProtocolDescriptor,
};
pub use resolver::{EndpointResolver, Resolution};
