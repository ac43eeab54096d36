//! Configuration module

pub mod settings;

pub use settings::{
    BackendOverride, HttpConfig, LoggingConfig, ProbeConfig, SamplingConfig, Settings,
    DEFAULT_CONFIG_PATH, ENV_PREFIX,
};
