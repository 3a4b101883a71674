//! Configuration management for the voice call orchestrator
//!
//! Supports loading configuration from:
//! - TOML/YAML/JSON files under `config/`
//! - Environment variables (`VOXCALL__` prefix, `__` separator)
//!
//! Every section has serde defaults, so an empty configuration is valid
//! outside strict environments.

pub mod constants;
pub mod pipeline;
pub mod services;
pub mod settings;

pub use pipeline::{
    BargeInConfig, DialogConfig, EchoConfig, EndpointerConfig, SynthesisConfig, VadConfig,
    VadModel,
};
pub use services::{GeneratorConfig, RecognizerConfig, RetryConfig, SynthesizerConfig};
pub use settings::{
    load_settings, load_settings_from, ObservabilityConfig, RuntimeEnvironment, ServerConfig,
    Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for voxcall_core::Error {
    fn from(err: ConfigError) -> Self {
        voxcall_core::Error::Config(err.to_string())
    }
}
