//! Main settings structure

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{
    BargeInConfig, ConfigError, DialogConfig, EchoConfig, EndpointerConfig, GeneratorConfig,
    RecognizerConfig, RetryConfig, SynthesisConfig, SynthesizerConfig, VadConfig,
};

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// API keys are required in strict environments
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub endpointer: EndpointerConfig,

    #[serde(default)]
    pub dialog: DialogConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub barge_in: BargeInConfig,

    #[serde(default)]
    pub echo: EchoConfig,

    #[serde(default)]
    pub vad: VadConfig,

    #[serde(default)]
    pub recognizer: RecognizerConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub synthesizer: SynthesizerConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_endpointer()?;
        self.validate_pipeline()?;
        self.validate_server()?;
        self.validate_services()?;
        Ok(())
    }

    fn validate_endpointer(&self) -> Result<(), ConfigError> {
        let ep = &self.endpointer;

        if !(50..=2000).contains(&ep.silence_ms) {
            return Err(invalid(
                "endpointer.silence_ms",
                format!("Must be between 50 and 2000, got {}", ep.silence_ms),
            ));
        }

        if ep.semantic_ms > ep.silence_ms {
            return Err(invalid(
                "endpointer.semantic_ms",
                format!(
                    "Must not exceed silence_ms ({}), got {}",
                    ep.silence_ms, ep.semantic_ms
                ),
            ));
        }

        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        if ![10, 20, 40].contains(&self.synthesis.frame_ms) {
            return Err(invalid(
                "synthesis.frame_ms",
                format!("Must be 10, 20 or 40, got {}", self.synthesis.frame_ms),
            ));
        }

        let threshold = self.barge_in.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(invalid(
                "barge_in.confidence_threshold",
                format!("Must be in (0.0, 1.0], got {}", threshold),
            ));
        }

        if self.barge_in.consecutive_frames == 0 {
            return Err(invalid("barge_in.consecutive_frames", "Must be at least 1"));
        }

        if self.dialog.history_limit < 2 {
            return Err(invalid(
                "dialog.history_limit",
                format!("Must be at least 2, got {}", self.dialog.history_limit),
            ));
        }

        if self.dialog.chunk_queue == 0 {
            return Err(invalid("dialog.chunk_queue", "Must be at least 1"));
        }

        let step = self.echo.step_size;
        if !(step > 0.0 && step < 2.0) {
            return Err(invalid(
                "echo.step_size",
                format!("Must be in (0.0, 2.0), got {}", step),
            ));
        }

        if self.echo.taps < 16 {
            return Err(invalid(
                "echo.taps",
                format!("Must be at least 16, got {}", self.echo.taps),
            ));
        }

        let (speech, silence) = self.vad.thresholds();
        if silence > speech {
            return Err(invalid(
                "vad.silence_threshold",
                format!("Must not exceed speech threshold ({}), got {}", speech, silence),
            ));
        }

        if !(0.0..1.0).contains(&self.vad.smoothing) {
            return Err(invalid(
                "vad.smoothing",
                format!("Must be in [0.0, 1.0), got {}", self.vad.smoothing),
            ));
        }

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "Port cannot be 0"));
        }

        if !self.server.media_path.starts_with('/') {
            return Err(invalid("server.media_path", "Must start with '/'"));
        }

        if self.environment.is_production()
            && self.server.cors_enabled
            && self.server.cors_origins.iter().any(|o| o == "*")
        {
            return Err(invalid(
                "server.cors_origins",
                "Wildcard origin not allowed in production",
            ));
        }

        Ok(())
    }

    fn validate_services(&self) -> Result<(), ConfigError> {
        if !self.environment.is_strict() {
            return Ok(());
        }

        if self.recognizer.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("recognizer.api_key".to_string()));
        }
        if self.generator.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("generator.api_key".to_string()));
        }
        if self.synthesizer.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("synthesizer.api_key".to_string()));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path the telephony provider streams media to
    #[serde(default = "default_media_path")]
    pub media_path: String,

    /// Concurrent calls accepted before new streams are refused
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Empty means any origin in development
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_media_path() -> String {
    "/media-stream".to_string()
}
fn default_max_calls() -> usize {
    100
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            media_path: default_media_path(),
            max_calls: default_max_calls(),
            timeout_seconds: default_timeout(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus recorder
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from a config directory.
///
/// Layers, later wins: `{dir}/default`, `{dir}/{env}`, then `VOXCALL__*`
/// environment variables.
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOXCALL")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.endpointer.silence_ms, 180);
        assert_eq!(settings.dialog.history_limit, 20);
        assert!(settings.barge_in.enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_semantic_delay_must_not_exceed_silence() {
        let mut settings = Settings::default();
        settings.endpointer.semantic_ms = 400;
        assert!(settings.validate().is_err());

        settings.endpointer.silence_ms = 400;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_pipeline_validation() {
        let mut settings = Settings::default();
        settings.synthesis.frame_ms = 30;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.barge_in.consecutive_frames = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.echo.step_size = 2.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.echo.taps = 8;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.dialog.history_limit = 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_strict_environment_requires_keys() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.recognizer.api_key = String::new();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingField(field)) if field == "recognizer.api_key"
        ));

        settings.recognizer.api_key = "dg".to_string();
        settings.generator.api_key = "gq".to_string();
        settings.synthesizer.api_key = "dg".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_layered_files() {
        let dir = tempfile::tempdir().unwrap();

        let mut default = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            default,
            "[endpointer]\nsilence_ms = 250\n\n[dialog]\ngreeting = \"Hi, thanks for calling.\""
        )
        .unwrap();

        let mut local = std::fs::File::create(dir.path().join("local.toml")).unwrap();
        writeln!(local, "[server]\nport = 9000").unwrap();

        let settings = load_settings_from(dir.path(), Some("local")).unwrap();
        assert_eq!(settings.endpointer.silence_ms, 250);
        assert_eq!(settings.endpointer.semantic_ms, 150);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(
            settings.dialog.greeting.as_deref(),
            Some("Hi, thanks for calling.")
        );
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut default = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(default, "[endpointer]\nsilence_ms = 10").unwrap();

        assert!(matches!(
            load_settings_from(dir.path(), None),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
