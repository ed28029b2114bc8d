pub mod sources;

use std::path::PathBuf;

use edgeship_core::EngineConfig;

/// Fully composed configuration: file values overlaid with environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    /// Emit newline-delimited JSON instead of the human format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,edgeship=info".to_string(),
            json: false,
        }
    }
}

/// Where the effective values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
    /// Environment variables that overrode a file or default value.
    pub env_overrides: Vec<&'static str>,
}
