use std::collections::HashMap;
use std::path::PathBuf;

use edgeship_core::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::util::{parse_bool, parse_csv, parse_duration_secs};

/// Raw configuration as defined in a TOML file.
///
/// Engine sections (`[run]`, `[retry]`, `[secrets]`, ...) sit at the top
/// level next to `[logging]`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
}

/// One environment value that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedVar {
    pub name: &'static str,
    pub value: String,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub dry_run: Option<bool>,
    pub run_timeout_secs: Option<u64>,
    pub automated: Option<bool>,
    pub allowed_environments: Option<Vec<String>>,
    pub state_dir: Option<PathBuf>,
    pub secrets_dir: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub log_json: Option<bool>,
    pub rejected: Vec<RejectedVar>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Process environment first, then entries read from a `.env` file.
    pub fn gather_with(dotenv: &HashMap<String, String>) -> Self {
        Self::from_lookup(|name| {
            std::env::var(name).ok().or_else(|| dotenv.get(name).cloned())
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text =
            |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut rejected = Vec::new();

        let concurrency = parse_var(
            "EDGESHIP_CONCURRENCY",
            text("EDGESHIP_CONCURRENCY"),
            |v| v.trim().parse::<usize>().ok(),
            &mut rejected,
        );
        let dry_run = parse_var(
            "EDGESHIP_DRY_RUN",
            text("EDGESHIP_DRY_RUN"),
            parse_bool,
            &mut rejected,
        );
        let run_timeout_secs = parse_var(
            "EDGESHIP_RUN_TIMEOUT_SECS",
            text("EDGESHIP_RUN_TIMEOUT_SECS"),
            parse_duration_secs,
            &mut rejected,
        );
        let automated = parse_var(
            "EDGESHIP_AUTOMATED",
            text("EDGESHIP_AUTOMATED"),
            parse_bool,
            &mut rejected,
        );
        let log_json = parse_var(
            "EDGESHIP_LOG_JSON",
            text("EDGESHIP_LOG_JSON"),
            parse_bool,
            &mut rejected,
        );

        Self {
            config_path: text("EDGESHIP_CONFIG").map(PathBuf::from),
            concurrency,
            dry_run,
            run_timeout_secs,
            automated,
            allowed_environments: text("EDGESHIP_ALLOWED_ENVIRONMENTS")
                .map(|raw| parse_csv(&raw)),
            state_dir: text("EDGESHIP_STATE_DIR").map(PathBuf::from),
            secrets_dir: text("EDGESHIP_SECRETS_DIR").map(PathBuf::from),
            artifact_dir: text("EDGESHIP_ARTIFACT_DIR").map(PathBuf::from),
            log_filter: text("EDGESHIP_LOG"),
            log_json,
            rejected,
        }
    }
}

fn parse_var<T>(
    name: &'static str,
    raw: Option<String>,
    parse: impl Fn(&str) -> Option<T>,
    rejected: &mut Vec<RejectedVar>,
) -> Option<T> {
    let value = raw?;
    let parsed = parse(&value);
    if parsed.is_none() {
        rejected.push(RejectedVar { name, value });
    }
    parsed
}
