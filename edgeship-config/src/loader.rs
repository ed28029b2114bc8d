use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::debug;

use crate::models::sources::{EnvConfig, FileConfig};
use crate::models::{Config, ConfigMetadata, LoggingConfig};
use crate::validation::{self, ConfigGuardRailError, ConfigWarnings};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("edgeship.toml"),
        PathBuf::from("config/edgeship.toml"),
    ]
});

const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file {path} does not exist")]
    MissingConfig { path: PathBuf },
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error("failed to read env file")]
    EnvFile(#[from] dotenvy::Error),
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Compose the configuration from file, `.env` and process environment.
    ///
    /// The `.env` file is read without touching the process environment;
    /// real variables win over its entries.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_path = self
            .options
            .env_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE));
        let dotenv = read_env_file(&env_path)?;
        let env_file_loaded = dotenv.is_some();
        let env = EnvConfig::gather_with(&dotenv.unwrap_or_default());
        self.compose(env, env_file_loaded)
    }

    /// Same as [`ConfigLoader::load`] with an already gathered environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        self.compose(env, false)
    }

    fn compose(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();
        let (file_config, config_path) = self.load_file_config(&env)?;

        if config_path.is_none() {
            warnings.push_with_hint(
                "No edgeship.toml detected; using defaults and environment variables",
                "Create edgeship.toml or point EDGESHIP_CONFIG at one",
            );
        }
        for rejected in &env.rejected {
            warnings.push(format!(
                "ignored {}='{}': value could not be parsed",
                rejected.name, rejected.value
            ));
        }

        let FileConfig {
            mut engine,
            logging: file_logging,
        } = file_config.unwrap_or_default();
        let mut overrides = Vec::new();

        if let Some(limit) = env.concurrency {
            engine.run.concurrency_limit = limit;
            overrides.push("EDGESHIP_CONCURRENCY");
        }
        if let Some(dry_run) = env.dry_run {
            engine.run.dry_run = dry_run;
            overrides.push("EDGESHIP_DRY_RUN");
        }
        if let Some(secs) = env.run_timeout_secs {
            engine.run.timeout_secs = Some(secs);
            overrides.push("EDGESHIP_RUN_TIMEOUT_SECS");
        }
        if let Some(automated) = env.automated {
            engine.run.automated = automated;
            overrides.push("EDGESHIP_AUTOMATED");
        }
        if let Some(environments) = env.allowed_environments {
            engine.run.allowed_environments = environments;
            overrides.push("EDGESHIP_ALLOWED_ENVIRONMENTS");
        }
        if let Some(dir) = env.state_dir {
            engine.state.persist_dir = Some(dir);
            overrides.push("EDGESHIP_STATE_DIR");
        }
        if let Some(dir) = env.secrets_dir {
            engine.secrets.vault_dir = Some(dir);
            overrides.push("EDGESHIP_SECRETS_DIR");
        }
        if let Some(dir) = env.artifact_dir {
            engine.artifacts.dir = Some(dir);
            overrides.push("EDGESHIP_ARTIFACT_DIR");
        }

        let defaults = LoggingConfig::default();
        let logging = LoggingConfig {
            filter: env
                .log_filter
                .inspect(|_| overrides.push("EDGESHIP_LOG"))
                .or(file_logging.filter)
                .unwrap_or(defaults.filter),
            json: env
                .log_json
                .inspect(|_| overrides.push("EDGESHIP_LOG_JSON"))
                .or(file_logging.json)
                .unwrap_or(defaults.json),
        };

        let config = Config {
            engine,
            logging,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
                env_overrides: overrides,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let named = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match named {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;
        debug!(path = %path.display(), "loaded configuration file");

        Ok((Some(file_config), Some(path)))
    }
}

/// `Ok(None)` when the file does not exist.
fn read_env_file(
    path: &Path,
) -> Result<Option<HashMap<String, String>>, dotenvy::Error> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(err) if err.not_found() => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut values = HashMap::new();
    for item in iter {
        let (key, value) = item?;
        values.insert(key, value);
    }
    Ok(Some(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_file_is_read_without_touching_process_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.env");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "EDGESHIP_TEST_ONLY_KEY=from-file").unwrap();

        let values = read_env_file(&path).unwrap().unwrap();
        assert_eq!(
            values.get("EDGESHIP_TEST_ONLY_KEY").map(String::as_str),
            Some("from-file")
        );
        assert!(std::env::var("EDGESHIP_TEST_ONLY_KEY").is_err());
    }

    #[test]
    fn absent_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_env_file(&dir.path().join("nope.env")).unwrap().is_none());
    }
}
