//! Per-domain configuration artifacts.
//!
//! Resource managers hand resource identifiers (database id, secret bundle
//! version) to a [`ConfigWriter`]; failures here are fatal to the owning
//! phase.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use edgeship_model::{DomainName, Environment};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Key/value pairs merged into a domain's artifact.
pub type ConfigPatch = BTreeMap<String, String>;

#[async_trait]
pub trait ConfigWriter: Send + Sync + fmt::Debug {
    async fn update(
        &self,
        domain: &DomainName,
        environment: &Environment,
        patch: &ConfigPatch,
    ) -> Result<()>;
}

/// Used when no artifact directory is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConfigWriter;

#[async_trait]
impl ConfigWriter for NoopConfigWriter {
    async fn update(
        &self,
        _domain: &DomainName,
        _environment: &Environment,
        _patch: &ConfigPatch,
    ) -> Result<()> {
        Ok(())
    }
}

/// Merges patches into `<dir>/<domain>.toml` under
/// `[environments.<environment>]`.
pub struct TomlConfigWriter {
    dir: PathBuf,
    file_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl fmt::Debug for TomlConfigWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TomlConfigWriter")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl TomlConfigWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, domain: &DomainName) -> PathBuf {
        self.dir.join(format!("{}.toml", domain.as_str()))
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.file_locks.lock().await;
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Read back one environment's table, mostly for inspection and tests.
    pub async fn read_environment(
        &self,
        domain: &DomainName,
        environment: &Environment,
    ) -> Result<ConfigPatch> {
        let path = self.path_for(domain);
        let document = load_document(&path).await?;
        let values = document
            .get("environments")
            .and_then(toml::Value::as_table)
            .and_then(|envs| envs.get(environment.as_str()))
            .and_then(toml::Value::as_table)
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|v| (key.clone(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(values)
    }
}

async fn load_document(path: &Path) -> Result<toml::Table> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents.parse::<toml::Table>().map_err(|err| {
            EngineError::ConfigArtifact {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Ok(toml::Table::new())
        }
        Err(err) => Err(EngineError::ConfigArtifact {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

#[async_trait]
impl ConfigWriter for TomlConfigWriter {
    async fn update(
        &self,
        domain: &DomainName,
        environment: &Environment,
        patch: &ConfigPatch,
    ) -> Result<()> {
        let path = self.path_for(domain);
        let lock = self.lock_for(&path).await;
        let _guard = lock.lock().await;

        let artifact_error = |message: String| EngineError::ConfigArtifact {
            path: path.clone(),
            message,
        };

        let mut document = load_document(&path).await?;
        let environments = document
            .entry("environments")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| {
                artifact_error("`environments` is not a table".to_string())
            })?;
        let table = environments
            .entry(environment.as_str())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| {
                artifact_error(format!(
                    "`environments.{environment}` is not a table"
                ))
            })?;
        for (key, value) in patch {
            table.insert(key.clone(), toml::Value::String(value.clone()));
        }

        let rendered = toml::to_string(&document)
            .map_err(|err| artifact_error(err.to_string()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| artifact_error(err.to_string()))?;
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|err| artifact_error(err.to_string()))?;

        debug!(
            target: "edgeship::resources",
            domain = %domain,
            environment = %environment,
            keys = patch.len(),
            path = %path.display(),
            "config artifact updated"
        );
        Ok(())
    }
}
