//! Storage for generated secret bundles between runs.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edgeship_model::{DomainName, Environment};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{EngineError, Result};

/// A secret value that is wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

/// The persisted record of one domain+environment's secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBundle {
    pub domain: DomainName,
    pub environment: Environment,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub values: BTreeMap<String, SecretValue>,
}

impl StoredBundle {
    pub fn new(domain: DomainName, environment: Environment) -> Self {
        Self {
            domain,
            environment,
            version: 0,
            updated_at: Utc::now(),
            values: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait SecretVault: Send + Sync + fmt::Debug {
    async fn load(
        &self,
        domain: &DomainName,
        environment: &Environment,
    ) -> Result<Option<StoredBundle>>;

    async fn store(&self, bundle: &StoredBundle) -> Result<()>;

    /// Drop the named keys; removes the bundle when nothing is left.
    async fn revoke(
        &self,
        domain: &DomainName,
        environment: &Environment,
        keys: &[String],
    ) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemorySecretVault {
    bundles: Mutex<HashMap<(DomainName, Environment), StoredBundle>>,
}

impl InMemorySecretVault {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretVault for InMemorySecretVault {
    async fn load(
        &self,
        domain: &DomainName,
        environment: &Environment,
    ) -> Result<Option<StoredBundle>> {
        let bundles = self.bundles.lock().await;
        Ok(bundles.get(&(domain.clone(), environment.clone())).cloned())
    }

    async fn store(&self, bundle: &StoredBundle) -> Result<()> {
        self.bundles.lock().await.insert(
            (bundle.domain.clone(), bundle.environment.clone()),
            bundle.clone(),
        );
        Ok(())
    }

    async fn revoke(
        &self,
        domain: &DomainName,
        environment: &Environment,
        keys: &[String],
    ) -> Result<()> {
        let mut bundles = self.bundles.lock().await;
        let key = (domain.clone(), environment.clone());
        if let Some(bundle) = bundles.get_mut(&key) {
            for name in keys {
                bundle.values.remove(name);
            }
            if bundle.values.is_empty() {
                bundles.remove(&key);
            }
        }
        Ok(())
    }
}

/// JSON file per domain+environment under one directory.
#[derive(Debug, Clone)]
pub struct FileSecretVault {
    dir: PathBuf,
}

impl FileSecretVault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(
        &self,
        domain: &DomainName,
        environment: &Environment,
    ) -> PathBuf {
        self.dir
            .join(format!("{}.{}.secrets.json", domain.slug(), environment))
    }

    async fn write(&self, bundle: &StoredBundle) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| EngineError::Vault(err.to_string()))?;
        let path = self.path_for(&bundle.domain, &bundle.environment);
        let bytes = serde_json::to_vec_pretty(bundle)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|err| EngineError::Vault(err.to_string()))?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| EngineError::Vault(err.to_string()))
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|err| EngineError::Vault(err.to_string()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl SecretVault for FileSecretVault {
    async fn load(
        &self,
        domain: &DomainName,
        environment: &Environment,
    ) -> Result<Option<StoredBundle>> {
        let path = self.path_for(domain, environment);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(EngineError::Vault(err.to_string())),
        }
    }

    async fn store(&self, bundle: &StoredBundle) -> Result<()> {
        self.write(bundle).await
    }

    async fn revoke(
        &self,
        domain: &DomainName,
        environment: &Environment,
        keys: &[String],
    ) -> Result<()> {
        let Some(mut bundle) = self.load(domain, environment).await? else {
            return Ok(());
        };
        for name in keys {
            bundle.values.remove(name);
        }
        if bundle.values.is_empty() {
            let path = self.path_for(domain, environment);
            return match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    Ok(())
                }
                Err(err) => Err(EngineError::Vault(err.to_string())),
            };
        }
        bundle.updated_at = Utc::now();
        self.write(&bundle).await
    }
}
