//! Secret lifecycle: idempotent reuse, rotation and distribution files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use edgeship_model::{
    AuditEvent, AuditEventType, DeploymentError, DomainName, Environment,
    ErrorKind, Phase,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zeroize::Zeroize;

use super::ResourceContext;
use super::vault::{SecretValue, SecretVault, StoredBundle};
use crate::config::SecretsConfig;
use crate::executor::ExecutorOperation;

const DEFAULT_SECRET_BYTES: usize = 32;

/// One secret every domain bundle must contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySpec {
    pub name: String,
    /// Random bytes before encoding.
    #[serde(default = "default_secret_bytes")]
    pub bytes: usize,
}

fn default_secret_bytes() -> usize {
    DEFAULT_SECRET_BYTES
}

impl SecretKeySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: DEFAULT_SECRET_BYTES,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DistributionFormat {
    /// `KEY=value` lines for direct injection into the deployment.
    DotEnv,
    /// JSON document for external consumers.
    Json,
}

impl DistributionFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionFormat::DotEnv => "dotenv",
            DistributionFormat::Json => "json",
        }
    }

    pub fn file_name(
        self,
        domain: &DomainName,
        environment: &Environment,
    ) -> String {
        match self {
            DistributionFormat::DotEnv => {
                format!("{}.{}.env", domain.slug(), environment)
            }
            DistributionFormat::Json => {
                format!("{}.{}.secrets.dist.json", domain.slug(), environment)
            }
        }
    }

    fn render(
        self,
        bundle: &StoredBundle,
    ) -> std::result::Result<String, String> {
        match self {
            DistributionFormat::DotEnv => {
                let mut out = String::new();
                for (key, value) in &bundle.values {
                    let value = value.expose();
                    if value.contains('\n') {
                        return Err(format!(
                            "secret {key} cannot be written as dotenv"
                        ));
                    }
                    if value.chars().any(|c| c.is_whitespace() || c == '#') {
                        out.push_str(&format!("{key}=\"{value}\"\n"));
                    } else {
                        out.push_str(&format!("{key}={value}\n"));
                    }
                }
                Ok(out)
            }
            DistributionFormat::Json => {
                let secrets: Map<String, Value> = bundle
                    .values
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.expose())))
                    .collect();
                let document = serde_json::json!({
                    "domain": bundle.domain,
                    "environment": bundle.environment,
                    "version": bundle.version,
                    "secrets": secrets,
                });
                serde_json::to_string_pretty(&document)
                    .map_err(|err| err.to_string())
            }
        }
    }
}

/// Per-call switches; defaults come from [`SecretsConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretOptions {
    /// Keep entries already present in the vault.
    pub reuse_existing: bool,
    /// Regenerate every entry, even when reuse is on.
    pub rotate_all: bool,
}

impl Default for SecretOptions {
    fn default() -> Self {
        Self {
            reuse_existing: true,
            rotate_all: false,
        }
    }
}

/// Outcome of one `ensure` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    pub domain: DomainName,
    pub environment: Environment,
    pub version: u32,
    pub reused: usize,
    pub generated: usize,
    pub distribution_formats: BTreeSet<DistributionFormat>,
    /// Keys that did not exist before this call.
    pub created_keys: Vec<String>,
    /// Truncated SHA-256 of each value; values themselves never leave the
    /// vault.
    pub fingerprints: BTreeMap<String, String>,
    pub distribution_files: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct SecretManager {
    vault: Arc<dyn SecretVault>,
    keys: Vec<SecretKeySpec>,
    formats: BTreeSet<DistributionFormat>,
    distribution_dir: Option<PathBuf>,
}

impl SecretManager {
    pub fn new(vault: Arc<dyn SecretVault>, config: &SecretsConfig) -> Self {
        Self {
            vault,
            keys: config.keys.clone(),
            formats: config.distribution_formats.iter().copied().collect(),
            distribution_dir: config
                .distribution_dir
                .clone()
                .or_else(|| config.vault_dir.clone()),
        }
    }

    pub fn vault(&self) -> &Arc<dyn SecretVault> {
        &self.vault
    }

    pub fn keys(&self) -> &[SecretKeySpec] {
        &self.keys
    }

    /// Make sure every configured key exists for `domain` + `environment`.
    ///
    /// The bundle is recorded in the vault and rendered to every
    /// distribution format before any value is pushed to the backend.
    pub async fn ensure(
        &self,
        ctx: &ResourceContext,
        domain: &DomainName,
        environment: &Environment,
        options: SecretOptions,
    ) -> Result<SecretBundle, DeploymentError> {
        let existing = self
            .vault
            .load(domain, environment)
            .await
            .map_err(|err| {
                DeploymentError::fatal("could not load secret bundle")
                    .with_detail(err.to_string())
            })?;
        let previous_version = existing.as_ref().map_or(0, |b| b.version);
        let mut bundle = existing.unwrap_or_else(|| {
            StoredBundle::new(domain.clone(), environment.clone())
        });

        let mut reused = 0;
        let mut generated = 0;
        let mut created_keys = Vec::new();
        for spec in &self.keys {
            let present = bundle.values.contains_key(&spec.name);
            if present && options.reuse_existing && !options.rotate_all {
                reused += 1;
                continue;
            }
            if !present {
                created_keys.push(spec.name.clone());
            }
            bundle
                .values
                .insert(spec.name.clone(), generate_secret(spec.bytes));
            generated += 1;
        }

        if generated > 0 {
            bundle.version = previous_version + 1;
            bundle.updated_at = Utc::now();
        }

        if !ctx.dry_run && generated > 0 {
            self.vault.store(&bundle).await.map_err(|err| {
                DeploymentError::fatal("could not persist secret bundle")
                    .with_detail(err.to_string())
            })?;
        }

        let distribution_files =
            self.distribute(ctx, &bundle).await.map_err(|detail| {
                DeploymentError::fatal("secret distribution failed")
                    .with_detail(detail)
            })?;

        for (name, value) in &bundle.values {
            let request = ctx
                .request(ExecutorOperation::SetSecret, domain, environment)
                .with_param("name", name.clone())
                .with_sensitive_param("value", value.expose());
            let result = ctx.call(Phase::Secrets, request).await;
            if !result.succeeded() {
                return Err(result.to_error(&format!("setSecret {name} failed")));
            }
        }

        let fingerprints: BTreeMap<String, String> = bundle
            .values
            .iter()
            .map(|(name, value)| (name.clone(), fingerprint(value)))
            .collect();

        let event_type = if generated > 0 {
            AuditEventType::ResourceCreated
        } else {
            AuditEventType::ResourceReused
        };
        let fingerprint_details: Map<String, Value> = fingerprints
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        ctx.audit(
            AuditEvent::for_domain(
                ctx.store.orchestration_id(),
                domain.clone(),
                event_type,
            )
            .with_detail("resource", "secretBundle")
            .with_detail("version", bundle.version)
            .with_detail("generated", generated)
            .with_detail("reused", reused)
            .with_detail("createdKeys", created_keys.clone())
            .with_detail(
                "distributionFormats",
                self.formats
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>(),
            )
            .with_detail("fingerprints", Value::Object(fingerprint_details))
            .with_detail("dryRun", ctx.dry_run),
        )
        .await;

        info!(
            target: "edgeship::resources",
            domain = %domain,
            environment = %environment,
            version = bundle.version,
            generated,
            reused,
            "secret bundle ensured"
        );

        Ok(SecretBundle {
            domain: domain.clone(),
            environment: environment.clone(),
            version: bundle.version,
            reused,
            generated,
            distribution_formats: self.formats.clone(),
            created_keys,
            fingerprints,
            distribution_files,
        })
    }

    async fn distribute(
        &self,
        ctx: &ResourceContext,
        bundle: &StoredBundle,
    ) -> std::result::Result<Vec<PathBuf>, String> {
        if self.formats.is_empty() {
            return Err("no distribution format configured".to_string());
        }

        let mut rendered = Vec::with_capacity(self.formats.len());
        for format in &self.formats {
            let contents = format.render(bundle)?;
            rendered.push((*format, contents));
        }

        let Some(dir) = self.distribution_dir.as_deref() else {
            return Ok(Vec::new());
        };
        if ctx.dry_run {
            debug!(
                target: "edgeship::resources",
                domain = %bundle.domain,
                "dry-run: skipping distribution files"
            );
            return Ok(Vec::new());
        }

        let mut files = Vec::with_capacity(rendered.len());
        for (format, mut contents) in rendered {
            let path = dir.join(format.file_name(&bundle.domain, &bundle.environment));
            let written = write_private(dir, &path, &contents).await;
            contents.zeroize();
            written.map_err(|err| format!("{}: {err}", path.display()))?;
            files.push(path);
        }
        Ok(files)
    }

    /// Drop keys from the vault during rollback.
    pub async fn revoke(
        &self,
        domain: &DomainName,
        environment: &Environment,
        keys: &[String],
    ) -> Result<(), DeploymentError> {
        self.vault
            .revoke(domain, environment, keys)
            .await
            .map_err(|err| {
                DeploymentError::new(
                    ErrorKind::RollbackFailure,
                    "could not revoke secrets from vault",
                )
                .with_detail(err.to_string())
            })
    }
}

async fn write_private(
    dir: &Path,
    path: &Path,
    contents: &str,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, contents.as_bytes()).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(
            path,
            std::fs::Permissions::from_mode(0o600),
        )
        .await?;
    }
    Ok(())
}

fn generate_secret(bytes: usize) -> SecretValue {
    let mut buf = vec![0u8; bytes.max(16)];
    rand::rng().fill_bytes(&mut buf);
    let encoded = URL_SAFE_NO_PAD.encode(&buf);
    buf.zeroize();
    SecretValue::new(encoded)
}

/// First 16 hex chars of the value's SHA-256.
pub fn fingerprint(value: &SecretValue) -> String {
    let digest = Sha256::digest(value.expose().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_url_safe_and_unique() {
        let a = generate_secret(32);
        let b = generate_secret(32);
        assert_ne!(a, b);
        assert_eq!(a.expose().len(), 43);
        assert!(
            a.expose()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn fingerprint_does_not_reveal_value() {
        let value = SecretValue::new("abc");
        let print = fingerprint(&value);
        assert_eq!(print.len(), 16);
        assert_eq!(print, "ba7816bf8f01cfea");
    }

    #[test]
    fn dotenv_and_json_render_every_key() {
        let mut bundle = StoredBundle::new(
            DomainName::new("a.com"),
            Environment::parse("production").unwrap(),
        );
        bundle.version = 2;
        bundle.values.insert("A".into(), SecretValue::new("x y"));
        bundle.values.insert("B".into(), SecretValue::new("plain"));

        let dotenv = DistributionFormat::DotEnv.render(&bundle).unwrap();
        assert_eq!(dotenv, "A=\"x y\"\nB=plain\n");

        let json = DistributionFormat::Json.render(&bundle).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 2);
        assert_eq!(value["secrets"]["B"], "plain");
    }

    #[test]
    fn formats_deserialize_lowercase() {
        let formats: Vec<DistributionFormat> =
            serde_json::from_str(r#"["dotenv","json"]"#).unwrap();
        assert_eq!(
            formats,
            vec![DistributionFormat::DotEnv, DistributionFormat::Json]
        );
    }
}
