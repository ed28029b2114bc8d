use std::collections::BTreeSet;

use edgeship_core::EngineConfig;
use edgeship_core::config::RetryConfig;
use regex::Regex;
use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("secret key {name} is listed more than once")]
    DuplicateSecretKey { name: String },
    #[error("invalid retryable pattern '{pattern}'")]
    InvalidRetryablePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("command template for {operation} has no program")]
    EmptyCommand { operation: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    pub fn mentions(&self, needle: &str) -> bool {
        self.items.iter().any(|w| w.message.contains(needle))
    }
}

/// Reject configurations the engine cannot run with; warn about risky ones.
pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let engine = &config.engine;
    let mut warnings = ConfigWarnings::default();

    if engine.run.concurrency_limit == 0 {
        return Err(ConfigGuardRailError::InvalidValue {
            field: "run.concurrency_limit",
            reason: "must be at least 1".into(),
        });
    }

    check_retry("retry", &engine.retry, &mut warnings)?;
    check_retry("rollback_retry", &engine.rollback_retry, &mut warnings)?;
    check_retry(
        "health_check_retry",
        &engine.health_check_retry,
        &mut warnings,
    )?;

    check_secrets(engine, &mut warnings)?;
    check_executor(engine, &mut warnings)?;

    let template = &engine.database.name_template;
    if !template.contains("{slug}") && !template.contains("{domain}") {
        warnings.push_with_hint(
            format!(
                "database.name_template '{template}' does not reference the domain"
            ),
            "Every domain would share one database; include {slug} or {domain}",
        );
    }

    if engine.run.dry_run {
        warnings.push("dry-run is enabled; no mutating executor call will be made");
    }

    if engine.state.persist_dir.is_none() {
        warnings.push_with_hint(
            "state.persist_dir not set; audit logs live only in memory",
            "Set EDGESHIP_STATE_DIR to keep snapshots and audit logs on disk",
        );
    }

    Ok(warnings)
}

fn check_retry(
    field: &'static str,
    retry: &RetryConfig,
    warnings: &mut ConfigWarnings,
) -> Result<(), ConfigGuardRailError> {
    if retry.max_attempts == 0 {
        return Err(ConfigGuardRailError::InvalidValue {
            field,
            reason: "max_attempts must be at least 1".into(),
        });
    }
    if !(0.0..=1.0).contains(&retry.jitter_ratio) {
        return Err(ConfigGuardRailError::InvalidValue {
            field,
            reason: format!(
                "jitter_ratio {} is outside [0, 1]",
                retry.jitter_ratio
            ),
        });
    }
    if retry.backoff_base_ms > retry.backoff_max_ms {
        warnings.push(format!(
            "{field}.backoff_base_ms exceeds backoff_max_ms; every delay is capped at {}ms",
            retry.backoff_max_ms
        ));
    }
    Ok(())
}

fn check_secrets(
    engine: &EngineConfig,
    warnings: &mut ConfigWarnings,
) -> Result<(), ConfigGuardRailError> {
    let secrets = &engine.secrets;
    if secrets.distribution_formats.is_empty() {
        return Err(ConfigGuardRailError::InvalidValue {
            field: "secrets.distribution_formats",
            reason: "must name at least one format".into(),
        });
    }

    let mut seen = BTreeSet::new();
    for key in &secrets.keys {
        if !seen.insert(key.name.as_str()) {
            return Err(ConfigGuardRailError::DuplicateSecretKey {
                name: key.name.clone(),
            });
        }
        if key.bytes < 16 {
            warnings.push(format!(
                "secret {} uses only {} random bytes",
                key.name, key.bytes
            ));
        }
    }
    if secrets.keys.is_empty() {
        warnings.push("secrets.keys is empty; no secret will be provisioned");
    }

    if secrets.vault_dir.is_none() {
        warnings.push_with_hint(
            "secrets.vault_dir not set; generated secrets are kept in memory",
            "Set EDGESHIP_SECRETS_DIR so reruns reuse existing secrets",
        );
    }
    if secrets.reuse_existing && secrets.rotate_all {
        warnings.push("secrets.rotate_all overrides reuse_existing");
    }
    Ok(())
}

fn check_executor(
    engine: &EngineConfig,
    warnings: &mut ConfigWarnings,
) -> Result<(), ConfigGuardRailError> {
    let executor = &engine.executor;
    for pattern in &executor.retryable_patterns {
        Regex::new(pattern).map_err(|source| {
            ConfigGuardRailError::InvalidRetryablePattern {
                pattern: pattern.clone(),
                source,
            }
        })?;
    }

    for (operation, argv) in &executor.commands {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(ConfigGuardRailError::EmptyCommand {
                operation: operation.to_string(),
            });
        }
    }

    if executor.commands.is_empty() {
        warnings.push_with_hint(
            "executor.commands is empty; the command executor rejects every operation",
            "Add an argv template per operation under [executor.commands]",
        );
    }
    Ok(())
}
