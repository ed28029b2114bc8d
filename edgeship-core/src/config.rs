use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::ExecutorOperation;
use crate::resources::secrets::{DistributionFormat, SecretKeySpec};
use crate::retry::{BackoffStrategy, RetryPolicy};

/// Global knobs that tune engine behaviour.
///
/// All fields carry defaults so a partial configuration file only needs to
/// name what it overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run-level defaults (concurrency, dry-run, timeout).
    pub run: RunConfig,
    /// Retry/backoff policy for executor calls made by resource managers.
    pub retry: RetryConfig,
    /// Retry policy for compensating actions.
    pub rollback_retry: RetryConfig,
    /// Retry policy for the best-effort post-deployment health check.
    pub health_check_retry: RetryConfig,
    /// External command executor tuning.
    pub executor: ExecutorConfig,
    /// Database lifecycle defaults.
    pub database: DatabaseConfig,
    /// Secret lifecycle defaults.
    pub secrets: SecretsConfig,
    /// Optional on-disk backing of portfolio state and audit log.
    pub state: StateConfig,
    /// Per-domain configuration artifacts.
    pub artifacts: ArtifactConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            retry: RetryConfig::default(),
            rollback_retry: RetryConfig::rollback_default(),
            health_check_retry: RetryConfig::health_check_default(),
            executor: ExecutorConfig::default(),
            database: DatabaseConfig::default(),
            secrets: SecretsConfig::default(),
            state: StateConfig::default(),
            artifacts: ArtifactConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of domain pipelines in flight at once.
    pub concurrency_limit: usize,
    /// Suppress mutating executor calls.
    pub dry_run: bool,
    /// Cancel the run after this many seconds.
    pub timeout_secs: Option<u64>,
    /// Automated flows turn reuse conflicts into failures instead of warnings.
    pub automated: bool,
    /// Environments a run may target. Empty allows any.
    pub allowed_environments: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            dry_run: false,
            timeout_secs: None,
            automated: true,
            allowed_environments: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            strategy: BackoffStrategy::Exponential,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            jitter_ratio: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn rollback_default() -> Self {
        Self {
            max_attempts: 3,
            ..Self::default()
        }
    }

    pub fn health_check_default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Fixed,
            backoff_base_ms: 1_000,
            ..Self::default()
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            strategy: self.strategy,
            base_delay: self.backoff_base(),
            max_delay: self.backoff_max(),
            jitter_ratio: self.jitter_ratio.clamp(0.0, 1.0),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Timeout applied to every executor call unless overridden.
    pub timeout_secs: u64,
    /// Per-operation timeout overrides.
    pub operation_timeouts_secs: BTreeMap<ExecutorOperation, u64>,
    /// argv templates per operation for the command executor.
    pub commands: BTreeMap<ExecutorOperation, Vec<String>>,
    /// stderr patterns that mark a failed command as retryable.
    pub retryable_patterns: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            operation_timeouts_secs: BTreeMap::from([
                (ExecutorOperation::DeployArtifact, 600),
                (ExecutorOperation::HealthCheck, 30),
            ]),
            commands: BTreeMap::new(),
            retryable_patterns: default_retryable_patterns(),
            working_dir: None,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout_for(&self, operation: ExecutorOperation) -> Duration {
        let secs = self
            .operation_timeouts_secs
            .get(&operation)
            .copied()
            .unwrap_or(self.timeout_secs);
        Duration::from_secs(secs.max(1))
    }
}

fn default_retryable_patterns() -> Vec<String> {
    [
        r"(?i)timed? ?out",
        r"(?i)temporarily unavailable",
        r"(?i)connection (reset|refused|closed)",
        r"(?i)rate limit",
        r"\b429\b",
        r"\b5\d\d\b",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Apply migrations right after a database is created.
    pub apply_migrations: bool,
    /// Also apply migrations when an existing database is reused.
    pub migrate_existing: bool,
    /// Name template; `{slug}` and `{environment}` are substituted.
    pub name_template: String,
    /// Directory handed to the executor's migration command.
    pub migrations_dir: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            apply_migrations: true,
            migrate_existing: false,
            name_template: "{slug}-{environment}".to_string(),
            migrations_dir: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Where generated bundles are kept between runs. In-memory when unset.
    pub vault_dir: Option<PathBuf>,
    /// Where distribution files are written. Defaults to `vault_dir`.
    pub distribution_dir: Option<PathBuf>,
    pub reuse_existing: bool,
    pub rotate_all: bool,
    pub keys: Vec<SecretKeySpec>,
    pub distribution_formats: Vec<DistributionFormat>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            vault_dir: None,
            distribution_dir: None,
            reuse_existing: true,
            rotate_all: false,
            keys: vec![
                SecretKeySpec::new("SESSION_SECRET"),
                SecretKeySpec::new("API_SIGNING_KEY"),
                SecretKeySpec::new("DATA_ENCRYPTION_KEY"),
            ],
            distribution_formats: vec![
                DistributionFormat::DotEnv,
                DistributionFormat::Json,
            ],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Persist snapshots and audit logs here when set.
    pub persist_dir: Option<PathBuf>,
    /// Capacity of the live audit broadcast channel.
    pub event_channel_capacity: usize,
    /// Runs kept in memory for lookups; the oldest is dropped first.
    pub retained_runs: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            persist_dir: None,
            event_channel_capacity: 1024,
            retained_runs: 32,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Directory of per-domain TOML artifacts. Disabled when unset.
    pub dir: Option<PathBuf>,
}
