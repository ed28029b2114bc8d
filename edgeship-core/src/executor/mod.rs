//! Contract with the external deployment backend.
//!
//! The engine never looks inside an executor; it only reads `success`,
//! `retryable` and `error_detail` from the returned [`ExecutionOutcome`].

mod command;
mod dry_run;

pub use command::CommandExecutor;
pub use dry_run::DryRunExecutor;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use edgeship_model::{DomainName, Environment};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Side-effecting operations the engine asks the backend to perform.
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
#[serde(rename_all = "camelCase")]
pub enum ExecutorOperation {
    CheckDatabaseExists,
    CreateDatabase,
    ApplyMigrations,
    SetSecret,
    DeployArtifact,
    HealthCheck,
    DeleteDatabase,
    DeleteSecret,
    RollbackDeployment,
}

impl ExecutorOperation {
    /// Read-only probes that still reach the backend during a dry run.
    pub fn is_dry_run_safe(self) -> bool {
        matches!(self, ExecutorOperation::CheckDatabaseExists)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorOperation::CheckDatabaseExists => "checkDatabaseExists",
            ExecutorOperation::CreateDatabase => "createDatabase",
            ExecutorOperation::ApplyMigrations => "applyMigrations",
            ExecutorOperation::SetSecret => "setSecret",
            ExecutorOperation::DeployArtifact => "deployArtifact",
            ExecutorOperation::HealthCheck => "healthCheck",
            ExecutorOperation::DeleteDatabase => "deleteDatabase",
            ExecutorOperation::DeleteSecret => "deleteSecret",
            ExecutorOperation::RollbackDeployment => "rollbackDeployment",
        }
    }
}

impl fmt::Display for ExecutorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call into the executor.
#[derive(Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub operation: ExecutorOperation,
    pub domain: DomainName,
    pub environment: Environment,
    pub params: BTreeMap<String, String>,
    /// Params whose values must never be logged (secret material).
    pub sensitive_params: Vec<String>,
    pub timeout: Duration,
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: BTreeMap<&str, &str> = self
            .params
            .iter()
            .map(|(key, value)| {
                if self.sensitive_params.contains(key) {
                    (key.as_str(), "<redacted>")
                } else {
                    (key.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("ExecutionRequest")
            .field("operation", &self.operation)
            .field("domain", &self.domain)
            .field("environment", &self.environment)
            .field("params", &params)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ExecutionRequest {
    pub fn new(
        operation: ExecutorOperation,
        domain: DomainName,
        environment: Environment,
        timeout: Duration,
    ) -> Self {
        Self {
            operation,
            domain,
            environment,
            params: BTreeMap::new(),
            sensitive_params: Vec::new(),
            timeout,
        }
    }

    pub fn with_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_sensitive_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let key = key.into();
        self.sensitive_params.push(key.clone());
        self.params.insert(key, value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Result of one executor call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub retryable: bool,
    pub error_detail: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            retryable: false,
            error_detail: None,
        }
    }

    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            retryable: true,
            error_detail: Some(detail.into()),
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            retryable: false,
            error_detail: Some(detail.into()),
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::retryable(format!("executor call timed out after {timeout:?}"))
    }

    pub fn detail(&self) -> &str {
        self.error_detail.as_deref().unwrap_or("executor reported failure")
    }

    /// Field lookup when the backend answered with a JSON object.
    pub fn json_field(&self, key: &str) -> Option<Value> {
        serde_json::from_str::<Value>(self.output.trim())
            .ok()
            .and_then(|value| value.get(key).cloned())
    }

    pub fn first_line(&self) -> Option<&str> {
        self.output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }
}

/// The opaque deployment backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeploymentExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome;
}
