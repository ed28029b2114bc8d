use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phase::{DomainStatus, Phase};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid domain name '{name}': {reason}")]
    InvalidDomain { name: String, reason: &'static str },
    #[error("invalid environment '{0}'")]
    InvalidEnvironment(String),
    #[error("phase cannot move backwards from {from} to {to}")]
    PhaseRegression { from: Phase, to: Phase },
    #[error("status cannot change from {from} to {to}")]
    InvalidStatusTransition { from: DomainStatus, to: DomainStatus },
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Failure taxonomy shared by phases, resource managers and the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad input, missing prerequisite or circular dependency. Never retried.
    Validation,
    /// Executor failure that exhausted its retry budget.
    TransientExecutor,
    /// Executor failure that must not be retried.
    FatalExecutor,
    /// Existing resource does not match the requested configuration.
    ResourceReuseConflict,
    /// A compensating action could not complete.
    RollbackFailure,
    /// The run was cancelled before or while the domain was deploying.
    Cancelled,
    /// A prerequisite domain did not reach COMPLETED.
    UpstreamDependency,
    /// Writing the configuration artifact failed.
    ConfigArtifact,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::TransientExecutor => "TRANSIENT_EXECUTOR",
            ErrorKind::FatalExecutor => "FATAL_EXECUTOR",
            ErrorKind::ResourceReuseConflict => "RESOURCE_REUSE_CONFLICT",
            ErrorKind::RollbackFailure => "ROLLBACK_FAILURE",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::UpstreamDependency => "UPSTREAM_DEPENDENCY",
            ErrorKind::ConfigArtifact => "CONFIG_ARTIFACT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error recorded on a [`crate::DomainState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct DeploymentError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Number of executor attempts spent before giving up, if any.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl DeploymentError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            phase: None,
            detail: None,
            attempts: 0,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalExecutor, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientExecutor, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn upstream_dependency_failed(upstream: &[String]) -> Self {
        Self::new(ErrorKind::UpstreamDependency, "upstream dependency failed")
            .with_detail(upstream.join(","))
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}
