use std::path::PathBuf;

use edgeship_model::{DomainName, ModelError, OrchestrationId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Circular dependency between domains: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Unknown domain: {0}")]
    UnknownDomain(DomainName),

    #[error("Portfolio {0} is sealed; no further mutation is accepted")]
    PortfolioSealed(OrchestrationId),

    #[error("Unknown orchestration run: {0}")]
    UnknownOrchestration(OrchestrationId),

    #[error("Config artifact error for {path}: {message}")]
    ConfigArtifact { path: PathBuf, message: String },

    #[error("Secret vault error: {0}")]
    Vault(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
