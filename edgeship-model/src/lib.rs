//! Core data model definitions shared across edgeship crates.
#![allow(missing_docs)]

pub mod audit;
pub mod error;
pub mod ids;
pub mod names;
pub mod phase;
pub mod rollback;
pub mod state;
pub mod summary;

// Intentionally curated re-exports for downstream consumers.
pub use audit::{AuditDetails, AuditEvent, AuditEventType};
pub use error::{DeploymentError, ErrorKind, ModelError, Result as ModelResult};
pub use ids::{DeploymentId, OrchestrationId};
pub use names::{DomainName, Environment};
pub use phase::{DomainStatus, Phase};
pub use rollback::{RollbackAction, RollbackActionState, RollbackKind};
pub use state::{DomainState, metadata_keys};
pub use summary::{DomainSummary, PortfolioSummary};
