//! # Edgeship Core
//!
//! Deployment orchestration engine for edge-hosted services: provisions
//! databases, manages secrets, deploys a compiled artifact and validates
//! the result for many domains at once.
//!
//! ## Overview
//!
//! - **Phase pipeline**: per-domain state machine from VALIDATION to
//!   COMPLETED with rollback actions recorded as phases succeed
//! - **Orchestrator**: bounded concurrency with cross-domain dependencies
//!   and strict failure isolation
//! - **Resource managers**: idempotent database and secret provisioning
//!   with retry and backoff
//! - **State & audit store**: single writer for domain state and the
//!   append-only audit log
//! - **Rollback coordinator**: compensations for one failed domain,
//!   newest first
//!
//! ## Architecture
//!
//! - [`orchestrator`]: run entry point and scheduling
//! - [`coordinator`]: dependency validation and ordering
//! - [`pipeline`]: phase state machine and phase bodies
//! - [`resources`]: database and secret lifecycle managers
//! - [`rollback`]: compensation of failed domains
//! - [`store`]: state, audit log and optional persistence
//! - [`executor`]: contract with the external deployment backend
//! - [`retry`]: the shared retry policy
//! - [`artifacts`]: per-domain configuration artifacts
//!
//! ## Examples
//!
//! ```no_run
//! use edgeship_core::{EngineConfig, Orchestrator, RunRequest};
//!
//! async fn deploy() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::from_config(EngineConfig::default())?;
//!     let summary = orchestrator
//!         .run(
//!             RunRequest::new(["a.com", "b.com"], "production")
//!                 .depends_on("b.com", "a.com")
//!                 .artifact("dist/worker.tar.gz"),
//!         )
//!         .await?;
//!     println!(
//!         "{} of {} completed",
//!         summary.completed_domains, summary.total_domains
//!     );
//!     Ok(())
//! }
//! ```
#![allow(missing_docs)]

pub mod artifacts;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod pipeline;
pub mod resources;
pub mod retry;
pub mod rollback;
pub mod store;

pub use config::EngineConfig;
pub use coordinator::{CrossDomainCoordinator, DependencyEdge, ExecutionPlan};
pub use error::{EngineError, Result};
pub use executor::{
    CommandExecutor, DeploymentExecutor, DryRunExecutor, ExecutionOutcome,
    ExecutionRequest, ExecutorOperation,
};
pub use orchestrator::{Orchestrator, RunOptions, RunRequest};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use rollback::{RollbackCoordinator, RollbackReport};
pub use store::StateStore;

pub use edgeship_model as model;
