use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeploymentError, ModelError, Result};
use crate::ids::DeploymentId;
use crate::names::{DomainName, Environment};
use crate::phase::{DomainStatus, Phase};
use crate::rollback::RollbackAction;

/// Well-known keys written into [`DomainState::metadata`].
pub mod metadata_keys {
    pub const DATABASE_NAME: &str = "databaseName";
    pub const DATABASE_ID: &str = "databaseId";
    pub const DATABASE_CREATED: &str = "databaseCreated";
    pub const MIGRATIONS: &str = "migrations";
    pub const SECRET_BUNDLE_VERSION: &str = "secretBundleVersion";
    pub const SECRETS_GENERATED: &str = "secretsGenerated";
    pub const SECRETS_REUSED: &str = "secretsReused";
    pub const SECRET_DISTRIBUTIONS: &str = "secretDistributions";
    pub const ARTIFACT: &str = "artifact";
    pub const ARTIFACT_URL: &str = "artifactUrl";
    pub const HEALTH: &str = "health";
    pub const UNRESOLVED_ROLLBACK_ACTIONS: &str = "unresolvedRollbackActions";
}

/// Per-domain state for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainState {
    pub deployment_id: DeploymentId,
    pub domain: DomainName,
    pub environment: Environment,
    pub phase: Phase,
    pub status: DomainStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DeploymentError>,
    #[serde(default)]
    pub rollback_actions: Vec<RollbackAction>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Non-fatal problems on an otherwise healthy domain.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl DomainState {
    pub fn new(domain: DomainName, environment: Environment) -> Self {
        Self {
            deployment_id: DeploymentId::new(),
            domain,
            environment,
            phase: Phase::Validation,
            status: DomainStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            rollback_actions: Vec::new(),
            metadata: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the phase forward. Staying put is allowed; moving back is not.
    pub fn advance_phase(&mut self, next: Phase) -> Result<()> {
        if next < self.phase {
            return Err(ModelError::PhaseRegression {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    pub fn transition_status(&mut self, next: DomainStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == DomainStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn pending_rollback_actions(
        &self,
    ) -> impl Iterator<Item = &RollbackAction> {
        self.rollback_actions.iter().filter(|action| action.is_pending())
    }
}
