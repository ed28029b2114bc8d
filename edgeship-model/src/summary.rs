use serde::{Deserialize, Serialize};

use crate::error::DeploymentError;
use crate::ids::{DeploymentId, OrchestrationId};
use crate::names::{DomainName, Environment};
use crate::phase::{DomainStatus, Phase};
use crate::rollback::RollbackAction;
use crate::state::DomainState;

/// Aggregate view of a run, computed from live domain snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub orchestration_id: OrchestrationId,
    pub environment: Environment,
    pub total_domains: usize,
    pub completed_domains: usize,
    /// Domains whose deployment failed, whether or not they were rolled back.
    pub failed_domains: usize,
    pub rolled_back_domains: usize,
    pub in_progress_domains: usize,
    pub pending_domains: usize,
    pub per_domain: Vec<DomainSummary>,
}

impl PortfolioSummary {
    pub fn from_states<'a>(
        orchestration_id: OrchestrationId,
        environment: Environment,
        states: impl IntoIterator<Item = &'a DomainState>,
    ) -> Self {
        let per_domain: Vec<DomainSummary> =
            states.into_iter().map(DomainSummary::from).collect();
        let count = |status: DomainStatus| {
            per_domain.iter().filter(|d| d.status == status).count()
        };
        let rolled_back = count(DomainStatus::RolledBack);

        Self {
            orchestration_id,
            environment,
            total_domains: per_domain.len(),
            completed_domains: count(DomainStatus::Completed),
            failed_domains: count(DomainStatus::Failed) + rolled_back,
            rolled_back_domains: rolled_back,
            in_progress_domains: count(DomainStatus::InProgress),
            pending_domains: count(DomainStatus::Pending),
            per_domain,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.per_domain.iter().all(|d| d.status.is_terminal())
    }

    pub fn domain(&self, domain: &str) -> Option<&DomainSummary> {
        self.per_domain.iter().find(|d| d.domain.as_str() == domain)
    }
}

/// One domain's line in the portfolio summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSummary {
    pub domain: DomainName,
    pub deployment_id: DeploymentId,
    pub status: DomainStatus,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DeploymentError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback_actions: Vec<RollbackAction>,
}

impl DomainSummary {
    /// COMPLETED with at least one recorded warning.
    pub fn completed_with_warning(&self) -> bool {
        self.status == DomainStatus::Completed && !self.warnings.is_empty()
    }
}

impl From<&DomainState> for DomainSummary {
    fn from(state: &DomainState) -> Self {
        Self {
            domain: state.domain.clone(),
            deployment_id: state.deployment_id,
            status: state.status,
            phase: state.phase,
            error: state.error.clone(),
            warnings: state.warnings.clone(),
            rollback_actions: state.rollback_actions.clone(),
        }
    }
}
