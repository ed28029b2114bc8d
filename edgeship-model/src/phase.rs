use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered stages of a single domain's deployment pipeline.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Validation,
    Initialization,
    Database,
    Secrets,
    Deployment,
    PostValidation,
    Completed,
}

impl Phase {
    /// Every phase in execution order, ending with the terminal marker.
    pub const ALL: [Phase; 7] = [
        Phase::Validation,
        Phase::Initialization,
        Phase::Database,
        Phase::Secrets,
        Phase::Deployment,
        Phase::PostValidation,
        Phase::Completed,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Successor in the fixed pipeline order; `None` once completed.
    pub fn next(self) -> Option<Phase> {
        Self::ALL.get(self.ordinal() + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed)
    }

    /// Phases that may leave external state behind and therefore record a
    /// rollback action once they succeed.
    pub fn has_side_effects(self) -> bool {
        matches!(self, Phase::Database | Phase::Secrets | Phase::Deployment)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Validation => "VALIDATION",
            Phase::Initialization => "INITIALIZATION",
            Phase::Database => "DATABASE",
            Phase::Secrets => "SECRETS",
            Phase::Deployment => "DEPLOYMENT",
            Phase::PostValidation => "POST_VALIDATION",
            Phase::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a domain within one run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl DomainStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DomainStatus::Completed
                | DomainStatus::Failed
                | DomainStatus::RolledBack
        )
    }

    /// Allowed status edges. `Pending -> Failed` covers domains that never
    /// enter their pipeline (upstream failure, cancellation).
    pub fn can_transition_to(self, next: DomainStatus) -> bool {
        use DomainStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, RolledBack)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DomainStatus::Pending => "PENDING",
            DomainStatus::InProgress => "IN_PROGRESS",
            DomainStatus::Completed => "COMPLETED",
            DomainStatus::Failed => "FAILED",
            DomainStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
