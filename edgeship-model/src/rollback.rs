use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::names::DomainName;
use crate::phase::Phase;

/// Which compensating operation undoes a phase's effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackKind {
    DeleteDatabase,
    RevokeSecret,
    RevertDeployment,
    /// Recorded for completeness; nothing to undo.
    Noop,
}

impl RollbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RollbackKind::DeleteDatabase => "DELETE_DATABASE",
            RollbackKind::RevokeSecret => "REVOKE_SECRET",
            RollbackKind::RevertDeployment => "REVERT_DEPLOYMENT",
            RollbackKind::Noop => "NOOP",
        }
    }
}

impl fmt::Display for RollbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a recorded action through the rollback coordinator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackActionState {
    #[default]
    Pending,
    Executed,
    /// Compensation gave up after its retry budget; needs an operator.
    Unresolved,
}

/// Compensating operation for one completed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackAction {
    pub phase: Phase,
    pub domain: DomainName,
    pub kind: RollbackKind,
    /// Resource identifiers the compensation needs.
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    #[serde(default)]
    pub state: RollbackActionState,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RollbackAction {
    pub fn new(phase: Phase, domain: DomainName, kind: RollbackKind) -> Self {
        Self {
            phase,
            domain,
            kind,
            payload: BTreeMap::new(),
            state: RollbackActionState::Pending,
            recorded_at: Utc::now(),
            resolved_at: None,
            last_error: None,
        }
    }

    pub fn with_payload(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn payload_value(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    pub fn is_pending(&self) -> bool {
        self.state == RollbackActionState::Pending
    }

    pub fn mark_executed(&mut self) {
        self.state = RollbackActionState::Executed;
        self.resolved_at = Some(Utc::now());
        self.last_error = None;
    }

    pub fn mark_unresolved(&mut self, error: impl Into<String>) {
        self.state = RollbackActionState::Unresolved;
        self.resolved_at = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}
