use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::OrchestrationId;
use crate::names::DomainName;

pub type AuditDetails = Map<String, Value>;

/// Kinds of events written to the append-only audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    RunStarted,
    RunCancelled,
    RunCompleted,
    DomainRegistered,
    DomainScheduled,
    DomainSkipped,
    StatusChanged,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    PhaseWarning,
    ResourceCreated,
    ResourceReused,
    ResourceRetry,
    ResourceWarning,
    RollbackStarted,
    RollbackExecuted,
    RollbackFailed,
    RollbackCompleted,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::RunStarted => "RUN_STARTED",
            AuditEventType::RunCancelled => "RUN_CANCELLED",
            AuditEventType::RunCompleted => "RUN_COMPLETED",
            AuditEventType::DomainRegistered => "DOMAIN_REGISTERED",
            AuditEventType::DomainScheduled => "DOMAIN_SCHEDULED",
            AuditEventType::DomainSkipped => "DOMAIN_SKIPPED",
            AuditEventType::StatusChanged => "STATUS_CHANGED",
            AuditEventType::PhaseStarted => "PHASE_STARTED",
            AuditEventType::PhaseCompleted => "PHASE_COMPLETED",
            AuditEventType::PhaseFailed => "PHASE_FAILED",
            AuditEventType::PhaseWarning => "PHASE_WARNING",
            AuditEventType::ResourceCreated => "RESOURCE_CREATED",
            AuditEventType::ResourceReused => "RESOURCE_REUSED",
            AuditEventType::ResourceRetry => "RESOURCE_RETRY",
            AuditEventType::ResourceWarning => "RESOURCE_WARNING",
            AuditEventType::RollbackStarted => "ROLLBACK_STARTED",
            AuditEventType::RollbackExecuted => "ROLLBACK_EXECUTED",
            AuditEventType::RollbackFailed => "ROLLBACK_FAILED",
            AuditEventType::RollbackCompleted => "ROLLBACK_COMPLETED",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a state transition or significant action.
///
/// `sequence` and `timestamp` are assigned by the store at append time;
/// values set by callers are overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub orchestration_id: OrchestrationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainName>,
    pub event_type: AuditEventType,
    #[serde(default)]
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Portfolio-level event (no domain).
    pub fn portfolio(
        orchestration_id: OrchestrationId,
        event_type: AuditEventType,
    ) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            orchestration_id,
            domain: None,
            event_type,
            details: AuditDetails::new(),
        }
    }

    pub fn for_domain(
        orchestration_id: OrchestrationId,
        domain: DomainName,
        event_type: AuditEventType,
    ) -> Self {
        Self {
            domain: Some(domain),
            ..Self::portfolio(orchestration_id, event_type)
        }
    }

    pub fn with_detail(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}
