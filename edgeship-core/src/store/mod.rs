//! State & audit store: single writer for every domain state and audit
//! event of one run.
//!
//! All mutation goes through one `tokio::sync::Mutex`, so summaries are
//! always computed from a consistent snapshot. Audit events are assigned a
//! sequence number and a timestamp clamped to never move backwards, then
//! fanned out to live subscribers and (optionally) persisted.

mod persistence;

pub use persistence::{FilePersistence, PortfolioSnapshot, StatePersistence};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use edgeship_model::{
    AuditEvent, AuditEventType, DeploymentError, DeploymentId, DomainName,
    DomainState, DomainStatus, Environment, OrchestrationId, Phase,
    PortfolioSummary,
};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub struct StateStore {
    orchestration_id: OrchestrationId,
    environment: Environment,
    inner: Mutex<StoreInner>,
    events: broadcast::Sender<AuditEvent>,
    persistence: Option<Arc<dyn StatePersistence>>,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("StateStore");
        debug
            .field("orchestration_id", &self.orchestration_id)
            .field("environment", &self.environment)
            .field("persistent", &self.persistence.is_some());

        match self.inner.try_lock() {
            Ok(inner) => {
                debug
                    .field("domains", &inner.order.len())
                    .field("audit_events", &inner.audit.len())
                    .field("sealed", &inner.sealed)
                    .field("peak_in_progress", &inner.peak_in_progress);
            }
            Err(_) => {
                debug.field("inner", &"<locked>");
            }
        }

        debug.finish()
    }
}

#[derive(Default)]
struct StoreInner {
    order: Vec<DomainName>,
    domains: HashMap<DomainName, DomainState>,
    audit: Vec<AuditEvent>,
    next_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
    sealed: bool,
    peak_in_progress: usize,
}

impl StoreInner {
    fn domain_mut(&mut self, domain: &DomainName) -> Result<&mut DomainState> {
        self.domains
            .get_mut(domain)
            .ok_or_else(|| EngineError::UnknownDomain(domain.clone()))
    }

    fn refresh_peak(&mut self) {
        let in_progress = self
            .domains
            .values()
            .filter(|state| state.status == DomainStatus::InProgress)
            .count();
        self.peak_in_progress = self.peak_in_progress.max(in_progress);
    }

    fn stamp(&mut self, event: &mut AuditEvent) {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        self.next_sequence += 1;
        event.sequence = self.next_sequence;
        event.timestamp = timestamp;
    }

    fn ordered_states(&self) -> impl Iterator<Item = &DomainState> {
        self.order.iter().filter_map(|name| self.domains.get(name))
    }
}

impl StateStore {
    pub fn new(orchestration_id: OrchestrationId, environment: Environment) -> Self {
        Self::with_capacity(orchestration_id, environment, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(
        orchestration_id: OrchestrationId,
        environment: Environment,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            orchestration_id,
            environment,
            inner: Mutex::new(StoreInner::default()),
            events,
            persistence: None,
        }
    }

    /// Publish audit events on an existing channel instead of a private
    /// one, so observers can subscribe before the run exists.
    pub fn with_event_sender(
        mut self,
        events: broadcast::Sender<AuditEvent>,
    ) -> Self {
        self.events = events;
        self
    }

    /// Back the store with durable storage. In-memory state stays
    /// authoritative; persistence failures are only logged.
    pub fn with_persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn orchestration_id(&self) -> OrchestrationId {
        self.orchestration_id
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Live feed of audit events as they are appended.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.events.subscribe()
    }

    /// Add a domain in PENDING state.
    pub async fn register_domain(&self, domain: DomainName) -> Result<DeploymentId> {
        let mut inner = self.inner.lock().await;
        self.ensure_open(&inner)?;
        if inner.domains.contains_key(&domain) {
            return Err(EngineError::Validation(format!(
                "domain {domain} is already registered in this run"
            )));
        }

        let state = DomainState::new(domain.clone(), self.environment.clone());
        let deployment_id = state.deployment_id;
        inner.order.push(domain.clone());
        inner.domains.insert(domain.clone(), state);

        let event = AuditEvent::for_domain(
            self.orchestration_id,
            domain,
            AuditEventType::DomainRegistered,
        )
        .with_detail("deploymentId", deployment_id.to_string());
        self.push_event(&mut inner, event).await;
        Ok(deployment_id)
    }

    /// Move a domain from `from` to `to` and set its status.
    ///
    /// `from` must match the stored phase, which keeps concurrent writers
    /// from silently overwriting each other's progress.
    pub async fn record_transition(
        &self,
        domain: &DomainName,
        from: Phase,
        to: Phase,
        status: DomainStatus,
    ) -> Result<DomainState> {
        let mut inner = self.inner.lock().await;
        self.ensure_open(&inner)?;

        let state = inner.domain_mut(domain)?;
        if state.phase != from {
            return Err(EngineError::Internal(format!(
                "stale transition for {domain}: expected phase {from}, \
                 found {}",
                state.phase
            )));
        }
        let previous_status = state.status;
        state.advance_phase(to)?;
        state.transition_status(status)?;
        let snapshot = state.clone();
        inner.refresh_peak();

        if previous_status != status {
            debug!(
                target: "edgeship::store",
                domain = %domain,
                from = %previous_status,
                to = %status,
                phase = %to,
                "domain status changed"
            );
            let event = AuditEvent::for_domain(
                self.orchestration_id,
                domain.clone(),
                AuditEventType::StatusChanged,
            )
            .with_detail("from", previous_status.as_str())
            .with_detail("to", status.as_str())
            .with_detail("phase", to.as_str());
            self.push_event(&mut inner, event).await;
            self.persist_snapshot(&inner).await;
        }

        Ok(snapshot)
    }

    /// Mark a domain FAILED with a structured error.
    pub async fn fail_domain(
        &self,
        domain: &DomainName,
        error: DeploymentError,
    ) -> Result<DomainState> {
        let mut inner = self.inner.lock().await;
        self.ensure_open(&inner)?;

        let state = inner.domain_mut(domain)?;
        let previous_status = state.status;
        state.transition_status(DomainStatus::Failed)?;
        let phase = state.phase;
        state.error = Some(error.clone());
        let snapshot = state.clone();
        inner.refresh_peak();

        let event = AuditEvent::for_domain(
            self.orchestration_id,
            domain.clone(),
            AuditEventType::StatusChanged,
        )
        .with_detail("from", previous_status.as_str())
        .with_detail("to", DomainStatus::Failed.as_str())
        .with_detail("phase", phase.as_str())
        .with_detail("errorKind", error.kind.as_str())
        .with_detail("error", error.message.clone());
        self.push_event(&mut inner, event).await;
        self.persist_snapshot(&inner).await;
        Ok(snapshot)
    }

    /// Append one audit event; returns it with sequence and timestamp set.
    pub async fn append_audit(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        let mut inner = self.inner.lock().await;
        self.ensure_open(&inner)?;
        if let Some(domain) = &event.domain
            && !inner.domains.contains_key(domain)
        {
            return Err(EngineError::UnknownDomain(domain.clone()));
        }
        event.orchestration_id = self.orchestration_id;
        Ok(self.push_event(&mut inner, event).await)
    }

    /// Mutate one domain's state under the store lock.
    ///
    /// Status changes made here are validated against the status graph and
    /// phases may not move backwards.
    pub async fn update_domain<F, R>(&self, domain: &DomainName, update: F) -> Result<R>
    where
        F: FnOnce(&mut DomainState) -> R,
    {
        let mut inner = self.inner.lock().await;
        self.ensure_open(&inner)?;

        let state = inner.domain_mut(domain)?;
        let before_status = state.status;
        let before_phase = state.phase;
        let mut draft = state.clone();
        let result = update(&mut draft);

        if draft.phase < before_phase {
            return Err(EngineError::Model(
                edgeship_model::ModelError::PhaseRegression {
                    from: before_phase,
                    to: draft.phase,
                },
            ));
        }
        if draft.status != before_status
            && !before_status.can_transition_to(draft.status)
        {
            return Err(EngineError::Model(
                edgeship_model::ModelError::InvalidStatusTransition {
                    from: before_status,
                    to: draft.status,
                },
            ));
        }

        *state = draft;
        inner.refresh_peak();
        self.persist_snapshot(&inner).await;
        Ok(result)
    }

    pub async fn domain_state(&self, domain: &DomainName) -> Option<DomainState> {
        self.inner.lock().await.domains.get(domain).cloned()
    }

    pub async fn domain_states(&self) -> Vec<DomainState> {
        self.inner.lock().await.ordered_states().cloned().collect()
    }

    /// Aggregate counts computed from the current domain snapshots.
    pub async fn portfolio_summary(&self) -> PortfolioSummary {
        let inner = self.inner.lock().await;
        PortfolioSummary::from_states(
            self.orchestration_id,
            self.environment.clone(),
            inner.ordered_states(),
        )
    }

    /// Ordered copy of the audit log.
    pub async fn export_audit_log(&self) -> Vec<AuditEvent> {
        self.inner.lock().await.audit.clone()
    }

    /// Highest number of domains observed IN_PROGRESS at the same time.
    pub async fn peak_in_progress(&self) -> usize {
        self.inner.lock().await.peak_in_progress
    }

    pub async fn is_sealed(&self) -> bool {
        self.inner.lock().await.sealed
    }

    /// Freeze the portfolio. Later mutations fail with
    /// [`EngineError::PortfolioSealed`].
    pub async fn seal(&self) -> PortfolioSummary {
        let mut inner = self.inner.lock().await;
        if !inner.sealed {
            inner.sealed = true;
            self.persist_snapshot(&inner).await;
            debug!(
                target: "edgeship::store",
                orchestration_id = %self.orchestration_id,
                events = inner.audit.len(),
                "portfolio sealed"
            );
        }
        PortfolioSummary::from_states(
            self.orchestration_id,
            self.environment.clone(),
            inner.ordered_states(),
        )
    }

    fn ensure_open(&self, inner: &StoreInner) -> Result<()> {
        if inner.sealed {
            Err(EngineError::PortfolioSealed(self.orchestration_id))
        } else {
            Ok(())
        }
    }

    async fn push_event(
        &self,
        inner: &mut StoreInner,
        mut event: AuditEvent,
    ) -> AuditEvent {
        inner.stamp(&mut event);
        inner.audit.push(event.clone());

        if let Some(persistence) = &self.persistence
            && let Err(err) = persistence.append_audit(&event).await
        {
            warn!(
                target: "edgeship::store",
                orchestration_id = %self.orchestration_id,
                sequence = event.sequence,
                error = %err,
                "failed to persist audit event; continuing in memory"
            );
        }

        // No subscribers is fine.
        let _ = self.events.send(event.clone());
        event
    }

    async fn persist_snapshot(&self, inner: &StoreInner) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let snapshot = PortfolioSnapshot {
            orchestration_id: self.orchestration_id,
            environment: self.environment.clone(),
            sealed: inner.sealed,
            captured_at: Utc::now(),
            domains: inner.ordered_states().cloned().collect(),
        };
        if let Err(err) = persistence.save_snapshot(&snapshot).await {
            warn!(
                target: "edgeship::store",
                orchestration_id = %self.orchestration_id,
                error = %err,
                "failed to persist portfolio snapshot; continuing in memory"
            );
        }
    }
}
