//! Compensation for a single failed domain.
//!
//! Actions run newest first. Each compensation gets a bounded retry budget;
//! one that still fails is marked unresolved and the coordinator moves on.
//! Rollback never crosses into other domains.

use std::sync::Arc;

use edgeship_model::{
    AuditEvent, AuditEventType, DomainName, DomainState, DomainStatus,
    Environment, Phase, RollbackAction, RollbackActionState, RollbackKind,
    metadata_keys,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ExecutorConfig;
use crate::error::{EngineError, Result};
use crate::executor::{DeploymentExecutor, ExecutionRequest, ExecutorOperation};
use crate::resources::{DatabaseManager, SecretManager};
use crate::retry::RetryPolicy;
use crate::store::StateStore;

/// What happened to one domain's rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub domain: DomainName,
    pub executed: usize,
    pub unresolved: usize,
    pub final_status: DomainStatus,
}

pub struct RollbackCoordinator {
    executor: Arc<dyn DeploymentExecutor>,
    store: Arc<StateStore>,
    databases: Arc<DatabaseManager>,
    secrets: Arc<SecretManager>,
    policy: RetryPolicy,
    executor_config: Arc<ExecutorConfig>,
}

impl std::fmt::Debug for RollbackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackCoordinator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RollbackCoordinator {
    pub fn new(
        executor: Arc<dyn DeploymentExecutor>,
        store: Arc<StateStore>,
        databases: Arc<DatabaseManager>,
        secrets: Arc<SecretManager>,
        policy: RetryPolicy,
        executor_config: Arc<ExecutorConfig>,
    ) -> Self {
        Self {
            executor,
            store,
            databases,
            secrets,
            policy,
            executor_config,
        }
    }

    /// Undo the completed phases of a FAILED domain.
    pub async fn rollback(&self, state: &DomainState) -> Result<RollbackReport> {
        if state.status != DomainStatus::Failed {
            return Err(EngineError::Validation(format!(
                "cannot roll back {} while it is {}",
                state.domain, state.status
            )));
        }

        let domain = &state.domain;
        let pending: Vec<usize> = state
            .rollback_actions
            .iter()
            .enumerate()
            .filter(|(_, action)| action.is_pending())
            .map(|(index, _)| index)
            .collect();

        self.audit(
            AuditEvent::for_domain(
                self.store.orchestration_id(),
                domain.clone(),
                AuditEventType::RollbackStarted,
            )
            .with_detail("failedPhase", state.phase.as_str())
            .with_detail("actions", pending.len()),
        )
        .await;
        info!(
            target: "edgeship::rollback",
            domain = %domain,
            failed_phase = %state.phase,
            actions = pending.len(),
            "rolling back domain"
        );

        let mut executed = 0;
        let mut unresolved = 0;
        for index in pending.into_iter().rev() {
            let action = &state.rollback_actions[index];
            let outcome =
                self.compensate(action, &state.environment).await;

            match outcome {
                Ok(attempts) => {
                    executed += 1;
                    self.store
                        .update_domain(domain, |s| {
                            if let Some(a) = s.rollback_actions.get_mut(index) {
                                a.mark_executed();
                            }
                        })
                        .await?;
                    self.audit(
                        self.action_event(action, AuditEventType::RollbackExecuted)
                            .with_detail("attempts", attempts),
                    )
                    .await;
                }
                Err((attempts, detail)) => {
                    unresolved += 1;
                    warn!(
                        target: "edgeship::rollback",
                        domain = %domain,
                        phase = %action.phase,
                        kind = %action.kind,
                        attempts,
                        detail = %detail,
                        "compensation failed; marking unresolved"
                    );
                    let error = detail.clone();
                    self.store
                        .update_domain(domain, |s| {
                            if let Some(a) = s.rollback_actions.get_mut(index) {
                                a.mark_unresolved(error);
                            }
                        })
                        .await?;
                    self.audit(
                        self.action_event(action, AuditEventType::RollbackFailed)
                            .with_detail("attempts", attempts)
                            .with_detail("detail", detail),
                    )
                    .await;
                }
            }
        }

        let final_status = if unresolved == 0 {
            self.store
                .record_transition(
                    domain,
                    state.phase,
                    state.phase,
                    DomainStatus::RolledBack,
                )
                .await?;
            DomainStatus::RolledBack
        } else {
            self.store
                .update_domain(domain, |s| {
                    let unresolved: Vec<Value> = s
                        .rollback_actions
                        .iter()
                        .filter(|a| a.state == RollbackActionState::Unresolved)
                        .map(|a| {
                            serde_json::json!({
                                "phase": a.phase,
                                "kind": a.kind,
                                "payload": a.payload,
                                "error": a.last_error,
                            })
                        })
                        .collect();
                    s.metadata.insert(
                        metadata_keys::UNRESOLVED_ROLLBACK_ACTIONS.to_string(),
                        Value::Array(unresolved),
                    );
                })
                .await?;
            DomainStatus::Failed
        };

        self.audit(
            AuditEvent::for_domain(
                self.store.orchestration_id(),
                domain.clone(),
                AuditEventType::RollbackCompleted,
            )
            .with_detail("executed", executed)
            .with_detail("unresolved", unresolved)
            .with_detail("status", final_status.as_str()),
        )
        .await;
        info!(
            target: "edgeship::rollback",
            domain = %domain,
            executed,
            unresolved,
            status = %final_status,
            "rollback finished"
        );

        Ok(RollbackReport {
            domain: domain.clone(),
            executed,
            unresolved,
            final_status,
        })
    }

    /// Run one compensation. `Ok(attempts)` or `Err((attempts, detail))`.
    async fn compensate(
        &self,
        action: &RollbackAction,
        environment: &Environment,
    ) -> std::result::Result<u32, (u32, String)> {
        let domain = &action.domain;
        match action.kind {
            RollbackKind::Noop => Ok(0),
            RollbackKind::DeleteDatabase => {
                let mut request = self
                    .request(ExecutorOperation::DeleteDatabase, domain, environment);
                for (key, value) in &action.payload {
                    request = request.with_param(key.clone(), value.clone());
                }
                let attempts = self.execute(request).await?;
                self.databases.forget(domain, environment).await;
                Ok(attempts)
            }
            RollbackKind::RevokeSecret => {
                let keys: Vec<String> = action
                    .payload_value("keys")
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect();
                let mut attempts = 0;
                for key in &keys {
                    let request = self
                        .request(ExecutorOperation::DeleteSecret, domain, environment)
                        .with_param("name", key.clone());
                    let spent = self.execute(request).await.map_err(
                        |(spent, detail)| (attempts + spent, detail),
                    )?;
                    attempts += spent;
                }
                self.secrets
                    .revoke(domain, environment, &keys)
                    .await
                    .map_err(|err| (attempts, err.to_string()))?;
                Ok(attempts)
            }
            RollbackKind::RevertDeployment => {
                let mut request = self.request(
                    ExecutorOperation::RollbackDeployment,
                    domain,
                    environment,
                );
                for (key, value) in &action.payload {
                    request = request.with_param(key.clone(), value.clone());
                }
                self.execute(request).await
            }
        }
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> std::result::Result<u32, (u32, String)> {
        // Compensations always finish, even when the run was cancelled.
        let cancel = CancellationToken::new();
        let domain = request.domain.clone();
        let operation = request.operation;
        let result = self
            .policy
            .run(self.executor.as_ref(), request, &cancel, |notice| {
                let domain = domain.clone();
                async move {
                    warn!(
                        target: "edgeship::rollback",
                        domain = %domain,
                        operation = %operation,
                        attempt = notice.attempt,
                        detail = %notice.detail,
                        "compensation attempt failed; retrying"
                    );
                }
            })
            .await;

        if result.succeeded() {
            Ok(result.attempts)
        } else {
            Err((result.attempts, result.outcome.detail().to_string()))
        }
    }

    fn request(
        &self,
        operation: ExecutorOperation,
        domain: &DomainName,
        environment: &Environment,
    ) -> ExecutionRequest {
        ExecutionRequest::new(
            operation,
            domain.clone(),
            environment.clone(),
            self.executor_config.timeout_for(operation),
        )
    }

    fn action_event(
        &self,
        action: &RollbackAction,
        event_type: AuditEventType,
    ) -> AuditEvent {
        AuditEvent::for_domain(
            self.store.orchestration_id(),
            action.domain.clone(),
            event_type,
        )
        .with_detail("phase", action.phase.as_str())
        .with_detail("kind", action.kind.as_str())
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(err) = self.store.append_audit(event).await {
            warn!(
                target: "edgeship::rollback",
                error = %err,
                "could not record rollback audit event"
            );
        }
    }
}

/// Phases whose actions a domain that failed at `failed` may hold.
pub fn rollback_scope(failed: Phase) -> impl Iterator<Item = Phase> {
    Phase::ALL
        .into_iter()
        .filter(move |phase| *phase < failed && phase.has_side_effects())
}
