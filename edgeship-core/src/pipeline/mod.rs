//! Per-domain deployment pipeline.
//!
//! Phases run strictly in order through the transition table in
//! [`machine`]. A failed phase stops the pipeline, records the error and
//! hands the domain to the [`RollbackCoordinator`].

pub mod machine;
pub mod phases;

pub use machine::{PipelineEvent, transition};
pub use phases::{
    DatabaseStep, DeploymentStep, InitializationStep, PhaseContext,
    PhaseOutputs, PhaseResult, PhaseStep, PhaseSuccess, PipelineSettings,
    PostValidationStep, SecretsStep, ValidationStep,
};

use std::sync::Arc;

use edgeship_model::{
    AuditEvent, AuditEventType, DeploymentError, DomainName, DomainState,
    Phase,
};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::resources::{DatabaseManager, ResourceContext, SecretManager};
use crate::rollback::RollbackCoordinator;

pub struct DeploymentPipeline {
    steps: Vec<Box<dyn PhaseStep>>,
    resources: ResourceContext,
    settings: PipelineSettings,
    rollback: Arc<RollbackCoordinator>,
}

impl std::fmt::Debug for DeploymentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentPipeline")
            .field(
                "steps",
                &self.steps.iter().map(|s| s.phase()).collect::<Vec<_>>(),
            )
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DeploymentPipeline {
    /// Pipeline with the standard six phases.
    pub fn new(
        resources: ResourceContext,
        settings: PipelineSettings,
        databases: Arc<DatabaseManager>,
        secrets: Arc<SecretManager>,
        rollback: Arc<RollbackCoordinator>,
    ) -> Self {
        let steps: Vec<Box<dyn PhaseStep>> = vec![
            Box::new(ValidationStep),
            Box::new(InitializationStep::new(Arc::clone(&databases))),
            Box::new(DatabaseStep::new(databases)),
            Box::new(SecretsStep::new(secrets)),
            Box::new(DeploymentStep),
            Box::new(PostValidationStep),
        ];
        Self::with_steps(resources, settings, steps, rollback)
    }

    /// Pipeline with custom steps; they must cover the phases in order.
    pub fn with_steps(
        resources: ResourceContext,
        settings: PipelineSettings,
        steps: Vec<Box<dyn PhaseStep>>,
        rollback: Arc<RollbackCoordinator>,
    ) -> Self {
        Self {
            steps,
            resources,
            settings,
            rollback,
        }
    }

    pub fn resources(&self) -> &ResourceContext {
        &self.resources
    }

    /// Mark a domain FAILED without entering its pipeline.
    pub async fn abort(
        &self,
        domain: &DomainName,
        reason: DeploymentError,
    ) -> Result<DomainState> {
        let store = &self.resources.store;
        let state = store.domain_state(domain).await.ok_or_else(|| {
            EngineError::UnknownDomain(domain.clone())
        })?;
        if transition((state.phase, state.status), PipelineEvent::Abort)
            .is_none()
        {
            return Err(EngineError::Internal(format!(
                "{domain} already entered its pipeline"
            )));
        }

        info!(
            target: "edgeship::pipeline",
            domain = %domain,
            reason = %reason,
            "domain skipped"
        );
        let state = store.fail_domain(domain, reason.clone()).await?;
        store
            .append_audit(
                AuditEvent::for_domain(
                    store.orchestration_id(),
                    domain.clone(),
                    AuditEventType::DomainSkipped,
                )
                .with_detail("errorKind", reason.kind.as_str())
                .with_detail("reason", reason.message)
                .with_detail(
                    "detail",
                    reason.detail.unwrap_or_default(),
                ),
            )
            .await?;
        Ok(state)
    }

    /// Drive one domain to a terminal status.
    pub async fn run(&self, domain: &DomainName) -> Result<DomainState> {
        let store = &self.resources.store;
        let environment = store.environment().clone();
        let state = store.domain_state(domain).await.ok_or_else(|| {
            EngineError::UnknownDomain(domain.clone())
        })?;

        if self.resources.cancel.is_cancelled() {
            return self
                .abort(
                    domain,
                    DeploymentError::cancelled(
                        "run cancelled before the domain started",
                    ),
                )
                .await;
        }

        let (mut phase, mut status) =
            transition((state.phase, state.status), PipelineEvent::Start)
                .ok_or_else(|| {
                    EngineError::Internal(format!(
                        "{domain} cannot start from {}/{}",
                        state.phase, state.status
                    ))
                })?;
        store
            .record_transition(domain, state.phase, phase, status)
            .await?;
        info!(
            target: "edgeship::pipeline",
            domain = %domain,
            environment = %environment,
            "pipeline started"
        );

        let ctx = PhaseContext {
            domain,
            environment: &environment,
            resources: &self.resources,
            settings: &self.settings,
        };
        let mut outputs = PhaseOutputs::default();

        for step in &self.steps {
            if step.phase() != phase {
                return Err(EngineError::Internal(format!(
                    "pipeline step for {} ran while {domain} is at {phase}",
                    step.phase()
                )));
            }

            // Once the artifact is live the domain finishes; the health
            // check handles cancellation itself.
            if self.resources.cancel.is_cancelled()
                && phase != Phase::PostValidation
            {
                let error = DeploymentError::cancelled(
                    "run cancelled before the phase started",
                )
                .with_phase(phase);
                return self.fail(domain, phase, error).await;
            }

            self.audit(domain, AuditEventType::PhaseStarted, phase).await?;
            debug!(
                target: "edgeship::pipeline",
                domain = %domain,
                phase = %phase,
                "phase started"
            );

            match step.execute(&ctx, &mut outputs).await {
                Ok(success) => {
                    let next = transition(
                        (phase, status),
                        PipelineEvent::PhaseSucceeded,
                    )
                    .ok_or_else(|| {
                        EngineError::Internal(format!(
                            "no successor for {phase}"
                        ))
                    })?;
                    self.apply_success(domain, phase, success).await?;
                    store
                        .record_transition(domain, phase, next.0, next.1)
                        .await?;
                    self.audit(domain, AuditEventType::PhaseCompleted, phase)
                        .await?;
                    debug!(
                        target: "edgeship::pipeline",
                        domain = %domain,
                        phase = %phase,
                        "phase completed"
                    );
                    (phase, status) = next;
                }
                Err(err) => {
                    let err = if err.phase.is_some() {
                        err
                    } else {
                        err.with_phase(phase)
                    };
                    return self.fail(domain, phase, err).await;
                }
            }
        }

        let state = store.domain_state(domain).await.ok_or_else(|| {
            EngineError::UnknownDomain(domain.clone())
        })?;
        info!(
            target: "edgeship::pipeline",
            domain = %domain,
            status = %state.status,
            warnings = state.warnings.len(),
            "pipeline finished"
        );
        Ok(state)
    }

    async fn apply_success(
        &self,
        domain: &DomainName,
        phase: Phase,
        success: PhaseSuccess,
    ) -> Result<()> {
        let store = &self.resources.store;
        let PhaseSuccess {
            rollback_actions,
            metadata,
            warnings,
        } = success;

        store
            .update_domain(domain, |state| {
                if phase.has_side_effects() {
                    state.rollback_actions.extend(rollback_actions);
                }
                state.metadata.extend(metadata);
                for warning in &warnings {
                    state.push_warning(warning.clone());
                }
            })
            .await?;

        for warning in warnings {
            warn!(
                target: "edgeship::pipeline",
                domain = %domain,
                phase = %phase,
                warning = %warning,
                "phase completed with warning"
            );
            store
                .append_audit(
                    AuditEvent::for_domain(
                        store.orchestration_id(),
                        domain.clone(),
                        AuditEventType::PhaseWarning,
                    )
                    .with_detail("phase", phase.as_str())
                    .with_detail("warning", warning),
                )
                .await?;
        }
        Ok(())
    }

    async fn fail(
        &self,
        domain: &DomainName,
        phase: Phase,
        err: DeploymentError,
    ) -> Result<DomainState> {
        let store = &self.resources.store;
        error!(
            target: "edgeship::pipeline",
            domain = %domain,
            phase = %phase,
            kind = %err.kind,
            error = %err.message,
            detail = ?err.detail,
            "phase failed"
        );

        let state = store.fail_domain(domain, err.clone()).await?;
        store
            .append_audit(
                AuditEvent::for_domain(
                    store.orchestration_id(),
                    domain.clone(),
                    AuditEventType::PhaseFailed,
                )
                .with_detail("phase", phase.as_str())
                .with_detail("errorKind", err.kind.as_str())
                .with_detail("error", err.message.clone())
                .with_detail("attempts", err.attempts)
                .with_detail("detail", err.detail.clone().unwrap_or_default()),
            )
            .await?;

        if state.pending_rollback_actions().next().is_none() {
            // Nothing was changed outside the process; stays FAILED.
            return Ok(state);
        }
        self.rollback.rollback(&state).await?;
        store
            .domain_state(domain)
            .await
            .ok_or_else(|| EngineError::UnknownDomain(domain.clone()))
    }

    async fn audit(
        &self,
        domain: &DomainName,
        event_type: AuditEventType,
        phase: Phase,
    ) -> Result<()> {
        let store = &self.resources.store;
        store
            .append_audit(
                AuditEvent::for_domain(
                    store.orchestration_id(),
                    domain.clone(),
                    event_type,
                )
                .with_detail("phase", phase.as_str()),
            )
            .await?;
        Ok(())
    }
}
