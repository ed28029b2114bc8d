//! Resource lifecycle managers built on the deployment executor.
//!
//! Both managers expose an idempotent `ensure` and route every executor
//! call through [`ResourceContext::call`], which applies the shared retry
//! policy and records `RESOURCE_RETRY` audit events.

pub mod database;
pub mod secrets;
pub mod vault;

pub use database::{
    DatabaseManager, DatabaseOptions, DatabaseOutcome, DatabaseRecord,
    MigrationStatus,
};
pub use secrets::{
    DistributionFormat, SecretBundle, SecretKeySpec, SecretManager,
    SecretOptions,
};
pub use vault::{
    FileSecretVault, InMemorySecretVault, SecretValue, SecretVault,
    StoredBundle,
};

use std::sync::Arc;

use edgeship_model::{
    AuditEvent, AuditEventType, DomainName, Environment, Phase,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::artifacts::ConfigWriter;
use crate::config::ExecutorConfig;
use crate::executor::{DeploymentExecutor, ExecutionRequest, ExecutorOperation};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::store::StateStore;

/// Everything a resource manager needs for one domain pipeline.
#[derive(Clone)]
pub struct ResourceContext {
    pub executor: Arc<dyn DeploymentExecutor>,
    pub store: Arc<StateStore>,
    pub writer: Arc<dyn ConfigWriter>,
    pub retry: RetryPolicy,
    pub executor_config: Arc<ExecutorConfig>,
    pub cancel: CancellationToken,
    pub dry_run: bool,
    /// Reuse conflicts fail the phase instead of warning.
    pub automated: bool,
}

impl std::fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceContext")
            .field("retry", &self.retry)
            .field("dry_run", &self.dry_run)
            .field("automated", &self.automated)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ResourceContext {
    /// Request with the configured timeout for `operation`.
    pub fn request(
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

    /// Run a request under the shared retry policy.
    pub async fn call(
        &self,
        phase: Phase,
        request: ExecutionRequest,
    ) -> RetryOutcome {
        self.call_with(self.retry, phase, request).await
    }

    pub async fn call_with(
        &self,
        policy: RetryPolicy,
        phase: Phase,
        request: ExecutionRequest,
    ) -> RetryOutcome {
        let store = &self.store;
        let domain = request.domain.clone();
        let operation = request.operation;

        policy
            .run(self.executor.as_ref(), request, &self.cancel, |notice| {
                let domain = domain.clone();
                async move {
                    warn!(
                        target: "edgeship::resources",
                        domain = %domain,
                        phase = %phase,
                        operation = %operation,
                        attempt = notice.attempt,
                        max_attempts = notice.max_attempts,
                        delay_ms = notice.delay.as_millis() as u64,
                        detail = %notice.detail,
                        "retryable executor failure; backing off"
                    );
                    let event = AuditEvent::for_domain(
                        store.orchestration_id(),
                        domain,
                        AuditEventType::ResourceRetry,
                    )
                    .with_detail("phase", phase.as_str())
                    .with_detail("operation", operation.as_str())
                    .with_detail("attempt", notice.attempt)
                    .with_detail("maxAttempts", notice.max_attempts)
                    .with_detail("delayMs", notice.delay.as_millis() as u64)
                    .with_detail("detail", notice.detail);
                    if let Err(err) = store.append_audit(event).await {
                        warn!(
                            target: "edgeship::resources",
                            error = %err,
                            "could not record retry audit event"
                        );
                    }
                }
            })
            .await
    }

    /// Best-effort audit append; store errors are logged, not raised.
    pub async fn audit(&self, event: AuditEvent) {
        if let Err(err) = self.store.append_audit(event).await {
            warn!(
                target: "edgeship::resources",
                error = %err,
                "could not record audit event"
            );
        }
    }
}
