use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use super::{
    DeploymentExecutor, ExecutionOutcome, ExecutionRequest, ExecutorOperation,
};

/// Wraps an executor so that nothing mutating ever reaches it.
///
/// Mutating operations return a synthetic success. Existence checks pass
/// through; health checks are answered locally since nothing was deployed.
pub struct DryRunExecutor {
    inner: Arc<dyn DeploymentExecutor>,
    suppressed: AtomicU64,
}

impl fmt::Debug for DryRunExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryRunExecutor")
            .field("suppressed", &self.suppressed.load(Ordering::Relaxed))
            .finish()
    }
}

impl DryRunExecutor {
    pub fn new(inner: Arc<dyn DeploymentExecutor>) -> Self {
        Self {
            inner,
            suppressed: AtomicU64::new(0),
        }
    }

    /// Number of calls answered synthetically so far.
    pub fn suppressed_calls(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    fn synthetic(request: &ExecutionRequest) -> ExecutionOutcome {
        let output = match request.operation {
            ExecutorOperation::CreateDatabase => format!(
                "dry-run-{}",
                request.param("name").unwrap_or(request.domain.as_str())
            ),
            ExecutorOperation::DeployArtifact => {
                format!("https://{}", request.domain)
            }
            ExecutorOperation::HealthCheck => "dry-run healthy".to_string(),
            _ => "dry-run".to_string(),
        };
        ExecutionOutcome::success(output)
    }
}

#[async_trait]
impl DeploymentExecutor for DryRunExecutor {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        if request.operation.is_dry_run_safe() {
            return self.inner.execute(request).await;
        }

        self.suppressed.fetch_add(1, Ordering::Relaxed);
        info!(
            target: "edgeship::executor",
            operation = %request.operation,
            domain = %request.domain,
            "dry-run: skipping executor call"
        );
        Self::synthetic(&request)
    }
}
