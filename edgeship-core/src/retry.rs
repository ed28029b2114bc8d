//! Single retry abstraction shared by every executor call site.

use std::future::Future;
use std::time::Duration;

use edgeship_model::{DeploymentError, ErrorKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::executor::{DeploymentExecutor, ExecutionOutcome, ExecutionRequest};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    #[default]
    Exponential,
}

/// Max attempts, backoff shape and jitter for retryable executor failures.
///
/// Only outcomes flagged `retryable` (and timeouts) are retried; everything
/// else returns after the first attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        crate::config::RetryConfig::default().policy()
    }
}

/// Passed to the retry observer before each backoff sleep.
#[derive(Clone, Debug)]
pub struct RetryNotice {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub detail: String,
}

#[derive(Clone, Debug)]
pub struct RetryOutcome {
    pub outcome: ExecutionOutcome,
    pub attempts: u32,
    /// The retry budget ran out on a retryable failure.
    pub exhausted: bool,
    /// Cancellation stopped further attempts.
    pub cancelled: bool,
}

impl RetryOutcome {
    pub fn succeeded(&self) -> bool {
        self.outcome.success
    }

    /// Classify a failed outcome into the shared error taxonomy.
    pub fn to_error(&self, context: &str) -> DeploymentError {
        let kind = if self.cancelled {
            ErrorKind::Cancelled
        } else if self.exhausted {
            ErrorKind::TransientExecutor
        } else {
            ErrorKind::FatalExecutor
        };
        DeploymentError::new(kind, context.to_string())
            .with_detail(self.outcome.detail())
            .with_attempts(self.attempts)
    }
}

impl RetryPolicy {
    /// Policy without sleeps, handy for tests and local runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy: BackoffStrategy::Fixed,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ratio: 0.0,
        }
    }

    /// Un-jittered delay after `attempt` failures.
    pub fn anchor_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let exp = attempt.saturating_sub(1).min(31);
                self.base_delay.saturating_mul(1u32 << exp)
            }
        };
        delay.min(self.max_delay)
    }

    /// Anchor delay spread by `±jitter_ratio`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let anchor = self.anchor_delay(attempt).as_secs_f64();
        if anchor == 0.0 || self.jitter_ratio <= 0.0 {
            return Duration::from_secs_f64(anchor);
        }

        let span = anchor * f64::from(self.jitter_ratio.min(1.0));
        let lower = (anchor - span).max(0.0);
        let upper = (anchor + span).min(self.max_delay.as_secs_f64());
        if upper <= lower {
            return Duration::from_secs_f64(lower);
        }
        Duration::from_secs_f64(rand::rng().random_range(lower..=upper))
    }

    /// Drive one executor request under this policy.
    ///
    /// An executor call that has started is always awaited to completion
    /// (or its timeout); cancellation only prevents further attempts. A
    /// token cancelled before the first attempt yields zero attempts.
    pub async fn run<F, Fut>(
        &self,
        executor: &dyn DeploymentExecutor,
        request: ExecutionRequest,
        cancel: &CancellationToken,
        mut on_retry: F,
    ) -> RetryOutcome
    where
        F: FnMut(RetryNotice) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        let mut last: Option<ExecutionOutcome> = None;

        loop {
            if cancel.is_cancelled() {
                let outcome = last.unwrap_or_else(|| {
                    ExecutionOutcome::fatal(format!(
                        "{} not started: run cancelled",
                        request.operation
                    ))
                });
                return RetryOutcome {
                    outcome,
                    attempts: attempt,
                    exhausted: false,
                    cancelled: true,
                };
            }
            attempt += 1;
            let timeout = request.timeout;
            let outcome = match tokio::time::timeout(
                timeout,
                executor.execute(request.clone()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => ExecutionOutcome::timed_out(timeout),
            };

            if outcome.success || !outcome.retryable {
                return RetryOutcome {
                    outcome,
                    attempts: attempt,
                    exhausted: false,
                    cancelled: false,
                };
            }
            if attempt >= max_attempts {
                return RetryOutcome {
                    outcome,
                    attempts: attempt,
                    exhausted: true,
                    cancelled: false,
                };
            }
            let detail = outcome.detail().to_string();
            last = Some(outcome);
            if cancel.is_cancelled() {
                continue;
            }

            let delay = self.delay_for(attempt);
            on_retry(RetryNotice {
                attempt,
                max_attempts,
                delay,
                detail,
            })
            .await;

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
