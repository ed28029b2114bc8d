//! Shared fixtures for edgeship-core integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use edgeship_core::config::{EngineConfig, RetryConfig};
use edgeship_core::executor::{
    DeploymentExecutor, ExecutionOutcome, ExecutionRequest, ExecutorOperation,
};
use edgeship_core::model::{AuditEvent, AuditEventType};
use edgeship_core::retry::BackoffStrategy;
use tokio_util::sync::CancellationToken;

pub const ENVIRONMENT: &str = "production";
pub const ARTIFACT: &str = "dist/site.tar.gz";

/// One recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: ExecutorOperation,
    pub domain: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Retryable,
    Fatal,
    /// Never answers; the caller's timeout decides.
    Stall,
}

#[derive(Debug)]
struct Rule {
    operation: ExecutorOperation,
    domain: String,
    failure: Failure,
    /// `None` fails forever.
    remaining: Option<u32>,
}

/// In-memory backend with scripted failures and call bookkeeping.
///
/// Databases created through it are remembered, so existence checks in a
/// later run answer `exists: true`.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    calls: Mutex<Vec<Call>>,
    rules: Mutex<Vec<Rule>>,
    databases: Mutex<HashSet<String>>,
    cancel_after: Mutex<Option<(ExecutorOperation, String, CancellationToken)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long, which makes overlap observable.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_always(
        self,
        operation: ExecutorOperation,
        domain: &str,
        failure: Failure,
    ) -> Self {
        self.push_rule(operation, domain, failure, None)
    }

    pub fn fail_times(
        self,
        operation: ExecutorOperation,
        domain: &str,
        failure: Failure,
        times: u32,
    ) -> Self {
        self.push_rule(operation, domain, failure, Some(times))
    }

    fn push_rule(
        self,
        operation: ExecutorOperation,
        domain: &str,
        failure: Failure,
        remaining: Option<u32>,
    ) -> Self {
        self.rules.lock().unwrap().push(Rule {
            operation,
            domain: domain.to_string(),
            failure,
            remaining,
        });
        self
    }

    /// Cancel `token` once `operation` for `domain` has succeeded.
    pub fn cancel_after(
        &self,
        operation: ExecutorOperation,
        domain: &str,
        token: CancellationToken,
    ) {
        *self.cancel_after.lock().unwrap() =
            Some((operation, domain.to_string(), token));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, domain: &str) -> Vec<ExecutorOperation> {
        self.calls()
            .into_iter()
            .filter(|call| call.domain == domain)
            .map(|call| call.operation)
            .collect()
    }

    pub fn count(&self, operation: ExecutorOperation, domain: &str) -> usize {
        self.calls_for(domain)
            .into_iter()
            .filter(|op| *op == operation)
            .count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, request: &ExecutionRequest) -> Option<Failure> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|rule| {
            rule.operation == request.operation
                && rule.domain == request.domain.as_str()
                && rule.remaining != Some(0)
        })?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.failure)
    }

    fn answer(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let name = request.param("name").unwrap_or_default().to_string();
        match request.operation {
            ExecutorOperation::CheckDatabaseExists => {
                if self.databases.lock().unwrap().contains(&name) {
                    ExecutionOutcome::success(format!(
                        r#"{{"exists": true, "id": "db-{name}"}}"#
                    ))
                } else {
                    ExecutionOutcome::success(r#"{"exists": false}"#)
                }
            }
            ExecutorOperation::CreateDatabase => {
                self.databases.lock().unwrap().insert(name.clone());
                ExecutionOutcome::success(format!(r#"{{"id": "db-{name}"}}"#))
            }
            ExecutorOperation::DeleteDatabase => {
                self.databases.lock().unwrap().remove(&name);
                ExecutionOutcome::success("deleted")
            }
            ExecutorOperation::DeployArtifact => ExecutionOutcome::success(
                format!(r#"{{"url": "https://{}"}}"#, request.domain),
            ),
            _ => ExecutionOutcome::success("ok"),
        }
    }
}

#[async_trait]
impl DeploymentExecutor for ScriptedExecutor {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        self.calls.lock().unwrap().push(Call {
            operation: request.operation,
            domain: request.domain.to_string(),
            name: request.param("name").map(str::to_string),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = match self.scripted_failure(&request) {
            Some(Failure::Retryable) => {
                ExecutionOutcome::retryable("503 service unavailable")
            }
            Some(Failure::Fatal) => ExecutionOutcome::fatal("permission denied"),
            Some(Failure::Stall) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                return ExecutionOutcome::fatal("stalled call was not cut off");
            }
            None => self.answer(&request),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if outcome.success {
            let hook = self.cancel_after.lock().unwrap();
            if let Some((operation, domain, token)) = hook.as_ref()
                && *operation == request.operation
                && domain == request.domain.as_str()
            {
                token.cancel();
            }
        }
        outcome
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        strategy: BackoffStrategy::Exponential,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        jitter_ratio: 0.0,
    }
}

/// Engine defaults with millisecond backoff so retry paths stay quick.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry = fast_retry(6);
    config.rollback_retry = fast_retry(3);
    config.health_check_retry = RetryConfig {
        strategy: BackoffStrategy::Fixed,
        ..fast_retry(3)
    };
    config
}

pub fn events_of(
    audit: &[AuditEvent],
    domain: &str,
    event_type: AuditEventType,
) -> Vec<AuditEvent> {
    audit
        .iter()
        .filter(|event| {
            event.event_type == event_type
                && event.domain.as_ref().is_some_and(|d| d.as_str() == domain)
        })
        .cloned()
        .collect()
}

/// Highest number of domains IN_PROGRESS at once, replayed from the log.
pub fn replay_peak_in_progress(audit: &[AuditEvent]) -> usize {
    let mut current = 0usize;
    let mut peak = 0usize;
    for event in audit {
        if event.event_type != AuditEventType::StatusChanged {
            continue;
        }
        let from = event.detail("from").and_then(|v| v.as_str());
        let to = event.detail("to").and_then(|v| v.as_str());
        if to == Some("IN_PROGRESS") {
            current += 1;
            peak = peak.max(current);
        } else if from == Some("IN_PROGRESS") {
            current = current.saturating_sub(1);
        }
    }
    peak
}
