//! Multi-domain orchestrator.
//!
//! Validates the portfolio, then runs one task per domain. Each task waits
//! for its prerequisites, takes a permit from the concurrency semaphore and
//! drives its pipeline to a terminal status. `run` returns only once every
//! domain is terminal, then seals the portfolio.

mod request;

pub use request::{RunOptions, RunRequest};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use edgeship_model::{
    AuditEvent, AuditEventType, DeploymentError, DomainName, DomainState,
    DomainStatus, Environment, ErrorKind, OrchestrationId, PortfolioSummary,
};
use tokio::sync::{Mutex, Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifacts::{ConfigWriter, NoopConfigWriter, TomlConfigWriter};
use crate::config::EngineConfig;
use crate::coordinator::{CrossDomainCoordinator, DependencyEdge, ExecutionPlan};
use crate::error::{EngineError, Result};
use crate::executor::{CommandExecutor, DeploymentExecutor, DryRunExecutor};
use crate::pipeline::{DeploymentPipeline, PipelineSettings};
use crate::resources::{
    DatabaseManager, DatabaseOptions, FileSecretVault, InMemorySecretVault,
    ResourceContext, SecretManager, SecretOptions, SecretVault,
};
use crate::rollback::RollbackCoordinator;
use crate::store::{FilePersistence, StatePersistence, StateStore};

/// Stores of recent runs, oldest first.
#[derive(Debug, Default)]
struct RetainedRuns {
    stores: HashMap<OrchestrationId, Arc<StateStore>>,
    order: VecDeque<OrchestrationId>,
}

impl RetainedRuns {
    fn insert(
        &mut self,
        id: OrchestrationId,
        store: Arc<StateStore>,
        limit: usize,
    ) {
        self.stores.insert(id, store);
        self.order.push_back(id);
        while self.order.len() > limit.max(1) {
            if let Some(evicted) = self.order.pop_front() {
                self.stores.remove(&evicted);
                debug!(
                    target: "edgeship::orchestrator",
                    orchestration_id = %evicted,
                    "dropped retained run"
                );
            }
        }
    }

    fn remove(&mut self, id: OrchestrationId) -> bool {
        self.order.retain(|retained| *retained != id);
        self.stores.remove(&id).is_some()
    }
}

type DoneSignal = watch::Sender<Option<DomainStatus>>;
type DoneWatch = watch::Receiver<Option<DomainStatus>>;

/// Run parameters after merging request options over configuration.
#[derive(Debug, Clone)]
struct ResolvedRun {
    environment: Environment,
    domains: Vec<DomainName>,
    edges: Vec<DependencyEdge>,
    concurrency_limit: usize,
    dry_run: bool,
    automated: bool,
    timeout: Option<Duration>,
    pipeline: PipelineSettings,
}

pub struct Orchestrator {
    config: EngineConfig,
    executor: Arc<dyn DeploymentExecutor>,
    databases: Arc<DatabaseManager>,
    secrets: Arc<SecretManager>,
    writer: Arc<dyn ConfigWriter>,
    persistence: Option<Arc<dyn StatePersistence>>,
    coordinator: CrossDomainCoordinator,
    cancel: CancellationToken,
    events: broadcast::Sender<AuditEvent>,
    runs: Mutex<RetainedRuns>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Orchestrator");
        debug
            .field("concurrency_limit", &self.config.run.concurrency_limit)
            .field("dry_run", &self.config.run.dry_run)
            .field("writer", &self.writer)
            .field("persistent", &self.persistence.is_some())
            .field("cancelled", &self.cancel.is_cancelled());

        match self.runs.try_lock() {
            Ok(runs) => {
                debug.field("runs", &runs.stores.len());
            }
            Err(_) => {
                debug.field("runs", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl Orchestrator {
    /// Wire collaborators from configuration: a file vault when
    /// `secrets.vault_dir` is set, TOML artifacts when `artifacts.dir` is
    /// set, file persistence when `state.persist_dir` is set.
    pub fn new(config: EngineConfig, executor: Arc<dyn DeploymentExecutor>) -> Self {
        let vault: Arc<dyn SecretVault> = match &config.secrets.vault_dir {
            Some(dir) => Arc::new(FileSecretVault::new(dir)),
            None => Arc::new(InMemorySecretVault::new()),
        };
        let writer: Arc<dyn ConfigWriter> = match &config.artifacts.dir {
            Some(dir) => Arc::new(TomlConfigWriter::new(dir)),
            None => Arc::new(NoopConfigWriter),
        };
        let persistence = config.state.persist_dir.as_ref().map(|dir| {
            Arc::new(FilePersistence::new(dir)) as Arc<dyn StatePersistence>
        });
        let (events, _) =
            broadcast::channel(config.state.event_channel_capacity.max(1));

        Self {
            databases: Arc::new(DatabaseManager::new(config.database.clone())),
            secrets: Arc::new(SecretManager::new(vault, &config.secrets)),
            config,
            executor,
            writer,
            persistence,
            coordinator: CrossDomainCoordinator::new(),
            cancel: CancellationToken::new(),
            events,
            runs: Mutex::new(RetainedRuns::default()),
        }
    }

    /// Orchestrator backed by the external command executor.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let executor = CommandExecutor::from_config(&config.executor)?;
        Ok(Self::new(config, Arc::new(executor)))
    }

    pub fn with_vault(mut self, vault: Arc<dyn SecretVault>) -> Self {
        self.secrets = Arc::new(SecretManager::new(vault, &self.config.secrets));
        self
    }

    pub fn with_config_writer(mut self, writer: Arc<dyn ConfigWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_persistence(
        mut self,
        persistence: Arc<dyn StatePersistence>,
    ) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn databases(&self) -> &Arc<DatabaseManager> {
        &self.databases
    }

    pub fn secrets(&self) -> &Arc<SecretManager> {
        &self.secrets
    }

    /// Cancelling this token stops scheduling in every active run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Audit events of every run, as they are appended.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.events.subscribe()
    }

    pub async fn export_audit_log(
        &self,
        orchestration_id: OrchestrationId,
    ) -> Result<Vec<AuditEvent>> {
        Ok(self.store(orchestration_id).await?.export_audit_log().await)
    }

    pub async fn portfolio_summary(
        &self,
        orchestration_id: OrchestrationId,
    ) -> Result<PortfolioSummary> {
        Ok(self.store(orchestration_id).await?.portfolio_summary().await)
    }

    pub async fn domain_state(
        &self,
        orchestration_id: OrchestrationId,
        domain: &str,
    ) -> Result<Option<DomainState>> {
        let store = self.store(orchestration_id).await?;
        Ok(store.domain_state(&DomainName::new(domain)).await)
    }

    async fn store(
        &self,
        orchestration_id: OrchestrationId,
    ) -> Result<Arc<StateStore>> {
        self.runs
            .lock()
            .await
            .stores
            .get(&orchestration_id)
            .cloned()
            .ok_or(EngineError::UnknownOrchestration(orchestration_id))
    }

    /// Drop a run's in-memory state. Persisted files are left alone.
    pub async fn forget_run(&self, orchestration_id: OrchestrationId) -> bool {
        self.runs.lock().await.remove(orchestration_id)
    }

    /// Deploy every requested domain and return the final summary.
    ///
    /// Portfolio-level problems (bad environment, empty or duplicate domain
    /// list, unknown or circular dependencies) are returned as errors before
    /// any pipeline starts. Per-domain failures never are.
    pub async fn run(&self, request: RunRequest) -> Result<PortfolioSummary> {
        let resolved = self.resolve(request)?;
        let plan = self.coordinator.plan(&resolved.domains, &resolved.edges)?;

        let orchestration_id = OrchestrationId::new();
        let mut store = StateStore::with_capacity(
            orchestration_id,
            resolved.environment.clone(),
            self.config.state.event_channel_capacity,
        )
        .with_event_sender(self.events.clone());
        if let Some(persistence) = &self.persistence {
            store = store.with_persistence(Arc::clone(persistence));
        }
        let store = Arc::new(store);

        for domain in &resolved.domains {
            store.register_domain(domain.clone()).await?;
        }
        self.runs.lock().await.insert(
            orchestration_id,
            Arc::clone(&store),
            self.config.state.retained_runs,
        );

        let edges: Vec<String> = resolved
            .edges
            .iter()
            .map(|edge| format!("{}->{}", edge.dependent, edge.prerequisite))
            .collect();
        store
            .append_audit(
                AuditEvent::portfolio(orchestration_id, AuditEventType::RunStarted)
                    .with_detail("environment", resolved.environment.as_str())
                    .with_detail(
                        "domains",
                        resolved
                            .domains
                            .iter()
                            .map(|d| d.to_string())
                            .collect::<Vec<_>>(),
                    )
                    .with_detail("concurrencyLimit", resolved.concurrency_limit)
                    .with_detail("dryRun", resolved.dry_run)
                    .with_detail("dependencyEdges", edges),
            )
            .await?;
        info!(
            target: "edgeship::orchestrator",
            orchestration_id = %orchestration_id,
            environment = %resolved.environment,
            domains = resolved.domains.len(),
            concurrency_limit = resolved.concurrency_limit,
            dry_run = resolved.dry_run,
            "orchestration run started"
        );

        let cancel = self.cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = resolved.timeout.map(|limit| {
            let token = cancel.clone();
            let flag = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        warn!(
                            target: "edgeship::orchestrator",
                            timeout = ?limit,
                            "run timeout reached; cancelling"
                        );
                        flag.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                }
            })
        });

        let pipeline = Arc::new(self.build_pipeline(&resolved, &store, &cancel));
        self.schedule(&plan, pipeline, &store, &cancel, resolved.concurrency_limit)
            .await;

        if let Some(timer) = timer {
            timer.abort();
        }

        if cancel.is_cancelled() {
            let reason = if timed_out.load(Ordering::SeqCst) {
                "timeout"
            } else {
                "cancelled"
            };
            store
                .append_audit(
                    AuditEvent::portfolio(
                        orchestration_id,
                        AuditEventType::RunCancelled,
                    )
                    .with_detail("reason", reason),
                )
                .await?;
        }

        let summary = store.portfolio_summary().await;
        store
            .append_audit(
                AuditEvent::portfolio(orchestration_id, AuditEventType::RunCompleted)
                    .with_detail("totalDomains", summary.total_domains)
                    .with_detail("completedDomains", summary.completed_domains)
                    .with_detail("failedDomains", summary.failed_domains)
                    .with_detail("rolledBackDomains", summary.rolled_back_domains),
            )
            .await?;
        let summary = store.seal().await;

        info!(
            target: "edgeship::orchestrator",
            orchestration_id = %orchestration_id,
            total = summary.total_domains,
            completed = summary.completed_domains,
            failed = summary.failed_domains,
            rolled_back = summary.rolled_back_domains,
            peak_in_progress = store.peak_in_progress().await,
            "orchestration run finished"
        );
        Ok(summary)
    }

    fn resolve(&self, request: RunRequest) -> Result<ResolvedRun> {
        let RunRequest {
            domains,
            environment,
            options,
        } = request;
        let run = &self.config.run;

        let environment = Environment::parse(&environment)?;
        if !run.allowed_environments.is_empty()
            && !run
                .allowed_environments
                .iter()
                .any(|allowed| allowed == environment.as_str())
        {
            return Err(EngineError::Validation(format!(
                "environment {environment} is not allowed"
            )));
        }

        if domains.is_empty() {
            return Err(EngineError::Validation(
                "at least one domain is required".to_string(),
            ));
        }
        let domains: Vec<DomainName> =
            domains.iter().map(DomainName::new).collect();

        let concurrency_limit =
            options.concurrency_limit.unwrap_or(run.concurrency_limit);
        if concurrency_limit == 0 {
            return Err(EngineError::Validation(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        let edges = options
            .dependency_edges
            .iter()
            .map(|(dependent, prerequisite)| {
                DependencyEdge::new(dependent, prerequisite)
            })
            .collect();

        let mut domain_artifacts = BTreeMap::new();
        for (domain, artifact) in options.domain_artifacts {
            let domain = DomainName::new(domain);
            if !domains.contains(&domain) {
                warn!(
                    target: "edgeship::orchestrator",
                    domain = %domain,
                    "artifact given for a domain that is not part of the run"
                );
                continue;
            }
            domain_artifacts.insert(domain, artifact);
        }
        let database_names = options
            .database_names
            .into_iter()
            .map(|(domain, name)| (DomainName::new(domain), name))
            .filter(|(domain, _)| domains.contains(domain))
            .collect();

        let defaults = &self.config.secrets;
        let pipeline = PipelineSettings {
            allowed_environments: run.allowed_environments.clone(),
            default_artifact: options.artifact,
            domain_artifacts,
            database: DatabaseOptions::default(),
            database_names,
            secrets: SecretOptions {
                reuse_existing: options
                    .reuse_existing
                    .unwrap_or(defaults.reuse_existing),
                rotate_all: options.rotate_all.unwrap_or(defaults.rotate_all),
            },
            health_check: self.config.health_check_retry.policy(),
        };

        Ok(ResolvedRun {
            environment,
            domains,
            edges,
            concurrency_limit,
            dry_run: options.dry_run.unwrap_or(run.dry_run),
            automated: options.automated.unwrap_or(run.automated),
            timeout: options.timeout.or_else(|| run.timeout()),
            pipeline,
        })
    }

    fn build_pipeline(
        &self,
        resolved: &ResolvedRun,
        store: &Arc<StateStore>,
        cancel: &CancellationToken,
    ) -> DeploymentPipeline {
        let executor: Arc<dyn DeploymentExecutor> = if resolved.dry_run {
            Arc::new(DryRunExecutor::new(Arc::clone(&self.executor)))
        } else {
            Arc::clone(&self.executor)
        };
        let executor_config = Arc::new(self.config.executor.clone());

        let resources = ResourceContext {
            executor: Arc::clone(&executor),
            store: Arc::clone(store),
            writer: Arc::clone(&self.writer),
            retry: self.config.retry.policy(),
            executor_config: Arc::clone(&executor_config),
            cancel: cancel.clone(),
            dry_run: resolved.dry_run,
            automated: resolved.automated,
        };
        let rollback = Arc::new(RollbackCoordinator::new(
            executor,
            Arc::clone(store),
            Arc::clone(&self.databases),
            Arc::clone(&self.secrets),
            self.config.rollback_retry.policy(),
            executor_config,
        ));

        DeploymentPipeline::new(
            resources,
            resolved.pipeline.clone(),
            Arc::clone(&self.databases),
            Arc::clone(&self.secrets),
            rollback,
        )
    }

    async fn schedule(
        &self,
        plan: &ExecutionPlan,
        pipeline: Arc<DeploymentPipeline>,
        store: &Arc<StateStore>,
        cancel: &CancellationToken,
        concurrency_limit: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency_limit));
        let mut signals: HashMap<DomainName, DoneSignal> = HashMap::new();
        let mut watches: HashMap<DomainName, DoneWatch> = HashMap::new();
        for domain in plan.order() {
            let (tx, rx) = watch::channel(None);
            signals.insert(domain.clone(), tx);
            watches.insert(domain.clone(), rx);
        }

        let mut tasks = JoinSet::new();
        for domain in plan.order() {
            let Some(done) = signals.remove(domain) else {
                continue;
            };
            let upstream: Vec<(DomainName, DoneWatch)> = plan
                .prerequisites(domain)
                .iter()
                .filter_map(|prereq| {
                    watches.get(prereq).map(|rx| (prereq.clone(), rx.clone()))
                })
                .collect();

            debug!(
                target: "edgeship::orchestrator",
                domain = %domain,
                upstream = upstream.len(),
                "domain task spawned"
            );
            tasks.spawn(drive_domain(
                domain.clone(),
                upstream,
                done,
                Arc::clone(&pipeline),
                Arc::clone(&semaphore),
                cancel.clone(),
            ));
        }
        drop(watches);

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(
                    target: "edgeship::orchestrator",
                    error = %err,
                    "domain task aborted"
                );
            }
        }

        // A panicked task can leave its domain behind; close it out.
        for state in store.domain_states().await {
            if state.is_terminal() {
                continue;
            }
            let error = DeploymentError::new(
                ErrorKind::FatalExecutor,
                "domain task terminated unexpectedly",
            )
            .with_phase(state.phase);
            if let Err(err) = store.fail_domain(&state.domain, error).await {
                error!(
                    target: "edgeship::orchestrator",
                    domain = %state.domain,
                    error = %err,
                    "could not close out domain"
                );
            }
        }
    }
}

async fn drive_domain(
    domain: DomainName,
    upstream: Vec<(DomainName, DoneWatch)>,
    done: DoneSignal,
    pipeline: Arc<DeploymentPipeline>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let status =
        match run_domain(&domain, upstream, &pipeline, &semaphore, &cancel).await {
            Ok(state) => state.status,
            Err(err) => {
                error!(
                    target: "edgeship::orchestrator",
                    domain = %domain,
                    error = %err,
                    "domain pipeline errored"
                );
                let store = &pipeline.resources().store;
                let failure =
                    DeploymentError::new(ErrorKind::FatalExecutor, err.to_string());
                match store.fail_domain(&domain, failure).await {
                    Ok(state) => state.status,
                    Err(_) => DomainStatus::Failed,
                }
            }
        };
    done.send_replace(Some(status));
}

async fn run_domain(
    domain: &DomainName,
    upstream: Vec<(DomainName, DoneWatch)>,
    pipeline: &DeploymentPipeline,
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<DomainState> {
    let mut failed_upstream = Vec::new();
    for (prerequisite, mut rx) in upstream {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return pipeline
                    .abort(
                        domain,
                        DeploymentError::cancelled(
                            "run cancelled while waiting for upstream domains",
                        ),
                    )
                    .await;
            }
            finished = async {
                rx.wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|status| *status)
            } => finished,
        };
        if status != Some(DomainStatus::Completed) {
            failed_upstream.push(prerequisite.to_string());
        }
    }

    if !failed_upstream.is_empty() {
        return pipeline
            .abort(
                domain,
                DeploymentError::upstream_dependency_failed(&failed_upstream),
            )
            .await;
    }

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return pipeline
                .abort(
                    domain,
                    DeploymentError::cancelled(
                        "run cancelled before the domain was scheduled",
                    ),
                )
                .await;
        }
        permit = Arc::clone(semaphore).acquire_owned() => {
            permit.map_err(|_| {
                EngineError::Internal("scheduler semaphore closed".to_string())
            })?
        }
    };

    let store = &pipeline.resources().store;
    store
        .append_audit(
            AuditEvent::for_domain(
                store.orchestration_id(),
                domain.clone(),
                AuditEventType::DomainScheduled,
            )
            .with_detail("availablePermits", semaphore.available_permits()),
        )
        .await?;

    pipeline.run(domain).await
}
