mod support;

use std::sync::Arc;
use std::time::Duration;

use edgeship_core::executor::ExecutorOperation;
use edgeship_core::model::{
    AuditEventType, DomainName, DomainStatus, Environment, ErrorKind, Phase,
    RollbackActionState, RollbackKind, metadata_keys,
};
use edgeship_core::resources::SecretVault;
use edgeship_core::rollback::rollback_scope;
use edgeship_core::store::FilePersistence;
use edgeship_core::{EngineError, Orchestrator, RunRequest};
use serde_json::Value;

use support::{
    ARTIFACT, ENVIRONMENT, Failure, ScriptedExecutor, events_of, fast_config,
    replay_peak_in_progress,
};

fn request(domains: &[&str]) -> RunRequest {
    RunRequest::new(domains.iter().copied(), ENVIRONMENT).artifact(ARTIFACT)
}

#[tokio::test]
async fn one_domain_failing_does_not_affect_the_others() {
    let executor = Arc::new(ScriptedExecutor::new().fail_always(
        ExecutorOperation::CreateDatabase,
        "a.com",
        Failure::Fatal,
    ));
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());

    let summary = orchestrator
        .run(request(&["a.com", "b.com", "c.com"]))
        .await
        .unwrap();

    assert_eq!(summary.completed_domains, 2);
    assert_eq!(summary.failed_domains, 1);
    assert_eq!(summary.rolled_back_domains, 0);

    // Nothing was created, so there is nothing to compensate.
    let a = summary.domain("a.com").unwrap();
    assert_eq!(a.status, DomainStatus::Failed);
    assert_eq!(a.phase, Phase::Database);
    assert!(a.rollback_actions.is_empty());

    for domain in ["b.com", "c.com"] {
        let state = summary.domain(domain).unwrap();
        assert_eq!(state.status, DomainStatus::Completed);
        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(executor.count(ExecutorOperation::DeployArtifact, domain), 1);
    }
}

#[tokio::test]
async fn concurrency_limit_bounds_in_flight_pipelines() {
    let executor =
        Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(5)));
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());
    let domains = ["a.com", "b.com", "c.com", "d.com", "e.com", "f.com"];

    let summary = orchestrator
        .run(request(&domains).concurrency_limit(2))
        .await
        .unwrap();

    assert_eq!(summary.completed_domains, domains.len());
    assert!(executor.peak_in_flight() <= 2);

    let audit = orchestrator
        .export_audit_log(summary.orchestration_id)
        .await
        .unwrap();
    let peak = replay_peak_in_progress(&audit);
    assert!(peak <= 2, "peak in-progress was {peak}");
    assert_eq!(peak, 2);
}

#[tokio::test]
async fn dependency_chains_finish_in_order() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());

    let summary = orchestrator
        .run(
            request(&["web.com", "api.com", "db.com", "cdn.com"])
                .concurrency_limit(4)
                .depends_on("web.com", "api.com")
                .depends_on("api.com", "db.com")
                .depends_on("cdn.com", "db.com"),
        )
        .await
        .unwrap();
    assert!(summary.is_terminal());
    assert_eq!(summary.completed_domains, 4);

    let audit = orchestrator
        .export_audit_log(summary.orchestration_id)
        .await
        .unwrap();
    let sequence_of = |domain: &str, event_type: AuditEventType| {
        events_of(&audit, domain, event_type)
            .first()
            .map(|event| event.sequence)
            .unwrap()
    };
    let db_done = sequence_of("db.com", AuditEventType::PhaseCompleted);
    assert!(sequence_of("api.com", AuditEventType::DomainScheduled) > db_done);
    assert!(sequence_of("cdn.com", AuditEventType::DomainScheduled) > db_done);

    let api_finished = events_of(&audit, "api.com", AuditEventType::StatusChanged)
        .into_iter()
        .find(|event| {
            event.detail("to").and_then(Value::as_str) == Some("COMPLETED")
        })
        .unwrap()
        .sequence;
    assert!(
        sequence_of("web.com", AuditEventType::DomainScheduled) > api_finished
    );
}

#[tokio::test]
async fn portfolio_level_problems_abort_before_any_pipeline() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());

    let empty = orchestrator
        .run(RunRequest::new(Vec::<String>::new(), ENVIRONMENT))
        .await;
    assert!(matches!(empty, Err(EngineError::Validation(_))));

    let duplicate = orchestrator.run(request(&["a.com", "A.com"])).await;
    assert!(matches!(duplicate, Err(EngineError::Validation(_))));

    let cycle = orchestrator
        .run(
            request(&["a.com", "b.com", "c.com"])
                .depends_on("a.com", "b.com")
                .depends_on("b.com", "c.com")
                .depends_on("c.com", "a.com"),
        )
        .await;
    match cycle {
        Err(EngineError::CircularDependency { cycle }) => {
            assert_eq!(cycle.first(), cycle.last());
            assert_eq!(cycle.len(), 4);
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }

    let unknown = orchestrator
        .run(request(&["a.com"]).depends_on("a.com", "ghost.com"))
        .await;
    assert!(matches!(unknown, Err(EngineError::UnknownDomain(_))));

    let zero = orchestrator
        .run(request(&["a.com"]).concurrency_limit(0))
        .await;
    assert!(matches!(zero, Err(EngineError::Validation(_))));

    let environment = orchestrator
        .run(RunRequest::new(["a.com"], "not an env!"))
        .await;
    assert!(environment.is_err());

    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn disallowed_environment_is_rejected() {
    let mut config = fast_config();
    config.run.allowed_environments = vec!["staging".to_string()];
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(config, executor.clone());

    let result = orchestrator.run(request(&["a.com"])).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn invalid_domain_fails_validation_without_side_effects() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());

    let summary = orchestrator
        .run(request(&["bad_domain..com", "ok.com"]))
        .await
        .unwrap();

    let bad = summary.domain("bad_domain..com").unwrap();
    assert_eq!(bad.status, DomainStatus::Failed);
    assert_eq!(bad.error.as_ref().unwrap().kind, ErrorKind::Validation);
    assert!(executor.calls_for("bad_domain..com").is_empty());
    assert_eq!(
        summary.domain("ok.com").unwrap().status,
        DomainStatus::Completed
    );
}

#[tokio::test]
async fn dry_run_only_reads_from_the_backend() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());

    let summary = orchestrator
        .run(request(&["a.com", "b.com"]).dry_run(true))
        .await
        .unwrap();

    assert_eq!(summary.completed_domains, 2);
    assert!(
        executor
            .calls()
            .iter()
            .all(|call| call.operation == ExecutorOperation::CheckDatabaseExists)
    );
    assert_eq!(executor.calls().len(), 2);

    let environment = Environment::parse(ENVIRONMENT).unwrap();
    for domain in ["a.com", "b.com"] {
        let domain = DomainName::new(domain);
        let bundle = orchestrator
            .secrets()
            .vault()
            .load(&domain, &environment)
            .await
            .unwrap();
        assert!(bundle.is_none());
        assert!(
            orchestrator
                .databases()
                .record(&domain, &environment)
                .await
                .is_none()
        );
    }
}

#[tokio::test]
async fn repeated_runs_reuse_databases_and_secrets() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());
    let metric = |state: &edgeship_core::model::DomainState, key: &str| {
        state.metadata.get(key).and_then(Value::as_u64)
    };

    let first = orchestrator.run(request(&["a.com"])).await.unwrap();
    let state = orchestrator
        .domain_state(first.orchestration_id, "a.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metric(&state, metadata_keys::SECRETS_GENERATED), Some(3));
    assert_eq!(metric(&state, metadata_keys::SECRET_BUNDLE_VERSION), Some(1));

    let second = orchestrator.run(request(&["a.com"])).await.unwrap();
    assert_eq!(second.completed_domains, 1);
    let state = orchestrator
        .domain_state(second.orchestration_id, "a.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metric(&state, metadata_keys::SECRETS_GENERATED), Some(0));
    assert_eq!(metric(&state, metadata_keys::SECRETS_REUSED), Some(3));
    assert_eq!(metric(&state, metadata_keys::SECRET_BUNDLE_VERSION), Some(1));
    assert_eq!(
        state.metadata.get(metadata_keys::DATABASE_CREATED),
        Some(&Value::Bool(false))
    );
    assert_eq!(executor.count(ExecutorOperation::CreateDatabase, "a.com"), 1);

    let kinds = state
        .rollback_actions
        .iter()
        .map(|action| action.kind)
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            RollbackKind::Noop,
            RollbackKind::Noop,
            RollbackKind::RevertDeployment,
        ]
    );

    let rotated = orchestrator
        .run(request(&["a.com"]).rotate_all(true))
        .await
        .unwrap();
    let state = orchestrator
        .domain_state(rotated.orchestration_id, "a.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metric(&state, metadata_keys::SECRETS_GENERATED), Some(3));
    assert_eq!(metric(&state, metadata_keys::SECRET_BUNDLE_VERSION), Some(2));
}

#[tokio::test]
async fn rollback_only_covers_phases_before_the_failure() {
    let executor = Arc::new(ScriptedExecutor::new().fail_always(
        ExecutorOperation::SetSecret,
        "s.com",
        Failure::Fatal,
    ));
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());

    let summary = orchestrator.run(request(&["s.com"])).await.unwrap();
    let s = summary.domain("s.com").unwrap();
    assert_eq!(s.status, DomainStatus::RolledBack);
    assert_eq!(s.phase, Phase::Secrets);

    let phases: Vec<Phase> =
        s.rollback_actions.iter().map(|action| action.phase).collect();
    assert_eq!(phases, rollback_scope(Phase::Secrets).collect::<Vec<_>>());
    assert_eq!(phases, vec![Phase::Database]);
    assert_eq!(executor.count(ExecutorOperation::DeleteSecret, "s.com"), 0);
    assert_eq!(executor.count(ExecutorOperation::DeleteDatabase, "s.com"), 1);
    assert_eq!(
        executor.count(ExecutorOperation::RollbackDeployment, "s.com"),
        0
    );
}

#[tokio::test]
async fn failed_compensation_leaves_domain_failed_with_unresolved_actions() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .fail_always(ExecutorOperation::DeployArtifact, "x.com", Failure::Fatal)
            .fail_always(ExecutorOperation::DeleteDatabase, "x.com", Failure::Fatal),
    );
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());

    let summary = orchestrator.run(request(&["x.com"])).await.unwrap();
    let x = summary.domain("x.com").unwrap();
    assert_eq!(x.status, DomainStatus::Failed);
    assert_eq!(summary.rolled_back_domains, 0);

    let state_of = |kind: RollbackKind| {
        x.rollback_actions
            .iter()
            .find(|action| action.kind == kind)
            .map(|action| action.state)
    };
    assert_eq!(
        state_of(RollbackKind::RevokeSecret),
        Some(RollbackActionState::Executed)
    );
    assert_eq!(
        state_of(RollbackKind::DeleteDatabase),
        Some(RollbackActionState::Unresolved)
    );

    let state = orchestrator
        .domain_state(summary.orchestration_id, "x.com")
        .await
        .unwrap()
        .unwrap();
    let unresolved = state
        .metadata
        .get(metadata_keys::UNRESOLVED_ROLLBACK_ACTIONS)
        .and_then(Value::as_array)
        .expect("unresolved actions are recorded");
    assert_eq!(unresolved.len(), 1);
}

#[tokio::test]
async fn cancellation_stops_scheduling_and_settles_every_domain() {
    let executor =
        Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(30)));
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(75)).await;
        token.cancel();
    });

    let domains = ["a.com", "b.com", "c.com", "d.com"];
    let summary = orchestrator
        .run(request(&domains).concurrency_limit(1))
        .await
        .unwrap();

    assert!(summary.is_terminal());
    assert_eq!(summary.completed_domains, 0);
    assert_eq!(summary.failed_domains, domains.len());

    let started: Vec<&str> = domains
        .iter()
        .copied()
        .filter(|domain| !executor.calls_for(domain).is_empty())
        .collect();
    assert_eq!(started.len(), 1);

    for domain in domains {
        let error = summary.domain(domain).unwrap().error.clone().unwrap();
        assert_eq!(error.kind, ErrorKind::Cancelled, "{domain}");
    }

    let audit = orchestrator
        .export_audit_log(summary.orchestration_id)
        .await
        .unwrap();
    let cancelled = audit
        .iter()
        .find(|event| event.event_type == AuditEventType::RunCancelled)
        .expect("run cancellation is audited");
    assert_eq!(
        cancelled.detail("reason").and_then(Value::as_str),
        Some("cancelled")
    );
}

#[tokio::test]
async fn run_timeout_cancels_only_that_run() {
    let executor =
        Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(30)));
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());

    let summary = orchestrator
        .run(
            request(&["a.com", "b.com"])
                .concurrency_limit(1)
                .timeout(Duration::from_millis(60)),
        )
        .await
        .unwrap();
    assert!(summary.is_terminal());
    assert_eq!(summary.completed_domains, 0);

    let audit = orchestrator
        .export_audit_log(summary.orchestration_id)
        .await
        .unwrap();
    let reason = audit
        .iter()
        .find(|event| event.event_type == AuditEventType::RunCancelled)
        .and_then(|event| event.detail("reason"))
        .and_then(Value::as_str);
    assert_eq!(reason, Some("timeout"));

    let next = orchestrator.run(request(&["c.com"])).await.unwrap();
    assert_eq!(next.completed_domains, 1);
}

#[tokio::test]
async fn audit_log_is_ordered_and_streamed() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor);
    let mut live = orchestrator.subscribe();

    let summary = orchestrator.run(request(&["a.com", "b.com"])).await.unwrap();
    let audit = orchestrator
        .export_audit_log(summary.orchestration_id)
        .await
        .unwrap();

    assert_eq!(audit.first().unwrap().event_type, AuditEventType::RunStarted);
    assert_eq!(
        audit.last().unwrap().event_type,
        AuditEventType::RunCompleted
    );
    for pair in audit.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    assert!(
        audit
            .iter()
            .all(|event| event.orchestration_id == summary.orchestration_id)
    );

    let mut streamed = 0;
    while let Ok(event) = live.try_recv() {
        assert_eq!(event.sequence, audit[streamed].sequence);
        streamed += 1;
    }
    assert_eq!(streamed, audit.len());

    let again = orchestrator
        .portfolio_summary(summary.orchestration_id)
        .await
        .unwrap();
    assert_eq!(again, summary);
}

#[tokio::test]
async fn unknown_run_lookups_fail() {
    let orchestrator =
        Orchestrator::new(fast_config(), Arc::new(ScriptedExecutor::new()));
    let missing = edgeship_core::model::OrchestrationId::new();
    assert!(matches!(
        orchestrator.export_audit_log(missing).await,
        Err(EngineError::UnknownOrchestration(_))
    ));
}

#[tokio::test]
async fn persisted_runs_can_be_replayed_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.state.persist_dir = Some(dir.path().to_path_buf());
    let orchestrator =
        Orchestrator::new(config, Arc::new(ScriptedExecutor::new()));

    let summary = orchestrator.run(request(&["a.com"])).await.unwrap();
    let live = orchestrator
        .export_audit_log(summary.orchestration_id)
        .await
        .unwrap();

    let persistence = FilePersistence::new(dir.path());
    let replayed = persistence
        .load_audit(summary.orchestration_id)
        .await
        .unwrap();
    assert_eq!(replayed, live);

    let snapshot = persistence
        .load_snapshot(summary.orchestration_id)
        .await
        .unwrap()
        .expect("snapshot written");
    assert!(snapshot.sealed);
    assert_eq!(snapshot.domains.len(), 1);
    assert_eq!(snapshot.domains[0].status, DomainStatus::Completed);
}

#[tokio::test]
async fn config_artifacts_record_provisioned_resources() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.artifacts.dir = Some(dir.path().to_path_buf());
    let orchestrator =
        Orchestrator::new(config, Arc::new(ScriptedExecutor::new()));

    orchestrator.run(request(&["a.com"])).await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join("a.com.toml")).unwrap();
    let document: toml::Table = toml::from_str(&raw).unwrap();
    let section = &document["environments"][ENVIRONMENT];
    assert_eq!(section["database_name"].as_str(), Some("a-com-production"));
    assert_eq!(section["database_id"].as_str(), Some("db-a-com-production"));
    assert_eq!(section["secret_bundle_version"].as_str(), Some("1"));
}

#[tokio::test]
async fn cancellation_after_deployment_keeps_the_domain_live() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());
    executor.cancel_after(
        ExecutorOperation::DeployArtifact,
        "x.com",
        orchestrator.cancellation_token(),
    );

    let summary = orchestrator.run(request(&["x.com"])).await.unwrap();
    let x = summary.domain("x.com").unwrap();
    assert_eq!(x.status, DomainStatus::Completed);
    assert_eq!(x.phase, Phase::Completed);
    assert!(x.error.is_none());
    assert!(
        x.warnings
            .iter()
            .any(|warning| warning.contains("health check skipped"))
    );

    assert_eq!(executor.count(ExecutorOperation::HealthCheck, "x.com"), 0);
    for compensation in [
        ExecutorOperation::RollbackDeployment,
        ExecutorOperation::DeleteSecret,
        ExecutorOperation::DeleteDatabase,
    ] {
        assert_eq!(executor.count(compensation, "x.com"), 0, "{compensation}");
    }

    let state = orchestrator
        .domain_state(summary.orchestration_id, "x.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        state.metadata.get(metadata_keys::HEALTH).and_then(Value::as_str),
        Some("unknown")
    );
}

#[tokio::test]
async fn renamed_database_is_a_conflict_in_automated_runs() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());
    let first = orchestrator.run(request(&["a.com"])).await.unwrap();
    assert_eq!(first.completed_domains, 1);

    let summary = orchestrator
        .run(
            request(&["a.com"])
                .database_name("a.com", "a-com-blue")
                .automated(true),
        )
        .await
        .unwrap();
    let a = summary.domain("a.com").unwrap();
    assert_eq!(a.status, DomainStatus::Failed);
    assert_eq!(a.phase, Phase::Database);
    assert_eq!(
        a.error.as_ref().map(|error| error.kind),
        Some(ErrorKind::ResourceReuseConflict)
    );
    assert_eq!(executor.count(ExecutorOperation::CreateDatabase, "a.com"), 1);
    assert_eq!(executor.count(ExecutorOperation::DeleteDatabase, "a.com"), 0);
}

#[tokio::test]
async fn renamed_database_reuses_the_existing_one_interactively() {
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), executor.clone());
    let first = orchestrator.run(request(&["a.com"])).await.unwrap();
    let original = orchestrator
        .domain_state(first.orchestration_id, "a.com")
        .await
        .unwrap()
        .unwrap()
        .metadata
        .get(metadata_keys::DATABASE_NAME)
        .cloned()
        .expect("database name is recorded");

    let summary = orchestrator
        .run(
            request(&["a.com"])
                .database_name("a.com", "a-com-blue")
                .automated(false),
        )
        .await
        .unwrap();
    let a = summary.domain("a.com").unwrap();
    assert!(a.completed_with_warning());
    assert!(
        a.warnings
            .iter()
            .any(|warning| warning.contains("a-com-blue"))
    );

    let state = orchestrator
        .domain_state(summary.orchestration_id, "a.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        state.metadata.get(metadata_keys::DATABASE_NAME),
        Some(&original)
    );
    assert_eq!(
        state.metadata.get(metadata_keys::DATABASE_CREATED),
        Some(&Value::Bool(false))
    );
    assert_eq!(executor.count(ExecutorOperation::CreateDatabase, "a.com"), 1);
    assert!(
        executor
            .calls()
            .iter()
            .all(|call| call.name.as_deref() != Some("a-com-blue"))
    );

    let audit = orchestrator
        .export_audit_log(summary.orchestration_id)
        .await
        .unwrap();
    let conflicts = events_of(&audit, "a.com", AuditEventType::ResourceWarning);
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].detail("conflict").is_some());
}

#[tokio::test(start_paused = true)]
async fn deployment_that_keeps_timing_out_fails_at_deployment() {
    let executor = Arc::new(ScriptedExecutor::new().fail_always(
        ExecutorOperation::DeployArtifact,
        "t.com",
        Failure::Stall,
    ));
    let mut config = fast_config();
    config.retry.max_attempts = 3;
    config
        .executor
        .operation_timeouts_secs
        .insert(ExecutorOperation::DeployArtifact, 5);
    let orchestrator = Orchestrator::new(config, executor.clone());

    let summary = orchestrator.run(request(&["t.com"])).await.unwrap();
    let t = summary.domain("t.com").unwrap();
    assert_eq!(t.phase, Phase::Deployment);
    assert_ne!(t.status, DomainStatus::Completed);

    let error = t.error.clone().unwrap();
    assert_eq!(error.kind, ErrorKind::TransientExecutor);
    assert_eq!(error.phase, Some(Phase::Deployment));
    assert_eq!(error.attempts, 3);
    assert!(error.detail.as_deref().is_some_and(|d| d.contains("timed out")));
    assert_eq!(executor.count(ExecutorOperation::DeployArtifact, "t.com"), 3);
    assert_eq!(executor.count(ExecutorOperation::DeleteDatabase, "t.com"), 1);
}

#[tokio::test]
async fn forgotten_and_evicted_runs_are_no_longer_known() {
    let mut config = fast_config();
    config.state.retained_runs = 2;
    let orchestrator =
        Orchestrator::new(config, Arc::new(ScriptedExecutor::new()));

    let first = orchestrator.run(request(&["a.com"])).await.unwrap();
    let second = orchestrator.run(request(&["b.com"])).await.unwrap();
    assert!(orchestrator.forget_run(second.orchestration_id).await);
    assert!(!orchestrator.forget_run(second.orchestration_id).await);
    assert!(matches!(
        orchestrator.export_audit_log(second.orchestration_id).await,
        Err(EngineError::UnknownOrchestration(_))
    ));
    assert!(
        orchestrator
            .portfolio_summary(first.orchestration_id)
            .await
            .is_ok()
    );

    let third = orchestrator.run(request(&["c.com"])).await.unwrap();
    let fourth = orchestrator.run(request(&["d.com"])).await.unwrap();
    assert!(matches!(
        orchestrator.portfolio_summary(first.orchestration_id).await,
        Err(EngineError::UnknownOrchestration(_))
    ));
    for kept in [third.orchestration_id, fourth.orchestration_id] {
        assert!(orchestrator.export_audit_log(kept).await.is_ok());
    }
}
