//! Database lifecycle: existence check, create, migrate, record.

use std::collections::HashMap;

use edgeship_model::{
    AuditEvent, AuditEventType, DeploymentError, DomainName, Environment,
    ErrorKind, Phase,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::ResourceContext;
use crate::artifacts::ConfigPatch;
use crate::config::DatabaseConfig;
use crate::executor::{ExecutionOutcome, ExecutorOperation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum MigrationStatus {
    NotRequested,
    Applied,
    /// Gave up after retries; the database itself is usable.
    Failed(String),
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::NotRequested => "not_requested",
            MigrationStatus::Applied => "applied",
            MigrationStatus::Failed(_) => "failed",
        }
    }
}

/// What the manager knows about one domain+environment database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRecord {
    pub name: String,
    pub id: Option<String>,
    pub domain: DomainName,
    pub environment: Environment,
    /// Created by this manager (as opposed to found already present).
    pub created: bool,
    pub migrations: MigrationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Explicit name; rendered from the name template when unset.
    pub name: Option<String>,
    pub apply_migrations: Option<bool>,
    pub migrate_existing: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOutcome {
    pub record: DatabaseRecord,
    /// Non-fatal findings to surface on the domain.
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct DatabaseManager {
    config: DatabaseConfig,
    registry: Mutex<HashMap<(DomainName, Environment), DatabaseRecord>>,
}

enum Existence {
    Absent,
    Present { id: Option<String> },
}

impl DatabaseManager {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn database_name(
        &self,
        domain: &DomainName,
        environment: &Environment,
    ) -> String {
        self.config
            .name_template
            .replace("{slug}", &domain.slug())
            .replace("{domain}", domain.as_str())
            .replace("{environment}", environment.as_str())
    }

    pub async fn record(
        &self,
        domain: &DomainName,
        environment: &Environment,
    ) -> Option<DatabaseRecord> {
        self.registry
            .lock()
            .await
            .get(&(domain.clone(), environment.clone()))
            .cloned()
    }

    /// Forget a database after it was deleted by rollback.
    pub async fn forget(&self, domain: &DomainName, environment: &Environment) {
        self.registry
            .lock()
            .await
            .remove(&(domain.clone(), environment.clone()));
    }

    /// Make sure the domain's database exists; never creates twice.
    pub async fn ensure(
        &self,
        ctx: &ResourceContext,
        domain: &DomainName,
        environment: &Environment,
        options: &DatabaseOptions,
    ) -> Result<DatabaseOutcome, DeploymentError> {
        let mut warnings = Vec::new();
        let requested = options
            .name
            .clone()
            .unwrap_or_else(|| self.database_name(domain, environment));

        let name = match self.record(domain, environment).await {
            Some(known) if known.name != requested => {
                let message = format!(
                    "existing database {} does not match requested name {}",
                    known.name, requested
                );
                if ctx.automated {
                    return Err(DeploymentError::new(
                        ErrorKind::ResourceReuseConflict,
                        message,
                    ));
                }
                warn!(
                    target: "edgeship::resources",
                    domain = %domain,
                    existing = %known.name,
                    requested = %requested,
                    "database reuse conflict; keeping existing database"
                );
                ctx.audit(
                    AuditEvent::for_domain(
                        ctx.store.orchestration_id(),
                        domain.clone(),
                        AuditEventType::ResourceWarning,
                    )
                    .with_detail("resource", "database")
                    .with_detail("conflict", message.clone()),
                )
                .await;
                warnings.push(message);
                known.name
            }
            _ => requested,
        };

        let probe = ctx
            .request(ExecutorOperation::CheckDatabaseExists, domain, environment)
            .with_param("name", name.clone());
        let probe = ctx.call(Phase::Database, probe).await;
        if !probe.succeeded() {
            return Err(probe.to_error("database existence check failed"));
        }

        let apply_migrations = options
            .apply_migrations
            .unwrap_or(self.config.apply_migrations);
        let migrate_existing = options
            .migrate_existing
            .unwrap_or(self.config.migrate_existing);

        let (id, created, migrate) = match parse_existence(&probe.outcome) {
            Existence::Present { id } => {
                info!(
                    target: "edgeship::resources",
                    domain = %domain,
                    database = %name,
                    "reusing existing database"
                );
                ctx.audit(
                    AuditEvent::for_domain(
                        ctx.store.orchestration_id(),
                        domain.clone(),
                        AuditEventType::ResourceReused,
                    )
                    .with_detail("resource", "database")
                    .with_detail("name", name.clone())
                    .with_detail("id", id.clone().map_or(Value::Null, Value::from)),
                )
                .await;
                (id, false, apply_migrations && migrate_existing)
            }
            Existence::Absent => {
                let create = ctx
                    .request(ExecutorOperation::CreateDatabase, domain, environment)
                    .with_param("name", name.clone());
                let created = ctx.call(Phase::Database, create).await;
                if !created.succeeded() {
                    return Err(created.to_error("database creation failed"));
                }
                let id = parse_created_id(&created.outcome);
                info!(
                    target: "edgeship::resources",
                    domain = %domain,
                    database = %name,
                    id = ?id,
                    attempts = created.attempts,
                    "database created"
                );
                ctx.audit(
                    AuditEvent::for_domain(
                        ctx.store.orchestration_id(),
                        domain.clone(),
                        AuditEventType::ResourceCreated,
                    )
                    .with_detail("resource", "database")
                    .with_detail("name", name.clone())
                    .with_detail("id", id.clone().map_or(Value::Null, Value::from))
                    .with_detail("attempts", created.attempts),
                )
                .await;
                (id, true, apply_migrations)
            }
        };

        let migrations = if migrate {
            self.migrate(ctx, domain, environment, &name, &mut warnings)
                .await
        } else {
            MigrationStatus::NotRequested
        };

        let record = DatabaseRecord {
            name,
            id,
            domain: domain.clone(),
            environment: environment.clone(),
            created,
            migrations,
        };

        if !ctx.dry_run {
            let mut patch = ConfigPatch::new();
            patch.insert("database_name".into(), record.name.clone());
            if let Some(id) = &record.id {
                patch.insert("database_id".into(), id.clone());
            }
            if let Err(err) = ctx.writer.update(domain, environment, &patch).await {
                let mut error = DeploymentError::new(
                    ErrorKind::ConfigArtifact,
                    "could not record database in config artifact",
                );
                error = if record.created {
                    error.with_detail(format!(
                        "{err}; database {} was created and left in place",
                        record.name
                    ))
                } else {
                    error.with_detail(err.to_string())
                };
                return Err(error);
            }
        }

        if !ctx.dry_run {
            self.registry.lock().await.insert(
                (domain.clone(), environment.clone()),
                record.clone(),
            );
        }

        Ok(DatabaseOutcome { record, warnings })
    }

    async fn migrate(
        &self,
        ctx: &ResourceContext,
        domain: &DomainName,
        environment: &Environment,
        name: &str,
        warnings: &mut Vec<String>,
    ) -> MigrationStatus {
        let mut request = ctx
            .request(ExecutorOperation::ApplyMigrations, domain, environment)
            .with_param("name", name);
        if let Some(dir) = &self.config.migrations_dir {
            request = request.with_param("migrationsDir", dir.display().to_string());
        }

        let result = ctx.call(Phase::Database, request).await;
        if result.succeeded() {
            return MigrationStatus::Applied;
        }

        let detail = result.outcome.detail().to_string();
        let (warning, reason) = if result.cancelled {
            (
                format!(
                    "migrations for {name} interrupted after {} attempt(s): run cancelled",
                    result.attempts
                ),
                "cancelled",
            )
        } else {
            (
                format!(
                    "migrations for {name} failed after {} attempt(s): {detail}",
                    result.attempts
                ),
                "failed",
            )
        };
        warn!(
            target: "edgeship::resources",
            domain = %domain,
            database = %name,
            attempts = result.attempts,
            reason,
            detail = %detail,
            "migrations not applied; continuing without them"
        );
        ctx.audit(
            AuditEvent::for_domain(
                ctx.store.orchestration_id(),
                domain.clone(),
                AuditEventType::ResourceWarning,
            )
            .with_detail("resource", "database")
            .with_detail("operation", ExecutorOperation::ApplyMigrations.as_str())
            .with_detail("reason", reason)
            .with_detail("attempts", result.attempts)
            .with_detail("detail", detail.clone()),
        )
        .await;
        warnings.push(warning);
        if result.cancelled {
            return MigrationStatus::Failed("run cancelled".to_string());
        }
        MigrationStatus::Failed(detail)
    }
}

const ABSENT_MARKERS: &[&str] =
    &["", "false", "no", "0", "absent", "missing", "not found", "none"];

/// Interpret a `checkDatabaseExists` answer: JSON `{"exists", "id"}` or a
/// single line that is either an absent marker, `true`, or the id.
fn parse_existence(outcome: &ExecutionOutcome) -> Existence {
    if let Some(exists) = outcome.json_field("exists") {
        let id = outcome
            .json_field("id")
            .and_then(|v| v.as_str().map(str::to_string));
        return match exists.as_bool() {
            Some(true) => Existence::Present { id },
            _ => Existence::Absent,
        };
    }
    if let Some(Value::String(id)) = outcome.json_field("id") {
        return Existence::Present { id: Some(id) };
    }

    let line = outcome.first_line().unwrap_or_default().to_ascii_lowercase();
    if ABSENT_MARKERS.contains(&line.as_str()) {
        Existence::Absent
    } else if matches!(line.as_str(), "true" | "yes" | "exists" | "present") {
        Existence::Present { id: None }
    } else {
        Existence::Present {
            id: outcome.first_line().map(str::to_string),
        }
    }
}

fn parse_created_id(outcome: &ExecutionOutcome) -> Option<String> {
    ["id", "databaseId", "uuid"]
        .iter()
        .find_map(|key| {
            outcome
                .json_field(key)
                .and_then(|v| v.as_str().map(str::to_string))
        })
        .or_else(|| {
            let is_object = serde_json::from_str::<Value>(outcome.output.trim())
                .is_ok_and(|value| value.is_object());
            if is_object {
                None
            } else {
                outcome.first_line().map(str::to_string)
            }
        })
}
