//! The six phase bodies.
//!
//! Each step maps `(domain, environment, prior outputs)` to a
//! [`PhaseResult`]. Steps never touch the store's domain state directly;
//! the pipeline applies their rollback actions, metadata and warnings.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use edgeship_model::{
    DeploymentError, DomainName, Environment, Phase, RollbackAction,
    RollbackKind, metadata_keys,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::artifacts::ConfigPatch;
use crate::executor::ExecutorOperation;
use crate::resources::{
    DatabaseManager, DatabaseOptions, DatabaseRecord, ResourceContext,
    SecretBundle, SecretManager, SecretOptions,
};
use crate::retry::RetryPolicy;

/// Per-run inputs shared by all phase steps.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Environments a run may target. Empty allows any.
    pub allowed_environments: Vec<String>,
    pub default_artifact: Option<String>,
    pub domain_artifacts: BTreeMap<DomainName, String>,
    pub database: DatabaseOptions,
    /// Per-domain database names overriding the name template.
    pub database_names: BTreeMap<DomainName, String>,
    pub secrets: SecretOptions,
    pub health_check: RetryPolicy,
}

impl PipelineSettings {
    pub fn artifact_for(&self, domain: &DomainName) -> Option<&str> {
        self.domain_artifacts
            .get(domain)
            .or(self.default_artifact.as_ref())
            .map(String::as_str)
    }

    pub fn database_options_for(&self, domain: &DomainName) -> DatabaseOptions {
        let mut options = self.database.clone();
        if let Some(name) = self.database_names.get(domain) {
            options.name = Some(name.clone());
        }
        options
    }
}

#[derive(Debug)]
pub struct PhaseContext<'a> {
    pub domain: &'a DomainName,
    pub environment: &'a Environment,
    pub resources: &'a ResourceContext,
    pub settings: &'a PipelineSettings,
}

/// Values earlier phases hand to later ones.
#[derive(Debug, Clone, Default)]
pub struct PhaseOutputs {
    pub artifact: Option<String>,
    pub database: Option<DatabaseRecord>,
    pub secrets: Option<SecretBundle>,
    pub deployment_url: Option<String>,
}

/// A successful phase: what to undo, what to remember, what to flag.
#[derive(Debug, Clone, Default)]
pub struct PhaseSuccess {
    pub rollback_actions: Vec<RollbackAction>,
    pub metadata: BTreeMap<String, Value>,
    pub warnings: Vec<String>,
}

impl PhaseSuccess {
    fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    fn with_rollback(mut self, action: RollbackAction) -> Self {
        self.rollback_actions.push(action);
        self
    }
}

pub type PhaseResult = Result<PhaseSuccess, DeploymentError>;

#[async_trait]
pub trait PhaseStep: Send + Sync {
    fn phase(&self) -> Phase;

    async fn execute(
        &self,
        ctx: &PhaseContext<'_>,
        outputs: &mut PhaseOutputs,
    ) -> PhaseResult;
}

/// Pure input checks; nothing external is touched.
#[derive(Debug, Default)]
pub struct ValidationStep;

#[async_trait]
impl PhaseStep for ValidationStep {
    fn phase(&self) -> Phase {
        Phase::Validation
    }

    async fn execute(
        &self,
        ctx: &PhaseContext<'_>,
        _outputs: &mut PhaseOutputs,
    ) -> PhaseResult {
        ctx.domain
            .validate()
            .map_err(|err| DeploymentError::validation(err.to_string()))?;

        let allowed = &ctx.settings.allowed_environments;
        if !allowed.is_empty()
            && !allowed.iter().any(|env| env == ctx.environment.as_str())
        {
            return Err(DeploymentError::validation(format!(
                "environment {} is not allowed for this run",
                ctx.environment
            )));
        }

        match ctx.settings.artifact_for(ctx.domain) {
            Some(artifact) if !artifact.trim().is_empty() => {
                Ok(PhaseSuccess::default())
            }
            _ => Err(DeploymentError::validation(format!(
                "no deployment artifact configured for {}",
                ctx.domain
            ))),
        }
    }
}

/// Resolves names and artifact references for the later phases.
#[derive(Debug)]
pub struct InitializationStep {
    databases: Arc<DatabaseManager>,
}

impl InitializationStep {
    pub fn new(databases: Arc<DatabaseManager>) -> Self {
        Self { databases }
    }
}

#[async_trait]
impl PhaseStep for InitializationStep {
    fn phase(&self) -> Phase {
        Phase::Initialization
    }

    async fn execute(
        &self,
        ctx: &PhaseContext<'_>,
        outputs: &mut PhaseOutputs,
    ) -> PhaseResult {
        let artifact = ctx
            .settings
            .artifact_for(ctx.domain)
            .map(str::to_string)
            .ok_or_else(|| {
                DeploymentError::validation("deployment artifact disappeared")
            })?;
        let database_name = ctx
            .settings
            .database_options_for(ctx.domain)
            .name
            .unwrap_or_else(|| {
                self.databases.database_name(ctx.domain, ctx.environment)
            });

        outputs.artifact = Some(artifact.clone());
        Ok(PhaseSuccess::default()
            .with_metadata(metadata_keys::ARTIFACT, artifact)
            .with_metadata(metadata_keys::DATABASE_NAME, database_name))
    }
}

#[derive(Debug)]
pub struct DatabaseStep {
    databases: Arc<DatabaseManager>,
}

impl DatabaseStep {
    pub fn new(databases: Arc<DatabaseManager>) -> Self {
        Self { databases }
    }
}

#[async_trait]
impl PhaseStep for DatabaseStep {
    fn phase(&self) -> Phase {
        Phase::Database
    }

    async fn execute(
        &self,
        ctx: &PhaseContext<'_>,
        outputs: &mut PhaseOutputs,
    ) -> PhaseResult {
        let options = ctx.settings.database_options_for(ctx.domain);
        let outcome = self
            .databases
            .ensure(ctx.resources, ctx.domain, ctx.environment, &options)
            .await?;
        let record = outcome.record;

        let action = if record.created {
            let mut action = RollbackAction::new(
                Phase::Database,
                ctx.domain.clone(),
                RollbackKind::DeleteDatabase,
            )
            .with_payload("name", record.name.clone());
            if let Some(id) = &record.id {
                action = action.with_payload("id", id.clone());
            }
            action
        } else {
            RollbackAction::new(
                Phase::Database,
                ctx.domain.clone(),
                RollbackKind::Noop,
            )
            .with_payload("reason", "database was reused")
            .with_payload("name", record.name.clone())
        };

        let success = PhaseSuccess {
            warnings: outcome.warnings,
            ..PhaseSuccess::default()
        }
        .with_rollback(action)
        .with_metadata(metadata_keys::DATABASE_NAME, record.name.clone())
        .with_metadata(
            metadata_keys::DATABASE_ID,
            record.id.clone().map_or(Value::Null, Value::from),
        )
        .with_metadata(metadata_keys::DATABASE_CREATED, record.created)
        .with_metadata(metadata_keys::MIGRATIONS, record.migrations.as_str());

        outputs.database = Some(record);
        Ok(success)
    }
}

#[derive(Debug)]
pub struct SecretsStep {
    secrets: Arc<SecretManager>,
}

impl SecretsStep {
    pub fn new(secrets: Arc<SecretManager>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl PhaseStep for SecretsStep {
    fn phase(&self) -> Phase {
        Phase::Secrets
    }

    async fn execute(
        &self,
        ctx: &PhaseContext<'_>,
        outputs: &mut PhaseOutputs,
    ) -> PhaseResult {
        let bundle = self
            .secrets
            .ensure(
                ctx.resources,
                ctx.domain,
                ctx.environment,
                ctx.settings.secrets,
            )
            .await?;

        if !ctx.resources.dry_run {
            let patch = ConfigPatch::from([(
                "secret_bundle_version".to_string(),
                bundle.version.to_string(),
            )]);
            ctx.resources
                .writer
                .update(ctx.domain, ctx.environment, &patch)
                .await
                .map_err(|err| {
                    DeploymentError::new(
                        edgeship_model::ErrorKind::ConfigArtifact,
                        "could not record secret bundle version",
                    )
                    .with_detail(err.to_string())
                })?;
        }

        let action = if bundle.created_keys.is_empty() {
            RollbackAction::new(
                Phase::Secrets,
                ctx.domain.clone(),
                RollbackKind::Noop,
            )
            .with_payload("reason", "no new secrets were created")
        } else {
            RollbackAction::new(
                Phase::Secrets,
                ctx.domain.clone(),
                RollbackKind::RevokeSecret,
            )
            .with_payload("keys", bundle.created_keys.join(","))
            .with_payload("version", bundle.version.to_string())
        };

        let formats: Vec<&str> = bundle
            .distribution_formats
            .iter()
            .map(|format| format.as_str())
            .collect();
        let success = PhaseSuccess::default()
            .with_rollback(action)
            .with_metadata(metadata_keys::SECRET_BUNDLE_VERSION, bundle.version)
            .with_metadata(metadata_keys::SECRETS_GENERATED, bundle.generated)
            .with_metadata(metadata_keys::SECRETS_REUSED, bundle.reused)
            .with_metadata(metadata_keys::SECRET_DISTRIBUTIONS, formats);

        outputs.secrets = Some(bundle);
        Ok(success)
    }
}

#[derive(Debug, Default)]
pub struct DeploymentStep;

#[async_trait]
impl PhaseStep for DeploymentStep {
    fn phase(&self) -> Phase {
        Phase::Deployment
    }

    async fn execute(
        &self,
        ctx: &PhaseContext<'_>,
        outputs: &mut PhaseOutputs,
    ) -> PhaseResult {
        let artifact = outputs.artifact.clone().ok_or_else(|| {
            DeploymentError::validation("initialization did not resolve an artifact")
        })?;

        let mut request = ctx
            .resources
            .request(ExecutorOperation::DeployArtifact, ctx.domain, ctx.environment)
            .with_param("artifact", artifact.clone());
        if let Some(database) = &outputs.database {
            request = request.with_param("databaseName", database.name.clone());
            if let Some(id) = &database.id {
                request = request.with_param("databaseId", id.clone());
            }
        }
        if let Some(secrets) = &outputs.secrets {
            request =
                request.with_param("secretVersion", secrets.version.to_string());
        }

        let result = ctx.resources.call(Phase::Deployment, request).await;
        if !result.succeeded() {
            return Err(result.to_error("artifact deployment failed"));
        }

        let url = result
            .outcome
            .json_field("url")
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| {
                result
                    .outcome
                    .first_line()
                    .filter(|line| line.starts_with("http"))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("https://{}", ctx.domain));
        debug!(
            target: "edgeship::pipeline",
            domain = %ctx.domain,
            url = %url,
            attempts = result.attempts,
            "artifact deployed"
        );

        let action = RollbackAction::new(
            Phase::Deployment,
            ctx.domain.clone(),
            RollbackKind::RevertDeployment,
        )
        .with_payload("artifact", artifact)
        .with_payload("url", url.clone());

        outputs.deployment_url = Some(url.clone());
        Ok(PhaseSuccess::default()
            .with_rollback(action)
            .with_metadata(metadata_keys::ARTIFACT_URL, url))
    }
}

/// Best-effort health check. Never fails the domain.
#[derive(Debug, Default)]
pub struct PostValidationStep;

#[async_trait]
impl PhaseStep for PostValidationStep {
    fn phase(&self) -> Phase {
        Phase::PostValidation
    }

    async fn execute(
        &self,
        ctx: &PhaseContext<'_>,
        outputs: &mut PhaseOutputs,
    ) -> PhaseResult {
        let url = outputs
            .deployment_url
            .clone()
            .unwrap_or_else(|| format!("https://{}", ctx.domain));
        if ctx.resources.cancel.is_cancelled() {
            return Ok(health_check_cancelled(ctx.domain, &url));
        }

        let request = ctx
            .resources
            .request(ExecutorOperation::HealthCheck, ctx.domain, ctx.environment)
            .with_param("url", url.clone());
        let result = ctx
            .resources
            .call_with(ctx.settings.health_check, Phase::PostValidation, request)
            .await;

        if result.succeeded() {
            return Ok(PhaseSuccess::default()
                .with_metadata(metadata_keys::HEALTH, "healthy"));
        }
        if result.cancelled {
            return Ok(health_check_cancelled(ctx.domain, &url));
        }

        let detail = result.outcome.detail().to_string();
        warn!(
            target: "edgeship::pipeline",
            domain = %ctx.domain,
            url = %url,
            attempts = result.attempts,
            detail = %detail,
            "health check failed; deployment stays live"
        );
        Ok(PhaseSuccess {
            warnings: vec![format!(
                "health check for {url} failed after {} attempt(s): {detail}",
                result.attempts
            )],
            ..PhaseSuccess::default()
        }
        .with_metadata(metadata_keys::HEALTH, "unhealthy"))
    }
}

fn health_check_cancelled(domain: &DomainName, url: &str) -> PhaseSuccess {
    warn!(
        target: "edgeship::pipeline",
        domain = %domain,
        url = %url,
        "health check skipped: run cancelled; deployment stays live"
    );
    PhaseSuccess {
        warnings: vec![format!("health check skipped for {url}: run cancelled")],
        ..PhaseSuccess::default()
    }
    .with_metadata(metadata_keys::HEALTH, "unknown")
}
