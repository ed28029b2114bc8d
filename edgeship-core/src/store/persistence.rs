use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edgeship_model::{AuditEvent, DomainState, Environment, OrchestrationId};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

const SNAPSHOT_FILE: &str = "portfolio.json";
const AUDIT_FILE: &str = "audit.jsonl";

/// Point-in-time copy of a portfolio written by [`StatePersistence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub orchestration_id: OrchestrationId,
    pub environment: Environment,
    pub sealed: bool,
    pub captured_at: DateTime<Utc>,
    pub domains: Vec<DomainState>,
}

/// Durable backing for the state store.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()>;

    async fn append_audit(&self, event: &AuditEvent) -> Result<()>;
}

/// One directory per run holding `portfolio.json` and `audit.jsonl`.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    root: PathBuf,
}

impl FilePersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, orchestration_id: OrchestrationId) -> PathBuf {
        self.root.join(orchestration_id.to_string())
    }

    pub async fn load_snapshot(
        &self,
        orchestration_id: OrchestrationId,
    ) -> Result<Option<PortfolioSnapshot>> {
        let path = self.run_dir(orchestration_id).join(SNAPSHOT_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Replay the audit log of a past run in append order.
    pub async fn load_audit(
        &self,
        orchestration_id: OrchestrationId,
    ) -> Result<Vec<AuditEvent>> {
        let path = self.run_dir(orchestration_id).join(AUDIT_FILE);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }
}

#[async_trait]
impl StatePersistence for FilePersistence {
    async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        let dir = self.run_dir(snapshot.orchestration_id);
        self.ensure_dir(&dir).await?;

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, dir.join(SNAPSHOT_FILE)).await?;
        Ok(())
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<()> {
        let dir = self.run_dir(event.orchestration_id);
        self.ensure_dir(&dir).await?;

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(AUDIT_FILE))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use edgeship_model::{AuditEventType, DomainName, DomainStatus, Phase};

    use super::*;
    use crate::store::StateStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn store_writes_snapshot_and_audit_lines() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(FilePersistence::new(dir.path()));
        let orchestration_id = OrchestrationId::new();
        let store = StateStore::new(
            orchestration_id,
            Environment::parse("staging").unwrap(),
        )
        .with_persistence(persistence.clone());

        let domain = DomainName::new("a.com");
        store.register_domain(domain.clone()).await.unwrap();
        store
            .record_transition(
                &domain,
                Phase::Validation,
                Phase::Validation,
                DomainStatus::InProgress,
            )
            .await
            .unwrap();
        store.seal().await;

        let snapshot = persistence
            .load_snapshot(orchestration_id)
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.sealed);
        assert_eq!(snapshot.domains.len(), 1);
        assert_eq!(snapshot.domains[0].status, DomainStatus::InProgress);

        let audit = persistence.load_audit(orchestration_id).await.unwrap();
        assert_eq!(audit, store.export_audit_log().await);
        assert_eq!(audit[0].event_type, AuditEventType::DomainRegistered);
    }

    #[tokio::test]
    async fn missing_run_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::new(dir.path());
        let id = OrchestrationId::new();
        assert!(persistence.load_snapshot(id).await.unwrap().is_none());
        assert!(persistence.load_audit(id).await.unwrap().is_empty());
    }
}
