use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one orchestration run (one portfolio).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct OrchestrationId(pub Uuid);

impl Default for OrchestrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestrationId {
    pub fn new() -> Self {
        OrchestrationId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl AsRef<Uuid> for OrchestrationId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for OrchestrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one domain's deployment pipeline inside a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeploymentId(pub Uuid);

impl Default for DeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentId {
    pub fn new() -> Self {
        DeploymentId(Uuid::now_v7())
    }

    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
