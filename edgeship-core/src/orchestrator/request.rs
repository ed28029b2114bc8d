use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Explicit run options. Unset fields fall back to [`crate::EngineConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    /// Bound on parallel domain pipelines.
    pub concurrency_limit: Option<usize>,
    /// Suppress mutating executor calls.
    pub dry_run: Option<bool>,
    /// Skip generation for secrets that already exist.
    pub reuse_existing: Option<bool>,
    /// Force regeneration of every secret.
    pub rotate_all: Option<bool>,
    /// Fail on resource reuse conflicts instead of warning.
    pub automated: Option<bool>,
    /// `(dependent, prerequisite)` pairs.
    pub dependency_edges: Vec<(String, String)>,
    /// Cancel the run after this long.
    #[serde(with = "humantime_opt")]
    pub timeout: Option<Duration>,
    /// Artifact deployed to domains without their own entry.
    pub artifact: Option<String>,
    pub domain_artifacts: BTreeMap<String, String>,
    /// Database names that replace the configured name template.
    pub database_names: BTreeMap<String, String>,
}

/// Input of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub domains: Vec<String>,
    pub environment: String,
    #[serde(default)]
    pub options: RunOptions,
}

impl RunRequest {
    pub fn new<I, S>(domains: I, environment: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            environment: environment.into(),
            options: RunOptions::default(),
        }
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.options.concurrency_limit = Some(limit);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.options.dry_run = Some(dry_run);
        self
    }

    pub fn reuse_existing(mut self, reuse: bool) -> Self {
        self.options.reuse_existing = Some(reuse);
        self
    }

    pub fn rotate_all(mut self, rotate: bool) -> Self {
        self.options.rotate_all = Some(rotate);
        self
    }

    pub fn automated(mut self, automated: bool) -> Self {
        self.options.automated = Some(automated);
        self
    }

    /// `dependent` waits for `prerequisite` to complete.
    pub fn depends_on(
        mut self,
        dependent: impl Into<String>,
        prerequisite: impl Into<String>,
    ) -> Self {
        self.options
            .dependency_edges
            .push((dependent.into(), prerequisite.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn artifact(mut self, artifact: impl Into<String>) -> Self {
        self.options.artifact = Some(artifact.into());
        self
    }

    pub fn domain_artifact(
        mut self,
        domain: impl Into<String>,
        artifact: impl Into<String>,
    ) -> Self {
        self.options
            .domain_artifacts
            .insert(domain.into(), artifact.into());
        self
    }

    pub fn database_name(
        mut self,
        domain: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.options
            .database_names
            .insert(domain.into(), name.into());
        self
    }
}

mod humantime_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer
                .serialize_str(&humantime::format_duration(*duration).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|value| {
            humantime::parse_duration(&value).map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_options() {
        let request = RunRequest::new(["a.com", "b.com"], "production")
            .concurrency_limit(1)
            .dry_run(true)
            .depends_on("b.com", "a.com")
            .artifact("dist/app.tar.gz");
        assert_eq!(request.domains, vec!["a.com", "b.com"]);
        assert_eq!(request.options.concurrency_limit, Some(1));
        assert_eq!(
            request.options.dependency_edges,
            vec![("b.com".to_string(), "a.com".to_string())]
        );
    }

    #[test]
    fn request_deserializes_with_human_timeout() {
        let request: RunRequest = serde_json::from_str(
            r#"{
                "domains": ["a.com"],
                "environment": "staging",
                "options": {
                    "dryRun": true,
                    "timeout": "90s",
                    "dependencyEdges": []
                }
            }"#,
        )
        .unwrap();
        assert_eq!(request.options.dry_run, Some(true));
        assert_eq!(request.options.timeout, Some(Duration::from_secs(90)));
    }
}
