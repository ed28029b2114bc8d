use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Hostname of one independently deployable target.
///
/// Construction only normalises (trim + lowercase); syntax is checked by
/// [`DomainName::validate`] so that a malformed name fails its own
/// VALIDATION phase instead of the whole run.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DomainName(String);

impl DomainName {
    pub fn new(raw: impl AsRef<str>) -> Self {
        DomainName(raw.as_ref().trim().to_ascii_lowercase())
    }

    /// Parse and validate in one step.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let name = Self::new(raw);
        name.validate()?;
        Ok(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Filesystem/resource friendly form: `api.example.com` -> `api-example-com`.
    pub fn slug(&self) -> String {
        self.0.replace('.', "-")
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason| ModelError::InvalidDomain {
            name: self.0.clone(),
            reason,
        };

        if self.0.is_empty() {
            return Err(invalid("empty"));
        }
        if self.0.len() > MAX_DOMAIN_LEN {
            return Err(invalid("longer than 253 characters"));
        }
        if !self.0.contains('.') {
            return Err(invalid("missing top-level label"));
        }

        for label in self.0.split('.') {
            if label.is_empty() {
                return Err(invalid("empty label"));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(invalid("label longer than 63 characters"));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(invalid("label starts or ends with '-'"));
            }
            if !label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
            {
                return Err(invalid("label contains invalid characters"));
            }
        }

        Ok(())
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DomainName {
    fn from(value: &str) -> Self {
        DomainName::new(value)
    }
}

/// Deployment environment (`production`, `staging`, ...).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let value = raw.as_ref().trim().to_ascii_lowercase();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Environment(value))
        } else {
            Err(ModelError::InvalidEnvironment(raw.as_ref().to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Environment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_case_and_whitespace() {
        let name = DomainName::new("  API.Example.COM ");
        assert_eq!(name.as_str(), "api.example.com");
        assert_eq!(name.slug(), "api-example-com");
        assert!(name.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_names() {
        for raw in ["", "localhost", "a..com", "-a.com", "a_b.com"] {
            assert!(
                DomainName::parse(raw).is_err(),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn environment_rejects_spaces() {
        assert!(Environment::parse("production").is_ok());
        assert!(Environment::parse("prod env").is_err());
        assert!(Environment::parse("   ").is_err());
    }
}
