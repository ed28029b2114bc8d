use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    DeploymentExecutor, ExecutionOutcome, ExecutionRequest, ExecutorOperation,
};
use crate::config::ExecutorConfig;
use crate::error::{EngineError, Result};

/// Executor that shells out to the deployment backend's CLI.
///
/// Each operation maps to an argv template. Placeholders: `{domain}`,
/// `{environment}` and `{param.<name>}`.
pub struct CommandExecutor {
    commands: BTreeMap<ExecutorOperation, Vec<String>>,
    retryable_patterns: Vec<Regex>,
    working_dir: Option<PathBuf>,
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("operations", &self.commands.keys().collect::<Vec<_>>())
            .field("retryable_pattern_count", &self.retryable_patterns.len())
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

impl CommandExecutor {
    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        let retryable_patterns = config
            .retryable_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    EngineError::Validation(format!(
                        "invalid retryable pattern '{pattern}': {err}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for (operation, argv) in &config.commands {
            if argv.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(EngineError::Validation(format!(
                    "command template for {operation} has no program"
                )));
            }
        }

        Ok(Self {
            commands: config.commands.clone(),
            retryable_patterns,
            working_dir: config.working_dir.clone(),
        })
    }

    fn render(
        template: &[String],
        request: &ExecutionRequest,
    ) -> std::result::Result<Vec<String>, String> {
        template
            .iter()
            .map(|arg| Self::render_arg(arg, request))
            .collect()
    }

    fn render_arg(
        arg: &str,
        request: &ExecutionRequest,
    ) -> std::result::Result<String, String> {
        let base = arg
            .replace("{domain}", request.domain.as_str())
            .replace("{environment}", request.environment.as_str());

        let mut rendered = String::with_capacity(base.len());
        let mut rest = base.as_str();
        while let Some(start) = rest.find("{param.") {
            rendered.push_str(&rest[..start]);
            let tail = &rest[start + "{param.".len()..];
            let Some(end) = tail.find('}') else {
                return Err(format!("unterminated placeholder in '{arg}'"));
            };
            let name = &tail[..end];
            let value = request
                .param(name)
                .ok_or_else(|| format!("missing parameter '{name}'"))?;
            rendered.push_str(value);
            rest = &tail[end + 1..];
        }
        rendered.push_str(rest);

        Ok(rendered)
    }

    fn is_retryable(&self, stderr: &str) -> bool {
        self.retryable_patterns
            .iter()
            .any(|pattern| pattern.is_match(stderr))
    }
}

#[async_trait]
impl DeploymentExecutor for CommandExecutor {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let Some(template) = self.commands.get(&request.operation) else {
            return ExecutionOutcome::fatal(format!(
                "no command configured for {}",
                request.operation
            ));
        };

        let argv = match Self::render(template, &request) {
            Ok(argv) => argv,
            Err(reason) => return ExecutionOutcome::fatal(reason),
        };
        let Some((program, args)) = argv.split_first() else {
            return ExecutionOutcome::fatal("empty command template");
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(
            target: "edgeship::executor",
            operation = %request.operation,
            domain = %request.domain,
            program = %program,
            "spawning executor command"
        );

        let output =
            match tokio::time::timeout(request.timeout, command.output()).await
            {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => {
                    return ExecutionOutcome::fatal(format!(
                        "failed to spawn '{program}': {err}"
                    ));
                }
                Err(_) => {
                    warn!(
                        target: "edgeship::executor",
                        operation = %request.operation,
                        domain = %request.domain,
                        "executor command timed out"
                    );
                    return ExecutionOutcome::timed_out(request.timeout);
                }
            };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            return ExecutionOutcome::success(stdout.trim());
        }

        let detail = match output.status.code() {
            Some(code) => format!("exit status {code}: {}", stderr.trim()),
            None => format!("terminated by signal: {}", stderr.trim()),
        };
        ExecutionOutcome {
            success: false,
            output: stdout.trim().to_string(),
            retryable: self.is_retryable(&stderr),
            error_detail: Some(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use edgeship_model::{DomainName, Environment};

    use super::*;

    fn request(operation: ExecutorOperation) -> ExecutionRequest {
        ExecutionRequest::new(
            operation,
            DomainName::new("a.com"),
            Environment::parse("staging").unwrap(),
            Duration::from_secs(5),
        )
    }

    fn executor(
        commands: &[(ExecutorOperation, Vec<&str>)],
    ) -> CommandExecutor {
        let config = ExecutorConfig {
            commands: commands
                .iter()
                .map(|(op, argv)| {
                    (*op, argv.iter().map(|s| s.to_string()).collect())
                })
                .collect(),
            ..ExecutorConfig::default()
        };
        CommandExecutor::from_config(&config).unwrap()
    }

    #[test]
    fn renders_placeholders() {
        let request = request(ExecutorOperation::CreateDatabase)
            .with_param("name", "a-com-staging");
        let argv = CommandExecutor::render(
            &[
                "db".to_string(),
                "create".to_string(),
                "{param.name}".to_string(),
                "--env={environment}".to_string(),
                "--host={domain}".to_string(),
            ],
            &request,
        )
        .unwrap();
        assert_eq!(
            argv,
            vec!["db", "create", "a-com-staging", "--env=staging", "--host=a.com"]
        );
    }

    #[test]
    fn missing_param_is_reported() {
        let request = request(ExecutorOperation::CreateDatabase);
        let err =
            CommandExecutor::render(&["{param.name}".to_string()], &request)
                .unwrap_err();
        assert!(err.contains("name"));
    }

    #[test]
    fn rejects_invalid_patterns() {
        let config = ExecutorConfig {
            retryable_patterns: vec!["(".to_string()],
            ..ExecutorConfig::default()
        };
        assert!(CommandExecutor::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn unconfigured_operation_is_fatal() {
        let executor = executor(&[]);
        let outcome = executor
            .execute(request(ExecutorOperation::DeployArtifact))
            .await;
        assert!(!outcome.success);
        assert!(!outcome.retryable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn classifies_command_results() {
        let executor = executor(&[
            (ExecutorOperation::HealthCheck, vec!["sh", "-c", "echo healthy"]),
            (
                ExecutorOperation::DeployArtifact,
                vec!["sh", "-c", "echo 'HTTP 503 from upstream' >&2; exit 1"],
            ),
            (
                ExecutorOperation::CreateDatabase,
                vec!["sh", "-c", "echo 'permission denied' >&2; exit 2"],
            ),
        ]);

        let ok = executor.execute(request(ExecutorOperation::HealthCheck)).await;
        assert!(ok.success);
        assert_eq!(ok.output, "healthy");

        let transient = executor
            .execute(request(ExecutorOperation::DeployArtifact))
            .await;
        assert!(!transient.success);
        assert!(transient.retryable);

        let fatal = executor
            .execute(request(ExecutorOperation::CreateDatabase))
            .await;
        assert!(!fatal.success);
        assert!(!fatal.retryable);
        assert!(fatal.detail().contains("permission denied"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_is_retryable() {
        let executor = executor(&[(
            ExecutorOperation::HealthCheck,
            vec!["sh", "-c", "sleep 5"],
        )]);
        let mut request = request(ExecutorOperation::HealthCheck);
        request.timeout = Duration::from_millis(50);
        let outcome = executor.execute(request).await;
        assert!(!outcome.success);
        assert!(outcome.retryable);
    }
}
