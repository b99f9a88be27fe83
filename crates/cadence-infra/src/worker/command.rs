//! Shell-command workers.
//!
//! Each role maps to a shell command. A task runs the command through
//! `sh -c` with the payload on stdin; stdout becomes the step output. A
//! non-zero exit status fails the step with the trimmed stderr.

use std::collections::HashMap;
use std::time::Duration;

use cadence_core::worker::{BoxWorker, Worker, WorkerError, WorkerFactory};
use cadence_types::workflow::WorkflowDefinition;
use tokio::io::AsyncWriteExt;

/// Default per-task timeout for command workers.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Environment variable carrying the role to the spawned command.
pub const ROLE_ENV_VAR: &str = "CADENCE_ROLE";

/// What to do for a role that has no configured command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Fallback {
    /// Refuse to create a worker.
    #[default]
    Unavailable,
    /// Return the payload unchanged (dry runs).
    Echo,
    /// Run this command for every unmapped role.
    Command(String),
}

/// Creates `CommandWorker`s from a role -> command table.
#[derive(Debug, Clone)]
pub struct CommandWorkerFactory {
    commands: HashMap<String, String>,
    fallback: Fallback,
    timeout: Duration,
}

impl CommandWorkerFactory {
    pub fn new(commands: HashMap<String, String>) -> Self {
        Self {
            commands,
            fallback: Fallback::default(),
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Build the command table from the `agents` section of a definition.
    pub fn from_definition(definition: &WorkflowDefinition) -> Self {
        let commands = definition
            .agents
            .iter()
            .filter_map(|(role, profile)| {
                profile
                    .command
                    .as_ref()
                    .map(|cmd| (role.clone(), cmd.clone()))
            })
            .collect();
        Self::new(commands)
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        roles.sort_unstable();
        roles
    }
}

impl WorkerFactory for CommandWorkerFactory {
    fn create(&self, role: &str) -> Result<BoxWorker, WorkerError> {
        let command = match (self.commands.get(role), &self.fallback) {
            (Some(cmd), _) => cmd.clone(),
            (None, Fallback::Command(cmd)) => cmd.clone(),
            (None, Fallback::Echo) => {
                tracing::debug!(role, "no command configured, using echo worker");
                return Ok(BoxWorker::new(EchoWorker {
                    role: role.to_string(),
                }));
            }
            (None, Fallback::Unavailable) => {
                return Err(WorkerError::Unavailable(role.to_string()));
            }
        };
        Ok(BoxWorker::new(CommandWorker {
            role: role.to_string(),
            command,
            timeout: self.timeout,
        }))
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Runs one shell command per task.
pub struct CommandWorker {
    role: String,
    command: String,
    timeout: Duration,
}

impl CommandWorker {
    fn failed(&self, message: impl Into<String>) -> WorkerError {
        WorkerError::Failed {
            worker: self.role.clone(),
            message: message.into(),
        }
    }
}

impl Worker for CommandWorker {
    fn id(&self) -> &str {
        &self.role
    }

    async fn run(&self, payload: &str) -> Result<String, WorkerError> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(ROLE_ENV_VAR, &self.role)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(format!("failed to spawn `{}`: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores stdin may close the pipe early.
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                tracing::debug!(role = self.role.as_str(), error = %e, "stdin write failed");
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| self.failed(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| self.failed(format!("failed to wait for command: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failed(format!(
                "command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| self.failed("command output is not valid UTF-8"))
    }
}

/// Returns its payload unchanged.
pub struct EchoWorker {
    role: String,
}

impl Worker for EchoWorker {
    fn id(&self) -> &str {
        &self.role
    }

    async fn run(&self, payload: &str) -> Result<String, WorkerError> {
        Ok(payload.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn factory(pairs: &[(&str, &str)]) -> CommandWorkerFactory {
        CommandWorkerFactory::new(
            pairs
                .iter()
                .map(|(r, c)| (r.to_string(), c.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_command_reads_payload_from_stdin() {
        let worker = factory(&[("dev", "tr a-z A-Z")]).create("dev").unwrap();
        assert_eq!(worker.id(), "dev");
        assert_eq!(worker.run("ship it").await.unwrap(), "SHIP IT");
    }

    #[tokio::test]
    async fn test_role_is_exported_to_command() {
        let worker = factory(&[("qa", "cat >/dev/null; printf %s \"$CADENCE_ROLE\"")])
            .create("qa")
            .unwrap();
        assert_eq!(worker.run("x").await.unwrap(), "qa");
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_stderr() {
        let worker = factory(&[("dev", "echo broken >&2; exit 3")])
            .create("dev")
            .unwrap();
        let err = worker.run("x").await.unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("worker 'dev' failed"), "{text}");
        assert!(text.contains("broken"), "{text}");
    }

    #[tokio::test]
    async fn test_timeout() {
        let worker = factory(&[("slow", "sleep 5")])
            .with_timeout(Duration::from_millis(100))
            .create("slow")
            .unwrap();
        let err = worker.run("").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_fallbacks() {
        let none = factory(&[]);
        assert!(matches!(
            none.create("pm"),
            Err(WorkerError::Unavailable(role)) if role == "pm"
        ));

        let echo = factory(&[]).with_fallback(Fallback::Echo);
        assert_eq!(echo.create("pm").unwrap().run("hi").await.unwrap(), "hi");

        let shared = factory(&[]).with_fallback(Fallback::Command("wc -c".into()));
        let out = shared.create("pm").unwrap().run("abc").await.unwrap();
        assert_eq!(out.trim(), "3");
    }

    #[test]
    fn test_from_definition_uses_agent_commands() {
        let def: WorkflowDefinition = serde_json::from_value(serde_json::json!({
            "id": "wf",
            "name": "wf",
            "version": "1",
            "agents": {
                "dev": {"command": "cat"},
                "pm": {"description": "no command"}
            },
            "steps": []
        }))
        .unwrap();
        let f = CommandWorkerFactory::from_definition(&def);
        assert_eq!(f.roles(), vec!["dev"]);
    }
}
