//! Structured process execution.
//!
//! Every create, teardown, and verify step shells out to `kubectl`, `docker`,
//! `helm`, or a sample script. Commands are built as argument lists and handed
//! to a `ProcessRunner`; nothing is ever concatenated into a shell string.
//! A non-zero exit code is the only failure signal the harness inspects.

use crate::error::ProvisionError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default bound for a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// A command as a program plus argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    /// True if the command line starts with `program` followed by `prefix`.
    #[must_use]
    pub fn matches(&self, program: &str, prefix: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

/// Rendered for logs and error messages only; never executed as a string.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into `ProvisionError::CommandFailed`.
    pub fn ensure_success(self, command: &CommandSpec) -> Result<Self, ProvisionError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProvisionError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs commands on behalf of the harness.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn exec(&self, command: &CommandSpec) -> Result<ExecResult, ProcessError>;
}

/// Run `command` and require a zero exit.
pub async fn exec_checked(
    runner: &dyn ProcessRunner,
    command: &CommandSpec,
) -> Result<ExecResult, ProvisionError> {
    runner.exec(command).await?.ensure_success(command)
}

/// Runs commands as child processes of the test binary.
#[derive(Debug, Clone)]
pub struct SystemProcessRunner {
    default_timeout: Duration,
}

impl Default for SystemProcessRunner {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl SystemProcessRunner {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn exec(&self, command: &CommandSpec) -> Result<ExecResult, ProcessError> {
        let timeout = command.timeout.unwrap_or(self.default_timeout);
        let mut child = tokio::process::Command::new(&command.program);
        child
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            child.current_dir(dir);
        }

        debug!(target: "harness.process", command = %command, timeout = ?timeout, "Executing command");

        let output = tokio::time::timeout(timeout, child.output())
            .await
            .map_err(|_| ProcessError::TimedOut {
                command: command.to_string(),
                timeout,
            })?
            .map_err(|source| ProcessError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let result = ExecResult {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            target: "harness.process",
            command = %command,
            exit_code = result.exit_code,
            "Command finished"
        );

        Ok(result)
    }
}

/// Scripted process runner for unit tests.
///
/// Rules are matched in insertion order against program and argument prefix;
/// the first match decides the result. Unmatched commands succeed with empty
/// output. Every command is recorded.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    struct Rule {
        program: String,
        prefix: Vec<String>,
        result: ExecResult,
    }

    #[derive(Default)]
    pub struct MockProcessRunner {
        rules: Mutex<Vec<Rule>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl MockProcessRunner {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Return `result` for commands starting with `program prefix...`.
        #[must_use]
        pub fn on(self, program: &str, prefix: &[&str], result: ExecResult) -> Self {
            self.rules
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(Rule {
                    program: program.to_string(),
                    prefix: prefix.iter().map(|s| (*s).to_string()).collect(),
                    result,
                });
            self
        }

        /// Commands executed so far, in order.
        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }

        /// Rendered command lines executed so far.
        pub fn command_lines(&self) -> Vec<String> {
            self.calls().iter().map(ToString::to_string).collect()
        }

        pub fn call_count(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .len()
        }
    }

    #[async_trait]
    impl ProcessRunner for MockProcessRunner {
        async fn exec(&self, command: &CommandSpec) -> Result<ExecResult, ProcessError> {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(command.clone());

            let rules = self
                .rules
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let prefix_matches = |rule: &&Rule| {
                let prefix: Vec<&str> = rule.prefix.iter().map(String::as_str).collect();
                command.matches(&rule.program, &prefix)
            };
            Ok(rules
                .iter()
                .find(prefix_matches)
                .map(|rule| rule.result.clone())
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::mock::MockProcessRunner;
    use super::*;

    #[test]
    fn test_display_quotes_whitespace_args() {
        let cmd = CommandSpec::new("kubectl")
            .args(["patch", "domain", "domain1"])
            .arg("-p")
            .arg(r#"{"spec": {}}"#);
        assert_eq!(cmd.to_string(), r#"kubectl patch domain domain1 -p '{"spec": {}}'"#);
    }

    #[test]
    fn test_matches_prefix() {
        let cmd = CommandSpec::new("docker").args(["image", "ls", "weblogic:12"]);
        assert!(cmd.matches("docker", &["image", "ls"]));
        assert!(cmd.matches("docker", &[]));
        assert!(!cmd.matches("docker", &["image", "rm"]));
        assert!(!cmd.matches("kubectl", &["image"]));
    }

    #[test]
    fn test_ensure_success_maps_exit_code() {
        let cmd = CommandSpec::new("sh").arg("build.sh");
        let err = ExecResult::failed(3, "boom").ensure_success(&cmd).unwrap_err();
        match err {
            ProvisionError::CommandFailed {
                command,
                exit_code,
                stderr,
                ..
            } => {
                assert_eq!(command, "sh build.sh");
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_first_matching_rule_wins() {
        let runner = MockProcessRunner::new()
            .on("kubectl", &["get", "pod"], ExecResult::ok("first"))
            .on("kubectl", &["get"], ExecResult::ok("second"));

        let pod = CommandSpec::new("kubectl").args(["get", "pod", "x"]);
        let svc = CommandSpec::new("kubectl").args(["get", "svc", "x"]);
        let other = CommandSpec::new("helm").arg("list");

        assert_eq!(runner.exec(&pod).await.unwrap().stdout, "first");
        assert_eq!(runner.exec(&svc).await.unwrap().stdout, "second");
        assert!(runner.exec(&other).await.unwrap().success());
        assert_eq!(runner.call_count(), 3);
        assert_eq!(runner.command_lines()[2], "helm list");
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let runner = SystemProcessRunner::default();
        let cmd = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 4"]);
        let result = runner.exec(&cmd).await.unwrap();
        assert_eq!(result.exit_code, 4);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_system_runner_times_out() {
        let runner = SystemProcessRunner::new(Duration::from_millis(100));
        let cmd = CommandSpec::new("sleep").arg("5");
        let err = runner.exec(&cmd).await.unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_system_runner_spawn_failure() {
        let runner = SystemProcessRunner::default();
        let cmd = CommandSpec::new("definitely-not-a-real-binary-4f1c");
        let err = runner.exec(&cmd).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
