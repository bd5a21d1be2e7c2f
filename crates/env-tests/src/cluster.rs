//! Cluster connection and preflight checks.
//!
//! This module provides the `ClusterConnection` type for validating that the
//! command-line tools and the target cluster are available before any class
//! leases the cluster and starts creating resources.

use harness_core::{
    CommandSpec, HarnessConfig, KubectlClusterState, ProcessRunner, ProvisionContext,
    SystemProcessRunner,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Preflight commands should answer quickly; a hang means a broken setup.
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster connection errors.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("`{tool}` is not usable ({message}). Install it and make sure it is in PATH")]
    ToolMissing { tool: String, message: String },

    #[error("Cluster not reachable: {message}. Check KUBECONFIG and `kubectl cluster-info`")]
    ClusterUnreachable { message: String },
}

/// Tools every class needs.
pub const REQUIRED_TOOLS: [(&str, &[&str]); 3] = [
    ("kubectl", &["version", "--client"]),
    ("helm", &["version", "--short"]),
    ("docker", &["version", "--format", "{{.Client.Version}}"]),
];

/// Connection to the shared test cluster.
///
/// Holds the real process runner and the kubectl-backed state reader used by
/// every resource recipe.
pub struct ClusterConnection {
    runner: Arc<dyn ProcessRunner>,
    context: ProvisionContext,
}

impl ClusterConnection {
    /// Connect using the system `kubectl`, `helm`, and `docker`.
    ///
    /// Fails with an actionable error if a tool is missing or the cluster
    /// does not answer.
    pub async fn new(config: &HarnessConfig) -> Result<Self, ClusterError> {
        Self::with_runner(Arc::new(SystemProcessRunner::default()), config).await
    }

    /// Connect through an arbitrary runner.
    pub async fn with_runner(
        runner: Arc<dyn ProcessRunner>,
        config: &HarnessConfig,
    ) -> Result<Self, ClusterError> {
        for (tool, args) in REQUIRED_TOOLS {
            Self::check_tool(runner.as_ref(), tool, args).await?;
        }
        Self::check_cluster(runner.as_ref()).await?;

        let context = ProvisionContext::new(
            runner.clone(),
            Arc::new(KubectlClusterState::new(runner.clone())),
        )
        .with_ready_policy(config.ready_policy());

        Ok(Self { runner, context })
    }

    /// Context handed to orchestrators and recipes.
    pub fn context(&self) -> ProvisionContext {
        self.context.clone()
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        self.runner.clone()
    }

    async fn check_tool(
        runner: &dyn ProcessRunner,
        tool: &str,
        args: &[&str],
    ) -> Result<(), ClusterError> {
        let cmd = CommandSpec::new(tool)
            .args(args.iter().copied())
            .timeout(PREFLIGHT_TIMEOUT);
        match runner.exec(&cmd).await {
            Ok(result) if result.success() => {
                info!(target: "env_tests.cluster", tool, version = %result.stdout.trim(), "Tool available");
                Ok(())
            }
            Ok(result) => Err(ClusterError::ToolMissing {
                tool: tool.to_string(),
                message: format!("exit {}: {}", result.exit_code, result.stderr.trim()),
            }),
            Err(e) => Err(ClusterError::ToolMissing {
                tool: tool.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn check_cluster(runner: &dyn ProcessRunner) -> Result<(), ClusterError> {
        let cmd = CommandSpec::new("kubectl")
            .arg("cluster-info")
            .timeout(PREFLIGHT_TIMEOUT);
        let result = runner
            .exec(&cmd)
            .await
            .map_err(|e| ClusterError::ClusterUnreachable {
                message: e.to_string(),
            })?;
        if !result.success() {
            return Err(ClusterError::ClusterUnreachable {
                message: result.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::process::mock::MockProcessRunner;
    use harness_core::ExecResult;
    use std::collections::HashMap;

    fn config() -> HarnessConfig {
        HarnessConfig::from_vars(&HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn test_preflight_passes_with_all_tools() {
        let runner = Arc::new(MockProcessRunner::new());
        let connection = ClusterConnection::with_runner(runner.clone(), &config())
            .await
            .unwrap();
        assert_eq!(runner.call_count(), 4);
        assert_eq!(
            connection.context().ready_policy.timeout,
            Duration::from_secs(600)
        );
    }

    #[tokio::test]
    async fn test_missing_tool_reported_by_name() {
        let runner = Arc::new(MockProcessRunner::new().on(
            "helm",
            &[],
            ExecResult::failed(127, "helm: command not found"),
        ));
        let err = ClusterConnection::with_runner(runner.clone(), &config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClusterError::ToolMissing { ref tool, .. } if tool == "helm"));
        // Stops before touching the cluster.
        assert!(!runner.command_lines().contains(&"kubectl cluster-info".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let runner = Arc::new(MockProcessRunner::new().on(
            "kubectl",
            &["cluster-info"],
            ExecResult::failed(1, "The connection to the server localhost:8080 was refused"),
        ));
        let err = ClusterConnection::with_runner(runner, &config())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("was refused"));
    }
}
