use crate::allocator::Suffix;
use crate::cluster::{wait_for_ready, ResourceRef};
use crate::error::{ProvisionError, TeardownError};
use crate::handle::{ExternalResource, ProvisionContext, ResourceKind};
use crate::process::{exec_checked, CommandSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Deployment created by the sample database scripts.
pub const DB_DEPLOYMENT: &str = "oracle-db";

/// Pluggable database service used by the RCU schema.
#[derive(Debug, Clone)]
pub struct OracleDatabase {
    scripts_dir: PathBuf,
    namespace: String,
    node_port: u16,
    host: String,
}

impl OracleDatabase {
    /// Database for `suffix`, driven by the sample scripts under `scripts_dir`.
    pub fn new(scripts_dir: impl Into<PathBuf>, suffix: Suffix, host: impl Into<String>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            namespace: suffix.db_namespace(),
            node_port: suffix.db_port(),
            host: host.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn node_port(&self) -> u16 {
        self.node_port
    }

    /// `host:port/devpdb.k8s`, the URL RCU and the domain connect to.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}:{}/devpdb.k8s", self.host, self.node_port)
    }

    fn script(&self, name: &str) -> String {
        self.scripts_dir
            .join("create-oracle-db-service")
            .join(name)
            .display()
            .to_string()
    }
}

#[async_trait]
impl ExternalResource for OracleDatabase {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Database
    }

    fn identity(&self) -> String {
        self.namespace.clone()
    }

    async fn create(&mut self, ctx: &ProvisionContext) -> Result<(), ProvisionError> {
        info!(target: "harness.resources", namespace = %self.namespace, port = self.node_port, "Starting database");
        let start = CommandSpec::new("sh").args([
            self.script("start-db-service.sh"),
            "-p".to_string(),
            self.node_port.to_string(),
            "-n".to_string(),
            self.namespace.clone(),
        ]);
        exec_checked(ctx.runner.as_ref(), &start).await?;

        wait_for_ready(
            ctx.cluster.as_ref(),
            &ResourceRef::deployment(DB_DEPLOYMENT, &self.namespace),
            ctx.ready_policy,
        )
        .await
    }

    async fn teardown(&mut self, ctx: &ProvisionContext) -> Result<(), TeardownError> {
        let stop = CommandSpec::new("sh").args([
            self.script("stop-db-service.sh"),
            "-n".to_string(),
            self.namespace.clone(),
        ]);
        super::run_teardown(ctx, &format!("Database {}", self.namespace), &stop).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterState;
    use crate::process::mock::MockProcessRunner;
    use crate::process::ExecResult;
    use crate::resources::test_support::ctx;
    use std::sync::Arc;

    fn db() -> OracleDatabase {
        OracleDatabase::new("/src/kubernetes/samples/scripts", Suffix::new(7).unwrap(), "k8s-node")
    }

    #[test]
    fn test_identities_derive_from_suffix() {
        let db = db();
        assert_eq!(db.identity(), "db7");
        assert_eq!(db.node_port(), 30018);
        assert_eq!(db.url(), "k8s-node:30018/devpdb.k8s");
    }

    #[tokio::test]
    async fn test_create_starts_service_and_waits() {
        let runner = Arc::new(MockProcessRunner::new());
        let cluster =
            MockClusterState::new().ready_after(&ResourceRef::deployment(DB_DEPLOYMENT, "db7"), 1);
        let ctx = ctx(&runner, cluster);

        db().create(&ctx).await.unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "sh /src/kubernetes/samples/scripts/create-oracle-db-service/start-db-service.sh -p 30018 -n db7"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_create_fails_on_script_error() {
        let runner = Arc::new(MockProcessRunner::new().on(
            "sh",
            &[],
            ExecResult::failed(2, "namespace db7 already exists"),
        ));
        let ctx = ctx(&runner, MockClusterState::new());

        let err = db().create(&ctx).await.unwrap_err();
        assert!(matches!(err, ProvisionError::CommandFailed { exit_code: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_times_out_when_never_ready() {
        let runner = Arc::new(MockProcessRunner::new());
        let ctx = ctx(&runner, MockClusterState::new());

        let err = db().create(&ctx).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_teardown_stops_service() {
        let runner = Arc::new(MockProcessRunner::new().on(
            "sh",
            &[],
            ExecResult::failed(1, "not found"),
        ));
        let ctx = ctx(&runner, MockClusterState::new());

        let err = db().teardown(&ctx).await.unwrap_err();
        assert_eq!(err.resource, "Database db7");
        assert!(runner.command_lines()[0].ends_with("stop-db-service.sh -n db7"));
    }
}
