use crate::error::{ProvisionError, TeardownError};
use crate::handle::{ExternalResource, ProvisionContext, ResourceKind};
use crate::process::{exec_checked, CommandSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Pod the RCU script runs in.
pub const RCU_POD: &str = "rcu";

/// Repository schemas created by RCU inside the class database.
///
/// The schemas live in the database and go away with it; teardown only
/// removes the helper pod.
#[derive(Debug, Clone)]
pub struct RcuSchema {
    scripts_dir: PathBuf,
    prefix: String,
    db_url: String,
    namespace: String,
}

impl RcuSchema {
    pub fn new(
        scripts_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        db_url: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            prefix: prefix.into(),
            db_url: db_url.into(),
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl ExternalResource for RcuSchema {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SchemaInstance
    }

    fn identity(&self) -> String {
        format!("{}@{}", self.prefix, self.namespace)
    }

    async fn create(&mut self, ctx: &ProvisionContext) -> Result<(), ProvisionError> {
        if self.prefix.is_empty() {
            return Err(ProvisionError::Invalid("RCU schema prefix is empty".to_string()));
        }
        info!(target: "harness.resources", prefix = %self.prefix, db_url = %self.db_url, "Creating RCU schema");
        let script = self
            .scripts_dir
            .join("create-rcu-schema")
            .join("create-rcu-schema.sh");
        let cmd = CommandSpec::new("sh").args([
            script.display().to_string(),
            "-s".to_string(),
            self.prefix.clone(),
            "-d".to_string(),
            self.db_url.clone(),
            "-n".to_string(),
            self.namespace.clone(),
        ]);
        exec_checked(ctx.runner.as_ref(), &cmd).await?;
        Ok(())
    }

    async fn teardown(&mut self, ctx: &ProvisionContext) -> Result<(), TeardownError> {
        let cmd = CommandSpec::new("kubectl").args([
            "delete",
            "pod",
            RCU_POD,
            "-n",
            self.namespace.as_str(),
            "--ignore-not-found",
        ]);
        super::run_teardown(ctx, &format!("RcuSchema {}", self.identity()), &cmd).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterState;
    use crate::process::mock::MockProcessRunner;
    use crate::resources::test_support::ctx;
    use std::sync::Arc;

    fn schema(prefix: &str) -> RcuSchema {
        RcuSchema::new("/scripts", prefix, "host:30014/devpdb.k8s", "db3")
    }

    #[tokio::test]
    async fn test_create_runs_rcu_script() {
        let runner = Arc::new(MockProcessRunner::new());
        let ctx = ctx(&runner, MockClusterState::new());

        schema("jrfImage").create(&ctx).await.unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "sh /scripts/create-rcu-schema/create-rcu-schema.sh -s jrfImage -d host:30014/devpdb.k8s -n db3"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_prefix_rejected_before_running() {
        let runner = Arc::new(MockProcessRunner::new());
        let ctx = ctx(&runner, MockClusterState::new());

        let err = schema("").create(&ctx).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Invalid(_)));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_deletes_rcu_pod() {
        let runner = Arc::new(MockProcessRunner::new());
        let ctx = ctx(&runner, MockClusterState::new());

        schema("jrfImage").teardown(&ctx).await.unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["kubectl delete pod rcu -n db3 --ignore-not-found".to_string()]
        );
    }
}
