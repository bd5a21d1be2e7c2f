use crate::allocator::Suffix;
use crate::cluster::{wait_for_ready, ResourceRef};
use crate::error::{ProvisionError, TeardownError};
use crate::handle::{ExternalResource, ProvisionContext, ResourceKind};
use crate::process::{exec_checked, CommandSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

/// Deployment installed by the operator chart.
pub const OPERATOR_DEPLOYMENT: &str = "weblogic-operator";

/// An operator Helm release plus the namespaces it owns and manages.
#[derive(Debug, Clone)]
pub struct OperatorRelease {
    chart_dir: PathBuf,
    release: String,
    namespace: String,
    domain_namespaces: Vec<String>,
    created_namespaces: Vec<String>,
}

impl OperatorRelease {
    /// Operator for `suffix`, managing that suffix's domain namespace.
    pub fn new(chart_dir: impl Into<PathBuf>, suffix: Suffix) -> Self {
        Self {
            chart_dir: chart_dir.into(),
            release: suffix.operator_release(),
            namespace: suffix.operator_namespace(),
            domain_namespaces: vec![suffix.domain_namespace()],
            created_namespaces: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_domain_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.domain_namespaces = namespaces;
        self
    }

    #[must_use]
    pub fn release(&self) -> &str {
        &self.release
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn domain_namespaces(&self) -> &[String] {
        &self.domain_namespaces
    }

    async fn ensure_namespace(
        &mut self,
        ctx: &ProvisionContext,
        namespace: &str,
    ) -> Result<(), ProvisionError> {
        let cmd = CommandSpec::new("kubectl").args(["create", "namespace", namespace]);
        let result = ctx.runner.exec(&cmd).await?;
        if result.success() {
            self.created_namespaces.push(namespace.to_string());
            return Ok(());
        }
        if result.stderr.contains("AlreadyExists") {
            info!(target: "harness.resources", namespace, "Namespace already exists");
            return Ok(());
        }
        result.ensure_success(&cmd).map(|_| ())
    }
}

#[async_trait]
impl ExternalResource for OperatorRelease {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Operator
    }

    fn identity(&self) -> String {
        format!("{}/{}", self.namespace, self.release)
    }

    async fn create(&mut self, ctx: &ProvisionContext) -> Result<(), ProvisionError> {
        let mut namespaces = vec![self.namespace.clone()];
        namespaces.extend(self.domain_namespaces.iter().cloned());
        for namespace in &namespaces {
            self.ensure_namespace(ctx, namespace).await?;
        }

        info!(
            target: "harness.resources",
            release = %self.release,
            namespace = %self.namespace,
            domain_namespaces = ?self.domain_namespaces,
            "Installing operator"
        );
        let install = CommandSpec::new("helm").args([
            "install".to_string(),
            self.release.clone(),
            self.chart_dir.display().to_string(),
            "--namespace".to_string(),
            self.namespace.clone(),
            "--set".to_string(),
            format!("domainNamespaces={{{}}}", self.domain_namespaces.join(",")),
            "--wait".to_string(),
        ]);
        exec_checked(ctx.runner.as_ref(), &install).await?;

        wait_for_ready(
            ctx.cluster.as_ref(),
            &ResourceRef::deployment(OPERATOR_DEPLOYMENT, &self.namespace),
            ctx.ready_policy,
        )
        .await
    }

    /// Uninstall the release, then delete the namespaces this recipe created.
    /// Every sub-step runs even if an earlier one failed.
    async fn teardown(&mut self, ctx: &ProvisionContext) -> Result<(), TeardownError> {
        let resource = format!("Operator {}", self.identity());
        let mut results = Vec::new();

        let uninstall = CommandSpec::new("helm").args([
            "uninstall",
            self.release.as_str(),
            "--namespace",
            self.namespace.as_str(),
        ]);
        results.push(super::run_teardown(ctx, &resource, &uninstall).await);

        for namespace in self.created_namespaces.iter().rev() {
            let delete = CommandSpec::new("kubectl").args([
                "delete",
                "namespace",
                namespace.as_str(),
                "--ignore-not-found",
            ]);
            let result = super::run_teardown(ctx, &resource, &delete).await;
            if let Err(e) = &result {
                warn!(target: "harness.resources", namespace = %namespace, error = %e, "Namespace deletion failed");
            }
            results.push(result);
        }

        super::combine_teardown(&resource, results)
    }
}
