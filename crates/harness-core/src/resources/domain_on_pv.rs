use super::{DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USER};
use crate::allocator::Suffix;
use crate::cluster::{wait_for_ready, ResourceRef};
use crate::error::{ProvisionError, TeardownError};
use crate::handle::{ExternalResource, ProvisionContext, ResourceKind};
use crate::process::{exec_checked, CommandSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

const BASE_NAME: &str = "weblogic-sample";
const ADMIN_SERVER: &str = "admin-server";
const CLUSTER_NAME: &str = "cluster-1";
const DEFAULT_REPLICAS: u32 = 2;

/// A domain whose home lives on a host-path persistent volume, created by the
/// domain-home-on-pv sample and run on an arbitrary WebLogic image.
///
/// The pods run exactly `image`, which makes this the recipe for checking
/// that a custom image is the one actually in use.
#[derive(Debug, Clone)]
pub struct DomainOnPv {
    scripts_dir: PathBuf,
    domain_uid: String,
    namespace: String,
    image: String,
    work_dir: PathBuf,
    pv_root: PathBuf,
}

impl DomainOnPv {
    pub fn new(
        scripts_dir: impl Into<PathBuf>,
        suffix: Suffix,
        image: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        pv_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            domain_uid: suffix.domain_uid(),
            namespace: suffix.domain_namespace(),
            image: image.into(),
            work_dir: work_dir.into(),
            pv_root: pv_root.into(),
        }
    }

    #[must_use]
    pub fn domain_uid(&self) -> &str {
        &self.domain_uid
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn admin_pod(&self) -> String {
        format!("{}-{ADMIN_SERVER}", self.domain_uid)
    }

    #[must_use]
    pub fn credentials_secret(&self) -> String {
        format!("{}-weblogic-credentials", self.domain_uid)
    }

    #[must_use]
    pub fn pv_name(&self) -> String {
        format!("{}-{BASE_NAME}-pv", self.domain_uid)
    }

    #[must_use]
    pub fn pvc_name(&self) -> String {
        format!("{}-{BASE_NAME}-pvc", self.domain_uid)
    }

    fn job_name(&self) -> String {
        format!("{}-create-{BASE_NAME}-domain-job", self.domain_uid)
    }

    fn pv_inputs_path(&self) -> PathBuf {
        self.work_dir
            .join(format!("create-pv-pvc-inputs-{}.yaml", self.domain_uid))
    }

    fn domain_inputs_path(&self) -> PathBuf {
        self.work_dir
            .join(format!("create-domain-inputs-{}.yaml", self.domain_uid))
    }

    fn output_dir(&self) -> PathBuf {
        self.work_dir.join(format!("pv-{}", self.domain_uid))
    }

    fn pv_inputs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("baseName", BASE_NAME.to_string()),
            ("domainUID", self.domain_uid.clone()),
            ("namespace", self.namespace.clone()),
            ("weblogicDomainStorageType", "HOST_PATH".to_string()),
            (
                "weblogicDomainStoragePath",
                self.pv_root.join(&self.domain_uid).display().to_string(),
            ),
            ("weblogicDomainStorageReclaimPolicy", "Retain".to_string()),
            ("weblogicDomainStorageSize", "10Gi".to_string()),
        ]
    }

    fn domain_inputs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("adminServerName", ADMIN_SERVER.to_string()),
            ("domainUID", self.domain_uid.clone()),
            ("namespace", self.namespace.clone()),
            ("image", self.image.clone()),
            ("imagePullPolicy", "IfNotPresent".to_string()),
            ("weblogicCredentialsSecretName", self.credentials_secret()),
            ("persistentVolumeClaimName", self.pvc_name()),
            ("clusterName", CLUSTER_NAME.to_string()),
            ("initialManagedServerReplicas", DEFAULT_REPLICAS.to_string()),
            ("exposeAdminNodePort", "false".to_string()),
        ]
    }

    /// `sh <script> -i <inputs> -o <output> -e`: generate, then apply.
    fn sample(&self, script: PathBuf, inputs: PathBuf) -> CommandSpec {
        CommandSpec::new("sh").args([
            script.display().to_string(),
            "-i".to_string(),
            inputs.display().to_string(),
            "-o".to_string(),
            self.output_dir().display().to_string(),
            "-e".to_string(),
        ])
    }

    fn admin_ref(&self) -> ResourceRef {
        ResourceRef::DomainAdminServer {
            domain_uid: self.domain_uid.clone(),
            admin_server: ADMIN_SERVER.to_string(),
            namespace: self.namespace.clone(),
        }
    }
}

#[async_trait]
impl ExternalResource for DomainOnPv {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Domain
    }

    fn identity(&self) -> String {
        format!("{}/{}", self.namespace, self.domain_uid)
    }

    async fn create(&mut self, ctx: &ProvisionContext) -> Result<(), ProvisionError> {
        super::ensure_secret(
            ctx,
            &self.credentials_secret(),
            &self.namespace,
            &[("username", DEFAULT_ADMIN_USER), ("password", DEFAULT_ADMIN_PASSWORD)],
        )
        .await?;

        info!(target: "harness.resources", domain_uid = %self.domain_uid, pv = %self.pv_name(), "Creating domain volume");
        let pv_inputs = self.pv_inputs_path();
        super::write_inputs(&pv_inputs, &self.pv_inputs()).await?;
        let pv_script = self
            .scripts_dir
            .join("create-weblogic-domain-pv-pvc")
            .join("create-pv-pvc.sh");
        exec_checked(ctx.runner.as_ref(), &self.sample(pv_script, pv_inputs)).await?;

        info!(target: "harness.resources", domain_uid = %self.domain_uid, namespace = %self.namespace, image = %self.image, "Creating domain on PV");
        let domain_inputs = self.domain_inputs_path();
        super::write_inputs(&domain_inputs, &self.domain_inputs()).await?;
        let domain_script = self
            .scripts_dir
            .join("create-weblogic-domain")
            .join("domain-home-on-pv")
            .join("create-domain.sh");
        exec_checked(ctx.runner.as_ref(), &self.sample(domain_script, domain_inputs)).await?;

        wait_for_ready(ctx.cluster.as_ref(), &self.admin_ref(), ctx.ready_policy).await
    }

    /// Stop and delete the domain, then the create job, the claim, the
    /// volume and the secret. The host-path contents are retained.
    async fn teardown(&mut self, ctx: &ProvisionContext) -> Result<(), TeardownError> {
        let resource = format!("Domain {}", self.identity());
        let mut commands: Vec<CommandSpec> = super::shutdown_domain(&self.domain_uid, &self.namespace).into();
        let job = self.job_name();
        let pvc = self.pvc_name();
        let pv = self.pv_name();
        commands.push(CommandSpec::new("kubectl").args([
            "delete",
            "job",
            job.as_str(),
            "-n",
            self.namespace.as_str(),
            "--ignore-not-found",
        ]));
        commands.push(CommandSpec::new("kubectl").args([
            "delete",
            "pvc",
            pvc.as_str(),
            "-n",
            self.namespace.as_str(),
            "--ignore-not-found",
        ]));
        commands.push(CommandSpec::new("kubectl").args(["delete", "pv", pv.as_str(), "--ignore-not-found"]));
        commands.push(super::delete_secret(&self.credentials_secret(), &self.namespace));

        let mut results = Vec::with_capacity(commands.len());
        for command in &commands {
            results.push(super::run_teardown(ctx, &resource, command).await);
        }

        for path in [self.pv_inputs_path(), self.domain_inputs_path()] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(target: "harness.resources", path = %path.display(), error = %e, "Domain input file not removed");
            }
        }

        super::combine_teardown(&resource, results)
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

    fn domain(dir: &std::path::Path) -> DomainOnPv {
        DomainOnPv::new(
            "/samples",
            Suffix::new(2).unwrap(),
            "custom-weblogic:12.2.1.3-p1",
            dir,
            "/scratch/k8s_dir",
        )
    }

    #[tokio::test]
    async fn test_create_runs_pv_then_domain_samples() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockProcessRunner::new());
        let mut domain = domain(dir.path());
        let cluster = MockClusterState::new().ready_after(&domain.admin_ref(), 1);
        let ctx = ctx(&runner, cluster);

        domain.create(&ctx).await.unwrap();

        let out = dir.path().join("pv-domain2");
        assert_eq!(
            runner.command_lines(),
            vec![
                "kubectl create secret generic domain2-weblogic-credentials -n domainns2 --from-literal=username=weblogic --from-literal=password=welcome1".to_string(),
                format!(
                    "sh /samples/create-weblogic-domain-pv-pvc/create-pv-pvc.sh -i {} -o {} -e",
                    domain.pv_inputs_path().display(),
                    out.display()
                ),
                format!(
                    "sh /samples/create-weblogic-domain/domain-home-on-pv/create-domain.sh -i {} -o {} -e",
                    domain.domain_inputs_path().display(),
                    out.display()
                ),
            ]
        );

        let pv_inputs = std::fs::read_to_string(domain.pv_inputs_path()).unwrap();
        assert!(pv_inputs.contains("weblogicDomainStoragePath: /scratch/k8s_dir/domain2\n"));
        assert!(pv_inputs.contains("weblogicDomainStorageType: HOST_PATH\n"));
        let domain_inputs = std::fs::read_to_string(domain.domain_inputs_path()).unwrap();
        assert!(domain_inputs.contains("image: custom-weblogic:12.2.1.3-p1\n"));
        assert!(domain_inputs.contains("persistentVolumeClaimName: domain2-weblogic-sample-pvc\n"));
        assert_eq!(domain.admin_pod(), "domain2-admin-server");
    }

    #[tokio::test]
    async fn test_failed_pv_script_stops_before_domain() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockProcessRunner::new().on(
            "sh",
            &["/samples/create-weblogic-domain-pv-pvc/create-pv-pvc.sh"],
            ExecResult::failed(1, "pv already bound"),
        ));
        let ctx = ctx(&runner, MockClusterState::new());

        let err = domain(dir.path()).create(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("pv already bound"));
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_teardown_removes_domain_volume_and_secret() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            MockProcessRunner::new().on("kubectl", &["delete", "pvc"], ExecResult::failed(1, "pvc in use")),
        );
        let ctx = ctx(&runner, MockClusterState::new());

        let err = domain(dir.path()).teardown(&ctx).await.unwrap_err();
        assert!(err.message.contains("pvc in use"));

        let lines = runner.command_lines();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("kubectl patch domain domain2 -n domainns2"));
        assert_eq!(lines[1], "kubectl delete domain domain2 -n domainns2 --ignore-not-found");
        assert_eq!(
            lines[2],
            "kubectl delete job domain2-create-weblogic-sample-domain-job -n domainns2 --ignore-not-found"
        );
        assert_eq!(lines[3], "kubectl delete pvc domain2-weblogic-sample-pvc -n domainns2 --ignore-not-found");
        assert_eq!(lines[4], "kubectl delete pv domain2-weblogic-sample-pv --ignore-not-found");
        assert_eq!(
            lines[5],
            "kubectl delete secret domain2-weblogic-credentials -n domainns2 --ignore-not-found"
        );
    }
}
