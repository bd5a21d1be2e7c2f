use super::image::BUILD_TIMEOUT;
use super::{DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USER, DEFAULT_RCU_PASSWORD};
use crate::allocator::Suffix;
use crate::cluster::{wait_for_ready, ResourceRef};
use crate::error::{ProvisionError, TeardownError};
use crate::handle::{ExternalResource, ProvisionContext, ResourceKind};
use crate::process::{exec_checked, CommandSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_ADMIN_SERVER: &str = "admin-server";
pub const DEFAULT_CLUSTER: &str = "cluster-1";
pub const DEFAULT_REPLICAS: u32 = 2;

/// A domain-home-in-image WebLogic domain managed by the class operator.
///
/// Create makes the admin credentials secret (plus the RCU credentials
/// secret for JRF domains), optionally builds the domain image with the WLST
/// create-domain sample, renders the Domain resource as JSON into
/// `manifest_dir`, and applies it with `kubectl apply -f`. The domain counts
/// as ready once its admin server pod is.
#[derive(Debug, Clone)]
pub struct DomainInImage {
    domain_uid: String,
    namespace: String,
    image: String,
    manifest_dir: PathBuf,
    admin_server: String,
    cluster_name: String,
    managed_server_base: Option<String>,
    replicas: u32,
    rcu: Option<(String, String)>,
    wlst_build: Option<WlstBuild>,
}

/// Domain image built by the sample `create-domain.sh` on top of a base
/// image.
#[derive(Debug, Clone)]
struct WlstBuild {
    script: PathBuf,
    base_image: String,
}

impl DomainInImage {
    pub fn new(suffix: Suffix, image: impl Into<String>, manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            domain_uid: suffix.domain_uid(),
            namespace: suffix.domain_namespace(),
            image: image.into(),
            manifest_dir: manifest_dir.into(),
            admin_server: DEFAULT_ADMIN_SERVER.to_string(),
            cluster_name: DEFAULT_CLUSTER.to_string(),
            managed_server_base: None,
            replicas: DEFAULT_REPLICAS,
            rcu: None,
            wlst_build: None,
        }
    }

    /// Build `image` first by running the WLST create-domain sample `script`
    /// over `base_image`.
    #[must_use]
    pub fn with_wlst_image_build(mut self, script: impl Into<PathBuf>, base_image: impl Into<String>) -> Self {
        self.wlst_build = Some(WlstBuild {
            script: script.into(),
            base_image: base_image.into(),
        });
        self
    }

    #[must_use]
    pub fn with_cluster(mut self, name: impl Into<String>, replicas: u32) -> Self {
        self.cluster_name = name.into();
        self.replicas = replicas;
        self
    }

    #[must_use]
    pub fn with_managed_server_base(mut self, base: impl Into<String>) -> Self {
        self.managed_server_base = Some(base.into());
        self
    }

    /// JRF domains point at the class database's RCU schema.
    #[must_use]
    pub fn with_rcu(mut self, schema_prefix: impl Into<String>, db_url: impl Into<String>) -> Self {
        self.rcu = Some((schema_prefix.into(), db_url.into()));
        self
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
    pub fn image(&self) -> &str {
        &self.image
    }

    /// `<domainUID>-<adminServerName>`.
    #[must_use]
    pub fn admin_pod(&self) -> String {
        format!("{}-{}", self.domain_uid, self.admin_server)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_dir.join(format!("domain-{}.json", self.domain_uid))
    }

    /// Inputs for the WLST create-domain sample.
    #[must_use]
    pub fn inputs_path(&self) -> PathBuf {
        self.manifest_dir
            .join(format!("create-domain-inputs-{}.yaml", self.domain_uid))
    }

    #[must_use]
    pub fn credentials_secret(&self) -> String {
        format!("{}-weblogic-credentials", self.domain_uid)
    }

    #[must_use]
    pub fn rcu_credentials_secret(&self) -> String {
        format!("{}-rcu-credentials", self.domain_uid)
    }

    fn inputs(&self, build: &WlstBuild) -> Vec<(&'static str, String)> {
        let mut inputs = vec![
            ("domainUID", self.domain_uid.clone()),
            ("namespace", self.namespace.clone()),
            ("adminServerName", self.admin_server.clone()),
            ("clusterName", self.cluster_name.clone()),
            ("initialManagedServerReplicas", self.replicas.to_string()),
            ("image", self.image.clone()),
            ("domainHomeImageBase", build.base_image.clone()),
            ("weblogicCredentialsSecretName", self.credentials_secret()),
        ];
        if let Some(base) = &self.managed_server_base {
            inputs.push(("managedServerNameBase", base.clone()));
        }
        if let Some((prefix, url)) = &self.rcu {
            inputs.push(("rcuSchemaPrefix", prefix.clone()));
            inputs.push(("rcuDatabaseURL", url.clone()));
            inputs.push(("rcuCredentialsSecret", self.rcu_credentials_secret()));
        }
        inputs
    }

    async fn build_image(&self, ctx: &ProvisionContext, build: &WlstBuild) -> Result<(), ProvisionError> {
        let inputs = self.inputs_path();
        super::write_inputs(&inputs, &self.inputs(build)).await?;

        info!(target: "harness.resources", domain_uid = %self.domain_uid, image = %self.image, base = %build.base_image, "Building domain image with WLST");
        let create = CommandSpec::new("sh")
            .args([
                build.script.display().to_string(),
                "-u".to_string(),
                DEFAULT_ADMIN_USER.to_string(),
                "-p".to_string(),
                DEFAULT_ADMIN_PASSWORD.to_string(),
                "-i".to_string(),
                inputs.display().to_string(),
                "-o".to_string(),
                self.manifest_dir.join(format!("wlst-{}", self.domain_uid)).display().to_string(),
            ])
            .timeout(BUILD_TIMEOUT);
        exec_checked(ctx.runner.as_ref(), &create).await?;

        let list = CommandSpec::new("docker").args(["image", "ls", self.image.as_str(), "-q"]);
        let listed = exec_checked(ctx.runner.as_ref(), &list).await?;
        if listed.stdout.trim().is_empty() {
            return Err(ProvisionError::Invalid(format!(
                "domain image {} does not exist after WLST build",
                self.image
            )));
        }
        Ok(())
    }

    /// The Domain custom resource this recipe applies.
    #[must_use]
    pub fn manifest(&self) -> Value {
        let mut env = Vec::new();
        if let Some((prefix, url)) = &self.rcu {
            env.push(json!({"name": "RCU_SCHEMA_PREFIX", "value": prefix}));
            env.push(json!({"name": "RCU_DATABASE_URL", "value": url}));
        }
        let mut cluster = json!({
            "clusterName": self.cluster_name,
            "replicas": self.replicas,
            "serverStartState": "RUNNING",
        });
        if let (Some(base), Some(obj)) = (&self.managed_server_base, cluster.as_object_mut()) {
            obj.insert("managedServerNameBase".to_string(), json!(base));
        }

        json!({
            "apiVersion": "weblogic.oracle/v2",
            "kind": "Domain",
            "metadata": {
                "name": self.domain_uid,
                "namespace": self.namespace,
                "labels": {"weblogic.domainUID": self.domain_uid},
            },
            "spec": {
                "domainUID": self.domain_uid,
                "domainHome": format!("/u01/oracle/user_projects/domains/{}", self.domain_uid),
                "domainHomeInImage": true,
                "image": self.image,
                "imagePullPolicy": "IfNotPresent",
                "webLogicCredentialsSecret": {
                    "name": self.credentials_secret(),
                },
                "serverStartPolicy": "IF_NEEDED",
                "serverPod": {"env": env},
                "adminServer": {"serverStartState": "RUNNING"},
                "clusters": [cluster],
            },
        })
    }

    fn admin_ref(&self) -> ResourceRef {
        ResourceRef::DomainAdminServer {
            domain_uid: self.domain_uid.clone(),
            admin_server: self.admin_server.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

#[async_trait]
impl ExternalResource for DomainInImage {
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
        if let Some((prefix, _)) = &self.rcu {
            super::ensure_secret(
                ctx,
                &self.rcu_credentials_secret(),
                &self.namespace,
                &[
                    ("username", prefix.as_str()),
                    ("password", DEFAULT_RCU_PASSWORD),
                    ("sys_username", "sys"),
                    ("sys_password", DEFAULT_RCU_PASSWORD),
                ],
            )
            .await?;
        }
        if let Some(build) = &self.wlst_build {
            self.build_image(ctx, build).await?;
        }

        let path = self.manifest_path();
        let body = serde_json::to_string_pretty(&self.manifest())
            .map_err(|e| ProvisionError::Invalid(format!("cannot render domain manifest: {e}")))?;
        let write = async {
            tokio::fs::create_dir_all(&self.manifest_dir).await?;
            tokio::fs::write(&path, body).await
        };
        write.await.map_err(|e| {
            ProvisionError::Invalid(format!(
                "cannot write domain manifest {}: {e}",
                path.display()
            ))
        })?;

        info!(target: "harness.resources", domain_uid = %self.domain_uid, namespace = %self.namespace, image = %self.image, "Creating domain");
        let apply = CommandSpec::new("kubectl").args([
            "apply".to_string(),
            "-f".to_string(),
            path.display().to_string(),
        ]);
        exec_checked(ctx.runner.as_ref(), &apply).await?;

        wait_for_ready(ctx.cluster.as_ref(), &self.admin_ref(), ctx.ready_policy).await
    }

    /// Ask the operator to shut every server down, then delete the resource
    /// and its secrets. Every command runs even when an earlier one fails.
    async fn teardown(&mut self, ctx: &ProvisionContext) -> Result<(), TeardownError> {
        let resource = format!("Domain {}", self.identity());
        let mut commands: Vec<CommandSpec> = super::shutdown_domain(&self.domain_uid, &self.namespace).into();
        commands.push(super::delete_secret(&self.credentials_secret(), &self.namespace));
        if self.rcu.is_some() {
            commands.push(super::delete_secret(&self.rcu_credentials_secret(), &self.namespace));
        }

        let mut results = Vec::with_capacity(commands.len());
        for command in &commands {
            results.push(super::run_teardown(ctx, &resource, command).await);
        }

        for path in [self.manifest_path(), self.inputs_path()] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(target: "harness.resources", path = %path.display(), error = %e, "Domain input file not removed");
            }
        }

        super::combine_teardown(&resource, results)
    }
}
