//! Cluster state reading.
//!
//! The harness never talks to the API server directly; it reads state through
//! `kubectl` so that what a test asserts is exactly what an operator sees from
//! the command line.

use crate::error::ProvisionError;
use crate::eventual::{poll_until, PollPolicy};
use crate::process::{CommandSpec, ProcessError, ProcessRunner};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("`{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("unexpected kubectl output for {resource}: {source}")]
    Parse {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("pod {namespace}/{pod} runs image {actual:?}, expected {expected:?}")]
    ImageMismatch {
        pod: String,
        namespace: String,
        expected: String,
        actual: String,
    },
}

/// Something whose readiness can be polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    Pod {
        name: String,
        namespace: String,
    },
    Deployment {
        name: String,
        namespace: String,
    },
    /// A domain counts as ready once its admin server pod is.
    DomainAdminServer {
        domain_uid: String,
        admin_server: String,
        namespace: String,
    },
}

impl ResourceRef {
    pub fn pod(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::Pod {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn deployment(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::Deployment {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Pod { name, namespace } => write!(f, "pod {namespace}/{name}"),
            ResourceRef::Deployment { name, namespace } => {
                write!(f, "deployment {namespace}/{name}")
            }
            ResourceRef::DomainAdminServer {
                domain_uid,
                admin_server,
                namespace,
            } => write!(f, "domain {namespace}/{domain_uid} ({admin_server})"),
        }
    }
}

/// Read-only view of cluster state.
#[async_trait]
pub trait ClusterStateReader: Send + Sync {
    /// Images of every container in the pod, space separated.
    async fn pod_image(&self, pod: &str, namespace: &str) -> Result<String, ClusterError>;

    /// `Ok(false)` covers both "not ready yet" and "does not exist yet".
    async fn is_ready(&self, resource: &ResourceRef) -> Result<bool, ClusterError>;
}

/// Wait until `resource` reports ready, or fail with `ProvisionError::NotReady`.
///
/// Read errors during the wait are logged and treated as "not ready"; the
/// resource may simply not have been scheduled yet.
pub async fn wait_for_ready(
    reader: &dyn ClusterStateReader,
    resource: &ResourceRef,
    policy: PollPolicy,
) -> Result<(), ProvisionError> {
    info!(target: "harness.cluster", resource = %resource, timeout = ?policy.timeout, "Waiting for readiness");

    let result = poll_until(policy, move || async move {
        match reader.is_ready(resource).await {
            Ok(ready) => ready,
            Err(e) => {
                debug!(target: "harness.cluster", resource = %resource, error = %e, "Readiness check failed");
                false
            }
        }
    })
    .await;

    match result {
        Ok(attempts) => {
            info!(target: "harness.cluster", resource = %resource, attempts, "Resource ready");
            Ok(())
        }
        Err(_) => Err(ProvisionError::NotReady {
            resource: resource.to_string(),
            timeout: policy.timeout,
        }),
    }
}

/// Assert that a pod runs exactly `expected`.
pub async fn verify_pod_image(
    reader: &dyn ClusterStateReader,
    pod: &str,
    namespace: &str,
    expected: &str,
) -> Result<(), ClusterError> {
    let actual = reader.pod_image(pod, namespace).await?;
    if actual == expected {
        info!(target: "harness.cluster", pod, namespace, image = %actual, "Pod runs expected image");
        Ok(())
    } else {
        Err(ClusterError::ImageMismatch {
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PodJson {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct DeploymentJson {
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    available_replicas: u32,
}

/// `ClusterStateReader` backed by `kubectl`.
#[derive(Clone)]
pub struct KubectlClusterState {
    runner: Arc<dyn ProcessRunner>,
}

impl KubectlClusterState {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Fetch an object as JSON. `None` means kubectl reported NotFound.
    async fn get_json(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Option<String>, ClusterError> {
        let cmd = CommandSpec::new("kubectl").args(["get", kind, name, "-n", namespace, "-o", "json"]);
        let result = self.runner.exec(&cmd).await?;
        if result.success() {
            return Ok(Some(result.stdout));
        }
        if result.stderr.contains("NotFound") {
            return Ok(None);
        }
        Err(ClusterError::CommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            stderr: result.stderr,
        })
    }

    async fn pod_ready(&self, name: &str, namespace: &str) -> Result<bool, ClusterError> {
        let Some(body) = self.get_json("pod", name, namespace).await? else {
            return Ok(false);
        };
        let pod: PodJson = serde_json::from_str(&body).map_err(|source| ClusterError::Parse {
            resource: format!("pod {namespace}/{name}"),
            source,
        })?;
        Ok(pod
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True"))
    }
}

#[async_trait]
impl ClusterStateReader for KubectlClusterState {
    async fn pod_image(&self, pod: &str, namespace: &str) -> Result<String, ClusterError> {
        let cmd = CommandSpec::new("kubectl").args([
            "get",
            "pod",
            pod,
            "-n",
            namespace,
            "-o=jsonpath={.spec.containers[*].image}",
        ]);
        let result = self.runner.exec(&cmd).await?;
        if !result.success() {
            return Err(ClusterError::CommandFailed {
                command: cmd.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(result.stdout.trim().to_string())
    }

    async fn is_ready(&self, resource: &ResourceRef) -> Result<bool, ClusterError> {
        match resource {
            ResourceRef::Pod { name, namespace } => self.pod_ready(name, namespace).await,
            ResourceRef::Deployment { name, namespace } => {
                let Some(body) = self.get_json("deployment", name, namespace).await? else {
                    return Ok(false);
                };
                let deployment: DeploymentJson =
                    serde_json::from_str(&body).map_err(|source| ClusterError::Parse {
                        resource: resource.to_string(),
                        source,
                    })?;
                Ok(deployment.status.available_replicas >= 1)
            }
            ResourceRef::DomainAdminServer {
                domain_uid,
                admin_server,
                namespace,
            } => {
                self.pod_ready(&format!("{domain_uid}-{admin_server}"), namespace)
                    .await
            }
        }
    }
}

/// Scripted cluster state for unit tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Resources become ready after a configured number of checks.
    #[derive(Default)]
    pub struct MockClusterState {
        ready_after: Mutex<HashMap<String, usize>>,
        checks: Mutex<HashMap<String, usize>>,
        images: Mutex<HashMap<String, String>>,
        total_checks: AtomicUsize,
    }

    impl MockClusterState {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Report `resource` ready on the `checks`-th poll (1 = immediately).
        #[must_use]
        pub fn ready_after(self, resource: &ResourceRef, checks: usize) -> Self {
            self.ready_after
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(resource.to_string(), checks);
            self
        }

        #[must_use]
        pub fn with_pod_image(self, pod: &str, namespace: &str, image: &str) -> Self {
            self.images
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(format!("{namespace}/{pod}"), image.to_string());
            self
        }

        pub fn total_checks(&self) -> usize {
            self.total_checks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClusterStateReader for MockClusterState {
        async fn pod_image(&self, pod: &str, namespace: &str) -> Result<String, ClusterError> {
            Ok(self
                .images
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&format!("{namespace}/{pod}"))
                .cloned()
                .unwrap_or_default())
        }

        async fn is_ready(&self, resource: &ResourceRef) -> Result<bool, ClusterError> {
            self.total_checks.fetch_add(1, Ordering::SeqCst);
            let key = resource.to_string();
            let mut checks = self
                .checks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let seen = checks.entry(key.clone()).or_insert(0);
            *seen += 1;
            let threshold = self
                .ready_after
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&key)
                .copied();
            Ok(threshold.is_some_and(|n| *seen >= n))
        }
    }
}
