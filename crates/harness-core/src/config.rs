//! Harness configuration.
//!
//! Configuration is loaded from environment variables. The flags decide which
//! test classes run (`QUICKTEST`, `FULLTEST`), which cleanup policy applies
//! (`JENKINS`, `FORCE_CLEANUP`), and where shared run state lives.
//!
//! The suffix allocator and lease guard are built once per configuration and
//! shared by every orchestrator created from it (or from any clone of it), so
//! classes of one run never draw the same suffix or both hold the cluster.

use crate::allocator::{AtomicSuffixAllocator, FileSuffixAllocator, SuffixAllocator};
use crate::eventual::PollPolicy;
use crate::lease::{ClusterLeaseGuard, FileLeaseBackend};
use crate::orchestrator::{DEFAULT_CLUSTER_ID, DEFAULT_LEASE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default image built by the image tool scenario.
pub const DEFAULT_IMAGE_NAME: &str = "imagetool/build/weblogic";

/// Default tag of that image.
pub const DEFAULT_IMAGE_TAG: &str = "12.2.1.3.0";

/// Default bound on readiness waits in seconds.
pub const DEFAULT_READY_TIMEOUT_SECONDS: u64 = 600;

/// Default host directory backing domain persistent volumes.
pub const DEFAULT_PV_ROOT: &str = "/scratch/k8s_dir";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid boolean for {name}: '{value}' (expected true/false/1/0/yes/no)")]
    InvalidBool { name: String, value: String },

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error("SUFFIX_STORE is set but neither RUN_ID nor BUILD_TAG identifies the run")]
    MissingRunId,
}

/// Run-wide services every orchestrator of one configuration shares.
#[derive(Clone)]
struct RunServices {
    allocator: Arc<dyn SuffixAllocator>,
    leases: ClusterLeaseGuard,
}

impl fmt::Debug for RunServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunServices").finish_non_exhaustive()
    }
}

/// Image reference `name:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Run the quick test classes.
    pub quick_test: bool,

    /// Run the full/extended test classes.
    pub full_test: bool,

    /// Unattended CI run: resources are always cleaned up.
    pub ci_mode: bool,

    /// Local override to clean up even after failures.
    pub force_cleanup: bool,

    /// Image used by the image tool scenario.
    pub image: ImageRef,

    /// Checkout root containing `kubernetes/` and `integration-tests/`.
    pub project_root: PathBuf,

    /// Scratch directory for generated inputs.
    pub result_root: PathBuf,

    /// Lease id for the shared cluster.
    pub cluster_id: String,

    pub lease_timeout: Duration,

    pub ready_timeout: Duration,

    /// Counter file for cross-process suffix allocation. In-memory if unset.
    pub suffix_store: Option<PathBuf>,

    /// Identifies the run owning `suffix_store` (`RUN_ID`, else `BUILD_TAG`).
    pub run_id: Option<String>,

    /// Directory of lease files for cross-process leasing. In-memory if unset.
    pub lease_dir: Option<PathBuf>,

    /// Host part of node-port URLs (database URL for RCU).
    pub nodeport_host: String,

    /// Host directory under which domain-on-PV homes are created.
    pub pv_root: PathBuf,

    services: RunServices,
}

impl HarnessConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let image_name = vars.get("IMAGE_NAME_WEBLOGIC").cloned();
        let image_tag = vars.get("IMAGE_TAG_WEBLOGIC").cloned();

        let cluster_id = vars
            .get("CLUSTER_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CLUSTER_ID.to_string());
        if cluster_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "CLUSTER_ID".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let suffix_store = vars.get("SUFFIX_STORE").map(PathBuf::from);
        let run_id = parse_run_id(vars)?;
        let lease_dir = vars.get("LEASE_DIR").map(PathBuf::from);

        let allocator: Arc<dyn SuffixAllocator> = match (&suffix_store, &run_id) {
            (Some(path), Some(run)) => Arc::new(FileSuffixAllocator::for_run(path, run)),
            (Some(_), None) => return Err(ConfigError::MissingRunId),
            (None, _) => Arc::new(AtomicSuffixAllocator::new()),
        };
        let leases = match &lease_dir {
            Some(dir) => ClusterLeaseGuard::new(Arc::new(FileLeaseBackend::new(dir))),
            None => ClusterLeaseGuard::in_memory(),
        };

        Ok(Self {
            quick_test: parse_bool(vars, "QUICKTEST")?,
            full_test: parse_bool(vars, "FULLTEST")?,
            ci_mode: parse_bool(vars, "JENKINS")?,
            force_cleanup: parse_bool(vars, "FORCE_CLEANUP")?,
            image: ImageRef {
                name: image_name.unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string()),
                tag: image_tag.unwrap_or_else(|| DEFAULT_IMAGE_TAG.to_string()),
            },
            project_root: vars
                .get("PROJECT_ROOT")
                .map_or_else(|| PathBuf::from(".."), PathBuf::from),
            result_root: vars
                .get("RESULT_ROOT")
                .map_or_else(|| PathBuf::from("/tmp/it-results"), PathBuf::from),
            cluster_id,
            lease_timeout: parse_seconds(vars, "LEASE_TIMEOUT_SECONDS", DEFAULT_LEASE_TIMEOUT)?,
            ready_timeout: parse_seconds(
                vars,
                "READY_TIMEOUT_SECONDS",
                Duration::from_secs(DEFAULT_READY_TIMEOUT_SECONDS),
            )?,
            suffix_store,
            run_id,
            lease_dir,
            nodeport_host: vars
                .get("K8S_NODEPORT_HOST")
                .cloned()
                .unwrap_or_else(|| "localhost".to_string()),
            pv_root: vars
                .get("PV_ROOT")
                .map_or_else(|| PathBuf::from(DEFAULT_PV_ROOT), PathBuf::from),
            services: RunServices { allocator, leases },
        })
    }

    /// Effective cleanup-always flag passed to class teardown.
    #[must_use]
    pub fn cleanup_always(&self) -> bool {
        self.ci_mode || self.force_cleanup
    }

    #[must_use]
    pub fn ready_policy(&self) -> PollPolicy {
        PollPolicy::new(self.ready_timeout)
    }

    /// `kubernetes/samples/scripts` under the project root.
    #[must_use]
    pub fn sample_scripts_dir(&self) -> PathBuf {
        self.project_root.join("kubernetes/samples/scripts")
    }

    /// Operator Helm chart under the project root.
    #[must_use]
    pub fn operator_chart_dir(&self) -> PathBuf {
        self.project_root.join("kubernetes/charts/weblogic-operator")
    }

    /// Image tool build script under the project root.
    #[must_use]
    pub fn image_build_script(&self) -> PathBuf {
        self.project_root
            .join("integration-tests/src/test/resources/imagetool/build.sh")
    }

    /// Per-class scratch directory.
    #[must_use]
    pub fn result_dir(&self, class_name: &str) -> PathBuf {
        self.result_root.join(class_name)
    }

    /// The run's allocator: file-backed and keyed on `run_id` if
    /// `SUFFIX_STORE` is set, in-memory otherwise. Every call returns the
    /// same allocator.
    #[must_use]
    pub fn suffix_allocator(&self) -> Arc<dyn SuffixAllocator> {
        Arc::clone(&self.services.allocator)
    }

    /// The run's lease guard: file-backed if `LEASE_DIR` is set, in-memory
    /// otherwise. Every call shares one backend.
    #[must_use]
    pub fn lease_guard(&self) -> ClusterLeaseGuard {
        self.services.leases.clone()
    }
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<bool, ConfigError> {
    let Some(value) = vars.get(name) else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name: name.to_string(),
            value: value.clone(),
        }),
    }
}

fn parse_run_id(vars: &HashMap<String, String>) -> Result<Option<String>, ConfigError> {
    let Some((name, value)) = ["RUN_ID", "BUILD_TAG"]
        .into_iter()
        .find_map(|name| vars.get(name).map(|value| (name, value.trim())))
    else {
        return Ok(None);
    };
    if value.is_empty() || value.contains(char::is_whitespace) {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("must be a non-empty token without whitespace, got '{value}'"),
        });
    }
    Ok(Some(value.to_string()))
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = vars.get(name) else {
        return Ok(default);
    };
    let seconds: u64 = value.trim().parse().map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("must be a whole number of seconds, got '{value}': {e}"),
    })?;
    if seconds == 0 {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(seconds))
}
