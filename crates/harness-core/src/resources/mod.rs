//! Concrete provisioning recipes.
//!
//! Each recipe is an `ExternalResource` built from values derived from the
//! class suffix. Create steps shell out through the context's
//! `ProcessRunner` and wait for readiness through its `ClusterStateReader`;
//! nothing here talks to the cluster directly.

mod database;
mod domain;
mod domain_on_pv;
mod image;
mod operator;
mod rcu_schema;

pub use database::OracleDatabase;
pub use domain::DomainInImage;
pub use domain_on_pv::DomainOnPv;
pub use image::ImageBuild;
pub use operator::OperatorRelease;
pub use rcu_schema::RcuSchema;

use crate::error::{ProvisionError, TeardownError};
use crate::handle::ProvisionContext;
use crate::process::CommandSpec;
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

/// WebLogic admin credentials the sample domains are created with.
pub const DEFAULT_ADMIN_USER: &str = "weblogic";
pub const DEFAULT_ADMIN_PASSWORD: &str = "welcome1";

/// Schema and SYS password set by the sample database and RCU scripts.
pub const DEFAULT_RCU_PASSWORD: &str = "Oradoc_db1";

/// `kubectl create secret generic` from literals. An
/// existing secret of the same name is reused.
pub(crate) async fn ensure_secret(
    ctx: &ProvisionContext,
    name: &str,
    namespace: &str,
    literals: &[(&str, &str)],
) -> Result<(), ProvisionError> {
    let mut cmd = CommandSpec::new("kubectl").args(["create", "secret", "generic", name, "-n", namespace]);
    for (key, value) in literals {
        cmd = cmd.arg(format!("--from-literal={key}={value}"));
    }
    let result = ctx.runner.exec(&cmd).await?;
    if result.success() {
        info!(target: "harness.resources", secret = name, namespace, "Secret created");
        return Ok(());
    }
    if result.stderr.contains("AlreadyExists") {
        info!(target: "harness.resources", secret = name, namespace, "Secret already exists");
        return Ok(());
    }
    result.ensure_success(&cmd).map(|_| ())
}

/// `kubectl delete secret ... --ignore-not-found`.
pub(crate) fn delete_secret(name: &str, namespace: &str) -> CommandSpec {
    CommandSpec::new("kubectl").args(["delete", "secret", name, "-n", namespace, "--ignore-not-found"])
}

/// Ask the operator to stop every server of `domain_uid`, then delete the
/// Domain resource.
pub(crate) fn shutdown_domain(domain_uid: &str, namespace: &str) -> [CommandSpec; 2] {
    let patch_body = json!({"spec": {"serverStartPolicy": "NEVER"}}).to_string();
    [
        CommandSpec::new("kubectl").args([
            "patch",
            "domain",
            domain_uid,
            "-n",
            namespace,
            "--type=merge",
            "-p",
            patch_body.as_str(),
        ]),
        CommandSpec::new("kubectl").args([
            "delete",
            "domain",
            domain_uid,
            "-n",
            namespace,
            "--ignore-not-found",
        ]),
    ]
}

/// Write a flat `key: value` inputs file for the sample scripts, which parse
/// their inputs line by line.
pub(crate) async fn write_inputs(path: &Path, entries: &[(&str, String)]) -> Result<(), ProvisionError> {
    let body: String = entries
        .iter()
        .map(|(key, value)| format!("{key}: {value}\n"))
        .collect();
    let write = async {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(path, body).await
    };
    write.await.map_err(|e| {
        ProvisionError::Invalid(format!("cannot write inputs {}: {e}", path.display()))
    })
}

/// Run one cleanup command, mapping any failure to a `TeardownError`.
pub(crate) async fn run_teardown(
    ctx: &ProvisionContext,
    resource: &str,
    command: &CommandSpec,
) -> Result<(), TeardownError> {
    debug!(target: "harness.resources", resource, command = %command, "Running teardown command");
    match ctx.runner.exec(command).await {
        Ok(result) if result.success() => Ok(()),
        Ok(result) => Err(TeardownError::new(
            resource,
            format!(
                "`{command}` exited with {}: {}",
                result.exit_code,
                result.stderr.trim()
            ),
        )),
        Err(e) => Err(TeardownError::new(resource, e.to_string())),
    }
}

/// Fold several cleanup sub-step results into one, keeping every message.
pub(crate) fn combine_teardown(
    resource: &str,
    results: Vec<Result<(), TeardownError>>,
) -> Result<(), TeardownError> {
    let messages: Vec<String> = results
        .into_iter()
        .filter_map(Result::err)
        .map(|e| e.message)
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(TeardownError::new(resource, messages.join("; ")))
    }
}
