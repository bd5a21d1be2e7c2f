//! Errors shared by every provisioning recipe.
//!
//! `ProvisionError` is fatal to the step that raised it and aborts the rest of
//! its chain. `TeardownError` is never fatal: callers log it, aggregate it, and
//! move on to the next resource.

use crate::process::ProcessError;
use std::time::Duration;
use thiserror::Error;

/// A create step failed.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The command ran and exited non-zero.
    #[error("command `{command}` exited with {exit_code}: stderr = {stderr}, stdout = {stdout}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The resource was created but never reported ready within the bound.
    #[error("{resource} not ready in time (waited {timeout:?})")]
    NotReady { resource: String, timeout: Duration },

    /// The command could not be run at all.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The command succeeded but the observed state is wrong.
    #[error("{0}")]
    Invalid(String),
}

/// A cleanup step failed. Logged and aggregated, never propagated as fatal.
#[derive(Debug, Error)]
#[error("teardown of {resource} failed: {message}")]
pub struct TeardownError {
    pub resource: String,
    pub message: String,
}

impl TeardownError {
    pub fn new(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            message: message.into(),
        }
    }
}
