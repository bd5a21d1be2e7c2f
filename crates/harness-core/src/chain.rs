//! Ordered provisioning with reverse teardown.
//!
//! Steps run in insertion order; that order already encodes the topological
//! sort, so no graph resolution happens here. Adding a step validates that
//! everything it depends on was added before it.
//!
//! The first failing `create` stops the chain. The steps that did succeed are
//! handed back inside the error so the caller can tear them down; the failed
//! step and everything after it are never torn down.
//!
//! Teardown walks the created steps in exact reverse order and keeps going
//! past individual failures, so a stuck domain never strands the operator or
//! database beneath it.

use crate::error::{ProvisionError, TeardownError};
use crate::handle::{ExternalResource, ProvisionContext, ResourceHandle, TeardownAction};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("step '{step}' depends on index {dependency}, which is not an earlier step")]
    InvalidOrder { step: String, dependency: usize },

    #[error("step '{failed_step}' failed after creating [{}]: {cause}", .completed.step_names().join(", "))]
    StepFailed {
        failed_step: String,
        cause: ProvisionError,
        /// Steps created before the failure, still live.
        completed: CompletedChain,
        /// Steps after the failure, never attempted.
        skipped: Vec<String>,
    },
}

impl ChainError {
    /// Name of the step whose creation failed, if any.
    #[must_use]
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            ChainError::StepFailed { failed_step, .. } => Some(failed_step),
            ChainError::InvalidOrder { .. } => None,
        }
    }
}

#[derive(Debug)]
pub struct ChainStep {
    name: String,
    handle: ResourceHandle,
    depends_on: Vec<usize>,
}

impl ChainStep {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    #[must_use]
    pub fn depends_on(&self) -> &[usize] {
        &self.depends_on
    }
}

/// Steps waiting to be created, in creation order.
#[derive(Debug, Default)]
pub struct DependencyChain {
    steps: Vec<ChainStep>,
}

impl DependencyChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Every entry of `depends_on` must index an earlier step.
    /// Returns the new step's index for use by later steps.
    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        resource: impl ExternalResource + 'static,
        depends_on: &[usize],
    ) -> Result<usize, ChainError> {
        let name = name.into();
        let index = self.steps.len();
        if let Some(&dependency) = depends_on.iter().find(|&&d| d >= index) {
            return Err(ChainError::InvalidOrder {
                step: name,
                dependency,
            });
        }
        self.steps.push(ChainStep {
            name,
            handle: ResourceHandle::new(resource),
            depends_on: depends_on.to_vec(),
        });
        Ok(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Create every step in order, stopping at the first failure.
    pub async fn run(self, ctx: &ProvisionContext) -> Result<CompletedChain, ChainError> {
        let mut completed = CompletedChain::default();
        match self.run_into(ctx, &mut completed).await {
            Ok(()) => Ok(completed),
            Err(StepFailure {
                failed_step,
                cause,
                skipped,
            }) => Err(ChainError::StepFailed {
                failed_step,
                cause,
                completed,
                skipped,
            }),
        }
    }

    /// Like `run`, but each step is moved into `created` as soon as it
    /// exists. If this future is dropped mid-chain, `created` still holds
    /// every step created so far.
    pub async fn run_into(
        self,
        ctx: &ProvisionContext,
        created: &mut CompletedChain,
    ) -> Result<(), StepFailure> {
        let mut pending = self.steps.into_iter();

        while let Some(mut step) = pending.next() {
            info!(
                target: "harness.chain",
                step = %step.name,
                kind = %step.handle.kind(),
                identity = %step.handle.identity(),
                "Creating resource"
            );

            match step.handle.create(ctx).await {
                Ok(()) => {
                    info!(target: "harness.chain", step = %step.name, "Resource created");
                    created.steps.push(step);
                }
                Err(cause) => {
                    let skipped: Vec<String> = pending.map(|s| s.name).collect();
                    error!(
                        target: "harness.chain",
                        step = %step.name,
                        identity = %step.handle.identity(),
                        error = %cause,
                        skipped = ?skipped,
                        "Resource creation failed, aborting chain"
                    );
                    return Err(StepFailure {
                        failed_step: step.name,
                        cause,
                        skipped,
                    });
                }
            }
        }

        Ok(())
    }
}

/// A failed `run_into`. The created steps stay with the caller.
#[derive(Debug)]
pub struct StepFailure {
    pub failed_step: String,
    pub cause: ProvisionError,
    /// Steps after the failure, never attempted.
    pub skipped: Vec<String>,
}

/// Steps whose creation succeeded, in creation order.
#[derive(Debug, Default)]
pub struct CompletedChain {
    steps: Vec<ChainStep>,
}

impl CompletedChain {
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[must_use]
    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    /// Step name to resource identity, for test bodies and diagnostics.
    #[must_use]
    pub fn identities(&self) -> BTreeMap<String, String> {
        self.steps
            .iter()
            .map(|s| (s.name.clone(), s.handle.identity()))
            .collect()
    }

    /// Tear down in reverse creation order, continuing past failures.
    /// Calling this again only tears down what was not attempted before.
    pub async fn teardown(&mut self, ctx: &ProvisionContext) -> TeardownReport {
        let mut report = TeardownReport::default();

        for step in self.steps.iter_mut().rev() {
            match step.handle.teardown(ctx).await {
                Ok(TeardownAction::TornDown) => {
                    info!(target: "harness.chain", step = %step.name, "Resource torn down");
                    report.torn_down.push(step.name.clone());
                }
                Ok(TeardownAction::AlreadyTornDown | TeardownAction::NeverCreated) => {}
                Err(e) => {
                    warn!(target: "harness.chain", step = %step.name, error = %e, "Teardown failed, continuing");
                    report.torn_down.push(step.name.clone());
                    report.failures.push(e);
                }
            }
        }

        report
    }
}

/// Result of a teardown pass. Failures are informational, never fatal.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Steps a teardown was attempted for, in the order attempted.
    pub torn_down: Vec<String>,
    pub failures: Vec<TeardownError>,
}

impl TeardownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: TeardownReport) {
        self.torn_down.extend(other.torn_down);
        self.failures.extend(other.failures);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterState;
    use crate::handle::ResourceKind;
    use crate::process::mock::MockProcessRunner;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct Step {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl ExternalResource for Step {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Database
        }

        fn identity(&self) -> String {
            self.name.to_string()
        }

        async fn create(&mut self, _ctx: &ProvisionContext) -> Result<(), ProvisionError> {
            self.log.lock().unwrap().push(format!("create {}", self.name));
            if self.fail {
                return Err(ProvisionError::Invalid(format!("{} failed", self.name)));
            }
            Ok(())
        }

        async fn teardown(&mut self, _ctx: &ProvisionContext) -> Result<(), TeardownError> {
            self.log.lock().unwrap().push(format!("teardown {}", self.name));
            Ok(())
        }
    }

    fn ctx() -> ProvisionContext {
        ProvisionContext::new(
            Arc::new(MockProcessRunner::new()),
            Arc::new(MockClusterState::new()),
        )
    }

    fn step(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Step {
        Step {
            name,
            log: log.clone(),
            fail,
        }
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = DependencyChain::new();
        let db = chain.add_step("Database", step("db", &log, false), &[]).unwrap();
        assert_eq!(db, 0);

        let err = chain
            .add_step("Domain", step("domain", &log, false), &[db, 1])
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidOrder { dependency: 1, .. }));

        let err = chain
            .add_step("Self", step("self", &log, false), &[1])
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidOrder { .. }));
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_run_and_reverse_teardown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = DependencyChain::new();
        let a = chain.add_step("A", step("a", &log, false), &[]).unwrap();
        let b = chain.add_step("B", step("b", &log, false), &[a]).unwrap();
        chain.add_step("C", step("c", &log, false), &[a, b]).unwrap();

        let ctx = ctx();
        let mut done = chain.run(&ctx).await.unwrap();
        assert_eq!(done.step_names(), vec!["A", "B", "C"]);

        let report = done.teardown(&ctx).await;
        assert!(report.is_clean());
        assert_eq!(report.torn_down, vec!["C", "B", "A"]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["create a", "create b", "create c", "teardown c", "teardown b", "teardown a"]
        );
    }

    #[tokio::test]
    async fn test_failure_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = DependencyChain::new();
        chain.add_step("A", step("a", &log, false), &[]).unwrap();
        chain.add_step("B", step("b", &log, true), &[]).unwrap();
        chain.add_step("C", step("c", &log, false), &[]).unwrap();

        let err = chain.run(&ctx()).await.unwrap_err();
        assert_eq!(err.failed_step(), Some("B"));
        match err {
            ChainError::StepFailed {
                completed, skipped, ..
            } => {
                assert_eq!(completed.step_names(), vec!["A"]);
                assert_eq!(skipped, vec!["C".to_string()]);
            }
            ChainError::InvalidOrder { .. } => unreachable!("chain order is valid"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["create a", "create b"]);
    }

    struct Hang;

    #[async_trait]
    impl ExternalResource for Hang {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Operator
        }

        fn identity(&self) -> String {
            "hang".to_string()
        }

        async fn create(&mut self, _ctx: &ProvisionContext) -> Result<(), ProvisionError> {
            std::future::pending().await
        }

        async fn teardown(&mut self, _ctx: &ProvisionContext) -> Result<(), TeardownError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_keeps_created_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = DependencyChain::new();
        chain.add_step("Database", step("db", &log, false), &[]).unwrap();
        chain.add_step("Operator", Hang, &[]).unwrap();

        let ctx = ctx();
        let mut created = CompletedChain::default();
        let run = chain.run_into(&ctx, &mut created);
        assert!(tokio::time::timeout(std::time::Duration::from_millis(200), run)
            .await
            .is_err());

        assert_eq!(created.step_names(), vec!["Database"]);
        let report = created.teardown(&ctx).await;
        assert_eq!(report.torn_down, vec!["Database"]);
        assert_eq!(*log.lock().unwrap(), vec!["create db", "teardown db"]);
    }

    #[tokio::test]
    async fn test_error_message_names_created_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = DependencyChain::new();
        chain.add_step("Database", step("db", &log, false), &[]).unwrap();
        chain.add_step("RcuSchema", step("rcu", &log, true), &[0]).unwrap();

        let err = chain.run(&ctx()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("step 'RcuSchema' failed"));
        assert!(msg.contains("[Database]"));
    }
}
