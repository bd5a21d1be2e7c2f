//! Per-class lifecycle orchestration.
//!
//! One `LifecycleOrchestrator` per test class. It is an explicit state
//! machine, independent of any test framework's callback ordering:
//!
//! ```text
//! Created --setup ok--> ResourcesProvisioned --run_test--> TestsRan
//!    |                          |                             |
//!    +--setup failed------------+-------teardown--------------+--> TornDown
//! ```
//!
//! # Cleanup policy
//!
//! Class teardown removes resources iff `ci_mode || every recorded test
//! succeeded`. In CI nothing may leak between runs; locally a failing class
//! keeps its resources for inspection. The lease is outside this policy and is
//! always released.
//!
//! A failed setup always tears down whatever part of the chain was created,
//! then releases the lease, then reports the failing step together with the
//! suffix and database namespace in use.
//!
//! Created steps are owned by the orchestrator from the moment they exist, so
//! a setup future that is cancelled mid-chain leaves them to `teardown`. An
//! orchestrator dropped without `teardown` (panicking test body, aborted
//! task) spawns a best-effort teardown on the current runtime when built
//! with `with_cleanup_on_drop(true)`.

use crate::allocator::{AllocationError, Suffix, SuffixAllocator};
use crate::chain::{ChainError, CompletedChain, DependencyChain, StepFailure, TeardownReport};
use crate::config::HarnessConfig;
use crate::error::ProvisionError;
use crate::handle::ProvisionContext;
use crate::lease::{ClusterLeaseGuard, LeaseError, LeaseToken};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Default bound on waiting for the cluster lease.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(600);

/// Default lease id when a run does not slice its cluster.
pub const DEFAULT_CLUSTER_ID: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    ResourcesProvisioned,
    TestsRan,
    TornDown,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("could not lease cluster: {0}")]
    Lease(#[from] LeaseError),

    #[error("could not allocate suffix: {0}")]
    Allocation(#[from] AllocationError),

    #[error("invalid chain for suffix {suffix}: {source}")]
    InvalidChain {
        suffix: Suffix,
        #[source]
        source: ChainError,
    },

    #[error("step '{step}' failed (suffix {suffix}, namespace {namespace}): {cause}")]
    Chain {
        step: String,
        suffix: Suffix,
        namespace: String,
        cause: ProvisionError,
        /// Steps that were created and then torn down again.
        rolled_back: Vec<String>,
        teardown_failures: usize,
    },

    #[error("setup called in state {0:?}")]
    InvalidState(LifecycleState),
}

/// Outcome of a whole class, fixed at teardown time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub test_class_name: String,
    pub succeeded: bool,
    pub ci_mode: bool,
}

impl RunOutcome {
    /// `ci_mode || succeeded`.
    #[must_use]
    pub fn should_release_resources(&self) -> bool {
        self.ci_mode || self.succeeded
    }
}

/// What class teardown did.
#[derive(Debug)]
pub struct TeardownSummary {
    pub outcome: RunOutcome,
    pub resources_released: bool,
    /// Identities left running for inspection (empty when released).
    pub preserved: Vec<String>,
    pub report: TeardownReport,
}

/// Read-only view of a provisioned class, handed to test bodies.
#[derive(Debug, Clone)]
pub struct TestContext {
    pub class_name: String,
    pub suffix: Suffix,
    /// Step name to resource identity.
    pub resources: BTreeMap<String, String>,
}

impl TestContext {
    #[must_use]
    pub fn identity(&self, step: &str) -> Option<&str> {
        self.resources.get(step).map(String::as_str)
    }
}

pub struct LifecycleOrchestrator {
    class_name: String,
    allocator: Arc<dyn SuffixAllocator>,
    leases: ClusterLeaseGuard,
    cluster_id: String,
    lease_timeout: Duration,
    ctx: ProvisionContext,
    state: LifecycleState,
    lease: Option<LeaseToken>,
    suffix: Option<Suffix>,
    chain: Option<CompletedChain>,
    outcomes: Vec<(String, bool)>,
    cleanup_on_drop: bool,
}

impl LifecycleOrchestrator {
    pub fn new(
        class_name: impl Into<String>,
        allocator: Arc<dyn SuffixAllocator>,
        leases: ClusterLeaseGuard,
        ctx: ProvisionContext,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            allocator,
            leases,
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            ctx,
            state: LifecycleState::Created,
            lease: None,
            suffix: None,
            chain: None,
            outcomes: Vec::new(),
            cleanup_on_drop: false,
        }
    }

    /// Wire allocator, lease guard, and bounds from configuration.
    pub fn from_config(
        class_name: impl Into<String>,
        config: &HarnessConfig,
        ctx: ProvisionContext,
    ) -> Self {
        let ctx = ctx.with_ready_policy(config.ready_policy());
        Self::new(class_name, config.suffix_allocator(), config.lease_guard(), ctx)
            .with_cluster(config.cluster_id.clone(), config.lease_timeout)
            .with_cleanup_on_drop(config.cleanup_always())
    }

    #[must_use]
    pub fn with_cluster(mut self, cluster_id: impl Into<String>, lease_timeout: Duration) -> Self {
        self.cluster_id = cluster_id.into();
        self.lease_timeout = lease_timeout;
        self
    }

    /// Tear created resources down in the background if the orchestrator is
    /// dropped before `teardown`. Set from the run's cleanup-always flag.
    #[must_use]
    pub fn with_cleanup_on_drop(mut self, cleanup: bool) -> Self {
        self.cleanup_on_drop = cleanup;
        self
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[must_use]
    pub fn suffix(&self) -> Option<Suffix> {
        self.suffix
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[must_use]
    pub fn provision_context(&self) -> &ProvisionContext {
        &self.ctx
    }

    /// True until a recorded test fails. Vacuously true with no tests.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|(_, ok)| *ok)
    }

    /// Context for test bodies, once setup has succeeded.
    #[must_use]
    pub fn test_context(&self) -> Option<TestContext> {
        let suffix = self.suffix?;
        let chain = self.chain.as_ref()?;
        Some(TestContext {
            class_name: self.class_name.clone(),
            suffix,
            resources: chain.identities(),
        })
    }

    /// Acquire the lease, allocate a suffix, and create the chain built by
    /// `build` for that suffix.
    pub async fn setup<F>(&mut self, build: F) -> Result<TestContext, SetupError>
    where
        F: FnOnce(Suffix) -> Result<DependencyChain, ChainError>,
    {
        // A lease without a provisioned state means an earlier setup was
        // cancelled; only `teardown` may follow.
        if self.state != LifecycleState::Created || self.lease.is_some() {
            return Err(SetupError::InvalidState(self.state));
        }

        info!(target: "harness.orchestrator", class = %self.class_name, cluster_id = %self.cluster_id, "Setting up test class");

        let lease = self.leases.acquire(&self.cluster_id, self.lease_timeout).await.map_err(|e| {
            error!(target: "harness.orchestrator", class = %self.class_name, error = %e, "Lease acquisition failed, no resources created");
            self.state = LifecycleState::TornDown;
            e
        })?;
        self.lease = Some(lease);

        let suffix = match self.allocator.next_suffix() {
            Ok(suffix) => suffix,
            Err(e) => {
                error!(target: "harness.orchestrator", class = %self.class_name, error = %e, "Suffix allocation failed");
                self.abort_setup();
                return Err(e.into());
            }
        };
        self.suffix = Some(suffix);

        info!(
            target: "harness.orchestrator",
            class = %self.class_name,
            suffix = suffix.value(),
            db_namespace = %suffix.db_namespace(),
            db_port = suffix.db_port(),
            "Allocated suffix"
        );

        let chain = match build(suffix) {
            Ok(chain) => chain,
            Err(source) => {
                self.abort_setup();
                return Err(SetupError::InvalidChain { suffix, source });
            }
        };

        let created = self.chain.insert(CompletedChain::default());
        match chain.run_into(&self.ctx, created).await {
            Ok(()) => {
                self.state = LifecycleState::ResourcesProvisioned;
                info!(target: "harness.orchestrator", class = %self.class_name, suffix = suffix.value(), "Resources provisioned");
                self.test_context()
                    .ok_or(SetupError::InvalidState(self.state))
            }
            Err(StepFailure {
                failed_step, cause, ..
            }) => {
                let mut completed = self.chain.take().unwrap_or_default();
                let report = completed.teardown(&self.ctx).await;
                for failure in &report.failures {
                    warn!(target: "harness.orchestrator", class = %self.class_name, error = %failure, "Rollback step failed");
                }
                self.abort_setup();
                error!(
                    target: "harness.orchestrator",
                    class = %self.class_name,
                    step = %failed_step,
                    suffix = suffix.value(),
                    db_namespace = %suffix.db_namespace(),
                    "Setup failed"
                );
                Err(SetupError::Chain {
                    step: failed_step,
                    suffix,
                    namespace: suffix.db_namespace(),
                    cause,
                    rolled_back: report.torn_down,
                    teardown_failures: report.failures.len(),
                })
            }
        }
    }

    /// Record one test method's outcome. The class succeeds only if all do.
    pub fn record_outcome(&mut self, test_name: impl Into<String>, succeeded: bool) {
        let test_name = test_name.into();
        match self.state {
            LifecycleState::ResourcesProvisioned => self.state = LifecycleState::TestsRan,
            LifecycleState::TestsRan => {}
            LifecycleState::Created | LifecycleState::TornDown => {
                warn!(target: "harness.orchestrator", class = %self.class_name, test = %test_name, state = ?self.state, "Outcome recorded outside provisioned state");
            }
        }
        if !succeeded {
            warn!(target: "harness.orchestrator", class = %self.class_name, test = %test_name, "Test failed");
        }
        self.outcomes.push((test_name, succeeded));
    }

    /// Run one test body against the provisioned resources and record its
    /// outcome. Without a successful setup the test fails without running.
    pub async fn run_test<F, Fut>(&mut self, test_name: &str, body: F) -> anyhow::Result<()>
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let Some(ctx) = self
            .test_context()
            .filter(|_| matches!(self.state, LifecycleState::ResourcesProvisioned | LifecycleState::TestsRan))
        else {
            self.record_outcome(test_name, false);
            anyhow::bail!("{test_name}: class {} is not provisioned", self.class_name);
        };

        info!(target: "harness.orchestrator", class = %self.class_name, test = %test_name, "BEGIN");
        let result = body(ctx).await;
        self.record_outcome(test_name, result.is_ok());
        match &result {
            Ok(()) => info!(target: "harness.orchestrator", class = %self.class_name, test = %test_name, "SUCCESS"),
            Err(e) => error!(target: "harness.orchestrator", class = %self.class_name, test = %test_name, error = %e, "FAILURE"),
        }
        result
    }

    /// Apply the cleanup policy and release the lease. Safe to call twice.
    pub async fn teardown(&mut self, ci_mode: bool) -> TeardownSummary {
        let outcome = RunOutcome {
            test_class_name: self.class_name.clone(),
            succeeded: self.all_succeeded(),
            ci_mode,
        };

        if self.state == LifecycleState::TornDown {
            info!(target: "harness.orchestrator", class = %self.class_name, "Teardown already done");
            self.release_lease();
            return TeardownSummary {
                outcome,
                resources_released: false,
                preserved: Vec::new(),
                report: TeardownReport::default(),
            };
        }

        let mut summary = TeardownSummary {
            resources_released: outcome.should_release_resources(),
            outcome,
            preserved: Vec::new(),
            report: TeardownReport::default(),
        };

        if let Some(chain) = self.chain.as_mut() {
            if summary.resources_released {
                info!(target: "harness.orchestrator", class = %self.class_name, ci_mode, succeeded = summary.outcome.succeeded, "Releasing class resources");
                summary.report = chain.teardown(&self.ctx).await;
                for failure in &summary.report.failures {
                    warn!(target: "harness.orchestrator", class = %self.class_name, error = %failure, "Teardown step failed");
                }
            } else {
                summary.preserved = chain.identities().into_values().collect();
                warn!(
                    target: "harness.orchestrator",
                    class = %self.class_name,
                    suffix = ?self.suffix.map(Suffix::value),
                    preserved = ?summary.preserved,
                    "Class failed outside CI, preserving resources for inspection"
                );
            }
        }

        self.release_lease();
        self.state = LifecycleState::TornDown;
        summary
    }

    /// Undo a partially completed setup: release the lease, end the lifecycle.
    fn abort_setup(&mut self) {
        self.release_lease();
        self.state = LifecycleState::TornDown;
    }

    fn release_lease(&mut self) {
        if let Some(token) = self.lease.take() {
            if let Err(e) = token.release() {
                warn!(target: "harness.orchestrator", class = %self.class_name, error = %e, "Lease release failed");
            }
        }
    }
}

impl Drop for LifecycleOrchestrator {
    fn drop(&mut self) {
        if self.state == LifecycleState::TornDown {
            return;
        }
        let Some(chain) = self.chain.take().filter(|c| !c.is_empty()) else {
            return;
        };
        if !self.cleanup_on_drop {
            warn!(
                target: "harness.orchestrator",
                class = %self.class_name,
                preserved = ?chain.identities(),
                "Orchestrator dropped before teardown, leaving resources in place"
            );
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(
                target: "harness.orchestrator",
                class = %self.class_name,
                leaked = ?chain.identities(),
                "Orchestrator dropped outside a runtime, cannot tear down"
            );
            return;
        };

        warn!(target: "harness.orchestrator", class = %self.class_name, steps = ?chain.step_names(), "Orchestrator dropped before teardown, tearing down in background");
        let class_name = self.class_name.clone();
        let ctx = self.ctx.clone();
        // The lease goes with the teardown so no other class gets the
        // cluster while these resources still exist.
        let lease = self.lease.take();
        runtime.spawn(async move {
            let mut chain = chain;
            let report = chain.teardown(&ctx).await;
            for failure in &report.failures {
                warn!(target: "harness.orchestrator", class = %class_name, error = %failure, "Background teardown step failed");
            }
            if let Some(token) = lease {
                if let Err(e) = token.release() {
                    warn!(target: "harness.orchestrator", class = %class_name, error = %e, "Lease release failed");
                }
            }
        });
    }
}
