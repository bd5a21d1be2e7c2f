//! Lifecycle orchestration for operator integration tests.
//!
//! Test classes that share one Kubernetes cluster need three things from the
//! harness: identifiers that never collide, resources created in dependency
//! order with a matching reverse teardown, and a cleanup decision that depends
//! on the test outcome and on whether the run is unattended.
//!
//! # Modules
//!
//! - `allocator`: run-unique suffixes and the names/ports derived from them
//! - `lease`: exclusive, scoped claims on a shared cluster
//! - `handle`: teardown-idempotent wrappers around external resources
//! - `chain`: ordered creation with short-circuit and reverse teardown
//! - `orchestrator`: per-class state machine tying the above together
//! - `process` / `cluster`: collaborator seams for CLI calls and cluster state
//! - `resources`: concrete provisioning recipes (database, schema, operator,
//!   domain, image)
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = HarnessConfig::from_env()?;
//! let mut class = LifecycleOrchestrator::from_config("ItJrfImageWlst", &config, ctx);
//!
//! class.setup(|suffix| build_chain(&config, suffix)).await?;
//! class.run_test("testJrfDomainInImage", |ctx| async move { verify(ctx).await }).await?;
//! let summary = class.teardown(config.cleanup_always()).await;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod allocator;
pub mod chain;
pub mod cluster;
pub mod config;
pub mod error;
pub mod eventual;
mod flock;
pub mod handle;
pub mod lease;
pub mod orchestrator;
pub mod process;
pub mod resources;
pub mod telemetry;

pub use allocator::{AtomicSuffixAllocator, FileSuffixAllocator, Suffix, SuffixAllocator};
pub use chain::{ChainError, CompletedChain, DependencyChain, StepFailure, TeardownReport};
pub use cluster::{ClusterStateReader, KubectlClusterState, ResourceRef};
pub use config::HarnessConfig;
pub use error::{ProvisionError, TeardownError};
pub use eventual::PollPolicy;
pub use handle::{ExternalResource, ProvisionContext, ResourceHandle, ResourceKind};
pub use lease::{ClusterLeaseGuard, LeaseError, LeaseToken};
pub use orchestrator::{LifecycleOrchestrator, LifecycleState, RunOutcome, SetupError};
pub use process::{CommandSpec, ExecResult, ProcessRunner, SystemProcessRunner};
pub use resources::{
    DomainInImage, DomainOnPv, ImageBuild, OperatorRelease, OracleDatabase, RcuSchema,
};
