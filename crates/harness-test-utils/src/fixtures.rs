//! Pre-wired contexts, chains, and orchestrators.

use crate::journal::Journal;
use crate::lease::CountingLeaseBackend;
use crate::scripted::ScriptedResource;
use crate::test_ids::TEST_CLUSTER_ID;
use harness_core::allocator::AllocationError;
use harness_core::cluster::mock::MockClusterState;
use harness_core::process::mock::MockProcessRunner;
use harness_core::{
    AtomicSuffixAllocator, ClusterLeaseGuard, DependencyChain, LifecycleOrchestrator,
    ProvisionContext, Suffix, SuffixAllocator,
};
use std::sync::Arc;
use std::time::Duration;

/// Context whose runner succeeds at everything and whose cluster is empty.
pub fn mock_context() -> ProvisionContext {
    ProvisionContext::new(
        Arc::new(MockProcessRunner::new()),
        Arc::new(MockClusterState::new()),
    )
}

/// Linear chain of scripted resources, each depending on the one before.
/// The step at `fail_at` (0-based) fails its create.
pub fn scripted_chain(journal: &Journal, names: &[&str], fail_at: Option<usize>) -> DependencyChain {
    let mut chain = DependencyChain::new();
    let mut previous: Option<usize> = None;
    for (i, name) in names.iter().enumerate() {
        let mut resource = ScriptedResource::new(*name, journal);
        if fail_at == Some(i) {
            resource = resource.failing_create();
        }
        let deps: Vec<usize> = previous.into_iter().collect();
        previous = Some(chain.add_step(*name, resource, &deps).unwrap());
    }
    chain
}

/// Allocator whose store is always unreachable.
#[derive(Debug, Default)]
pub struct FailingAllocator;

impl SuffixAllocator for FailingAllocator {
    fn next_suffix(&self) -> Result<Suffix, AllocationError> {
        Err(AllocationError::StoreUnavailable {
            path: "/nonexistent/suffix-counter".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    }
}

/// Orchestrator over a counting lease backend and an allocator starting at
/// `first_suffix`, leasing `TEST_CLUSTER_ID` with a short timeout.
pub fn test_orchestrator(
    class_name: &str,
    first_suffix: u32,
    leases: &Arc<CountingLeaseBackend>,
) -> LifecycleOrchestrator {
    LifecycleOrchestrator::new(
        class_name,
        Arc::new(AtomicSuffixAllocator::starting_at(first_suffix)),
        lease_guard(leases),
        mock_context(),
    )
    .with_cluster(TEST_CLUSTER_ID, Duration::from_secs(2))
}

/// Lease guard over `leases` that polls fast.
pub fn lease_guard(leases: &Arc<CountingLeaseBackend>) -> ClusterLeaseGuard {
    ClusterLeaseGuard::new(leases.clone()).with_poll_interval(Duration::from_millis(10))
}
