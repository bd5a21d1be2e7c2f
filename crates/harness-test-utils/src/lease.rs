//! Lease backend that counts what the harness does with it.

use harness_core::lease::{InMemoryLeaseBackend, LeaseBackend};
use harness_core::LeaseError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory leases plus claim/release counters.
#[derive(Debug, Default)]
pub struct CountingLeaseBackend {
    inner: InMemoryLeaseBackend,
    claims: AtomicUsize,
    refused: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingLeaseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful claims.
    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    /// Claims refused because someone else held the cluster.
    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_held(&self, cluster_id: &str) -> bool {
        self.inner.holder(cluster_id).is_some()
    }
}

impl LeaseBackend for CountingLeaseBackend {
    fn try_claim(&self, cluster_id: &str, holder: &str) -> Result<bool, LeaseError> {
        let claimed = self.inner.try_claim(cluster_id, holder)?;
        if claimed {
            self.claims.fetch_add(1, Ordering::SeqCst);
        } else {
            self.refused.fetch_add(1, Ordering::SeqCst);
        }
        Ok(claimed)
    }

    fn release(&self, cluster_id: &str, holder: &str) -> Result<(), LeaseError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(cluster_id, holder)
    }
}
