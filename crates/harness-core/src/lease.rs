//! Exclusive, scoped claims on a shared test cluster.
//!
//! A class acquires the lease before it allocates a suffix or creates
//! anything, and gives it back exactly once when its lifecycle ends, whatever
//! happened in between. The lease is not a chain resource: it is released
//! even when cleanup of the chain is deliberately skipped.
//!
//! `LeaseToken` releases itself on drop if it was never released explicitly,
//! which covers panics and cancelled tasks on a best-effort basis.

use crate::flock;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default interval between claim attempts while the cluster is held.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("timed out after {waited:?} waiting for lease on cluster '{cluster_id}'")]
    Timeout { cluster_id: String, waited: Duration },

    #[error("invalid cluster id '{0}'")]
    InvalidClusterId(String),

    #[error("lease backend error: {0}")]
    Backend(String),
}

/// Storage for who holds which cluster.
pub trait LeaseBackend: Send + Sync {
    /// Claim `cluster_id` for `holder`. `Ok(false)` means someone else has it.
    fn try_claim(&self, cluster_id: &str, holder: &str) -> Result<bool, LeaseError>;

    fn release(&self, cluster_id: &str, holder: &str) -> Result<(), LeaseError>;
}

/// Leases held by tasks and threads of one process.
#[derive(Debug, Default)]
pub struct InMemoryLeaseBackend {
    held: Mutex<HashMap<String, String>>,
}

impl InMemoryLeaseBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of `cluster_id`, if any.
    pub fn holder(&self, cluster_id: &str) -> Option<String> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cluster_id)
            .cloned()
    }
}

impl LeaseBackend for InMemoryLeaseBackend {
    fn try_claim(&self, cluster_id: &str, holder: &str) -> Result<bool, LeaseError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LeaseError::Backend("lease table poisoned".to_string()))?;
        if held.contains_key(cluster_id) {
            return Ok(false);
        }
        held.insert(cluster_id.to_string(), holder.to_string());
        Ok(true)
    }

    fn release(&self, cluster_id: &str, holder: &str) -> Result<(), LeaseError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LeaseError::Backend("lease table poisoned".to_string()))?;
        match held.get(cluster_id) {
            Some(current) if current == holder => {
                held.remove(cluster_id);
                Ok(())
            }
            Some(current) => Err(LeaseError::Backend(format!(
                "cluster '{cluster_id}' is held by {current}, not {holder}"
            ))),
            None => Err(LeaseError::Backend(format!(
                "cluster '{cluster_id}' is not leased"
            ))),
        }
    }
}

/// Leases shared by harness processes on one host: one `flock`ed file per
/// cluster id under `dir`.
#[derive(Debug)]
pub struct FileLeaseBackend {
    dir: PathBuf,
    open: Mutex<HashMap<String, File>>,
}

impl FileLeaseBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    fn lease_path(&self, cluster_id: &str) -> Result<PathBuf, LeaseError> {
        let valid = !cluster_id.is_empty()
            && cluster_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !cluster_id.starts_with('.');
        if !valid {
            return Err(LeaseError::InvalidClusterId(cluster_id.to_string()));
        }
        Ok(self.dir.join(format!("{cluster_id}.lease")))
    }
}

impl LeaseBackend for FileLeaseBackend {
    fn try_claim(&self, cluster_id: &str, holder: &str) -> Result<bool, LeaseError> {
        let path = self.lease_path(cluster_id)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LeaseError::Backend(format!("{}: {e}", path.display())))?;

        if !flock::try_lock_exclusive(&file)
            .map_err(|e| LeaseError::Backend(format!("{}: {e}", path.display())))?
        {
            return Ok(false);
        }

        // Informational only; the lock is what grants the lease.
        let record = format!("{holder} {}\n", chrono::Utc::now().to_rfc3339());
        if let Err(e) = file.set_len(0).and_then(|()| file.write_all(record.as_bytes())) {
            debug!(target: "harness.lease", path = %path.display(), error = %e, "Could not record lease holder");
        }

        self.open
            .lock()
            .map_err(|_| LeaseError::Backend("lease table poisoned".to_string()))?
            .insert(cluster_id.to_string(), file);
        Ok(true)
    }

    fn release(&self, cluster_id: &str, _holder: &str) -> Result<(), LeaseError> {
        let file = self
            .open
            .lock()
            .map_err(|_| LeaseError::Backend("lease table poisoned".to_string()))?
            .remove(cluster_id)
            .ok_or_else(|| LeaseError::Backend(format!("cluster '{cluster_id}' is not leased")))?;
        // Closing the descriptor would drop the lock too; unlock explicitly so
        // errors surface.
        flock::unlock(&file).map_err(|e| LeaseError::Backend(e.to_string()))
    }
}

/// Hands out lease tokens for cluster ids.
#[derive(Clone)]
pub struct ClusterLeaseGuard {
    backend: Arc<dyn LeaseBackend>,
    poll_interval: Duration,
}

impl ClusterLeaseGuard {
    pub fn new(backend: Arc<dyn LeaseBackend>) -> Self {
        Self {
            backend,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLeaseBackend::new()))
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Block until `cluster_id` is free or `timeout` elapses.
    pub async fn acquire(&self, cluster_id: &str, timeout: Duration) -> Result<LeaseToken, LeaseError> {
        let holder = Uuid::new_v4().to_string();
        let start = Instant::now();

        loop {
            if self.backend.try_claim(cluster_id, &holder)? {
                info!(target: "harness.lease", cluster_id, holder = %holder, "Lease acquired");
                return Ok(LeaseToken {
                    cluster_id: cluster_id.to_string(),
                    holder,
                    backend: self.backend.clone(),
                    released: false,
                });
            }

            let waited = start.elapsed();
            if waited >= timeout {
                warn!(target: "harness.lease", cluster_id, waited = ?waited, "Lease acquisition timed out");
                return Err(LeaseError::Timeout {
                    cluster_id: cluster_id.to_string(),
                    waited,
                });
            }

            debug!(target: "harness.lease", cluster_id, "Cluster leased elsewhere, waiting");
            sleep(self.poll_interval.min(timeout.saturating_sub(waited))).await;
        }
    }

    /// Give a lease back. Same as `LeaseToken::release`.
    pub fn release(&self, token: LeaseToken) -> Result<(), LeaseError> {
        token.release()
    }
}

/// Proof of an exclusive claim on one cluster.
pub struct LeaseToken {
    cluster_id: String,
    holder: String,
    backend: Arc<dyn LeaseBackend>,
    released: bool,
}

impl LeaseToken {
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Release the lease. Consumes the token, so it cannot run twice.
    pub fn release(mut self) -> Result<(), LeaseError> {
        self.release_once()
    }

    fn release_once(&mut self) -> Result<(), LeaseError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.backend.release(&self.cluster_id, &self.holder)?;
        info!(target: "harness.lease", cluster_id = %self.cluster_id, holder = %self.holder, "Lease released");
        Ok(())
    }
}

impl Drop for LeaseToken {
    fn drop(&mut self) {
        if !self.released {
            warn!(target: "harness.lease", cluster_id = %self.cluster_id, "Lease token dropped without release, releasing");
            if let Err(e) = self.release_once() {
                warn!(target: "harness.lease", cluster_id = %self.cluster_id, error = %e, "Best-effort lease release failed");
            }
        }
    }
}

impl fmt::Debug for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseToken")
            .field("cluster_id", &self.cluster_id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
