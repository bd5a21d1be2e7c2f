//! Run-unique suffix allocation.
//!
//! Every test class draws one suffix before it touches the cluster, and every
//! namespace, node port, and generated name it creates is derived from that
//! suffix. Allocation is the only thing standing between two concurrently
//! running classes and a name collision, so both implementations serialize
//! the increment: an atomic in memory, or an `flock`ed counter file when the
//! classes live in separate processes.
//!
//! Values are strictly increasing and never reused within a run. Gaps are
//! allowed (a class that fails after allocating simply burns its suffix).

use crate::flock;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// First node port handed to a suffix-0 database.
pub const DB_PORT_BASE: u16 = 30011;

/// Upper end of the default Kubernetes NodePort range.
pub const NODE_PORT_MAX: u16 = 32767;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("suffix counter store {path} is unreachable: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("suffix counter store {path} is corrupted: found {contents:?}")]
    Corrupted { path: PathBuf, contents: String },

    #[error("suffix space exhausted: {value} exceeds maximum {max}")]
    Exhausted { value: u32, max: u32 },
}

/// A run-unique integer. All derived identities are pure functions of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Suffix(u32);

impl Suffix {
    /// Largest suffix whose database port still fits the NodePort range.
    pub const MAX: u32 = (NODE_PORT_MAX - DB_PORT_BASE) as u32;

    pub fn new(value: u32) -> Result<Self, AllocationError> {
        if value > Self::MAX {
            return Err(AllocationError::Exhausted {
                value,
                max: Self::MAX,
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Namespace of the class's database, e.g. `db7`.
    #[must_use]
    pub fn db_namespace(self) -> String {
        format!("db{}", self.0)
    }

    /// Node port of the class's database, e.g. `30018` for suffix 7.
    #[must_use]
    pub fn db_port(self) -> u16 {
        // Bounded by Suffix::MAX, cannot exceed NODE_PORT_MAX.
        DB_PORT_BASE.saturating_add(u16::try_from(self.0).unwrap_or(u16::MAX))
    }

    #[must_use]
    pub fn operator_namespace(self) -> String {
        format!("operator{}", self.0)
    }

    #[must_use]
    pub fn operator_release(self) -> String {
        format!("op{}", self.0)
    }

    #[must_use]
    pub fn domain_namespace(self) -> String {
        format!("domainns{}", self.0)
    }

    #[must_use]
    pub fn domain_uid(self) -> String {
        format!("domain{}", self.0)
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of run-unique suffixes, shared by reference across orchestrators.
pub trait SuffixAllocator: Send + Sync {
    /// Increment the shared counter exactly once and return the prior value.
    fn next_suffix(&self) -> Result<Suffix, AllocationError>;
}

/// In-memory counter for classes running as threads or tasks in one process.
#[derive(Debug, Default)]
pub struct AtomicSuffixAllocator {
    next: AtomicU32,
}

impl AtomicSuffixAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the counter somewhere other than zero (reruns, tests).
    #[must_use]
    pub fn starting_at(value: u32) -> Self {
        Self {
            next: AtomicU32::new(value),
        }
    }
}

impl SuffixAllocator for AtomicSuffixAllocator {
    fn next_suffix(&self) -> Result<Suffix, AllocationError> {
        let value = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current <= Suffix::MAX).then_some(current + 1)
            })
            .map_err(|value| AllocationError::Exhausted {
                value,
                max: Suffix::MAX,
            })?;
        Suffix::new(value)
    }
}

/// Counter file shared by harness processes on one host.
///
/// The file holds the next suffix to hand out, optionally followed by the id
/// of the run that owns the count (`"12 build-481\n"`). Each allocation takes
/// an exclusive `flock`, reads, writes the increment, and releases.
///
/// An allocator bound to a run id treats a store owned by any other run as
/// zero, so the first class of a new run resets the counter without a
/// separate reset step.
#[derive(Debug, Clone)]
pub struct FileSuffixAllocator {
    path: PathBuf,
    run_id: Option<String>,
}

impl FileSuffixAllocator {
    /// Reset the store to zero. Called once at the start of a run.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, AllocationError> {
        let allocator = Self::open(path);
        let mut file = allocator.open_locked()?;
        allocator.write_value(&mut file, 0)?;
        Ok(allocator)
    }

    /// Attach to an existing store without resetting it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_id: None,
        }
    }

    /// Attach to the store for `run_id`. A count left by another run is
    /// discarded on the next allocation.
    pub fn for_run(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: Some(run_id.into()),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, source: std::io::Error) -> AllocationError {
        AllocationError::StoreUnavailable {
            path: self.path.clone(),
            source,
        }
    }

    fn open_locked(&self) -> Result<File, AllocationError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| self.unavailable(e))?;
        flock::lock_exclusive(&file).map_err(|e| self.unavailable(e))?;
        Ok(file)
    }

    fn read_value(&self, file: &mut File) -> Result<u32, AllocationError> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| self.unavailable(e))?;
        let mut fields = contents.split_whitespace();
        let Some(count) = fields.next() else {
            return Ok(0);
        };
        let stored_run = fields.next();
        let (Ok(value), None) = (count.parse::<u32>(), fields.next()) else {
            return Err(AllocationError::Corrupted {
                path: self.path.clone(),
                contents: contents.clone(),
            });
        };
        match &self.run_id {
            Some(run) if stored_run != Some(run.as_str()) => {
                info!(target: "harness.allocator", store = %self.path.display(), run_id = %run, previous_run = stored_run.unwrap_or("-"), "Suffix store belongs to another run, restarting at 0");
                Ok(0)
            }
            _ => Ok(value),
        }
    }

    fn write_value(&self, file: &mut File, value: u32) -> Result<(), AllocationError> {
        let line = match &self.run_id {
            Some(run) => format!("{value} {run}"),
            None => value.to_string(),
        };
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.set_len(0))
            .and_then(|()| writeln!(file, "{line}"))
            .and_then(|()| file.sync_data())
            .map_err(|e| self.unavailable(e))
    }
}

impl SuffixAllocator for FileSuffixAllocator {
    fn next_suffix(&self) -> Result<Suffix, AllocationError> {
        // The lock is held until `file` drops at the end of this scope.
        let mut file = self.open_locked()?;
        let value = self.read_value(&mut file)?;
        let suffix = Suffix::new(value)?;
        self.write_value(&mut file, value + 1)?;
        debug!(target: "harness.allocator", suffix = value, store = %self.path.display(), "Allocated suffix");
        Ok(suffix)
    }
}
