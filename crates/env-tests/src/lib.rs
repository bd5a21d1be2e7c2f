//! Operator Integration Test Suite
//!
//! Test classes that provision real resources (database, RCU schema,
//! operator, domain, images) on a shared Kubernetes cluster through the
//! lifecycle harness. Each class leases the cluster, draws one suffix,
//! builds its chain, runs its tests, and cleans up according to the run's
//! cleanup policy.
//!
//! # Features
//!
//! - `smoke`: Tooling and cluster reachability checks (30s)
//! - `quick`: `QUICKTEST` classes: JRF domain-in-image with RCU (~20min)
//! - `full`: `FULLTEST` classes: image tool build and custom image use (45min+)
//! - `all`: Enable all test categories
//!
//! # Prerequisites
//!
//! 1. `kubectl`, `helm`, and `docker` in PATH with a reachable cluster
//! 2. `PROJECT_ROOT` pointing at the operator checkout (defaults to `..`)
//! 3. `JENKINS=true` on CI so resources are always cleaned up
//! 4. When classes run as separate processes: `SUFFIX_STORE` and `LEASE_DIR`
//!    on a shared path, plus `RUN_ID` (or Jenkins' `BUILD_TAG`) so each run
//!    restarts the suffix counter at 0
//!
//! `LOG_FORMAT=json` emits one JSON object per log event.
//!
//! # Usage
//!
//! ```bash
//! # From repo root - runs 0 env-tests (no default features)
//! cargo test
//!
//! # Preflight only
//! cargo test -p env-tests --features smoke
//!
//! # Quick classes, cleaning up even after failures
//! QUICKTEST=true FORCE_CLEANUP=true cargo test -p env-tests --features quick
//!
//! # Everything, as CI runs it
//! JENKINS=true QUICKTEST=true FULLTEST=true cargo test -p env-tests --features all
//! ```

pub mod classes;
pub mod cluster;
