//! # Harness Test Utilities
//!
//! Shared test utilities for the lifecycle harness.
//!
//! This crate provides scripted resources and fixtures for exercising chains
//! and orchestrators without a Kubernetes cluster.
//!
//! ## Modules
//!
//! - `journal` - Ordered record of create/teardown events across resources
//! - `scripted` - `ExternalResource` whose behavior is set per test
//! - `lease` - Lease backend that counts claims and releases
//! - `fixtures` - Pre-wired contexts, chains, and orchestrators
//! - `test_ids` - Fixed names used across tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harness_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let journal = Journal::new();
//!     let chain = scripted_chain(&journal, &["Database", "RcuSchema"], Some(1));
//!
//!     let err = chain.run(&mock_context()).await.unwrap_err();
//!     assert_eq!(err.failed_step(), Some("RcuSchema"));
//! }
//! ```

pub mod fixtures;
pub mod journal;
pub mod lease;
pub mod scripted;
pub mod test_ids;

// Re-export commonly used items
pub use fixtures::*;
pub use journal::*;
pub use lease::*;
pub use scripted::*;
pub use test_ids::*;
