//! External resource handles.
//!
//! A handle wraps one provisioning recipe together with the state needed to
//! undo it. Teardown is idempotent: it runs from failure paths where the
//! creation state may be inconsistent, so a second call, or a call on a handle
//! that was never created, only logs.

use crate::cluster::ClusterStateReader;
use crate::error::{ProvisionError, TeardownError};
use crate::eventual::PollPolicy;
use crate::process::ProcessRunner;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Database,
    SchemaInstance,
    Operator,
    Domain,
    Image,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Database => "Database",
            ResourceKind::SchemaInstance => "SchemaInstance",
            ResourceKind::Operator => "Operator",
            ResourceKind::Domain => "Domain",
            ResourceKind::Image => "Image",
        };
        f.write_str(name)
    }
}

/// Collaborators available to every create and teardown step.
#[derive(Clone)]
pub struct ProvisionContext {
    pub runner: Arc<dyn ProcessRunner>,
    pub cluster: Arc<dyn ClusterStateReader>,
    pub ready_policy: PollPolicy,
}

impl ProvisionContext {
    pub fn new(runner: Arc<dyn ProcessRunner>, cluster: Arc<dyn ClusterStateReader>) -> Self {
        Self {
            runner,
            cluster,
            ready_policy: PollPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_ready_policy(mut self, policy: PollPolicy) -> Self {
        self.ready_policy = policy;
        self
    }
}

/// One provisioning recipe: how to create a resource and how to remove it.
#[async_trait]
pub trait ExternalResource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Namespace, tag, or name a human would use to find the resource.
    fn identity(&self) -> String;

    async fn create(&mut self, ctx: &ProvisionContext) -> Result<(), ProvisionError>;

    async fn teardown(&mut self, ctx: &ProvisionContext) -> Result<(), TeardownError>;
}

/// What a teardown call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownAction {
    TornDown,
    AlreadyTornDown,
    NeverCreated,
}

/// A resource plus its lifecycle flags.
pub struct ResourceHandle {
    resource: Box<dyn ExternalResource>,
    created: bool,
    cleaned_up: bool,
}

impl ResourceHandle {
    pub fn new(resource: impl ExternalResource + 'static) -> Self {
        Self::from_boxed(Box::new(resource))
    }

    #[must_use]
    pub fn from_boxed(resource: Box<dyn ExternalResource>) -> Self {
        Self {
            resource,
            created: false,
            cleaned_up: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.resource.kind()
    }

    #[must_use]
    pub fn identity(&self) -> String {
        self.resource.identity()
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// True once a teardown has been attempted, successful or not.
    #[must_use]
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    pub async fn create(&mut self, ctx: &ProvisionContext) -> Result<(), ProvisionError> {
        if self.created {
            debug!(target: "harness.handle", kind = %self.kind(), identity = %self.identity(), "Already created");
            return Ok(());
        }
        self.resource.create(ctx).await?;
        self.created = true;
        Ok(())
    }

    /// Idempotent teardown. A failing attempt still marks the handle cleaned
    /// up; retrying a broken cleanup is left to the CI reaper.
    pub async fn teardown(&mut self, ctx: &ProvisionContext) -> Result<TeardownAction, TeardownError> {
        if self.cleaned_up {
            debug!(target: "harness.handle", kind = %self.kind(), identity = %self.identity(), "Teardown already attempted, skipping");
            return Ok(TeardownAction::AlreadyTornDown);
        }
        if !self.created {
            warn!(target: "harness.handle", kind = %self.kind(), identity = %self.identity(), "Teardown requested for resource that was never created");
            self.cleaned_up = true;
            return Ok(TeardownAction::NeverCreated);
        }
        self.cleaned_up = true;
        self.resource.teardown(ctx).await?;
        Ok(TeardownAction::TornDown)
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &self.kind())
            .field("identity", &self.identity())
            .field("created", &self.created)
            .field("cleaned_up", &self.cleaned_up)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterState;
    use crate::process::mock::MockProcessRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted {
        creates: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
        fail_create: bool,
        fail_teardown: bool,
    }

    #[async_trait]
    impl ExternalResource for Counted {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Database
        }

        fn identity(&self) -> String {
            "db0".to_string()
        }

        async fn create(&mut self, _ctx: &ProvisionContext) -> Result<(), ProvisionError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(ProvisionError::Invalid("db did not start".to_string()));
            }
            Ok(())
        }

        async fn teardown(&mut self, _ctx: &ProvisionContext) -> Result<(), TeardownError> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_teardown {
                return Err(TeardownError::new("Database db0", "stop script failed"));
            }
            Ok(())
        }
    }

    fn ctx() -> ProvisionContext {
        ProvisionContext::new(
            Arc::new(MockProcessRunner::new()),
            Arc::new(MockClusterState::new()),
        )
    }

    fn counted(fail_create: bool, fail_teardown: bool) -> (ResourceHandle, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let creates = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let handle = ResourceHandle::new(Counted {
            creates: creates.clone(),
            teardowns: teardowns.clone(),
            fail_create,
            fail_teardown,
        });
        (handle, creates, teardowns)
    }

    #[tokio::test]
    async fn test_teardown_twice_runs_once() {
        let (mut handle, _, teardowns) = counted(false, false);
        let ctx = ctx();
        handle.create(&ctx).await.unwrap();

        assert_eq!(handle.teardown(&ctx).await.unwrap(), TeardownAction::TornDown);
        assert_eq!(
            handle.teardown(&ctx).await.unwrap(),
            TeardownAction::AlreadyTornDown
        );
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_of_failed_create_is_noop() {
        let (mut handle, creates, teardowns) = counted(true, false);
        let ctx = ctx();
        assert!(handle.create(&ctx).await.is_err());
        assert!(!handle.is_created());

        assert_eq!(handle.teardown(&ctx).await.unwrap(), TeardownAction::NeverCreated);
        assert_eq!(creates.load(Ordering::SeqCst), 1);
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_teardown_not_retried() {
        let (mut handle, _, teardowns) = counted(false, true);
        let ctx = ctx();
        handle.create(&ctx).await.unwrap();

        assert!(handle.teardown(&ctx).await.is_err());
        assert!(handle.is_cleaned_up());
        assert_eq!(
            handle.teardown(&ctx).await.unwrap(),
            TeardownAction::AlreadyTornDown
        );
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (mut handle, creates, _) = counted(false, false);
        let ctx = ctx();
        handle.create(&ctx).await.unwrap();
        handle.create(&ctx).await.unwrap();
        assert_eq!(creates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_shows_state() {
        let (handle, _, _) = counted(false, false);
        let debug = format!("{handle:?}");
        assert!(debug.contains("Database"));
        assert!(debug.contains("db0"));
        assert!(debug.contains("created: false"));
    }
}
