//! `ExternalResource` with per-test behavior.

use crate::journal::{Journal, JournalEntry};
use async_trait::async_trait;
use harness_core::{ExternalResource, ProvisionContext, ProvisionError, ResourceKind, TeardownError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreateBehavior {
    Succeed,
    Fail,
    NeverReady,
    Hang,
}

/// A resource that records into a `Journal` and fails on request.
///
/// ```rust,ignore
/// let db = ScriptedResource::new("Database", &journal).of_kind(ResourceKind::Database);
/// let op = ScriptedResource::new("Operator", &journal).failing_create();
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedResource {
    name: String,
    kind: ResourceKind,
    journal: Journal,
    create: CreateBehavior,
    fail_teardown: bool,
}

impl ScriptedResource {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Database,
            journal: journal.clone(),
            create: CreateBehavior::Succeed,
            fail_teardown: false,
        }
    }

    pub fn of_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// `create` fails as if its command exited non-zero.
    pub fn failing_create(mut self) -> Self {
        self.create = CreateBehavior::Fail;
        self
    }

    /// `create` fails as if readiness never arrived.
    pub fn never_ready(mut self) -> Self {
        self.create = CreateBehavior::NeverReady;
        self
    }

    /// `create` never completes, like a command stuck on the cluster. Only a
    /// cancelled caller gets past it.
    pub fn hanging_create(mut self) -> Self {
        self.create = CreateBehavior::Hang;
        self
    }

    pub fn failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }
}

#[async_trait]
impl ExternalResource for ScriptedResource {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn identity(&self) -> String {
        self.name.clone()
    }

    async fn create(&mut self, _ctx: &ProvisionContext) -> Result<(), ProvisionError> {
        match self.create {
            CreateBehavior::Succeed => {
                self.journal.record(JournalEntry::Created(self.name.clone()));
                Ok(())
            }
            CreateBehavior::Fail => {
                self.journal.record(JournalEntry::CreateFailed(self.name.clone()));
                Err(ProvisionError::CommandFailed {
                    command: format!("create {}", self.name),
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("{} failed", self.name),
                })
            }
            CreateBehavior::NeverReady => {
                self.journal.record(JournalEntry::CreateFailed(self.name.clone()));
                Err(ProvisionError::NotReady {
                    resource: self.name.clone(),
                    timeout: Duration::from_secs(1),
                })
            }
            CreateBehavior::Hang => std::future::pending().await,
        }
    }

    async fn teardown(&mut self, _ctx: &ProvisionContext) -> Result<(), TeardownError> {
        if self.fail_teardown {
            self.journal.record(JournalEntry::TeardownFailed(self.name.clone()));
            return Err(TeardownError::new(&self.name, "scripted teardown failure"));
        }
        self.journal.record(JournalEntry::TornDown(self.name.clone()));
        Ok(())
    }
}
