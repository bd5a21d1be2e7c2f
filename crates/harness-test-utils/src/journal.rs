//! Ordered record of resource lifecycle events.
//!
//! Every scripted resource in a test shares one journal, so assertions can
//! check ordering across resources ("Database torn down after RcuSchema").

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Created(String),
    CreateFailed(String),
    TornDown(String),
    TeardownFailed(String),
}

impl JournalEntry {
    pub fn name(&self) -> &str {
        match self {
            JournalEntry::Created(n)
            | JournalEntry::CreateFailed(n)
            | JournalEntry::TornDown(n)
            | JournalEntry::TeardownFailed(n) => n,
        }
    }

    pub fn is_teardown(&self) -> bool {
        matches!(self, JournalEntry::TornDown(_) | JournalEntry::TeardownFailed(_))
    }
}

/// Shared, cloneable event log.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: JournalEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Names whose creation succeeded, in order.
    pub fn created(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Created(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Names a teardown was attempted for, in order, failed or not.
    pub fn torn_down(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(JournalEntry::is_teardown)
            .map(|e| e.name().to_string())
            .collect()
    }

    /// How many times a teardown was attempted for `name`.
    pub fn teardown_count(&self, name: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.is_teardown() && e.name() == name)
            .count()
    }

    /// Whether `name` was ever asked to create, successfully or not.
    pub fn was_attempted(&self, name: &str) -> bool {
        self.entries()
            .iter()
            .any(|e| matches!(e, JournalEntry::Created(_) | JournalEntry::CreateFailed(_)) && e.name() == name)
    }
}
