//! The slice of the on-device database the sync engine reads and writes.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{GoalSet, LogEntry};

/// Shared handle to the Local Store. Every call takes the lock for a single statement and
/// releases it before returning, so it is never held across an `.await`.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    #[must_use]
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Run `f` with the database locked.
    pub fn with<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&db)
    }

    pub fn goals_for(&self, principal: &str) -> Result<Option<GoalSet>> {
        self.with(|db| db.get_goals(principal))
    }

    pub fn upsert_goals(&self, goals: &GoalSet) -> Result<()> {
        self.with(|db| db.upsert_goals(goals))
    }

    pub fn entry_exists(&self, id: Uuid) -> Result<bool> {
        self.with(|db| db.entry_exists(id))
    }

    pub fn insert_entry_if_absent(&self, entry: &LogEntry) -> Result<bool> {
        self.with(|db| db.insert_entry_if_absent(entry))
    }

    pub fn entries_for(&self, principal: &str) -> Result<Vec<LogEntry>> {
        self.with(|db| db.entries_for_user(principal))
    }
}
