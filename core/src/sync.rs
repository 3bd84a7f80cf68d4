//! Push/pull reconciliation between the Local Store and the Remote Store.
//!
//! Conflict policy:
//!
//! - Pushes overwrite the remote document wholesale, keyed by principal (goals) or entry id.
//! - Goal pulls overwrite the local goal row (last writer wins).
//! - Entry pulls are additive: only ids never seen locally are inserted. Existing local rows
//!   are never updated or removed by a pull, so a local edit always survives.
//!
//! Every operation reads the current principal when it starts and does nothing without one.
//! Progress is published on a [`watch`] channel of [`SyncStatus`].

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use crate::identity::IdentityProvider;
use crate::local::LocalStore;
use crate::models::{GoalSet, LogEntry};
use crate::remote::{
    EntryDocument, GoalsDocument, RemoteEntry, RemoteStore, entry_keys, parse_entry_key,
};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure or a write the remote side rejected.
    #[error("remote store: {0:#}")]
    Remote(anyhow::Error),

    /// The Local Store failed to read or commit.
    #[error("local store: {0:#}")]
    Local(anyhow::Error),
}

/// What a sync operation did. `principal` is `None` when it was skipped for lack of one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub principal: Option<String>,
    pub goals_pushed: u32,
    pub goals_pulled: u32,
    pub entries_pushed: u32,
    pub entries_deleted: u32,
    pub entries_inserted: u32,
    pub entries_present: u32,
    pub entries_malformed: u32,
}

impl SyncReport {
    #[must_use]
    pub fn skipped(&self) -> bool {
        self.principal.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Operations currently running. Concurrent operations each count.
    pub in_flight: usize,
    pub last_error: Option<String>,
    pub last_completed: Option<DateTime<Utc>>,
}

impl SyncStatus {
    #[must_use]
    pub fn syncing(&self) -> bool {
        self.in_flight > 0
    }
}

/// Marks one operation as running for as long as it is alive.
struct InFlight<'a> {
    status: &'a watch::Sender<SyncStatus>,
}

impl<'a> InFlight<'a> {
    fn begin(status: &'a watch::Sender<SyncStatus>) -> Self {
        status.send_modify(|s| {
            s.in_flight += 1;
            s.last_error = None;
        });
        Self { status }
    }

    fn finish(self, result: &Result<SyncReport, SyncError>) {
        self.status.send_modify(|s| match result {
            Ok(_) => s.last_completed = Some(Utc::now()),
            Err(e) => s.last_error = Some(e.to_string()),
        });
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.status
            .send_modify(|s| s.in_flight = s.in_flight.saturating_sub(1));
    }
}

pub struct SyncEngine {
    local: LocalStore,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            local,
            remote,
            identity,
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Resolve the principal, run `op` for it and record the outcome on the status channel.
    async fn tracked<F, Fut>(&self, name: &'static str, op: F) -> Result<SyncReport, SyncError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<SyncReport, SyncError>>,
    {
        let Some(principal) = self.identity.current_principal() else {
            debug!(op = name, "no principal signed in, skipping");
            return Ok(SyncReport::default());
        };

        let guard = InFlight::begin(&self.status);
        let result = op(principal.clone()).await.map(|mut report| {
            report.principal = Some(principal.clone());
            report
        });
        guard.finish(&result);

        match result {
            Ok(ref report) => info!(
                op = name,
                principal = %principal,
                goals_pushed = report.goals_pushed,
                goals_pulled = report.goals_pulled,
                entries_pushed = report.entries_pushed,
                entries_deleted = report.entries_deleted,
                entries_inserted = report.entries_inserted,
                "sync operation completed"
            ),
            Err(ref e) => warn!(op = name, principal = %principal, error = %e, "sync operation failed"),
        }
        result
    }

    /// Overwrite the remote goals document with `goals`.
    pub async fn push_goals(&self, goals: &GoalSet) -> Result<SyncReport, SyncError> {
        self.tracked("push_goals", |p| async move {
            let mut report = SyncReport::default();
            self.push_goals_for(&p, goals, &mut report).await?;
            Ok::<_, SyncError>(report)
        })
        .await
    }

    pub async fn pull_goals(&self) -> Result<SyncReport, SyncError> {
        self.tracked("pull_goals", |p| async move {
            let mut report = SyncReport::default();
            self.pull_goals_for(&p, &mut report).await?;
            Ok::<_, SyncError>(report)
        })
        .await
    }

    pub async fn push_entry(&self, entry: &LogEntry) -> Result<SyncReport, SyncError> {
        self.tracked("push_entry", |p| async move {
            let mut report = SyncReport::default();
            self.push_entry_for(&p, entry, &mut report).await?;
            Ok::<_, SyncError>(report)
        })
        .await
    }

    /// Remove the entry's remote document under every key it may be stored under. A document
    /// that is already gone is fine.
    pub async fn delete_entry(&self, entry: &LogEntry) -> Result<SyncReport, SyncError> {
        self.tracked("delete_entry", |p| async move {
            for key in entry_keys(entry.id) {
                self.remote
                    .delete_entry(&p, &key)
                    .await
                    .map_err(SyncError::Remote)?;
            }
            Ok::<_, SyncError>(SyncReport {
                entries_deleted: 1,
                ..SyncReport::default()
            })
        })
        .await
    }

    pub async fn pull_entries(&self) -> Result<SyncReport, SyncError> {
        self.tracked("pull_entries", |p| async move {
            let mut report = SyncReport::default();
            self.pull_entries_for(&p, &mut report).await?;
            Ok::<_, SyncError>(report)
        })
        .await
    }

    /// Pull goals, then entries. The entry pull runs even when the goal pull failed; the
    /// first error is returned.
    pub async fn full_sync(&self) -> Result<SyncReport, SyncError> {
        self.tracked("full_sync", |p| async move {
            let mut report = SyncReport::default();
            let goals = self.pull_goals_for(&p, &mut report).await;
            if let Err(ref e) = goals {
                warn!(principal = %p, error = %e, "goal pull failed, still pulling entries");
            }
            let entries = self.pull_entries_for(&p, &mut report).await;
            if goals.is_err() || entries.is_err() {
                debug!(
                    principal = %p,
                    goals_pulled = report.goals_pulled,
                    entries_inserted = report.entries_inserted,
                    "full sync partially applied"
                );
            }
            goals.and(entries).map(|()| report)
        })
        .await
    }

    /// Push the principal's local goals and every local entry. Used to seed an empty remote.
    pub async fn push_all(&self) -> Result<SyncReport, SyncError> {
        self.tracked("push_all", |p| async move {
            let mut report = SyncReport::default();
            if let Some(goals) = self.local.goals_for(&p).map_err(SyncError::Local)? {
                self.push_goals_for(&p, &goals, &mut report).await?;
            }
            for entry in self.local.entries_for(&p).map_err(SyncError::Local)? {
                self.push_entry_for(&p, &entry, &mut report).await?;
            }
            Ok::<_, SyncError>(report)
        })
        .await
    }

    // --- Steps ---

    async fn push_goals_for(
        &self,
        principal: &str,
        goals: &GoalSet,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        self.remote
            .set_goals(principal, &GoalsDocument::from_goals(goals))
            .await
            .map_err(SyncError::Remote)?;
        report.goals_pushed += 1;
        Ok(())
    }

    async fn pull_goals_for(&self, principal: &str, report: &mut SyncReport) -> Result<(), SyncError> {
        let Some(doc) = self
            .remote
            .get_goals(principal)
            .await
            .map_err(SyncError::Remote)?
        else {
            debug!(principal, "no remote goals");
            return Ok(());
        };
        let goals = doc.into_goals(principal).map_err(SyncError::Remote)?;
        self.local.upsert_goals(&goals).map_err(SyncError::Local)?;
        report.goals_pulled += 1;
        Ok(())
    }

    async fn push_entry_for(
        &self,
        principal: &str,
        entry: &LogEntry,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        self.remote
            .set_entry(principal, &entry.id.to_string(), &EntryDocument::from_entry(entry))
            .await
            .map_err(SyncError::Remote)?;
        report.entries_pushed += 1;
        Ok(())
    }

    async fn pull_entries_for(&self, principal: &str, report: &mut SyncReport) -> Result<(), SyncError> {
        let remote_entries = self
            .remote
            .list_entries(principal)
            .await
            .map_err(SyncError::Remote)?;

        for RemoteEntry { id, data } in remote_entries {
            let Some(uuid) = parse_entry_key(&id) else {
                warn!(principal, id = %id, "skipping remote entry with a malformed key");
                report.entries_malformed += 1;
                continue;
            };
            if self.local.entry_exists(uuid).map_err(SyncError::Local)? {
                report.entries_present += 1;
                continue;
            }
            let inserted = self
                .local
                .insert_entry_if_absent(&data.into_entry(uuid, principal))
                .map_err(SyncError::Local)?;
            if inserted {
                report.entries_inserted += 1;
            } else {
                // Another pull inserted it between the check and the insert.
                report.entries_present += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use serde_json::json;
    use uuid::Uuid;

    use crate::db::Database;
    use crate::identity::Session;
    use crate::models::{MealType, NewLogEntry};
    use crate::remote::{DocumentStore, MemoryRemote};

    struct Fixture {
        engine: Arc<SyncEngine>,
        local: LocalStore,
        remote: Arc<MemoryRemote>,
        session: Arc<Session>,
    }

    fn fixture(principal: Option<&str>) -> Fixture {
        let local = LocalStore::new(Arc::new(Mutex::new(Database::open_in_memory().unwrap())));
        let remote = Arc::new(MemoryRemote::in_memory());
        let session = Arc::new(Session::new(principal.map(str::to_string)));
        let engine = Arc::new(SyncEngine::new(
            local.clone(),
            remote.clone(),
            session.clone(),
        ));
        Fixture {
            engine,
            local,
            remote,
            session,
        }
    }

    fn entry(principal: &str, carbs: f64) -> LogEntry {
        NewLogEntry {
            date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            meal_type: MealType::Snack,
            food_name: "Apple".to_string(),
            carbs,
            protein: 0.0,
            fat: 0.0,
            calories: None,
            barcode: None,
        }
        .into_entry(principal)
    }

    async fn seed_remote_entry(remote: &MemoryRemote, principal: &str, e: &LogEntry) {
        remote
            .set_entry(principal, &e.id.to_string(), &EntryDocument::from_entry(e))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_goals_is_idempotent() {
        let f = fixture(Some("alice"));
        let goals = GoalSet::new("alice", 100.0, 80.0, 50.0);

        f.engine.push_goals(&goals).await.unwrap();
        let once = f.remote.documents().read("users/alice/data/goals").unwrap();
        for _ in 0..3 {
            f.engine.push_goals(&goals).await.unwrap();
        }
        let many = f.remote.documents().read("users/alice/data/goals").unwrap();
        assert_eq!(once, many);
        assert_eq!(f.remote.documents().len(), 1);
    }

    #[tokio::test]
    async fn test_push_then_pull_goals_into_empty_store() {
        let f = fixture(Some("alice"));
        f.engine
            .push_goals(&GoalSet::new("alice", 100.0, 80.0, 50.0))
            .await
            .unwrap();

        let report = f.engine.pull_goals().await.unwrap();
        assert_eq!(report.goals_pulled, 1);

        let goals = f.local.goals_for("alice").unwrap().unwrap();
        assert_eq!(goals.carbs, 100.0);
        assert_eq!(goals.protein, 80.0);
        assert_eq!(goals.fat, 50.0);
        assert_eq!(goals.calories(), 1170.0);
    }

    #[tokio::test]
    async fn test_pull_goals_absent_leaves_local_untouched() {
        let f = fixture(Some("alice"));
        f.local.upsert_goals(&GoalSet::new("alice", 1.0, 2.0, 3.0)).unwrap();
        let report = f.engine.pull_goals().await.unwrap();
        assert_eq!(report.goals_pulled, 0);
        assert_eq!(f.local.goals_for("alice").unwrap().unwrap().carbs, 1.0);
    }

    #[tokio::test]
    async fn test_pull_goals_overwrites_local_row() {
        let f = fixture(Some("alice"));
        f.local.upsert_goals(&GoalSet::new("alice", 1.0, 2.0, 3.0)).unwrap();
        f.remote
            .documents()
            .write("users/alice/data/goals", &json!({ "carbs": 200, "protein": 90 }))
            .unwrap();

        f.engine.pull_goals().await.unwrap();
        let goals = f.local.goals_for("alice").unwrap().unwrap();
        assert_eq!(goals.carbs, 200.0);
        assert_eq!(goals.protein, 90.0);
        assert_eq!(goals.fat, 0.0);
    }

    #[tokio::test]
    async fn test_pull_entries_is_additive() {
        let f = fixture(Some("alice"));
        let a_local = entry("alice", 10.0);
        f.local.insert_entry_if_absent(&a_local).unwrap();

        let mut a_remote = a_local.clone();
        a_remote.carbs = 20.0;
        let b_remote = entry("alice", 5.0);
        seed_remote_entry(&f.remote, "alice", &a_remote).await;
        seed_remote_entry(&f.remote, "alice", &b_remote).await;

        let report = f.engine.pull_entries().await.unwrap();
        assert_eq!(report.entries_inserted, 1);
        assert_eq!(report.entries_present, 1);

        let entries = f.local.entries_for("alice").unwrap();
        assert_eq!(entries.len(), 2);
        let a = entries.iter().find(|e| e.id == a_local.id).unwrap();
        let b = entries.iter().find(|e| e.id == b_remote.id).unwrap();
        assert_eq!(a.carbs, 10.0);
        assert_eq!(b.carbs, 5.0);
    }

    #[tokio::test]
    async fn test_pull_entries_twice_does_not_duplicate() {
        let f = fixture(Some("alice"));
        seed_remote_entry(&f.remote, "alice", &entry("alice", 5.0)).await;

        f.engine.pull_entries().await.unwrap();
        let second = f.engine.pull_entries().await.unwrap();
        assert_eq!(second.entries_inserted, 0);
        assert_eq!(f.local.entries_for("alice").unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pulls_insert_each_id_once() {
        let f = fixture(Some("alice"));
        for i in 0..20 {
            seed_remote_entry(&f.remote, "alice", &entry("alice", f64::from(i))).await;
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = Arc::clone(&f.engine);
            handles.push(tokio::spawn(async move { engine.pull_entries().await }));
        }
        let mut inserted = 0;
        for handle in handles {
            inserted += handle.await.unwrap().unwrap().entries_inserted;
        }
        assert_eq!(inserted, 20);
        assert_eq!(f.local.entries_for("alice").unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_pulled_entries_belong_to_current_principal() {
        let f = fixture(Some("alice"));
        let foreign = entry("mallory", 5.0);
        seed_remote_entry(&f.remote, "alice", &foreign).await;

        f.engine.pull_entries().await.unwrap();
        let entries = f.local.entries_for("alice").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_id, "alice");
    }

    #[tokio::test]
    async fn test_pull_entries_skips_non_uuid_keys() {
        let f = fixture(Some("alice"));
        f.remote
            .documents()
            .write("users/alice/entries/not-a-uuid", &json!({ "foodName": "Tea" }))
            .unwrap();
        seed_remote_entry(&f.remote, "alice", &entry("alice", 5.0)).await;

        let report = f.engine.pull_entries().await.unwrap();
        assert_eq!(report.entries_malformed, 1);
        assert_eq!(report.entries_inserted, 1);
    }

    #[tokio::test]
    async fn test_pull_entries_skips_non_hyphenated_keys() {
        let f = fixture(Some("alice"));
        let id = Uuid::new_v4();
        for key in [id.simple().to_string(), id.braced().to_string()] {
            f.remote
                .documents()
                .write(&format!("users/alice/entries/{key}"), &json!({ "foodName": "Tea" }))
                .unwrap();
        }

        let report = f.engine.pull_entries().await.unwrap();
        assert_eq!(report.entries_malformed, 2);
        assert_eq!(report.entries_inserted, 0);
        assert!(f.local.entries_for("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_uppercase_keyed_entry_stays_deleted() {
        let f = fixture(Some("alice"));
        let seeded = entry("alice", 5.0);
        let upper_key = seeded.id.to_string().to_uppercase();
        f.remote
            .set_entry("alice", &upper_key, &EntryDocument::from_entry(&seeded))
            .await
            .unwrap();

        let report = f.engine.pull_entries().await.unwrap();
        assert_eq!(report.entries_inserted, 1);
        let mut pulled = f.local.entries_for("alice").unwrap().remove(0);
        assert_eq!(pulled.id, seeded.id);

        // An edit is pushed under the lowercase key next to the uppercase original.
        pulled.carbs = 7.0;
        f.engine.push_entry(&pulled).await.unwrap();
        assert_eq!(f.remote.list_entries("alice").await.unwrap().len(), 2);
        assert_eq!(f.engine.pull_entries().await.unwrap().entries_present, 2);

        f.engine.delete_entry(&pulled).await.unwrap();
        assert!(f.remote.list_entries("alice").await.unwrap().is_empty());
        f.local.with(|db| db.delete_entry(pulled.id)).unwrap();

        let report = f.engine.pull_entries().await.unwrap();
        assert_eq!(report.entries_inserted, 0);
        assert!(f.local.entries_for("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_entry_is_idempotent() {
        let f = fixture(Some("alice"));
        let e = entry("alice", 5.0);
        let other = entry("alice", 6.0);
        f.engine.push_entry(&e).await.unwrap();
        f.engine.push_entry(&other).await.unwrap();

        f.engine.delete_entry(&e).await.unwrap();
        let after_once = f.remote.list_entries("alice").await.unwrap();
        f.engine.delete_entry(&e).await.unwrap();
        let after_twice = f.remote.list_entries("alice").await.unwrap();

        assert_eq!(after_once, after_twice);
        assert_eq!(after_twice.len(), 1);
        assert_eq!(after_twice[0].id, other.id.to_string());
    }

    #[tokio::test]
    async fn test_push_entry_overwrites_wholesale() {
        let f = fixture(Some("alice"));
        let mut e = entry("alice", 5.0);
        e.calories = Some(42.0);
        f.engine.push_entry(&e).await.unwrap();
        e.calories = None;
        e.food_name = "Pear".to_string();
        f.engine.push_entry(&e).await.unwrap();

        let listed = f.remote.list_entries("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].data.food_name, "Pear");
        assert!(listed[0].data.calories.is_none());
    }

    #[tokio::test]
    async fn test_no_principal_is_a_silent_noop() {
        let f = fixture(None);
        let e = entry("alice", 5.0);
        f.local.insert_entry_if_absent(&e).unwrap();
        seed_remote_entry(&f.remote, "alice", &entry("alice", 1.0)).await;
        let docs_before = f.remote.documents().len();

        let goals = GoalSet::new("alice", 1.0, 1.0, 1.0);
        let reports = vec![
            f.engine.push_goals(&goals).await.unwrap(),
            f.engine.pull_goals().await.unwrap(),
            f.engine.push_entry(&e).await.unwrap(),
            f.engine.delete_entry(&e).await.unwrap(),
            f.engine.pull_entries().await.unwrap(),
            f.engine.full_sync().await.unwrap(),
            f.engine.push_all().await.unwrap(),
        ];
        assert!(reports.iter().all(SyncReport::skipped));
        assert!(reports.iter().all(|r| *r == SyncReport::default()));

        assert_eq!(f.remote.documents().len(), docs_before);
        assert_eq!(f.local.entries_for("alice").unwrap(), vec![e]);
        assert!(f.local.goals_for("alice").unwrap().is_none());
        assert_eq!(f.engine.current_status(), SyncStatus::default());
    }

    #[tokio::test]
    async fn test_principal_is_read_per_operation() {
        let f = fixture(None);
        f.engine.pull_entries().await.unwrap();
        f.session.sign_in("alice");
        seed_remote_entry(&f.remote, "alice", &entry("alice", 1.0)).await;

        let report = f.engine.full_sync().await.unwrap();
        assert_eq!(report.principal.as_deref(), Some("alice"));
        assert_eq!(report.entries_inserted, 1);
    }

    #[tokio::test]
    async fn test_remote_failure_sets_last_error() {
        let f = fixture(Some("alice"));
        f.remote.set_reachable(false);

        let err = f.engine.full_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        let status = f.engine.current_status();
        assert!(!status.syncing());
        assert!(status.last_error.unwrap().contains("unreachable"));
        assert!(status.last_completed.is_none());

        f.remote.set_reachable(true);
        f.engine.full_sync().await.unwrap();
        let status = f.engine.current_status();
        assert!(status.last_error.is_none());
        assert!(status.last_completed.is_some());
    }

    #[tokio::test]
    async fn test_local_failure_surfaces_as_local_error() {
        let f = fixture(Some("alice"));
        seed_remote_entry(&f.remote, "alice", &entry("alice", 3.0)).await;
        f.local
            .with(|db| Ok(db.connection().execute_batch("DROP TABLE log_entries")?))
            .unwrap();

        let err = f.engine.pull_entries().await.unwrap_err();
        assert!(matches!(err, SyncError::Local(_)));
        let status = f.engine.current_status();
        assert_eq!(status.in_flight, 0);
        assert!(status.last_error.unwrap().starts_with("local store:"));
        assert!(status.last_completed.is_none());
    }

    #[tokio::test]
    async fn test_pull_goals_rejects_negative_values() {
        let f = fixture(Some("alice"));
        f.local.upsert_goals(&GoalSet::new("alice", 1.0, 2.0, 3.0)).unwrap();
        f.remote
            .documents()
            .write("users/alice/data/goals", &json!({ "carbs": -40, "protein": 90 }))
            .unwrap();

        let err = f.engine.pull_goals().await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert_eq!(f.local.goals_for("alice").unwrap().unwrap().carbs, 1.0);
        assert_eq!(f.engine.current_status().in_flight, 0);
    }

    #[tokio::test]
    async fn test_full_sync_pulls_entries_after_goal_failure() {
        let f = fixture(Some("alice"));
        f.remote
            .documents()
            .write("users/alice/data/goals", &json!("garbage"))
            .unwrap();
        seed_remote_entry(&f.remote, "alice", &entry("alice", 3.0)).await;

        assert!(f.engine.full_sync().await.is_err());
        assert_eq!(f.local.entries_for("alice").unwrap().len(), 1);
        assert!(f.local.goals_for("alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_all_seeds_remote() {
        let f = fixture(Some("alice"));
        f.local.upsert_goals(&GoalSet::new("alice", 1.0, 2.0, 3.0)).unwrap();
        f.local.insert_entry_if_absent(&entry("alice", 1.0)).unwrap();
        f.local.insert_entry_if_absent(&entry("alice", 2.0)).unwrap();
        f.local.insert_entry_if_absent(&entry("bob", 2.0)).unwrap();

        let report = f.engine.push_all().await.unwrap();
        assert_eq!(report.goals_pushed, 1);
        assert_eq!(report.entries_pushed, 2);
        assert!(f.remote.get_goals("alice").await.unwrap().is_some());
        assert_eq!(f.remote.list_entries("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_channel_observes_completion() {
        let f = fixture(Some("alice"));
        let mut rx = f.engine.status();
        f.engine.pull_goals().await.unwrap();
        assert!(rx.has_changed().unwrap());
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.in_flight, 0);
        assert!(status.last_completed.is_some());
    }
}
