use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connectivity::ConnectivityMonitor;
use crate::db::Database;
use crate::identity::IdentityProvider;
use crate::local::LocalStore;
use crate::models::{
    CachedFood, DailySummary, FoodFacts, GoalSet, LogEntry, NewLogEntry, UpdateLogEntry, validate_macros,
};
use crate::remote::RemoteStore;
use crate::sync::{SyncEngine, SyncError, SyncReport};

/// Nutrition lookup by product barcode.
///
/// The CLI implements this against Open Food Facts. Results are cached locally by
/// [`MacroService::barcode_lookup`].
#[async_trait]
pub trait FoodLookupProvider: Send + Sync {
    async fn lookup_barcode(&self, barcode: &str) -> Result<Option<FoodFacts>>;
}

/// The detached sync task started by a mutation. Dropping it does not cancel the task.
pub type SyncHandle = JoinHandle<Result<SyncReport, SyncError>>;

/// Entry point for the front end: local reads and writes, with every mutation mirrored to
/// the remote store in the background.
///
/// Methods that start sync work spawn onto the current Tokio runtime.
pub struct MacroService {
    local: LocalStore,
    engine: Arc<SyncEngine>,
    identity: Arc<dyn IdentityProvider>,
}

impl MacroService {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let local = LocalStore::new(Arc::new(Mutex::new(db)));
        let engine = Arc::new(SyncEngine::new(
            local.clone(),
            remote,
            Arc::clone(&identity),
        ));
        Self {
            local,
            engine,
            identity,
        }
    }

    pub fn open(
        db_path: &Path,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        Ok(Self::new(Database::open(db_path)?, remote, identity))
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn principal(&self) -> Result<String> {
        self.identity
            .current_principal()
            .context("Not signed in. Run `macrotrack signin <principal>` first")
    }

    fn spawn_sync<F, Fut>(&self, op: F) -> SyncHandle
    where
        F: FnOnce(Arc<SyncEngine>) -> Fut,
        Fut: Future<Output = Result<SyncReport, SyncError>> + Send + 'static,
    {
        tokio::spawn(op(Arc::clone(&self.engine)))
    }

    // --- Goals ---

    pub fn goals(&self) -> Result<Option<GoalSet>> {
        let principal = self.principal()?;
        self.local.goals_for(&principal)
    }

    pub fn save_goals(&self, carbs: f64, protein: f64, fat: f64) -> Result<(GoalSet, SyncHandle)> {
        validate_macros(carbs, protein, fat)?;
        let principal = self.principal()?;
        let goals = GoalSet::new(&principal, carbs, protein, fat);
        self.local.upsert_goals(&goals)?;
        debug!(principal = %principal, "goals saved locally");

        let pushed = goals.clone();
        let handle = self.spawn_sync(|engine| async move { engine.push_goals(&pushed).await });
        Ok((goals, handle))
    }

    // --- Entries ---

    pub fn log_entry(&self, new: NewLogEntry) -> Result<(LogEntry, SyncHandle)> {
        new.validate()?;
        let principal = self.principal()?;
        let entry = new.into_entry(&principal);
        self.local.with(|db| db.insert_entry(&entry))?;
        debug!(id = %entry.id, "entry saved locally");

        let pushed = entry.clone();
        let handle = self.spawn_sync(|engine| async move { engine.push_entry(&pushed).await });
        Ok((entry, handle))
    }

    /// The principal's entry with `id`. Entries owned by someone else are reported missing.
    pub fn get_entry(&self, id: Uuid) -> Result<LogEntry> {
        let principal = self.principal()?;
        self.local
            .with(|db| db.get_entry(id))?
            .filter(|e| e.user_id == principal)
            .with_context(|| format!("Entry {id} not found"))
    }

    pub fn edit_entry(&self, id: Uuid, update: &UpdateLogEntry) -> Result<(LogEntry, SyncHandle)> {
        if update.is_empty() {
            bail!("Nothing to update");
        }
        self.get_entry(id)?;
        let entry = self.local.with(|db| db.update_entry(id, update))?;

        let pushed = entry.clone();
        let handle = self.spawn_sync(|engine| async move { engine.push_entry(&pushed).await });
        Ok((entry, handle))
    }

    /// Start the remote delete, then delete locally.
    pub fn remove_entry(&self, id: Uuid) -> Result<SyncHandle> {
        let entry = self.get_entry(id)?;
        let handle = self.spawn_sync(|engine| async move { engine.delete_entry(&entry).await });
        self.local.with(|db| db.delete_entry(id))?;
        Ok(handle)
    }

    pub fn entries_for_date(&self, date: NaiveDate) -> Result<Vec<LogEntry>> {
        let principal = self.principal()?;
        self.local.with(|db| db.entries_for_date(&principal, date))
    }

    pub fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let principal = self.principal()?;
        self.local.with(|db| db.build_daily_summary(&principal, date))
    }

    // --- Lookup ---

    /// Cached facts for `barcode`, asking `provider` only on a cache miss.
    pub async fn barcode_lookup(
        &self,
        provider: &dyn FoodLookupProvider,
        barcode: &str,
    ) -> Result<Option<CachedFood>> {
        let barcode = barcode.trim();
        if barcode.is_empty() {
            bail!("Barcode must not be empty");
        }
        if let Some(cached) = self.local.with(|db| db.get_cached_food(barcode))? {
            debug!(barcode, "lookup cache hit");
            return Ok(Some(cached));
        }
        let Some(facts) = provider.lookup_barcode(barcode).await? else {
            return Ok(None);
        };
        let cached = self.local.with(|db| db.cache_food(&facts))?;
        Ok(Some(cached))
    }

    // --- Sync triggers ---

    pub fn full_sync(&self) -> SyncHandle {
        self.spawn_sync(|engine| async move { engine.full_sync().await })
    }

    pub fn push_all(&self) -> SyncHandle {
        self.spawn_sync(|engine| async move { engine.push_all().await })
    }

    /// Run a full sync every time a principal signs in.
    pub fn watch_identity(&self) -> JoinHandle<()> {
        let mut changes = self.identity.subscribe();
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let principal = changes.borrow_and_update().clone();
                let Some(principal) = principal else {
                    debug!("signed out");
                    continue;
                };
                info!(principal = %principal, "signed in, starting full sync");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    if let Err(e) = engine.full_sync().await {
                        warn!(error = %e, "sign-in sync failed");
                    }
                });
            }
        })
    }

    /// Make `monitor` start a full sync on every reconnect.
    ///
    /// Must be called from within a Tokio runtime; the callback spawns onto that runtime
    /// from whichever thread delivers the signal.
    pub fn bind_reconnect(&self, monitor: &mut ConnectivityMonitor) {
        let runtime = tokio::runtime::Handle::current();
        let engine = Arc::clone(&self.engine);
        monitor.on_reconnect(move || {
            let engine = Arc::clone(&engine);
            let started = Utc::now();
            runtime.spawn(async move {
                match engine.full_sync().await {
                    Ok(report) => debug!(
                        entries_inserted = report.entries_inserted,
                        elapsed_ms = (Utc::now() - started).num_milliseconds(),
                        "reconnect sync finished"
                    ),
                    Err(e) => warn!(error = %e, "reconnect sync failed"),
                }
            });
        });
    }
}
