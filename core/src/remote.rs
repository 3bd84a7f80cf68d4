//! Remote Store port and the document-shaped adapters behind it.
//!
//! The remote side is a per-principal document namespace:
//!
//! - `users/{principal}/data/goals` holds a single [`GoalsDocument`]
//! - `users/{principal}/entries/{id}` holds one [`EntryDocument`] per log entry
//!
//! Adapters return `anyhow::Result`; the sync engine decides how failures are classified.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::models::{GoalSet, LogEntry, MealType, local_date, local_midnight, validate_macros};

// --- Paths ---

pub struct DocumentPath;

impl DocumentPath {
    fn segment<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
        if value.is_empty() || value.contains('/') {
            bail!("Invalid {kind} '{value}' in document path");
        }
        Ok(value)
    }

    pub fn goals(principal: &str) -> Result<String> {
        Ok(format!("users/{}/data/goals", Self::segment("principal", principal)?))
    }

    pub fn entries(principal: &str) -> Result<String> {
        Ok(format!("users/{}/entries", Self::segment("principal", principal)?))
    }

    pub fn entry(principal: &str, id: &str) -> Result<String> {
        Ok(format!(
            "{}/{}",
            Self::entries(principal)?,
            Self::segment("entry id", id)?
        ))
    }
}

/// Parse an entry document key. Only the hyphenated form is accepted, in lowercase or in
/// uppercase, so every accepted key is one of [`entry_keys`].
#[must_use]
pub fn parse_entry_key(key: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(key).ok()?;
    entry_keys(id).contains(&key.to_string()).then_some(id)
}

/// Every key an entry's document may be stored under: the lowercase form this crate writes,
/// then the uppercase form other clients write.
#[must_use]
pub fn entry_keys(id: Uuid) -> [String; 2] {
    let lower = id.hyphenated().to_string();
    let upper = lower.to_uppercase();
    [lower, upper]
}

// --- Wire shapes ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalsDocument {
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl GoalsDocument {
    #[must_use]
    pub fn from_goals(goals: &GoalSet) -> Self {
        Self {
            carbs: goals.carbs,
            protein: goals.protein,
            fat: goals.fat,
            updated_at: goals.updated_at,
        }
    }

    /// Goals for `principal`. Negative or non-finite values are rejected.
    pub fn into_goals(self, principal: &str) -> Result<GoalSet> {
        validate_macros(self.carbs, self.protein, self.fat)
            .context("Invalid goals document")?;
        Ok(GoalSet {
            user_id: principal.to_string(),
            carbs: self.carbs,
            protein: self.protein,
            fat: self.fat,
            updated_at: self.updated_at,
        })
    }
}

fn default_meal_type() -> String {
    MealType::Snack.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDocument {
    #[serde(default)]
    pub user_id: String,
    /// Local midnight of the entry's day.
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    #[serde(default = "default_meal_type")]
    pub meal_type: String,
    #[serde(default)]
    pub food_name: String,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl EntryDocument {
    #[must_use]
    pub fn from_entry(entry: &LogEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            date: local_midnight(entry.date),
            meal_type: entry.meal_type.as_str().to_string(),
            food_name: entry.food_name.clone(),
            carbs: entry.carbs,
            protein: entry.protein,
            fat: entry.fat,
            calories: entry.calories,
            barcode: entry.barcode.clone(),
            created_at: entry.created_at,
        }
    }

    /// Materialise the document as a local entry owned by `principal`. The document's own
    /// `userId` is not trusted.
    #[must_use]
    pub fn into_entry(self, id: Uuid, principal: &str) -> LogEntry {
        LogEntry {
            id,
            user_id: principal.to_string(),
            date: local_date(self.date),
            meal_type: MealType::from_remote(&self.meal_type),
            food_name: self.food_name,
            carbs: self.carbs,
            protein: self.protein,
            fat: self.fat,
            calories: self.calories,
            barcode: self.barcode,
            created_at: self.created_at,
        }
    }
}

/// One member of a principal's entry collection, keyed by its document id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub data: EntryDocument,
}

// --- Port ---

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_goals(&self, principal: &str) -> Result<Option<GoalsDocument>>;

    /// Overwrite the goals document wholesale.
    async fn set_goals(&self, principal: &str, doc: &GoalsDocument) -> Result<()>;

    async fn list_entries(&self, principal: &str) -> Result<Vec<RemoteEntry>>;

    /// Overwrite the entry document wholesale, creating it when absent.
    async fn set_entry(&self, principal: &str, id: &str, doc: &EntryDocument) -> Result<()>;

    /// Remove the entry document. Removing an absent document succeeds.
    async fn delete_entry(&self, principal: &str, id: &str) -> Result<()>;
}

// --- Document adapters ---

/// Raw JSON document storage addressed by slash-separated paths.
pub trait DocumentStore: Send + Sync {
    fn read(&self, path: &str) -> Result<Option<Value>>;
    fn write(&self, path: &str, doc: &Value) -> Result<()>;
    fn remove(&self, path: &str) -> Result<bool>;
    /// Immediate children of `parent` as `(key, document)` pairs, ordered by key.
    fn children(&self, parent: &str) -> Result<Vec<(String, Value)>>;
}

/// [`RemoteStore`] over any [`DocumentStore`], with a switch that makes every call fail as
/// if the network were down.
pub struct DocumentRemote<S> {
    store: S,
    reachable: AtomicBool,
}

pub type MemoryRemote = DocumentRemote<MemoryDocuments>;
pub type SqliteRemote = DocumentRemote<SqliteDocuments>;

impl<S: DocumentStore> DocumentRemote<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            reachable: AtomicBool::new(true),
        }
    }

    pub fn documents(&self) -> &S {
        &self.store
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            bail!("Remote store is unreachable");
        }
        Ok(())
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryDocuments::default())
    }
}

impl SqliteRemote {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(SqliteDocuments::open(path)?))
    }
}

#[async_trait]
impl<S: DocumentStore> RemoteStore for DocumentRemote<S> {
    async fn get_goals(&self, principal: &str) -> Result<Option<GoalsDocument>> {
        self.ensure_reachable()?;
        let path = DocumentPath::goals(principal)?;
        match self.store.read(&path)? {
            Some(value) => {
                let doc = serde_json::from_value(value)
                    .with_context(|| format!("Malformed goals document at {path}"))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    async fn set_goals(&self, principal: &str, doc: &GoalsDocument) -> Result<()> {
        self.ensure_reachable()?;
        let path = DocumentPath::goals(principal)?;
        self.store.write(&path, &serde_json::to_value(doc)?)
    }

    async fn list_entries(&self, principal: &str) -> Result<Vec<RemoteEntry>> {
        self.ensure_reachable()?;
        let parent = DocumentPath::entries(principal)?;
        let mut entries = Vec::new();
        for (id, value) in self.store.children(&parent)? {
            match serde_json::from_value::<EntryDocument>(value) {
                Ok(data) => entries.push(RemoteEntry { id, data }),
                Err(e) => warn!(path = %parent, id = %id, error = %e, "skipping malformed entry document"),
            }
        }
        Ok(entries)
    }

    async fn set_entry(&self, principal: &str, id: &str, doc: &EntryDocument) -> Result<()> {
        self.ensure_reachable()?;
        let path = DocumentPath::entry(principal, id)?;
        self.store.write(&path, &serde_json::to_value(doc)?)
    }

    async fn delete_entry(&self, principal: &str, id: &str) -> Result<()> {
        self.ensure_reachable()?;
        let path = DocumentPath::entry(principal, id)?;
        self.store.remove(&path)?;
        Ok(())
    }
}

fn child_key<'a>(parent: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(parent)?.strip_prefix('/')?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

#[derive(Default)]
pub struct MemoryDocuments {
    docs: Mutex<BTreeMap<String, Value>>,
}

impl MemoryDocuments {
    pub fn len(&self) -> usize {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryDocuments {
    fn read(&self, path: &str) -> Result<Option<Value>> {
        let docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.get(path).cloned())
    }

    fn write(&self, path: &str, doc: &Value) -> Result<()> {
        let mut docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        docs.insert(path.to_string(), doc.clone());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<bool> {
        let mut docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.remove(path).is_some())
    }

    fn children(&self, parent: &str) -> Result<Vec<(String, Value)>> {
        let docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(docs
            .iter()
            .filter_map(|(path, doc)| child_key(parent, path).map(|k| (k.to_string(), doc.clone())))
            .collect())
    }
}

/// Documents persisted in a single SQLite table, used by the document server.
pub struct SqliteDocuments {
    conn: Mutex<Connection>,
}

impl SqliteDocuments {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open document store: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    path TEXT PRIMARY KEY,
                    body TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl DocumentStore for SqliteDocuments {
    fn read(&self, path: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).with_context(|| format!("Corrupt document at {path}")))
            .transpose()
    }

    fn write(&self, path: &str, doc: &Value) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO documents (path, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![path, doc.to_string(), Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to write document {path}"))?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = conn.execute("DELETE FROM documents WHERE path = ?1", params![path])?;
        Ok(rows > 0)
    }

    fn children(&self, parent: &str) -> Result<Vec<(String, Value)>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let prefix = format!("{parent}/");
        let mut stmt = conn.prepare(
            "SELECT path, body FROM documents
             WHERE substr(path, 1, length(?1)) = ?1
             ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut children = Vec::new();
        for (path, body) in rows {
            let Some(key) = child_key(parent, &path) else {
                continue;
            };
            match serde_json::from_str(&body) {
                Ok(doc) => children.push((key.to_string(), doc)),
                Err(e) => warn!(path = %path, error = %e, "skipping corrupt document"),
            }
        }
        Ok(children)
    }
}
