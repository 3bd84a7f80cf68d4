use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use crate::models::{CachedFood, DailySummary, FoodFacts, GoalSet, LogEntry, MealType, UpdateLogEntry};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS goals (
                    user_id TEXT PRIMARY KEY,
                    carbs REAL NOT NULL,
                    protein REAL NOT NULL,
                    fat REAL NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS log_entries (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    meal_type TEXT NOT NULL,
                    food_name TEXT NOT NULL,
                    carbs REAL NOT NULL,
                    protein REAL NOT NULL,
                    fat REAL NOT NULL,
                    calories REAL,
                    barcode TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS cached_foods (
                    barcode TEXT PRIMARY KEY,
                    food_name TEXT NOT NULL,
                    carbs REAL NOT NULL,
                    protein REAL NOT NULL,
                    fat REAL NOT NULL,
                    calories REAL,
                    cached_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_log_entries_user_date ON log_entries(user_id, date);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping ---

    fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn parse_date(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn goals_from_row(row: &rusqlite::Row) -> rusqlite::Result<GoalSet> {
        let updated_at: String = row.get(4)?;
        Ok(GoalSet {
            user_id: row.get(0)?,
            carbs: row.get(1)?,
            protein: row.get(2)?,
            fat: row.get(3)?,
            updated_at: Self::parse_timestamp(4, &updated_at)?,
        })
    }

    // Expects columns:
    // 0: id, 1: user_id, 2: date, 3: meal_type, 4: food_name, 5: carbs, 6: protein,
    // 7: fat, 8: calories, 9: barcode, 10: created_at
    fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
        let id: String = row.get(0)?;
        let date: String = row.get(2)?;
        let meal_type: String = row.get(3)?;
        let created_at: String = row.get(10)?;
        Ok(LogEntry {
            id: Uuid::parse_str(&id)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
            user_id: row.get(1)?,
            date: Self::parse_date(2, &date)?,
            meal_type: MealType::from_remote(&meal_type),
            food_name: row.get(4)?,
            carbs: row.get(5)?,
            protein: row.get(6)?,
            fat: row.get(7)?,
            calories: row.get(8)?,
            barcode: row.get(9)?,
            created_at: Self::parse_timestamp(10, &created_at)?,
        })
    }

    fn cached_food_from_row(row: &rusqlite::Row) -> rusqlite::Result<CachedFood> {
        let cached_at: String = row.get(6)?;
        Ok(CachedFood {
            barcode: row.get(0)?,
            food_name: row.get(1)?,
            carbs: row.get(2)?,
            protein: row.get(3)?,
            fat: row.get(4)?,
            calories: row.get(5)?,
            cached_at: Self::parse_timestamp(6, &cached_at)?,
        })
    }

    // --- Goals ---

    pub fn get_goals(&self, user_id: &str) -> Result<Option<GoalSet>> {
        self.conn
            .query_row(
                "SELECT user_id, carbs, protein, fat, updated_at FROM goals WHERE user_id = ?1",
                params![user_id],
                Self::goals_from_row,
            )
            .optional()
            .context("Failed to read goals")
    }

    /// Update the principal's goal row in place, or insert it when missing.
    pub fn upsert_goals(&self, goals: &GoalSet) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO goals (user_id, carbs, protein, fat, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    carbs = excluded.carbs,
                    protein = excluded.protein,
                    fat = excluded.fat,
                    updated_at = excluded.updated_at",
                params![
                    goals.user_id,
                    goals.carbs,
                    goals.protein,
                    goals.fat,
                    goals.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to save goals")?;
        Ok(())
    }

    // --- Log entries ---

    const ENTRY_COLUMNS: &'static str = "id, user_id, date, meal_type, food_name, carbs, protein, fat, calories, barcode, created_at";

    pub fn insert_entry(&self, entry: &LogEntry) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO log_entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    Self::ENTRY_COLUMNS
                ),
                params_from_iter(Self::entry_params(entry)),
            )
            .with_context(|| format!("Failed to insert entry {}", entry.id))?;
        Ok(())
    }

    /// Insert `entry` unless a row with the same id exists. Returns whether a row was written.
    ///
    /// This is the only insert path used when merging remote entries: two concurrent merges
    /// that discover the same id both end up with exactly one row.
    pub fn insert_entry_if_absent(&self, entry: &LogEntry) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                &format!(
                    "INSERT INTO log_entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(id) DO NOTHING",
                    Self::ENTRY_COLUMNS
                ),
                params_from_iter(Self::entry_params(entry)),
            )
            .with_context(|| format!("Failed to insert entry {}", entry.id))?;
        Ok(rows > 0)
    }

    fn entry_params(entry: &LogEntry) -> [Box<dyn rusqlite::ToSql + '_>; 11] {
        [
            Box::new(entry.id.to_string()),
            Box::new(entry.user_id.as_str()),
            Box::new(entry.date.format("%Y-%m-%d").to_string()),
            Box::new(entry.meal_type.as_str()),
            Box::new(entry.food_name.as_str()),
            Box::new(entry.carbs),
            Box::new(entry.protein),
            Box::new(entry.fat),
            Box::new(entry.calories),
            Box::new(entry.barcode.as_deref()),
            Box::new(entry.created_at.to_rfc3339()),
        ]
    }

    pub fn get_entry(&self, id: Uuid) -> Result<Option<LogEntry>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM log_entries WHERE id = ?1", Self::ENTRY_COLUMNS),
                params![id.to_string()],
                Self::entry_from_row,
            )
            .optional()
            .context("Failed to read entry")
    }

    pub fn entry_exists(&self, id: Uuid) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM log_entries WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Apply `update` to the stored entry and commit it. Returns the new row.
    pub fn update_entry(&self, id: Uuid, update: &UpdateLogEntry) -> Result<LogEntry> {
        let mut entry = self
            .get_entry(id)?
            .with_context(|| format!("Entry {id} not found"))?;
        update.apply(&mut entry)?;

        self.conn
            .execute(
                "UPDATE log_entries SET
                    date = ?1, meal_type = ?2, food_name = ?3, carbs = ?4,
                    protein = ?5, fat = ?6, calories = ?7
                 WHERE id = ?8",
                params![
                    entry.date.format("%Y-%m-%d").to_string(),
                    entry.meal_type.as_str(),
                    entry.food_name,
                    entry.carbs,
                    entry.protein,
                    entry.fat,
                    entry.calories,
                    id.to_string(),
                ],
            )
            .with_context(|| format!("Failed to update entry {id}"))?;
        Ok(entry)
    }

    pub fn delete_entry(&self, id: Uuid) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM log_entries WHERE id = ?1", params![id.to_string()])?;
        Ok(rows > 0)
    }

    pub fn entries_for_user(&self, user_id: &str) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM log_entries WHERE user_id = ?1 ORDER BY date, created_at",
            Self::ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![user_id], Self::entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn entries_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM log_entries WHERE user_id = ?1 AND date = ?2 ORDER BY created_at",
            Self::ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(
                params![user_id, date.format("%Y-%m-%d").to_string()],
                Self::entry_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn build_daily_summary(&self, user_id: &str, date: NaiveDate) -> Result<DailySummary> {
        let entries = self.entries_for_date(user_id, date)?;
        let goals = self.get_goals(user_id)?;
        Ok(DailySummary::build(date, entries, goals))
    }

    // --- Lookup cache ---

    pub fn get_cached_food(&self, barcode: &str) -> Result<Option<CachedFood>> {
        self.conn
            .query_row(
                "SELECT barcode, food_name, carbs, protein, fat, calories, cached_at
                 FROM cached_foods WHERE barcode = ?1",
                params![barcode],
                Self::cached_food_from_row,
            )
            .optional()
            .context("Failed to read lookup cache")
    }

    pub fn cache_food(&self, facts: &FoodFacts) -> Result<CachedFood> {
        let cached = CachedFood {
            barcode: facts.barcode.clone(),
            food_name: facts.name.clone(),
            carbs: facts.carbs,
            protein: facts.protein,
            fat: facts.fat,
            calories: facts.calories,
            cached_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO cached_foods (barcode, food_name, carbs, protein, fat, calories, cached_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(barcode) DO UPDATE SET
                    food_name = excluded.food_name,
                    carbs = excluded.carbs,
                    protein = excluded.protein,
                    fat = excluded.fat,
                    calories = excluded.calories,
                    cached_at = excluded.cached_at",
                params![
                    cached.barcode,
                    cached.food_name,
                    cached.carbs,
                    cached.protein,
                    cached.fat,
                    cached.calories,
                    cached.cached_at.to_rfc3339(),
                ],
            )
            .context("Failed to write lookup cache")?;
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewLogEntry;

    fn sample_entry(user_id: &str, carbs: f64) -> LogEntry {
        NewLogEntry {
            date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            meal_type: MealType::Breakfast,
            food_name: "Oatmeal".to_string(),
            carbs,
            protein: 5.0,
            fat: 3.0,
            calories: None,
            barcode: Some("5000112637922".to_string()),
        }
        .into_entry(user_id)
    }

    #[test]
    fn test_migrate_is_repeatable() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_goals_upsert_updates_in_place() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_goals("u1").unwrap().is_none());

        db.upsert_goals(&GoalSet::new("u1", 100.0, 80.0, 50.0)).unwrap();
        db.upsert_goals(&GoalSet::new("u1", 150.0, 90.0, 60.0)).unwrap();

        let goals = db.get_goals("u1").unwrap().unwrap();
        assert_eq!(goals.carbs, 150.0);
        assert_eq!(goals.fat, 60.0);

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM goals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_goals_are_per_principal() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_goals(&GoalSet::new("u1", 100.0, 80.0, 50.0)).unwrap();
        db.upsert_goals(&GoalSet::new("u2", 10.0, 10.0, 10.0)).unwrap();
        assert_eq!(db.get_goals("u1").unwrap().unwrap().carbs, 100.0);
        assert_eq!(db.get_goals("u2").unwrap().unwrap().carbs, 10.0);
    }

    #[test]
    fn test_insert_and_get_entry() {
        let db = Database::open_in_memory().unwrap();
        let entry = sample_entry("u1", 27.0);
        db.insert_entry(&entry).unwrap();

        let fetched = db.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(fetched, LogEntry {
            created_at: fetched.created_at,
            ..entry.clone()
        });
        assert_eq!(fetched.created_at.timestamp(), entry.created_at.timestamp());
        assert!(db.entry_exists(entry.id).unwrap());
        assert!(!db.entry_exists(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_insert_duplicate_id_fails() {
        let db = Database::open_in_memory().unwrap();
        let entry = sample_entry("u1", 27.0);
        db.insert_entry(&entry).unwrap();
        assert!(db.insert_entry(&entry).is_err());
    }

    #[test]
    fn test_insert_if_absent_keeps_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let entry = sample_entry("u1", 10.0);
        assert!(db.insert_entry_if_absent(&entry).unwrap());

        let mut changed = entry.clone();
        changed.carbs = 20.0;
        assert!(!db.insert_entry_if_absent(&changed).unwrap());

        let fetched = db.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(fetched.carbs, 10.0);
        assert_eq!(db.entries_for_user("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_update_entry() {
        let db = Database::open_in_memory().unwrap();
        let entry = sample_entry("u1", 27.0);
        db.insert_entry(&entry).unwrap();

        let update = UpdateLogEntry {
            food_name: Some("Porridge".to_string()),
            carbs: Some(30.0),
            calories: Some(Some(200.0)),
            ..UpdateLogEntry::default()
        };
        let updated = db.update_entry(entry.id, &update).unwrap();
        assert_eq!(updated.food_name, "Porridge");
        assert_eq!(updated.id, entry.id);

        let fetched = db.get_entry(entry.id).unwrap().unwrap();
        assert_eq!(fetched.carbs, 30.0);
        assert_eq!(fetched.calories, Some(200.0));
        assert_eq!(fetched.protein, 5.0);
    }

    #[test]
    fn test_update_missing_entry() {
        let db = Database::open_in_memory().unwrap();
        let update = UpdateLogEntry {
            carbs: Some(1.0),
            ..UpdateLogEntry::default()
        };
        assert!(db.update_entry(Uuid::new_v4(), &update).is_err());
    }

    #[test]
    fn test_delete_entry() {
        let db = Database::open_in_memory().unwrap();
        let entry = sample_entry("u1", 27.0);
        db.insert_entry(&entry).unwrap();
        assert!(db.delete_entry(entry.id).unwrap());
        assert!(!db.delete_entry(entry.id).unwrap());
        assert!(db.get_entry(entry.id).unwrap().is_none());
    }

    #[test]
    fn test_entries_scoped_by_user_and_date() {
        let db = Database::open_in_memory().unwrap();
        let a = sample_entry("u1", 1.0);
        let mut b = sample_entry("u1", 2.0);
        b.date = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        let c = sample_entry("u2", 3.0);
        for e in [&a, &b, &c] {
            db.insert_entry(e).unwrap();
        }

        assert_eq!(db.entries_for_user("u1").unwrap().len(), 2);
        let day = db.entries_for_date("u1", a.date).unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].id, a.id);
    }

    #[test]
    fn test_daily_summary_uses_goals() {
        let db = Database::open_in_memory().unwrap();
        let entry = sample_entry("u1", 27.0);
        db.insert_entry(&entry).unwrap();
        db.upsert_goals(&GoalSet::new("u1", 100.0, 80.0, 50.0)).unwrap();

        let summary = db.build_daily_summary("u1", entry.date).unwrap();
        // 27*4 + 5*4 + 3*9 = 155
        assert_eq!(summary.total_calories, 155.0);
        assert_eq!(summary.calories_remaining, Some(1170.0 - 155.0));
        assert_eq!(summary.meals.len(), 1);
    }

    #[test]
    fn test_lookup_cache() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_cached_food("123").unwrap().is_none());

        let facts = FoodFacts {
            barcode: "123".to_string(),
            name: "Oats".to_string(),
            carbs: 60.0,
            protein: 13.0,
            fat: 7.0,
            calories: Some(389.0),
            serving_size: None,
        };
        db.cache_food(&facts).unwrap();
        db.cache_food(&FoodFacts {
            name: "Rolled oats".to_string(),
            ..facts
        })
        .unwrap();

        let cached = db.get_cached_food("123").unwrap().unwrap();
        assert_eq!(cached.food_name, "Rolled oats");
        assert_eq!(cached.calories, Some(389.0));
    }
}
