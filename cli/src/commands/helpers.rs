use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};
use uuid::Uuid;

use macrotrack_core::models::LogEntry;
use macrotrack_core::service::SyncHandle;
use macrotrack_core::sync::SyncReport;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

pub(crate) fn parse_entry_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).with_context(|| format!("Invalid entry id '{s}'"))
}

/// Outcome of the background push that follows a local write.
#[derive(Debug, Serialize)]
pub(crate) struct SyncNote {
    pub(crate) synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl SyncNote {
    pub(crate) fn from_result(result: Result<SyncReport, String>) -> Self {
        match result {
            Ok(report) => Self {
                synced: !report.skipped(),
                error: None,
            },
            Err(error) => Self {
                synced: false,
                error: Some(error),
            },
        }
    }

    pub(crate) fn print(&self) {
        if let Some(ref error) = self.error {
            eprintln!("Saved locally (not synced: {error})");
        }
    }
}

/// Wait for a spawned sync. The write it follows is already committed either way.
pub(crate) async fn await_sync(handle: SyncHandle) -> SyncNote {
    let result = match handle.await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("sync task failed: {e}")),
    };
    SyncNote::from_result(result)
}

pub(crate) fn print_entry_table(entries: &[&LogEntry]) {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Food")]
        food: String,
        #[tabled(rename = "Kcal")]
        calories: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "F")]
        fat: String,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            id: e.id.to_string(),
            food: truncate(&e.food_name, 35),
            calories: format!("{:.0}", no_neg_zero(e.effective_calories())),
            carbs: format!("{:.1}", e.carbs),
            protein: format!("{:.1}", e.protein),
            fat: format!("{:.1}", e.fat),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
