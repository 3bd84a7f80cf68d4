use anyhow::Result;
use serde::Serialize;
use std::process;

use crate::openfoodfacts::OpenFoodFactsClient;
use macrotrack_core::models::{LogEntry, MealType, NewLogEntry, UpdateLogEntry, parse_amount};
use macrotrack_core::service::MacroService;

use super::helpers::{SyncNote, await_sync, json_error, parse_date, parse_entry_id};

#[derive(Serialize)]
struct EntryView<'a> {
    #[serde(flatten)]
    entry: &'a LogEntry,
    effective_calories: f64,
    sync: SyncNote,
}

fn print_entry_result(entry: &LogEntry, note: SyncNote, verb: &str, json: bool) -> Result<()> {
    if json {
        let view = EntryView {
            entry,
            effective_calories: entry.effective_calories(),
            sync: note,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        let name = &entry.food_name;
        let meal = entry.meal_type;
        let cal = entry.effective_calories();
        let id = entry.id;
        println!("{verb}: {name} for {meal} on {}: {cal:.0} kcal [{id}]", entry.date);
        note.print();
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn cmd_log(
    service: &MacroService,
    food: &str,
    carbs: f64,
    protein: f64,
    fat: f64,
    calories: Option<f64>,
    meal: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let meal_type: MealType = meal.parse()?;
    let date = parse_date(date)?;

    let (entry, handle) = service.log_entry(NewLogEntry {
        date,
        meal_type,
        food_name: food.to_string(),
        carbs,
        protein,
        fat,
        calories,
        barcode: None,
    })?;
    let note = await_sync(handle).await;
    print_entry_result(&entry, note, "Logged", json)
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn cmd_barcode(
    service: &MacroService,
    off: &OpenFoodFactsClient,
    code: &str,
    amount: Option<String>,
    unit_grams: Option<f64>,
    meal: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let meal_type: MealType = meal.parse()?;
    let date = parse_date(date)?;
    let (quantity, unit) = parse_amount(amount.as_deref().unwrap_or("100g"), unit_grams)?;

    let Some(food) = service.barcode_lookup(off, code).await? else {
        let msg = format!("No product found for barcode '{code}'");
        if json {
            println!("{}", json_error(&msg));
        } else {
            eprintln!("{msg}");
        }
        process::exit(2);
    };

    let grams = unit.to_grams(quantity);
    let portion = food.portion(grams);
    let (entry, handle) = service.log_entry(NewLogEntry {
        date,
        meal_type,
        food_name: food.food_name.clone(),
        carbs: portion.carbs,
        protein: portion.protein,
        fat: portion.fat,
        calories: portion.calories,
        barcode: Some(food.barcode.clone()),
    })?;
    let note = await_sync(handle).await;

    if !json {
        let label = unit.label();
        eprintln!("{quantity}{label} = {grams:.0}g of {}", food.food_name);
    }
    print_entry_result(&entry, note, "Logged", json)
}

#[allow(clippy::too_many_arguments, clippy::option_option)]
pub(crate) fn build_update(
    name: Option<String>,
    meal: Option<&str>,
    date: Option<String>,
    carbs: Option<f64>,
    protein: Option<f64>,
    fat: Option<f64>,
    calories: Option<f64>,
    clear_calories: bool,
) -> Result<UpdateLogEntry> {
    let calories = if clear_calories {
        Some(None)
    } else {
        calories.map(Some)
    };
    Ok(UpdateLogEntry {
        food_name: name,
        date: date.map(|d| parse_date(Some(d))).transpose()?,
        meal_type: meal.map(str::parse::<MealType>).transpose()?,
        carbs,
        protein,
        fat,
        calories,
    })
}

pub(crate) async fn cmd_edit(
    service: &MacroService,
    entry_id: &str,
    update: &UpdateLogEntry,
    json: bool,
) -> Result<()> {
    let id = parse_entry_id(entry_id)?;
    let (entry, handle) = service.edit_entry(id, update)?;
    let note = await_sync(handle).await;
    print_entry_result(&entry, note, "Updated", json)
}

pub(crate) async fn cmd_delete(service: &MacroService, entry_id: &str, json: bool) -> Result<()> {
    let id = parse_entry_id(entry_id)?;
    let entry = match service.get_entry(id) {
        Ok(entry) => entry,
        Err(e) => {
            if json {
                println!("{}", json_error(&format!("{e:#}")));
            } else {
                eprintln!("{e:#}");
            }
            process::exit(2);
        }
    };

    let handle = service.remove_entry(id)?;
    let note = await_sync(handle).await;

    if json {
        #[derive(Serialize)]
        struct Deleted {
            deleted: String,
            sync: SyncNote,
        }
        let out = Deleted {
            deleted: id.to_string(),
            sync: note,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Deleted: {} ({})", entry.food_name, entry.date);
        note.print();
    }
    Ok(())
}
