use anyhow::Result;
use std::process;

use macrotrack_core::service::MacroService;

use super::helpers::{no_neg_zero, parse_date, print_entry_table};

pub(crate) fn cmd_summary(service: &MacroService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let summary = service.daily_summary(date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.meals.is_empty() && summary.goals.is_none() {
        let date = &summary.date;
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    let date = &summary.date;
    println!("=== {date} ===\n");

    for meal in &summary.meals {
        let meal_label = meal.meal_type.as_str().to_uppercase();
        let sub_cal = no_neg_zero(meal.subtotal_calories);
        println!("  {meal_label} ({sub_cal:.0} kcal)");
        let refs: Vec<&_> = meal.entries.iter().collect();
        print_entry_table(&refs);
        println!();
    }

    let total_cal = no_neg_zero(summary.total_calories);
    let total_c = summary.total_carbs;
    let total_p = summary.total_protein;
    let total_f = summary.total_fat;
    println!("  TOTAL: {total_cal:.0} kcal | C:{total_c:.0}g P:{total_p:.0}g F:{total_f:.0}g");

    if let Some(goals) = &summary.goals {
        let gcal = goals.calories();
        let (gc, gp, gf) = (goals.carbs, goals.protein, goals.fat);
        println!("  GOALS: {gcal:.0} kcal | C:{gc:.0}g P:{gp:.0}g F:{gf:.0}g");
        let rcal = summary.calories_remaining.unwrap_or(gcal - total_cal);
        let rc = gc - total_c;
        let rp = gp - total_p;
        let rf = gf - total_f;
        println!("  REMAINING: {rcal:.0} kcal | C:{rc:.0}g P:{rp:.0}g F:{rf:.0}g");
    }

    Ok(())
}
