use anyhow::Result;
use serde::Serialize;
use std::process;

use macrotrack_core::models::GoalSet;
use macrotrack_core::service::MacroService;

use super::helpers::{SyncNote, await_sync, json_error};

#[derive(Serialize)]
struct GoalsView<'a> {
    #[serde(flatten)]
    goals: &'a GoalSet,
    calories: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync: Option<SyncNote>,
}

fn print_goals(goals: &GoalSet) {
    let cal = goals.calories();
    println!(
        "Goals: {cal:.0} kcal | C:{:.0}g P:{:.0}g F:{:.0}g",
        goals.carbs, goals.protein, goals.fat
    );
}

pub(crate) async fn cmd_goals_set(
    service: &MacroService,
    carbs: f64,
    protein: f64,
    fat: f64,
    json: bool,
) -> Result<()> {
    let (goals, handle) = service.save_goals(carbs, protein, fat)?;
    let note = await_sync(handle).await;

    if json {
        let view = GoalsView {
            goals: &goals,
            calories: goals.calories(),
            sync: Some(note),
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_goals(&goals);
        note.print();
    }
    Ok(())
}

pub(crate) fn cmd_goals_show(service: &MacroService, json: bool) -> Result<()> {
    let Some(goals) = service.goals()? else {
        if json {
            println!("{}", json_error("No goals set"));
        } else {
            eprintln!("No goals set. Use `macrotrack goals set <carbs> <protein> <fat>`");
        }
        process::exit(2);
    };

    if json {
        let view = GoalsView {
            goals: &goals,
            calories: goals.calories(),
            sync: None,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_goals(&goals);
        let updated = goals.updated_at.format("%Y-%m-%d %H:%M UTC");
        println!("Last updated: {updated}");
    }
    Ok(())
}
