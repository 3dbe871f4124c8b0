use anyhow::Result;

use macrotrack_core::db::Database;
use macrotrack_core::models::{GoalTargets, MacroProgress, NutritionGoals};

use super::helpers::{no_neg_zero, parse_date};

fn print_goals(goals: &NutritionGoals) {
    let source = if goals.has_custom_goals {
        "custom"
    } else {
        "default"
    };
    println!("Goals for user {} ({source}):", goals.user_id);
    println!("  Calories: {} kcal", goals.calorie_goal);
    println!("  Carbs:    {}g", goals.carbs_goal);
    println!("  Protein:  {}g", goals.protein_goal);
    println!("  Fat:      {}g", goals.fat_goal);
}

pub(crate) fn cmd_goals_show(db: &Database, user_id: i64, json: bool) -> Result<()> {
    let goals = db.get_goals(user_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&goals)?);
    } else {
        print_goals(&goals);
    }
    Ok(())
}

pub(crate) fn cmd_goals_set(
    db: &Database,
    user_id: i64,
    targets: &GoalTargets,
    json: bool,
) -> Result<()> {
    let goals = db.upsert_goals(user_id, targets)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&goals)?);
    } else {
        print_goals(&goals);
    }
    Ok(())
}

pub(crate) fn cmd_goals_reset(db: &Database, user_id: i64, json: bool) -> Result<()> {
    let removed = db.reset_goals(user_id)?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "reset": removed,
                "goals": NutritionGoals::defaults(user_id),
            })
        );
    } else if removed {
        println!("Goals for user {user_id} reset to defaults");
    } else {
        println!("User {user_id} has no custom goals");
    }
    Ok(())
}

pub(crate) fn cmd_goals_progress(
    db: &Database,
    user_id: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let progress = db.goal_progress(user_id, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    println!("=== {} (user {}) ===\n", progress.date, progress.user_id);
    let line = |label: &str, unit: &str, m: &MacroProgress| {
        println!(
            "  {label:<9}{:>7.0}{unit} / {:.0}{unit}  ({:.0}%, {:.0}{unit} left)",
            no_neg_zero(m.consumed),
            m.goal,
            m.percent,
            m.remaining
        );
    };
    line("Calories", " kcal", &progress.calories);
    line("Carbs", "g", &progress.carbs);
    line("Protein", "g", &progress.protein);
    line("Fat", "g", &progress.fat);
    Ok(())
}
