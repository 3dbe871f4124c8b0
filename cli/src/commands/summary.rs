use anyhow::Result;
use chrono::{Datelike, Local};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use macrotrack_core::db::Database;
use macrotrack_core::models::DailySummary;
use macrotrack_core::summary::week_start_for;

use super::helpers::{no_neg_zero, parse_date, print_intake_table};

pub(crate) fn cmd_summary(
    db: &Database,
    user_id: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let summary = db.daily_summary(user_id, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.items.is_empty() {
        let date = &summary.date;
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    let date = &summary.date;
    println!("=== {date} ===\n");
    print_intake_table(&summary.items);

    let cal = no_neg_zero(summary.total_calories);
    let c = summary.total_carbs;
    let p = summary.total_protein;
    let f = summary.total_fat;
    let n = summary.meal_count;
    println!("\n  TOTAL ({n} items): {cal:.0} kcal | C:{c:.0}g P:{p:.0}g F:{f:.0}g");

    let goals = db.get_goals(user_id)?;
    #[allow(clippy::cast_precision_loss)]
    let remaining = goals.calorie_goal as f64 - summary.total_calories;
    println!(
        "  GOAL: {} kcal | C:{}g P:{}g F:{}g",
        goals.calorie_goal, goals.carbs_goal, goals.protein_goal, goals.fat_goal
    );
    println!("  REMAINING: {remaining:.0} kcal");

    Ok(())
}

#[derive(Tabled)]
struct DayRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Items")]
    items: i64,
    #[tabled(rename = "Calories")]
    calories: String,
    #[tabled(rename = "Carbs")]
    carbs: String,
    #[tabled(rename = "Protein")]
    protein: String,
    #[tabled(rename = "Fat")]
    fat: String,
}

impl From<&DailySummary> for DayRow {
    fn from(s: &DailySummary) -> Self {
        DayRow {
            date: s.date.clone(),
            items: s.meal_count,
            calories: format!("{:.0}", no_neg_zero(s.total_calories)),
            carbs: format!("{:.0}g", no_neg_zero(s.total_carbs)),
            protein: format!("{:.0}g", no_neg_zero(s.total_protein)),
            fat: format!("{:.0}g", no_neg_zero(s.total_fat)),
        }
    }
}

pub(crate) fn cmd_week(
    db: &Database,
    user_id: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let anchor = parse_date(date)?;
    let week = db.weekly_summary(user_id, week_start_for(anchor)?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&week)?);
        return Ok(());
    }

    println!("=== Week {} to {} ===\n", week.week_start, week.week_end);
    let rows: Vec<DayRow> = week.daily_breakdown.iter().map(DayRow::from).collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let t = &week.weekly_totals;
    println!(
        "\n  TOTAL: {:.0} kcal | C:{:.0}g P:{:.0}g F:{:.0}g",
        no_neg_zero(t.total_calories),
        t.total_carbs,
        t.total_protein,
        t.total_fat
    );
    println!("  DAILY AVERAGE: {:.0} kcal", t.daily_average_calories);

    Ok(())
}

pub(crate) fn cmd_month(
    db: &Database,
    user_id: i64,
    year: Option<i32>,
    month: Option<u32>,
    json: bool,
) -> Result<()> {
    let today = Local::now().date_naive();
    let summary = db.monthly_summary(
        user_id,
        year.unwrap_or_else(|| today.year()),
        month.unwrap_or_else(|| today.month()),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "=== {}-{:02} ({} to {}) ===\n",
        summary.year, summary.month, summary.start_date, summary.end_date
    );
    println!(
        "  Days tracked: {} | Records: {}",
        summary.days_tracked, summary.record_count
    );
    println!(
        "  TOTAL: {:.0} kcal | C:{:.0}g P:{:.0}g F:{:.0}g",
        no_neg_zero(summary.total_calories),
        summary.total_carbs,
        summary.total_protein,
        summary.total_fat
    );
    println!(
        "  DAILY AVERAGE (tracked days): {:.0} kcal",
        summary.daily_average_calories
    );

    Ok(())
}
