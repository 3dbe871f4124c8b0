use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use macrotrack_core::db::Database;
use macrotrack_core::error::NutritionError;
use macrotrack_core::models::{IntakeUpdate, validate_meal_type};

use super::helpers::{json_error, parse_date, parse_quantity, print_intake_table, truncate};

fn not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn cmd_delete(db: &Database, user_id: i64, entry_id: i64, json: bool) -> Result<()> {
    if !db.delete_intake(entry_id, user_id)? {
        not_found(&format!("Entry {entry_id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": entry_id }));
    } else {
        println!("Deleted entry {entry_id}");
    }
    Ok(())
}

pub(crate) fn cmd_clear(
    db: &Database,
    user_id: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let count = db.delete_intake_for_date(user_id, date)?;
    if json {
        println!("{}", serde_json::json!({ "deleted_count": count }));
    } else {
        println!("Deleted {count} entries for {date}");
    }
    Ok(())
}

/// New values for an existing entry; unset options keep the stored value.
pub(crate) struct EntryChanges {
    pub quantity: Option<String>,
    pub carbs: Option<f64>,
    pub protein: Option<f64>,
    pub fat: Option<f64>,
    pub meal: Option<String>,
    pub date: Option<String>,
}

pub(crate) fn cmd_update(
    db: &Database,
    user_id: i64,
    entry_id: i64,
    changes: EntryChanges,
    json: bool,
) -> Result<()> {
    let update = IntakeUpdate {
        quantity_grams: changes.quantity.as_deref().map(parse_quantity).transpose()?,
        carbs: changes.carbs,
        protein: changes.protein,
        fat: changes.fat,
        meal_type: changes
            .meal
            .as_deref()
            .map(validate_meal_type)
            .transpose()?,
        intake_date: changes.date.map(Some).map(parse_date).transpose()?,
        ..IntakeUpdate::default()
    };

    match db.update_intake(entry_id, user_id, &update) {
        Ok(record) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                let name = &record.product_name;
                let cal = record.calories;
                println!("Updated entry {entry_id}: {name} — {cal:.0} kcal");
            }
            Ok(())
        }
        Err(NutritionError::NotFound(msg)) => not_found(&msg, json),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn cmd_search(db: &Database, user_id: i64, fragment: &str, json: bool) -> Result<()> {
    let records = db.search_intake(user_id, fragment)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        eprintln!("No entries matching '{fragment}'");
        process::exit(2);
    }
    print_intake_table(&records);
    Ok(())
}

pub(crate) fn cmd_top(db: &Database, user_id: i64, limit: i64, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct TopRow {
        #[tabled(rename = "Product")]
        product: String,
        #[tabled(rename = "Times")]
        times: i64,
        #[tabled(rename = "Total (g)")]
        total: String,
        #[tabled(rename = "Avg kcal")]
        calories: String,
        #[tabled(rename = "Avg C")]
        carbs: String,
        #[tabled(rename = "Avg P")]
        protein: String,
        #[tabled(rename = "Avg F")]
        fat: String,
    }

    let stats = db.most_consumed(user_id, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if stats.is_empty() {
        eprintln!("No entries logged yet");
        process::exit(2);
    }

    let rows: Vec<TopRow> = stats
        .iter()
        .map(|s| TopRow {
            product: truncate(&s.product_name, 35),
            times: s.times_consumed,
            total: format!("{:.0}", s.total_quantity_grams),
            calories: format!("{:.0}", s.avg_calories),
            carbs: format!("{:.1}", s.avg_carbs),
            protein: format!("{:.1}", s.avg_protein),
            fat: format!("{:.1}", s.avg_fat),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
