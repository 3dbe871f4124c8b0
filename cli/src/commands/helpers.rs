use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use macrotrack_core::models::{IntakeRecord, convert_to_grams};

/// Parse a quantity with an optional unit into grams.
/// Accepts: "200", "200g", "500ml", "500 ml", "2 tbsp", "1.5 oz", etc.
pub(crate) fn parse_quantity(s: &str) -> Result<f64> {
    let s = s.trim();

    // Try plain grams first: "500" or "500g"
    if let Ok(g) = parse_grams(s) {
        return Ok(g);
    }

    let (qty, unit) = if let Some((qty, unit)) = split_number_unit(s) {
        (qty, unit)
    } else {
        let Some((num, unit)) = s.split_once(char::is_whitespace) else {
            bail!("Invalid quantity format: '{s}'. Use '200g', '500ml', '2 tbsp', etc.");
        };
        let qty: f64 = num
            .parse()
            .with_context(|| format!("Invalid quantity: '{s}'"))?;
        (qty, unit.trim())
    };

    if qty <= 0.0 {
        bail!("Quantity must be greater than 0");
    }
    let Some((grams, is_approx)) = convert_to_grams(qty, unit) else {
        bail!("Unknown unit '{unit}' in '{s}'. Supported: g, kg, lb, oz, tbsp, tsp, ml, l");
    };
    if is_approx {
        eprintln!("Note: {qty} {unit} ≈ {grams:.0}g (approximate, assumes water density)");
    }
    Ok(grams)
}

/// Split "500ml" or "2.5tbsp" into (500.0, "ml") or (2.5, "tbsp").
fn split_number_unit(s: &str) -> Option<(f64, &str)> {
    let idx = s.find(|c: char| c.is_alphabetic())?;
    if idx == 0 {
        return None;
    }
    let (num_part, unit_part) = s.split_at(idx);
    let qty: f64 = num_part.trim().parse().ok()?;
    Some((qty, unit_part))
}

fn parse_grams(s: &str) -> Result<f64> {
    let trimmed = s.trim_end_matches('g').trim();
    let value: f64 = trimmed
        .parse()
        .with_context(|| format!("Invalid quantity: '{s}'. Use a number like '200' or '200g'"))?;
    if value <= 0.0 {
        bail!("Quantity must be greater than 0");
    }
    Ok(value)
}

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => macrotrack_core::models::parse_date(&s).with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

pub(crate) fn print_intake_table(records: &[IntakeRecord]) {
    #[derive(Tabled)]
    struct IntakeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Product")]
        product: String,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Qty (g)")]
        quantity: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Fat")]
        fat: String,
    }

    let rows: Vec<IntakeRow> = records
        .iter()
        .map(|r| IntakeRow {
            id: r.id,
            date: r.intake_date.clone(),
            product: truncate(&r.product_name, 35),
            meal: r.meal_type.clone().unwrap_or_else(|| "-".into()),
            quantity: format!("{:.0}", r.quantity_grams),
            calories: format!("{:.0}", no_neg_zero(r.calories)),
            carbs: format!("{:.1}", r.carbs),
            protein: format!("{:.1}", r.protein),
            fat: format!("{:.1}", r.fat),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..)).with(Alignment::right()))
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
