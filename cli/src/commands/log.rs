use anyhow::Result;
use clap::Args;

use macrotrack_core::db::Database;
use macrotrack_core::models::{IntakeFields, IntakeRecord, validate_meal_type};
use macrotrack_core::service::{BarcodeIntake, NutritionService};

use super::helpers::{parse_date, parse_quantity};

const DEFAULT_BARCODE_QUANTITY_G: f64 = 100.0;

/// Macro and micronutrient amounts for a manual log, in grams.
#[derive(Args)]
pub(crate) struct MacroArgs {
    /// Carbohydrates (g)
    #[arg(long)]
    pub carbs: f64,
    /// Protein (g)
    #[arg(long)]
    pub protein: f64,
    /// Fat (g)
    #[arg(long)]
    pub fat: f64,
    /// Fiber (g)
    #[arg(long, default_value_t = 0.0)]
    pub fiber: f64,
    /// Sugar (g)
    #[arg(long, default_value_t = 0.0)]
    pub sugar: f64,
    /// Sodium (g)
    #[arg(long, default_value_t = 0.0)]
    pub sodium: f64,
}

fn print_logged(record: &IntakeRecord) {
    let name = &record.product_name;
    let qty = record.quantity_grams;
    let date = &record.intake_date;
    let cal = record.calories;
    let meal = record
        .meal_type
        .as_deref()
        .map(|m| format!(" for {m}"))
        .unwrap_or_default();
    println!(
        "Logged: {name} (now {qty:.0}g on {date}){meal} — {cal:.0} kcal | C:{:.1}g P:{:.1}g F:{:.1}g",
        record.carbs, record.protein, record.fat
    );
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_log(
    db: &Database,
    user_id: i64,
    product: &str,
    quantity: &str,
    macros: &MacroArgs,
    meal: Option<&str>,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let fields = IntakeFields {
        fiber: macros.fiber,
        sugar: macros.sugar,
        sodium: macros.sodium,
        meal_type: meal.map(validate_meal_type).transpose()?,
        ..IntakeFields::new(
            product,
            macros.carbs,
            macros.protein,
            macros.fat,
            parse_quantity(quantity)?,
            parse_date(date)?,
        )
    };

    let record = db.insert_intake(user_id, &fields)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_logged(&record);
    }
    Ok(())
}

pub(crate) async fn cmd_barcode(
    service: &NutritionService,
    user_id: i64,
    code: &str,
    quantity: Option<&str>,
    meal: Option<&str>,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let intake = BarcodeIntake {
        user_id,
        barcode: code.to_string(),
        quantity_grams: quantity.map_or(Ok(DEFAULT_BARCODE_QUANTITY_G), parse_quantity)?,
        intake_date: parse_date(date)?,
        meal_type: meal.map(validate_meal_type).transpose()?,
        intake_time: None,
    };

    let record = service.add_intake_from_barcode(&intake).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_logged(&record);
    }
    Ok(())
}
