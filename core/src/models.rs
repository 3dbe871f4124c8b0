use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{NutritionError, Result};

pub const DEFAULT_CALORIE_GOAL: i64 = 2000;
pub const DEFAULT_CARBS_GOAL: i64 = 200;
pub const DEFAULT_PROTEIN_GOAL: i64 = 150;
pub const DEFAULT_FAT_GOAL: i64 = 60;

pub const MIN_YEAR: i32 = 1;
pub const MAX_YEAR: i32 = 9999;

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

/// Calories from macros using 4/4/9 kcal per gram, rounded to 2 decimals.
#[must_use]
pub fn calculate_calories(carbs: f64, protein: f64, fat: f64) -> f64 {
    round2(carbs * 4.0 + protein * 4.0 + fat * 9.0)
}

#[must_use]
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// --- Intake ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub id: i64,
    pub user_id: i64,
    pub product_name: String,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub sodium: f64,
    pub quantity_grams: f64,
    pub calories: f64,
    pub intake_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Writable fields of an intake record. Used for both inserts (merged on
/// `(user_id, intake_date, product_name)`) and full replacement.
#[derive(Debug, Clone)]
pub struct IntakeFields {
    pub product_name: String,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub sodium: f64,
    pub quantity_grams: f64,
    pub intake_date: NaiveDate,
    pub meal_type: Option<String>,
    pub intake_time: Option<NaiveTime>,
    pub barcode: Option<String>,
}

impl IntakeFields {
    /// Fields with only the required values set; optional nutrients are zero.
    #[must_use]
    pub fn new(
        product_name: &str,
        carbs: f64,
        protein: f64,
        fat: f64,
        quantity_grams: f64,
        intake_date: NaiveDate,
    ) -> Self {
        Self {
            product_name: product_name.to_string(),
            carbs,
            protein,
            fat,
            fiber: 0.0,
            sugar: 0.0,
            sodium: 0.0,
            quantity_grams,
            intake_date,
            meal_type: None,
            intake_time: None,
            barcode: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_product_name(&self.product_name)?;
        validate_nutrient("carbs", self.carbs)?;
        validate_nutrient("protein", self.protein)?;
        validate_nutrient("fat", self.fat)?;
        validate_nutrient("fiber", self.fiber)?;
        validate_nutrient("sugar", self.sugar)?;
        validate_nutrient("sodium", self.sodium)?;
        validate_quantity("quantity_grams", self.quantity_grams)?;
        validate_intake_date(self.intake_date)?;
        if let Some(meal) = &self.meal_type {
            validate_meal_type(meal)?;
        }
        Ok(())
    }
}

/// Partial update of an intake record. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct IntakeUpdate {
    pub product_name: Option<String>,
    pub carbs: Option<f64>,
    pub protein: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub sugar: Option<f64>,
    pub sodium: Option<f64>,
    pub quantity_grams: Option<f64>,
    pub intake_date: Option<NaiveDate>,
    pub meal_type: Option<String>,
    pub intake_time: Option<NaiveTime>,
}

impl IntakeUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.product_name.is_none()
            && self.carbs.is_none()
            && self.protein.is_none()
            && self.fat.is_none()
            && self.fiber.is_none()
            && self.sugar.is_none()
            && self.sodium.is_none()
            && self.quantity_grams.is_none()
            && self.intake_date.is_none()
            && self.meal_type.is_none()
            && self.intake_time.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(NutritionError::validation(
                "At least one field must be provided",
            ));
        }
        if let Some(name) = &self.product_name {
            validate_product_name(name)?;
        }
        for (field, value) in [
            ("carbs", self.carbs),
            ("protein", self.protein),
            ("fat", self.fat),
            ("fiber", self.fiber),
            ("sugar", self.sugar),
            ("sodium", self.sodium),
        ] {
            if let Some(v) = value {
                validate_nutrient(field, v)?;
            }
        }
        if let Some(q) = self.quantity_grams {
            validate_quantity("quantity_grams", q)?;
        }
        if let Some(date) = self.intake_date {
            validate_intake_date(date)?;
        }
        if let Some(meal) = &self.meal_type {
            validate_meal_type(meal)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductStat {
    pub product_name: String,
    pub times_consumed: i64,
    pub total_quantity_grams: f64,
    pub avg_carbs: f64,
    pub avg_protein: f64,
    pub avg_fat: f64,
    pub avg_calories: f64,
}

// --- Summaries ---

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct MacroTotals {
    pub total_carbs: f64,
    pub total_protein: f64,
    pub total_fat: f64,
    pub total_calories: f64,
}

impl MacroTotals {
    #[must_use]
    pub fn from_macros(carbs: f64, protein: f64, fat: f64) -> Self {
        Self {
            total_carbs: round2(carbs),
            total_protein: round2(protein),
            total_fat: round2(fat),
            total_calories: calculate_calories(carbs, protein, fat),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: String,
    pub meal_count: i64,
    pub total_carbs: f64,
    pub total_protein: f64,
    pub total_fat: f64,
    pub total_calories: f64,
    pub total_quantity_grams: f64,
    pub items: Vec<IntakeRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyTotals {
    pub total_carbs: f64,
    pub total_protein: f64,
    pub total_fat: f64,
    pub total_calories: f64,
    pub daily_average_calories: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
    pub user_id: i64,
    pub week_start: String,
    pub week_end: String,
    pub weekly_totals: WeeklyTotals,
    pub daily_breakdown: Vec<DailySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlySummary {
    pub user_id: i64,
    pub year: i32,
    pub month: u32,
    pub start_date: String,
    pub end_date: String,
    pub days_tracked: i64,
    pub record_count: i64,
    pub total_carbs: f64,
    pub total_protein: f64,
    pub total_fat: f64,
    pub total_calories: f64,
    pub daily_average_calories: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeRange {
    pub user_id: i64,
    pub start_date: String,
    pub end_date: String,
    pub total_records: usize,
    pub records_by_date: BTreeMap<String, Vec<IntakeRecord>>,
    pub daily_totals: BTreeMap<String, MacroTotals>,
}

// --- Goals ---

#[derive(Debug, Clone, Serialize)]
pub struct NutritionGoals {
    pub user_id: i64,
    pub calorie_goal: i64,
    pub carbs_goal: i64,
    pub protein_goal: i64,
    pub fat_goal: i64,
    pub has_custom_goals: bool,
    pub updated_at: Option<String>,
}

impl NutritionGoals {
    #[must_use]
    pub fn defaults(user_id: i64) -> Self {
        Self {
            user_id,
            calorie_goal: DEFAULT_CALORIE_GOAL,
            carbs_goal: DEFAULT_CARBS_GOAL,
            protein_goal: DEFAULT_PROTEIN_GOAL,
            fat_goal: DEFAULT_FAT_GOAL,
            has_custom_goals: false,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GoalTargets {
    pub calorie_goal: i64,
    pub carbs_goal: i64,
    pub protein_goal: i64,
    pub fat_goal: i64,
}

impl GoalTargets {
    pub fn validate(&self) -> Result<()> {
        if self.calorie_goal <= 0 {
            return Err(NutritionError::validation(
                "calorie_goal must be greater than 0",
            ));
        }
        if self.carbs_goal < 0 || self.protein_goal < 0 || self.fat_goal < 0 {
            return Err(NutritionError::validation(
                "Macro goals must not be negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MacroProgress {
    pub goal: f64,
    pub consumed: f64,
    pub remaining: f64,
    pub percent: f64,
}

impl MacroProgress {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(goal: i64, consumed: f64) -> Self {
        let goal = goal as f64;
        let percent = if goal > 0.0 {
            round2(consumed / goal * 100.0)
        } else {
            0.0
        };
        Self {
            goal,
            consumed: round2(consumed),
            remaining: round2(goal - consumed),
            percent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalProgress {
    pub user_id: i64,
    pub date: String,
    pub has_custom_goals: bool,
    pub calories: MacroProgress,
    pub carbs: MacroProgress,
    pub protein: MacroProgress,
    pub fat: MacroProgress,
}

// --- Favorites ---

#[derive(Debug, Clone, Serialize)]
pub struct Favorite {
    pub id: i64,
    pub user_id: i64,
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub default_quantity: f64,
    pub unit: String,
    pub calories: f64,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewFavorite {
    pub user_id: i64,
    pub product_name: String,
    pub barcode: Option<String>,
    pub default_quantity: f64,
    pub unit: String,
    pub calories: f64,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
}

impl NewFavorite {
    pub fn validate(&self) -> Result<()> {
        validate_product_name(&self.product_name)?;
        validate_quantity("default_quantity", self.default_quantity)?;
        if convert_to_grams(1.0, &self.unit).is_none() {
            return Err(NutritionError::validation(format!(
                "Unknown unit '{}'. Supported: g, kg, lb, oz, tbsp, tsp, ml, l",
                self.unit
            )));
        }
        validate_nutrient("calories", self.calories)?;
        validate_nutrient("carbs", self.carbs)?;
        validate_nutrient("protein", self.protein)?;
        validate_nutrient("fat", self.fat)?;
        Ok(())
    }
}

// --- Validation ---

/// Convert a quantity with a unit to grams.
/// Volume-based conversions assume water density (1 ml = 1 g).
/// Returns `(grams, is_approximate)` where `is_approximate` is true for volume conversions.
#[must_use]
pub fn convert_to_grams(quantity: f64, unit: &str) -> Option<(f64, bool)> {
    let lower = unit.trim().to_lowercase();
    match lower.as_str() {
        "g" | "gram" | "grams" => Some((quantity, false)),
        "kg" | "kilogram" | "kilograms" => Some((quantity * 1000.0, false)),
        "lb" | "lbs" | "pound" | "pounds" => Some((quantity * 454.0, false)),
        "oz" | "ounce" | "ounces" => Some((quantity * 28.35, false)),
        "tbsp" | "tablespoon" | "tablespoons" => Some((quantity * 15.0, true)),
        "tsp" | "teaspoon" | "teaspoons" => Some((quantity * 5.0, true)),
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => {
            Some((quantity, true))
        }
        "l" | "liter" | "liters" | "litre" | "litres" => Some((quantity * 1000.0, true)),
        _ => None,
    }
}

pub fn validate_meal_type(meal: &str) -> Result<String> {
    let lower = meal.to_lowercase();
    if MEAL_TYPES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(NutritionError::validation(format!(
            "Invalid meal type '{meal}'. Must be one of: {}",
            MEAL_TYPES.join(", ")
        )))
    }
}

pub fn validate_product_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(NutritionError::validation("product_name must not be empty"));
    }
    Ok(())
}

pub fn validate_nutrient(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(NutritionError::validation(format!(
            "{field} must be a finite number"
        )));
    }
    if value < 0.0 {
        return Err(NutritionError::validation(format!(
            "{field} must not be negative"
        )));
    }
    Ok(())
}

pub fn validate_quantity(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(NutritionError::validation(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_intake_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| NutritionError::validation(format!("Invalid time '{s}'. Use HH:MM[:SS]")))
}

/// Dates are stored as `YYYY-MM-DD` text and compared lexicographically,
/// which only orders correctly for four-digit years.
pub fn validate_intake_date(date: NaiveDate) -> Result<()> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
        return Err(NutritionError::validation(format!(
            "Date {date} is out of range; the year must be between {MIN_YEAR} and {MAX_YEAR}"
        )));
    }
    Ok(())
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| NutritionError::validation(format!("Invalid date '{s}'. Use YYYY-MM-DD")))?;
    validate_intake_date(date)?;
    Ok(date)
}
