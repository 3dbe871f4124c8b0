use std::collections::BTreeMap;

use chrono::{Datelike, Days, Months, NaiveDate};
use rusqlite::params;

use crate::db::Database;
use crate::error::{NutritionError, Result};
use crate::models::{
    DailySummary, GoalProgress, IntakeRange, MacroProgress, MacroTotals, MonthlySummary,
    MAX_YEAR, MIN_YEAR, WeeklySummary, WeeklyTotals, calculate_calories, round2,
};

const DAYS_PER_WEEK: u64 = 7;

fn out_of_range(date: NaiveDate) -> NutritionError {
    NutritionError::validation(format!("Date {date} is out of range"))
}

/// Monday of the week containing `date`.
pub fn week_start_for(date: NaiveDate) -> Result<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(
        date.weekday().num_days_from_monday(),
    )))
    .ok_or_else(|| out_of_range(date))
}

/// First and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    if !(1..=12).contains(&month) {
        return Err(NutritionError::validation(format!(
            "month must be between 1 and 12 (got {month})"
        )));
    }
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(NutritionError::validation(format!(
            "year must be between {MIN_YEAR} and {MAX_YEAR} (got {year})"
        )));
    }
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| NutritionError::validation(format!("Invalid year {year}")))?;
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| NutritionError::validation(format!("Invalid year {year}")))?;
    Ok((start, end))
}

impl Database {
    /// Totals for one user and day. A day with no records yields a zeroed
    /// summary with an empty item list.
    pub fn daily_summary(&self, user_id: i64, date: NaiveDate) -> Result<DailySummary> {
        let date_str = date.format("%Y-%m-%d").to_string();
        let conn = self.conn()?;
        let items = Self::select_intake(
            &conn,
            "user_id = ?1 AND intake_date = ?2 ORDER BY id",
            params![user_id, date_str],
        )?;

        // Totals come from the fetched rows so the count always matches the items.
        let carbs: f64 = items.iter().map(|r| r.carbs).sum();
        let protein: f64 = items.iter().map(|r| r.protein).sum();
        let fat: f64 = items.iter().map(|r| r.fat).sum();
        let quantity: f64 = items.iter().map(|r| r.quantity_grams).sum();

        Ok(DailySummary {
            date: date_str,
            meal_count: i64::try_from(items.len()).unwrap_or(i64::MAX),
            total_carbs: round2(carbs),
            total_protein: round2(protein),
            total_fat: round2(fat),
            total_calories: calculate_calories(carbs, protein, fat),
            total_quantity_grams: round2(quantity),
            items,
        })
    }

    /// Seven consecutive daily summaries starting at `week_start`. The
    /// average always divides by seven, empty days included.
    #[allow(clippy::cast_precision_loss)]
    pub fn weekly_summary(&self, user_id: i64, week_start: NaiveDate) -> Result<WeeklySummary> {
        let week_end = week_start
            .checked_add_days(Days::new(DAYS_PER_WEEK - 1))
            .ok_or_else(|| out_of_range(week_start))?;
        let mut daily_breakdown = Vec::with_capacity(7);
        for day in week_start.iter_days().take_while(|d| *d <= week_end) {
            daily_breakdown.push(self.daily_summary(user_id, day)?);
        }

        let total_carbs: f64 = daily_breakdown.iter().map(|d| d.total_carbs).sum();
        let total_protein: f64 = daily_breakdown.iter().map(|d| d.total_protein).sum();
        let total_fat: f64 = daily_breakdown.iter().map(|d| d.total_fat).sum();
        let total_calories: f64 = daily_breakdown.iter().map(|d| d.total_calories).sum();

        Ok(WeeklySummary {
            user_id,
            week_start: week_start.format("%Y-%m-%d").to_string(),
            week_end: week_end.format("%Y-%m-%d").to_string(),
            weekly_totals: WeeklyTotals {
                total_carbs: round2(total_carbs),
                total_protein: round2(total_protein),
                total_fat: round2(total_fat),
                total_calories: round2(total_calories),
                daily_average_calories: round2(total_calories / DAYS_PER_WEEK as f64),
            },
            daily_breakdown,
        })
    }

    /// Totals for a calendar month. The average divides by the number of
    /// days that have at least one record, or is 0 when none do.
    #[allow(clippy::cast_precision_loss)]
    pub fn monthly_summary(&self, user_id: i64, year: i32, month: u32) -> Result<MonthlySummary> {
        let (start, end) = month_bounds(year, month)?;
        let conn = self.conn()?;
        let (record_count, days_tracked, carbs, protein, fat): (i64, i64, f64, f64, f64) = conn
            .query_row(
                "SELECT COUNT(*),
                        COUNT(DISTINCT intake_date),
                        COALESCE(SUM(carbs), 0),
                        COALESCE(SUM(protein), 0),
                        COALESCE(SUM(fat), 0)
                 FROM daily_food_intake
                 WHERE user_id = ?1 AND intake_date BETWEEN ?2 AND ?3",
                params![
                    user_id,
                    start.format("%Y-%m-%d").to_string(),
                    end.format("%Y-%m-%d").to_string()
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;

        let total_calories = calculate_calories(carbs, protein, fat);
        let daily_average_calories = if days_tracked == 0 {
            0.0
        } else {
            round2(total_calories / days_tracked as f64)
        };

        Ok(MonthlySummary {
            user_id,
            year,
            month,
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: end.format("%Y-%m-%d").to_string(),
            days_tracked,
            record_count,
            total_carbs: round2(carbs),
            total_protein: round2(protein),
            total_fat: round2(fat),
            total_calories,
            daily_average_calories,
        })
    }

    /// Records in an inclusive date range grouped by day, with per-day totals.
    pub fn intake_range(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<IntakeRange> {
        let records = self.get_intake_by_date_range(user_id, start, end)?;
        let total_records = records.len();

        let mut records_by_date: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for record in records {
            records_by_date
                .entry(record.intake_date.clone())
                .or_default()
                .push(record);
        }

        let daily_totals = records_by_date
            .iter()
            .map(|(date, day)| {
                let carbs: f64 = day.iter().map(|r| r.carbs).sum();
                let protein: f64 = day.iter().map(|r| r.protein).sum();
                let fat: f64 = day.iter().map(|r| r.fat).sum();
                (date.clone(), MacroTotals::from_macros(carbs, protein, fat))
            })
            .collect();

        Ok(IntakeRange {
            user_id,
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: end.format("%Y-%m-%d").to_string(),
            total_records,
            records_by_date,
            daily_totals,
        })
    }

    /// The day's consumption against the user's goals (or the defaults).
    pub fn goal_progress(&self, user_id: i64, date: NaiveDate) -> Result<GoalProgress> {
        let goals = self.get_goals(user_id)?;
        let day = self.daily_summary(user_id, date)?;
        Ok(GoalProgress {
            user_id,
            date: day.date,
            has_custom_goals: goals.has_custom_goals,
            calories: MacroProgress::new(goals.calorie_goal, day.total_calories),
            carbs: MacroProgress::new(goals.carbs_goal, day.total_carbs),
            protein: MacroProgress::new(goals.protein_goal, day.total_protein),
            fat: MacroProgress::new(goals.fat_goal, day.total_fat),
        })
    }
}
