use chrono::Local;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::models::{GoalTargets, NutritionGoals};

impl Database {
    fn goals_from_row(row: &rusqlite::Row) -> rusqlite::Result<NutritionGoals> {
        Ok(NutritionGoals {
            user_id: row.get(0)?,
            calorie_goal: row.get(1)?,
            carbs_goal: row.get(2)?,
            protein_goal: row.get(3)?,
            fat_goal: row.get(4)?,
            has_custom_goals: true,
            updated_at: row.get(5)?,
        })
    }

    /// Stored goals, or the system defaults when the user has none.
    pub fn get_goals(&self, user_id: i64) -> Result<NutritionGoals> {
        let conn = self.conn()?;
        let stored = conn
            .query_row(
                "SELECT user_id, calorie_goal, carbs_goal, protein_goal, fat_goal, updated_at
                 FROM user_nutrition_goals WHERE user_id = ?1",
                params![user_id],
                Self::goals_from_row,
            )
            .optional()?;
        Ok(stored.unwrap_or_else(|| NutritionGoals::defaults(user_id)))
    }

    pub fn upsert_goals(&self, user_id: i64, targets: &GoalTargets) -> Result<NutritionGoals> {
        targets.validate()?;
        let now = Local::now().to_rfc3339();
        let conn = self.conn()?;
        let goals = conn.query_row(
            "INSERT INTO user_nutrition_goals (user_id, calorie_goal, carbs_goal, protein_goal, fat_goal, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                calorie_goal = excluded.calorie_goal,
                carbs_goal = excluded.carbs_goal,
                protein_goal = excluded.protein_goal,
                fat_goal = excluded.fat_goal,
                updated_at = excluded.updated_at
             RETURNING user_id, calorie_goal, carbs_goal, protein_goal, fat_goal, updated_at",
            params![
                user_id,
                targets.calorie_goal,
                targets.carbs_goal,
                targets.protein_goal,
                targets.fat_goal,
                now,
            ],
            Self::goals_from_row,
        )?;
        debug!(user_id, calorie_goal = goals.calorie_goal, "goals saved");
        Ok(goals)
    }

    /// Remove custom goals. Returns false when the user had none.
    pub fn reset_goals(&self, user_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM user_nutrition_goals WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(rows > 0)
    }
}
