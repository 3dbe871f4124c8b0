use chrono::Local;
use rusqlite::{OptionalExtension, params};

use crate::db::Database;
use crate::error::{NutritionError, Result};
use crate::models::{Favorite, NewFavorite};

const FAVORITE_COLUMNS: &str = "id, user_id, product_name, barcode, default_quantity, unit, calories, carbs, protein, fat, created_at";

impl Database {
    fn favorite_from_row(row: &rusqlite::Row) -> rusqlite::Result<Favorite> {
        Ok(Favorite {
            id: row.get(0)?,
            user_id: row.get(1)?,
            product_name: row.get(2)?,
            barcode: row.get(3)?,
            default_quantity: row.get(4)?,
            unit: row.get(5)?,
            calories: row.get(6)?,
            carbs: row.get(7)?,
            protein: row.get(8)?,
            fat: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    /// Save a favorite. Re-adding a product the user already has replaces
    /// its stored values.
    pub fn add_favorite(&self, fav: &NewFavorite) -> Result<Favorite> {
        fav.validate()?;
        let now = Local::now().to_rfc3339();
        let conn = self.conn()?;
        let favorite = conn.query_row(
            &format!(
                "INSERT INTO user_favorites (user_id, product_name, barcode, default_quantity, unit, calories, carbs, protein, fat, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(user_id, product_name) DO UPDATE SET
                    barcode = COALESCE(excluded.barcode, barcode),
                    default_quantity = excluded.default_quantity,
                    unit = excluded.unit,
                    calories = excluded.calories,
                    carbs = excluded.carbs,
                    protein = excluded.protein,
                    fat = excluded.fat
                 RETURNING {FAVORITE_COLUMNS}"
            ),
            params![
                fav.user_id,
                fav.product_name.trim(),
                fav.barcode.as_deref().filter(|b| !b.is_empty()),
                fav.default_quantity,
                fav.unit.trim().to_lowercase(),
                fav.calories,
                fav.carbs,
                fav.protein,
                fav.fat,
                now,
            ],
            Self::favorite_from_row,
        )?;
        Ok(favorite)
    }

    /// Newest first.
    pub fn list_favorites(&self, user_id: i64) -> Result<Vec<Favorite>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FAVORITE_COLUMNS} FROM user_favorites WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let favorites = stmt
            .query_map(params![user_id], Self::favorite_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(favorites)
    }

    pub fn get_favorite(&self, favorite_id: i64, user_id: i64) -> Result<Favorite> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {FAVORITE_COLUMNS} FROM user_favorites WHERE id = ?1 AND user_id = ?2"),
            params![favorite_id, user_id],
            Self::favorite_from_row,
        )
        .optional()?
        .ok_or_else(|| NutritionError::not_found(format!("Favorite {favorite_id} not found")))
    }

    pub fn delete_favorite(&self, favorite_id: i64, user_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM user_favorites WHERE id = ?1 AND user_id = ?2",
            params![favorite_id, user_id],
        )?;
        Ok(rows > 0)
    }
}
