use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{NutritionError, Result};
use crate::models::{
    IntakeFields, IntakeRecord, IntakeUpdate, ProductStat, calculate_calories, round2,
};

pub(crate) type Conn = PooledConnection<SqliteConnectionManager>;

pub(crate) const INTAKE_COLUMNS: &str = "id, user_id, product_name, carbs, protein, fat, fiber, sugar, sodium, quantity_grams, intake_date, meal_type, intake_time, barcode, created_at, updated_at";

const MAX_TOP_LIMIT: i64 = 100;

/// SQLite's built-in `LOWER()` only folds ASCII, so name matching goes
/// through this Unicode-aware replacement instead.
const UNICODE_LOWER: &str = "unicode_lower";

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        UNICODE_LOWER,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: String = ctx.get(0)?;
            Ok(text.to_lowercase())
        },
    )
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_size: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 8,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the nutrition database. Cloning is cheap and shares the
/// underlying connection pool; every store operation checks out one
/// connection for its duration and returns it when the guard drops.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Self::open_with(path, &PoolSettings::default())
    }

    pub fn open_with(path: &Path, settings: &PoolSettings) -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            register_functions(conn)
        });
        // r2d2 rejects a zero size or timeout.
        let pool = Pool::builder()
            .max_size(settings.max_size.max(1))
            .connection_timeout(settings.acquire_timeout.max(Duration::from_secs(1)))
            .build(manager)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { pool };
        db.migrate()?;
        info!(
            path = %path.display(),
            max_connections = settings.max_size,
            "database ready"
        );
        Ok(db)
    }

    /// A single-connection pool over a private in-memory database. The one
    /// connection is never recycled, so the data lives as long as the handle.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory().with_init(|conn| register_functions(conn)))
            .context("Failed to open in-memory database")?;
        let db = Database { pool };
        db.migrate()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<Conn> {
        Ok(self.pool.get()?)
    }

    #[allow(clippy::too_many_lines)]
    fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.pool.get().context("Failed to acquire connection")?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS daily_food_intake (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    product_name TEXT NOT NULL,
                    carbs REAL NOT NULL CHECK (carbs >= 0),
                    protein REAL NOT NULL CHECK (protein >= 0),
                    fat REAL NOT NULL CHECK (fat >= 0),
                    quantity_grams REAL NOT NULL CHECK (quantity_grams > 0),
                    intake_date TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, intake_date, product_name)
                );

                CREATE INDEX IF NOT EXISTS idx_intake_user_date
                    ON daily_food_intake(user_id, intake_date);

                CREATE TABLE IF NOT EXISTS user_nutrition_goals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL UNIQUE,
                    calorie_goal INTEGER NOT NULL,
                    carbs_goal INTEGER NOT NULL,
                    protein_goal INTEGER NOT NULL,
                    fat_goal INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            // Detail nutrients and descriptive fields for barcode-sourced intake
            conn.execute_batch(
                "ALTER TABLE daily_food_intake ADD COLUMN fiber REAL NOT NULL DEFAULT 0 CHECK (fiber >= 0);
                 ALTER TABLE daily_food_intake ADD COLUMN sugar REAL NOT NULL DEFAULT 0 CHECK (sugar >= 0);
                 ALTER TABLE daily_food_intake ADD COLUMN sodium REAL NOT NULL DEFAULT 0 CHECK (sodium >= 0);
                 ALTER TABLE daily_food_intake ADD COLUMN meal_type TEXT;
                 ALTER TABLE daily_food_intake ADD COLUMN intake_time TEXT;
                 ALTER TABLE daily_food_intake ADD COLUMN barcode TEXT;
                 ALTER TABLE daily_food_intake ADD COLUMN updated_at TEXT;
                 UPDATE daily_food_intake SET updated_at = created_at WHERE updated_at IS NULL;
                 PRAGMA user_version = 2;",
            )?;
        }

        if version < 3 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS user_favorites (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    product_name TEXT NOT NULL,
                    barcode TEXT,
                    default_quantity REAL NOT NULL CHECK (default_quantity > 0),
                    unit TEXT NOT NULL DEFAULT 'g',
                    calories REAL NOT NULL DEFAULT 0,
                    carbs REAL NOT NULL DEFAULT 0,
                    protein REAL NOT NULL DEFAULT 0,
                    fat REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, product_name)
                );

                CREATE INDEX IF NOT EXISTS idx_favorites_user ON user_favorites(user_id);

                PRAGMA user_version = 3;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    // Expects the INTAKE_COLUMNS order.
    pub(crate) fn intake_from_row(row: &rusqlite::Row) -> rusqlite::Result<IntakeRecord> {
        let carbs: f64 = row.get(3)?;
        let protein: f64 = row.get(4)?;
        let fat: f64 = row.get(5)?;
        let updated_at: Option<String> = row.get(15)?;
        let created_at: String = row.get(14)?;
        Ok(IntakeRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            product_name: row.get(2)?,
            carbs,
            protein,
            fat,
            fiber: row.get(6)?,
            sugar: row.get(7)?,
            sodium: row.get(8)?,
            quantity_grams: row.get(9)?,
            calories: calculate_calories(carbs, protein, fat),
            intake_date: row.get(10)?,
            meal_type: row.get(11)?,
            intake_time: row.get(12)?,
            barcode: row.get(13)?,
            updated_at: updated_at.unwrap_or_else(|| created_at.clone()),
            created_at,
        })
    }

    /// Run `SELECT <intake columns> ... WHERE <filter>` on an already
    /// checked-out connection. `filter` is always a literal from this crate.
    pub(crate) fn select_intake<P: rusqlite::Params>(
        conn: &Connection,
        filter: &str,
        params: P,
    ) -> rusqlite::Result<Vec<IntakeRecord>> {
        let sql = format!("SELECT {INTAKE_COLUMNS} FROM daily_food_intake WHERE {filter}");
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_map(params, Self::intake_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
    }

    // --- Intake ---

    /// Insert an intake record, merging into an existing row for the same
    /// `(user_id, intake_date, product_name)`. On conflict the nutrient and
    /// quantity columns are incremented, descriptive fields keep their first
    /// non-null value. Done as one statement so concurrent adds cannot lose
    /// an update.
    pub fn insert_intake(&self, user_id: i64, fields: &IntakeFields) -> Result<IntakeRecord> {
        fields.validate()?;
        let now = Local::now().to_rfc3339();
        let conn = self.conn()?;
        let record = conn.query_row(
            &format!(
                "INSERT INTO daily_food_intake (user_id, product_name, carbs, protein, fat, fiber, sugar, sodium, quantity_grams, intake_date, meal_type, intake_time, barcode, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
                 ON CONFLICT(user_id, intake_date, product_name) DO UPDATE SET
                    carbs = carbs + excluded.carbs,
                    protein = protein + excluded.protein,
                    fat = fat + excluded.fat,
                    fiber = fiber + excluded.fiber,
                    sugar = sugar + excluded.sugar,
                    sodium = sodium + excluded.sodium,
                    quantity_grams = quantity_grams + excluded.quantity_grams,
                    meal_type = COALESCE(meal_type, excluded.meal_type),
                    intake_time = COALESCE(intake_time, excluded.intake_time),
                    barcode = COALESCE(barcode, excluded.barcode),
                    updated_at = excluded.updated_at
                 RETURNING {INTAKE_COLUMNS}"
            ),
            params![
                user_id,
                fields.product_name.trim(),
                fields.carbs,
                fields.protein,
                fields.fat,
                fields.fiber,
                fields.sugar,
                fields.sodium,
                fields.quantity_grams,
                fields.intake_date.format("%Y-%m-%d").to_string(),
                fields.meal_type.as_deref().map(str::to_lowercase),
                fields.intake_time.map(|t| t.format("%H:%M:%S").to_string()),
                fields.barcode.as_deref().filter(|b| !b.is_empty()),
                now,
            ],
            Self::intake_from_row,
        )?;
        debug!(
            user_id,
            record_id = record.id,
            product = %record.product_name,
            date = %record.intake_date,
            "intake stored"
        );
        Ok(record)
    }

    pub fn get_intake(&self, record_id: i64, user_id: i64) -> Result<IntakeRecord> {
        let conn = self.conn()?;
        Self::select_intake(&conn, "id = ?1 AND user_id = ?2", params![record_id, user_id])?
            .into_iter()
            .next()
            .ok_or_else(|| NutritionError::not_found(format!("Intake record {record_id} not found")))
    }

    pub fn get_intake_by_date(&self, user_id: i64, date: NaiveDate) -> Result<Vec<IntakeRecord>> {
        let conn = self.conn()?;
        let records = Self::select_intake(
            &conn,
            "user_id = ?1 AND intake_date = ?2 ORDER BY id",
            params![user_id, date.format("%Y-%m-%d").to_string()],
        )?;
        Ok(records)
    }

    /// Inclusive on both ends, newest date first.
    pub fn get_intake_by_date_range(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IntakeRecord>> {
        if start > end {
            return Err(NutritionError::validation(format!(
                "start_date {start} is after end_date {end}"
            )));
        }
        let conn = self.conn()?;
        let records = Self::select_intake(
            &conn,
            "user_id = ?1 AND intake_date BETWEEN ?2 AND ?3 ORDER BY intake_date DESC, id",
            params![
                user_id,
                start.format("%Y-%m-%d").to_string(),
                end.format("%Y-%m-%d").to_string()
            ],
        )?;
        Ok(records)
    }

    pub fn get_all_intake(&self, user_id: i64) -> Result<Vec<IntakeRecord>> {
        let conn = self.conn()?;
        let records = Self::select_intake(
            &conn,
            "user_id = ?1 ORDER BY intake_date DESC, id",
            params![user_id],
        )?;
        Ok(records)
    }

    /// Overwrite every writable field of a record owned by `user_id`.
    pub fn replace_intake(
        &self,
        record_id: i64,
        user_id: i64,
        fields: &IntakeFields,
    ) -> Result<IntakeRecord> {
        fields.validate()?;
        let now = Local::now().to_rfc3339();
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "UPDATE daily_food_intake SET
                    product_name = ?1, carbs = ?2, protein = ?3, fat = ?4,
                    fiber = ?5, sugar = ?6, sodium = ?7, quantity_grams = ?8,
                    intake_date = ?9, meal_type = ?10, intake_time = ?11, barcode = ?12,
                    updated_at = ?13
                 WHERE id = ?14 AND user_id = ?15
                 RETURNING {INTAKE_COLUMNS}"
            ),
            params![
                fields.product_name.trim(),
                fields.carbs,
                fields.protein,
                fields.fat,
                fields.fiber,
                fields.sugar,
                fields.sodium,
                fields.quantity_grams,
                fields.intake_date.format("%Y-%m-%d").to_string(),
                fields.meal_type.as_deref().map(str::to_lowercase),
                fields.intake_time.map(|t| t.format("%H:%M:%S").to_string()),
                fields.barcode.as_deref().filter(|b| !b.is_empty()),
                now,
                record_id,
                user_id,
            ],
            Self::intake_from_row,
        )
        .optional()
        .map_err(Self::conflict_as_validation)?
        .ok_or_else(|| NutritionError::not_found(format!("Intake record {record_id} not found")))
    }

    /// Overwrite only the fields present in `update`.
    pub fn update_intake(
        &self,
        record_id: i64,
        user_id: i64,
        update: &IntakeUpdate,
    ) -> Result<IntakeRecord> {
        update.validate()?;
        let now = Local::now().to_rfc3339();
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "UPDATE daily_food_intake SET
                    product_name = COALESCE(?1, product_name),
                    carbs = COALESCE(?2, carbs),
                    protein = COALESCE(?3, protein),
                    fat = COALESCE(?4, fat),
                    fiber = COALESCE(?5, fiber),
                    sugar = COALESCE(?6, sugar),
                    sodium = COALESCE(?7, sodium),
                    quantity_grams = COALESCE(?8, quantity_grams),
                    intake_date = COALESCE(?9, intake_date),
                    meal_type = COALESCE(?10, meal_type),
                    intake_time = COALESCE(?11, intake_time),
                    updated_at = ?12
                 WHERE id = ?13 AND user_id = ?14
                 RETURNING {INTAKE_COLUMNS}"
            ),
            params![
                update.product_name.as_deref().map(str::trim),
                update.carbs,
                update.protein,
                update.fat,
                update.fiber,
                update.sugar,
                update.sodium,
                update.quantity_grams,
                update.intake_date.map(|d| d.format("%Y-%m-%d").to_string()),
                update.meal_type.as_deref().map(str::to_lowercase),
                update.intake_time.map(|t| t.format("%H:%M:%S").to_string()),
                now,
                record_id,
                user_id,
            ],
            Self::intake_from_row,
        )
        .optional()
        .map_err(Self::conflict_as_validation)?
        .ok_or_else(|| NutritionError::not_found(format!("Intake record {record_id} not found")))
    }

    fn conflict_as_validation(err: rusqlite::Error) -> NutritionError {
        let err = NutritionError::from(err);
        if err.is_unique_violation() {
            NutritionError::validation(
                "An intake record for this product already exists on that date",
            )
        } else {
            err
        }
    }

    pub fn delete_intake(&self, record_id: i64, user_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM daily_food_intake WHERE id = ?1 AND user_id = ?2",
            params![record_id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_intake_for_date(&self, user_id: i64, date: NaiveDate) -> Result<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM daily_food_intake WHERE user_id = ?1 AND intake_date = ?2",
            params![user_id, date.format("%Y-%m-%d").to_string()],
        )?;
        debug!(user_id, %date, deleted = rows, "cleared intake for date");
        Ok(rows)
    }

    /// Case-insensitive substring match on product name, newest first.
    pub fn search_intake(&self, user_id: i64, fragment: &str) -> Result<Vec<IntakeRecord>> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Err(NutritionError::validation("Search query must not be empty"));
        }
        let escaped = fragment
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        let conn = self.conn()?;
        let records = Self::select_intake(
            &conn,
            "user_id = ?1 AND unicode_lower(product_name) LIKE ?2 ESCAPE '\\' ORDER BY intake_date DESC, id",
            params![user_id, pattern],
        )?;
        Ok(records)
    }

    /// Products ranked by how many records mention them.
    pub fn most_consumed(&self, user_id: i64, limit: i64) -> Result<Vec<ProductStat>> {
        if !(1..=MAX_TOP_LIMIT).contains(&limit) {
            return Err(NutritionError::validation(format!(
                "limit must be between 1 and {MAX_TOP_LIMIT}"
            )));
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT product_name, COUNT(*), SUM(quantity_grams), AVG(carbs), AVG(protein), AVG(fat)
             FROM daily_food_intake
             WHERE user_id = ?1
             GROUP BY product_name
             ORDER BY COUNT(*) DESC, product_name
             LIMIT ?2",
        )?;
        let stats = stmt
            .query_map(params![user_id, limit], |row| {
                let avg_carbs: f64 = row.get(3)?;
                let avg_protein: f64 = row.get(4)?;
                let avg_fat: f64 = row.get(5)?;
                Ok(ProductStat {
                    product_name: row.get(0)?,
                    times_consumed: row.get(1)?,
                    total_quantity_grams: round2(row.get(2)?),
                    avg_carbs: round2(avg_carbs),
                    avg_protein: round2(avg_protein),
                    avg_fat: round2(avg_fat),
                    avg_calories: calculate_calories(avg_carbs, avg_protein, avg_fat),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }
}
