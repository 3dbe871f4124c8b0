use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{NutritionError, Result};
use crate::models::{Favorite, IntakeFields, IntakeRecord, NewFavorite, validate_quantity};
use crate::openfoodfacts::{ProductFacts, ScaledProduct};

const MAX_PAGE_SIZE: u32 = 100;

/// External product catalog.
///
/// The CLI implements this with reqwest against `OpenFoodFacts`; tests use
/// in-process fakes. `lookup_barcode` returns `Ok(None)` when the catalog
/// has no such product.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn search(
        &self,
        query: &str,
        page_size: u32,
        page: u32,
    ) -> anyhow::Result<Vec<ProductFacts>>;
    async fn lookup_barcode(&self, barcode: &str) -> anyhow::Result<Option<ProductFacts>>;
}

/// Intake logged by barcode: nutrients come from the catalog, scaled to
/// `quantity_grams`.
#[derive(Debug, Clone)]
pub struct BarcodeIntake {
    pub user_id: i64,
    pub barcode: String,
    pub quantity_grams: f64,
    pub intake_date: NaiveDate,
    pub meal_type: Option<String>,
    pub intake_time: Option<NaiveTime>,
}

#[derive(Clone)]
pub struct NutritionService {
    db: Database,
    products: Arc<dyn ProductLookup>,
}

impl NutritionService {
    pub fn new(db: Database, products: Arc<dyn ProductLookup>) -> Self {
        Self { db, products }
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn add_intake(&self, user_id: i64, fields: &IntakeFields) -> Result<IntakeRecord> {
        self.db.insert_intake(user_id, fields)
    }

    pub async fn add_intake_from_barcode(&self, req: &BarcodeIntake) -> Result<IntakeRecord> {
        validate_quantity("quantity", req.quantity_grams)?;
        let facts = self.product(&req.barcode).await?;
        let n = facts.per_100g.scaled(req.quantity_grams);

        let fields = IntakeFields {
            product_name: facts.product_name,
            carbs: n.carbs,
            protein: n.protein,
            fat: n.fat,
            fiber: n.fiber,
            sugar: n.sugar,
            sodium: n.sodium,
            quantity_grams: req.quantity_grams,
            intake_date: req.intake_date,
            meal_type: req.meal_type.clone(),
            intake_time: req.intake_time,
            barcode: Some(req.barcode.trim().to_string()),
        };
        self.db.insert_intake(req.user_id, &fields)
    }

    pub async fn add_favorite_from_barcode(
        &self,
        user_id: i64,
        barcode: &str,
        default_quantity: f64,
    ) -> Result<Favorite> {
        validate_quantity("default_quantity", default_quantity)?;
        let facts = self.product(barcode).await?;
        let n = facts.per_100g.scaled(default_quantity);
        self.db.add_favorite(&NewFavorite {
            user_id,
            product_name: facts.product_name,
            barcode: Some(barcode.trim().to_string()),
            default_quantity,
            unit: "g".to_string(),
            calories: n.calories,
            carbs: n.carbs,
            protein: n.protein,
            fat: n.fat,
        })
    }

    pub async fn product_details(
        &self,
        barcode: &str,
        quantity_grams: f64,
    ) -> Result<ScaledProduct> {
        validate_quantity("quantity", quantity_grams)?;
        Ok(self.product(barcode).await?.scaled_to(quantity_grams))
    }

    pub async fn search_products(
        &self,
        query: &str,
        quantity_grams: f64,
        page_size: u32,
        page: u32,
    ) -> Result<Vec<ScaledProduct>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(NutritionError::validation("Search query must not be empty"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(NutritionError::validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if page == 0 {
            return Err(NutritionError::validation("page must be at least 1"));
        }
        validate_quantity("quantity", quantity_grams)?;

        let results = self
            .products
            .search(query, page_size, page)
            .await
            .map_err(|e| {
                warn!(query, error = %e, "product search failed");
                NutritionError::ProductUnavailable(format!("search for '{query}' failed"))
            })?;
        if results.is_empty() {
            return Err(NutritionError::ProductUnavailable(format!(
                "No products found for '{query}'"
            )));
        }
        debug!(query, count = results.len(), "product search");
        Ok(results
            .into_iter()
            .map(|p| p.scaled_to(quantity_grams))
            .collect())
    }

    /// Resolve a barcode through the catalog. Upstream failures and unknown
    /// barcodes both become `ProductUnavailable`.
    async fn product(&self, barcode: &str) -> Result<ProductFacts> {
        let barcode = barcode.trim();
        if barcode.is_empty() || !barcode.chars().all(|c| c.is_ascii_digit()) {
            return Err(NutritionError::validation(format!(
                "Invalid barcode '{barcode}'. Use digits only"
            )));
        }
        match self.products.lookup_barcode(barcode).await {
            Ok(Some(facts)) => {
                debug!(barcode, product = %facts.product_name, "barcode resolved");
                Ok(facts)
            }
            Ok(None) => Err(NutritionError::ProductUnavailable(format!(
                "No product found for barcode '{barcode}'"
            ))),
            Err(e) => {
                warn!(barcode, error = %e, "barcode lookup failed");
                Err(NutritionError::ProductUnavailable(format!(
                    "lookup for barcode '{barcode}' failed"
                )))
            }
        }
    }
}
