use serde::{Deserialize, Serialize};

use crate::models::round2;

pub const UNKNOWN_PRODUCT: &str = "Unknown Product";

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub products: Vec<ProductData>,
}

#[derive(Debug, Deserialize)]
pub struct ProductResponse {
    pub status: i32,
    pub product: Option<ProductData>,
}

#[derive(Debug, Deserialize)]
pub struct ProductData {
    pub product_name: Option<String>,
    pub brands: Option<String>,
    pub code: Option<String>,
    pub image_url: Option<String>,
    pub nutriments: Option<Nutriments>,
}

#[derive(Debug, Default, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct Nutriments {
    #[serde(rename = "energy-kcal_100g")]
    pub energy_kcal_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub fat_100g: Option<f64>,
    pub fiber_100g: Option<f64>,
    pub sugars_100g: Option<f64>,
    pub sodium_100g: Option<f64>,
}

/// Nutrient amounts for some quantity of a product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Nutrients {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub sodium: f64,
}

impl Nutrients {
    /// Scale per-100g values to `quantity_grams`.
    #[must_use]
    pub fn scaled(&self, quantity_grams: f64) -> Self {
        let m = quantity_grams / 100.0;
        Self {
            calories: round2(self.calories * m),
            protein: round2(self.protein * m),
            carbs: round2(self.carbs * m),
            fat: round2(self.fat * m),
            fiber: round2(self.fiber * m),
            sugar: round2(self.sugar * m),
            sodium: round2(self.sodium * m),
        }
    }
}

/// A catalog product normalised to per-100g nutrients.
#[derive(Debug, Clone, Serialize)]
pub struct ProductFacts {
    pub barcode: Option<String>,
    pub product_name: String,
    pub brand: Option<String>,
    pub image_url: Option<String>,
    pub per_100g: Nutrients,
}

/// A product scaled to the quantity the caller asked about.
#[derive(Debug, Clone, Serialize)]
pub struct ScaledProduct {
    #[serde(flatten)]
    pub product: ProductFacts,
    pub quantity_grams: f64,
    pub nutrients: Nutrients,
}

impl ProductFacts {
    #[must_use]
    pub fn scaled_to(self, quantity_grams: f64) -> ScaledProduct {
        let nutrients = self.per_100g.scaled(quantity_grams);
        ScaledProduct {
            product: self,
            quantity_grams,
            nutrients,
        }
    }
}

impl From<Nutriments> for Nutrients {
    fn from(n: Nutriments) -> Self {
        // Negative values show up in crowd-sourced data; clamp them.
        let v = |x: Option<f64>| x.filter(|x| x.is_finite()).unwrap_or(0.0).max(0.0);
        Self {
            calories: v(n.energy_kcal_100g),
            protein: v(n.proteins_100g),
            carbs: v(n.carbohydrates_100g),
            fat: v(n.fat_100g),
            fiber: v(n.fiber_100g),
            sugar: v(n.sugars_100g),
            sodium: v(n.sodium_100g),
        }
    }
}

/// Search results: products without a name are dropped.
#[must_use]
pub fn search_result_to_facts(p: ProductData) -> Option<ProductFacts> {
    p.product_name.as_deref().filter(|n| !n.trim().is_empty())?;
    Some(product_to_facts(p))
}

/// Barcode lookups always yield facts; a missing name becomes
/// [`UNKNOWN_PRODUCT`] and missing nutrients become 0.
#[must_use]
pub fn product_to_facts(p: ProductData) -> ProductFacts {
    let product_name = p
        .product_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string());

    ProductFacts {
        barcode: p.code.filter(|c| !c.is_empty()),
        product_name,
        brand: p.brands.filter(|b| !b.is_empty()),
        image_url: p.image_url.filter(|u| !u.is_empty()),
        per_100g: p.nutriments.map(Nutrients::from).unwrap_or_default(),
    }
}
