use thiserror::Error;

/// Errors surfaced by the nutrition stores and service layer.
///
/// Callers map these onto their own transport: the HTTP server turns
/// `Validation` into 400, `NotFound` and `ProductUnavailable` into 404, and
/// everything else into a generic 500.
#[derive(Debug, Error)]
pub enum NutritionError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("OpenFoodFacts: {0}")]
    ProductUnavailable(String),

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type Result<T> = std::result::Result<T, NutritionError>;

impl NutritionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// True when a storage error is a UNIQUE constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Storage(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            NutritionError::validation("carbs must not be negative").to_string(),
            "carbs must not be negative"
        );
        assert_eq!(
            NutritionError::ProductUnavailable("no product for barcode '1'".into()).to_string(),
            "OpenFoodFacts: no product for barcode '1'"
        );
    }

    #[test]
    fn test_not_found_is_not_unique_violation() {
        assert!(!NutritionError::not_found("x").is_unique_violation());
    }
}
