pub mod db;
pub mod error;
pub mod favorites;
pub mod goals;
pub mod models;
pub mod openfoodfacts;
pub mod service;
pub mod summary;
