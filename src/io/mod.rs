//! Ingestion and staging I/O modules

pub mod catalog;
pub mod staging;

pub use catalog::{CatalogQuery, Sentinel2Source, TileBundle};
pub use staging::StagingContext;
