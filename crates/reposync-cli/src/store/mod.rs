//! Catalog storage backed by SQLite.

pub mod actor;
pub mod db;

pub use actor::DbHandle;
pub use db::{CatalogCounts, CatalogDb, DbError};
