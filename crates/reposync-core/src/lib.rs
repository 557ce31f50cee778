//! Core library for reposync: fetch repository indexes, stage them into the
//! catalog, and commit them atomically.

pub mod catalog;
pub mod config;
pub mod index;
pub mod io;
pub mod paths;
pub mod reporter;
pub mod schedule;
pub mod sync;
pub mod trust;

pub use catalog::{Catalog, CatalogError, MemoryCatalog};
pub use paths::*;
pub use reporter::{NullReporter, SyncReporter};
pub use sync::{SyncError, SyncOptions, SyncReport, SyncStatus, Synchronizer};

/// User Agent string for index requests
pub const USER_AGENT: &str = concat!("reposync/", env!("CARGO_PKG_VERSION"));
