//! Shared types for reposync: catalog records, hash algorithms, and the
//! streaming index document parser.

pub mod fields;
/// Package content digest algorithms.
pub mod hash;
pub mod index;
/// Repository, application and package records.
pub mod types;

// Re-exports
pub use hash::*;
pub use index::{IndexDocument, IndexError, IndexParser, IndexReceiver, IndexRecord};
pub use types::*;

/// File name of the index document below a repository address.
pub const INDEX_FILE_NAME: &str = "index.xml";
