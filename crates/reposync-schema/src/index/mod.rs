//! Repository index documents.
//!
//! The index is a tree-structured document with one outer `<repo>` element
//! containing `<application>` elements, each holding descriptive fields and
//! zero or more `<package>` builds. [`IndexParser`] turns the document's
//! element events into typed records and pushes them to an
//! [`IndexReceiver`] as soon as each application closes, so callers can
//! persist incrementally instead of buffering the whole document.
//!
//! ```text
//! Idle --<application>--> InApplication --<package>--> InPackage
//!  ^                          |    ^                       |
//!  +------</application>------+    +------</package>-------+
//! ```

mod parser;
mod xml;

pub use parser::IndexParser;
pub use xml::{IndexDocument, parse_slice};

use crate::types::{ApplicationRecord, PackageRecord, RepositoryMetadata};
use thiserror::Error;

/// Consumer of completed index entities.
///
/// Production code persists as records arrive; tests usually collect them
/// into a `Vec<IndexRecord>`.
pub trait IndexReceiver {
    /// Called once, when the outer repository element closes.
    fn on_repository(&mut self, metadata: RepositoryMetadata);

    /// Called once per closed application element, with every package
    /// declared inside it in declaration order.
    fn on_application(&mut self, app: ApplicationRecord, packages: Vec<PackageRecord>);
}

/// A completed entity emitted by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRecord {
    /// Repository-level metadata.
    Repository(RepositoryMetadata),
    /// An application together with its packages.
    Application(ApplicationRecord, Vec<PackageRecord>),
}

impl IndexReceiver for Vec<IndexRecord> {
    fn on_repository(&mut self, metadata: RepositoryMetadata) {
        self.push(IndexRecord::Repository(metadata));
    }

    fn on_application(&mut self, app: ApplicationRecord, packages: Vec<PackageRecord>) {
        self.push(IndexRecord::Application(app, packages));
    }
}

/// The underlying document could not be read.
///
/// Field-level problems never surface here; they fall back to sentinels.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The document is not well-formed.
    #[error("Document parse failed: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An element or attribute could not be decoded.
    #[error("Document parse failed: {0}")]
    Malformed(String),

    /// The document ended before its elements were closed.
    #[error("Document parse failed: unexpected end of document ({0} open elements)")]
    Truncated(usize),

    /// Reading the byte stream failed.
    #[error("IO error while reading index: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexReceiver for std::collections::VecDeque<IndexRecord> {
    fn on_repository(&mut self, metadata: RepositoryMetadata) {
        self.push_back(IndexRecord::Repository(metadata));
    }

    fn on_application(&mut self, app: ApplicationRecord, packages: Vec<PackageRecord>) {
        self.push_back(IndexRecord::Application(app, packages));
    }
}
