//! reposync - keep a local package catalog in sync with repository indexes
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! # Architecture
//!
//! - **Streaming**: each repository index is parsed as it downloads and
//!   written straight into a staging area; nothing holds a whole index.
//! - **Actor Pattern**: catalog access is serialized through `DbHandle`, which
//!   owns the only SQLite connection. Terminal output goes through the UI
//!   actor.
//! - **Atomic swap**: a repository's new content replaces the old one in a
//!   single transaction, or not at all.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.reposync/        (or $REPOSYNC_HOME)
//! ├── config.toml     # update policy, device profile, repositories
//! ├── catalog.db      # SQLite catalog
//! └── sync.lock       # present while an update runs
//! ```

pub mod cmd;
pub mod store;
pub mod ui;

pub use crate::store::DbHandle;
pub use reposync_core::paths::*;

use clap::{Parser, Subcommand};
use reposync_core::schedule::NetworkClass;

#[derive(Debug, Parser)]
#[command(name = "reposync")]
#[command(author, version, about = "reposync - package repository index synchronization")]
pub struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch every enabled repository index and update the catalog
    Update {
        /// Only update the repository at this address
        #[arg(long)]
        repo: Option<String>,
        /// Honor the configured interval and network policy
        #[arg(long)]
        scheduled: bool,
        /// Current network class (unmetered, metered, unknown)
        #[arg(long, env = "REPOSYNC_NETWORK", default_value = "unknown")]
        network: NetworkClass,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List configured repositories
    Repos,
    /// Show catalog status
    Status,
    /// Record the installed version of an application
    Installed {
        /// Application id
        app: String,
        /// Installed version code
        vercode: i32,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
