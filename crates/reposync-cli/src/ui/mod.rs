//! UI Module - terminal output for reposync commands
//!
//! ```text
//! Synchronizer / commands
//!        │ SyncReporter calls
//!        ▼
//!     Output      cloneable handle, possibly silent
//!        │ UiEvent
//!        ▼
//!    UiActor      single thread owning stdout
//!        │ styles with
//!        ▼
//!     Theme       colors and icons
//! ```

pub mod actor;
pub mod output;
pub mod progress;
pub mod theme;

pub use output::Output;
pub use theme::Theme;
