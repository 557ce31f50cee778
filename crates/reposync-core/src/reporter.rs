//! Reporter trait for dependency injection
//!
//! This trait allows the synchronizer to report progress and status without
//! being coupled to a specific terminal or GUI implementation.

use crate::catalog::UpdateCandidate;
use crate::sync::SyncStatus;

/// Receives status and progress from a synchronization run.
pub trait SyncReporter: Send + Sync {
    /// A run-level status change (connecting, checking compatibility, final result).
    fn status(&self, status: &SyncStatus);

    /// Bytes of one repository's index received so far.
    ///
    /// `bytes_read` never decreases between calls for the same repository.
    fn progress(&self, address: &str, bytes_read: u64, total: Option<u64>);

    /// The canonical catalog changed; listeners should reload.
    fn catalog_changed(&self);

    /// Installed applications with a newer suggested version.
    fn updates_available(&self, updates: &[UpdateCandidate]);
}

impl<T: SyncReporter + ?Sized> SyncReporter for std::sync::Arc<T> {
    fn status(&self, status: &SyncStatus) {
        (**self).status(status);
    }
    fn progress(&self, address: &str, bytes_read: u64, total: Option<u64>) {
        (**self).progress(address, bytes_read, total);
    }
    fn catalog_changed(&self) {
        (**self).catalog_changed();
    }
    fn updates_available(&self, updates: &[UpdateCandidate]) {
        (**self).updates_available(updates);
    }
}

/// A no-op reporter for silent operations (e.g., scripting, testing).
#[derive(Clone, Copy)]
pub struct NullReporter;

impl SyncReporter for NullReporter {
    fn status(&self, _: &SyncStatus) {}
    fn progress(&self, _: &str, _: u64, _: Option<u64>) {}
    fn catalog_changed(&self) {}
    fn updates_available(&self, _: &[UpdateCandidate]) {}
}

/// Percentage of `total` covered by `bytes_read`, clamped to 100.
///
/// Returns `None` when the total size is unknown.
///
/// # Example
///
/// ```
/// use reposync_core::reporter::percent;
///
/// assert_eq!(percent(50, Some(200)), Some(25));
/// assert_eq!(percent(300, Some(200)), Some(100));
/// assert_eq!(percent(10, None), None);
/// ```
pub fn percent(bytes_read: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|&t| t > 0)?;
    let pct = (u128::from(bytes_read) * 100 / u128::from(total)).min(100);
    u8::try_from(pct).ok()
}
