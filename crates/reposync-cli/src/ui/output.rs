//! Unified UI output interface.
//!
//! Commands and the synchronizer talk to the terminal through [`Output`].
//! All operations are sent as events to the UI actor for sequential
//! processing.

use std::sync::{OnceLock, mpsc};

use reposync_core::SyncStatus;
use reposync_core::catalog::UpdateCandidate;
use reposync_core::reporter::SyncReporter;

use super::actor::{UiActor, UiEvent};

/// Singleton instance of the UI actor channel.
static UI_ACTOR: OnceLock<mpsc::Sender<UiEvent>> = OnceLock::new();

/// Lazily initializes the UI actor and returns a sender handle.
fn get_actor_sender() -> mpsc::Sender<UiEvent> {
    UI_ACTOR
        .get_or_init(|| {
            let actor = UiActor::spawn();
            let sender = actor.sender();

            // Keep actor alive for program duration
            std::mem::forget(actor);

            sender
        })
        .clone()
}

/// A cloneable handle for sending UI events to the terminal actor.
///
/// A silent handle drops every event; used for `--json` and `--quiet` runs
/// where stdout belongs to machine-readable output.
#[derive(Clone, Debug)]
pub struct Output {
    sender: Option<mpsc::Sender<UiEvent>>,
}

impl Output {
    /// Create a new output handle.
    pub fn new() -> Self {
        Self {
            sender: Some(get_actor_sender()),
        }
    }

    /// Create a handle that renders nothing.
    pub fn silent() -> Self {
        Self { sender: None }
    }

    fn send(&self, event: UiEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    /// Prints an informational message to the console.
    pub fn info(&self, msg: &str) {
        self.send(UiEvent::Info(msg.to_string()));
    }

    /// Prints a warning message to the console.
    pub fn warning(&self, msg: &str) {
        self.send(UiEvent::Warning(msg.to_string()));
    }

    /// Async wait until all pending UI events are processed.
    pub async fn wait_async(&self) {
        if let Some(sender) = &self.sender {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = sender.send(UiEvent::Sync(tx));
            let _ = rx.await;
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncReporter for Output {
    fn status(&self, status: &SyncStatus) {
        self.send(UiEvent::Status(status.clone()));
    }

    fn progress(&self, address: &str, bytes_read: u64, total: Option<u64>) {
        self.send(UiEvent::Progress {
            address: address.to_string(),
            current: bytes_read,
            total,
        });
    }

    fn catalog_changed(&self) {
        self.send(UiEvent::CatalogChanged);
    }

    fn updates_available(&self, updates: &[UpdateCandidate]) {
        self.send(UiEvent::Updates(updates.to_vec()));
    }
}
