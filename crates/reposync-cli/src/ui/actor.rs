//! UI Actor - Single-threaded event processing
//!
//! Synchronization reports progress from async tasks while the terminal is
//! strictly serial. Every reporter call becomes a [`UiEvent`]; one thread owns
//! stdout and renders events in order, so lines never interleave.

use std::io::Write;
use std::sync::mpsc;
use std::thread;

use crossterm::style::Stylize;
use reposync_core::SyncStatus;
use reposync_core::catalog::UpdateCandidate;

use super::progress::{ProgressThrottle, format_progress};
use super::theme::Theme;

/// Events that can be sent to the UI actor
#[derive(Debug)]
pub enum UiEvent {
    /// A run-level status change
    Status(SyncStatus),
    /// Bytes received for a repository index
    Progress {
        /// Repository address
        address: String,
        /// Bytes read so far
        current: u64,
        /// Content length, if the server sent one
        total: Option<u64>,
    },
    /// Installed applications with newer versions
    Updates(Vec<UpdateCandidate>),
    /// The catalog was rewritten
    CatalogChanged,
    /// Plain informational line
    Info(String),
    /// Warning line
    Warning(String),
    /// Synchronize UI state (wait for all pending renders)
    Sync(tokio::sync::oneshot::Sender<()>),
    /// Shutdown the actor
    Shutdown,
}

/// Handle to the UI actor thread
#[derive(Debug)]
pub struct UiActor {
    sender: mpsc::Sender<UiEvent>,
    _handle: thread::JoinHandle<()>,
}

impl UiActor {
    /// Spawn a new UI actor thread rendering to stdout
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();

        let handle = thread::spawn(move || {
            let _ = run_event_loop(receiver, std::io::stdout());
        });

        Self {
            sender,
            _handle: handle,
        }
    }

    /// Get a cloneable sender for this actor
    pub fn sender(&self) -> mpsc::Sender<UiEvent> {
        self.sender.clone()
    }
}

impl Drop for UiActor {
    fn drop(&mut self) {
        let _ = self.sender.send(UiEvent::Shutdown);
    }
}

/// Renders events to a terminal-like writer.
struct Renderer<W: Write> {
    out: W,
    theme: Theme,
    throttle: ProgressThrottle,
    /// Address whose progress line is currently open (no trailing newline yet).
    live: Option<String>,
}

impl<W: Write> Renderer<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            theme: Theme::default(),
            throttle: ProgressThrottle::default(),
            live: None,
        }
    }

    /// Terminate an open progress line before printing anything else.
    fn close_live(&mut self) {
        if self.live.take().is_some() {
            let _ = writeln!(self.out);
        }
    }

    fn line(&mut self, text: &str) {
        self.close_live();
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }

    fn render(&mut self, event: UiEvent) {
        let icons = self.theme.icons.clone();
        let colors = self.theme.colors.clone();

        match event {
            UiEvent::Status(SyncStatus::Info(msg)) => {
                self.line(&format!("  {} {}", icons.info, msg.dark_grey()));
            }
            UiEvent::Status(status @ SyncStatus::CompleteWithChanges) => {
                self.line(&format!(
                    "{} {}",
                    icons.success.with(colors.success),
                    status.to_string().bold()
                ));
            }
            UiEvent::Status(status @ SyncStatus::CompleteAndUnchanged) => {
                self.line(&format!(
                    "{} {}",
                    icons.success.with(colors.success),
                    status.to_string().dark_grey()
                ));
            }
            UiEvent::Status(SyncStatus::ErrorLocalPartial(errors)) => {
                for err in &errors {
                    self.line(&format!("  {} {}", icons.warning.with(colors.warning), err));
                }
                self.line(&format!(
                    "{} {}",
                    icons.warning.with(colors.warning),
                    "Some repositories failed (all other repositories fine)".bold()
                ));
            }
            UiEvent::Status(SyncStatus::ErrorLocalAll(errors)) => {
                for err in &errors {
                    self.line(&format!("  {} {}", icons.error.with(colors.error), err));
                }
                self.line(&format!(
                    "{} {}",
                    icons.error.with(colors.error),
                    "Every repository failed".bold()
                ));
            }
            UiEvent::Status(status @ SyncStatus::ErrorGlobal(_)) => {
                self.line(&format!(
                    "{} {}",
                    icons.error.with(colors.error),
                    status.to_string().with(colors.error)
                ));
            }
            UiEvent::Progress {
                address,
                current,
                total,
            } => {
                if self.live.as_deref() != Some(address.as_str()) {
                    self.close_live();
                    self.throttle.reset();
                }
                if self.throttle.should_draw(current, total) {
                    let _ = write!(
                        self.out,
                        "\r  {} {}  {}",
                        icons.active.with(colors.primary),
                        address.as_str().with(colors.primary),
                        format_progress(current, total).with(colors.secondary)
                    );
                    let _ = self.out.flush();
                    self.live = Some(address);
                }
            }
            UiEvent::Updates(updates) => {
                self.line(&format!(
                    "{} {} can be updated",
                    icons.info,
                    plural(updates.len(), "application")
                ));
                for u in &updates {
                    let label = u.name.as_deref().unwrap_or(u.app_id.as_str());
                    self.line(&format!(
                        "    {:<32} {}  ->  {}",
                        label.with(colors.primary),
                        u.installed_vercode.to_string().dark_grey(),
                        u.suggested_vercode.to_string().with(colors.success)
                    ));
                }
            }
            UiEvent::CatalogChanged => {
                tracing::debug!("catalog changed");
            }
            UiEvent::Info(msg) => {
                self.line(&format!("  {} {}", icons.info, msg));
            }
            UiEvent::Warning(msg) => {
                self.line(&format!("  {} {}", icons.warning.with(colors.warning), msg));
            }
            UiEvent::Sync(_) | UiEvent::Shutdown => {}
        }
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Main event loop for the UI actor
///
/// Processes events sequentially until shutdown and hands the writer back.
fn run_event_loop<W: Write>(receiver: mpsc::Receiver<UiEvent>, out: W) -> W {
    let mut renderer = Renderer::new(out);

    while let Ok(event) = receiver.recv() {
        match event {
            UiEvent::Sync(tx) => {
                // All previous events are processed because of sequential mpsc
                renderer.close_live();
                let _ = renderer.out.flush();
                let _ = tx.send(());
            }
            UiEvent::Shutdown => break,
            event => renderer.render(event),
        }
    }

    renderer.close_live();
    renderer.out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(events: Vec<UiEvent>) -> String {
        let (tx, rx) = mpsc::channel();
        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);
        let out = run_event_loop(rx, Vec::new());
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_final_statuses_render() {
        let out = render(vec![
            UiEvent::Status(SyncStatus::Info("Connecting to https://a.example".into())),
            UiEvent::Status(SyncStatus::CompleteWithChanges),
        ]);
        assert!(out.contains("Connecting to https://a.example"));
        assert!(out.contains("Catalog updated"));
    }

    #[test]
    fn test_partial_failure_lists_each_error() {
        let out = render(vec![UiEvent::Status(SyncStatus::ErrorLocalPartial(vec![
            "https://b.example: HTTP 404".into(),
        ]))]);
        assert!(out.contains("https://b.example: HTTP 404"));
        assert!(out.contains("all other repositories fine"));
    }

    #[test]
    fn test_progress_line_closed_before_next_line() {
        let out = render(vec![
            UiEvent::Progress {
                address: "https://a.example".into(),
                current: 512,
                total: Some(1024),
            },
            UiEvent::Info("done".into()),
        ]);
        assert!(out.contains("(50%)"));
        let progress_end = out.find("(50%)").unwrap();
        let info = out.find("done").unwrap();
        assert!(out[progress_end..info].contains('\n'));
    }

    #[test]
    fn test_updates_listing() {
        let out = render(vec![UiEvent::Updates(vec![UpdateCandidate {
            app_id: "org.x".into(),
            name: Some("Xylophone".into()),
            installed_vercode: 1,
            suggested_vercode: 3,
        }])]);
        assert!(out.contains("1 application can be updated"));
        assert!(out.contains("Xylophone"));
    }

    #[test]
    fn test_actor_spawn() {
        let actor = UiActor::spawn();
        let sender = actor.sender();
        sender.send(UiEvent::Info("test".to_string())).unwrap();
        drop(actor);
    }
}
