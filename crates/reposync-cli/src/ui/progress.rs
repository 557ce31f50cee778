//! Download progress formatting and redraw throttling.

use reposync_core::reporter::percent;

use super::theme::format_size;

/// Minimum growth between redraws when the total size is unknown.
const REDRAW_BYTES: u64 = 64 * 1024;

/// Format progress as `received / total (pct%)`, or just `received` when the
/// total is unknown.
pub fn format_progress(current: u64, total: Option<u64>) -> String {
    match (total, percent(current, total)) {
        (Some(total), Some(pct)) => format!(
            "{} / {} ({pct}%)",
            format_size(current),
            format_size(total)
        ),
        _ => format_size(current),
    }
}

/// Decides whether a progress update is worth redrawing.
///
/// Redraws whenever the whole-number percentage changes, or every
/// 64 KiB when the total size is unknown.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    last: Option<(u64, Option<u8>)>,
}

impl ProgressThrottle {
    /// Forget the previous update (a new download started).
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Record `current` and report whether the line should be redrawn.
    pub fn should_draw(&mut self, current: u64, total: Option<u64>) -> bool {
        let pct = percent(current, total);
        let draw = match (self.last, pct) {
            (None, _) => true,
            (Some((_, Some(prev))), Some(now)) => now != prev,
            (Some((prev_bytes, _)), _) => current.saturating_sub(prev_bytes) >= REDRAW_BYTES,
        };
        if draw {
            self.last = Some((current, pct));
        }
        draw
    }
}
