//! Progress spinner for CLI operations.

use console::Term;
use indicatif::ProgressBar;
use indicatif::ProgressState;
use indicatif::ProgressStyle;
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;
use workspacefs_core::MergeAction;
use workspacefs_core::ProgressCallback;

/// CLI spinner implementing `ProgressCallback`.
///
/// The number of staged entries is unknown until the walk ends, so this
/// shows a spinner with entry and byte counters instead of a bar. Cleared on
/// drop.
pub struct CliProgress {
    bar: ProgressBar,
    entries: u64,
    bytes_written: u64,
}

impl CliProgress {
    /// Creates a new spinner with the given message prefix.
    #[must_use]
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();

        // Template: "⠋ Materializing 1,204 entries (15.2 MB) usr/lib/libfoo.so"
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {prefix} {pos} entries ({bytes}) {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .with_key("bytes", |state: &ProgressState, w: &mut dyn Write| {
                    write!(w, "{}", humanize_bytes(state.len().unwrap_or(0))).unwrap_or(());
                }),
        );
        bar.set_prefix(message.to_string());
        bar.set_length(0);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            entries: 0,
            bytes_written: 0,
        }
    }

    /// Checks if we should show progress (TTY detection).
    #[must_use]
    pub fn should_show() -> bool {
        Term::stdout().is_term()
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for CliProgress {
    fn on_entry(&mut self, path: &Path, action: MergeAction) {
        self.entries += 1;
        self.bar.set_position(self.entries);
        if !matches!(
            action,
            MergeAction::SkippedExisting | MergeAction::SkippedReserved
        ) {
            self.bar.set_message(path.display().to_string());
        }
    }

    fn on_bytes_written(&mut self, bytes: u64) {
        // The length slot carries the byte count for the template key.
        self.bytes_written += bytes;
        self.bar.set_length(self.bytes_written);
    }

    fn on_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}

/// Converts bytes to human-readable format (KB, MB, GB, TB).
#[allow(clippy::cast_precision_loss)]
fn humanize_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
