// AI
//! 📊 progress.rs — "Are we there yet?" — every migration, every time, forever.
//!
//! 🚀 Two jobs:
//! - `MigrationProgress`: the live bar while photos move (photos done / total, bytes,
//!   elapsed, a rough rate). Hidden in tests and when `show_progress = false`.
//! - `render_summary`: the end-of-run table. Status, counts, bytes, and every photo
//!   that didn't make it, with the reason it didn't.
//!
//! ⚠️  Warning: Watching this progress bar will not make it go faster.
//! Neither will refreshing it. We've tried. Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use indicatif::{ProgressBar, ProgressStyle};

use crate::migrator::{MigrationReport, RunStatus};

// -- 📏 one kibibyte — not a kilobyte, pedants. there's a difference and I will die on this hill.
const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} photos  {msg}";

/// 📦 Raw bytes to something a human can read. "1073741824 bytes" is a war crime in a UI.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        // -- 🐛 raw bytes mode. small photos need love too.
        format!("{} bytes", bytes)
    }
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls. If it shows HH:MM:SS, call your mom.
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 The live progress bar. One tick per photo, win or lose.
///
/// # Ancient Proverb
/// "He who runs a migration without a progress bar, migrates alone and in darkness."
pub struct MigrationProgress {
    progress_bar: ProgressBar,
    bytes_moved: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for MigrationProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("MigrationProgress")
            .field("hidden", &self.progress_bar.is_hidden())
            .field("bytes_moved", &self.bytes_moved.load(Ordering::Relaxed))
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::hidden()
    }
}

impl MigrationProgress {
    /// 🎨 A visible bar on stderr. Length is unknown until the source has been listed.
    pub fn new() -> Self {
        let progress_bar = ProgressBar::new(0);
        // -- 🐛 the template is a constant; if it ever fails to parse we fall back to the plain bar
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style);
        progress_bar.enable_steady_tick(Duration::from_millis(200));
        Self::wrap(progress_bar)
    }

    /// 🙈 Draws nothing. Counts everything anyway.
    pub fn hidden() -> Self {
        Self::wrap(ProgressBar::hidden())
    }

    fn wrap(progress_bar: ProgressBar) -> Self {
        Self {
            progress_bar,
            bytes_moved: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_total(&self, photos: u64) {
        self.progress_bar.set_length(photos);
        self.progress_bar.set_position(0);
    }

    pub(crate) fn photo_started(&self, name: &str) {
        self.progress_bar.set_message(self.message(Some(name)));
    }

    pub(crate) fn photo_migrated(&self, bytes: u64) {
        self.bytes_moved.fetch_add(bytes, Ordering::Relaxed);
        self.progress_bar.inc(1);
    }

    pub(crate) fn photo_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.progress_bar.inc(1);
    }

    /// ✅ Park the bar with a final message. The summary table takes it from here.
    pub(crate) fn finish(&self, status: &RunStatus) {
        let the_message = format!("{} · {}", status, self.message(None));
        match status {
            RunStatus::Success | RunStatus::CompletedWithErrors => {
                self.progress_bar.finish_with_message(the_message)
            }
            RunStatus::Cancelled | RunStatus::Faulted(_) => {
                self.progress_bar.abandon_with_message(the_message)
            }
        }
    }

    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved.load(Ordering::Relaxed)
    }

    pub fn position(&self) -> u64 {
        self.progress_bar.position()
    }

    fn message(&self, current: Option<&str>) -> String {
        let bytes = self.bytes_moved();
        let elapsed = self.progress_bar.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            format!("{}/s", format_bytes((bytes as f64 / elapsed) as u64))
        } else {
            "--".to_string()
        };
        let failed = self.failed.load(Ordering::Relaxed);
        let mut the_message = format!("{} moved ({rate})", format_bytes(bytes));
        if failed > 0 {
            the_message.push_str(&format!(", {} failed", format_number(failed)));
        }
        if let Some(name) = current {
            the_message.push_str(&format!(" · {name}"));
        }
        the_message
    }
}

/// 🍽️ The end-of-run table, ready to print.
///
/// ```text
/// ┌──────────────────┬──────────────────────┐
/// │ Status           ┆ completed with errors│
/// │ Photos listed    ┆ 2                    │
/// ...
/// ```
/// Followed by a second table of failed photos, if there were any.
pub fn render_summary(report: &MigrationReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let rows = [
        ("Status", report.status.to_string()),
        ("Photos listed", format_number(report.listed as u64)),
        ("Photos attempted", format_number(report.attempted as u64)),
        ("Photos migrated", format_number(report.metrics.photos_migrated)),
        ("Bytes transferred", format_bytes(report.metrics.bytes_transferred)),
        ("Failures", format_number(report.failures.len() as u64)),
        ("Elapsed", format_duration(report.elapsed)),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }

    let mut the_summary = table.to_string();
    if !report.failures.is_empty() {
        let mut failures = Table::new();
        failures.load_preset(UTF8_FULL_CONDENSED);
        failures.set_content_arrangement(ContentArrangement::Dynamic);
        failures.set_header(vec!["Photo", "Error"]);
        for failure in &report.failures {
            failures.add_row(vec![
                Cell::new(&failure.name),
                Cell::new(failure.error.to_string()),
            ]);
        }
        the_summary.push('\n');
        the_summary.push_str(&failures.to_string());
    }
    the_summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MigrationError;
    use crate::migrator::{MetricsSnapshot, PhotoFailure};

    #[test]
    fn the_one_where_bytes_pick_their_own_units() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(5 * MIB + MIB / 2), "5.50 MiB");
        assert_eq!(format_bytes(3 * GIB), "3.00 GiB");
    }

    #[test]
    fn the_one_where_numbers_and_durations_get_dressed_up() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1_234_567), "1,234,567");
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 61)), "03:01:01");
    }

    #[test]
    fn the_one_where_the_hidden_bar_still_keeps_count() {
        let the_progress = MigrationProgress::hidden();
        the_progress.set_total(3);
        the_progress.photo_started("a.jpg");
        the_progress.photo_migrated(100);
        the_progress.photo_failed();
        assert_eq!(the_progress.position(), 2);
        assert_eq!(the_progress.bytes_moved(), 100);
        the_progress.finish(&RunStatus::CompletedWithErrors);
    }

    #[test]
    fn the_one_where_the_summary_names_the_fallen() {
        let the_report = MigrationReport {
            status: RunStatus::CompletedWithErrors,
            metrics: MetricsSnapshot {
                photos_migrated: 1,
                bytes_transferred: 2048,
            },
            failures: vec![PhotoFailure {
                name: "b.jpg".into(),
                error: MigrationError::MigrationFailed {
                    name: "b.jpg".into(),
                    attempts: 3,
                    last_error: Box::new(MigrationError::Download {
                        backend: "in-memory".into(),
                        name: "b.jpg".into(),
                        reason: "scripted download failure".into(),
                    }),
                },
            }],
            listed: 2,
            attempted: 2,
            elapsed: Duration::from_secs(25),
        };

        let the_summary = render_summary(&the_report);
        assert!(the_summary.contains("completed with errors"));
        assert!(the_summary.contains("2.00 KiB"));
        assert!(the_summary.contains("b.jpg"));
        assert!(the_summary.contains("00:25"));
    }
}
