use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use paper_duper_core::{DuplicateGroup, ProgressReporter};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Phase changes: spinner with the status message
/// - Signature phase: progress bar (total known after enumeration)
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.guard();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    pub fn finish(&self) {
        if let Some(pb) = self.guard().take() {
            pb.finish_and_clear();
        }
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICK_CHARS),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn file_bar(total: usize) -> ProgressBar {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Processing [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for CliReporter {
    fn on_progress(&self, current: usize, total: usize, _path: &str) {
        let mut guard = self.guard();
        let needs_bar = guard
            .as_ref()
            .map_or(true, |pb| pb.length() != Some(total as u64));
        if needs_bar {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(Self::file_bar(total));
        }
        if let Some(pb) = guard.as_ref() {
            pb.set_position(current as u64);
        }
    }

    fn on_status(&self, message: &str) {
        self.set_bar(Self::spinner(message));
    }

    fn on_complete(&self, groups: &[DuplicateGroup]) {
        self.finish();
        eprintln!(
            "  {} Scan complete: {} duplicate groups",
            "✓".green(),
            groups.len()
        );
    }

    fn on_error(&self, message: &str) {
        self.finish();
        eprintln!("  {} {}", "✗".red(), message);
    }
}
