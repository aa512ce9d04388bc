// src/commands/progress.rs
//! Terminal progress display for install and uninstall
//!
//! Wraps an indicatif bar with a status spinner below it and exposes both
//! through `ProgressTracker` so the engines can drive them.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use setupkit::ProgressTracker;
use std::time::Duration;

/// Progress bar plus status line for one engine run
pub struct TerminalProgress {
    _multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
}

impl TerminalProgress {
    /// Bar measured in bytes of the record stream
    pub fn install(package: &str) -> Self {
        Self::new(
            package,
            "{msg} [{bar:40.green/dim}] {bytes}/{total_bytes} ({eta})",
        )
    }

    /// Bar measured in reversal log entries
    pub fn uninstall(package: &str) -> Self {
        Self::new(package, "{msg} [{bar:40.red/dim}] {pos}/{len}")
    }

    fn new(package: &str, template: &str) -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(0);
        overall.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        overall.set_message(package.to_string());

        let status = ProgressBar::new_spinner();
        status.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        status.enable_steady_tick(Duration::from_millis(100));

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            _multi: multi,
            overall,
            status,
        }
    }
}

impl ProgressTracker for TerminalProgress {
    fn set_phase(&self, phase: &str) {
        self.status.set_message(phase.to_string());
    }

    fn set_message(&self, message: &str) {
        self.status.set_message(message.to_string());
    }

    fn set_length(&self, length: u64) {
        self.overall.set_length(length);
    }

    fn set_position(&self, position: u64) {
        self.overall.set_position(position);
    }

    fn position(&self) -> u64 {
        self.overall.position()
    }

    fn length(&self) -> u64 {
        self.overall.length().unwrap_or(0)
    }

    fn skipped(&self, path: &str) {
        self.status.set_message(format!("Skipping {}", path));
    }

    fn warning(&self, message: &str) {
        self.overall.println(format!("warning: {}", message));
    }

    fn finish_with_message(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.abandon_with_message(message.to_string());
    }

    fn is_finished(&self) -> bool {
        self.overall.is_finished()
    }
}
