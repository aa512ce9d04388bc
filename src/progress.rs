// src/progress.rs

//! Progress reporting for install and uninstall runs
//!
//! Engines report through the `ProgressTracker` trait so the same run can
//! drive a terminal progress bar, log lines, a GUI callback or nothing.
//!
//! Position and length are measured in bytes of the declared uncompressed
//! record stream during install, and in log entries during uninstall.
//!
//! Implementations:
//! - `SilentProgress`: No-op for scripted/quiet modes and tests
//! - `LogProgress`: Logs progress to tracing
//! - `CallbackProgress`: Forwards `ProgressEvent`s to a closure
//!
//! The CLI adds an indicatif-backed tracker in `commands::progress`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{info, warn};

/// Core trait for progress tracking
///
/// Implementations must be `Send + Sync` so a tracker can be shared with a
/// thread that cancels the run.
pub trait ProgressTracker: Send + Sync {
    /// The engine entered a new phase
    fn set_phase(&self, phase: &str);

    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Set the total (length) of the progress
    fn set_length(&self, length: u64);

    /// Set progress to a specific position
    fn set_position(&self, position: u64);

    /// Get current position
    fn position(&self) -> u64;

    /// Get total length
    fn length(&self) -> u64;

    /// A node was left out because its components are not selected
    fn skipped(&self, _path: &str) {}

    /// A non-fatal problem
    fn warning(&self, _message: &str) {}

    /// Finish progress successfully with a message
    fn finish_with_message(&self, message: &str);

    /// Finish progress with an error/abandonment message
    fn finish_with_error(&self, message: &str);

    /// Check if progress is finished
    fn is_finished(&self) -> bool;
}

#[derive(Debug, Default)]
struct Counters {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl Counters {
    fn with_length(length: u64) -> Self {
        Self {
            length: AtomicU64::new(length),
            ..Default::default()
        }
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    /// Store a new position, returning the previous one
    fn swap_position(&self, position: u64) -> u64 {
        self.position.swap(position, Ordering::Relaxed)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Silent progress tracker (no-op)
#[derive(Debug, Default)]
pub struct SilentProgress {
    counters: Counters,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_phase(&self, _phase: &str) {}

    fn set_message(&self, _message: &str) {}

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn set_position(&self, position: u64) {
        self.counters.swap_position(position);
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn finish_with_message(&self, _message: &str) {
        self.counters.finish();
    }

    fn finish_with_error(&self, _message: &str) {
        self.counters.finish();
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}

/// Logging progress tracker
///
/// Logs phases at info level and the position roughly every tenth of the
/// length, to keep logs readable for large packages.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    counters: Counters,
    /// Number of steps the length is divided into
    steps: u64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: Counters::default(),
            steps: 10,
        }
    }

    /// Set how many times progress is logged over the full length
    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps.max(1);
        self
    }
}

impl ProgressTracker for LogProgress {
    fn set_phase(&self, phase: &str) {
        info!("{}: {}", self.name, phase);
    }

    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn set_position(&self, position: u64) {
        let old = self.counters.swap_position(position);
        let length = self.counters.length();
        if length == 0 {
            return;
        }

        let interval = (length / self.steps).max(1);
        if position / interval > old / interval {
            let percent = position.min(length) * 100 / length;
            info!("{}: {}% ({}/{})", self.name, percent, position, length);
        }
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn skipped(&self, path: &str) {
        info!("{}: skipped {}", self.name, path);
    }

    fn warning(&self, message: &str) {
        warn!("{}: {}", self.name, message);
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finish();
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finish();
        warn!("{}: ERROR - {}", self.name, message);
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}

/// Events emitted by [`CallbackProgress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Engine phase changed
    Phase(String),
    /// Message updated
    Message(String),
    /// Position changed
    Position { current: u64, total: u64 },
    /// Node skipped by component selection
    Skipped(String),
    /// Non-fatal problem
    Warning(String),
    /// Progress finished successfully
    Finished(String),
    /// Progress finished with error
    Error(String),
}

/// Callback-based progress tracker
///
/// Calls a user-provided function on every update. This is the hook for an
/// install GUI, and the tests use it to inject failures mid-run.
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    counters: Counters,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            counters: Counters::default(),
        }
    }

    pub fn with_length(length: u64, callback: F) -> Self {
        Self {
            callback,
            counters: Counters::with_length(length),
        }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn set_phase(&self, phase: &str) {
        (self.callback)(ProgressEvent::Phase(phase.to_string()));
    }

    fn set_message(&self, message: &str) {
        (self.callback)(ProgressEvent::Message(message.to_string()));
    }

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn set_position(&self, position: u64) {
        self.counters.swap_position(position);
        (self.callback)(ProgressEvent::Position {
            current: position,
            total: self.counters.length(),
        });
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn skipped(&self, path: &str) {
        (self.callback)(ProgressEvent::Skipped(path.to_string()));
    }

    fn warning(&self, message: &str) {
        (self.callback)(ProgressEvent::Warning(message.to_string()));
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finish();
        (self.callback)(ProgressEvent::Finished(message.to_string()));
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finish();
        (self.callback)(ProgressEvent::Error(message.to_string()));
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_silent_progress() {
        let progress = SilentProgress::new();
        progress.set_length(100);
        progress.set_phase("Installing");
        progress.set_position(10);
        assert_eq!(progress.position(), 10);
        assert_eq!(progress.length(), 100);

        assert!(!progress.is_finished());
        progress.finish_with_message("done");
        assert!(progress.is_finished());
    }

    #[test]
    fn test_log_progress() {
        let progress = LogProgress::new("install").with_steps(4);
        progress.set_length(100);
        progress.set_position(25);
        progress.set_position(50);
        assert_eq!(progress.position(), 50);

        // Position past the end is clamped for the percentage only
        progress.set_position(120);
        assert_eq!(progress.position(), 120);

        progress.finish_with_error("failed");
        assert!(progress.is_finished());
    }

    #[test]
    fn test_callback_progress() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();

        let progress = CallbackProgress::with_length(100, move |event| {
            events_clone.lock().unwrap().push(event);
        });

        progress.set_phase("Installing");
        progress.set_position(50);
        progress.skipped("docs/manual.txt");
        progress.finish_with_message("done");

        let captured = events.lock().unwrap();
        assert_eq!(
            *captured,
            vec![
                ProgressEvent::Phase("Installing".into()),
                ProgressEvent::Position {
                    current: 50,
                    total: 100
                },
                ProgressEvent::Skipped("docs/manual.txt".into()),
                ProgressEvent::Finished("done".into()),
            ]
        );
    }
}
