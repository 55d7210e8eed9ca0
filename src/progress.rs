//! Progress-callback trait for course generation events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::CourseConfigBuilder::progress_callback`] to receive the
//! human-readable step messages the pipeline emits ("Analyzing section 3 of
//! 12...", "Generating lesson 4/18: ...") and to cancel a run in flight.
//!
//! The queue worker uses this to write the current step onto the book record
//! and to stop processing a book that was deleted mid-run; the CLI uses it to
//! drive a spinner.
//!
//! # Example
//!
//! ```rust
//! use book2course::{CourseConfig, GenerationProgressCallback};
//! use std::sync::{Arc, Mutex};
//!
//! struct StepLog(Mutex<Vec<String>>);
//!
//! impl GenerationProgressCallback for StepLog {
//!     fn on_step(&self, step: &str) {
//!         self.0.lock().unwrap().push(step.to_string());
//!     }
//! }
//!
//! let log = Arc::new(StepLog(Mutex::new(Vec::new())));
//! let config = CourseConfig::builder()
//!     .progress_callback(log as Arc<dyn GenerationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the generation pipeline as it moves through its stages.
///
/// Implementations must be `Send + Sync`: section summaries and lessons are
/// generated concurrently, so `on_section_complete` and `on_lesson_complete`
/// may be called from several tasks at once. All methods have no-op defaults.
pub trait GenerationProgressCallback: Send + Sync {
    /// A new step started. `step` is a short, user-facing message.
    fn on_step(&self, step: &str) {
        let _ = step;
    }

    /// A section summary finished.
    fn on_section_complete(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// A lesson (content and quiz) finished.
    fn on_lesson_complete(&self, lesson_num: usize, total: usize, title: &str) {
        let _ = (lesson_num, total, title);
    }

    /// Polled between stages and before each lesson; return `true` to stop.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CourseConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;
