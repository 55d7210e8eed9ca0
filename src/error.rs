//! Error types for the book2course library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Book2CourseError`] is **fatal**: the operation cannot proceed at all
//!   (bad input file, provider not configured, every retry of a required LLM
//!   stage failed, a catalog record is missing or belongs to someone else).
//!
//! * [`StageWarning`] is **non-fatal**: one pipeline stage returned something
//!   unusable and deterministic fallback content was substituted. Warnings are
//!   stored on [`crate::output::GeneratedCourse`] so callers can see which
//!   lessons or quizzes are placeholders without losing the whole course.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// All fatal errors returned by the book2course library.
#[derive(Debug, Error)]
pub enum Book2CourseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input is not a valid file path, URL or upload.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but are not a PDF.
    #[error("'{name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// Upload exceeds the configured size limit.
    #[error("File size must be less than {limit_mb}MB (got {size} bytes)")]
    FileTooLarge { size: usize, limit_mb: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password.
    #[error("PDF '{name}' is encrypted and cannot be read")]
    PasswordRequired { name: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Too little text was extracted to build a course from.
    #[error("Not enough text extracted from PDF ({chars} chars, need at least {min})")]
    InsufficientText { chars: usize, min: usize },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A required LLM stage failed on every attempt.
    #[error("LLM API error during {stage}: {message}")]
    LlmApiError { stage: String, message: String },

    /// A required LLM call timed out on every attempt.
    #[error("LLM call for {stage} timed out after {secs}s")]
    ApiTimeout { stage: String, secs: u64 },

    /// Processing was abandoned, usually because the book was deleted.
    #[error("Processing cancelled: {0}")]
    Cancelled(String),

    // ── Catalog errors ────────────────────────────────────────────────────
    #[error("Book not found: {0}")]
    BookNotFound(Uuid),

    #[error("Course not found: {0}")]
    CourseNotFound(Uuid),

    #[error("Lesson not found: {0}")]
    LessonNotFound(Uuid),

    /// The record exists but is owned by a different user.
    #[error("Access denied")]
    AccessDenied,

    /// The book is in a status that does not allow the requested operation.
    #[error("Book cannot be processed in current status: {status}")]
    InvalidStatus { status: String },

    /// The user's tier does not allow this upload.
    #[error("{reason}")]
    UploadNotAllowed { reason: String },

    /// The user does not have enough credits for this upload.
    #[error("Not enough credits: {required} needed, {available} available")]
    InsufficientCredits { required: u32, available: u32 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Blob store or catalog snapshot I/O failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Book2CourseError {
    /// Whether the error reports a missing record (maps to "404" in callers
    /// that expose the library over HTTP).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Book2CourseError::BookNotFound(_)
                | Book2CourseError::CourseNotFound(_)
                | Book2CourseError::LessonNotFound(_)
        )
    }
}

/// A non-fatal degradation in one pipeline stage.
///
/// The pipeline substitutes deterministic content and keeps going; the warning
/// records what was substituted so it can be surfaced or reprocessed later.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum StageWarning {
    /// A chunk summary reply was not JSON; the raw reply became the summary.
    #[error("Section {chunk}: summary reply was not JSON, raw text kept")]
    SummaryUnparsed { chunk: usize },

    /// Quality detection reply was not JSON; defaulted to ENHANCE.
    #[error("Quality detection reply was not JSON, defaulted to ENHANCE")]
    QualityUnparsed,

    /// Overview reply was not JSON; built from the collected topics.
    #[error("Book overview reply was not JSON, derived from section topics")]
    OverviewFallback,

    /// Structure reply was not JSON or had no lessons; one chapter per section.
    #[error("Course structure reply unusable ({detail}), using per-section chapters")]
    StructureFallback { detail: String },

    /// Lesson content could not be generated; template content used.
    #[error("Lesson '{lesson}': content generation failed ({detail}), template used")]
    LessonFallback { lesson: String, detail: String },

    /// Quiz had no valid questions after retries; single-question quiz used.
    #[error("Lesson '{lesson}': quiz generation failed ({detail}), fallback quiz used")]
    QuizFallback { lesson: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_text_display() {
        let e = Book2CourseError::InsufficientText { chars: 42, min: 100 };
        let msg = e.to_string();
        assert!(msg.contains("42"), "got: {msg}");
        assert!(msg.contains("100"), "got: {msg}");
    }

    #[test]
    fn invalid_status_display() {
        let e = Book2CourseError::InvalidStatus {
            status: "processing".into(),
        };
        assert_eq!(
            e.to_string(),
            "Book cannot be processed in current status: processing"
        );
    }

    #[test]
    fn upload_not_allowed_shows_reason_verbatim() {
        let e = Book2CourseError::UploadNotAllowed {
            reason: "Monthly notes limit reached (2/2). Upgrade for more.".into(),
        };
        assert_eq!(
            e.to_string(),
            "Monthly notes limit reached (2/2). Upgrade for more."
        );
    }

    #[test]
    fn not_found_classification() {
        assert!(Book2CourseError::BookNotFound(Uuid::nil()).is_not_found());
        assert!(Book2CourseError::LessonNotFound(Uuid::nil()).is_not_found());
        assert!(!Book2CourseError::AccessDenied.is_not_found());
    }

    #[test]
    fn warning_round_trips_through_json() {
        let w = StageWarning::QuizFallback {
            lesson: "Intro".into(),
            detail: "no valid questions".into(),
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: StageWarning = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
        assert!(w.to_string().contains("Intro"));
    }
}
