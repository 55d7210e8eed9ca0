//! # book2course
//!
//! Turn PDF books and notes into structured online courses with an LLM.
//!
//! ## Why this crate?
//!
//! A textbook already has the material for a course, but not the shape of
//! one. This crate reads the PDF, asks a model to split it into chapters and
//! bite-sized lessons, writes each lesson either faithfully (good sources)
//! or with extra explanation (weak sources), and adds a quiz per lesson.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      local file, URL or uploaded bytes; magic and size checks
//!  ├─ 2. Extract    page text, metadata and outline via pdfium
//!  ├─ 3. Chunk      paragraph-aligned 25K-char slices with overlap
//!  ├─ 4. Analyze    chunk summaries, source quality score, book overview
//!  ├─ 5. Structure  chapters and lessons mapped back to chunks
//!  ├─ 6. Lessons    PRESERVE or ENHANCE content, concurrent per chapter
//!  ├─ 7. Quizzes    MCQs (plus short answers on paid tiers)
//!  └─ 8. Output     GeneratedCourse with quality report and warnings
//! ```
//!
//! On top of the pipeline, [`library::Library`] keeps uploaded books in a
//! [`catalog::Catalog`], processes them one at a time with a
//! [`worker::QueueWorker`], and tracks quiz scores and lesson completion.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use book2course::{generate_from_pdf, CourseConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = CourseConfig::default();
//!     let course = generate_from_pdf("textbook.pdf", &config).await?;
//!     for chapter in &course.chapters {
//!         println!("{} ({} lessons)", chapter.title, chapter.lessons.len());
//!     }
//!     eprintln!("quality: {:.1} -> {}", course.quality.average_score, course.quality.mode);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `book2course` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! book2course = { version = "0.1", default-features = false }
//! ```
//!
//! ## Tiers
//!
//! | Tier | Lesson mode | Quiz | Lesson extras | Queue priority |
//! |------|-------------|------|---------------|----------------|
//! | `free`  | PRESERVE only | 4 MCQs | no  | lowest  |
//! | `basic` | detected | 7 MCQs + short answers | yes | middle |
//! | `pro`   | detected | 7 MCQs + short answers | yes | highest |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod billing;
pub mod catalog;
pub mod config;
pub mod error;
pub mod generate;
pub mod grading;
pub mod library;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod toc;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use billing::{BillingModel, TierLimits, UsageReport};
pub use catalog::{BlobStore, Book, BookStatus, Catalog};
pub use config::{
    ChapterSelection, CourseConfig, CourseConfigBuilder, QualityMode, QuizDepth, Tier, UploadType,
};
pub use error::{Book2CourseError, StageWarning};
pub use generate::{
    generate_course, generate_from_bytes, generate_from_pdf, generate_sync, generate_to_file,
    inspect, write_course,
};
pub use grading::{grade_quiz, CourseProgress, QuizResult};
pub use library::{Library, LibraryBuilder};
pub use output::{
    DocumentInfo, DocumentMetadata, GeneratedChapter, GeneratedCourse, GeneratedLesson,
    GenerationStats, LessonContent, QualityReport, QuizItem,
};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use toc::{extract_toc, TocChapter, TocMethod, TocResult};
pub use worker::QueueWorker;
