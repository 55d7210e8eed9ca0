//! Pipeline stages for book-to-course generation.
//!
//! Each submodule implements one step and is testable on its own: the text
//! stages take a [`llm::LlmClient`] (any [`llm::CompletionBackend`]) and the
//! extraction stage sits behind [`pdf::DocumentReader`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ pdf ──▶ chunk ──▶ analyze ──▶ structure ──▶ lesson ──▶ quiz
//! (bytes)  (text)  (slices)  (summaries,  (chapters,    (content)  (MCQs)
//!                             quality,     lessons)
//!                             overview)
//! ```
//!
//! 1. [`input`]     fetch the path or URL and check it really is a PDF
//! 2. [`pdf`]       page text, metadata and outline via pdfium
//! 3. [`chunk`]     paragraph-aligned, overlapping slices of the text
//! 4. [`analyze`]   per-chunk summaries, source quality, book overview
//! 5. [`structure`] chapters and lessons mapped back to chunks
//! 6. [`lesson`]    PRESERVE or ENHANCE lesson content
//! 7. [`quiz`]      tiered multiple-choice and short-answer questions
//!
//! [`llm`] carries the retry policy and [`json`] the reply repair shared by
//! every LLM stage.

use crate::error::StageWarning;

pub mod analyze;
pub mod chunk;
pub mod input;
pub mod json;
pub mod lesson;
pub mod llm;
pub mod pdf;
pub mod quiz;
pub mod structure;

/// A stage result that may have fallen back to template content.
#[derive(Debug, Clone, PartialEq)]
pub struct Staged<T> {
    pub value: T,
    pub warning: Option<StageWarning>,
}

impl<T> Staged<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    pub fn degraded(value: T, warning: StageWarning) -> Self {
        Self {
            value,
            warning: Some(warning),
        }
    }

    /// Move any warning into `sink` and return the value.
    pub fn collect_into(self, sink: &mut Vec<StageWarning>) -> T {
        if let Some(w) = self.warning {
            sink.push(w);
        }
        self.value
    }
}
