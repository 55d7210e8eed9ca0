//! Configuration types for course generation.
//!
//! All generation behaviour is controlled through [`CourseConfig`], built via
//! its [`CourseConfigBuilder`]. The same struct is shared by the one-shot
//! [`crate::generate`] entry points, the queue worker and the CLI; the worker
//! clones it per book and sets the book's processing [`Tier`].

use crate::error::Book2CourseError;
use crate::pipeline::llm::CompletionBackend;
use crate::progress::GenerationProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for turning extracted text into a course.
///
/// # Example
/// ```rust
/// use book2course::{CourseConfig, Tier};
///
/// let config = CourseConfig::builder()
///     .tier(Tier::Pro)
///     .concurrency(6)
///     .model("google/gemini-2.0-flash-001")
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 25_000);
/// ```
#[derive(Clone)]
pub struct CourseConfig {
    /// Target chunk length in characters. Default: 25 000.
    ///
    /// Each chunk is summarised by one LLM call, so this sets the cost of the
    /// analysis stage: a 400-page book (~1M chars) becomes ~40 calls.
    pub chunk_size: usize,

    /// Characters carried over from the end of one chunk into the next. Default: 300.
    pub chunk_overlap: usize,

    /// Maximum concurrent LLM calls for section summaries and lessons. Default: 4.
    pub concurrency: usize,

    /// LLM model identifier. If None, the provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "openrouter", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed completion backend. Takes precedence over everything.
    pub backend: Option<Arc<dyn CompletionBackend>>,

    /// Sampling temperature for generation stages. Default: 0.7.
    pub temperature: f32,

    /// Maximum output tokens for summaries, quality and overview. Default: 4096.
    pub max_tokens: usize,

    /// Maximum output tokens for the course structure reply. Default: 8192.
    pub structure_max_tokens: usize,

    /// Maximum output tokens for lesson content and quizzes. Default: 6144.
    pub lesson_max_tokens: usize,

    /// Temperature for TOC extraction, which is transcription not writing. Default: 0.2.
    pub toc_temperature: f32,

    /// Retries after the first failed attempt of an LLM call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 2000.
    pub retry_backoff_ms: u64,

    /// Per-LLM-call timeout in seconds. Default: 180.
    pub api_timeout_secs: u64,

    /// Subscription tier the course is generated for. Default: [`Tier::Free`].
    pub tier: Tier,

    /// Force a content mode for paid tiers instead of detecting it.
    pub mode_override: Option<QualityMode>,

    /// Restrict PDF generation to these chapter page ranges.
    pub chapters: Option<Vec<ChapterSelection>>,

    /// Minimum extracted characters required to build a course. Default: 100.
    pub min_text_chars: usize,

    /// Maximum accepted upload size in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives step messages and answers cancellation checks.
    pub progress_callback: Option<Arc<dyn GenerationProgressCallback>>,
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25_000,
            chunk_overlap: 300,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            temperature: 0.7,
            max_tokens: 4096,
            structure_max_tokens: 8192,
            lesson_max_tokens: 6144,
            toc_temperature: 0.2,
            max_retries: 2,
            retry_backoff_ms: 2000,
            api_timeout_secs: 180,
            tier: Tier::default(),
            mode_override: None,
            chapters: None,
            min_text_chars: 100,
            max_upload_bytes: 50 * 1024 * 1024,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for CourseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CourseConfig")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|_| "<dyn CompletionBackend>"))
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("tier", &self.tier)
            .field("mode_override", &self.mode_override)
            .field("chapters", &self.chapters)
            .finish()
    }
}

impl CourseConfig {
    /// Create a new builder for `CourseConfig`.
    pub fn builder() -> CourseConfigBuilder {
        CourseConfigBuilder {
            config: Self::default(),
        }
    }

    /// A copy of this config generating for `tier`.
    pub fn with_tier(&self, tier: Tier) -> Self {
        let mut c = self.clone();
        c.tier = tier;
        c
    }
}

/// Builder for [`CourseConfig`].
#[derive(Debug)]
pub struct CourseConfigBuilder {
    config: CourseConfig,
}

impl CourseConfigBuilder {
    pub fn chunk_size(mut self, chars: usize) -> Self {
        self.config.chunk_size = chars;
        self
    }

    pub fn chunk_overlap(mut self, chars: usize) -> Self {
        self.config.chunk_overlap = chars;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.config.tier = tier;
        self
    }

    pub fn mode_override(mut self, mode: QualityMode) -> Self {
        self.config.mode_override = Some(mode);
        self
    }

    pub fn chapters(mut self, chapters: Vec<ChapterSelection>) -> Self {
        self.config.chapters = Some(chapters);
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn GenerationProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CourseConfig, Book2CourseError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(Book2CourseError::InvalidConfig(
                "chunk_size must be ≥ 1".into(),
            ));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(Book2CourseError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.concurrency == 0 {
            return Err(Book2CourseError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Subscription level gating upload quotas, quiz depth and queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// PRESERVE mode only, 4-question quizzes, no lesson extras. (default)
    #[default]
    Free,
    /// Detected mode, 7-question quizzes with short answers, lesson extras.
    Basic,
    /// As Basic, with unlimited uploads and first place in the queue.
    Pro,
}

impl Tier {
    pub fn is_paid(self) -> bool {
        matches!(self, Tier::Basic | Tier::Pro)
    }

    /// Quiz depth generated for this tier.
    pub fn quiz_depth(self) -> QuizDepth {
        if self.is_paid() {
            QuizDepth::Full
        } else {
            QuizDepth::Basic
        }
    }

    /// Whether lessons keep common mistakes, actionable steps and checkpoints.
    pub fn includes_extras(self) -> bool {
        self.is_paid()
    }

    /// Queue priority; higher is processed first.
    pub fn priority(self) -> u8 {
        match self {
            Tier::Free => 0,
            Tier::Basic => 1,
            Tier::Pro => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Pro => "pro",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = Book2CourseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "pro" => Ok(Tier::Pro),
            other => Err(Book2CourseError::InvalidConfig(format!(
                "unknown tier '{other}' (expected free, basic or pro)"
            ))),
        }
    }
}

/// Lesson-writing strategy chosen from the source quality score.
///
/// | Mode | Source material | Lesson writer |
/// |------|-----------------|---------------|
/// | PRESERVE | specific, deep, actionable (avg ≥ 7) | stays faithful, adds nothing |
/// | ENHANCE  | vague or thin (avg < 7) | adds examples, mistakes, steps |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityMode {
    Preserve,
    Enhance,
}

impl QualityMode {
    /// Average score at or above which source material is preserved.
    pub const PRESERVE_THRESHOLD: f64 = 7.0;

    /// Mode implied by an average quality score.
    pub fn from_average(avg: f64) -> Self {
        if avg >= Self::PRESERVE_THRESHOLD {
            QualityMode::Preserve
        } else {
            QualityMode::Enhance
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityMode::Preserve => "PRESERVE",
            QualityMode::Enhance => "ENHANCE",
        }
    }
}

impl fmt::Display for QualityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many questions each lesson quiz gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizDepth {
    /// 4 MCQs: 2 recall, 2 understand.
    Basic,
    /// 7 MCQs (2 recall, 2 understand, 2 apply, 1 analyze) plus short answers.
    Full,
}

impl QuizDepth {
    /// Number of multiple-choice questions requested.
    pub fn question_count(self) -> usize {
        match self {
            QuizDepth::Basic => 4,
            QuizDepth::Full => 7,
        }
    }
}

/// What kind of document was uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    /// A full book: TOC extraction and chapter selection before processing.
    Book,
    /// Short notes: queued for processing immediately. (default)
    #[default]
    Notes,
}

impl UploadType {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadType::Book => "book",
            UploadType::Notes => "notes",
        }
    }

    /// Parse a form value, treating anything unrecognised as notes.
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("book") {
            UploadType::Book
        } else {
            UploadType::Notes
        }
    }
}

impl fmt::Display for UploadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chapter page range picked by the user (1-indexed, inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSelection {
    pub start_page: usize,
    pub end_page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ChapterSelection {
    pub fn new(start_page: usize, end_page: usize) -> Self {
        Self {
            start_page,
            end_page,
            title: None,
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Number of pages in the range (at least 1).
    pub fn page_count(&self) -> usize {
        self.end_page.saturating_sub(self.start_page) + 1
    }

    /// Expand into 0-indexed page numbers clamped to `total_pages`.
    ///
    /// Start and end are each clamped into the document and the end is never
    /// before the start, so every selection yields at least one page of a
    /// non-empty document.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        if total_pages == 0 {
            return Vec::new();
        }
        let last = total_pages - 1;
        let start = self.start_page.saturating_sub(1).min(last);
        let end = self.end_page.saturating_sub(1).min(last).max(start);
        (start..=end).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = CourseConfig::default();
        assert_eq!(c.chunk_size, 25_000);
        assert_eq!(c.chunk_overlap, 300);
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.tier, Tier::Free);
        assert_eq!(c.max_upload_bytes, 52_428_800);
    }

    #[test]
    fn builder_rejects_overlap_not_smaller_than_chunk() {
        let err = CourseConfig::builder()
            .chunk_size(100)
            .chunk_overlap(100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn builder_clamps_concurrency_and_temperature() {
        let c = CourseConfig::builder()
            .concurrency(0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn tier_gates() {
        assert_eq!(Tier::Free.quiz_depth(), QuizDepth::Basic);
        assert_eq!(Tier::Basic.quiz_depth(), QuizDepth::Full);
        assert!(!Tier::Free.includes_extras());
        assert!(Tier::Pro.includes_extras());
        assert!(Tier::Pro.priority() > Tier::Basic.priority());
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert!("gold".parse::<Tier>().is_err());
    }

    #[test]
    fn mode_threshold() {
        assert_eq!(QualityMode::from_average(7.0), QualityMode::Preserve);
        assert_eq!(QualityMode::from_average(6.99), QualityMode::Enhance);
        assert_eq!(
            serde_json::to_string(&QualityMode::Enhance).unwrap(),
            "\"ENHANCE\""
        );
    }

    #[test]
    fn upload_type_lenient_parse() {
        assert_eq!(UploadType::parse_lenient("Book"), UploadType::Book);
        assert_eq!(UploadType::parse_lenient("magazine"), UploadType::Notes);
    }

    #[test]
    fn chapter_selection_clamps() {
        assert_eq!(ChapterSelection::new(2, 4).to_indices(10), vec![1, 2, 3]);
        assert_eq!(ChapterSelection::new(8, 20).to_indices(10), vec![7, 8, 9]);
        assert_eq!(ChapterSelection::new(50, 60).to_indices(10), vec![9]);
        assert_eq!(ChapterSelection::new(5, 3).to_indices(10), vec![4]);
        assert_eq!(ChapterSelection::new(0, 1).to_indices(10), vec![0]);
        assert!(ChapterSelection::new(1, 3).to_indices(0).is_empty());
        assert_eq!(ChapterSelection::new(15, 44).page_count(), 30);
    }
}
