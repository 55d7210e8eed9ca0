//! Output types: everything the generation pipeline produces.
//!
//! The wire names (`keyPoints`, `correctAnswer`, `sampleAnswer`, the `type`
//! tag on quiz items) match the JSON the LLM is asked to emit, so a course
//! serialised with `serde_json` has the same shape as the model replies it was
//! built from. Item types that models return either as plain strings or as
//! objects (`examples`, `keyPoints`) accept both.

use crate::config::{QualityMode, Tier};
use crate::error::StageWarning;
use serde::{Deserialize, Serialize};

// ── Analysis stage ───────────────────────────────────────────────────────

/// What one chunk of the book is about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// Source-material quality scores and the content mode they imply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub specificity_score: u8,
    pub technical_depth_score: u8,
    pub actionability_score: u8,
    pub average_score: f64,
    pub mode: QualityMode,
    pub reasoning: String,
}

impl QualityReport {
    /// Build a report from raw scores, clamping each to 1..=10 and deriving
    /// the average and mode from them.
    pub fn from_scores(
        specificity: i64,
        depth: i64,
        actionability: i64,
        reasoning: String,
    ) -> Self {
        let clamp = |v: i64| v.clamp(1, 10) as u8;
        let (s, d, a) = (clamp(specificity), clamp(depth), clamp(actionability));
        let average = (s as f64 + d as f64 + a as f64) / 3.0;
        let average = (average * 100.0).round() / 100.0;
        Self {
            specificity_score: s,
            technical_depth_score: d,
            actionability_score: a,
            average_score: average,
            mode: QualityMode::from_average(average),
            reasoning,
        }
    }

    /// Neutral scores used when the model reply cannot be read.
    pub fn unparsed() -> Self {
        Self {
            specificity_score: 5,
            technical_depth_score: 5,
            actionability_score: 5,
            average_score: 5.0,
            mode: QualityMode::Enhance,
            reasoning: "Could not parse quality detection response".to_string(),
        }
    }
}

/// Whole-book view distilled from the chunk summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookOverview {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub main_themes: Vec<String>,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
}

// ── Structure stage ──────────────────────────────────────────────────────

/// Chapter/lesson outline before any lesson content exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseStructure {
    pub chapters: Vec<ChapterOutline>,
}

impl CourseStructure {
    pub fn lesson_count(&self) -> usize {
        self.chapters.iter().map(|c| c.lessons.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterOutline {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub lessons: Vec<LessonOutline>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonOutline {
    pub title: String,
    #[serde(default)]
    pub topics_to_cover: Vec<String>,
    /// Indices into the chunk list that this lesson is written from.
    #[serde(default)]
    pub source_chunk_indices: Vec<usize>,
}

// ── Lesson stage ─────────────────────────────────────────────────────────

/// The written body of a lesson.
///
/// The optional fields are only produced for paid tiers; `common_mistakes`
/// and `actionable_steps` only in ENHANCE mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonContent {
    #[serde(default)]
    pub introduction: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub examples: Vec<Example>,
    #[serde(rename = "keyPoints", default)]
    pub key_points: Vec<KeyPoint>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_concepts: Option<Vec<KeyConcept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_mistakes: Option<Vec<CommonMistake>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actionable_steps: Option<Vec<ActionableStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_you_move_on: Option<Vec<String>>,
}

impl LessonContent {
    /// Drop the paid-tier sections.
    pub fn strip_extras(&mut self) {
        self.common_mistakes = None;
        self.actionable_steps = None;
        self.before_you_move_on = None;
    }
}

/// A worked example. Accepts a bare string or `{title, content}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "TitledText")]
pub struct Example {
    pub title: String,
    pub content: String,
}

/// A takeaway. Accepts a bare string or `{title, description}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "TitledText")]
pub struct KeyPoint {
    pub title: String,
    pub description: String,
}

impl KeyPoint {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty() && self.description.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TitledText {
    Text(String),
    Object {
        #[serde(default)]
        title: String,
        #[serde(default, alias = "content", alias = "description")]
        body: String,
    },
    Other(serde_json::Value),
}

impl TitledText {
    fn into_parts(self) -> (String, String) {
        match self {
            TitledText::Text(s) => (s, String::new()),
            TitledText::Object { title, body } => (title, body),
            TitledText::Other(v) => (v.to_string(), String::new()),
        }
    }
}

impl From<TitledText> for Example {
    fn from(w: TitledText) -> Self {
        let (title, content) = w.into_parts();
        Self { title, content }
    }
}

impl From<TitledText> for KeyPoint {
    fn from(w: TitledText) -> Self {
        let (title, description) = w.into_parts();
        Self { title, description }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyConcept {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub definition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonMistake {
    #[serde(default)]
    pub mistake: String,
    #[serde(default)]
    pub correction: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionableStep {
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub details: String,
}

// ── Quiz stage ───────────────────────────────────────────────────────────

/// One quiz item, tagged by `"type"` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QuizItem {
    #[serde(rename = "mcq")]
    Mcq(McqQuestion),
    #[serde(rename = "short_answer")]
    ShortAnswer(ShortAnswerQuestion),
}

impl QuizItem {
    pub fn id(&self) -> &str {
        match self {
            QuizItem::Mcq(q) => &q.id,
            QuizItem::ShortAnswer(q) => &q.id,
        }
    }

    pub fn as_mcq(&self) -> Option<&McqQuestion> {
        match self {
            QuizItem::Mcq(q) => Some(q),
            QuizItem::ShortAnswer(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    /// 0-indexed into `options`.
    #[serde(rename = "correctAnswer")]
    pub correct_answer: usize,
    /// 1 (recall) to 4 (analyze).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_type: Option<CognitiveLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortAnswerQuestion {
    pub id: String,
    pub question: String,
    #[serde(rename = "sampleAnswer", default)]
    pub sample_answer: String,
}

/// Bloom-style level of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CognitiveLevel {
    Recall,
    Understand,
    Apply,
    Analyze,
}

impl CognitiveLevel {
    pub fn difficulty(self) -> u8 {
        match self {
            CognitiveLevel::Recall => 1,
            CognitiveLevel::Understand => 2,
            CognitiveLevel::Apply => 3,
            CognitiveLevel::Analyze => 4,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recall" => Some(CognitiveLevel::Recall),
            "understand" => Some(CognitiveLevel::Understand),
            "apply" => Some(CognitiveLevel::Apply),
            "analyze" | "analyse" => Some(CognitiveLevel::Analyze),
            _ => None,
        }
    }
}

// ── Assembled course ─────────────────────────────────────────────────────

/// A lesson with its content and quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedLesson {
    pub title: String,
    pub topics_to_cover: Vec<String>,
    pub source_chunk_indices: Vec<usize>,
    pub content: LessonContent,
    pub quiz: Vec<QuizItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedChapter {
    pub title: String,
    pub description: String,
    pub lessons: Vec<GeneratedLesson>,
}

/// The full result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCourse {
    pub overview: BookOverview,
    pub quality: QualityReport,
    /// Tier the course was generated for.
    pub tier: Tier,
    pub chapters: Vec<GeneratedChapter>,
    /// Stages that fell back to template content.
    pub warnings: Vec<StageWarning>,
    pub stats: GenerationStats,
}

impl GeneratedCourse {
    pub fn lesson_count(&self) -> usize {
        self.chapters.iter().map(|c| c.lessons.len()).sum()
    }

    /// The chapter/lesson outline without content.
    pub fn outline(&self) -> CourseStructure {
        CourseStructure {
            chapters: self
                .chapters
                .iter()
                .map(|c| ChapterOutline {
                    title: c.title.clone(),
                    description: c.description.clone(),
                    lessons: c
                        .lessons
                        .iter()
                        .map(|l| LessonOutline {
                            title: l.title.clone(),
                            topics_to_cover: l.topics_to_cover.clone(),
                            source_chunk_indices: l.source_chunk_indices.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Course description shown in listings.
    pub fn description(&self, source_title: &str) -> String {
        let themes: Vec<&str> = self
            .overview
            .main_themes
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        format!(
            "A course generated from {}. Main themes: {}",
            source_title,
            themes.join(", ")
        )
    }
}

/// Aggregate statistics for a generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Characters of source text fed into the pipeline.
    pub source_chars: usize,
    pub chunks: usize,
    pub chapters: usize,
    pub lessons: usize,
    pub llm_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Number of stages that used template content.
    pub fallbacks: usize,
    pub analysis_duration_ms: u64,
    pub lesson_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Document-level metadata extracted from a PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// What [`crate::inspect`] reports about a PDF without calling any LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Inferred human title.
    pub title: String,
    pub metadata: DocumentMetadata,
    pub has_text: bool,
    pub word_count: usize,
    pub reading_time_minutes: usize,
    pub outline: Vec<crate::pipeline::pdf::OutlineEntry>,
}
