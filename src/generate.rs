//! Course generation entry points and the stage orchestrator.
//!
//! [`generate_course`] takes already-extracted text. The `generate_from_*`
//! functions add PDF loading, title inference and chapter selection on top.
//! All of them return `Err` only for fatal problems (unreadable input, no
//! provider, a required LLM stage failing every retry, cancellation); stages
//! that fell back to template content are listed in
//! [`GeneratedCourse::warnings`].

use crate::config::{CourseConfig, QualityMode};
use crate::error::Book2CourseError;
use crate::output::{
    DocumentInfo, GeneratedChapter, GeneratedCourse, GeneratedLesson, GenerationStats,
};
use crate::pipeline::analyze::{detect_quality, generate_overview, summarize_all};
use crate::pipeline::chunk::chunk_text;
use crate::pipeline::input::{self, LoadedPdf};
use crate::pipeline::json::truncate_chars;
use crate::pipeline::lesson::generate_lesson;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::pdf::{estimate_reading_time, DocumentReader, PdfiumReader};
use crate::pipeline::quiz::generate_quiz;
use crate::pipeline::structure::{generate_structure, source_text};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Reading speed used for reading-time estimates.
const WORDS_PER_MINUTE: usize = 200;

/// Generate a course from extracted text.
///
/// `title` overrides the title the model infers for the book.
///
/// # Example
/// ```rust,no_run
/// use book2course::{generate_course, CourseConfig, Tier};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let text = std::fs::read_to_string("book.txt")?;
/// let config = CourseConfig::builder().tier(Tier::Basic).build()?;
/// let course = generate_course(&text, Some("My Book"), &config).await?;
/// println!("{} lessons", course.lesson_count());
/// # Ok(())
/// # }
/// ```
pub async fn generate_course(
    text: &str,
    title: Option<&str>,
    config: &CourseConfig,
) -> Result<GeneratedCourse, Book2CourseError> {
    check_text(text, config)?;
    let llm = LlmClient::from_config(config).await?;
    run_pipeline(&llm, text, title, config).await
}

/// Generate a course from a PDF file path or HTTP/HTTPS URL.
pub async fn generate_from_pdf(
    input_str: impl AsRef<str>,
    config: &CourseConfig,
) -> Result<GeneratedCourse, Book2CourseError> {
    let input_str = input_str.as_ref();
    info!("Starting course generation: {}", input_str);
    let loaded = input::load_input(input_str, config.download_timeout_secs).await?;
    generate_from_loaded(&PdfiumReader, loaded, config).await
}

/// Generate a course from PDF bytes already in memory.
pub async fn generate_from_bytes(
    bytes: &[u8],
    config: &CourseConfig,
) -> Result<GeneratedCourse, Book2CourseError> {
    let loaded = LoadedPdf {
        name: "upload.pdf".to_string(),
        bytes: bytes.to_vec(),
    };
    input::check_magic(&loaded.name, &loaded.bytes)?;
    generate_from_loaded(&PdfiumReader, loaded, config).await
}

/// Generate from a loaded PDF with an explicit [`DocumentReader`].
///
/// The title is inferred from the document, falling back to the file name.
/// When `config.chapters` is set only those page ranges are used.
pub async fn generate_from_loaded(
    reader: &dyn DocumentReader,
    loaded: LoadedPdf,
    config: &CourseConfig,
) -> Result<GeneratedCourse, Book2CourseError> {
    let stem = loaded.stem();
    let doc = reader.read(&loaded.name, loaded.bytes).await?;
    let title = doc.infer_title(stem.as_deref());
    let text = match config.chapters {
        Some(ref selections) => {
            debug!("Restricting to {} selected chapters", selections.len());
            doc.text_for_chapters(selections)
        }
        None => doc.full_text(),
    };
    info!(
        "'{}': {} pages, {} chars of text",
        title,
        doc.page_count(),
        text.chars().count()
    );
    generate_course(&text, Some(&title), config).await
}

/// Generate a course and write it to `output_path` as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn generate_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &CourseConfig,
) -> Result<GenerationStats, Book2CourseError> {
    let course = generate_from_pdf(input_str, config).await?;
    write_course(&course, output_path.as_ref()).await?;
    Ok(course.stats)
}

/// Serialise `course` to `path` atomically.
pub async fn write_course(course: &GeneratedCourse, path: &Path) -> Result<(), Book2CourseError> {
    let write_err = |e: std::io::Error| Book2CourseError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let json = serde_json::to_vec_pretty(course)
        .map_err(|e| Book2CourseError::Internal(format!("serialise course: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`generate_from_pdf`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_sync(
    input_str: impl AsRef<str>,
    config: &CourseConfig,
) -> Result<GeneratedCourse, Book2CourseError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Book2CourseError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate_from_pdf(input_str, config))
}

/// Describe a PDF without generating anything.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentInfo, Book2CourseError> {
    let loaded = input::load_input(input_str.as_ref(), 120).await?;
    inspect_loaded(&PdfiumReader, loaded).await
}

/// [`inspect`] with an explicit reader.
pub async fn inspect_loaded(
    reader: &dyn DocumentReader,
    loaded: LoadedPdf,
) -> Result<DocumentInfo, Book2CourseError> {
    let stem = loaded.stem();
    let doc = reader.read(&loaded.name, loaded.bytes).await?;
    let text = doc.full_text();
    Ok(DocumentInfo {
        title: doc.infer_title(stem.as_deref()),
        has_text: doc.has_text(),
        word_count: text.split_whitespace().count(),
        reading_time_minutes: estimate_reading_time(&text, WORDS_PER_MINUTE),
        metadata: doc.metadata,
        outline: doc.outline,
    })
}

// ── Orchestration ────────────────────────────────────────────────────────

fn check_text(text: &str, config: &CourseConfig) -> Result<(), Book2CourseError> {
    let chars = text.trim().chars().count();
    if chars < config.min_text_chars {
        return Err(Book2CourseError::InsufficientText {
            chars,
            min: config.min_text_chars,
        });
    }
    Ok(())
}

fn report(config: &CourseConfig, step: &str) {
    info!("{}", step);
    if let Some(ref cb) = config.progress_callback {
        cb.on_step(step);
    }
}

fn check_cancelled(config: &CourseConfig, stage: &str) -> Result<(), Book2CourseError> {
    match config.progress_callback {
        Some(ref cb) if cb.is_cancelled() => {
            Err(Book2CourseError::Cancelled(format!("stopped before {stage}")))
        }
        _ => Ok(()),
    }
}

/// Run every stage with an existing client. Exposed for callers that share a
/// client (and its usage counters) across runs.
pub async fn run_pipeline(
    llm: &LlmClient,
    text: &str,
    title: Option<&str>,
    config: &CourseConfig,
) -> Result<GeneratedCourse, Book2CourseError> {
    let total_start = Instant::now();
    check_text(text, config)?;
    let tier = config.tier;
    let mut warnings = Vec::new();

    // ── Step 1: Chunk ────────────────────────────────────────────────────
    report(config, "Splitting book into sections...");
    let chunks = chunk_text(text, config.chunk_size, config.chunk_overlap);
    report(config, &format!("Split into {} sections", chunks.len()));

    // ── Step 2: Summaries ────────────────────────────────────────────────
    check_cancelled(config, "section analysis")?;
    let analysis_start = Instant::now();
    let summaries: Vec<_> = summarize_all(llm, config, &chunks)
        .await?
        .into_iter()
        .map(|s| s.collect_into(&mut warnings))
        .collect();

    // ── Step 3: Quality and mode ─────────────────────────────────────────
    check_cancelled(config, "quality detection")?;
    report(config, "Evaluating content quality...");
    let mut quality = detect_quality(llm, config, &summaries)
        .await?
        .collect_into(&mut warnings);
    if !tier.is_paid() {
        quality.mode = QualityMode::Preserve;
        quality.reasoning = "Free tier uses PRESERVE mode".to_string();
    } else if let Some(mode) = config.mode_override {
        quality.mode = mode;
    }
    let mode = quality.mode;
    report(
        config,
        &format!("Quality: {} mode (score: {:.1}/10)", mode, quality.average_score),
    );

    // ── Step 4: Overview ─────────────────────────────────────────────────
    check_cancelled(config, "book overview")?;
    report(config, "Generating book overview...");
    let mut overview = generate_overview(llm, config, &summaries)
        .await?
        .collect_into(&mut warnings);
    if let Some(t) = title.map(str::trim).filter(|t| !t.is_empty()) {
        overview.title = t.to_string();
    }

    // ── Step 5: Structure ────────────────────────────────────────────────
    check_cancelled(config, "course structure")?;
    report(config, "Designing course structure...");
    let structure = generate_structure(llm, config, &overview, &summaries)
        .await?
        .collect_into(&mut warnings);
    let total_lessons = structure.lesson_count();
    report(
        config,
        &format!(
            "Created {} chapters with {} lessons",
            structure.chapters.len(),
            total_lessons
        ),
    );
    let analysis_duration_ms = analysis_start.elapsed().as_millis() as u64;

    // ── Step 6: Lessons and quizzes ──────────────────────────────────────
    let lesson_start = Instant::now();
    let depth = tier.quiz_depth();
    let keep_extras = tier.includes_extras();
    let chunks = &chunks;

    let jobs = structure
        .chapters
        .iter()
        .enumerate()
        .flat_map(|(ci, ch)| ch.lessons.iter().map(move |l| (ci, l)))
        .enumerate()
        .map(|(k, (ci, outline))| async move {
            let num = k + 1;
            check_cancelled(config, "lesson generation")?;
            report(
                config,
                &format!(
                    "Generating lesson {}/{}: {}...",
                    num,
                    total_lessons,
                    truncate_chars(&outline.title, 40)
                ),
            );
            let source = source_text(chunks, &outline.source_chunk_indices);
            let mut lesson_warnings = Vec::new();
            let mut content = generate_lesson(
                llm,
                config,
                mode,
                &outline.title,
                &outline.topics_to_cover,
                &source,
            )
            .await?
            .collect_into(&mut lesson_warnings);
            if !keep_extras {
                content.strip_extras();
            }

            report(
                config,
                &format!("Creating quiz for lesson {}/{}...", num, total_lessons),
            );
            let quiz = generate_quiz(llm, config, depth, &outline.title, &content, &source)
                .await
                .collect_into(&mut lesson_warnings);

            if let Some(ref cb) = config.progress_callback {
                cb.on_lesson_complete(num, total_lessons, &outline.title);
            }
            Ok::<_, Book2CourseError>((
                k,
                ci,
                GeneratedLesson {
                    title: outline.title.clone(),
                    topics_to_cover: outline.topics_to_cover.clone(),
                    source_chunk_indices: outline.source_chunk_indices.clone(),
                    content,
                    quiz,
                },
                lesson_warnings,
            ))
        })
        .collect::<Vec<_>>();

    let mut done: Vec<_> = stream::iter(jobs)
        .buffer_unordered(config.concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    done.sort_by_key(|(k, ..)| *k);

    let mut chapters: Vec<GeneratedChapter> = structure
        .chapters
        .iter()
        .map(|c| GeneratedChapter {
            title: c.title.clone(),
            description: c.description.clone(),
            lessons: Vec::with_capacity(c.lessons.len()),
        })
        .collect();
    for (_, ci, lesson, lesson_warnings) in done {
        warnings.extend(lesson_warnings);
        chapters[ci].lessons.push(lesson);
    }
    let lesson_duration_ms = lesson_start.elapsed().as_millis() as u64;

    report(config, "Finalizing course...");
    let usage = llm.usage();
    let stats = GenerationStats {
        source_chars: text.chars().count(),
        chunks: chunks.len(),
        chapters: chapters.len(),
        lessons: total_lessons,
        llm_calls: usage.calls,
        total_input_tokens: usage.input_tokens,
        total_output_tokens: usage.output_tokens,
        fallbacks: warnings.len(),
        analysis_duration_ms,
        lesson_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Course complete: {} chapters, {} lessons, {} LLM calls, {} fallbacks, {}ms",
        stats.chapters, stats.lessons, stats.llm_calls, stats.fallbacks, stats.total_duration_ms
    );

    Ok(GeneratedCourse {
        overview,
        quality,
        tier,
        chapters,
        warnings,
        stats,
    })
}
