//! CLI binary for book2course.
//!
//! A thin shim over the library crate: maps flags to `CourseConfig`, runs
//! one-shot generation, TOC extraction and inspection, and drives a local
//! `Library` data directory.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use book2course::library::Library;
use book2course::pipeline::input::load_input;
use book2course::pipeline::llm::LlmClient;
use book2course::pipeline::pdf::{DocumentReader, PdfiumReader};
use book2course::{
    extract_toc, generate_from_pdf, inspect, write_course, ChapterSelection, CourseConfig,
    GenerationProgressCallback, ProgressCallback, QualityMode, Tier, UploadType,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner showing the current pipeline step, with one log line per lesson.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style =
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_step(&self, step: &str) {
        self.bar.set_prefix("Generating");
        self.bar.set_message(step.to_string());
    }

    fn on_section_complete(&self, index: usize, total: usize) {
        self.bar.set_message(format!("Summarised section {}/{}", index + 1, total));
    }

    fn on_lesson_complete(&self, lesson_num: usize, total: usize, title: &str) {
        self.bar.println(format!(
            "  {} Lesson {:>3}/{:<3}  {}",
            green("✓"),
            lesson_num,
            total,
            dim(title)
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate a course as JSON on stdout
  book2course generate textbook.pdf

  # Only chapters on pages 12-40 and 41-77, Pro tier, to a file
  book2course generate --tier pro --chapters 12-40,41-77 textbook.pdf -o course.json

  # Force PRESERVE mode regardless of detected source quality
  book2course generate --mode preserve notes.pdf -o notes.json

  # List chapters found in the outline (or by the model)
  book2course toc textbook.pdf

  # Inspect a PDF (no API key needed)
  book2course inspect textbook.pdf

  # Local library: upload notes, process the queue, list courses
  book2course library --data-dir ./data upload --user alice --notes lecture.pdf
  book2course library --data-dir ./data drain
  book2course library --data-dir ./data courses --user alice

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
"#;

/// Turn PDF books and notes into structured courses with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "book2course",
    version,
    about = "Turn PDF books and notes into structured courses with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "BOOK2COURSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "BOOK2COURSE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a course from a PDF file or URL.
    Generate(GenerateArgs),
    /// Show the chapters of a PDF with their page ranges.
    Toc(TocArgs),
    /// Print PDF metadata and outline without calling any LLM.
    Inspect {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,
        /// Output JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Manage a local library of books and courses.
    Library(LibraryArgs),
}

/// Flags shared by every command that talks to a model.
#[derive(Args, Debug, Clone)]
struct LlmArgs {
    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Number of concurrent LLM calls.
    #[arg(short, long, env = "BOOK2COURSE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per LLM call.
    #[arg(long, env = "BOOK2COURSE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "BOOK2COURSE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "BOOK2COURSE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write course JSON to this file instead of stdout.
    #[arg(short, long, env = "BOOK2COURSE_OUTPUT")]
    output: Option<PathBuf>,

    /// Subscription tier: free, basic, pro.
    #[arg(long, env = "BOOK2COURSE_TIER", value_enum, default_value = "free")]
    tier: TierArg,

    /// Force a lesson mode instead of the detected one.
    #[arg(long, env = "BOOK2COURSE_MODE", value_enum)]
    mode: Option<ModeArg>,

    /// Chapter page ranges, e.g. 12-40,41-77 (1-based, inclusive).
    #[arg(long, env = "BOOK2COURSE_CHAPTERS")]
    chapters: Option<String>,

    #[command(flatten)]
    llm: LlmArgs,

    /// Disable progress spinner.
    #[arg(long, env = "BOOK2COURSE_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct TocArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Only use the PDF outline; never call the model.
    #[arg(long)]
    outline_only: bool,

    /// Output JSON instead of text.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args, Debug)]
struct LibraryArgs {
    /// Directory holding catalog.json and uploaded PDFs.
    #[arg(long, env = "BOOK2COURSE_DATA_DIR", default_value = "./book2course-data")]
    data_dir: PathBuf,

    #[command(flatten)]
    llm: LlmArgs,

    #[command(subcommand)]
    command: LibraryCommand,
}

#[derive(Subcommand, Debug)]
enum LibraryCommand {
    /// Upload a PDF as a book (needs chapter selection) or as notes (queued).
    Upload {
        #[arg(long, env = "BOOK2COURSE_USER")]
        user: String,
        /// Upload as notes instead of a book.
        #[arg(long)]
        notes: bool,
        file: PathBuf,
    },
    /// Queue an uploaded book, optionally restricted to chapter page ranges.
    Process {
        #[arg(long, env = "BOOK2COURSE_USER")]
        user: String,
        book_id: Uuid,
        /// Chapter page ranges, e.g. 12-40,41-77. Whole book when omitted.
        #[arg(long)]
        chapters: Option<String>,
    },
    /// Process every queued book, then exit.
    Drain,
    /// List a user's books and courses.
    Courses {
        #[arg(long, env = "BOOK2COURSE_USER")]
        user: String,
    },
    /// Re-read stored lessons and fix nested or empty fields.
    Repair,
    /// Catalog counts.
    Stats,
    /// Set a user's subscription tier.
    Subscribe {
        #[arg(long, env = "BOOK2COURSE_USER")]
        user: String,
        #[arg(value_enum)]
        tier: TierArg,
        /// Mark the subscription inactive.
        #[arg(long)]
        inactive: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TierArg {
    Free,
    Basic,
    Pro,
}

impl From<TierArg> for Tier {
    fn from(v: TierArg) -> Self {
        match v {
            TierArg::Free => Tier::Free,
            TierArg::Basic => Tier::Basic,
            TierArg::Pro => Tier::Pro,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Preserve,
    Enhance,
}

impl From<ModeArg> for QualityMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Preserve => QualityMode::Preserve,
            ModeArg::Enhance => QualityMode::Enhance,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback during generation, so library INFO logs
    // are only shown when it is off.
    let spinner = match cli.command {
        Command::Generate(ref args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    ensure_pdfium(cli.quiet)?;

    match cli.command {
        Command::Generate(args) => run_generate(args, spinner, cli.quiet).await,
        Command::Toc(args) => run_toc(args).await,
        Command::Inspect { input, json } => run_inspect(&input, json).await,
        Command::Library(args) => run_library(args).await,
    }
}

/// Download libpdfium on first run.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }
    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {bytes}/{total_bytes}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;
    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

/// Map shared LLM flags onto a config builder.
fn build_config(
    llm: &LlmArgs,
    tier: Tier,
    progress: Option<ProgressCallback>,
) -> Result<CourseConfig> {
    let mut builder = CourseConfig::builder()
        .tier(tier)
        .concurrency(llm.concurrency)
        .max_retries(llm.max_retries)
        .api_timeout_secs(llm.api_timeout)
        .download_timeout_secs(llm.download_timeout);
    if let Some(ref model) = llm.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = llm.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

async fn run_generate(args: GenerateArgs, spinner: bool, quiet: bool) -> Result<()> {
    let callback = spinner.then(CliProgressCallback::new);
    let mut config = build_config(
        &args.llm,
        args.tier.into(),
        callback
            .clone()
            .map(|cb| cb as Arc<dyn GenerationProgressCallback>),
    )?;
    config.mode_override = args.mode.map(Into::into);
    if let Some(ref ranges) = args.chapters {
        config.chapters = Some(parse_chapters(ranges)?);
    }

    let result = generate_from_pdf(&args.input, &config).await;
    if let Some(ref cb) = callback {
        cb.finish();
    }
    let course = result.context("Course generation failed")?;

    if let Some(ref path) = args.output {
        write_course(&course, path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        let json = serde_json::to_string_pretty(&course).context("Failed to serialise course")?;
        println!("{json}");
    }

    if !quiet {
        eprintln!(
            "{}  {}  {} chapters, {} lessons  {} mode  {}ms",
            green("✔"),
            bold(&course.overview.title),
            course.chapters.len(),
            course.lesson_count(),
            course.quality.mode,
            course.stats.total_duration_ms,
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&course.stats.total_input_tokens.to_string()),
            dim(&course.stats.total_output_tokens.to_string()),
        );
        for w in &course.warnings {
            eprintln!("   {} {}", yellow("⚠"), w);
        }
    }
    Ok(())
}

async fn run_toc(args: TocArgs) -> Result<()> {
    let config = build_config(&args.llm, Tier::Free, None)?;
    let loaded = load_input(&args.input, config.download_timeout_secs)
        .await
        .context("Failed to load PDF")?;
    let doc = PdfiumReader
        .read(&loaded.name, loaded.bytes)
        .await
        .context("Failed to read PDF")?;

    let llm = if args.outline_only {
        None
    } else {
        match LlmClient::from_config(&config).await {
            Ok(llm) => Some(llm),
            Err(e) => {
                tracing::warn!("No LLM available, using the outline only: {}", e);
                None
            }
        }
    };
    let toc = extract_toc(&doc, llm.as_ref(), &config).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&toc).context("Failed to serialise TOC")?);
        return Ok(());
    }
    println!(
        "{} chapters ({} pages, via {:?})",
        toc.chapters.len(),
        toc.total_pages,
        toc.method
    );
    for ch in &toc.chapters {
        println!(
            "  {:>4}-{:<4}  {}{}",
            ch.start_page,
            ch.end_page,
            "  ".repeat(ch.level.saturating_sub(1) as usize),
            ch.title
        );
    }
    Ok(())
}

async fn run_inspect(input: &str, json: bool) -> Result<()> {
    let info = inspect(input).await.context("Failed to inspect PDF")?;
    if json {
        let json = serde_json::to_string_pretty(&info).context("Failed to serialise metadata")?;
        println!("{json}");
        return Ok(());
    }
    println!("File:         {}", input);
    println!("Title:        {}", info.title);
    if let Some(ref a) = info.metadata.author {
        println!("Author:       {}", a);
    }
    println!("Pages:        {}", info.metadata.page_count);
    println!("PDF Version:  {}", info.metadata.pdf_version);
    println!("Has text:     {}", info.has_text);
    println!("Words:        {}", info.word_count);
    println!("Reading time: {} min", info.reading_time_minutes);
    println!("Outline:      {} entries", info.outline.len());
    Ok(())
}

async fn run_library(args: LibraryArgs) -> Result<()> {
    let config = build_config(&args.llm, Tier::Free, None)?;
    let library = Library::open(&args.data_dir, config)
        .await
        .with_context(|| format!("Failed to open library at {}", args.data_dir.display()))?;

    match args.command {
        LibraryCommand::Upload { user, notes, file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.pdf".to_string());
            let upload_type = if notes { UploadType::Notes } else { UploadType::Book };
            let receipt = library
                .upload(&user, &name, bytes, upload_type)
                .await
                .context("Upload failed")?;
            println!("{}  {}", receipt.book_id, receipt.message);
        }
        LibraryCommand::Process { user, book_id, chapters } => {
            let selection = chapters.as_deref().map(parse_chapters).transpose()?;
            let receipt = library
                .process_book(&user, book_id, selection)
                .context("Could not queue book")?;
            println!("{}  {}", receipt.book_id, receipt.message);
        }
        LibraryCommand::Drain => {
            let n = library.worker().drain().await.context("Queue processing failed")?;
            println!("Processed {n} books");
        }
        LibraryCommand::Courses { user } => {
            for c in library.list_courses(&user) {
                let position = c
                    .queue_position
                    .map(|p| format!(" #{p} in queue"))
                    .unwrap_or_default();
                println!(
                    "{}  {:<18} {:>5.1}%  {}{}",
                    c.id, c.status, c.progress, c.title, position
                );
            }
        }
        LibraryCommand::Repair => {
            let report = library.repair_lessons().context("Repair failed")?;
            println!("Fixed {} of {} lessons", report.fixed_count, report.total_checked);
        }
        LibraryCommand::Stats => {
            let stats = library.stats();
            let json = serde_json::to_string_pretty(&stats).context("Failed to serialise stats")?;
            println!("{json}");
        }
        LibraryCommand::Subscribe { user, tier, inactive } => {
            let account = library
                .set_subscription(&user, tier.into(), !inactive)
                .context("Could not update subscription")?;
            println!(
                "{}  {} (active: {})",
                account.user_id, account.tier, account.subscription_active
            );
        }
    }
    Ok(())
}

/// Parse `12-40,41-77` into chapter selections.
fn parse_chapters(s: &str) -> Result<Vec<ChapterSelection>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (start, end) = part
                .split_once('-')
                .with_context(|| format!("Invalid chapter range '{part}', expected START-END"))?;
            let start: usize = start.trim().parse().context("Invalid start page in range")?;
            let end: usize = end.trim().parse().context("Invalid end page in range")?;
            if start < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
            }
            if start > end {
                anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
            }
            Ok(ChapterSelection::new(start, end))
        })
        .collect()
}
