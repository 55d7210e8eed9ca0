//! The service surface: uploads, chapter selection, course browsing, quizzes
//! and progress, plus admin maintenance.
//!
//! Every user-facing method takes the caller's user id and checks ownership.
//! Books that belong to someone else are reported as not found; courses and
//! lessons as [`Book2CourseError::AccessDenied`].
//!
//! # Example
//!
//! ```rust,no_run
//! use book2course::library::Library;
//! use book2course::{CourseConfig, UploadType};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let library = Library::open("./data", CourseConfig::default()).await?;
//! let bytes = std::fs::read("notes.pdf")?;
//! let receipt = library.upload("user-1", "notes.pdf", bytes, UploadType::Notes).await?;
//! library.worker().drain().await?;
//! println!("{:?}", library.book("user-1", receipt.book_id)?.status);
//! # Ok(())
//! # }
//! ```

use crate::billing::{credit_cost, BillingModel, UsageReport, DEFAULT_INITIAL_CREDITS};
use crate::catalog::{
    Account, BlobStore, Book, BookStatus, Catalog, CatalogStats, Course, NewBook,
};
use crate::config::{ChapterSelection, CourseConfig, Tier, UploadType};
use crate::error::Book2CourseError;
use crate::grading::{course_progress, grade_quiz, CourseProgress, QuizResult};
use crate::output::{LessonContent, QualityReport, QuizItem};
use crate::pipeline::input::{file_stem, validate_upload};
use crate::pipeline::lesson::repair_stored;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::pdf::{DocumentReader, PdfiumReader};
use crate::toc::{chapter_summary, extract_toc, ChapterSummary, TocResult};
use crate::worker::QueueWorker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ── Views ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub book_id: Uuid,
    pub status: BookStatus,
    pub credits_used: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookToc {
    pub book_id: Uuid,
    pub title: String,
    pub toc: TocResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReceipt {
    pub book_id: Uuid,
    pub status: BookStatus,
    pub process_full: bool,
    /// Selected chapters, when not processing the whole book.
    pub summary: Option<ChapterSummary>,
    pub message: String,
}

/// One row of a user's course list: a finished course, or a book that has
/// not produced one yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSummary {
    /// Course id when ready, otherwise the book id.
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub chapters_count: usize,
    pub lessons_count: usize,
    pub progress: f64,
    pub status: BookStatus,
    pub processing_step: Option<String>,
    pub queue_position: Option<usize>,
    pub quality: Option<QualityReport>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonBrief {
    pub id: Uuid,
    pub title: String,
    pub order: usize,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub order: usize,
    pub lessons: Vec<LessonBrief>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseDetail {
    pub course: CourseSummary,
    pub chapters: Vec<ChapterView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDetail {
    pub id: Uuid,
    pub title: String,
    pub order: usize,
    pub content: LessonContent,
    pub quiz: Vec<QuizItem>,
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub fixed_count: usize,
    pub total_checked: usize,
}

// ── Library ──────────────────────────────────────────────────────────────

/// Builder for [`Library`].
pub struct LibraryBuilder {
    catalog: Arc<Catalog>,
    blobs: BlobStore,
    config: CourseConfig,
    reader: Arc<dyn DocumentReader>,
    billing: BillingModel,
    initial_credits: u32,
    auto_start: bool,
    poll_interval: Duration,
}

impl LibraryBuilder {
    /// Read PDFs with something other than pdfium.
    pub fn reader(mut self, reader: Arc<dyn DocumentReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn billing(mut self, model: BillingModel) -> Self {
        self.billing = model;
        self
    }

    /// Credits a new account starts with. Default: 3.
    pub fn initial_credits(mut self, credits: u32) -> Self {
        self.initial_credits = credits;
        self
    }

    /// Start the background worker when work is queued. Default: `true`.
    /// Turn off to drive processing with [`QueueWorker::drain`].
    pub fn auto_start(mut self, on: bool) -> Self {
        self.auto_start = on;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn build(self) -> Library {
        let worker = QueueWorker::with_poll_interval(
            Arc::clone(&self.catalog),
            self.blobs.clone(),
            Arc::clone(&self.reader),
            self.config.clone(),
            self.poll_interval,
        );
        Library {
            catalog: self.catalog,
            blobs: self.blobs,
            config: self.config,
            reader: self.reader,
            billing: self.billing,
            initial_credits: self.initial_credits,
            auto_start: self.auto_start,
            worker,
        }
    }
}

pub struct Library {
    catalog: Arc<Catalog>,
    blobs: BlobStore,
    config: CourseConfig,
    reader: Arc<dyn DocumentReader>,
    billing: BillingModel,
    initial_credits: u32,
    auto_start: bool,
    worker: QueueWorker,
}

impl Library {
    pub fn builder(
        catalog: Arc<Catalog>,
        blobs: BlobStore,
        config: CourseConfig,
    ) -> LibraryBuilder {
        LibraryBuilder {
            catalog,
            blobs,
            config,
            reader: Arc::new(PdfiumReader),
            billing: BillingModel::default(),
            initial_credits: DEFAULT_INITIAL_CREDITS,
            auto_start: true,
            poll_interval: crate::worker::DEFAULT_POLL_INTERVAL,
        }
    }

    /// A library stored under `dir`: `catalog.json` plus a `blobs/` directory.
    pub async fn open(
        dir: impl AsRef<Path>,
        config: CourseConfig,
    ) -> Result<Self, Book2CourseError> {
        let dir = dir.as_ref();
        let blobs = BlobStore::new(dir.join("blobs")).await?;
        let catalog = Arc::new(Catalog::open(dir.join("catalog.json"))?);
        Ok(Self::builder(catalog, blobs, config).build())
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn worker(&self) -> &QueueWorker {
        &self.worker
    }

    fn kick_worker(&self) {
        if self.auto_start {
            self.worker.start();
            self.worker.wake();
        }
    }

    // ── Upload ───────────────────────────────────────────────────────────

    /// Store an uploaded PDF and create its book record.
    ///
    /// Notes are queued straight away; books wait for chapter selection.
    /// Under the credits model the cost is deducted once the file has been
    /// validated, and refunded if it cannot be stored.
    pub async fn upload(
        &self,
        user_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        upload_type: UploadType,
    ) -> Result<UploadReceipt, Book2CourseError> {
        validate_upload(filename, &bytes, self.config.max_upload_bytes)?;

        let account = self.catalog.account(user_id, self.initial_credits);
        let usage = self.catalog.monthly_usage(user_id, Utc::now());
        self.billing.check_upload(&account, &usage, upload_type)?;

        let doc = self.reader.read(filename, bytes.clone()).await?;
        let title = doc.infer_title(file_stem(filename).as_deref());
        let key = BlobStore::new_key(user_id)?;

        let cost = if self.billing.charges_credits() {
            let cost = credit_cost(upload_type);
            self.catalog.deduct_credits(user_id, cost, self.initial_credits)?;
            cost
        } else {
            0
        };

        let stored = match self.blobs.put(&key, &bytes).await {
            Ok(()) => self.catalog.create_book(NewBook {
                user_id: user_id.to_string(),
                title,
                blob_key: key.clone(),
                status: match upload_type {
                    UploadType::Book => BookStatus::PendingSelection,
                    UploadType::Notes => BookStatus::Queued,
                },
                upload_type,
                tier: self.billing.processing_tier(&account),
            }),
            Err(e) => Err(e),
        };
        let book = match stored {
            Ok(book) => book,
            Err(e) => {
                warn!("Upload for {} failed, refunding {} credits: {}", user_id, cost, e);
                if cost > 0 {
                    self.catalog.refund_credits(user_id, cost, self.initial_credits)?;
                }
                if let Err(del) = self.blobs.delete(&key).await {
                    debug!("Could not remove blob {}: {}", key, del);
                }
                return Err(e);
            }
        };
        info!("User {} uploaded {} '{}' ({})", user_id, upload_type, book.title, book.id);

        let unit = if cost == 1 { "credit" } else { "credits" };
        let message = match upload_type {
            UploadType::Book => format!(
                "Book uploaded ({cost} {unit} used). Please select chapters to process."
            ),
            UploadType::Notes => {
                self.kick_worker();
                format!("Notes uploaded ({cost} {unit} used). Added to processing queue.")
            }
        };
        Ok(UploadReceipt {
            book_id: book.id,
            status: book.status,
            credits_used: cost,
            message,
        })
    }

    pub fn usage(&self, user_id: &str) -> UsageReport {
        let account = self.catalog.account(user_id, self.initial_credits);
        let usage = self.catalog.monthly_usage(user_id, Utc::now());
        UsageReport::new(&account, &usage)
    }

    // ── Books ────────────────────────────────────────────────────────────

    /// A book owned by `user_id`.
    pub fn book(&self, user_id: &str, book_id: Uuid) -> Result<Book, Book2CourseError> {
        self.catalog
            .book(book_id)
            .filter(|b| b.user_id == user_id)
            .ok_or(Book2CourseError::BookNotFound(book_id))
    }

    /// Find the chapters of an uploaded book.
    ///
    /// Uses the PDF outline when it looks complete, otherwise asks the model
    /// to read the printed contents. Works without a provider, in which case
    /// only the outline is tried.
    pub async fn book_toc(
        &self,
        user_id: &str,
        book_id: Uuid,
    ) -> Result<BookToc, Book2CourseError> {
        let book = self.book(user_id, book_id)?;
        let bytes = self.blobs.get(&book.blob_key).await?;
        let doc = self.reader.read(&book.blob_key, bytes).await?;

        let llm = match LlmClient::from_config(&self.config).await {
            Ok(llm) => Some(llm),
            Err(e) => {
                debug!("No LLM for TOC extraction: {}", e);
                None
            }
        };
        let toc = extract_toc(&doc, llm.as_ref(), &self.config).await;
        Ok(BookToc {
            book_id,
            title: book.title,
            toc,
        })
    }

    /// Queue a book, optionally restricted to some chapters.
    ///
    /// `None` or an empty selection processes the whole book.
    pub fn process_book(
        &self,
        user_id: &str,
        book_id: Uuid,
        selection: Option<Vec<ChapterSelection>>,
    ) -> Result<ProcessReceipt, Book2CourseError> {
        let book = self.book(user_id, book_id)?;
        if !matches!(
            book.status,
            BookStatus::PendingSelection | BookStatus::Queued | BookStatus::Error
        ) {
            return Err(Book2CourseError::InvalidStatus {
                status: book.status.to_string(),
            });
        }

        let selection = selection.filter(|s| !s.is_empty());
        if let Some(ref chapters) = selection {
            for ch in chapters {
                if ch.start_page == 0 || ch.end_page < ch.start_page {
                    return Err(Book2CourseError::InvalidInput {
                        input: format!("{}-{}", ch.start_page, ch.end_page),
                        reason: "chapter pages must be 1-based with end >= start".to_string(),
                    });
                }
            }
        }
        let summary = selection.as_deref().map(chapter_summary);
        let process_full = selection.is_none();

        self.catalog.update_book(book_id, |b| {
            b.status = BookStatus::Queued;
            b.selected_chapters = selection;
        })?;
        self.kick_worker();

        Ok(ProcessReceipt {
            book_id,
            status: BookStatus::Queued,
            process_full,
            summary,
            message: "Book added to processing queue".to_string(),
        })
    }

    // ── Courses ──────────────────────────────────────────────────────────

    fn summarize_course(&self, user_id: &str, course: &Course) -> CourseSummary {
        let chapters = self.catalog.chapters(course.id);
        let lesson_ids = self.catalog.course_lesson_ids(course.id);
        let completed = self.catalog.completed_lessons(user_id, &lesson_ids);
        CourseSummary {
            id: course.id,
            title: course.title.clone(),
            description: course.description.clone(),
            chapters_count: chapters.len(),
            lessons_count: lesson_ids.len(),
            progress: course_progress(&lesson_ids, &completed).percentage,
            status: BookStatus::Ready,
            processing_step: None,
            queue_position: None,
            quality: Some(course.quality.clone()),
            created_at: course.created_at,
        }
    }

    /// Books still in the pipeline first, then finished courses.
    pub fn list_courses(&self, user_id: &str) -> Vec<CourseSummary> {
        let courses = self.catalog.user_courses(user_id);
        let mut out: Vec<CourseSummary> = self
            .catalog
            .user_books(user_id)
            .into_iter()
            .filter(|b| !courses.iter().any(|c| c.book_id == b.id))
            .map(|b| {
                let description = if b.status == BookStatus::PendingSelection {
                    "Click to select chapters for your course."
                } else {
                    "Your book is being processed by our AI..."
                };
                CourseSummary {
                    id: b.id,
                    queue_position: self.catalog.queue_position(b.id),
                    title: b.title,
                    description: description.to_string(),
                    chapters_count: 0,
                    lessons_count: 0,
                    progress: 0.0,
                    status: b.status,
                    processing_step: b.processing_step,
                    quality: None,
                    created_at: b.created_at,
                }
            })
            .collect();
        out.extend(courses.iter().map(|c| self.summarize_course(user_id, c)));
        out
    }

    fn owned_course(&self, user_id: &str, course_id: Uuid) -> Result<Course, Book2CourseError> {
        let course = self
            .catalog
            .course(course_id)
            .ok_or(Book2CourseError::CourseNotFound(course_id))?;
        if course.user_id != user_id {
            return Err(Book2CourseError::AccessDenied);
        }
        Ok(course)
    }

    pub fn course_detail(
        &self,
        user_id: &str,
        course_id: Uuid,
    ) -> Result<CourseDetail, Book2CourseError> {
        let course = self.owned_course(user_id, course_id)?;
        let lesson_ids = self.catalog.course_lesson_ids(course_id);
        let completed = self.catalog.completed_lessons(user_id, &lesson_ids);

        let chapters = self
            .catalog
            .chapters(course_id)
            .into_iter()
            .map(|ch| ChapterView {
                lessons: self
                    .catalog
                    .lessons(ch.id)
                    .into_iter()
                    .map(|l| LessonBrief {
                        completed: completed.contains(&l.id),
                        id: l.id,
                        title: l.title,
                        order: l.order,
                    })
                    .collect(),
                id: ch.id,
                title: ch.title,
                description: ch.description,
                order: ch.order,
            })
            .collect();

        Ok(CourseDetail {
            course: self.summarize_course(user_id, &course),
            chapters,
        })
    }

    fn check_lesson_access(&self, user_id: &str, lesson_id: Uuid) -> Result<(), Book2CourseError> {
        match self.catalog.course_of_lesson(lesson_id) {
            Some(course) if course.user_id == user_id => Ok(()),
            Some(_) => Err(Book2CourseError::AccessDenied),
            None => Err(Book2CourseError::LessonNotFound(lesson_id)),
        }
    }

    pub fn lesson_detail(
        &self,
        user_id: &str,
        lesson_id: Uuid,
    ) -> Result<LessonDetail, Book2CourseError> {
        let lesson = self
            .catalog
            .lesson(lesson_id)
            .ok_or(Book2CourseError::LessonNotFound(lesson_id))?;
        self.check_lesson_access(user_id, lesson_id)?;
        let completed = self
            .catalog
            .progress_record(user_id, lesson_id)
            .map(|p| p.completed)
            .unwrap_or(false);
        Ok(LessonDetail {
            id: lesson.id,
            title: lesson.title,
            order: lesson.order,
            content: lesson.content,
            quiz: lesson.quiz,
            completed,
        })
    }

    // ── Quizzes and progress ─────────────────────────────────────────────

    /// Grade answers (question id → option index) and mark the lesson
    /// complete with the percentage.
    pub fn submit_quiz(
        &self,
        user_id: &str,
        lesson_id: Uuid,
        answers: &HashMap<String, usize>,
    ) -> Result<QuizResult, Book2CourseError> {
        let lesson = self
            .catalog
            .lesson(lesson_id)
            .ok_or(Book2CourseError::LessonNotFound(lesson_id))?;
        self.check_lesson_access(user_id, lesson_id)?;
        let result = grade_quiz(&lesson.quiz, answers);
        self.catalog
            .upsert_progress(user_id, lesson_id, Some(result.percentage))?;
        Ok(result)
    }

    pub fn complete_lesson(
        &self,
        user_id: &str,
        lesson_id: Uuid,
        quiz_score: Option<u32>,
    ) -> Result<(), Book2CourseError> {
        if self.catalog.lesson(lesson_id).is_none() {
            return Err(Book2CourseError::LessonNotFound(lesson_id));
        }
        self.check_lesson_access(user_id, lesson_id)?;
        self.catalog.upsert_progress(user_id, lesson_id, quiz_score)
    }

    pub fn progress(
        &self,
        user_id: &str,
        course_id: Uuid,
    ) -> Result<CourseProgress, Book2CourseError> {
        self.owned_course(user_id, course_id)?;
        let lesson_ids = self.catalog.course_lesson_ids(course_id);
        let completed = self.catalog.completed_lessons(user_id, &lesson_ids);
        Ok(course_progress(&lesson_ids, &completed))
    }

    /// Delete a course (and the book it came from) or a book that has no
    /// course yet. A book being processed stops at its next checkpoint.
    pub async fn delete_item(&self, user_id: &str, id: Uuid) -> Result<(), Book2CourseError> {
        let book_id = match self.catalog.course(id) {
            Some(course) if course.user_id == user_id => course.book_id,
            _ => id,
        };
        let book = self.book(user_id, book_id)?;
        if self.catalog.delete_book(book.id)?.is_some() {
            if let Err(e) = self.blobs.delete(&book.blob_key).await {
                warn!("Could not remove blob {}: {}", book.blob_key, e);
            }
        }
        Ok(())
    }

    // ── Admin ────────────────────────────────────────────────────────────

    /// Drop a book's course and queue it again.
    pub fn reprocess_book(&self, book_id: Uuid) -> Result<(), Book2CourseError> {
        if !self.catalog.book_exists(book_id) {
            return Err(Book2CourseError::BookNotFound(book_id));
        }
        let removed = self.catalog.delete_courses_for_book(book_id)?;
        self.catalog
            .set_status(book_id, BookStatus::Queued, Some("Queued for reprocessing"))?;
        info!("Book {} queued for reprocessing ({} course removed)", book_id, removed);
        self.kick_worker();
        Ok(())
    }

    /// Fix stored lessons with nested JSON or empty key point descriptions.
    pub fn repair_lessons(&self) -> Result<RepairReport, Book2CourseError> {
        let (total_checked, fixed_count) = self
            .catalog
            .update_lessons(|lesson| repair_stored(&mut lesson.content, &lesson.title))?;
        info!("Repaired {} of {} lessons", fixed_count, total_checked);
        Ok(RepairReport {
            fixed_count,
            total_checked,
        })
    }

    pub fn stats(&self) -> CatalogStats {
        self.catalog.stats()
    }

    pub fn set_subscription(
        &self,
        user_id: &str,
        tier: Tier,
        active: bool,
    ) -> Result<Account, Book2CourseError> {
        self.catalog.update_account(user_id, self.initial_credits, |a| {
            a.tier = tier;
            a.subscription_active = active;
        })
    }

    pub fn grant_credits(&self, user_id: &str, credits: u32) -> Result<Account, Book2CourseError> {
        self.catalog.update_account(user_id, self.initial_credits, |a| {
            a.credits = a.credits.saturating_add(credits)
        })
    }
}
