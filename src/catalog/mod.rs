//! Books, courses, lessons, progress and accounts.
//!
//! The catalog is an in-process store guarded by a single lock. When opened
//! with a path, every mutation rewrites a JSON snapshot atomically (temp file
//! in the same directory, then rename), so a crash never leaves a half-written
//! catalog behind.
//!
//! Deleting a book removes its course, chapters, lessons and the progress
//! recorded against those lessons.

pub mod blob;

pub use blob::BlobStore;

use crate::config::{ChapterSelection, Tier, UploadType};
use crate::error::{Book2CourseError, StageWarning};
use crate::output::{GeneratedCourse, LessonContent, QualityReport, QuizItem};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

// ── Records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Uploading,
    PendingSelection,
    Queued,
    Processing,
    Ready,
    Error,
}

impl BookStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookStatus::Uploading => "uploading",
            BookStatus::PendingSelection => "pending_selection",
            BookStatus::Queued => "queued",
            BookStatus::Processing => "processing",
            BookStatus::Ready => "ready",
            BookStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded PDF and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    /// Key of the PDF in the [`BlobStore`].
    pub blob_key: String,
    pub status: BookStatus,
    pub upload_type: UploadType,
    /// Tier the pipeline runs at for this book.
    pub tier: Tier,
    /// Last progress message, or the error message when `status` is `error`.
    pub processing_step: Option<String>,
    /// Page ranges to process; `None` means the whole document.
    pub selected_chapters: Option<Vec<ChapterSelection>>,
    /// Queue priority; higher runs first.
    pub priority: u8,
    /// Upload order, used to break priority ties.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub book_id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub quality: QualityReport,
    pub tier: Tier,
    #[serde(default)]
    pub warnings: Vec<StageWarning>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub description: String,
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub title: String,
    pub order: usize,
    pub content: LessonContent,
    pub quiz: Vec<QuizItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: String,
    pub lesson_id: Uuid,
    pub completed: bool,
    /// Last quiz percentage, if a quiz was submitted.
    pub quiz_score: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub tier: Tier,
    pub subscription_active: bool,
    pub credits: u32,
}

impl Account {
    pub fn new(user_id: impl Into<String>, credits: u32) -> Self {
        Self {
            user_id: user_id.into(),
            tier: Tier::Free,
            subscription_active: false,
            credits,
        }
    }

    /// The subscribed tier while the subscription is active, otherwise free.
    pub fn effective_tier(&self) -> Tier {
        if self.tier.is_paid() && self.subscription_active {
            self.tier
        } else {
            Tier::Free
        }
    }
}

/// Uploads made by one user in the current calendar month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyUsage {
    pub books: usize,
    pub notes: usize,
}

impl MonthlyUsage {
    pub fn count(&self, upload_type: UploadType) -> usize {
        match upload_type {
            UploadType::Book => self.books,
            UploadType::Notes => self.notes,
        }
    }
}

/// Everything needed to create a book record.
#[derive(Debug, Clone)]
pub struct NewBook {
    pub user_id: String,
    pub title: String,
    pub blob_key: String,
    pub status: BookStatus,
    pub upload_type: UploadType,
    pub tier: Tier,
}

/// Record counts for the admin overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub books: usize,
    pub books_by_status: BTreeMap<String, usize>,
    pub courses: usize,
    pub lessons: usize,
    pub users: usize,
    pub users_by_tier: BTreeMap<String, usize>,
}

// ── Store ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogState {
    books: BTreeMap<Uuid, Book>,
    courses: BTreeMap<Uuid, Course>,
    chapters: BTreeMap<Uuid, Chapter>,
    lessons: BTreeMap<Uuid, Lesson>,
    progress: Vec<ProgressRecord>,
    accounts: BTreeMap<String, Account>,
    next_seq: u64,
}

impl CatalogState {
    fn chapter_ids(&self, course_id: Uuid) -> Vec<Uuid> {
        self.chapters
            .values()
            .filter(|c| c.course_id == course_id)
            .map(|c| c.id)
            .collect()
    }

    fn lesson_ids(&self, course_id: Uuid) -> Vec<Uuid> {
        let chapters = self.chapter_ids(course_id);
        self.lessons
            .values()
            .filter(|l| chapters.contains(&l.chapter_id))
            .map(|l| l.id)
            .collect()
    }

    /// Remove a course and everything under it.
    fn remove_course(&mut self, course_id: Uuid) -> Option<Course> {
        let course = self.courses.remove(&course_id)?;
        let lessons = self.lesson_ids(course_id);
        self.progress.retain(|p| !lessons.contains(&p.lesson_id));
        for id in &lessons {
            self.lessons.remove(id);
        }
        for id in self.chapter_ids(course_id) {
            self.chapters.remove(&id);
        }
        Some(course)
    }

    fn course_ids_for_book(&self, book_id: Uuid) -> Vec<Uuid> {
        self.courses
            .values()
            .filter(|c| c.book_id == book_id)
            .map(|c| c.id)
            .collect()
    }

    fn account_mut(&mut self, user_id: &str, initial_credits: u32) -> &mut Account {
        self.accounts
            .entry(user_id.to_string())
            .or_insert_with(|| Account::new(user_id, initial_credits))
    }
}

/// Thread-safe catalog with optional JSON snapshot persistence.
#[derive(Debug, Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
    snapshot: Option<PathBuf>,
}

impl Catalog {
    /// A catalog that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a catalog backed by `path`, loading the snapshot if it exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Book2CourseError> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Book2CourseError::Internal(format!(
                    "corrupt catalog snapshot '{}': {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogState::default(),
            Err(source) => return Err(Book2CourseError::Storage { path, source }),
        };
        info!(
            "Opened catalog {} ({} books, {} courses)",
            path.display(),
            state.books.len(),
            state.courses.len()
        );
        Ok(Self {
            state: RwLock::new(state),
            snapshot: Some(path),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&CatalogState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Apply `f` under the write lock, then rewrite the snapshot. If the
    /// snapshot cannot be written the change is rolled back.
    fn mutate<R>(&self, f: impl FnOnce(&mut CatalogState) -> R) -> Result<R, Book2CourseError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let before = self.snapshot.is_some().then(|| state.clone());
        let out = f(&mut state);
        if let Err(e) = self.persist(&state) {
            if let Some(before) = before {
                *state = before;
            }
            return Err(e);
        }
        Ok(out)
    }

    fn persist(&self, state: &CatalogState) -> Result<(), Book2CourseError> {
        let Some(ref path) = self.snapshot else {
            return Ok(());
        };
        let storage_err = |source: std::io::Error| Book2CourseError::Storage {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| Book2CourseError::Internal(format!("serialise catalog: {e}")))?;

        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(storage_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(storage_err)?;
        tmp.write_all(&json).map_err(storage_err)?;
        tmp.persist(path).map_err(|e| storage_err(e.error))?;
        Ok(())
    }

    // ── Books ────────────────────────────────────────────────────────────

    pub fn create_book(&self, new: NewBook) -> Result<Book, Book2CourseError> {
        self.mutate(|s| {
            s.next_seq += 1;
            let book = Book {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                title: new.title,
                blob_key: new.blob_key,
                status: new.status,
                upload_type: new.upload_type,
                tier: new.tier,
                processing_step: None,
                selected_chapters: None,
                priority: new.tier.priority(),
                seq: s.next_seq,
                created_at: Utc::now(),
            };
            debug!("Created book {} ({})", book.id, book.status);
            s.books.insert(book.id, book.clone());
            book
        })
    }

    pub fn book(&self, id: Uuid) -> Option<Book> {
        self.read(|s| s.books.get(&id).cloned())
    }

    pub fn book_exists(&self, id: Uuid) -> bool {
        self.read(|s| s.books.contains_key(&id))
    }

    /// A user's books in upload order.
    pub fn user_books(&self, user_id: &str) -> Vec<Book> {
        self.read(|s| {
            let mut books: Vec<Book> = s
                .books
                .values()
                .filter(|b| b.user_id == user_id)
                .cloned()
                .collect();
            books.sort_by_key(|b| b.seq);
            books
        })
    }

    /// Apply `f` to a book and return the updated record.
    pub fn update_book(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Book),
    ) -> Result<Book, Book2CourseError> {
        self.mutate(|s| {
            s.books.get_mut(&id).map(|book| {
                f(book);
                book.clone()
            })
        })?
        .ok_or(Book2CourseError::BookNotFound(id))
    }

    pub fn set_status(
        &self,
        id: Uuid,
        status: BookStatus,
        step: Option<&str>,
    ) -> Result<(), Book2CourseError> {
        self.update_book(id, |b| {
            b.status = status;
            if let Some(step) = step {
                b.processing_step = Some(step.to_string());
            }
        })
        .map(|_| ())
    }

    pub fn set_step(&self, id: Uuid, step: &str) -> Result<(), Book2CourseError> {
        self.update_book(id, |b| b.processing_step = Some(step.to_string()))
            .map(|_| ())
    }

    /// Delete a book and its course tree. Returns the removed book so the
    /// caller can drop its blob.
    pub fn delete_book(&self, id: Uuid) -> Result<Option<Book>, Book2CourseError> {
        self.mutate(|s| {
            let book = s.books.remove(&id)?;
            for course_id in s.course_ids_for_book(id) {
                s.remove_course(course_id);
            }
            info!("Deleted book {}", id);
            Some(book)
        })
    }

    /// Delete the course generated from a book, keeping the book.
    pub fn delete_courses_for_book(&self, book_id: Uuid) -> Result<usize, Book2CourseError> {
        self.mutate(|s| {
            let ids = s.course_ids_for_book(book_id);
            for id in &ids {
                s.remove_course(*id);
            }
            ids.len()
        })
    }

    // ── Queue ────────────────────────────────────────────────────────────

    /// The queued book to process next: highest priority, then oldest.
    pub fn next_queued(&self) -> Option<Book> {
        self.next_queued_excluding(&[])
    }

    /// Like [`Catalog::next_queued`], passing over the books in `skip`.
    pub fn next_queued_excluding(&self, skip: &[Uuid]) -> Option<Book> {
        self.read(|s| {
            s.books
                .values()
                .filter(|b| b.status == BookStatus::Queued && !skip.contains(&b.id))
                .min_by_key(|b| (std::cmp::Reverse(b.priority), b.seq))
                .cloned()
        })
    }

    /// 1-based position of a queued book, `None` if it is not queued.
    pub fn queue_position(&self, id: Uuid) -> Option<usize> {
        self.read(|s| {
            let book = s.books.get(&id).filter(|b| b.status == BookStatus::Queued)?;
            let ahead = s
                .books
                .values()
                .filter(|b| b.status == BookStatus::Queued)
                .filter(|b| {
                    (std::cmp::Reverse(b.priority), b.seq)
                        < (std::cmp::Reverse(book.priority), book.seq)
                })
                .count();
            Some(ahead + 1)
        })
    }

    // ── Courses ──────────────────────────────────────────────────────────

    /// Store a generated course for `book`: one course row, then its
    /// chapters and lessons in order.
    pub fn save_course(
        &self,
        book: &Book,
        generated: &GeneratedCourse,
    ) -> Result<Course, Book2CourseError> {
        let title = if generated.overview.title.trim().is_empty() {
            book.title.clone()
        } else {
            generated.overview.title.clone()
        };
        let course = Course {
            id: Uuid::new_v4(),
            book_id: book.id,
            user_id: book.user_id.clone(),
            title,
            description: generated.description(&book.title),
            quality: generated.quality.clone(),
            tier: generated.tier,
            warnings: generated.warnings.clone(),
            created_at: Utc::now(),
        };

        self.mutate(|s| {
            for (chapter_order, ch) in generated.chapters.iter().enumerate() {
                let chapter = Chapter {
                    id: Uuid::new_v4(),
                    course_id: course.id,
                    title: ch.title.clone(),
                    description: ch.description.clone(),
                    order: chapter_order,
                };
                for (lesson_order, l) in ch.lessons.iter().enumerate() {
                    let lesson = Lesson {
                        id: Uuid::new_v4(),
                        chapter_id: chapter.id,
                        title: l.title.clone(),
                        order: lesson_order,
                        content: l.content.clone(),
                        quiz: l.quiz.clone(),
                    };
                    s.lessons.insert(lesson.id, lesson);
                }
                s.chapters.insert(chapter.id, chapter);
            }
            s.courses.insert(course.id, course.clone());
            info!("Saved course {} for book {}", course.id, book.id);
            course
        })
    }

    pub fn course(&self, id: Uuid) -> Option<Course> {
        self.read(|s| s.courses.get(&id).cloned())
    }

    pub fn course_for_book(&self, book_id: Uuid) -> Option<Course> {
        self.read(|s| s.courses.values().find(|c| c.book_id == book_id).cloned())
    }

    /// A user's courses, oldest first.
    pub fn user_courses(&self, user_id: &str) -> Vec<Course> {
        self.read(|s| {
            let mut courses: Vec<Course> = s
                .courses
                .values()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect();
            courses.sort_by_key(|c| c.created_at);
            courses
        })
    }

    pub fn chapters(&self, course_id: Uuid) -> Vec<Chapter> {
        self.read(|s| {
            let mut chapters: Vec<Chapter> = s
                .chapters
                .values()
                .filter(|c| c.course_id == course_id)
                .cloned()
                .collect();
            chapters.sort_by_key(|c| c.order);
            chapters
        })
    }

    pub fn lessons(&self, chapter_id: Uuid) -> Vec<Lesson> {
        self.read(|s| {
            let mut lessons: Vec<Lesson> = s
                .lessons
                .values()
                .filter(|l| l.chapter_id == chapter_id)
                .cloned()
                .collect();
            lessons.sort_by_key(|l| l.order);
            lessons
        })
    }

    pub fn lesson(&self, id: Uuid) -> Option<Lesson> {
        self.read(|s| s.lessons.get(&id).cloned())
    }

    /// The course a lesson belongs to.
    pub fn course_of_lesson(&self, lesson_id: Uuid) -> Option<Course> {
        self.read(|s| {
            let lesson = s.lessons.get(&lesson_id)?;
            let chapter = s.chapters.get(&lesson.chapter_id)?;
            s.courses.get(&chapter.course_id).cloned()
        })
    }

    /// Every lesson id in a course.
    pub fn course_lesson_ids(&self, course_id: Uuid) -> Vec<Uuid> {
        self.read(|s| s.lesson_ids(course_id))
    }

    /// Rewrite lessons in place. `f` returns whether it changed the lesson.
    /// Returns `(checked, changed)`.
    pub fn update_lessons(
        &self,
        mut f: impl FnMut(&mut Lesson) -> bool,
    ) -> Result<(usize, usize), Book2CourseError> {
        self.mutate(|s| {
            let mut changed = 0;
            for lesson in s.lessons.values_mut() {
                if f(lesson) {
                    changed += 1;
                }
            }
            (s.lessons.len(), changed)
        })
    }

    // ── Progress ─────────────────────────────────────────────────────────

    /// Mark a lesson complete. A `None` score keeps any earlier score.
    pub fn upsert_progress(
        &self,
        user_id: &str,
        lesson_id: Uuid,
        quiz_score: Option<u32>,
    ) -> Result<(), Book2CourseError> {
        self.mutate(|s| {
            let now = Utc::now();
            match s
                .progress
                .iter_mut()
                .find(|p| p.user_id == user_id && p.lesson_id == lesson_id)
            {
                Some(p) => {
                    p.completed = true;
                    if quiz_score.is_some() {
                        p.quiz_score = quiz_score;
                    }
                    p.updated_at = now;
                }
                None => s.progress.push(ProgressRecord {
                    user_id: user_id.to_string(),
                    lesson_id,
                    completed: true,
                    quiz_score,
                    updated_at: now,
                }),
            }
        })
    }

    pub fn progress_record(&self, user_id: &str, lesson_id: Uuid) -> Option<ProgressRecord> {
        self.read(|s| {
            s.progress
                .iter()
                .find(|p| p.user_id == user_id && p.lesson_id == lesson_id)
                .cloned()
        })
    }

    /// Lessons among `lesson_ids` the user has completed.
    pub fn completed_lessons(&self, user_id: &str, lesson_ids: &[Uuid]) -> Vec<Uuid> {
        self.read(|s| {
            s.progress
                .iter()
                .filter(|p| {
                    p.user_id == user_id && p.completed && lesson_ids.contains(&p.lesson_id)
                })
                .map(|p| p.lesson_id)
                .collect()
        })
    }

    // ── Accounts and usage ───────────────────────────────────────────────

    /// The user's account, or a fresh one that has not been stored yet.
    pub fn account(&self, user_id: &str, initial_credits: u32) -> Account {
        self.read(|s| s.accounts.get(user_id).cloned())
            .unwrap_or_else(|| Account::new(user_id, initial_credits))
    }

    /// Apply `f` to the user's account, creating it if needed.
    pub fn update_account(
        &self,
        user_id: &str,
        initial_credits: u32,
        f: impl FnOnce(&mut Account),
    ) -> Result<Account, Book2CourseError> {
        self.mutate(|s| {
            let account = s.account_mut(user_id, initial_credits);
            f(account);
            account.clone()
        })
    }

    /// Take `cost` credits. Returns the remaining balance.
    pub fn deduct_credits(
        &self,
        user_id: &str,
        cost: u32,
        initial_credits: u32,
    ) -> Result<u32, Book2CourseError> {
        self.mutate(|s| {
            let account = s.account_mut(user_id, initial_credits);
            if account.credits < cost {
                return Err(Book2CourseError::InsufficientCredits {
                    required: cost,
                    available: account.credits,
                });
            }
            account.credits -= cost;
            Ok(account.credits)
        })?
    }

    pub fn refund_credits(
        &self,
        user_id: &str,
        amount: u32,
        initial_credits: u32,
    ) -> Result<u32, Book2CourseError> {
        self.update_account(user_id, initial_credits, |a| {
            a.credits = a.credits.saturating_add(amount)
        })
        .map(|a| a.credits)
    }

    /// Uploads by the user since the start of `now`'s month (UTC).
    pub fn monthly_usage(&self, user_id: &str, now: DateTime<Utc>) -> MonthlyUsage {
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        self.read(|s| {
            let mut usage = MonthlyUsage::default();
            for b in s.books.values() {
                if b.user_id != user_id || b.created_at < month_start {
                    continue;
                }
                match b.upload_type {
                    UploadType::Book => usage.books += 1,
                    UploadType::Notes => usage.notes += 1,
                }
            }
            usage
        })
    }

    pub fn stats(&self) -> CatalogStats {
        self.read(|s| {
            let mut stats = CatalogStats {
                books: s.books.len(),
                courses: s.courses.len(),
                lessons: s.lessons.len(),
                users: s.accounts.len(),
                ..Default::default()
            };
            for b in s.books.values() {
                *stats.books_by_status.entry(b.status.to_string()).or_default() += 1;
            }
            for a in s.accounts.values() {
                *stats.users_by_tier.entry(a.tier.as_str().to_string()).or_default() += 1;
            }
            stats
        })
    }
}
