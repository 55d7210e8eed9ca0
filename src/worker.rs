//! Background processing of queued books, one at a time.
//!
//! A single loop keeps LLM traffic predictable: books are taken from the
//! catalog queue (highest tier first, then upload order), processed to
//! completion and marked `ready` or `error`. The loop sleeps for the poll
//! interval when the queue is empty and wakes early on [`QueueWorker::wake`].
//!
//! Progress steps are written onto the book record as the pipeline reports
//! them. Deleting a book while it is processing cancels the run at the next
//! stage or lesson boundary.

use crate::catalog::{BlobStore, Book, BookStatus, Catalog};
use crate::config::CourseConfig;
use crate::error::Book2CourseError;
use crate::generate::run_pipeline;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::pdf::DocumentReader;
use crate::progress::GenerationProgressCallback;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long the idle loop waits before checking the queue again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Step recorded on a book that finished processing.
pub const READY_STEP: &str = "Complete!";

/// Characters of the error message kept on a failed book.
const ERROR_STEP_CHARS: usize = 100;

/// `"Error: "` followed by the first 100 characters of `message`.
pub fn error_step(message: &str) -> String {
    let short: String = message.chars().take(ERROR_STEP_CHARS).collect();
    format!("Error: {short}")
}

/// Writes steps onto the book and cancels when the book disappears.
struct BookProgress {
    catalog: Arc<Catalog>,
    book_id: Uuid,
}

impl GenerationProgressCallback for BookProgress {
    fn on_step(&self, step: &str) {
        if let Err(e) = self.catalog.set_step(self.book_id, step) {
            debug!("Could not record step for {}: {}", self.book_id, e);
        }
    }

    fn is_cancelled(&self) -> bool {
        !self.catalog.book_exists(self.book_id)
    }
}

struct Shared {
    catalog: Arc<Catalog>,
    blobs: BlobStore,
    reader: Arc<dyn DocumentReader>,
    config: CourseConfig,
    poll_interval: Duration,
    notify: Notify,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
    /// Held while a book is taken from the queue and processed, so the loop
    /// and [`QueueWorker::drain`] never pick the same book.
    busy: tokio::sync::Mutex<()>,
    current: Mutex<Option<Uuid>>,
    /// Books whose failure could not be written back. They stay queued in
    /// the catalog but are not picked again by this worker.
    unrecorded: Mutex<Vec<Uuid>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; clones drive the same worker.
#[derive(Clone)]
pub struct QueueWorker {
    shared: Arc<Shared>,
}

impl QueueWorker {
    pub fn new(
        catalog: Arc<Catalog>,
        blobs: BlobStore,
        reader: Arc<dyn DocumentReader>,
        config: CourseConfig,
    ) -> Self {
        Self::with_poll_interval(catalog, blobs, reader, config, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        catalog: Arc<Catalog>,
        blobs: BlobStore,
        reader: Arc<dyn DocumentReader>,
        config: CourseConfig,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                catalog,
                blobs,
                reader,
                config,
                poll_interval,
                notify: Notify::new(),
                shutdown,
                running: AtomicBool::new(false),
                busy: tokio::sync::Mutex::new(()),
                current: Mutex::new(None),
                unrecorded: Mutex::new(Vec::new()),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Spawn the background loop unless it is already running.
    ///
    /// Must be called from within a tokio runtime. Returns `true` if a new
    /// loop was started.
    pub fn start(&self) -> bool {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            self.wake();
            return false;
        }
        self.shared.shutdown.send_replace(false);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run(shared));
        *self.shared.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The book being processed right now, if any.
    pub fn current_book(&self) -> Option<Uuid> {
        *self.shared.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the queue now instead of at the next poll.
    pub fn wake(&self) {
        self.shared.notify.notify_one();
    }

    /// Process one queued book. Returns `false` when the queue is empty.
    pub async fn process_next(&self) -> Result<bool, Book2CourseError> {
        process_next(&self.shared).await
    }

    /// Process queued books until none are left. Returns how many were taken.
    pub async fn drain(&self) -> Result<usize, Book2CourseError> {
        let mut processed = 0;
        while self.process_next().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Stop the loop after the current book and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        let handle = self.shared.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Queue worker task ended abnormally: {}", e);
            }
        }
    }
}

async fn run(shared: Arc<Shared>) {
    info!("Queue worker started");
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        if *shutdown.borrow() {
            break;
        }
        match process_next(&shared).await {
            // More work may be waiting; check again straight away.
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => error!("Queue worker error: {}", e),
        }
        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = tokio::time::sleep(shared.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    info!("Queue worker stopped");
}

async fn process_next(shared: &Shared) -> Result<bool, Book2CourseError> {
    let _busy = shared.busy.lock().await;
    let skip = shared.unrecorded.lock().unwrap_or_else(PoisonError::into_inner).clone();
    let Some(book) = shared.catalog.next_queued_excluding(&skip) else {
        return Ok(false);
    };

    *shared.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(book.id);
    let result = process_book(shared, &book).await;
    *shared.current.lock().unwrap_or_else(PoisonError::into_inner) = None;

    match result {
        Ok(()) => info!("Book {} processing complete", book.id),
        Err(e) if !shared.catalog.book_exists(book.id) => {
            info!("Book {} was deleted during processing ({})", book.id, e);
        }
        Err(e) => {
            warn!("Error processing book {}: {}", book.id, e);
            let step = error_step(&e.to_string());
            if let Err(store_err) = shared
                .catalog
                .set_status(book.id, BookStatus::Error, Some(&step))
            {
                error!("Could not mark book {} as failed: {}", book.id, store_err);
                shared
                    .unrecorded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(book.id);
            }
        }
    }
    Ok(true)
}

async fn process_book(shared: &Shared, book: &Book) -> Result<(), Book2CourseError> {
    info!("Processing book {} '{}'", book.id, book.title);
    if !shared.catalog.book_exists(book.id) {
        info!("Book {} was deleted, skipping", book.id);
        return Ok(());
    }
    let catalog = &shared.catalog;
    catalog.set_status(book.id, BookStatus::Processing, Some("Downloading PDF..."))?;
    let bytes = shared.blobs.get(&book.blob_key).await?;

    let progress = Arc::new(BookProgress {
        catalog: Arc::clone(catalog),
        book_id: book.id,
    });
    let mut config = shared.config.with_tier(book.tier);
    config.progress_callback = Some(progress.clone() as Arc<dyn GenerationProgressCallback>);

    progress.on_step("Extracting text from PDF...");
    let doc = shared.reader.read(&book.blob_key, bytes).await?;
    let text = match book.selected_chapters {
        Some(ref selections) if !selections.is_empty() => {
            progress.on_step(&format!("Extracting {} selected chapters...", selections.len()));
            doc.text_for_chapters(selections)
        }
        _ => doc.full_text(),
    };
    debug!("Extracted {} characters from book {}", text.chars().count(), book.id);

    progress.on_step("Starting AI processing...");
    let llm = LlmClient::from_config(&config).await?;
    let course = run_pipeline(&llm, &text, Some(&book.title), &config).await?;

    if progress.is_cancelled() {
        return Err(Book2CourseError::Cancelled("book was deleted".to_string()));
    }
    progress.on_step("Saving course to database...");
    catalog.save_course(book, &course)?;
    if !catalog.book_exists(book.id) {
        // Deleted between the check above and the save.
        catalog.delete_courses_for_book(book.id)?;
        return Err(Book2CourseError::Cancelled("book was deleted".to_string()));
    }
    catalog.set_status(book.id, BookStatus::Ready, Some(READY_STEP))?;
    Ok(())
}
