//! Library facade tests: uploads, the processing queue, course browsing,
//! quizzes, ownership and billing.

mod common;

use book2course::catalog::BookStatus;
use book2course::library::Library;
use book2course::pipeline::llm::Stage;
use book2course::{
    BillingModel, BlobStore, Book2CourseError, Catalog, ChapterSelection, Tier, TocMethod,
    UploadType,
};
use common::{pdf_bytes, sample_doc, test_config, ScriptedBackend, StubReader};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

struct Fixture {
    _dir: TempDir,
    backend: Arc<ScriptedBackend>,
    library: Library,
}

async fn fixture_with(billing: BillingModel, catalog: Option<Arc<Catalog>>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::course(6);
    let blobs = BlobStore::new(dir.path().join("blobs")).await.unwrap();
    let catalog = catalog.unwrap_or_else(|| Arc::new(Catalog::in_memory()));
    let library = Library::builder(catalog, blobs, test_config(backend.clone(), Tier::Free))
        .reader(Arc::new(StubReader { doc: sample_doc() }))
        .billing(billing)
        .auto_start(false)
        .build();
    Fixture {
        _dir: dir,
        backend,
        library,
    }
}

async fn fixture() -> Fixture {
    fixture_with(BillingModel::Credits, None).await
}

/// Upload notes for `user` and process the queue.
async fn ready_course(f: &Fixture, user: &str) -> (Uuid, Uuid) {
    let receipt = f
        .library
        .upload(user, "notes.pdf", pdf_bytes(), UploadType::Notes)
        .await
        .unwrap();
    assert_eq!(f.library.worker().drain().await.unwrap(), 1);
    let course = f
        .library
        .catalog()
        .course_for_book(receipt.book_id)
        .expect("course saved");
    (receipt.book_id, course.id)
}

#[tokio::test]
async fn notes_upload_is_queued_and_charged() {
    let f = fixture().await;

    let receipt = f
        .library
        .upload("alice", "notes.pdf", pdf_bytes(), UploadType::Notes)
        .await
        .unwrap();

    assert_eq!(receipt.status, BookStatus::Queued);
    assert_eq!(receipt.credits_used, 1);
    assert_eq!(
        receipt.message,
        "Notes uploaded (1 credit used). Added to processing queue."
    );
    let book = f.library.book("alice", receipt.book_id).unwrap();
    assert_eq!(book.title, "The Rust Book");
    assert_eq!(book.tier, Tier::Pro);
    assert_eq!(f.library.usage("alice").credits, 2);
    assert_eq!(f.library.usage("alice").notes_this_month, 1);
}

#[tokio::test]
async fn rejected_uploads_cost_nothing() {
    let f = fixture().await;

    let err = f
        .library
        .upload("alice", "notes.txt", pdf_bytes(), UploadType::Notes)
        .await
        .unwrap_err();
    assert!(matches!(err, Book2CourseError::InvalidInput { .. }), "{err:?}");

    let err = f
        .library
        .upload("alice", "notes.pdf", b"hello".to_vec(), UploadType::Notes)
        .await
        .unwrap_err();
    assert!(matches!(err, Book2CourseError::NotAPdf { .. }), "{err:?}");

    let err = f
        .library
        .upload("alice", "book.pdf", pdf_bytes(), UploadType::Book)
        .await
        .unwrap_err();
    match err {
        Book2CourseError::InsufficientCredits { required, available } => {
            assert_eq!((required, available), (5, 3));
        }
        other => panic!("expected InsufficientCredits, got {other:?}"),
    }
    assert_eq!(f.library.usage("alice").credits, 3);
    assert!(f.library.list_courses("alice").is_empty());
}

#[tokio::test]
async fn processed_notes_become_a_course() {
    let f = fixture().await;
    let (book_id, course_id) = ready_course(&f, "alice").await;

    let book = f.library.book("alice", book_id).unwrap();
    assert_eq!(book.status, BookStatus::Ready);
    assert_eq!(book.processing_step.as_deref(), Some("Complete!"));

    let list = f.library.list_courses("alice");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, course_id);
    assert_eq!(list[0].title, "The Rust Book");
    assert_eq!((list[0].chapters_count, list[0].lessons_count), (2, 3));
    assert_eq!(list[0].progress, 0.0);

    let detail = f.library.course_detail("alice", course_id).unwrap();
    let titles: Vec<&str> = detail.chapters.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Memory", "Safety"]);
    assert_eq!(detail.chapters[0].lessons[1].title, "Borrowing");
    assert!(detail.chapters[0].lessons.iter().all(|l| !l.completed));
    assert_eq!(f.backend.calls(Stage::Lesson), 3);
}

#[tokio::test]
async fn quiz_submission_scores_and_completes_lesson() {
    let f = fixture().await;
    let (_, course_id) = ready_course(&f, "alice").await;
    let detail = f.library.course_detail("alice", course_id).unwrap();
    let lesson_id = detail.chapters[0].lessons[0].id;

    let lesson = f.library.lesson_detail("alice", lesson_id).unwrap();
    assert_eq!(lesson.title, "Ownership");
    assert!(!lesson.completed);
    assert!(lesson.quiz.len() >= 2);

    let answers = HashMap::from([("q1".to_string(), 0), ("q2".to_string(), 3)]);
    let result = f.library.submit_quiz("alice", lesson_id, &answers).unwrap();
    assert_eq!((result.score, result.total, result.percentage), (1, 2, 50));

    let record = f
        .library
        .catalog()
        .progress_record("alice", lesson_id)
        .unwrap();
    assert!(record.completed);
    assert_eq!(record.quiz_score, Some(50));

    // Completing again without a score keeps the recorded one.
    f.library.complete_lesson("alice", lesson_id, None).unwrap();
    let record = f
        .library
        .catalog()
        .progress_record("alice", lesson_id)
        .unwrap();
    assert_eq!(record.quiz_score, Some(50));

    let progress = f.library.progress("alice", course_id).unwrap();
    assert_eq!(progress.completed_lessons, vec![lesson_id]);
    assert_eq!(progress.total_lessons, 3);
    assert!((progress.percentage - 100.0 / 3.0).abs() < 1e-9);
    assert!(f.library.lesson_detail("alice", lesson_id).unwrap().completed);
}

#[tokio::test]
async fn other_users_cannot_see_anything() {
    let f = fixture().await;
    let (book_id, course_id) = ready_course(&f, "alice").await;
    let lesson_id = f.library.catalog().course_lesson_ids(course_id)[0];

    assert!(matches!(
        f.library.book("bob", book_id),
        Err(Book2CourseError::BookNotFound(_))
    ));
    assert!(matches!(
        f.library.course_detail("bob", course_id),
        Err(Book2CourseError::AccessDenied)
    ));
    assert!(matches!(
        f.library.lesson_detail("bob", lesson_id),
        Err(Book2CourseError::AccessDenied)
    ));
    assert!(matches!(
        f.library.submit_quiz("bob", lesson_id, &HashMap::new()),
        Err(Book2CourseError::AccessDenied)
    ));
    assert!(matches!(
        f.library.lesson_detail("alice", Uuid::new_v4()),
        Err(Book2CourseError::LessonNotFound(_))
    ));
    assert!(matches!(
        f.library.delete_item("bob", course_id).await,
        Err(Book2CourseError::BookNotFound(_))
    ));
    assert!(f.library.list_courses("bob").is_empty());
}

#[tokio::test]
async fn book_flow_with_chapter_selection() {
    let f = fixture().await;
    f.library.grant_credits("alice", 10).unwrap();

    let receipt = f
        .library
        .upload("alice", "rust.pdf", pdf_bytes(), UploadType::Book)
        .await
        .unwrap();
    assert_eq!(receipt.status, BookStatus::PendingSelection);
    assert_eq!(
        receipt.message,
        "Book uploaded (5 credits used). Please select chapters to process."
    );
    assert_eq!(f.library.usage("alice").credits, 8);

    let pending = f.library.list_courses("alice");
    assert_eq!(pending[0].description, "Click to select chapters for your course.");
    assert_eq!(pending[0].queue_position, None);

    let toc = f.library.book_toc("alice", receipt.book_id).await.unwrap();
    assert_eq!(toc.toc.method, TocMethod::Metadata);
    assert_eq!(toc.toc.chapters.len(), 2);

    // Nothing to process until chapters are chosen.
    assert_eq!(f.library.worker().drain().await.unwrap(), 0);

    let selection = vec![toc.toc.chapters[1].to_selection()];
    let queued = f
        .library
        .process_book("alice", receipt.book_id, Some(selection))
        .unwrap();
    assert_eq!(queued.status, BookStatus::Queued);
    assert!(!queued.process_full);
    assert_eq!(queued.summary.as_ref().unwrap().count, 1);
    assert_eq!(queued.summary.as_ref().unwrap().total_pages, 4);

    let listed = f.library.list_courses("alice");
    assert_eq!(listed[0].queue_position, Some(1));
    assert_eq!(listed[0].description, "Your book is being processed by our AI...");

    assert_eq!(f.library.worker().drain().await.unwrap(), 1);
    let summary_prompt = &f.backend.prompts(Stage::Summary)[0];
    assert!(summary_prompt.contains("Page 5."));
    assert!(!summary_prompt.contains("Page 2."));

    let err = f
        .library
        .process_book("alice", receipt.book_id, None)
        .unwrap_err();
    assert!(matches!(err, Book2CourseError::InvalidStatus { .. }), "{err:?}");
}

#[tokio::test]
async fn invalid_selection_is_rejected() {
    let f = fixture().await;
    f.library.grant_credits("alice", 10).unwrap();
    let receipt = f
        .library
        .upload("alice", "rust.pdf", pdf_bytes(), UploadType::Book)
        .await
        .unwrap();

    let err = f
        .library
        .process_book("alice", receipt.book_id, Some(vec![ChapterSelection::new(7, 3)]))
        .unwrap_err();
    assert!(matches!(err, Book2CourseError::InvalidInput { .. }), "{err:?}");
    let book = f.library.book("alice", receipt.book_id).unwrap();
    assert_eq!(book.status, BookStatus::PendingSelection);
}

#[tokio::test]
async fn failed_processing_marks_book_error() {
    let f = fixture().await;
    f.backend.fail(Stage::Lesson);
    let receipt = f
        .library
        .upload("alice", "notes.pdf", pdf_bytes(), UploadType::Notes)
        .await
        .unwrap();

    assert_eq!(f.library.worker().drain().await.unwrap(), 1);

    let book = f.library.book("alice", receipt.book_id).unwrap();
    assert_eq!(book.status, BookStatus::Error);
    let step = book.processing_step.unwrap();
    assert!(step.starts_with("Error: "), "{step}");
    assert!(step.chars().count() <= "Error: ".len() + 100);
    assert!(f.library.catalog().course_for_book(receipt.book_id).is_none());

    // Error books can be queued again.
    let again = f.library.process_book("alice", receipt.book_id, None).unwrap();
    assert!(again.process_full);
}

#[tokio::test]
async fn delete_course_removes_book_and_blob() {
    let f = fixture().await;
    let (book_id, course_id) = ready_course(&f, "alice").await;
    let blob_key = f.library.book("alice", book_id).unwrap().blob_key;
    let blobs_root = f._dir.path().join("blobs");
    assert!(blobs_root.join(&blob_key).exists());

    f.library.delete_item("alice", course_id).await.unwrap();

    assert!(f.library.list_courses("alice").is_empty());
    assert!(f.library.catalog().course(course_id).is_none());
    assert!(!f.library.catalog().book_exists(book_id));
    assert!(!blobs_root.join(&blob_key).exists());
    assert_eq!(f.library.stats().lessons, 0);
}

#[tokio::test]
async fn reprocess_replaces_the_course() {
    let f = fixture().await;
    let (book_id, first_course) = ready_course(&f, "alice").await;

    f.library.reprocess_book(book_id).unwrap();
    let book = f.library.book("alice", book_id).unwrap();
    assert_eq!(book.status, BookStatus::Queued);
    assert_eq!(book.processing_step.as_deref(), Some("Queued for reprocessing"));
    assert!(f.library.catalog().course(first_course).is_none());

    assert_eq!(f.library.worker().drain().await.unwrap(), 1);
    let second = f.library.catalog().course_for_book(book_id).unwrap();
    assert_ne!(second.id, first_course);
    assert_eq!(f.library.stats().courses, 1);

    assert!(matches!(
        f.library.reprocess_book(Uuid::new_v4()),
        Err(Book2CourseError::BookNotFound(_))
    ));
}

#[tokio::test]
async fn repair_unpacks_nested_lessons() {
    let f = fixture().await;
    let (_, course_id) = ready_course(&f, "alice").await;
    let target = f.library.catalog().course_lesson_ids(course_id)[0];

    f.library
        .catalog()
        .update_lessons(|lesson| {
            if lesson.id != target {
                return false;
            }
            lesson.content.explanation =
                r#"{"explanation": "Unpacked body", "summary": "ignored"}"#.to_string();
            true
        })
        .unwrap();

    let report = f.library.repair_lessons().unwrap();
    assert_eq!(report.total_checked, 3);
    assert_eq!(report.fixed_count, 1);
    let lesson = f.library.catalog().lesson(target).unwrap();
    assert_eq!(lesson.content.explanation, "Unpacked body");
    assert_eq!(lesson.content.summary, "Ownership decides when memory is freed.");

    assert_eq!(f.library.repair_lessons().unwrap().fixed_count, 0);
}

#[tokio::test]
async fn subscription_quotas_gate_uploads() {
    let f = fixture_with(BillingModel::Subscription, None).await;

    let err = f
        .library
        .upload("alice", "book.pdf", pdf_bytes(), UploadType::Book)
        .await
        .unwrap_err();
    match err {
        Book2CourseError::UploadNotAllowed { reason } => {
            assert_eq!(reason, "Book uploads require a Basic or Pro subscription");
        }
        other => panic!("expected UploadNotAllowed, got {other:?}"),
    }

    for _ in 0..2 {
        let r = f
            .library
            .upload("alice", "notes.pdf", pdf_bytes(), UploadType::Notes)
            .await
            .unwrap();
        assert_eq!(r.credits_used, 0);
        assert_eq!(f.library.book("alice", r.book_id).unwrap().tier, Tier::Free);
    }
    let err = f
        .library
        .upload("alice", "notes.pdf", pdf_bytes(), UploadType::Notes)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Monthly notes limit reached (2/2). Upgrade for more."
    );

    f.library.set_subscription("alice", Tier::Basic, true).unwrap();
    let r = f
        .library
        .upload("alice", "book.pdf", pdf_bytes(), UploadType::Book)
        .await
        .unwrap();
    assert_eq!(f.library.book("alice", r.book_id).unwrap().tier, Tier::Basic);
    assert_eq!(f.library.usage("alice").tier, Tier::Basic);
}

#[tokio::test]
async fn catalog_snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let catalog = Arc::new(Catalog::open(&path).unwrap());
    let f = fixture_with(BillingModel::Credits, Some(catalog)).await;
    let (book_id, course_id) = ready_course(&f, "alice").await;

    let reopened = Catalog::open(&path).unwrap();
    assert_eq!(reopened.book(book_id).unwrap().status, BookStatus::Ready);
    assert_eq!(reopened.course(course_id).unwrap().title, "The Rust Book");
    assert_eq!(reopened.course_lesson_ids(course_id).len(), 3);
    assert_eq!(reopened.account("alice", 3).credits, 2);
}

#[tokio::test]
async fn background_worker_picks_up_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::course(6);
    let blobs = BlobStore::new(dir.path().join("blobs")).await.unwrap();
    let library = Library::builder(
        Arc::new(Catalog::in_memory()),
        blobs,
        test_config(backend, Tier::Free),
    )
    .reader(Arc::new(StubReader { doc: sample_doc() }))
    .poll_interval(Duration::from_millis(20))
    .build();

    let receipt = library
        .upload("alice", "notes.pdf", pdf_bytes(), UploadType::Notes)
        .await
        .unwrap();
    assert!(library.worker().is_running());

    let ready = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if library.book("alice", receipt.book_id).unwrap().status == BookStatus::Ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "book was not processed in time");

    library.worker().shutdown().await;
    assert!(!library.worker().is_running());
}

/// A catalog whose snapshot directory has been replaced by a plain file, so
/// every write after setup fails.
fn break_snapshot(dir: &std::path::Path) {
    std::fs::remove_dir_all(dir).unwrap();
    std::fs::write(dir, b"not a directory").unwrap();
}

#[tokio::test]
async fn upload_is_not_charged_when_catalog_write_fails() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let catalog = Arc::new(Catalog::open(data.join("catalog.json")).unwrap());
    let f = fixture_with(BillingModel::Credits, Some(catalog)).await;
    f.library.grant_credits("alice", 0).unwrap();
    break_snapshot(&data);

    let err = f
        .library
        .upload("alice", "notes.pdf", pdf_bytes(), UploadType::Notes)
        .await
        .unwrap_err();
    assert!(matches!(err, Book2CourseError::Storage { .. }), "{err:?}");
    assert_eq!(f.library.usage("alice").credits, 3);
    assert!(f.library.list_courses("alice").is_empty());
}

#[tokio::test]
async fn unrecordable_failure_is_not_retried_forever() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let catalog = Arc::new(Catalog::open(data.join("catalog.json")).unwrap());
    let f = fixture_with(BillingModel::Credits, Some(catalog)).await;
    let receipt = f
        .library
        .upload("alice", "notes.pdf", pdf_bytes(), UploadType::Notes)
        .await
        .unwrap();
    break_snapshot(&data);

    assert_eq!(f.library.worker().drain().await.unwrap(), 1);
    assert_eq!(f.library.worker().drain().await.unwrap(), 0);
    let book = f.library.book("alice", receipt.book_id).unwrap();
    assert_eq!(book.status, BookStatus::Queued);
    assert_eq!(f.backend.calls(Stage::Summary), 0);
}
