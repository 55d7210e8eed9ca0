//! Shared fixtures: a backend that answers by stage and a reader that skips
//! pdfium.

#![allow(dead_code)]

use book2course::pipeline::llm::{Completion, CompletionBackend, CompletionRequest, Stage};
use book2course::pipeline::pdf::{DocumentReader, OutlineEntry, PdfText};
use book2course::{Book2CourseError, CourseConfig, Tier};
use futures::future::BoxFuture;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const SUMMARY_REPLY: &str = r#"{"topics": ["Ownership", "Borrowing"], "concepts": ["move semantics", "lifetimes"], "summary": "Rust manages memory through ownership and borrowing."}"#;

pub fn quality_reply(score: u8) -> String {
    json!({
        "specificity_score": score,
        "technical_depth_score": score,
        "actionability_score": score,
        "reasoning": "Concrete examples throughout."
    })
    .to_string()
}

pub const OVERVIEW_REPLY: &str = r#"{"title": "Model Title", "main_themes": ["Memory", "Safety", "Concurrency", "Tooling"], "key_concepts": ["ownership"], "target_audience": "Programmers", "learning_objectives": ["Write safe code"]}"#;

pub const STRUCTURE_REPLY: &str = r#"```json
{
  "chapters": [
    {
      "title": "Memory",
      "description": "How values are owned",
      "lessons": [
        {"title": "Ownership", "topics_to_cover": ["moves"], "source_chunk_indices": [0]},
        {"title": "Borrowing", "topics_to_cover": ["references"], "source_chunk_indices": [0]}
      ]
    },
    {
      "title": "Safety",
      "description": "What the compiler checks",
      "lessons": [
        {"title": "Lifetimes", "topics_to_cover": ["scopes"], "source_chunk_indices": ["0"]}
      ]
    }
  ]
}
```"#;

pub const LESSON_REPLY: &str = r#"{
  "introduction": "Every value in Rust has a single owner.",
  "explanation": "When the owner goes out of scope the value is dropped.",
  "examples": [{"title": "Move", "content": "let b = a; // a is moved"}],
  "keyPoints": [{"title": "One owner", "description": "Each value has exactly one owner."}],
  "summary": "Ownership decides when memory is freed.",
  "common_mistakes": [{"mistake": "Using a moved value", "correction": "Clone or borrow instead"}],
  "before_you_move_on": ["Can you explain a move?"]
}"#;

pub const QUIZ_REPLY: &str = r#"{
  "questions": [
    {"id": "q1", "question": "What happens to a value when its owner goes out of scope?",
     "options": ["A) It is dropped", "B) It leaks", "C) It is copied", "D) Nothing"],
     "correctAnswer": 0, "question_type": "recall"},
    {"id": "q2", "question": "Which keyword creates a shared reference to a value?",
     "options": ["A) mut", "B) &", "C) move", "D) ref mut"],
     "correctAnswer": 1, "question_type": "understand"}
  ],
  "short_answer": [
    {"question": "Why does Rust not need a garbage collector?", "sampleAnswer": "Ownership frees memory deterministically."}
  ]
}"#;

pub const TOC_REPLY: &str = r#"{"entries": [
  {"title": "Contents", "start_page": 1, "type": "frontmatter"},
  {"title": "Getting Started .......... 2", "start_page": 2, "type": "chapter"},
  {"title": "Ownership", "start_page": "p. 5", "type": "chapter"},
  {"title": "Index", "start_page": 9, "type": "backmatter"}
]}"#;

/// Answers each request from a per-stage script and records what it saw.
pub struct ScriptedBackend {
    replies: Mutex<HashMap<Stage, String>>,
    failing: Mutex<HashSet<Stage>>,
    calls: Mutex<Vec<Stage>>,
    prompts: Mutex<Vec<(Stage, String)>>,
}

impl ScriptedBackend {
    /// A backend that produces a well-formed course with quality `score`.
    pub fn course(score: u8) -> Arc<Self> {
        let replies = HashMap::from([
            (Stage::Summary, SUMMARY_REPLY.to_string()),
            (Stage::Quality, quality_reply(score)),
            (Stage::Overview, OVERVIEW_REPLY.to_string()),
            (Stage::Structure, STRUCTURE_REPLY.to_string()),
            (Stage::Lesson, LESSON_REPLY.to_string()),
            (Stage::Quiz, QUIZ_REPLY.to_string()),
            (Stage::Toc, TOC_REPLY.to_string()),
        ]);
        Arc::new(Self {
            replies: Mutex::new(replies),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn set_reply(&self, stage: Stage, reply: impl Into<String>) {
        self.replies.lock().unwrap().insert(stage, reply.into());
    }

    /// Make every call for `stage` return an error.
    pub fn fail(&self, stage: Stage) {
        self.failing.lock().unwrap().insert(stage);
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| **s == stage).count()
    }

    pub fn prompts(&self, stage: Stage) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl CompletionBackend for ScriptedBackend {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<Completion, String>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(request.stage);
            self.prompts
                .lock()
                .unwrap()
                .push((request.stage, request.prompt.clone()));
            if self.failing.lock().unwrap().contains(&request.stage) {
                return Err(format!("scripted failure for {}", request.stage));
            }
            let content = self
                .replies
                .lock()
                .unwrap()
                .get(&request.stage)
                .cloned()
                .unwrap_or_default();
            Ok(Completion {
                content,
                input_tokens: 100,
                output_tokens: 50,
            })
        })
    }
}

/// Returns the same document for every read, without touching pdfium.
pub struct StubReader {
    pub doc: PdfText,
}

impl DocumentReader for StubReader {
    fn read<'a>(
        &'a self,
        _name: &'a str,
        _bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<PdfText, Book2CourseError>> {
        let doc = self.doc.clone();
        Box::pin(async move { Ok(doc) })
    }
}

/// Ten pages of prose with a title in the metadata and a usable outline.
pub fn sample_doc() -> PdfText {
    let pages: Vec<String> = (1..=10)
        .map(|p| {
            format!(
                "Page {p}. Ownership is the central idea of Rust. Each value has an owner, \
                 and the value is dropped when the owner leaves scope. Borrowing lets code \
                 use a value without taking ownership of it."
            )
        })
        .collect();
    let mut doc = PdfText::from_pages(pages);
    doc.metadata.title = Some("The Rust Book".to_string());
    doc.outline = vec![
        OutlineEntry::new(1, "Preface", 1),
        OutlineEntry::new(1, "Getting Started", 2),
        OutlineEntry::new(1, "Ownership", 5),
        OutlineEntry::new(2, "Moves", 6),
        OutlineEntry::new(1, "Index", 9),
    ];
    doc
}

pub fn test_config(backend: Arc<ScriptedBackend>, tier: Tier) -> CourseConfig {
    CourseConfig::builder()
        .backend(backend)
        .tier(tier)
        .retry_backoff_ms(1)
        .max_retries(1)
        .build()
        .unwrap()
}

pub fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7\n% stub document\n".to_vec()
}
