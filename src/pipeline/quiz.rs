//! Tiered quizzes: basic (4 MCQs) for free users, full (7 MCQs plus short
//! answers) for paid tiers.
//!
//! Quiz generation never fails a course. Backend errors and unusable replies
//! are retried once, then a single-question fallback quiz is used.

use super::json::{as_index, extract_object, is_placeholder_option, str_field};
use super::llm::{CompletionRequest, LlmClient, Stage};
use super::Staged;
use crate::config::{CourseConfig, QuizDepth};
use crate::error::StageWarning;
use crate::output::{CognitiveLevel, LessonContent, McqQuestion, QuizItem, ShortAnswerQuestion};
use crate::prompts;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const QUIZ_ATTEMPTS: usize = 2;

/// Minimum question length, in characters, for an MCQ to be kept.
const MIN_QUESTION_CHARS: usize = 10;

/// Generate the quiz for one lesson.
pub async fn generate_quiz(
    llm: &LlmClient,
    config: &CourseConfig,
    depth: QuizDepth,
    title: &str,
    content: &LessonContent,
    source: &str,
) -> Staged<Vec<QuizItem>> {
    let context = prompts::quiz_context(content);
    let prompt = match depth {
        QuizDepth::Basic => prompts::quiz_prompt_basic(title, &context),
        QuizDepth::Full => prompts::quiz_prompt_full(title, &context, source),
    };
    let request = CompletionRequest::new(Stage::Quiz, prompt)
        .system(prompts::SYSTEM_PROMPT)
        .temperature(config.temperature)
        .max_tokens(config.lesson_max_tokens);

    let mut detail = String::new();
    for attempt in 1..=QUIZ_ATTEMPTS {
        let reply = match llm.complete(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Quiz for '{}' failed (attempt {}): {}", title, attempt, e);
                detail = e.to_string();
                continue;
            }
        };
        match extract_object(&reply) {
            Ok(map) => {
                let items = parse_quiz(&map);
                if !items.is_empty() {
                    debug!("Quiz for '{}': {} items", title, items.len());
                    return Staged::ok(items);
                }
                warn!("Quiz for '{}' had no valid questions (attempt {})", title, attempt);
                detail = "no valid questions".to_string();
            }
            Err(e) => {
                warn!("Quiz for '{}' unparsable (attempt {}): {}", title, attempt, e);
                detail = e.to_string();
            }
        }
    }

    Staged::degraded(
        fallback_quiz(title),
        StageWarning::QuizFallback {
            lesson: title.to_string(),
            detail,
        },
    )
}

/// Valid MCQs followed by every short-answer question.
pub fn parse_quiz(map: &Map<String, Value>) -> Vec<QuizItem> {
    let mut items: Vec<QuizItem> = Vec::new();

    if let Some(Value::Array(questions)) = map.get("questions") {
        for (i, q) in questions.iter().enumerate() {
            let Some(q) = q.as_object() else { continue };
            // Short answers occasionally arrive in the questions list.
            if q.get("type").and_then(Value::as_str) == Some("short_answer") {
                items.push(QuizItem::ShortAnswer(parse_short_answer(i, q)));
                continue;
            }
            match parse_mcq(i, q) {
                Some(mcq) => items.push(QuizItem::Mcq(mcq)),
                None => debug!(
                    "Skipping invalid question: {}",
                    str_field(q, "question").chars().take(50).collect::<String>()
                ),
            }
        }
    }

    if let Some(Value::Array(short)) = map.get("short_answer") {
        for (i, sa) in short.iter().enumerate() {
            if let Some(sa) = sa.as_object() {
                items.push(QuizItem::ShortAnswer(parse_short_answer(i, sa)));
            }
        }
    }

    items
}

fn parse_mcq(index: usize, q: &Map<String, Value>) -> Option<McqQuestion> {
    let options: Vec<String> = match q.get("options") {
        Some(Value::Array(opts)) => opts
            .iter()
            .map(|o| match o {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => return None,
    };
    if options.is_empty() || options.iter().all(|o| is_placeholder_option(o)) {
        return None;
    }

    let question = str_field(q, "question");
    if question.trim().chars().count() <= MIN_QUESTION_CHARS {
        return None;
    }

    let correct = q.get("correctAnswer").and_then(as_index)?;
    if correct < 0 || correct as usize >= options.len() {
        return None;
    }

    let question_type = q
        .get("question_type")
        .and_then(Value::as_str)
        .and_then(CognitiveLevel::parse);
    let difficulty = q
        .get("difficulty")
        .and_then(as_index)
        .map(|d| d.clamp(1, 4) as u8)
        .or_else(|| question_type.map(CognitiveLevel::difficulty));
    let explanation = Some(str_field(q, "explanation")).filter(|e| !e.trim().is_empty());
    let id = Some(str_field(q, "id"))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("q{}", index + 1));

    Some(McqQuestion {
        id,
        question,
        options,
        correct_answer: correct as usize,
        difficulty,
        question_type,
        explanation,
    })
}

fn parse_short_answer(index: usize, sa: &Map<String, Value>) -> ShortAnswerQuestion {
    let id = Some(str_field(sa, "id"))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("sa{}", index + 1));
    ShortAnswerQuestion {
        id,
        question: str_field(sa, "question"),
        sample_answer: str_field(sa, "sampleAnswer"),
    }
}

/// One recall question about the lesson itself.
pub fn fallback_quiz(title: &str) -> Vec<QuizItem> {
    let subject = title.split_whitespace().next().unwrap_or("this topic");
    vec![QuizItem::Mcq(McqQuestion {
        id: "q1".to_string(),
        question: format!("What is the main focus of the lesson '{title}'?"),
        options: vec![
            format!("A) Understanding the core concepts of {subject}"),
            "B) Learning unrelated historical facts".to_string(),
            "C) Practicing advanced mathematics only".to_string(),
            "D) None of the above".to_string(),
        ],
        correct_answer: 0,
        difficulty: Some(1),
        question_type: Some(CognitiveLevel::Recall),
        explanation: Some(format!(
            "This lesson focuses on {title}, covering its key concepts and applications."
        )),
    })]
}
