//! Lesson content in PRESERVE or ENHANCE mode, with repair of common reply
//! defects and deterministic fallback content.

use super::json::{extract_object, truncate_chars};
use super::llm::{CompletionRequest, LlmClient, Stage};
use super::Staged;
use crate::config::{CourseConfig, QualityMode};
use crate::error::{Book2CourseError, StageWarning};
use crate::output::{ActionableStep, CommonMistake, Example, KeyConcept, KeyPoint, LessonContent};
use crate::prompts;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Attempts at a parsable reply before falling back.
const PARSE_ATTEMPTS: usize = 2;

/// Write one lesson.
///
/// Backend failures are fatal. Replies that cannot be parsed are retried
/// once, then replaced by [`fallback_content`].
pub async fn generate_lesson(
    llm: &LlmClient,
    config: &CourseConfig,
    mode: QualityMode,
    title: &str,
    topics: &[String],
    source: &str,
) -> Result<Staged<LessonContent>, Book2CourseError> {
    let prompt = match mode {
        QualityMode::Preserve => prompts::lesson_prompt_preserve(title, topics, source),
        QualityMode::Enhance => prompts::lesson_prompt_enhance(title, topics, source),
    };
    let request = CompletionRequest::new(Stage::Lesson, prompt)
        .system(prompts::SYSTEM_PROMPT)
        .temperature(config.temperature)
        .max_tokens(config.lesson_max_tokens);

    let mut detail = String::new();
    for attempt in 1..=PARSE_ATTEMPTS {
        let reply = llm.complete(&request).await?;
        match parse_lesson(&reply, title, topics) {
            Ok(content) => return Ok(Staged::ok(content)),
            Err(e) => {
                warn!("Lesson '{}': unusable reply (attempt {}): {}", title, attempt, e);
                detail = e;
            }
        }
    }

    debug!("Lesson '{}': using {} fallback content", title, mode);
    Ok(Staged::degraded(
        fallback_content(mode, title, topics, source),
        StageWarning::LessonFallback {
            lesson: title.to_string(),
            detail,
        },
    ))
}

/// Parse a reply into validated lesson content.
pub fn parse_lesson(reply: &str, title: &str, topics: &[String]) -> Result<LessonContent, String> {
    let mut map = extract_object(reply).map_err(|e| e.to_string())?;
    merge_nested_explanation(&mut map);
    let mut content: LessonContent =
        serde_json::from_value(Value::Object(map)).map_err(|e| e.to_string())?;
    repair(&mut content, title, topics);
    Ok(content)
}

/// Some models put the whole lesson object inside `explanation` as a string.
fn merge_nested_explanation(map: &mut Map<String, Value>) {
    let Some(nested) = map.get("explanation").and_then(nested_object) else {
        return;
    };
    let had_explanation = nested.contains_key("explanation");
    for (k, v) in nested {
        map.insert(k, v);
    }
    if !had_explanation {
        map.insert("explanation".into(), Value::String(String::new()));
    }
}

fn nested_object(v: &Value) -> Option<Map<String, Value>> {
    match v {
        Value::String(s) if s.trim_start().starts_with('{') => {
            match serde_json::from_str::<Value>(s.trim()) {
                Ok(Value::Object(nested)) => Some(nested),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_empty_value(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(_) => false,
    }
}

/// Repair a lesson stored by an older run: unpack JSON nested in
/// `explanation` (filling only empty fields) and apply [`repair`].
/// Returns whether the content changed.
pub fn repair_stored(content: &mut LessonContent, title: &str) -> bool {
    let before = content.clone();
    let explanation = Value::String(content.explanation.clone());
    if let Some(nested) = nested_object(&explanation) {
        if let Ok(Value::Object(mut map)) = serde_json::to_value(&*content) {
            let had_explanation = nested.contains_key("explanation");
            for (k, v) in nested {
                if k == "explanation" || is_empty_value(map.get(&k)) {
                    map.insert(k, v);
                }
            }
            if !had_explanation {
                map.insert("explanation".into(), Value::String(String::new()));
            }
            match serde_json::from_value(Value::Object(map)) {
                Ok(merged) => *content = merged,
                Err(e) => debug!("Lesson '{}': nested explanation not usable: {}", title, e),
            }
        }
    }
    repair(content, title, &[]);
    *content != before
}

/// Fill in the pieces lessons are most often missing.
pub fn repair(content: &mut LessonContent, title: &str, topics: &[String]) {
    if content.key_points.iter().all(KeyPoint::is_blank) {
        content.key_points = topics
            .iter()
            .take(3)
            .map(|t| {
                KeyPoint::new(
                    format!("Understanding {t}"),
                    format!("Core concepts related to {t}"),
                )
            })
            .collect();
    }
    for kp in content.key_points.iter_mut() {
        if !kp.title.trim().is_empty() && kp.description.trim().is_empty() {
            kp.description = format!("{} is one of the central ideas of {}.", kp.title, title);
        }
    }

    let intro = content.introduction.trim();
    if intro.is_empty() || intro == format!("In this lesson, we'll explore {title}.") {
        let focus = if topics.is_empty() {
            "key concepts".to_string()
        } else {
            topics.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
        };
        content.introduction = format!(
            "This lesson covers {title}, focusing on {focus}. Understanding these fundamentals \
             is essential for building a strong foundation."
        );
    }

    let summary = content.summary.trim();
    if summary.is_empty() || summary == format!("This lesson covered the key aspects of {title}.") {
        content.summary = format!(
            "In this lesson, we explored {title}. The key concepts covered will help you \
             understand and apply these principles in practice."
        );
    }
}

/// Template lesson used when the model never produced usable content.
pub fn fallback_content(
    mode: QualityMode,
    title: &str,
    topics: &[String],
    source: &str,
) -> LessonContent {
    let first3: Vec<&String> = topics.iter().take(3).collect();
    let excerpt = truncate_chars(source, 1500);

    match mode {
        QualityMode::Preserve => {
            let focus = if topics.is_empty() {
                "essential concepts".to_string()
            } else {
                topics.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
            };
            LessonContent {
                introduction: format!(
                    "This lesson covers {title}, focusing on {focus}. Understanding these \
                     fundamentals is crucial for your learning journey."
                ),
                explanation: if excerpt.is_empty() {
                    format!(
                        "In studying {title}, we explore several important concepts. The material \
                         covers foundational principles that build upon each other."
                    )
                } else {
                    format!("In studying {title}, we explore several important concepts. {excerpt}")
                },
                examples: Vec::new(),
                key_points: first3
                    .iter()
                    .map(|t| {
                        KeyPoint::new(
                            format!("Understanding {t}"),
                            format!("Master the core principles of {t}"),
                        )
                    })
                    .collect(),
                summary: format!(
                    "This lesson covered the essential aspects of {title}. Review the key \
                     concepts and ensure you understand how they connect."
                ),
                key_concepts: Some(
                    first3
                        .iter()
                        .map(|t| KeyConcept {
                            term: t.to_string(),
                            definition: format!("A fundamental concept in {title}"),
                        })
                        .collect(),
                ),
                common_mistakes: None,
                actionable_steps: None,
                before_you_move_on: Some(
                    first3
                        .iter()
                        .map(|t| format!("Make sure you understand {t}"))
                        .collect(),
                ),
            }
        }
        QualityMode::Enhance => {
            let lead = topics.first().map(String::as_str).unwrap_or(title);
            LessonContent {
                introduction: format!(
                    "This lesson covers {title}, an important topic that will help you develop \
                     practical skills. Understanding these concepts is essential for real-world \
                     applications."
                ),
                explanation: if excerpt.is_empty() {
                    format!(
                        "Let's dive into {title}. This topic encompasses several key principles \
                         that work together."
                    )
                } else {
                    format!("Let's dive into {title}. {excerpt}")
                },
                examples: vec![Example {
                    title: format!("Applying {lead}"),
                    content: "Consider how this applies in practice...".to_string(),
                }],
                key_points: first3
                    .iter()
                    .map(|t| {
                        KeyPoint::new(
                            format!("Master {t}"),
                            format!("Understanding {t} is crucial for applying these concepts"),
                        )
                    })
                    .collect(),
                summary: format!(
                    "This lesson covered {title}. Apply what you've learned through practice and \
                     review."
                ),
                key_concepts: Some(
                    first3
                        .iter()
                        .map(|t| KeyConcept {
                            term: t.to_string(),
                            definition: format!(
                                "A core concept in {title} that you need to master"
                            ),
                        })
                        .collect(),
                ),
                common_mistakes: Some(vec![CommonMistake {
                    mistake: "Rushing without understanding fundamentals".to_string(),
                    correction: "Take time to understand each concept before moving on"
                        .to_string(),
                }]),
                actionable_steps: Some(vec![ActionableStep {
                    step: format!(
                        "Practice {}",
                        topics.first().map(String::as_str).unwrap_or("the concepts")
                    ),
                    details: "Work through examples to reinforce your understanding".to_string(),
                }]),
                before_you_move_on: Some(
                    first3
                        .iter()
                        .map(|t| format!("Verify you understand {t}"))
                        .collect(),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(t: &[&str]) -> Vec<String> {
        t.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn nested_explanation_is_merged() {
        let inner = serde_json::json!({
            "introduction": "Real intro",
            "explanation": "Real body",
            "keyPoints": [{"title": "K", "description": "D"}]
        })
        .to_string();
        let reply = serde_json::json!({
            "introduction": "",
            "explanation": inner,
            "summary": "Done."
        })
        .to_string();
        let c = parse_lesson(&reply, "Borrowing", &[]).unwrap();
        assert_eq!(c.introduction, "Real intro");
        assert_eq!(c.explanation, "Real body");
        assert_eq!(c.key_points, vec![KeyPoint::new("K", "D")]);
        assert_eq!(c.summary, "Done.");
    }

    #[test]
    fn stored_lesson_keeps_existing_fields() {
        let inner = serde_json::json!({
            "introduction": "Nested intro",
            "explanation": "Nested body",
            "summary": "Nested summary"
        })
        .to_string();
        let mut content = LessonContent {
            introduction: "Kept intro".into(),
            explanation: inner,
            key_points: vec![KeyPoint::new("Lifetimes", "")],
            ..Default::default()
        };
        assert!(repair_stored(&mut content, "Borrowing"));
        assert_eq!(content.introduction, "Kept intro");
        assert_eq!(content.explanation, "Nested body");
        assert_eq!(content.summary, "Nested summary");
        assert_eq!(
            content.key_points[0].description,
            "Lifetimes is one of the central ideas of Borrowing."
        );
        assert!(!repair_stored(&mut content, "Borrowing"));
    }

    #[test]
    fn blank_key_points_are_rebuilt_from_topics() {
        let reply = r#"{"introduction": "i", "explanation": "e",
            "keyPoints": [{"title": "", "description": " "}], "summary": "s"}"#;
        let c = parse_lesson(reply, "Traits", &topics(&["generics", "dispatch", "objects", "x"]))
            .unwrap();
        assert_eq!(c.key_points.len(), 3);
        assert_eq!(c.key_points[0].title, "Understanding generics");
        assert_eq!(c.key_points[0].description, "Core concepts related to generics");
    }

    #[test]
    fn boilerplate_intro_and_summary_are_replaced() {
        let mut c = LessonContent {
            introduction: "In this lesson, we'll explore Lifetimes.".into(),
            summary: String::new(),
            key_points: vec![KeyPoint::new("Elision", "")],
            ..Default::default()
        };
        repair(&mut c, "Lifetimes", &topics(&["elision", "bounds", "variance"]));
        assert!(c
            .introduction
            .starts_with("This lesson covers Lifetimes, focusing on elision, bounds."));
        assert!(c.summary.starts_with("In this lesson, we explored Lifetimes."));
        assert_eq!(
            c.key_points[0].description,
            "Elision is one of the central ideas of Lifetimes."
        );
    }

    #[test]
    fn unparsable_reply_is_an_error() {
        assert!(parse_lesson("Sorry, no.", "T", &[]).is_err());
    }

    #[test]
    fn fallbacks_differ_by_mode() {
        let t = topics(&["alpha", "beta"]);
        let p = fallback_content(QualityMode::Preserve, "Intro", &t, "");
        assert!(p.common_mistakes.is_none());
        assert_eq!(p.key_points[1].title, "Understanding beta");
        assert!(p.explanation.ends_with("build upon each other."));

        let e = fallback_content(QualityMode::Enhance, "Intro", &t, "source words");
        assert_eq!(e.examples[0].title, "Applying alpha");
        assert_eq!(e.actionable_steps.as_ref().unwrap()[0].step, "Practice alpha");
        assert!(e.explanation.ends_with("source words"));
        assert_eq!(e.before_you_move_on.unwrap().len(), 2);
    }
}
