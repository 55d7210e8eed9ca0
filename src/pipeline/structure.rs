//! Course structure: chapters and lessons, each lesson mapped to the chunks
//! it is written from.

use super::json::{as_index, extract_object, str_field, str_list, truncate_chars};
use super::llm::{CompletionRequest, LlmClient, Stage};
use super::Staged;
use crate::config::CourseConfig;
use crate::error::{Book2CourseError, StageWarning};
use crate::output::{BookOverview, ChapterOutline, ChunkSummary, CourseStructure, LessonOutline};
use crate::prompts;
use serde_json::{Map, Value};
use tracing::warn;

/// Ask the model for a chapter/lesson outline.
pub async fn generate_structure(
    llm: &LlmClient,
    config: &CourseConfig,
    overview: &BookOverview,
    summaries: &[ChunkSummary],
) -> Result<Staged<CourseStructure>, Book2CourseError> {
    let request = CompletionRequest::new(
        Stage::Structure,
        prompts::structure_prompt(overview, summaries.len()),
    )
    .system(prompts::SYSTEM_PROMPT)
    .temperature(config.temperature)
    .max_tokens(config.structure_max_tokens);
    let reply = llm.complete(&request).await?;

    let detail = match extract_object(&reply) {
        Ok(map) => {
            let structure = parse_structure(&map);
            if structure.lesson_count() > 0 {
                return Ok(Staged::ok(structure));
            }
            "no chapter had any lessons".to_string()
        }
        Err(e) => e.to_string(),
    };

    warn!("Course structure: {}; using one chapter per section", detail);
    Ok(Staged::degraded(
        fallback_structure(summaries),
        StageWarning::StructureFallback { detail },
    ))
}

/// Read `{"chapters": [...]}` leniently. Chapters without lessons are dropped.
pub fn parse_structure(map: &Map<String, Value>) -> CourseStructure {
    let chapters = match map.get("chapters") {
        Some(Value::Array(items)) => items,
        _ => return CourseStructure::default(),
    };

    let chapters = chapters
        .iter()
        .enumerate()
        .filter_map(|(ci, ch)| {
            let ch = ch.as_object()?;
            let lessons: Vec<LessonOutline> = match ch.get("lessons") {
                Some(Value::Array(ls)) => ls
                    .iter()
                    .enumerate()
                    .filter_map(|(li, l)| parse_lesson(li, l))
                    .collect(),
                _ => Vec::new(),
            };
            if lessons.is_empty() {
                return None;
            }
            let title = str_field(ch, "title");
            Some(ChapterOutline {
                title: if title.trim().is_empty() {
                    format!("Chapter {}", ci + 1)
                } else {
                    title
                },
                description: str_field(ch, "description"),
                lessons,
            })
        })
        .collect();

    CourseStructure { chapters }
}

fn parse_lesson(index: usize, value: &Value) -> Option<LessonOutline> {
    let l = match value {
        Value::Object(l) => l,
        Value::String(title) if !title.trim().is_empty() => {
            return Some(LessonOutline {
                title: title.trim().to_string(),
                topics_to_cover: Vec::new(),
                source_chunk_indices: vec![0],
            })
        }
        _ => return None,
    };

    let title = str_field(l, "title");
    let source_chunk_indices = match l.get("source_chunk_indices") {
        Some(Value::Array(raw)) => raw
            .iter()
            .filter_map(as_index)
            .filter(|i| *i >= 0)
            .map(|i| i as usize)
            .collect(),
        _ => vec![0],
    };

    Some(LessonOutline {
        title: if title.trim().is_empty() {
            format!("Lesson {}", index + 1)
        } else {
            title
        },
        topics_to_cover: str_list(l, "topics_to_cover"),
        source_chunk_indices,
    })
}

/// One chapter per summary (at most five), one lesson per topic.
pub fn fallback_structure(summaries: &[ChunkSummary]) -> CourseStructure {
    let chapters = summaries
        .iter()
        .take(5)
        .enumerate()
        .map(|(i, s)| {
            let topics: Vec<String> = if s.topics.is_empty() {
                vec!["Main Content".to_string()]
            } else {
                s.topics.iter().take(3).cloned().collect()
            };
            ChapterOutline {
                title: format!("Chapter {}", i + 1),
                description: truncate_chars(&s.summary, 200).to_string(),
                lessons: topics
                    .into_iter()
                    .map(|t| LessonOutline {
                        title: t.clone(),
                        topics_to_cover: vec![t],
                        source_chunk_indices: vec![i],
                    })
                    .collect(),
            }
        })
        .collect();
    CourseStructure { chapters }
}

/// Source text for a lesson: the referenced chunks joined by blank lines.
/// Out-of-range indices are ignored.
pub fn source_text(chunks: &[String], indices: &[usize]) -> String {
    indices
        .iter()
        .filter_map(|&i| chunks.get(i))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn parse_accepts_digit_string_indices_and_fills_titles() {
        let map = obj(json!({
            "chapters": [
                {
                    "title": "Basics",
                    "description": "d",
                    "lessons": [
                        {"title": "One", "topics_to_cover": ["t"], "source_chunk_indices": ["1", 2, "x", -4]},
                        {"topics_to_cover": []},
                        {"title": "Three"}
                    ]
                },
                {"title": "Empty", "lessons": []},
                {"lessons": [{"title": "Solo", "source_chunk_indices": [0]}]}
            ]
        }));
        let s = parse_structure(&map);
        assert_eq!(s.chapters.len(), 2);
        let basics = &s.chapters[0];
        assert_eq!(basics.lessons[0].source_chunk_indices, vec![1, 2]);
        assert_eq!(basics.lessons[1].title, "Lesson 2");
        assert_eq!(basics.lessons[2].source_chunk_indices, vec![0]);
        assert_eq!(s.chapters[1].title, "Chapter 3");
        assert_eq!(s.lesson_count(), 4);
    }

    #[test]
    fn parse_without_chapters_is_empty() {
        assert_eq!(parse_structure(&obj(json!({"foo": 1}))).lesson_count(), 0);
    }

    #[test]
    fn fallback_uses_topics_or_main_content() {
        let summaries: Vec<ChunkSummary> = (0..7)
            .map(|i| ChunkSummary {
                topics: if i == 1 {
                    vec![]
                } else {
                    vec!["a".into(), "b".into(), "c".into(), "d".into()]
                },
                concepts: vec![],
                summary: "s".repeat(300),
            })
            .collect();
        let s = fallback_structure(&summaries);
        assert_eq!(s.chapters.len(), 5);
        assert_eq!(s.chapters[0].lessons.len(), 3);
        assert_eq!(s.chapters[0].description.len(), 200);
        assert_eq!(s.chapters[1].lessons[0].title, "Main Content");
        assert_eq!(s.chapters[1].lessons[0].source_chunk_indices, vec![1]);
        assert_eq!(s.chapters[4].title, "Chapter 5");
    }

    #[test]
    fn source_text_skips_out_of_range() {
        let chunks = vec!["zero".to_string(), "one".to_string()];
        assert_eq!(source_text(&chunks, &[1, 5, 0]), "one\n\nzero");
        assert_eq!(source_text(&chunks, &[9]), "");
    }
}
