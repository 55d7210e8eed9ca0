//! Analysis stages: section summaries, source quality and the book overview.
//!
//! A reply that isn't JSON never fails these stages; each one has a
//! deterministic stand-in and reports a [`StageWarning`]. Backend failures
//! after retries do fail them, since nothing downstream is meaningful without
//! the summaries.

use super::json::{as_index, extract_object, str_field, str_list};
use super::llm::{CompletionRequest, LlmClient, Stage};
use super::Staged;
use crate::config::CourseConfig;
use crate::error::{Book2CourseError, StageWarning};
use crate::output::{BookOverview, ChunkSummary, QualityReport};
use crate::prompts;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{debug, warn};

fn request(stage: Stage, prompt: String, config: &CourseConfig) -> CompletionRequest {
    CompletionRequest::new(stage, prompt)
        .system(prompts::SYSTEM_PROMPT)
        .temperature(config.temperature)
        .max_tokens(config.max_tokens)
}

/// Summarise one chunk.
pub async fn summarize_chunk(
    llm: &LlmClient,
    config: &CourseConfig,
    index: usize,
    chunk: &str,
) -> Result<Staged<ChunkSummary>, Book2CourseError> {
    let reply = llm
        .complete(&request(Stage::Summary, prompts::summary_prompt(chunk), config))
        .await?;

    match extract_object(&reply) {
        Ok(map) => Ok(Staged::ok(ChunkSummary {
            topics: str_list(&map, "topics"),
            concepts: str_list(&map, "concepts"),
            summary: str_field(&map, "summary"),
        })),
        Err(e) => {
            warn!("Section {}: {}", index + 1, e);
            Ok(Staged::degraded(
                ChunkSummary {
                    topics: Vec::new(),
                    concepts: Vec::new(),
                    summary: reply,
                },
                StageWarning::SummaryUnparsed { chunk: index },
            ))
        }
    }
}

/// Summarise every chunk with up to `config.concurrency` calls in flight.
///
/// Results come back in chunk order. The first backend failure fails the
/// whole stage.
pub async fn summarize_all(
    llm: &LlmClient,
    config: &CourseConfig,
    chunks: &[String],
) -> Result<Vec<Staged<ChunkSummary>>, Book2CourseError> {
    let total = chunks.len();
    let mut results: Vec<(usize, Result<Staged<ChunkSummary>, Book2CourseError>)> =
        stream::iter(chunks.iter().enumerate().map(|(i, chunk)| async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_step(&format!("Analyzing section {} of {}...", i + 1, total));
            }
            let result = summarize_chunk(llm, config, i, chunk).await;
            if result.is_ok() {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_section_complete(i + 1, total);
                }
            }
            (i, result)
        }).collect::<Vec<_>>())
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

/// Score the source material and pick PRESERVE or ENHANCE.
///
/// The mode always follows from the clamped scores, whatever mode the model
/// itself suggested.
pub async fn detect_quality(
    llm: &LlmClient,
    config: &CourseConfig,
    summaries: &[ChunkSummary],
) -> Result<Staged<QualityReport>, Book2CourseError> {
    let joined = summaries
        .iter()
        .map(|s| s.summary.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let reply = llm
        .complete(&request(Stage::Quality, prompts::quality_prompt(&joined), config))
        .await?;

    let map = match extract_object(&reply) {
        Ok(map) => map,
        Err(e) => {
            warn!("Quality detection: {}", e);
            return Ok(Staged::degraded(
                QualityReport::unparsed(),
                StageWarning::QualityUnparsed,
            ));
        }
    };

    let score = |key: &str| map.get(key).and_then(as_index).unwrap_or(5);
    let report = QualityReport::from_scores(
        score("specificity_score"),
        score("technical_depth_score"),
        score("actionability_score"),
        str_field(&map, "reasoning"),
    );
    debug!(
        "Quality scores {}/{}/{} → {}",
        report.specificity_score,
        report.technical_depth_score,
        report.actionability_score,
        report.mode
    );
    Ok(Staged::ok(report))
}

/// Distinct values in first-seen order.
fn distinct<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|s| seen.insert(s.to_string())).cloned().collect()
}

/// Overview built from the summaries alone.
pub fn fallback_overview(summaries: &[ChunkSummary]) -> BookOverview {
    let topics = distinct(summaries.iter().flat_map(|s| s.topics.iter()));
    let concepts = distinct(summaries.iter().flat_map(|s| s.concepts.iter()));
    BookOverview {
        title: "Course from Book".to_string(),
        main_themes: topics.into_iter().take(5).collect(),
        key_concepts: concepts.into_iter().take(10).collect(),
        target_audience: "General readers".to_string(),
        learning_objectives: Vec::new(),
    }
}

/// Distil the summaries into one whole-book overview.
pub async fn generate_overview(
    llm: &LlmClient,
    config: &CourseConfig,
    summaries: &[ChunkSummary],
) -> Result<Staged<BookOverview>, Book2CourseError> {
    let text = summaries
        .iter()
        .map(|s| s.summary.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let topics = distinct(summaries.iter().flat_map(|s| s.topics.iter()));
    let concepts = distinct(summaries.iter().flat_map(|s| s.concepts.iter()));

    let reply = llm
        .complete(&request(
            Stage::Overview,
            prompts::overview_prompt(&text, &topics, &concepts),
            config,
        ))
        .await?;

    match extract_object(&reply) {
        Ok(map) => Ok(Staged::ok(BookOverview {
            title: str_field(&map, "title"),
            main_themes: str_list(&map, "main_themes"),
            key_concepts: str_list(&map, "key_concepts"),
            target_audience: str_field(&map, "target_audience"),
            learning_objectives: str_list(&map, "learning_objectives"),
        })),
        Err(e) => {
            warn!("Book overview: {}", e);
            Ok(Staged::degraded(
                fallback_overview(summaries),
                StageWarning::OverviewFallback,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(topics: &[&str], concepts: &[&str]) -> ChunkSummary {
        ChunkSummary {
            topics: topics.iter().map(|s| s.to_string()).collect(),
            concepts: concepts.iter().map(|s| s.to_string()).collect(),
            summary: String::new(),
        }
    }

    #[test]
    fn fallback_overview_dedups_in_order() {
        let s = vec![
            summary(&["a", "b", "c"], &["x"]),
            summary(&["b", "d", "e", "f", "g"], &["x", "y"]),
        ];
        let o = fallback_overview(&s);
        assert_eq!(o.title, "Course from Book");
        assert_eq!(o.main_themes, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(o.key_concepts, vec!["x", "y"]);
        assert_eq!(o.target_audience, "General readers");
        assert!(o.learning_objectives.is_empty());
    }
}
