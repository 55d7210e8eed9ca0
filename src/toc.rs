//! Table-of-contents detection for chapter selection.
//!
//! The PDF outline is tried first: it is free and exact when the publisher
//! filled it in properly. Outlines are often partial though (only front
//! matter, or one bookmark per part), so an outline is only trusted when it
//! passes [`sanity_check`]. Otherwise the first pages are sent to the model,
//! which reads the printed contents. The model's answer is used even when it
//! fails the sanity check, because there is nothing better left to try.

use crate::config::{ChapterSelection, CourseConfig};
use crate::pipeline::json::extract_object;
use crate::pipeline::llm::{CompletionRequest, LlmClient, Stage};
use crate::pipeline::pdf::{OutlineEntry, PdfText};
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Pages of text shown to the model when reading the printed contents.
const AI_TOC_PAGES: usize = 15;

const BACKMATTER_KEYWORDS: &[&str] = &[
    "appendix",
    "index",
    "glossary",
    "bibliography",
    "references",
    "about the author",
    "about author",
    "acknowledgement",
    "acknowledgment",
    "versioning",
    "changelog",
    "afterword",
    "colophon",
];

const FRONTMATTER_KEYWORDS: &[&str] = &[
    "contents",
    "table of contents",
    "preface",
    "foreword",
    "dedication",
    "copyright",
    "title page",
    "half title",
];

/// Words that make a long single section plausible.
const LONG_SECTION_WORDS: &[&str] = &["chapter", "part", "section", "unit", "module"];

/// Titles that are front or back matter for the content-ratio check.
const FRONT_BACK_KEYWORDS: &[&str] = &[
    "contents",
    "preface",
    "acknowledgement",
    "acknowledgment",
    "foreword",
    "introduction",
    "appendix",
    "index",
    "glossary",
    "bibliography",
    "references",
    "about the author",
    "dedication",
    "copyright",
];

static RE_TRAILING_PAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.\s]+\d+\s*$").unwrap());

/// How the chapters were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TocMethod {
    Metadata,
    Ai,
    None,
}

/// A chapter with its resolved page range (1-indexed, inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocChapter {
    pub level: u8,
    pub title: String,
    pub start_page: usize,
    pub end_page: usize,
    pub page_count: usize,
}

impl TocChapter {
    pub fn to_selection(&self) -> ChapterSelection {
        ChapterSelection::new(self.start_page, self.end_page).titled(self.title.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocResult {
    /// Empty when no table of contents was found.
    pub chapters: Vec<TocChapter>,
    pub total_pages: usize,
    pub method: TocMethod,
}

/// Chapter start entries plus where the back matter begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TocCandidate {
    pub entries: Vec<OutlineEntry>,
    pub backmatter_start: Option<usize>,
}

fn contains_any(title: &str, keywords: &[&str]) -> bool {
    let lower = title.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// First back-matter page that comes after the last chapter start.
fn backmatter_after(chapters: &[OutlineEntry], backmatter_pages: &[usize]) -> Option<usize> {
    let last_chapter = chapters.iter().map(|c| c.page).max()?;
    backmatter_pages
        .iter()
        .copied()
        .filter(|&p| p > last_chapter)
        .min()
}

/// Chapter candidates from the PDF outline.
///
/// Level-1 entries that are neither front nor back matter are chapters; if
/// there are none, level-2 entries are accepted too.
pub fn toc_from_outline(outline: &[OutlineEntry]) -> Option<TocCandidate> {
    let usable: Vec<&OutlineEntry> = outline
        .iter()
        .filter(|e| e.level <= 2 && !e.title.trim().is_empty())
        .collect();
    if usable.is_empty() {
        return None;
    }

    let backmatter_pages: Vec<usize> = usable
        .iter()
        .filter(|e| contains_any(&e.title, BACKMATTER_KEYWORDS))
        .map(|e| e.page)
        .collect();
    let is_content = |e: &&&OutlineEntry| {
        !contains_any(&e.title, BACKMATTER_KEYWORDS)
            && !contains_any(&e.title, FRONTMATTER_KEYWORDS)
    };

    let to_entry = |e: &&OutlineEntry| OutlineEntry::new(e.level, e.title.trim(), e.page);
    let mut chapters: Vec<OutlineEntry> = usable
        .iter()
        .filter(|e| e.level == 1)
        .filter(is_content)
        .map(to_entry)
        .collect();
    if chapters.is_empty() {
        chapters = usable.iter().filter(is_content).map(to_entry).collect();
    }
    if chapters.is_empty() {
        return None;
    }

    let backmatter_start = backmatter_after(&chapters, &backmatter_pages);
    Some(TocCandidate {
        entries: chapters,
        backmatter_start,
    })
}

/// Resolve end pages: each chapter ends where the next begins; the last one
/// ends before the back matter, or at the last page.
pub fn calculate_chapter_pages(candidate: &TocCandidate, total_pages: usize) -> Vec<TocChapter> {
    let mut sorted = candidate.entries.clone();
    sorted.sort_by_key(|e| e.page);

    let n = sorted.len();
    sorted
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let start = e.page;
            let end = if i + 1 < n {
                sorted[i + 1].page.saturating_sub(1)
            } else {
                match candidate.backmatter_start {
                    Some(bm) if bm > start => bm - 1,
                    _ => total_pages,
                }
            };
            let end = end.max(start);
            TocChapter {
                level: e.level,
                title: e.title.clone(),
                start_page: start,
                end_page: end,
                page_count: end - start + 1,
            }
        })
        .collect()
}

/// Whether a candidate looks like a complete table of contents.
pub fn sanity_check(candidate: &TocCandidate, total_pages: usize) -> Result<(), String> {
    let entries = &candidate.entries;
    if entries.is_empty() {
        return Err("No chapters found".to_string());
    }

    for ch in calculate_chapter_pages(candidate, total_pages) {
        if ch.page_count > 50 && !contains_any(&ch.title, LONG_SECTION_WORDS) {
            return Err(format!(
                "Section '{}' has {} pages - likely missing chapters",
                ch.title, ch.page_count
            ));
        }
    }

    if total_pages > 100
        && entries.len() < 5
        && !entries.iter().any(|e| contains_any(&e.title, &["chapter"]))
    {
        return Err(format!(
            "Only {} sections for {} pages - likely incomplete",
            entries.len(),
            total_pages
        ));
    }

    let content = entries
        .iter()
        .filter(|e| !contains_any(&e.title, FRONT_BACK_KEYWORDS))
        .count();
    if total_pages > 100 && content < 3 {
        return Err("Most entries are front/back matter - likely missing main chapters".to_string());
    }

    let mut sorted: Vec<&OutlineEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.page);
    for pair in sorted.windows(2) {
        let gap = pair[1].page.saturating_sub(pair[0].page);
        if gap > 80 {
            return Err(format!(
                "Large gap ({} pages) between '{}' and '{}'",
                gap, pair[0].title, pair[1].title
            ));
        }
    }

    Ok(())
}

/// Page number from an integer or any string containing digits; at least 1.
fn page_number(v: Option<&Value>) -> usize {
    let n = match v {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(1),
        Some(Value::String(s)) => {
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse::<i64>().unwrap_or(1)
        }
        _ => 1,
    };
    n.max(1) as usize
}

/// Strip trailing dot leaders and page numbers from a title.
pub fn clean_title(title: &str) -> String {
    RE_TRAILING_PAGE.replace(title, "").trim().to_string()
}

/// Read the model's `{"entries": [...]}` reply.
pub fn parse_ai_toc(reply: &str) -> Option<TocCandidate> {
    let map = extract_object(reply).ok()?;
    let entries = map.get("entries")?.as_array()?;
    if entries.is_empty() {
        return None;
    }

    let mut chapters = Vec::new();
    let mut backmatter_pages = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let Some(entry) = entry.as_object() else { continue };
        let kind = entry.get("type").and_then(Value::as_str).unwrap_or("chapter");
        let raw_title = entry
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Chapter {}", i + 1));
        let title = clean_title(&raw_title);
        let page = page_number(entry.get("start_page"));
        debug!("TOC entry {}: {} '{}' p{}", i + 1, kind, title, page);

        match kind {
            "chapter" => chapters.push(OutlineEntry::new(1, title, page)),
            "backmatter" => backmatter_pages.push(page),
            _ => {}
        }
    }

    if chapters.is_empty() {
        return None;
    }
    let backmatter_start = backmatter_after(&chapters, &backmatter_pages);
    Some(TocCandidate {
        entries: chapters,
        backmatter_start,
    })
}

async fn toc_with_ai(
    llm: &LlmClient,
    config: &CourseConfig,
    doc: &PdfText,
) -> Option<TocCandidate> {
    let text = doc.first_pages_text(AI_TOC_PAGES);
    if text.chars().count() < 100 {
        debug!("Not enough text in the first pages for AI TOC extraction");
        return None;
    }
    let request = CompletionRequest::new(Stage::Toc, prompts::toc_prompt(&text))
        .system(prompts::SYSTEM_PROMPT)
        .temperature(config.toc_temperature)
        .max_tokens(config.max_tokens);
    match llm.complete(&request).await {
        Ok(reply) => parse_ai_toc(&reply),
        Err(e) => {
            warn!("AI TOC extraction failed: {}", e);
            None
        }
    }
}

/// Find the chapters of `doc`: outline first, then the model if one is given.
pub async fn extract_toc(
    doc: &PdfText,
    llm: Option<&LlmClient>,
    config: &CourseConfig,
) -> TocResult {
    let total_pages = doc.page_count();

    if let Some(candidate) = toc_from_outline(&doc.outline) {
        match sanity_check(&candidate, total_pages) {
            Ok(()) => {
                let chapters = calculate_chapter_pages(&candidate, total_pages);
                info!("TOC from outline: {} chapters", chapters.len());
                return TocResult {
                    chapters,
                    total_pages,
                    method: TocMethod::Metadata,
                };
            }
            Err(reason) => info!("Outline TOC rejected: {}", reason),
        }
    }

    if let Some(llm) = llm {
        if let Some(candidate) = toc_with_ai(llm, config, doc).await {
            if let Err(reason) = sanity_check(&candidate, total_pages) {
                warn!("AI TOC failed sanity check: {} (using anyway)", reason);
            }
            let chapters = calculate_chapter_pages(&candidate, total_pages);
            info!("TOC from AI: {} chapters", chapters.len());
            return TocResult {
                chapters,
                total_pages,
                method: TocMethod::Ai,
            };
        }
    }

    info!("No table of contents found");
    TocResult {
        chapters: Vec::new(),
        total_pages,
        method: TocMethod::None,
    }
}

/// Totals for a chapter selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub count: usize,
    pub total_pages: usize,
    /// `(title, pages)` per selected chapter.
    pub chapters: Vec<(String, usize)>,
}

pub fn chapter_summary(selections: &[ChapterSelection]) -> ChapterSummary {
    let chapters: Vec<(String, usize)> = selections
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let title = s.title.clone().unwrap_or_else(|| format!("Chapter {}", i + 1));
            (title, s.page_count())
        })
        .collect();
    ChapterSummary {
        count: chapters.len(),
        total_pages: chapters.iter().map(|(_, p)| p).sum(),
        chapters,
    }
}
