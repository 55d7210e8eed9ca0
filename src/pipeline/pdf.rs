//! PDF text extraction via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound. Loading and walking a document runs on the blocking
//! pool so the Tokio workers driving concurrent LLM calls never stall.
//!
//! Everything after extraction works on the owned [`PdfText`] snapshot, so
//! chapter selection, title inference and TOC detection are plain functions
//! that tests can drive without a pdfium binary. The [`DocumentReader`] trait
//! is the seam.

use crate::config::ChapterSelection;
use crate::error::Book2CourseError;
use crate::output::DocumentMetadata;
use futures::future::BoxFuture;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Outline depth kept when walking bookmarks; deeper entries are never used.
const MAX_OUTLINE_LEVEL: u8 = 2;

/// One bookmark from the document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    /// 1 for top-level entries.
    pub level: u8,
    pub title: String,
    /// 1-indexed page the bookmark points at.
    pub page: usize,
}

impl OutlineEntry {
    pub fn new(level: u8, title: impl Into<String>, page: usize) -> Self {
        Self {
            level,
            title: title.into(),
            page,
        }
    }
}

/// Everything extracted from a PDF: page text, metadata and outline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfText {
    /// Text of each page, in page order.
    pub pages: Vec<String>,
    pub metadata: DocumentMetadata,
    pub outline: Vec<OutlineEntry>,
}

impl PdfText {
    /// Build from page text alone (no metadata or outline).
    pub fn from_pages(pages: Vec<String>) -> Self {
        let page_count = pages.len();
        Self {
            pages,
            metadata: DocumentMetadata {
                page_count,
                ..Default::default()
            },
            outline: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn has_text(&self) -> bool {
        self.pages.iter().any(|p| !p.trim().is_empty())
    }

    /// Non-empty pages joined by blank lines.
    pub fn full_text(&self) -> String {
        join_pages(self.pages.iter().map(String::as_str))
    }

    /// Text of the selected chapters, in selection order.
    ///
    /// Page ranges are 1-indexed and inclusive, clamped into the document.
    /// An empty selection means the whole book.
    pub fn text_for_chapters(&self, selections: &[ChapterSelection]) -> String {
        if selections.is_empty() {
            return self.full_text();
        }
        let total = self.pages.len();
        join_pages(
            selections
                .iter()
                .flat_map(|s| s.to_indices(total))
                .map(|i| self.pages[i].as_str()),
        )
    }

    /// The first `n` non-empty pages, each prefixed with `--- Page k ---`.
    pub fn first_pages_text(&self, n: usize) -> String {
        self.pages
            .iter()
            .take(n)
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| format!("--- Page {} ---\n{}", i + 1, text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Best-effort human title for the document.
    ///
    /// Uses the metadata title unless it is missing or generic, then the first
    /// title-like line of page 1, then `file_stem`, then `"Untitled"`.
    pub fn infer_title(&self, file_stem: Option<&str>) -> String {
        let mut title = String::from("Untitled");

        if let Some(ref meta) = self.metadata.title {
            let t = meta.trim();
            if !t.is_empty() && !t.eq_ignore_ascii_case("untitled") {
                title = match t.len().checked_sub(4) {
                    Some(cut)
                        if t.is_char_boundary(cut) && t[cut..].eq_ignore_ascii_case(".pdf") =>
                    {
                        t[..cut].to_string()
                    }
                    _ => t.to_string(),
                };
            }
        }

        if matches!(
            title.as_str(),
            "Untitled" | "" | "Microsoft Word" | "Document"
        ) {
            if let Some(found) = self.pages.first().and_then(|p| title_from_first_page(p)) {
                title = found;
            }
        }

        if matches!(title.as_str(), "Untitled" | "") {
            if let Some(stem) = file_stem.map(str::trim).filter(|s| !s.is_empty()) {
                title = stem.to_string();
            }
        }

        title
    }
}

fn join_pages<'a>(pages: impl Iterator<Item = &'a str>) -> String {
    pages
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

const NON_TITLE_MARKERS: &[&str] = &[
    "page",
    "chapter",
    "table of contents",
    "copyright",
    "all rights reserved",
    "isbn",
    "www.",
    "http",
    "edition",
    "published",
    "printed",
];

/// Pick a title-looking line from the top of the first page.
fn title_from_first_page(text: &str) -> Option<String> {
    let candidates: Vec<&str> = text
        .trim()
        .lines()
        .take(10)
        .map(str::trim)
        .filter(|l| {
            let n = l.chars().count();
            n > 5 && n < 150
        })
        .collect();

    candidates.into_iter().take(5).find_map(|line| {
        let lower = line.to_lowercase();
        if NON_TITLE_MARKERS.iter().any(|m| lower.contains(m)) {
            return None;
        }
        let len = line.chars().count();
        let alpha = line
            .chars()
            .filter(|c| c.is_alphabetic() || c.is_whitespace())
            .count();
        let ratio = alpha as f64 / len.max(1) as f64;
        (ratio > 0.7 && len > 10 && len < 100).then(|| line.to_string())
    })
}

/// Minutes needed to read `text` at `words_per_minute`, at least 1.
pub fn estimate_reading_time(text: &str, words_per_minute: usize) -> usize {
    let words = text.split_whitespace().count();
    (words / words_per_minute.max(1)).max(1)
}

// ── Readers ──────────────────────────────────────────────────────────────

/// Turns PDF bytes into a [`PdfText`].
pub trait DocumentReader: Send + Sync {
    /// `name` is only used in error messages.
    fn read<'a>(
        &'a self,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<PdfText, Book2CourseError>>;
}

/// Production reader backed by pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumReader;

impl DocumentReader for PdfiumReader {
    fn read<'a>(
        &'a self,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<PdfText, Book2CourseError>> {
        Box::pin(async move {
            let owned_name = name.to_string();
            tokio::task::spawn_blocking(move || read_blocking(&owned_name, &bytes))
                .await
                .map_err(|e| {
                    Book2CourseError::Internal(format!("Extraction task panicked: {}", e))
                })?
        })
    }
}

fn read_blocking(name: &str, bytes: &[u8]) -> Result<PdfText, Book2CourseError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| Book2CourseError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.to_lowercase().contains("password") {
            Book2CourseError::PasswordRequired {
                name: name.to_string(),
            }
        } else {
            Book2CourseError::CorruptPdf {
                name: name.to_string(),
                detail,
            }
        }
    })?;

    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let text = match page.text() {
            Ok(t) => t.all(),
            Err(e) => {
                debug!("Page {}: no text layer ({:?})", idx + 1, e);
                String::new()
            }
        };
        pages.push(text);
    }
    info!("{}: extracted text from {} pages", name, pages.len());

    let meta = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        meta.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let metadata = DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count: pages.len(),
        pdf_version: format!("{:?}", document.version()),
    };

    let mut outline = Vec::new();
    if let Some(root) = document.bookmarks().root() {
        collect_bookmarks(Some(root), 1, &mut outline);
    }
    debug!("{}: {} outline entries", name, outline.len());

    Ok(PdfText {
        pages,
        metadata,
        outline,
    })
}

/// Walk a bookmark level and its children, depth-first, in document order.
fn collect_bookmarks(first: Option<PdfBookmark<'_>>, level: u8, out: &mut Vec<OutlineEntry>) {
    let mut current = first;
    while let Some(bookmark) = current {
        let page = bookmark
            .destination()
            .and_then(|d| d.page_index().ok())
            .map(|idx| idx as usize + 1);
        if let (Some(title), Some(page)) = (bookmark.title(), page) {
            out.push(OutlineEntry::new(level, title.trim(), page));
        }
        if level < MAX_OUTLINE_LEVEL {
            collect_bookmarks(bookmark.first_child(), level + 1, out);
        }
        current = bookmark.next_sibling();
    }
}
