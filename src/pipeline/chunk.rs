//! Split extracted book text into overlapping, paragraph-aligned chunks.
//!
//! A chunk is the unit of the summary stage: one LLM call each. Chunks are
//! built from whole paragraphs where possible and each new chunk starts with
//! the tail of the previous one, so a concept that straddles a boundary is
//! visible to both summaries. All lengths are in characters, not bytes.

use crate::pipeline::json::truncate_chars;

const SPLIT_SEPARATORS: &[&str] = &[". ", "! ", "? ", "\n", " "];

/// Split `text` into chunks of roughly `size` characters.
///
/// Paragraphs (blank-line separated) are packed greedily. When the next
/// paragraph would overflow, the current chunk is emitted and the next one
/// starts with its last `overlap` characters. A single paragraph longer than
/// `size` is cut at the last sentence end, newline or space that falls past
/// the middle of the window, or hard-cut at `size` if there is none.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let normalised = text.replace("\r\n", "\n");
    let mut chunks = Vec::new();
    let mut current = String::new();

    for raw in normalised.split("\n\n") {
        let paragraph = raw.trim();
        if paragraph.is_empty() {
            continue;
        }

        let current_len = current.chars().count();
        let para_len = paragraph.chars().count();

        if current_len + para_len <= size {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            continue;
        }

        let next = if current.is_empty() {
            paragraph.to_string()
        } else {
            push_trimmed(&mut chunks, &current);
            if overlap > 0 && current_len > overlap {
                format!("{}\n\n{}", tail_chars(&current, overlap), paragraph)
            } else {
                paragraph.to_string()
            }
        };
        current = split_long_paragraph(&next, size, &mut chunks);
    }

    push_trimmed(&mut chunks, &current);
    chunks
}

/// Emit `size`-bounded pieces of `paragraph` and return the remainder.
fn split_long_paragraph(paragraph: &str, size: usize, chunks: &mut Vec<String>) -> String {
    let mut rest = paragraph;
    while rest.chars().count() > size {
        let window = truncate_chars(rest, size);
        let mut split_at = window.len();
        for sep in SPLIT_SEPARATORS {
            if let Some(pos) = window.rfind(sep) {
                if window[..pos].chars().count() > size / 2 {
                    split_at = pos + sep.len();
                    break;
                }
            }
        }
        push_trimmed(chunks, &rest[..split_at]);
        rest = &rest[split_at..];
    }
    rest.to_string()
}

fn push_trimmed(chunks: &mut Vec<String>, s: &str) {
    let t = s.trim();
    if !t.is_empty() {
        chunks.push(t.to_string());
    }
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    match s.char_indices().nth(count - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("First paragraph.\n\nSecond paragraph.", 1000, 10);
        assert_eq!(chunks, vec!["First paragraph.\n\nSecond paragraph."]);
    }

    #[test]
    fn empty_and_blank_paragraphs_are_dropped() {
        assert!(chunk_text("", 100, 10).is_empty());
        assert!(chunk_text("\n\n   \n\n", 100, 10).is_empty());
        assert_eq!(chunk_text("\n\n  a  \n\n\n\n", 100, 0), vec!["a"]);
    }

    #[test]
    fn overflow_starts_next_chunk_with_overlap() {
        let a = "a".repeat(40);
        let b = "b".repeat(40);
        let text = format!("{a}\n\n{b}");
        let chunks = chunk_text(&text, 50, 5);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], a);
        assert_eq!(chunks[1], format!("aaaaa\n\n{b}"));
    }

    #[test]
    fn no_overlap_when_chunk_not_longer_than_overlap() {
        let text = format!("abc\n\n{}", "z".repeat(20));
        let chunks = chunk_text(&text, 20, 5);
        assert_eq!(chunks, vec!["abc".to_string(), "z".repeat(20)]);
    }

    #[test]
    fn long_paragraph_splits_on_sentence_end() {
        let text = "One two three four. Five six seven eight nine ten eleven.";
        let chunks = chunk_text(text, 30, 0);
        assert_eq!(chunks[0], "One two three four.");
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn long_paragraph_without_separators_is_hard_split() {
        let text = "x".repeat(25);
        let chunks = chunk_text(&text, 10, 0);
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn long_paragraph_after_short_one_is_split() {
        let text = format!("Intro.\n\n{}", "word ".repeat(40));
        let chunks = chunk_text(&text, 50, 10);
        assert_eq!(chunks[0], "Intro.");
        assert!(chunks.len() > 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 50), "{chunks:?}");
    }

    #[test]
    fn lengths_are_counted_in_chars() {
        let text = "é".repeat(12);
        let chunks = chunk_text(&text, 5, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 5);
        assert_eq!(chunks[2].chars().count(), 2);
    }

    #[test]
    fn tail_chars_handles_multibyte() {
        assert_eq!(tail_chars("abcdé", 2), "dé");
        assert_eq!(tail_chars("ab", 5), "ab");
    }
}
