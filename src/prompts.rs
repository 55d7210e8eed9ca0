//! Prompts for every LLM stage of course generation.
//!
//! All prompt text lives here so wording changes never touch the retry,
//! parsing or fallback logic in [`crate::pipeline`], and so tests can inspect
//! prompts without a model. Every prompt asks for a single JSON object; the
//! shapes shown in the prompts are the shapes [`crate::output`] deserializes.

use crate::output::{BookOverview, LessonContent};
use crate::pipeline::json::truncate_chars;

/// System message sent with every generation request.
pub const SYSTEM_PROMPT: &str = "You are an expert instructional designer who turns books \
into clear, well-structured online courses. Always answer with a single valid JSON object \
and nothing else.";

/// Source text per lesson prompt, in characters.
pub const LESSON_SOURCE_CHARS: usize = 15_000;

/// Joined summaries sent to quality detection, in characters.
pub const QUALITY_INPUT_CHARS: usize = 12_000;

/// First-pages text sent to TOC extraction, in characters.
pub const TOC_INPUT_CHARS: usize = 18_000;

pub fn summary_prompt(chunk: &str) -> String {
    format!(
        r#"Analyze this section of a book and extract:
1. The main topics it covers (3-5 topics)
2. The key concepts it introduces (3-7 concepts)
3. A concise summary (2-3 paragraphs)

Text:
{chunk}

Respond in JSON:
{{
  "topics": ["topic1", "topic2"],
  "concepts": ["concept1", "concept2"],
  "summary": "Your summary here..."
}}"#
    )
}

pub fn quality_prompt(joined_summaries: &str) -> String {
    let input = truncate_chars(joined_summaries, QUALITY_INPUT_CHARS);
    format!(
        r#"Analyze these section summaries and rate the source material:

{input}

Score each criterion from 1 to 10:
1. SPECIFICITY: concrete details, steps and examples, or vague advice?
2. TECHNICAL_DEPTH: comprehensive and detailed, or surface-level?
3. ACTIONABILITY: tells you exactly what to do, or only theory?

Return:
{{
  "specificity_score": <1-10>,
  "technical_depth_score": <1-10>,
  "actionability_score": <1-10>,
  "average_score": <average of the three>,
  "mode": "<ENHANCE or PRESERVE>",
  "reasoning": "<one sentence>"
}}

Rules:
- average >= 7: mode = "PRESERVE" (the content is good, keep it as it is)
- average < 7: mode = "ENHANCE" (the content needs improvement)"#
    )
}

pub fn overview_prompt(summaries: &str, topics: &[String], concepts: &[String]) -> String {
    format!(
        r#"Based on these section summaries from a book, create a unified overview of the book.

Section summaries:
{summaries}

All topics found: {topics}
All concepts found: {concepts}

Respond in JSON:
{{
  "title": "Book title inferred from the content",
  "main_themes": ["theme1", "theme2"],
  "key_concepts": ["concept1", "concept2"],
  "target_audience": "Who this book is for",
  "learning_objectives": ["objective1", "objective2"]
}}"#,
        topics = topics.join(", "),
        concepts = concepts.join(", "),
    )
}

pub fn structure_prompt(overview: &BookOverview, section_count: usize) -> String {
    format!(
        r#"Create a course structure for a book with these characteristics:

Title: {title}
Main themes: {themes}
Key concepts: {concepts}
Learning objectives: {objectives}

The book has {section_count} sections, numbered 0 to {last}.

Create 4-8 chapters with 2-5 lessons each. Each chapter should group related themes.
For every lesson, list the section numbers its content comes from.

Respond in JSON:
{{
  "chapters": [
    {{
      "title": "Chapter title",
      "description": "Short chapter description",
      "lessons": [
        {{
          "title": "Lesson title",
          "topics_to_cover": ["topic1", "topic2"],
          "source_chunk_indices": [0, 1]
        }}
      ]
    }}
  ]
}}

Lessons should flow logically and build on each other."#,
        title = if overview.title.is_empty() { "Unknown" } else { overview.title.as_str() },
        themes = overview.main_themes.join(", "),
        concepts = overview.key_concepts.join(", "),
        objectives = overview.learning_objectives.join(", "),
        last = section_count.saturating_sub(1),
    )
}

pub fn lesson_prompt_preserve(title: &str, topics: &[String], source: &str) -> String {
    format!(
        r#"You are writing a lesson from HIGH-QUALITY source material. Keep its accuracy and structure; do not add content of your own.

Lesson: {title}
Topics to cover: {topics}
Source content: {source}

Return this lesson as JSON:
{{
  "introduction": "What this lesson covers (2-3 sentences, faithful to the source)",
  "explanation": "The main content in 3-5 paragraphs. Keep the source's terminology, examples and technical depth.",
  "key_concepts": [
    {{"term": "concept name", "definition": "definition taken from the source"}}
  ],
  "examples": [
    {{"title": "Example title", "content": "example from the source material"}}
  ],
  "keyPoints": [
    {{"title": "Key takeaway", "description": "What it means"}},
    {{"title": "Another key point", "description": "What it means"}},
    {{"title": "Third key point", "description": "What it means"}}
  ],
  "summary": "What was learned (2-3 sentences)",
  "before_you_move_on": [
    "Make sure you can explain X in your own words",
    "Make sure you understand why Y matters",
    "Make sure you can do Z without looking"
  ]
}}

IMPORTANT:
- Return ONLY the JSON object
- Do NOT add examples or facts that are not in the source
- Do NOT simplify technical content
- Every keyPoint needs both a title and a description"#,
        topics = topics.join(", "),
        source = truncate_chars(source, LESSON_SOURCE_CHARS),
    )
}

pub fn lesson_prompt_enhance(title: &str, topics: &[String], source: &str) -> String {
    format!(
        r#"You are writing a lesson from GENERIC source material that needs improvement. Add concrete examples, specific advice and practical value.

Lesson: {title}
Topics to cover: {topics}
Source content: {source}

Return this lesson as JSON:
{{
  "introduction": "An engaging intro that says why this matters (2-3 sentences)",
  "explanation": "The main content in 3-5 paragraphs. Make vague advice specific, add real-world examples where there are none, say exactly HOW to do what the source says to do, and cut filler.",
  "key_concepts": [
    {{"term": "concept name", "definition": "clear, practical definition"}}
  ],
  "examples": [
    {{"title": "Concrete example", "content": "A specific scenario with details"}},
    {{"title": "Another example", "content": "A real-world application"}}
  ],
  "common_mistakes": [
    {{"mistake": "What people typically get wrong", "correction": "The right approach"}}
  ],
  "actionable_steps": [
    {{"step": "A specific action", "details": "How to do it concretely"}}
  ],
  "keyPoints": [
    {{"title": "Key takeaway", "description": "What it means"}},
    {{"title": "Another key point", "description": "What it means"}},
    {{"title": "Third key point", "description": "What it means"}}
  ],
  "summary": "What was learned (2-3 sentences)",
  "before_you_move_on": [
    "Something to check you understand",
    "Another checkpoint",
    "A third checkpoint"
  ]
}}

IMPORTANT:
- Return ONLY the JSON object
- DO add concrete examples from your own knowledge
- DO turn vague advice into specific steps
- Keep the core concepts of the source
- Every keyPoint needs both a title and a description"#,
        topics = topics.join(", "),
        source = truncate_chars(source, LESSON_SOURCE_CHARS),
    )
}

/// The lesson content as quiz context: intro, explanation (≤ 2000 chars),
/// key points and summary.
pub fn quiz_context(content: &LessonContent) -> String {
    let key_points = content
        .key_points
        .iter()
        .map(|kp| {
            if kp.description.is_empty() {
                kp.title.clone()
            } else {
                format!("{}: {}", kp.title, kp.description)
            }
        })
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "Introduction: {}\nExplanation: {}\nKey points: {}\nSummary: {}",
        content.introduction,
        truncate_chars(&content.explanation, 2000),
        key_points,
        content.summary
    )
}

const MCQ_SHAPE: &str = r#"{
      "type": "mcq",
      "difficulty": 1,
      "question_type": "recall",
      "id": "q1",
      "question": "What is X?",
      "options": ["A) ...", "B) ...", "C) ...", "D) ..."],
      "correctAnswer": 1,
      "explanation": "This is correct because..."
    }"#;

pub fn quiz_prompt_basic(title: &str, context: &str) -> String {
    format!(
        r#"Write a quiz for this lesson.

Lesson title: {title}
Lesson content:
{context}

Write exactly 4 multiple-choice questions:
- 2 RECALL questions (definitions, facts), difficulty 1, question_type "recall"
- 2 UNDERSTAND questions (compare/contrast, explain why), difficulty 2, question_type "understand"

Use ids q1 to q4. Every option must be a real answer, not a placeholder.

Respond in JSON:
{{
  "questions": [
    {MCQ_SHAPE}
  ]
}}

correctAnswer is 0-indexed (0=A, 1=B, 2=C, 3=D)."#
    )
}

pub fn quiz_prompt_full(title: &str, context: &str, source: &str) -> String {
    format!(
        r#"Write a quiz for this lesson that tests UNDERSTANDING, not only recall.

Lesson title: {title}
Lesson content:
{context}
Source material (excerpt): {source}

Write exactly 7 multiple-choice questions in tiers:
- 2 RECALL (definitions, identification), difficulty 1, question_type "recall"
- 2 UNDERSTAND (compare/contrast, relationships), difficulty 2, question_type "understand"
- 2 APPLY (realistic scenarios, "what would you do"), difficulty 3, question_type "apply"
- 1 ANALYZE (find the flaw, evaluate, critique), difficulty 4, question_type "analyze"

Also write at least one short-answer question.
Use ids q1 to q7 and sa1, sa2, ... Every option must be a real answer, not a placeholder.

Respond in JSON:
{{
  "questions": [
    {MCQ_SHAPE}
  ],
  "short_answer": [
    {{
      "type": "short_answer",
      "id": "sa1",
      "question": "Explain in your own words why X matters.",
      "sampleAnswer": "..."
    }}
  ]
}}

correctAnswer is 0-indexed (0=A, 1=B, 2=C, 3=D)."#,
        source = truncate_chars(source, 3000),
    )
}

pub fn toc_prompt(first_pages: &str) -> String {
    format!(
        r#"Extract ALL entries from this book's table of contents.

TEXT FROM THE FIRST PAGES:
{text}

Find the table of contents and extract EVERY entry with its page number.
The table of contents may span several pages; read all of it.

Formats you may see:
- "Chapter 1 Introduction 1" or "Chapter 1: Introduction ... 1"
- "1. Introduction ......... 1" or "1 Introduction 1"
- "Part I: Basics" followed by chapters
- "CHAPTER ONE" with a page number nearby
- "Introduction (p. 5)"
- "Appendix A", "Index", "Glossary", "Bibliography", "References"

Return every entry, typed "chapter" or "backmatter":
{{
  "entries": [
    {{"type": "chapter", "title": "Introduction to Databases", "start_page": 1}},
    {{"type": "chapter", "title": "Data Models", "start_page": 25}},
    {{"type": "backmatter", "title": "Appendix A: Examples", "start_page": 127}},
    {{"type": "backmatter", "title": "Index", "start_page": 145}}
  ]
}}

Rules:
- "chapter" for main content, "backmatter" for appendices, index, glossary, bibliography, references, about the author
- Remove dot leaders and page numbers from titles
- Page numbers must be integers
- Include the backmatter; it is needed to work out where the last chapter ends

If there is no clear structure, return {{"entries": null}}"#,
        text = truncate_chars(first_pages, TOC_INPUT_CHARS),
    )
}
