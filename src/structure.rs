//! LLM-assisted document structuring.
//!
//! Raw extracted text is split into word-budgeted sub-chunks along section
//! and paragraph boundaries, each sub-chunk is sent to the model with a
//! fixed structuring prompt, and the replies are parsed (via [`crate::literal`])
//! and merged into one [`StructuredDocument`]. Section order always follows
//! the original text; document type and metadata come from the first
//! sub-chunk only.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::literal::{self, Value};
use crate::llm::ChatModel;

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub section_title: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredDocument {
    pub document_type: String,
    pub metadata: BTreeMap<String, String>,
    pub sections: Vec<Section>,
}

#[derive(Debug)]
pub enum StructureError {
    /// The model's reply did not contain a parseable structure literal.
    Parse(String),
}

impl std::fmt::Display for StructureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureError::Parse(detail) => {
                write!(f, "unparseable structuring reply: {}", detail)
            }
        }
    }
}

impl std::error::Error for StructureError {}

const STRUCTURING_PROMPT: &str = r#"You are a universal document parser. Analyze the provided unstructured text and convert it into a dictionary suitable for semantic search and retrieval.

Your output must be a single dictionary literal following this schema:

{
"document_type": "<inferred type, lowercase>",
"metadata": {
    "source_name": "",
    "author": "",
    "date": "",
    "language": ""
},
"content": [
    {
    "section_title": "",
    "text": ""
    }
]
}

Rules:
1. Identify the document type (resume, invoice, contract, report, email, receipt, generic...).
2. Always fill "document_type" and "content".
3. "metadata" fields can be empty strings if not found.
4. Each logical part, heading, or paragraph should become one entry in "content".
5. Do not embed nested lists or objects inside "content" entries - keep them flat.
6. Do not invent missing information.
7. Clean extra whitespace but preserve logical line breaks.
8. Output only the dictionary literal - no commentary, markdown, or code fences.

Here is the chunk of text:
"#;

/// Whitespace word count, the coarse token estimate used throughout the
/// structurer.
fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// A heading boundary line: a short all-caps prefix terminated by a colon
/// (e.g. `EDUCATION:` or `WORK HISTORY: 2019-2024`).
fn is_heading_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((head, _)) => {
            head.len() >= 3
                && head.chars().any(|c| c.is_ascii_uppercase())
                && head.chars().all(|c| c.is_ascii_uppercase() || c == ' ')
        }
        None => false,
    }
}

/// Split the raw text at heading boundaries; the heading line starts its
/// section. Text before the first heading forms the leading section.
fn split_sections(raw_text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in raw_text.lines() {
        if is_heading_line(line) && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

/// Blank-line-delimited paragraphs.
fn split_paragraphs(section: &str) -> Vec<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in section.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

fn append_block(buf: &mut String, block: &str) {
    if !buf.is_empty() {
        buf.push_str("\n\n");
    }
    buf.push_str(block);
}

/// Split text into LLM-sized chunks without breaking sections or paragraphs.
///
/// Sections are accumulated greedily while the running word count stays at
/// or under `max_tokens`; an oversized section is re-split by paragraphs
/// under the same rule. No chunk exceeds the budget except a single
/// paragraph that cannot itself be split further, and original text order
/// is preserved across chunk boundaries.
pub fn split_text_smartly(raw_text: &str, max_tokens: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for section in split_sections(raw_text) {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }
        let section_tokens = word_count(section);
        let current_tokens = word_count(&current);

        if current_tokens + section_tokens <= max_tokens {
            append_block(&mut current, section);
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if section_tokens > max_tokens {
                for para in split_paragraphs(section) {
                    let para = para.trim();
                    if para.is_empty() {
                        continue;
                    }
                    let para_tokens = word_count(para);
                    if word_count(&current) + para_tokens <= max_tokens {
                        append_block(&mut current, para);
                    } else {
                        if !current.is_empty() {
                            chunks.push(std::mem::take(&mut current));
                        }
                        current = para.to_string();
                    }
                }
            } else {
                current = section.to_string();
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Strip code fences and an optional `name = {...}` assignment prefix from
/// a model reply, leaving the bare literal.
fn clean_reply(reply: &str) -> String {
    let mut text = reply.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // drop the fence line, including any language tag
        text = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
    }
    text = text.trim_end();
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    if !text.starts_with('{') {
        if let Some((head, tail)) = text.split_once('=') {
            let head = head.trim();
            let tail = tail.trim();
            let head_is_ident = !head.is_empty()
                && head.chars().all(|c| c.is_alphanumeric() || c == '_');
            if head_is_ident && tail.starts_with('{') && tail.ends_with('}') {
                return tail.to_string();
            }
        }
    }

    text.to_string()
}

/// Coerce a metadata value to a string; list values join with ", ".
fn metadata_string(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::List(items) => {
            let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            if parts.len() == items.len() {
                Some(parts.join(", "))
            } else {
                None
            }
        }
        Value::Map(_) => None,
    }
}

/// One parsed structuring reply before merging.
struct ParsedChunk {
    document_type: String,
    metadata: BTreeMap<String, String>,
    sections: Vec<Section>,
}

fn parse_reply(reply: &str) -> Result<ParsedChunk, StructureError> {
    let cleaned = clean_reply(reply);
    let value =
        literal::parse_literal(&cleaned).map_err(|e| StructureError::Parse(e.to_string()))?;

    if value.as_map().is_none() {
        return Err(StructureError::Parse(
            "top-level value is not an object".to_string(),
        ));
    }

    let document_type = value
        .get("document_type")
        .and_then(|v| v.as_str())
        .unwrap_or("generic")
        .to_string();

    let mut metadata = BTreeMap::new();
    if let Some(meta) = value.get("metadata").and_then(|v| v.as_map()) {
        for (key, val) in meta {
            if let Some(s) = metadata_string(val) {
                metadata.insert(key.clone(), s);
            }
        }
    }

    let mut sections = Vec::new();
    if let Some(content) = value.get("content") {
        let items = content
            .as_list()
            .ok_or_else(|| StructureError::Parse("content is not an array".to_string()))?;
        for item in items {
            if item.as_map().is_none() {
                return Err(StructureError::Parse(
                    "content entry is not an object".to_string(),
                ));
            }
            let section_title = item
                .get("section_title")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled Section")
                .to_string();
            let text = item
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            sections.push(Section {
                section_title,
                text,
            });
        }
    }

    Ok(ParsedChunk {
        document_type,
        metadata,
        sections,
    })
}

/// Structure raw text into a [`StructuredDocument`] via one LLM call per
/// sub-chunk.
///
/// Section lists concatenate in sub-chunk order; `document_type` and
/// `metadata` are taken from the first sub-chunk's reply only. A reply
/// that fails to parse aborts the whole document.
pub async fn structure_document(
    chat: &dyn ChatModel,
    raw_text: &str,
    max_tokens: usize,
) -> Result<StructuredDocument> {
    let sub_chunks = split_text_smartly(raw_text, max_tokens);

    let mut document = StructuredDocument {
        document_type: "generic".to_string(),
        ..StructuredDocument::default()
    };

    for (i, sub_chunk) in sub_chunks.iter().enumerate() {
        let prompt = format!("{}{}", STRUCTURING_PROMPT, sub_chunk);
        let reply = chat.complete(&prompt).await?;
        let parsed = parse_reply(&reply)?;

        document.sections.extend(parsed.sections);
        if i == 0 {
            document.document_type = parsed.document_type;
            document.metadata = parsed.metadata;
        }
    }

    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned replies in order.
    struct ScriptedChat {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("unexpected extra LLM call"))
        }
    }

    // ---- split_text_smartly ----

    #[test]
    fn small_text_single_chunk() {
        let chunks = split_text_smartly("just a few words here", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "just a few words here");
    }

    #[test]
    fn empty_text_no_chunks() {
        assert!(split_text_smartly("", 100).is_empty());
        assert!(split_text_smartly("   \n\n  ", 100).is_empty());
    }

    #[test]
    fn splits_at_heading_boundaries() {
        let text = "INTRO:\nfirst part words\nEDUCATION:\nsecond part words";
        let chunks = split_text_smartly(text, 4);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("INTRO:"));
        assert!(chunks[1].starts_with("EDUCATION:"));
    }

    #[test]
    fn no_chunk_exceeds_budget_except_unsplittable_paragraph() {
        let paragraphs: Vec<String> = (0..20)
            .map(|i| format!("paragraph {} with exactly six words total", i))
            .collect();
        let text = paragraphs.join("\n\n");
        let max_tokens = 15;
        let chunks = split_text_smartly(&text, max_tokens);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                word_count(chunk) <= max_tokens,
                "chunk over budget: {:?}",
                chunk
            );
        }
    }

    #[test]
    fn single_oversized_paragraph_kept_whole() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = split_text_smartly(text, 3);
        assert_eq!(chunks.len(), 1);
        assert_eq!(word_count(&chunks[0]), 10);
    }

    #[test]
    fn oversized_section_resplit_by_paragraphs() {
        let text = "BIG SECTION:\nalpha beta gamma delta\n\nepsilon zeta eta theta\n\niota kappa lambda mu";
        let chunks = split_text_smartly(text, 5);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(word_count(chunk) <= 5);
        }
    }

    #[test]
    fn order_preserved_across_chunks() {
        let text = "SECTION ONE:\naaa bbb ccc\nSECTION TWO:\nddd eee fff\nSECTION THREE:\nggg hhh iii";
        let chunks = split_text_smartly(text, 4);
        let rejoined = chunks.join("\n\n");
        let a = rejoined.find("aaa").unwrap();
        let d = rejoined.find("ddd").unwrap();
        let g = rejoined.find("ggg").unwrap();
        assert!(a < d && d < g);
    }

    // ---- clean_reply ----

    #[test]
    fn clean_reply_strips_code_fence() {
        let reply = "```python\n{'a': 'b'}\n```";
        assert_eq!(clean_reply(reply), "{'a': 'b'}");
    }

    #[test]
    fn clean_reply_strips_bare_fence() {
        let reply = "```\n{\"a\": \"b\"}\n```";
        assert_eq!(clean_reply(reply), "{\"a\": \"b\"}");
    }

    #[test]
    fn clean_reply_strips_assignment_prefix() {
        let reply = "result = {'a': 'b'}";
        assert_eq!(clean_reply(reply), "{'a': 'b'}");
    }

    #[test]
    fn clean_reply_leaves_plain_literal_alone() {
        let reply = "{'a': 'b'}";
        assert_eq!(clean_reply(reply), "{'a': 'b'}");
    }

    // ---- structure_document ----

    #[tokio::test]
    async fn merges_sections_in_order_metadata_from_first() {
        let chat = ScriptedChat::new(&[
            r#"{"document_type": "report", "metadata": {"author": "Ann"}, "content": [{"section_title": "One", "text": "first"}]}"#,
            r#"{"document_type": "invoice", "metadata": {"author": "Bob"}, "content": [{"section_title": "Two", "text": "second"}, {"section_title": "Three", "text": "third"}]}"#,
        ]);
        // Two sections over a budget of 4 words forces two sub-chunks.
        let raw = "ONE SECTION:\naaa bbb ccc\nTWO SECTION:\nddd eee fff";
        let doc = structure_document(&chat, raw, 4).await.unwrap();

        assert_eq!(doc.document_type, "report");
        assert_eq!(doc.metadata.get("author").map(String::as_str), Some("Ann"));
        let titles: Vec<&str> = doc.sections.iter().map(|s| s.section_title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two", "Three"]);
    }

    #[tokio::test]
    async fn unparseable_reply_aborts() {
        let chat = ScriptedChat::new(&["this is not a literal at all"]);
        let err = structure_document(&chat, "some text", 3000).await.unwrap_err();
        assert!(err.downcast_ref::<StructureError>().is_some());
    }

    #[tokio::test]
    async fn fenced_and_assigned_reply_accepted() {
        let chat = ScriptedChat::new(&[
            "```python\ndoc = {'document_type': 'memo', 'metadata': {}, 'content': [{'section_title': 'A', 'text': 'body'}]}\n```",
        ]);
        let doc = structure_document(&chat, "hello world", 3000).await.unwrap();
        assert_eq!(doc.document_type, "memo");
        assert_eq!(doc.sections.len(), 1);
    }

    #[tokio::test]
    async fn empty_input_makes_no_llm_calls() {
        let chat = ScriptedChat::new(&[]);
        let doc = structure_document(&chat, "", 3000).await.unwrap();
        assert_eq!(doc.document_type, "generic");
        assert!(doc.sections.is_empty());
    }
}
