//! Structured document → retrieval-ready chunks.
//!
//! Each call mints one fresh `doc_id`; every non-empty section becomes one
//! chunk carrying that `doc_id`, its section title, the optional shared
//! image URL, and all document-level metadata.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::structure::StructuredDocument;

/// Smallest retrievable unit of document text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// Convert a structured document into chunks. Returns the chunks and the
/// generated `doc_id` shared by all of them. Sections whose trimmed text
/// is empty are silently skipped.
pub fn chunk_document(
    doc: &StructuredDocument,
    image_url: Option<&str>,
) -> (Vec<Chunk>, String) {
    let doc_id = Uuid::new_v4().to_string();
    let mut chunks = Vec::with_capacity(doc.sections.len());

    for section in &doc.sections {
        let text = section.text.trim();
        if text.is_empty() {
            continue;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("doc_id".to_string(), doc_id.clone());
        metadata.insert("section_title".to_string(), section.section_title.clone());
        if let Some(url) = image_url {
            metadata.insert("image_url".to_string(), url.to_string());
        }
        metadata.insert("document_type".to_string(), doc.document_type.clone());
        for (key, value) in &doc.metadata {
            metadata.insert(key.clone(), value.clone());
        }

        chunks.push(Chunk {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            metadata,
        });
    }

    (chunks, doc_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::Section;
    use std::collections::HashSet;

    fn doc_with_sections(sections: Vec<(&str, &str)>) -> StructuredDocument {
        StructuredDocument {
            document_type: "report".to_string(),
            metadata: BTreeMap::from([("author".to_string(), "Ann".to_string())]),
            sections: sections
                .into_iter()
                .map(|(t, x)| Section {
                    section_title: t.to_string(),
                    text: x.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn whitespace_sections_dropped() {
        let doc = doc_with_sections(vec![
            ("Intro", "real text"),
            ("Blank", "   \n\t  "),
            ("Body", "more text"),
        ]);
        let (chunks, _) = chunk_document(&doc, None);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "real text");
        assert_eq!(chunks[1].text, "more text");
    }

    #[test]
    fn all_chunks_share_doc_id_distinct_from_chunk_ids() {
        let doc = doc_with_sections(vec![("A", "one"), ("B", "two")]);
        let (chunks, doc_id) = chunk_document(&doc, None);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.get("doc_id"), Some(&doc_id));
            assert_ne!(chunk.id, doc_id);
        }
    }

    #[test]
    fn ids_unique_across_invocations() {
        let doc = doc_with_sections(vec![("A", "one"), ("B", "two")]);
        let mut seen = HashSet::new();
        for _ in 0..10 {
            let (chunks, doc_id) = chunk_document(&doc, None);
            assert!(seen.insert(doc_id));
            for chunk in chunks {
                assert!(seen.insert(chunk.id));
            }
        }
    }

    #[test]
    fn metadata_propagates_document_fields() {
        let doc = doc_with_sections(vec![("Intro", "text")]);
        let (chunks, _) = chunk_document(&doc, Some("http://img/x.png"));
        let md = &chunks[0].metadata;
        assert_eq!(md.get("section_title").map(String::as_str), Some("Intro"));
        assert_eq!(md.get("image_url").map(String::as_str), Some("http://img/x.png"));
        assert_eq!(md.get("document_type").map(String::as_str), Some("report"));
        assert_eq!(md.get("author").map(String::as_str), Some("Ann"));
    }

    #[test]
    fn no_image_url_key_when_absent() {
        let doc = doc_with_sections(vec![("Intro", "text")]);
        let (chunks, _) = chunk_document(&doc, None);
        assert!(!chunks[0].metadata.contains_key("image_url"));
    }

    #[test]
    fn empty_document_yields_no_chunks_but_a_doc_id() {
        let doc = doc_with_sections(vec![]);
        let (chunks, doc_id) = chunk_document(&doc, None);
        assert!(chunks.is_empty());
        assert!(!doc_id.is_empty());
    }

    #[test]
    fn chunk_text_is_trimmed() {
        let doc = doc_with_sections(vec![("Intro", "  padded text \n")]);
        let (chunks, _) = chunk_document(&doc, None);
        assert_eq!(chunks[0].text, "padded text");
    }
}
