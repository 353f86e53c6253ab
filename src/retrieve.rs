//! Query-time retrieval: nearest chunks, grouped back into documents.
//!
//! The vector store returns individual chunks; callers want documents. Hits
//! are grouped by their `doc_id` metadata, texts merged in retrieval order,
//! and groups ranked by how many chunks each document contributed (ties
//! broken by document id so the ordering is deterministic). Candidates whose
//! metadata names a different owner are dropped without surfacing an error.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::warn;

use crate::config::Config;
use crate::documents;
use crate::embedding::{embed_query, Embedder};
use crate::vectorstore::{self, UNKNOWN_DOCUMENT};

/// Separator between merged chunk texts within one document group.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// One retrieved document group.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub document_id: String,
    pub file_name: String,
    pub document_url: Option<String>,
    pub text: String,
    pub num_chunks: usize,
}

/// Extract `@word` mention tokens from a question.
pub fn extract_mentions(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter_map(|token| {
            let name = token.strip_prefix('@')?;
            let name: String = name
                .chars()
                .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
                .collect();
            (!name.is_empty()).then_some(name)
        })
        .collect()
}

/// Map mention tokens to the caller's document ids by file name. A mention
/// matches when it equals the stored file name or its stem, case-insensitive.
pub async fn map_mentions_to_doc_ids(
    pool: &SqlitePool,
    owner: &str,
    mentions: &[String],
) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    if mentions.is_empty() {
        return Ok(ids);
    }

    let docs = documents::list(pool, owner).await?;
    for mention in mentions {
        let wanted = mention.to_lowercase();
        for doc in &docs {
            let file_name = doc.file_name.to_lowercase();
            let stem = std::path::Path::new(&file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&file_name)
                .to_string();
            if file_name == wanted || stem == wanted {
                ids.insert(doc.id.clone());
            }
        }
    }
    Ok(ids)
}

/// Retrieve the top-`k` chunks for `query` and group them into documents.
///
/// `doc_filter`, when non-empty, restricts results to those document ids.
pub async fn retrieve_documents(
    pool: &SqlitePool,
    config: &Config,
    embedder: &dyn Embedder,
    query: &str,
    owner: &str,
    k: usize,
    doc_filter: &HashSet<String>,
) -> Result<Vec<RetrievedDocument>> {
    let query_embedding = embed_query(embedder, query).await?;
    let hits = vectorstore::query(pool, owner, &query_embedding, k).await?;

    // Group hits by doc_id, preserving retrieval order both across groups
    // and within them.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();

    for (text, metadata) in hits {
        if let Some(hit_owner) = metadata.get("owner").and_then(|v| v.as_str()) {
            if hit_owner != owner {
                warn!(owner, hit_owner, "dropping vector hit with mismatched owner");
                continue;
            }
        }

        let doc_id = metadata
            .get("doc_id")
            .and_then(|v| v.as_str())
            .unwrap_or(UNKNOWN_DOCUMENT)
            .to_string();

        if !doc_filter.is_empty() && !doc_filter.contains(&doc_id) {
            continue;
        }

        if !grouped.contains_key(&doc_id) {
            order.push(doc_id.clone());
        }
        grouped.entry(doc_id).or_default().push(text);
    }

    let mut results = Vec::with_capacity(order.len());
    for doc_id in order {
        let texts = grouped.remove(&doc_id).unwrap_or_default();
        let num_chunks = texts.len();

        let document_url = (doc_id != UNKNOWN_DOCUMENT)
            .then(|| format!("{}/document_file/{}", config.server.public_url, doc_id));

        let file_name = match documents::get_metadata(pool, &doc_id, owner).await? {
            Some(meta) => meta.file_name,
            None => doc_id.clone(),
        };

        results.push(RetrievedDocument {
            document_id: doc_id,
            file_name,
            document_url,
            text: texts.join(CHUNK_SEPARATOR),
            num_chunks,
        });
    }

    results.sort_by(|a, b| {
        b.num_chunks
            .cmp(&a.num_chunks)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });

    Ok(results)
}
