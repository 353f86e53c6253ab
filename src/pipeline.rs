//! Ingestion pipeline: file → text → structure → chunks → vectors.
//!
//! The document row is written in `pending` status before embedding begins
//! and promoted to `committed` only once its vectors are stored. If any
//! later stage fails, the pending row is deleted so the registry and the
//! vector store never disagree about what is searchable.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

use crate::chunker;
use crate::config::Config;
use crate::documents;
use crate::embedding::Embedder;
use crate::extract;
use crate::llm::ChatModel;
use crate::structure;
use crate::vectorstore;

/// Ingest one file for one owner. Returns the new document id.
///
/// `image_url`, when given, is stamped into every chunk's metadata (used for
/// uploads where the original is an image the caller can link back to).
pub async fn ingest_file(
    pool: &SqlitePool,
    config: &Config,
    chat_model: &dyn ChatModel,
    embedder: &dyn Embedder,
    path: &Path,
    owner: &str,
    image_url: Option<&str>,
) -> Result<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    info!(file = %file_name, owner, "extracting text");
    let raw_text = extract::extract_text(path, &config.ocr)?;

    info!(file = %file_name, chars = raw_text.len(), "structuring document");
    let structured =
        structure::structure_document(chat_model, &raw_text, config.structurer.max_tokens).await?;

    let (chunks, doc_id) = chunker::chunk_document(&structured, image_url);
    info!(file = %file_name, doc_id = %doc_id, chunks = chunks.len(), "chunked");

    let file_bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    documents::save_pending(
        pool,
        &doc_id,
        owner,
        &file_name,
        &file_bytes,
        &structured.document_type,
        &structured.metadata,
    )
    .await?;

    if let Err(err) = index_chunks(pool, embedder, owner, &chunks).await {
        // Roll back the pending row so a half-indexed document never
        // becomes visible.
        if let Err(cleanup_err) = documents::delete_pending(pool, &doc_id, owner).await {
            warn!(doc_id = %doc_id, error = %cleanup_err, "failed to remove pending document");
        }
        return Err(err);
    }

    documents::mark_committed(pool, &doc_id, owner).await?;
    info!(file = %file_name, doc_id = %doc_id, "ingest committed");

    Ok(doc_id)
}

async fn index_chunks(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    owner: &str,
    chunks: &[chunker::Chunk],
) -> Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let metadatas: Vec<serde_json::Value> = chunks
        .iter()
        .map(|c| {
            let mut map = serde_json::Map::new();
            for (key, value) in &c.metadata {
                map.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
            map.insert(
                "owner".to_string(),
                serde_json::Value::String(owner.to_string()),
            );
            serde_json::Value::Object(map)
        })
        .collect();

    let embeddings = embedder.embed(&texts).await?;
    vectorstore::upsert(pool, owner, &ids, &texts, &metadatas, &embeddings).await
}

/// Remove a document and its vector records. The vectors go first: if the
/// second delete fails, a document row without vectors is merely
/// unsearchable, whereas vectors without a row would keep surfacing in
/// retrieval under a raw doc id.
pub async fn delete_document(pool: &SqlitePool, owner: &str, doc_id: &str) -> Result<bool> {
    let vectors = vectorstore::delete_document(pool, owner, doc_id).await?;
    let removed = documents::delete(pool, doc_id, owner).await?;
    if removed || vectors > 0 {
        info!(doc_id, vectors, "document deleted");
    }
    Ok(removed)
}
