//! Document registry: original file bytes plus the metadata extracted
//! during structuring.
//!
//! Rows start in `pending` status when the file is saved and flip to
//! `committed` only after the document's chunks have been embedded and
//! stored. Reads that serve user traffic see committed rows only, so a
//! crashed ingest never surfaces a half-indexed document.

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// Document row without the file bytes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredDocument {
    pub id: String,
    pub file_name: String,
    pub document_type: String,
    pub author: Option<String>,
    pub date: Option<String>,
    pub tags: Option<String>,
    pub created_at: String,
}

/// Guess a MIME type from the file extension, defaulting to octet-stream.
pub fn guess_mime(file_name: &str) -> &'static str {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Save a document row in `pending` status. `metadata` is the document-level
/// metadata produced by structuring; author/date/tags are lifted from it
/// when present.
pub async fn save_pending(
    pool: &SqlitePool,
    id: &str,
    owner: &str,
    file_name: &str,
    file_bytes: &[u8],
    document_type: &str,
    metadata: &BTreeMap<String, String>,
) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(file_bytes);
    let content_hash = format!("{:x}", hasher.finalize());

    sqlx::query(
        r#"
        INSERT INTO documents
            (id, owner, file_name, file_bytes, mime_type, document_type,
             author, date, tags, content_hash, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
        "#,
    )
    .bind(id)
    .bind(owner)
    .bind(file_name)
    .bind(file_bytes)
    .bind(guess_mime(file_name))
    .bind(document_type)
    .bind(metadata.get("author").map(String::as_str))
    .bind(metadata.get("date").map(String::as_str))
    .bind(metadata.get("tags").map(String::as_str))
    .bind(content_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Promote a pending document to committed.
pub async fn mark_committed(pool: &SqlitePool, id: &str, owner: &str) -> Result<()> {
    sqlx::query("UPDATE documents SET status = 'committed' WHERE id = ? AND owner = ?")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(())
}

/// Compensating delete for a failed ingest. Only removes the row while it
/// is still pending.
pub async fn delete_pending(pool: &SqlitePool, id: &str, owner: &str) -> Result<()> {
    sqlx::query("DELETE FROM documents WHERE id = ? AND owner = ? AND status = 'pending'")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(())
}

/// Committed document metadata for one owner, or `None`.
pub async fn get_metadata(
    pool: &SqlitePool,
    id: &str,
    owner: &str,
) -> Result<Option<StoredDocument>> {
    let row = sqlx::query(
        r#"
        SELECT id, file_name, document_type, author, date, tags, created_at
        FROM documents
        WHERE id = ? AND owner = ? AND status = 'committed'
        "#,
    )
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| StoredDocument {
        id: row.get("id"),
        file_name: row.get("file_name"),
        document_type: row.get("document_type"),
        author: row.get("author"),
        date: row.get("date"),
        tags: row.get("tags"),
        created_at: row.get("created_at"),
    }))
}

/// Original file bytes and MIME type for one committed document.
pub async fn get_file(
    pool: &SqlitePool,
    id: &str,
    owner: &str,
) -> Result<Option<(String, Vec<u8>)>> {
    let row = sqlx::query(
        "SELECT mime_type, file_bytes FROM documents WHERE id = ? AND owner = ? AND status = 'committed'",
    )
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| (row.get("mime_type"), row.get("file_bytes"))))
}

/// All committed documents for one owner, newest first.
pub async fn list(pool: &SqlitePool, owner: &str) -> Result<Vec<StoredDocument>> {
    let rows = sqlx::query(
        r#"
        SELECT id, file_name, document_type, author, date, tags, created_at
        FROM documents
        WHERE owner = ? AND status = 'committed'
        ORDER BY created_at DESC, id
        "#,
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| StoredDocument {
            id: row.get("id"),
            file_name: row.get("file_name"),
            document_type: row.get("document_type"),
            author: row.get("author"),
            date: row.get("date"),
            tags: row.get("tags"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Delete one committed document. Returns whether a row was removed.
pub async fn delete(pool: &SqlitePool, id: &str, owner: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE id = ? AND owner = ?")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
