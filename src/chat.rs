//! Per-user question/answer history.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatHistoryEntry {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub sources_json: String,
    pub created_at: String,
}

/// Record one question/answer exchange.
pub async fn append(
    pool: &SqlitePool,
    owner: &str,
    question: &str,
    answer: &str,
    sources_json: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO chat_history (owner, question, answer, sources_json, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(owner)
    .bind(question)
    .bind(answer)
    .bind(sources_json)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// History for one owner, newest first.
pub async fn list(pool: &SqlitePool, owner: &str) -> Result<Vec<ChatHistoryEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, question, answer, sources_json, created_at
        FROM chat_history
        WHERE owner = ?
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ChatHistoryEntry {
            id: row.get("id"),
            question: row.get("question"),
            answer: row.get("answer"),
            sources_json: row.get("sources_json"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Delete one entry; returns false when the id is absent or owned by
/// someone else.
pub async fn delete(pool: &SqlitePool, owner: &str, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM chat_history WHERE id = ? AND owner = ?")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove an owner's entire history. Returns the number of rows removed.
pub async fn clear(pool: &SqlitePool, owner: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM chat_history WHERE owner = ?")
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
