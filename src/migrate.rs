//! Schema migrations. Idempotent; `dochat init` and `dochat serve` both
//! run them on startup.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Stored documents. `status` is 'pending' until the vector index write
    // succeeds, then 'committed'; reads outside the ingestion pipeline only
    // see committed rows.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_bytes BLOB NOT NULL,
            mime_type TEXT NOT NULL,
            document_type TEXT NOT NULL DEFAULT 'generic',
            author TEXT,
            date TEXT,
            tags TEXT,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per embedded chunk, scoped by the owner's collection name.
    // `doc_id` duplicates the metadata field so per-document deletes don't
    // need to parse JSON.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            sources_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-user LLM overrides. Registration/auth live upstream; this table
    // only carries the model/key preference consulted by the llm module.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            email TEXT PRIMARY KEY,
            llm_model TEXT,
            llm_api_key TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_records_doc ON vector_records(collection, doc_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_history_owner ON chat_history(owner, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
