//! Per-user vector collections over SQLite.
//!
//! Every write and query is scoped to one collection derived from the
//! owner's identity. The collection name encoding is injective: ASCII
//! alphanumerics pass through and every other byte becomes `_xx`
//! (lowercase hex), so distinct identities can never share a collection.
//! This scoping is the sole isolation mechanism between users' retrievable
//! content.
//!
//! Nearest-neighbor queries load the collection's rows and rank by cosine
//! similarity in process; at personal-corpus scale this beats maintaining
//! an index.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::fmt::Write as _;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

/// Sentinel doc id for records whose metadata lacks one.
pub const UNKNOWN_DOCUMENT: &str = "unknown_document";

/// Derive the collection name for an owner identity.
pub fn collection_name(owner: &str) -> String {
    let mut name = String::with_capacity(owner.len() + 5);
    name.push_str("user_");
    for byte in owner.bytes() {
        if byte.is_ascii_alphanumeric() {
            name.push(byte as char);
        } else {
            // '_' never appears unescaped, so the encoding decodes
            // unambiguously left to right
            let _ = write!(name, "_{:02x}", byte);
        }
    }
    name
}

/// Insert or overwrite records by id within the owner's collection.
///
/// All four slices must be the same length; each record's `doc_id` is
/// lifted out of its metadata for indexed per-document deletes.
pub async fn upsert(
    pool: &SqlitePool,
    owner: &str,
    ids: &[String],
    texts: &[String],
    metadatas: &[serde_json::Value],
    embeddings: &[Vec<f32>],
) -> Result<()> {
    if ids.len() != texts.len() || ids.len() != metadatas.len() || ids.len() != embeddings.len() {
        bail!(
            "vector upsert length mismatch: {} ids, {} texts, {} metadatas, {} embeddings",
            ids.len(),
            texts.len(),
            metadatas.len(),
            embeddings.len()
        );
    }

    let collection = collection_name(owner);
    let mut tx = pool.begin().await?;

    for i in 0..ids.len() {
        let doc_id = metadatas[i]
            .get("doc_id")
            .and_then(|v| v.as_str())
            .unwrap_or(UNKNOWN_DOCUMENT);

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO vector_records (collection, id, doc_id, text, metadata_json, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&collection)
        .bind(&ids[i])
        .bind(doc_id)
        .bind(&texts[i])
        .bind(metadatas[i].to_string())
        .bind(vec_to_blob(&embeddings[i]))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Return up to `k` nearest neighbors (cosine similarity, descending) as
/// `(text, metadata)` pairs, scoped to the owner's collection only.
pub async fn query(
    pool: &SqlitePool,
    owner: &str,
    query_embedding: &[f32],
    k: usize,
) -> Result<Vec<(String, serde_json::Value)>> {
    let collection = collection_name(owner);

    let rows = sqlx::query(
        "SELECT text, metadata_json, embedding FROM vector_records WHERE collection = ?",
    )
    .bind(&collection)
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<(f32, String, serde_json::Value)> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(query_embedding, &blob_to_vec(&blob));
            let metadata_json: String = row.get("metadata_json");
            let metadata =
                serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));
            (similarity, row.get("text"), metadata)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);

    Ok(scored.into_iter().map(|(_, t, m)| (t, m)).collect())
}

/// Remove every record for one document from the owner's collection.
pub async fn delete_document(pool: &SqlitePool, owner: &str, doc_id: &str) -> Result<u64> {
    let collection = collection_name(owner);
    let result = sqlx::query("DELETE FROM vector_records WHERE collection = ? AND doc_id = ?")
        .bind(&collection)
        .bind(doc_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn meta(doc_id: &str, owner: &str) -> serde_json::Value {
        serde_json::json!({"doc_id": doc_id, "owner": owner})
    }

    #[test]
    fn collection_name_keeps_alphanumerics() {
        assert_eq!(collection_name("alice123"), "user_alice123");
    }

    #[test]
    fn collection_name_escapes_special_chars() {
        assert_eq!(collection_name("a@b.c"), "user_a_40b_2ec");
    }

    #[test]
    fn collection_name_injective_where_naive_sanitizing_collides() {
        // Both collapse to "a_b_c" under replace-with-underscore schemes.
        assert_ne!(collection_name("a.b@c"), collection_name("a_b@c"));
        assert_ne!(collection_name("a b"), collection_name("a.b"));
    }

    #[tokio::test]
    async fn upsert_and_query_roundtrip() {
        let pool = test_pool().await;
        upsert(
            &pool,
            "alice@x.y",
            &["c1".to_string(), "c2".to_string()],
            &["near text".to_string(), "far text".to_string()],
            &[meta("d1", "alice@x.y"), meta("d1", "alice@x.y")],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .await
        .unwrap();

        let hits = query(&pool, "alice@x.y", &[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "near text");
    }

    #[tokio::test]
    async fn query_is_scoped_to_owner_collection() {
        let pool = test_pool().await;
        upsert(
            &pool,
            "alice@x.y",
            &["c1".to_string()],
            &["alice secret".to_string()],
            &[meta("d1", "alice@x.y")],
            &[vec![1.0, 0.0]],
        )
        .await
        .unwrap();

        let hits = query(&pool, "bob@x.y", &[1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let pool = test_pool().await;
        for text in ["old", "new"] {
            upsert(
                &pool,
                "alice@x.y",
                &["c1".to_string()],
                &[text.to_string()],
                &[meta("d1", "alice@x.y")],
                &[vec![1.0]],
            )
            .await
            .unwrap();
        }
        let hits = query(&pool, "alice@x.y", &[1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "new");
    }

    #[tokio::test]
    async fn length_mismatch_rejected() {
        let pool = test_pool().await;
        let err = upsert(
            &pool,
            "alice@x.y",
            &["c1".to_string()],
            &[],
            &[],
            &[],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[tokio::test]
    async fn delete_document_removes_only_that_doc() {
        let pool = test_pool().await;
        upsert(
            &pool,
            "alice@x.y",
            &["c1".to_string(), "c2".to_string()],
            &["from d1".to_string(), "from d2".to_string()],
            &[meta("d1", "alice@x.y"), meta("d2", "alice@x.y")],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .await
        .unwrap();

        let removed = delete_document(&pool, "alice@x.y", "d1").await.unwrap();
        assert_eq!(removed, 1);
        let hits = query(&pool, "alice@x.y", &[1.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "from d2");
    }
}
