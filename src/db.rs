//! SQLite connection pool for the document registry, vector records, and
//! chat history.
//!
//! Pool size and journal mode come from `[db]` in the config. Ingestion
//! holds a connection across embedding round trips, so the pool must be
//! large enough for concurrent uploads and questions; WAL keeps readers
//! (question answering) unblocked while an ingest writes.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

/// Open the configured database, creating the file and its parent
/// directory on first use.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db = &config.db;

    if let Some(parent) = db.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let journal_mode = match db.journal_mode.as_str() {
        "delete" => SqliteJournalMode::Delete,
        _ => SqliteJournalMode::Wal,
    };

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db.path.display()))?
        .create_if_missing(true)
        .journal_mode(journal_mode);

    let pool = SqlitePoolOptions::new()
        .max_connections(db.pool_size)
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::migrate;

    #[tokio::test]
    async fn connect_creates_file_and_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db: DbConfig {
                path: dir.path().join("nested/dochat.sqlite"),
                ..DbConfig::default()
            },
            ..Config::default()
        };

        let pool = connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        assert!(dir.path().join("nested/dochat.sqlite").exists());
    }

    #[tokio::test]
    async fn pool_size_comes_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db: DbConfig {
                path: dir.path().join("dochat.sqlite"),
                pool_size: 2,
                ..DbConfig::default()
            },
            ..Config::default()
        };

        let pool = connect(&config).await.unwrap();
        assert_eq!(pool.options().get_max_connections(), 2);
    }
}
