use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index if missing. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per ingested report
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL UNIQUE,
            title TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ordered blocks with their materialized vectors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_blocks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_id INTEGER NOT NULL,
            block_kind TEXT NOT NULL CHECK (block_kind IN ('text', 'table')),
            section_path TEXT,
            sequence_order INTEGER NOT NULL,
            raw_content TEXT NOT NULL,
            embedding BLOB,
            embedding_model TEXT,
            context_injected INTEGER NOT NULL DEFAULT 0,
            embedded_at INTEGER,
            UNIQUE(report_id, sequence_order),
            FOREIGN KEY (report_id) REFERENCES reports(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // UNIQUE(report_id, sequence_order) already indexes predecessor lookups
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_blocks_pending ON content_blocks(report_id, sequence_order) WHERE embedding IS NULL",
    )
    .execute(pool)
    .await?;

    Ok(())
}
