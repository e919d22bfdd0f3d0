//! SQLite-backed [`MaterialStore`] implementation.
//!
//! Maps each store operation onto the `reports` / `content_blocks` schema
//! created by [`crate::migrate`]. Every value, including `LIMIT`, is bound
//! as a parameter. A batch transaction wraps a `sqlx` transaction, so
//! dropping it without commit rolls back.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use report_embedder_core::embedding::{blob_to_vec, vec_to_blob};
use report_embedder_core::models::{BlockId, BlockKind, ContentBlock, DocumentId, VectorWrite};
use report_embedder_core::store::{BatchTransaction, MaterialStore, PendingQuery, StoreCounts};

/// One block of a report about to be inserted.
#[derive(Debug, Clone)]
pub struct NewBlock {
    pub kind: BlockKind,
    pub section_path: Option<String>,
    pub content: String,
}

/// SQLite implementation of the [`MaterialStore`] trait.
pub struct SqliteMaterialStore {
    pool: SqlitePool,
    model: Option<String>,
}

impl SqliteMaterialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, model: None }
    }

    /// Record `model` as `embedding_model` on every vector written.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub async fn report_exists(&self, source_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM reports WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Insert a report and its blocks in one transaction, numbering the
    /// blocks `0..n` in slice order. Returns `None` if `source_id` is
    /// already present.
    pub async fn insert_report(
        &self,
        source_id: &str,
        title: Option<&str>,
        blocks: &[NewBlock],
    ) -> Result<Option<DocumentId>> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO reports (source_id, title, created_at) VALUES (?, ?, ?) ON CONFLICT(source_id) DO NOTHING",
        )
        .bind(source_id)
        .bind(title)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        let report_id = inserted.last_insert_rowid();

        for (order, block) in blocks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO content_blocks (report_id, block_kind, section_path, sequence_order, raw_content)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(report_id)
            .bind(block.kind.as_str())
            .bind(&block.section_path)
            .bind(order as i64)
            .bind(&block.content)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert block {} of '{}'", order, source_id))?;
        }

        tx.commit().await?;
        Ok(Some(report_id))
    }

    /// Stored vector for a block, if it has one.
    pub async fn vector(&self, block_id: BlockId) -> Result<Option<Vec<f32>>> {
        let blob: Option<Option<Vec<u8>>> =
            sqlx::query_scalar("SELECT embedding FROM content_blocks WHERE id = ?")
                .bind(block_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob.flatten().map(|b| blob_to_vec(&b)))
    }

    /// Stored context flag for a block.
    pub async fn context_injected(&self, block_id: BlockId) -> Result<Option<bool>> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT context_injected FROM content_blocks WHERE id = ?")
                .bind(block_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag)
    }
}

const BLOCK_COLUMNS: &str = "id, report_id, block_kind, section_path, sequence_order, raw_content";

fn row_to_block(row: &SqliteRow) -> Result<ContentBlock> {
    let kind: String = row.get("block_kind");
    Ok(ContentBlock {
        id: row.get("id"),
        document_id: row.get("report_id"),
        block_kind: BlockKind::from_str(&kind)?,
        section_path: row.get("section_path"),
        sequence_order: row.get("sequence_order"),
        raw_content: row.get("raw_content"),
    })
}

#[async_trait]
impl MaterialStore for SqliteMaterialStore {
    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<ContentBlock>> {
        let limit: i64 = query.limit.map(|l| l as i64).unwrap_or(-1);

        let sql = format!(
            r#"
            SELECT {}
            FROM content_blocks
            WHERE (? OR embedding IS NULL)
              AND (? IS NULL OR report_id = ?)
            ORDER BY report_id, sequence_order, id
            LIMIT ?
            "#,
            BLOCK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(query.force)
            .bind(query.document_id)
            .bind(query.document_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_block).collect()
    }

    async fn fetch_predecessor(
        &self,
        document_id: DocumentId,
        sequence_order: i64,
    ) -> Result<Option<ContentBlock>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM content_blocks
            WHERE report_id = ? AND sequence_order < ?
            ORDER BY sequence_order DESC
            LIMIT 1
            "#,
            BLOCK_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(document_id)
            .bind(sequence_order)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_block).transpose()
    }

    async fn begin_batch(&self) -> Result<Box<dyn BatchTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("failed to open batch transaction")?;
        Ok(Box::new(SqliteBatch {
            tx,
            model: self.model.clone(),
            now: chrono::Utc::now().timestamp(),
        }))
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM reports) AS documents,
                COUNT(*) AS blocks,
                COALESCE(SUM(embedding IS NOT NULL), 0) AS embedded,
                COALESCE(SUM(block_kind = 'text'), 0) AS text_blocks,
                COALESCE(SUM(block_kind = 'table'), 0) AS table_blocks,
                COALESCE(SUM(context_injected), 0) AS context_injected
            FROM content_blocks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreCounts {
            documents: row.get("documents"),
            blocks: row.get("blocks"),
            embedded: row.get("embedded"),
            text_blocks: row.get("text_blocks"),
            table_blocks: row.get("table_blocks"),
            context_injected: row.get("context_injected"),
        })
    }
}

struct SqliteBatch {
    tx: Transaction<'static, Sqlite>,
    model: Option<String>,
    now: i64,
}

#[async_trait]
impl BatchTransaction for SqliteBatch {
    async fn write_vector(&mut self, write: &VectorWrite) -> Result<()> {
        let blob = vec_to_blob(&write.vector);
        let result = sqlx::query(
            r#"
            UPDATE content_blocks
            SET embedding = ?, embedding_model = ?, context_injected = ?, embedded_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&blob)
        .bind(&self.model)
        .bind(write.context_injected)
        .bind(self.now)
        .bind(write.block_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("no content block with id {}", write.block_id);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
