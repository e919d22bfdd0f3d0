//! Storage abstraction for persisted content blocks.
//!
//! The [`MaterialStore`] trait is the narrow interface the materializer
//! needs: list pending blocks, look up a block's predecessor, and write
//! vectors inside a per-batch transaction. Backends: SQLite (in the app
//! crate) and [`memory::InMemoryMaterialStore`] for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{ContentBlock, DocumentId, VectorWrite};

/// Selects the blocks a run should process.
#[derive(Debug, Clone, Default)]
pub struct PendingQuery {
    /// Restrict to one report.
    pub document_id: Option<DocumentId>,
    /// Cap on returned rows (testing and partial runs).
    pub limit: Option<usize>,
    /// Include blocks that already have a vector (re-embedding).
    pub force: bool,
}

impl PendingQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_document(document_id: DocumentId) -> Self {
        Self {
            document_id: Some(document_id),
            ..Default::default()
        }
    }
}

/// Store-wide counters for the `stats` overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub documents: i64,
    pub blocks: i64,
    pub embedded: i64,
    pub text_blocks: i64,
    pub table_blocks: i64,
    pub context_injected: i64,
}

/// Transactional scope for one batch of vector writes.
///
/// Writes are invisible to readers until [`commit`](BatchTransaction::commit).
/// Dropping the transaction without committing discards every write.
#[async_trait]
pub trait BatchTransaction: Send {
    /// Stage the vector and context flag for one block.
    async fn write_vector(&mut self, write: &VectorWrite) -> Result<()>;

    /// Make every staged write visible at once.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every staged write.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Abstract block store used by the materialization pipeline.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`fetch_pending`](MaterialStore::fetch_pending) | Blocks still needing a vector, in `(document, sequence)` order |
/// | [`fetch_predecessor`](MaterialStore::fetch_predecessor) | Greatest `sequence_order < n` in the same document |
/// | [`begin_batch`](MaterialStore::begin_batch) | Open a batch transaction |
/// | [`write_vector`](MaterialStore::write_vector) | Single self-committing write |
/// | [`counts`](MaterialStore::counts) | Store-wide statistics |
#[async_trait]
pub trait MaterialStore: Send + Sync {
    /// List blocks ordered by `(document_id, sequence_order, id)`.
    ///
    /// Without `force`, only blocks that have no vector are returned.
    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<ContentBlock>>;

    /// The block in `document_id` with the greatest `sequence_order`
    /// strictly less than `sequence_order`, if any.
    async fn fetch_predecessor(
        &self,
        document_id: DocumentId,
        sequence_order: i64,
    ) -> Result<Option<ContentBlock>>;

    /// Open the transactional scope for one batch.
    async fn begin_batch(&self) -> Result<Box<dyn BatchTransaction>>;

    /// Write one vector in its own transaction.
    async fn write_vector(&self, write: &VectorWrite) -> Result<()> {
        let mut tx = self.begin_batch().await?;
        tx.write_vector(write).await?;
        tx.commit().await
    }

    /// Aggregate counters over every stored block.
    async fn counts(&self) -> Result<StoreCounts>;
}
