//! In-memory [`MaterialStore`] implementation for testing.
//!
//! Blocks live in a `BTreeMap` behind `std::sync::RwLock`. Batch
//! transactions stage their writes locally and apply them in one critical
//! section on commit, so readers never observe a half-written batch.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{BlockId, BlockKind, ContentBlock, DocumentId, VectorWrite};

use super::{BatchTransaction, MaterialStore, PendingQuery, StoreCounts};

struct StoredBlock {
    block: ContentBlock,
    vector: Option<Vec<f32>>,
    context_injected: bool,
}

#[derive(Default)]
struct State {
    blocks: BTreeMap<BlockId, StoredBlock>,
    next_id: BlockId,
}

/// In-memory block store.
#[derive(Clone, Default)]
pub struct InMemoryMaterialStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryMaterialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one block and return its assigned id.
    pub fn insert_block(
        &self,
        document_id: DocumentId,
        block_kind: BlockKind,
        section_path: Option<&str>,
        sequence_order: i64,
        raw_content: &str,
    ) -> BlockId {
        let mut state = self.state.write().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.blocks.insert(
            id,
            StoredBlock {
                block: ContentBlock {
                    id,
                    document_id,
                    block_kind,
                    section_path: section_path.map(str::to_string),
                    sequence_order,
                    raw_content: raw_content.to_string(),
                },
                vector: None,
                context_injected: false,
            },
        );
        id
    }

    /// Insert a whole report, assigning `sequence_order` 0..n in slice order.
    pub fn insert_document(
        &self,
        document_id: DocumentId,
        blocks: &[(BlockKind, Option<&str>, &str)],
    ) -> Vec<BlockId> {
        blocks
            .iter()
            .enumerate()
            .map(|(order, (kind, path, content))| {
                self.insert_block(document_id, *kind, *path, order as i64, content)
            })
            .collect()
    }

    /// Stored vector for a block, if materialized.
    pub fn vector(&self, id: BlockId) -> Option<Vec<f32>> {
        let state = self.state.read().unwrap();
        state.blocks.get(&id).and_then(|sb| sb.vector.clone())
    }

    /// Stored context flag for a block.
    pub fn context_injected(&self, id: BlockId) -> Option<bool> {
        let state = self.state.read().unwrap();
        state.blocks.get(&id).map(|sb| sb.context_injected)
    }
}

#[async_trait]
impl MaterialStore for InMemoryMaterialStore {
    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<ContentBlock>> {
        let state = self.state.read().unwrap();
        let mut blocks: Vec<ContentBlock> = state
            .blocks
            .values()
            .filter(|sb| query.force || sb.vector.is_none())
            .filter(|sb| {
                query
                    .document_id
                    .map_or(true, |doc| sb.block.document_id == doc)
            })
            .map(|sb| sb.block.clone())
            .collect();
        blocks.sort_by_key(|b| (b.document_id, b.sequence_order, b.id));
        if let Some(limit) = query.limit {
            blocks.truncate(limit);
        }
        Ok(blocks)
    }

    async fn fetch_predecessor(
        &self,
        document_id: DocumentId,
        sequence_order: i64,
    ) -> Result<Option<ContentBlock>> {
        let state = self.state.read().unwrap();
        Ok(state
            .blocks
            .values()
            .filter(|sb| {
                sb.block.document_id == document_id && sb.block.sequence_order < sequence_order
            })
            .max_by_key(|sb| sb.block.sequence_order)
            .map(|sb| sb.block.clone()))
    }

    async fn begin_batch(&self) -> Result<Box<dyn BatchTransaction>> {
        Ok(Box::new(MemoryBatch {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let state = self.state.read().unwrap();
        let mut counts = StoreCounts::default();
        let mut docs: Vec<DocumentId> = Vec::new();
        for sb in state.blocks.values() {
            counts.blocks += 1;
            if sb.vector.is_some() {
                counts.embedded += 1;
            }
            match sb.block.block_kind {
                BlockKind::Text => counts.text_blocks += 1,
                BlockKind::Table => counts.table_blocks += 1,
            }
            if sb.context_injected {
                counts.context_injected += 1;
            }
            if !docs.contains(&sb.block.document_id) {
                docs.push(sb.block.document_id);
            }
        }
        counts.documents = docs.len() as i64;
        Ok(counts)
    }
}

struct MemoryBatch {
    state: Arc<RwLock<State>>,
    staged: Vec<VectorWrite>,
}

#[async_trait]
impl BatchTransaction for MemoryBatch {
    async fn write_vector(&mut self, write: &VectorWrite) -> Result<()> {
        let exists = self.state.read().unwrap().blocks.contains_key(&write.block_id);
        if !exists {
            bail!("no content block with id {}", write.block_id);
        }
        self.staged.retain(|w| w.block_id != write.block_id);
        self.staged.push(write.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryBatch { state, staged } = *self;
        let mut state = state.write().unwrap();
        for write in staged {
            if let Some(sb) = state.blocks.get_mut(&write.block_id) {
                sb.vector = Some(write.vector);
                sb.context_injected = write.context_injected;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
