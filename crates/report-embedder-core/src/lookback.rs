//! Per-document memo of the last block handed to the context policy.
//!
//! Pending blocks arrive ordered by `(document, sequence_order)`, so the
//! predecessor of most blocks is the block processed right before it. The
//! cache remembers that block per document and skips the store round-trip
//! when it is provably the immediate predecessor (`sequence_order == n - 1`).
//! Any other case (first block of a run, a batch that split a document's
//! run, or a filtered-out order number) falls back to
//! [`MaterialStore::fetch_predecessor`].
//!
//! The cache is never authoritative: with or without it, the resolved
//! predecessor is identical.

use std::collections::HashMap;

use anyhow::Result;

use crate::models::{ContentBlock, DocumentId};
use crate::store::MaterialStore;

/// How a predecessor was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPath {
    CacheHit,
    StoreFallback,
}

#[derive(Debug, Default)]
pub struct LookbackCache {
    last: HashMap<DocumentId, ContentBlock>,
    enabled: bool,
    hits: u64,
    misses: u64,
}

impl LookbackCache {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// A cache that always falls back to the store.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Resolve the immediate predecessor of `current`, then remember
    /// `current` as the last block seen for its document.
    pub async fn resolve_previous(
        &mut self,
        store: &dyn MaterialStore,
        current: &ContentBlock,
    ) -> Result<(Option<ContentBlock>, LookupPath)> {
        let cached = if self.enabled {
            self.last
                .get(&current.document_id)
                .filter(|prev| prev.sequence_order == current.sequence_order - 1)
                .cloned()
        } else {
            None
        };

        let resolved = match cached {
            Some(prev) => {
                self.hits += 1;
                (Some(prev), LookupPath::CacheHit)
            }
            None => {
                self.misses += 1;
                tracing::debug!(
                    document_id = current.document_id,
                    sequence_order = current.sequence_order,
                    "lookback cache miss, querying store"
                );
                let prev = store
                    .fetch_predecessor(current.document_id, current.sequence_order)
                    .await?;
                (prev, LookupPath::StoreFallback)
            }
        };

        if self.enabled {
            self.last.insert(current.document_id, current.clone());
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockKind;
    use crate::store::memory::InMemoryMaterialStore;
    use crate::store::PendingQuery;

    #[tokio::test]
    async fn contiguous_run_hits_cache_after_first_block() {
        let store = InMemoryMaterialStore::new();
        store.insert_document(
            1,
            &[
                (BlockKind::Text, Some("P"), "a"),
                (BlockKind::Table, Some("P"), "b"),
                (BlockKind::Text, Some("P"), "c"),
            ],
        );
        let blocks = store.fetch_pending(&PendingQuery::all()).await.unwrap();

        let mut cache = LookbackCache::new();
        let (prev0, path0) = cache.resolve_previous(&store, &blocks[0]).await.unwrap();
        assert!(prev0.is_none());
        assert_eq!(path0, LookupPath::StoreFallback);

        let (prev1, path1) = cache.resolve_previous(&store, &blocks[1]).await.unwrap();
        assert_eq!(prev1.unwrap().id, blocks[0].id);
        assert_eq!(path1, LookupPath::CacheHit);

        let (_, path2) = cache.resolve_previous(&store, &blocks[2]).await.unwrap();
        assert_eq!(path2, LookupPath::CacheHit);
        assert_eq!((cache.hits(), cache.misses()), (2, 1));
    }

    #[tokio::test]
    async fn gap_in_sequence_falls_back_to_store() {
        let store = InMemoryMaterialStore::new();
        let a = store.insert_block(1, BlockKind::Text, Some("P"), 0, "a");
        let b = store.insert_block(1, BlockKind::Text, Some("P"), 2, "b");
        let c = store.insert_block(1, BlockKind::Table, Some("P"), 5, "c");
        let blocks = store.fetch_pending(&PendingQuery::all()).await.unwrap();
        assert_eq!(blocks.iter().map(|b| b.id).collect::<Vec<_>>(), vec![a, b, c]);

        let mut cache = LookbackCache::new();
        cache.resolve_previous(&store, &blocks[0]).await.unwrap();
        let (prev, path) = cache.resolve_previous(&store, &blocks[1]).await.unwrap();
        assert_eq!(prev.unwrap().id, a);
        assert_eq!(path, LookupPath::StoreFallback);

        let (prev, path) = cache.resolve_previous(&store, &blocks[2]).await.unwrap();
        assert_eq!(prev.unwrap().id, b);
        assert_eq!(path, LookupPath::StoreFallback);
    }

    #[tokio::test]
    async fn cache_is_scoped_per_document() {
        let store = InMemoryMaterialStore::new();
        let d1 = store.insert_block(1, BlockKind::Text, Some("P"), 0, "doc1");
        store.insert_block(2, BlockKind::Text, Some("P"), 0, "doc2-0");
        store.insert_block(2, BlockKind::Table, Some("P"), 1, "doc2-1");
        let blocks = store.fetch_pending(&PendingQuery::all()).await.unwrap();

        let mut cache = LookbackCache::new();
        for block in &blocks[..2] {
            cache.resolve_previous(&store, block).await.unwrap();
        }
        let (prev, path) = cache.resolve_previous(&store, &blocks[2]).await.unwrap();
        let prev = prev.unwrap();
        assert_ne!(prev.id, d1);
        assert_eq!(prev.document_id, 2);
        assert_eq!(path, LookupPath::CacheHit);
    }

    #[tokio::test]
    async fn predecessor_outside_pending_set_comes_from_store() {
        let store = InMemoryMaterialStore::new();
        let ids = store.insert_document(
            1,
            &[
                (BlockKind::Text, Some("P"), "a"),
                (BlockKind::Table, Some("P"), "b"),
            ],
        );
        let only_second = store
            .fetch_pending(&PendingQuery::all())
            .await
            .unwrap()
            .into_iter()
            .filter(|b| b.id == ids[1])
            .collect::<Vec<_>>();

        let mut cache = LookbackCache::new();
        let (prev, path) = cache
            .resolve_previous(&store, &only_second[0])
            .await
            .unwrap();
        assert_eq!(prev.unwrap().id, ids[0]);
        assert_eq!(path, LookupPath::StoreFallback);
    }

    #[tokio::test]
    async fn disabled_cache_always_queries_store() {
        let store = InMemoryMaterialStore::new();
        store.insert_document(
            1,
            &[
                (BlockKind::Text, Some("P"), "a"),
                (BlockKind::Table, Some("P"), "b"),
            ],
        );
        let blocks = store.fetch_pending(&PendingQuery::all()).await.unwrap();

        let mut cache = LookbackCache::disabled();
        for block in &blocks {
            let (_, path) = cache.resolve_previous(&store, block).await.unwrap();
            assert_eq!(path, LookupPath::StoreFallback);
        }
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.misses(), 2);
    }
}
