//! Batch materializer: the context-aware embedding pipeline.
//!
//! # Flow
//!
//! ```text
//! fetch_pending ─▶ split into batches ─▶ per batch:
//!                                         resolve predecessor (cache or store)
//!                                         build embedding text (ContextPolicy)
//!                                         vectorize once
//!                                         write all vectors in one transaction
//!                                       ─▶ RunStatistics
//! ```
//!
//! Batches run strictly in fetch order: the lookback cache's fast path
//! relies on each document's blocks arriving contiguously. A failed batch
//! (predecessor lookup, model, output check or storage error) is rolled
//! back as a whole and counted; the run moves on to the next batch. Only
//! pre-flight failures (listing pending blocks, vectorizer warm-up) abort
//! the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::context::ContextPolicy;
use crate::embedding::{check_output, Vectorizer};
use crate::error::EmbedError;
use crate::lookback::LookbackCache;
use crate::models::{BlockId, ContentBlock, VectorWrite};
use crate::stats::RunStatistics;
use crate::store::{MaterialStore, PendingQuery};

/// Default number of blocks per vectorizer call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Cooperative cancellation, checked between batches only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum MaterializeEvent {
    Started {
        total: u64,
        batches: u64,
    },
    BatchFinished {
        index: u64,
        batches: u64,
        processed: u64,
        failed: u64,
    },
    Finished {
        processed: u64,
        failed: u64,
    },
}

/// Receives progress events. Implementations must not block.
pub trait MaterializeProgress: Send + Sync {
    fn report(&self, event: MaterializeEvent);
}

/// Progress sink that discards everything.
pub struct NoProgress;

impl MaterializeProgress for NoProgress {
    fn report(&self, _event: MaterializeEvent) {}
}

#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    pub batch_size: usize,
    pub policy: ContextPolicy,
    /// Disable to force a store lookup for every predecessor.
    pub use_lookback_cache: bool,
    /// Pause after every `pause_every` batches (0 disables the pause).
    pub pause_every: usize,
    pub batch_pause: Duration,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            policy: ContextPolicy::default(),
            use_lookback_cache: true,
            pause_every: 10,
            batch_pause: Duration::from_millis(100),
        }
    }
}

pub struct BatchMaterializer {
    store: Arc<dyn MaterialStore>,
    vectorizer: Arc<dyn Vectorizer>,
    config: MaterializerConfig,
}

impl BatchMaterializer {
    pub fn new(
        store: Arc<dyn MaterialStore>,
        vectorizer: Arc<dyn Vectorizer>,
        config: MaterializerConfig,
    ) -> Self {
        Self {
            store,
            vectorizer,
            config,
        }
    }

    /// Run the pipeline once over the blocks selected by `query`.
    ///
    /// # Errors
    ///
    /// Only pre-flight failures: an invalid batch size, a failed
    /// `fetch_pending`, or a failed [`Vectorizer::warm_up`]. Batch failures
    /// are reported in the statistics.
    pub async fn run(
        &self,
        query: &PendingQuery,
        progress: &dyn MaterializeProgress,
        cancel: &CancelFlag,
    ) -> Result<RunStatistics> {
        let batch_size = self.config.batch_size;
        if batch_size == 0 {
            return Err(EmbedError::InvalidConfig("batch size must be > 0".to_string()).into());
        }

        let pending = self
            .store
            .fetch_pending(query)
            .await
            .context("failed to fetch pending blocks")?;

        if !pending.is_empty() {
            self.vectorizer
                .warm_up()
                .await
                .context("failed to initialize vectorizer")?;
        }

        let mut stats = RunStatistics::started(pending.len() as u64);
        let batch_count = pending.len().div_ceil(batch_size) as u64;

        tracing::info!(
            total = stats.total,
            batches = batch_count,
            batch_size,
            force = query.force,
            model = self.vectorizer.model_name(),
            "materializer run started"
        );
        progress.report(MaterializeEvent::Started {
            total: stats.total,
            batches: batch_count,
        });

        let mut cache = if self.config.use_lookback_cache {
            LookbackCache::new()
        } else {
            LookbackCache::disabled()
        };

        let mut consumed = 0usize;
        for (index, batch) in pending.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                stats.skipped = (pending.len() - consumed) as u64;
                tracing::warn!(skipped = stats.skipped, "run cancelled between batches");
                break;
            }

            stats.batches += 1;
            match self.process_batch(batch, &mut cache, &mut stats).await {
                Ok(()) => stats.processed += batch.len() as u64,
                Err(e) => {
                    tracing::warn!(
                        batch = index,
                        blocks = batch.len(),
                        error = %format!("{:#}", e),
                        "embedding batch failed, rolled back"
                    );
                    stats.failed += batch.len() as u64;
                    stats.failed_batches += 1;
                }
            }
            consumed += batch.len();

            progress.report(MaterializeEvent::BatchFinished {
                index: index as u64,
                batches: batch_count,
                processed: stats.processed,
                failed: stats.failed,
            });

            if self.config.pause_every > 0
                && index > 0
                && index % self.config.pause_every == 0
                && !self.config.batch_pause.is_zero()
            {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        stats.cache_hits = cache.hits();
        stats.store_lookups = cache.misses();
        stats.finish();

        tracing::info!(
            total = stats.total,
            processed = stats.processed,
            failed = stats.failed,
            elapsed_ms = stats.elapsed_ms,
            "materializer run finished"
        );
        progress.report(MaterializeEvent::Finished {
            processed: stats.processed,
            failed: stats.failed,
        });

        Ok(stats)
    }

    /// Resolve, vectorize and persist one batch. Any error leaves the
    /// batch without a single written vector.
    async fn process_batch(
        &self,
        batch: &[ContentBlock],
        cache: &mut LookbackCache,
        stats: &mut RunStatistics,
    ) -> Result<()> {
        let mut targets: Vec<(BlockId, bool)> = Vec::with_capacity(batch.len());
        let mut texts: Vec<String> = Vec::with_capacity(batch.len());

        for block in batch {
            let (previous, _) = cache
                .resolve_previous(self.store.as_ref(), block)
                .await
                .with_context(|| format!("predecessor lookup failed for block {}", block.id))?;
            let resolved = self.config.policy.resolve(block, previous.as_ref());
            targets.push((block.id, resolved.context_injected));
            texts.push(resolved.text);
        }

        // Counted only once the whole batch resolved
        for (block, (_, context_injected)) in batch.iter().zip(&targets) {
            stats.record_kind(block.block_kind, *context_injected);
        }

        let vectors = self
            .vectorizer
            .embed(&texts)
            .await
            .context("vectorizer failed")?;
        check_output(&vectors, texts.len(), self.vectorizer.dims())?;

        let mut tx = self.store.begin_batch().await?;
        for ((block_id, context_injected), vector) in targets.into_iter().zip(vectors) {
            let write = VectorWrite {
                block_id,
                vector,
                context_injected,
            };
            if let Err(e) = tx.write_vector(&write).await {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback after failed write also failed");
                }
                return Err(e.context(format!("failed to write vector for block {}", block_id)));
            }
        }
        tx.commit().await.context("failed to commit batch")?;
        Ok(())
    }
}
