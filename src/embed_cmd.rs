use anyhow::Result;
use std::sync::Arc;

use report_embedder_core::lookback::LookbackCache;
use report_embedder_core::materializer::{BatchMaterializer, CancelFlag};
use report_embedder_core::models::DocumentId;
use report_embedder_core::stats::RunStatistics;
use report_embedder_core::store::{MaterialStore, PendingQuery};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::progress::ProgressMode;
use crate::sqlite_store::SqliteMaterialStore;

/// Options for `rembed embed`, as parsed from the command line.
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    pub document: Option<DocumentId>,
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
    pub force: bool,
    pub no_cache: bool,
    pub dry_run: bool,
    pub json: bool,
    pub progress: ProgressMode,
}

impl EmbedOptions {
    fn query(&self) -> PendingQuery {
        PendingQuery {
            document_id: self.document,
            limit: self.limit,
            force: self.force,
        }
    }
}

/// Embed every pending block selected by `opts` and print the run summary.
pub async fn run_embed(config: &Config, opts: &EmbedOptions, cancel: &CancelFlag) -> Result<()> {
    let pool = db::connect(config).await?;

    if opts.dry_run {
        let store = SqliteMaterialStore::new(pool.clone());
        let preview = preview(&store, config, &opts.query()).await?;
        print_preview(&preview, opts.json)?;
        pool.close().await;
        return Ok(());
    }

    let vectorizer = embedding::create_vectorizer(&config.embedding)?;
    let store = SqliteMaterialStore::new(pool.clone()).with_model(vectorizer.model_name());

    let mut mat_config = config.materializer.to_materializer_config();
    if let Some(batch_size) = opts.batch_size {
        if batch_size == 0 {
            anyhow::bail!("--batch-size must be > 0");
        }
        mat_config.batch_size = batch_size;
    }
    if opts.no_cache {
        mat_config.use_lookback_cache = false;
    }

    let materializer = BatchMaterializer::new(Arc::new(store), vectorizer, mat_config);
    let reporter = opts.progress.reporter();
    let stats = materializer
        .run(&opts.query(), reporter.as_ref(), cancel)
        .await?;

    print_summary(&stats, opts.json)?;

    pool.close().await;
    Ok(())
}

/// What a run would do, without loading a model.
#[derive(Debug, Default, serde::Serialize)]
pub struct EmbedPreview {
    pub pending: u64,
    pub text_blocks: u64,
    pub table_blocks: u64,
    pub tables_with_context: u64,
}

async fn preview(
    store: &dyn MaterialStore,
    config: &Config,
    query: &PendingQuery,
) -> Result<EmbedPreview> {
    let pending = store.fetch_pending(query).await?;
    let policy = config.materializer.to_materializer_config().policy;
    let mut cache = LookbackCache::new();

    let mut preview = EmbedPreview {
        pending: pending.len() as u64,
        ..Default::default()
    };
    for block in &pending {
        let (previous, _) = cache.resolve_previous(store, block).await?;
        if block.is_table() {
            preview.table_blocks += 1;
            if policy.should_inject(block, previous.as_ref()) {
                preview.tables_with_context += 1;
            }
        } else {
            preview.text_blocks += 1;
        }
    }
    Ok(preview)
}

fn print_preview(preview: &EmbedPreview, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(preview)?);
        return Ok(());
    }
    println!("embed (dry-run)");
    println!("  blocks needing embeddings: {}", preview.pending);
    println!("  text blocks: {}", preview.text_blocks);
    println!("  table blocks: {}", preview.table_blocks);
    println!("  tables with context: {}", preview.tables_with_context);
    Ok(())
}

fn print_summary(stats: &RunStatistics, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(stats)?);
        return Ok(());
    }

    println!("embed");
    if stats.total == 0 {
        println!("  nothing to embed");
        return Ok(());
    }
    println!("  total pending: {}", stats.total);
    println!("  embedded: {}", stats.processed);
    println!("  failed: {}", stats.failed);
    if stats.cancelled {
        println!("  skipped (cancelled): {}", stats.skipped);
    }
    println!("  text blocks: {}", stats.text_count);
    println!(
        "  table blocks: {} ({} with context{})",
        stats.table_count,
        stats.table_with_context,
        stats
            .context_injection_rate()
            .map(|r| format!(", {:.1}%", r))
            .unwrap_or_default()
    );
    println!(
        "  predecessor lookups: {} cached, {} from store",
        stats.cache_hits, stats.store_lookups
    );
    if let Some(rate) = stats.success_rate() {
        println!("  success rate: {:.1}%", rate);
    }
    match stats.throughput() {
        Some(tp) => println!("  elapsed: {} ms ({:.1} blocks/s)", stats.elapsed_ms, tp),
        None => println!("  elapsed: {} ms", stats.elapsed_ms),
    }
    Ok(())
}
