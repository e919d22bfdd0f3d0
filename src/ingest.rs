//! Local report loader for `rembed ingest`.
//!
//! Walks a directory for report files (JSON, one report per file), and
//! inserts each report with its blocks numbered in file order. Files are
//! driven through the [`BatchRunner`] so the outcome of every file is
//! classified, and failures get one retry.
//!
//! ```json
//! {
//!   "source_id": "20240315000123",
//!   "title": "Annual report 2023",
//!   "blocks": [
//!     { "kind": "text",  "section_path": "II > 1", "content": "Unit: KRW million" },
//!     { "kind": "table", "section_path": "II > 1", "content": "| year | revenue |" }
//!   ]
//! }
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use report_embedder_core::models::BlockKind;
use report_embedder_core::runner::{BatchRunner, ItemProcessor, Outcome};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::{NewBlock, SqliteMaterialStore};

/// Default pattern for report files.
pub const DEFAULT_INCLUDE: &str = "**/*.json";

#[derive(Debug, Deserialize)]
pub struct ReportFile {
    pub source_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub blocks: Vec<ReportBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ReportBlock {
    #[serde(alias = "block_type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub section_path: Option<String>,
    pub content: String,
}

/// List report files under `root` matching `include`, sorted by path.
pub fn scan_reports(root: &Path, include: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Report directory does not exist: {}", root.display());
    }

    let include_set = build_globset(include)?;
    let exclude_set = build_globset(&["**/.git/**".to_string()])?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

pub fn parse_report(content: &str) -> Result<ReportFile> {
    let report: ReportFile = serde_json::from_str(content)?;
    if report.source_id.trim().is_empty() {
        bail!("source_id must not be empty");
    }
    Ok(report)
}

/// Loads one report file into the store.
pub struct ReportLoader {
    store: SqliteMaterialStore,
}

impl ReportLoader {
    pub fn new(store: SqliteMaterialStore) -> Self {
        Self { store }
    }

    async fn load(&self, path: &Path) -> Result<Outcome> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let report =
            parse_report(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

        if report.blocks.is_empty() {
            return Ok(Outcome::Skipped("no blocks in report".to_string()));
        }
        if self.store.report_exists(&report.source_id).await? {
            return Ok(Outcome::Skipped("already ingested".to_string()));
        }

        let blocks: Vec<NewBlock> = report
            .blocks
            .into_iter()
            .map(|b| NewBlock {
                kind: b.kind,
                section_path: b.section_path,
                content: b.content,
            })
            .collect();

        match self
            .store
            .insert_report(&report.source_id, report.title.as_deref(), &blocks)
            .await?
        {
            Some(report_id) => {
                tracing::debug!(
                    source_id = %report.source_id,
                    report_id,
                    blocks = blocks.len(),
                    "report ingested"
                );
                Ok(Outcome::Success)
            }
            None => Ok(Outcome::Skipped("already ingested".to_string())),
        }
    }
}

#[async_trait]
impl ItemProcessor<PathBuf> for ReportLoader {
    fn label(&self, item: &PathBuf) -> String {
        item.display().to_string()
    }

    async fn process(&self, item: &PathBuf) -> Outcome {
        match self.load(item).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Run the ingest command over `dir` and print a summary.
pub async fn run_ingest(config: &Config, dir: &Path, include: &[String]) -> Result<()> {
    let files = scan_reports(dir, include)?;
    let pool = db::connect(config).await?;
    let loader = ReportLoader::new(SqliteMaterialStore::new(pool.clone()));
    let runner = BatchRunner::new(config.runner.to_runner_config());

    let report = runner.run(files, &loader).await;
    let report = runner.retry_failed(report, &loader).await;

    println!("ingest {}", dir.display());
    println!("  files: {}", report.total);
    println!("  ingested: {}", report.succeeded.len());
    println!("  skipped: {}", report.skipped.len());
    println!("  failed: {}", report.failed.len());
    for (label, reason) in &report.skipped {
        println!("    skipped {}: {}", label, reason);
    }
    for (path, error) in &report.failed {
        eprintln!("Warning: failed to ingest {}: {}", path.display(), error);
    }

    pool.close().await;
    Ok(())
}
