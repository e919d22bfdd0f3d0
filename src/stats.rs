//! Database statistics and health overview.
//!
//! Summarizes what is stored: report and block counts, embedding
//! coverage, the text/table split, and how many tables received context.
//! Used by `rembed stats`.

use anyhow::Result;

use report_embedder_core::store::{MaterialStore, StoreCounts};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteMaterialStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteMaterialStore::new(pool.clone());
    let counts = store.counts().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Report Embedder — Database Stats");
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    print_counts(&counts);
    println!();

    pool.close().await;
    Ok(())
}

fn print_counts(counts: &StoreCounts) {
    println!("  Reports:     {}", counts.documents);
    println!("  Blocks:      {}", counts.blocks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        counts.embedded,
        counts.blocks,
        percent(counts.embedded, counts.blocks)
    );
    println!("  Text:        {}", counts.text_blocks);
    println!("  Tables:      {}", counts.table_blocks);
    println!(
        "  With context: {} / {} tables ({}%)",
        counts.context_injected,
        counts.table_blocks,
        percent(counts.context_injected, counts.table_blocks)
    );
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
