//! Per-run statistics returned by the materializer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::BlockKind;

/// Aggregate for one materializer run. Returned by value, never shared.
///
/// Kind and context counters cover every block of each batch whose
/// embedding inputs were all built, including batches that later failed.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    /// Blocks left untouched because the run was cancelled.
    pub skipped: u64,
    pub text_count: u64,
    pub table_count: u64,
    pub table_with_context: u64,
    pub cache_hits: u64,
    pub store_lookups: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunStatistics {
    pub fn started(total: u64) -> Self {
        let now = Utc::now();
        Self {
            total,
            processed: 0,
            failed: 0,
            skipped: 0,
            text_count: 0,
            table_count: 0,
            table_with_context: 0,
            cache_hits: 0,
            store_lookups: 0,
            batches: 0,
            failed_batches: 0,
            cancelled: false,
            started_at: now,
            finished_at: now,
            elapsed_ms: 0,
        }
    }

    pub fn record_kind(&mut self, kind: BlockKind, context_injected: bool) {
        match kind {
            BlockKind::Text => self.text_count += 1,
            BlockKind::Table => {
                self.table_count += 1;
                if context_injected {
                    self.table_with_context += 1;
                }
            }
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.elapsed_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }

    /// Percentage of candidates that were written, `None` when there were none.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.processed as f64 * 100.0 / self.total as f64)
    }

    /// Percentage of table blocks that received context.
    pub fn context_injection_rate(&self) -> Option<f64> {
        (self.table_count > 0)
            .then(|| self.table_with_context as f64 * 100.0 / self.table_count as f64)
    }

    /// Processed blocks per second.
    pub fn throughput(&self) -> Option<f64> {
        (self.elapsed_ms > 0).then(|| self.processed as f64 * 1000.0 / self.elapsed_ms as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_none_without_denominator() {
        let stats = RunStatistics::started(0);
        assert_eq!(stats.success_rate(), None);
        assert_eq!(stats.context_injection_rate(), None);
        assert_eq!(stats.throughput(), None);
    }

    #[test]
    fn rates_are_percentages() {
        let mut stats = RunStatistics::started(4);
        stats.processed = 3;
        stats.record_kind(BlockKind::Table, true);
        stats.record_kind(BlockKind::Table, false);
        stats.record_kind(BlockKind::Text, false);
        stats.elapsed_ms = 1500;

        assert_eq!(stats.success_rate(), Some(75.0));
        assert_eq!(stats.context_injection_rate(), Some(50.0));
        assert_eq!(stats.throughput(), Some(2.0));
        assert_eq!(stats.text_count, 1);
    }

    #[test]
    fn serializes_to_json() {
        let stats = RunStatistics::started(2);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["cancelled"], false);
        assert!(json["started_at"].is_string());
    }
}
