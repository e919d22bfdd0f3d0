//! Rate-limited batch runner for per-item work.
//!
//! Walks a list of items in fixed-size batches, calls an [`ItemProcessor`]
//! for each one, and classifies the result as success, skip or failure.
//! A short delay separates items and a longer one separates batches so
//! upstream services are not hammered. Failures can be replayed once with
//! [`BatchRunner::retry_failed`].
//!
//! All delays come from [`RunnerConfig`]; there are no built-in sleeps.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of processing one item.
#[derive(Debug)]
pub enum Outcome {
    Success,
    /// Nothing to do; the reason is reported, not counted as an error.
    Skipped(String),
    Failed(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub batch_size: usize,
    pub item_delay: Duration,
    pub batch_delay: Duration,
    pub retry_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            item_delay: Duration::from_millis(100),
            batch_delay: Duration::from_secs(3),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Work performed on each item by the runner.
#[async_trait]
pub trait ItemProcessor<T: Sync>: Send + Sync {
    /// Human-readable name for logs and reports.
    fn label(&self, item: &T) -> String;
    async fn process(&self, item: &T) -> Outcome;
}

/// Summary of a runner pass.
#[derive(Debug)]
pub struct RunnerReport<T> {
    pub total: usize,
    /// Labels of items that succeeded.
    pub succeeded: Vec<String>,
    /// `(label, reason)` per skipped item.
    pub skipped: Vec<(String, String)>,
    /// The failed items with their error message, kept for retry.
    pub failed: Vec<(T, String)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl<T> RunnerReport<T> {
    fn new(total: usize) -> Self {
        let now = Utc::now();
        Self {
            total,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }
}

pub struct BatchRunner {
    config: RunnerConfig,
}

impl BatchRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Process every item, pausing between items and between batches.
    pub async fn run<T, P>(&self, items: Vec<T>, processor: &P) -> RunnerReport<T>
    where
        T: Send + Sync,
        P: ItemProcessor<T> + ?Sized,
    {
        let mut report = RunnerReport::new(items.len());
        let batch_size = self.config.batch_size.max(1);
        let batch_count = items.len().div_ceil(batch_size);

        tracing::info!(total = items.len(), batches = batch_count, "runner started");

        let mut iter = items.into_iter().peekable();
        let mut index = 0usize;
        while let Some(item) = iter.next() {
            let label = processor.label(&item);
            match processor.process(&item).await {
                Outcome::Success => {
                    tracing::debug!(item = %label, "processed");
                    report.succeeded.push(label);
                }
                Outcome::Skipped(reason) => {
                    tracing::debug!(item = %label, reason = %reason, "skipped");
                    report.skipped.push((label, reason));
                }
                Outcome::Failed(e) => {
                    let message = format!("{:#}", e);
                    tracing::warn!(item = %label, error = %message, "item failed");
                    report.failed.push((item, message));
                }
            }
            index += 1;

            if iter.peek().is_none() {
                break;
            }
            let delay = if index % batch_size == 0 {
                tracing::debug!(
                    batch = index / batch_size,
                    batches = batch_count,
                    "batch finished, pausing"
                );
                self.config.batch_delay
            } else {
                self.config.item_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        report.finished_at = Utc::now();
        tracing::info!(
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "runner finished"
        );
        report
    }

    /// Replay the failures of `report` once, after `retry_delay`.
    ///
    /// Recovered items move to `succeeded` (or `skipped`); items that fail
    /// again stay in `failed` with their new error message.
    pub async fn retry_failed<T, P>(&self, mut report: RunnerReport<T>, processor: &P) -> RunnerReport<T>
    where
        T: Send + Sync,
        P: ItemProcessor<T> + ?Sized,
    {
        if report.failed.is_empty() {
            return report;
        }

        tracing::info!(
            failed = report.failed.len(),
            delay_ms = self.config.retry_delay.as_millis() as u64,
            "retrying failed items"
        );
        if !self.config.retry_delay.is_zero() {
            tokio::time::sleep(self.config.retry_delay).await;
        }

        let failures = std::mem::take(&mut report.failed);
        let last = failures.len();
        for (n, (item, _)) in failures.into_iter().enumerate() {
            let label = processor.label(&item);
            match processor.process(&item).await {
                Outcome::Success => report.succeeded.push(label),
                Outcome::Skipped(reason) => report.skipped.push((label, reason)),
                Outcome::Failed(e) => {
                    let message = format!("{:#}", e);
                    tracing::warn!(item = %label, error = %message, "retry failed");
                    report.failed.push((item, message));
                }
            }
            if n + 1 < last && !self.config.item_delay.is_zero() {
                tokio::time::sleep(self.config.item_delay).await;
            }
        }

        report.finished_at = Utc::now();
        report
    }
}
