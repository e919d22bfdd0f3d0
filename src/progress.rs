//! Embed progress reporting.
//!
//! Reports per-batch progress during `rembed embed` so users see how much
//! is left. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

use report_embedder_core::materializer::{MaterializeEvent, MaterializeProgress, NoProgress};

/// Human-friendly progress on stderr: "embed  batch 3 / 40  processed 96  failed 0".
pub struct StderrProgress;

impl MaterializeProgress for StderrProgress {
    fn report(&self, event: MaterializeEvent) {
        let line = match &event {
            MaterializeEvent::Started { total, batches } => format!(
                "embed  {} blocks in {} batches\n",
                format_number(*total),
                format_number(*batches)
            ),
            MaterializeEvent::BatchFinished {
                index,
                batches,
                processed,
                failed,
            } => format!(
                "embed  batch {} / {}  processed {}  failed {}\n",
                format_number(index + 1),
                format_number(*batches),
                format_number(*processed),
                format_number(*failed)
            ),
            MaterializeEvent::Finished { processed, failed } => format!(
                "embed  done  processed {}  failed {}\n",
                format_number(*processed),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl MaterializeProgress for JsonProgress {
    fn report(&self, event: MaterializeEvent) {
        let obj = match &event {
            MaterializeEvent::Started { total, batches } => serde_json::json!({
                "event": "started",
                "total": total,
                "batches": batches
            }),
            MaterializeEvent::BatchFinished {
                index,
                batches,
                processed,
                failed,
            } => serde_json::json!({
                "event": "batch",
                "index": index,
                "batches": batches,
                "processed": processed,
                "failed": failed
            }),
            MaterializeEvent::Finished { processed, failed } => serde_json::json!({
                "event": "finished",
                "processed": processed,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn MaterializeProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_mode_parses_from_cli_value() {
        use clap::ValueEnum;
        assert_eq!(ProgressMode::from_str("json", true).unwrap(), ProgressMode::Json);
        assert_eq!(ProgressMode::from_str("off", true).unwrap(), ProgressMode::Off);
    }
}
