//! Processing metrics: a rolling window of `CycleReport`s persisted as
//! bounded JSONL, read back by `spark-cli status` to show the last
//! hundred cycles and a recent throughput trend.
//!
//! Grounded in `engine.rs`'s `CycleReport` shape and the ring-bounded
//! helper in `spark_core::jsonl`.

use crate::engine::CycleReport;
use serde::{Deserialize, Serialize};
use spark_core::jsonl;
use std::path::Path;

const ROLLING_WINDOW: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEntry {
    pub timestamp: i64,
    pub queue_depth_before: u64,
    pub batch_size: usize,
    pub events_read: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub derived_learnings: usize,
    pub duration_ms: u64,
}

impl MetricsEntry {
    pub fn from_report(report: &CycleReport, now: i64) -> Self {
        Self {
            timestamp: now,
            queue_depth_before: report.queue_depth_before,
            batch_size: report.batch_size,
            events_read: report.events_read,
            high: report.priority_breakdown.high,
            medium: report.priority_breakdown.medium,
            low: report.priority_breakdown.low,
            derived_learnings: report.derived_learnings,
            duration_ms: report.duration_ms,
        }
    }

    /// Events processed per second, 0 for an instantaneous or empty cycle.
    pub fn events_per_sec(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        self.events_read as f64 / (self.duration_ms as f64 / 1000.0)
    }
}

/// Appends one cycle's metrics to `path`, capped at the rolling window.
pub fn record_cycle(path: &Path, report: &CycleReport, now: i64) {
    jsonl::append_bounded(path, &MetricsEntry::from_report(report, now), ROLLING_WINDOW);
}

/// Reads the most recent `limit` entries, newest first.
pub fn recent(path: &Path, limit: usize) -> Vec<MetricsEntry> {
    jsonl::read_recent(path, limit)
}

/// Mean throughput over the last `window` entries (oldest-first order
/// doesn't matter for an average).
pub fn mean_throughput(entries: &[MetricsEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    entries.iter().map(MetricsEntry::events_per_sec).sum::<f64>() / entries.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CycleReport, PriorityBreakdown};

    fn report(events_read: usize, duration_ms: u64) -> CycleReport {
        CycleReport {
            queue_depth_before: 10,
            batch_size: 100,
            events_read,
            priority_breakdown: PriorityBreakdown { high: 1, medium: 2, low: 3 },
            derived_learnings: 0,
            consumed: true,
            duration_ms,
        }
    }

    #[test]
    fn record_and_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        record_cycle(&path, &report(50, 1000), 1);
        record_cycle(&path, &report(100, 500), 2);

        let entries = recent(&path, 10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].events_read, 100);
    }

    #[test]
    fn mean_throughput_averages_events_per_sec() {
        let entries = vec![
            MetricsEntry { timestamp: 0, queue_depth_before: 0, batch_size: 0, events_read: 100, high: 0, medium: 0, low: 0, derived_learnings: 0, duration_ms: 1000 },
            MetricsEntry { timestamp: 0, queue_depth_before: 0, batch_size: 0, events_read: 200, high: 0, medium: 0, low: 0, derived_learnings: 0, duration_ms: 1000 },
        ];
        assert!((mean_throughput(&entries) - 150.0).abs() < 1e-9);
    }
}
