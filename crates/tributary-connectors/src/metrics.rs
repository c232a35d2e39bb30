//! Extraction metrics.
//!
//! - `ExtractMetrics`: Atomic counters updated by partition workers
//! - `ExtractMetricsSnapshot`: Point-in-time copy of the counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracked while extracting one feed.
///
/// Shared by every worker of the feed; all updates are relaxed atomics.
#[derive(Debug)]
pub struct ExtractMetrics {
    /// Total rows emitted.
    pub records_total: AtomicU64,

    /// Total Arrow bytes emitted.
    pub bytes_total: AtomicU64,

    /// Total batches emitted.
    pub batches_total: AtomicU64,

    /// Total partitions executed to completion.
    pub partitions_total: AtomicU64,

    /// Total checkpoint writes, including the compaction that closes a
    /// stream.
    pub checkpoints_total: AtomicU64,

    /// Total partition failures.
    pub errors_total: AtomicU64,
}

impl ExtractMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records_total: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            batches_total: AtomicU64::new(0),
            partitions_total: AtomicU64::new(0),
            checkpoints_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        }
    }

    /// Records that a batch was emitted.
    pub fn record_batch(&self, record_count: u64, byte_count: u64) {
        self.records_total.fetch_add(record_count, Ordering::Relaxed);
        self.bytes_total.fetch_add(byte_count, Ordering::Relaxed);
        self.batches_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a partition whose rows and checkpoint are both out.
    pub fn record_partition(&self) {
        self.partitions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a checkpoint write.
    pub fn record_checkpoint(&self) {
        self.checkpoints_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed partition.
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> ExtractMetricsSnapshot {
        ExtractMetricsSnapshot {
            records_total: self.records_total.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            partitions_total: self.partitions_total.load(Ordering::Relaxed),
            checkpoints_total: self.checkpoints_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for ExtractMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of extraction metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractMetricsSnapshot {
    /// Total rows emitted.
    pub records_total: u64,

    /// Total Arrow bytes emitted.
    pub bytes_total: u64,

    /// Total batches emitted.
    pub batches_total: u64,

    /// Total partitions completed.
    pub partitions_total: u64,

    /// Total checkpoint writes.
    pub checkpoints_total: u64,

    /// Total partition failures.
    pub errors_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_metrics() {
        let metrics = ExtractMetrics::new();
        metrics.record_batch(100, 5000);
        metrics.record_batch(200, 10000);
        metrics.record_checkpoint();
        metrics.record_partition();
        metrics.record_checkpoint();
        metrics.record_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.records_total, 300);
        assert_eq!(snap.bytes_total, 15000);
        assert_eq!(snap.batches_total, 2);
        assert_eq!(snap.partitions_total, 1);
        assert_eq!(snap.checkpoints_total, 2);
        assert_eq!(snap.errors_total, 1);
    }
}
