// Observability counters for the hot path and the background trainer/GC.
//
// Mirrors the `CacheMetrics`-style stats struct the teacher keeps next to
// its cache layer: a plain struct of relaxed atomics, snapshotted into a
// serde-serializable value for the control surface's plain/JSON dump.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    pub writes: AtomicU64,
    pub reads: AtomicU64,
    pub bytes_raw: AtomicU64,
    pub bytes_cmp: AtomicU64,
    pub skipped_min: AtomicU64,
    pub skipped_max: AtomicU64,
    pub skipped_incompressible: AtomicU64,
    pub compress_errs: AtomicU64,
    pub decompress_errs: AtomicU64,
    pub dict_miss_errs: AtomicU64,
    pub trainer_runs: AtomicU64,
    pub trainer_errs: AtomicU64,
    pub reservoir_bytes: AtomicU64,
    pub reservoir_items: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct StatsSnapshot {
    pub writes: u64,
    pub reads: u64,
    pub bytes_raw: u64,
    pub bytes_cmp: u64,
    pub skipped_min: u64,
    pub skipped_max: u64,
    pub skipped_incompressible: u64,
    pub compress_errs: u64,
    pub decompress_errs: u64,
    pub dict_miss_errs: u64,
    pub trainer_runs: u64,
    pub trainer_errs: u64,
    pub reservoir_bytes: u64,
    pub reservoir_items: u64,
}

impl StatsSnapshot {
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_raw == 0 {
            0.0
        } else {
            self.bytes_cmp as f64 / self.bytes_raw as f64
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, raw: u64, cmp: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_raw.fetch_add(raw, Ordering::Relaxed);
        self.bytes_cmp.fetch_add(cmp, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self, reason: crate::error::SkipReason) {
        use crate::error::SkipReason::*;
        match reason {
            BelowMin => self.skipped_min.fetch_add(1, Ordering::Relaxed),
            AboveMax => self.skipped_max.fetch_add(1, Ordering::Relaxed),
            Incompressible => self.skipped_incompressible.fetch_add(1, Ordering::Relaxed),
            Disabled => 0,
        };
    }

    pub fn record_compress_err(&self) {
        self.compress_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decompress_err(&self) {
        self.decompress_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dict_miss(&self) {
        self.dict_miss_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trainer_run(&self) {
        self.trainer_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trainer_err(&self) {
        self.trainer_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_reservoir_gauges(&self, bytes: u64, items: u64) {
        self.reservoir_bytes.store(bytes, Ordering::Relaxed);
        self.reservoir_items.store(items, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            bytes_raw: self.bytes_raw.load(Ordering::Relaxed),
            bytes_cmp: self.bytes_cmp.load(Ordering::Relaxed),
            skipped_min: self.skipped_min.load(Ordering::Relaxed),
            skipped_max: self.skipped_max.load(Ordering::Relaxed),
            skipped_incompressible: self.skipped_incompressible.load(Ordering::Relaxed),
            compress_errs: self.compress_errs.load(Ordering::Relaxed),
            decompress_errs: self.decompress_errs.load(Ordering::Relaxed),
            dict_miss_errs: self.dict_miss_errs.load(Ordering::Relaxed),
            trainer_runs: self.trainer_runs.load(Ordering::Relaxed),
            trainer_errs: self.trainer_errs.load(Ordering::Relaxed),
            reservoir_bytes: self.reservoir_bytes.load(Ordering::Relaxed),
            reservoir_items: self.reservoir_items.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let s = Stats::new();
        s.record_write(100, 40);
        s.record_read();
        s.record_skip(crate::error::SkipReason::BelowMin);

        let snap = s.snapshot();
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.reads, 1);
        assert_eq!(snap.bytes_raw, 100);
        assert_eq!(snap.bytes_cmp, 40);
        assert_eq!(snap.skipped_min, 1);
        assert!((snap.compression_ratio() - 0.4).abs() < 1e-9);
    }
}
