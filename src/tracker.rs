// C1: Efficiency tracker.
//
// Maintains an EWMA of the compression ratio (compressed/original, smaller
// is better) and decides when the trainer should run. A single shared
// instance; every field is an independent atomic so the hot path never
// locks. Doubles are stored bit-cast into a 64-bit cell per spec §5/§9 —
// readers may observe a momentarily inconsistent (ewma, baseline) pair,
// which is fine for a heuristic retrain decision.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct EfficiencyTracker {
    ewma_bits: AtomicU64,
    baseline_bits: AtomicU64,
    initialized: AtomicBool,
    bytes_since_train: AtomicU64,
    last_train_ts: AtomicU64,
    alpha: f64,
    retrain_drop: f64,
    retraining_interval_s: u64,
    min_training_size: u64,
    enable_training: bool,
}

impl EfficiencyTracker {
    pub fn new(
        alpha: f64,
        retrain_drop: f64,
        retraining_interval_s: u64,
        min_training_size: u64,
        enable_training: bool,
    ) -> Self {
        Self {
            ewma_bits: AtomicU64::new(0),
            baseline_bits: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
            bytes_since_train: AtomicU64::new(0),
            last_train_ts: AtomicU64::new(0),
            alpha,
            retrain_drop,
            retraining_interval_s,
            min_training_size,
            enable_training,
        }
    }

    pub fn ewma(&self) -> f64 {
        f64::from_bits(self.ewma_bits.load(Ordering::Relaxed))
    }

    pub fn baseline(&self) -> f64 {
        f64::from_bits(self.baseline_bits.load(Ordering::Relaxed))
    }

    /// Report one compression observation. No-op if `original_bytes == 0`.
    pub fn on_observation(&self, original_bytes: u64, compressed_bytes: u64) {
        if original_bytes == 0 {
            return;
        }
        let r = compressed_bytes as f64 / original_bytes as f64;

        if !self.initialized.load(Ordering::Acquire) {
            self.ewma_bits.store(r.to_bits(), Ordering::Relaxed);
            self.initialized.store(true, Ordering::Release);
        } else {
            let mut backoff = crate::concurrent::Backoff::new();
            loop {
                let current_bits = self.ewma_bits.load(Ordering::Relaxed);
                let current = f64::from_bits(current_bits);
                let updated = (1.0 - self.alpha) * current + self.alpha * r;
                match self.ewma_bits.compare_exchange_weak(
                    current_bits,
                    updated.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(_) => backoff.spin(),
                }
            }
        }

        self.bytes_since_train
            .fetch_add(original_bytes, Ordering::Relaxed);
    }

    /// True iff all retrain gates pass: training enabled, EWMA initialized,
    /// enough wall-clock time and bytes have accumulated since the last
    /// retrain, and the ratio has worsened past the baseline by
    /// `retrain_drop`. When `baseline == 0` (first ever train) only the
    /// byte/time gates apply.
    pub fn should_retrain(&self, now_s: u64) -> bool {
        if !self.enable_training {
            return false;
        }
        if !self.initialized.load(Ordering::Acquire) {
            return false;
        }
        let last_train_ts = self.last_train_ts.load(Ordering::Relaxed);
        if now_s.saturating_sub(last_train_ts) < self.retraining_interval_s {
            return false;
        }
        if self.bytes_since_train.load(Ordering::Relaxed) < self.min_training_size {
            return false;
        }
        let baseline = self.baseline();
        if baseline == 0.0 {
            return true;
        }
        self.ewma() >= baseline * (1.0 + self.retrain_drop)
    }

    /// Record that a retrain just completed: the baseline can only improve
    /// (non-increasing invariant), the retrain clock and byte counter reset.
    pub fn mark_retrained(&self, now_s: u64) {
        let ewma = self.ewma();
        let mut backoff = crate::concurrent::Backoff::new();
        loop {
            let current_bits = self.baseline_bits.load(Ordering::Relaxed);
            let current = f64::from_bits(current_bits);
            let new_baseline = if current == 0.0 { ewma } else { current.min(ewma) };
            match self.baseline_bits.compare_exchange_weak(
                current_bits,
                new_baseline.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(_) => backoff.spin(),
            }
        }
        self.last_train_ts.store(now_s, Ordering::Relaxed);
        self.bytes_since_train.store(0, Ordering::Relaxed);
    }

    pub fn bytes_since_train(&self) -> u64 {
        self.bytes_since_train.load(Ordering::Relaxed)
    }
}
