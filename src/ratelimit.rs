// Rate-limited logging for background threads.
//
// spec §7 "Propagation": background thread errors (trainer, GC, sampler) are
// logged through a rate limiter — no more than one message per configurable
// interval per call site — so a storm of repeated codec/IO failures doesn't
// flood the log. Each call site owns one `RateLimitedLog`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct RateLimitedLog {
    interval_s: u64,
    last_emit_s: AtomicU64,
}

impl RateLimitedLog {
    pub const fn new(interval_s: u64) -> Self {
        Self {
            interval_s,
            last_emit_s: AtomicU64::new(0),
        }
    }

    /// Returns true if a message should be emitted now (and records that one was).
    fn should_emit(&self, now_s: u64) -> bool {
        let last = self.last_emit_s.load(Ordering::Relaxed);
        if now_s.saturating_sub(last) < self.interval_s {
            return false;
        }
        self.last_emit_s
            .compare_exchange(last, now_s, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Log `msg` at warn level, suppressed if the interval since the last
    /// emission from this site hasn't elapsed yet.
    pub fn warn(&self, msg: &str) {
        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if self.should_emit(now_s) {
            tracing::warn!("{msg}");
        }
    }

    pub fn error(&self, msg: &str) {
        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if self.should_emit(now_s) {
            tracing::error!("{msg}");
        }
    }
}
