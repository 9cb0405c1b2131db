// C2: Sample reservoir.
//
// A lock-free MPSC stack of training samples with a byte budget. Built on
// the same Treiber stack that backs the retired-table queue (C7); the only
// addition here is the `bytes_pending` byte counter and back-pressure.

use crate::concurrent::LockFreeStack;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct SampleNode {
    pub data: Vec<u8>,
}

pub struct Reservoir {
    stack: LockFreeStack<SampleNode>,
    bytes_pending: AtomicU64,
    limit: u64,
}

impl Reservoir {
    /// `limit` is the back-pressure byte budget; spec default is `dict_size * 100`.
    pub fn new(limit: u64) -> Self {
        Self {
            stack: LockFreeStack::new(),
            bytes_pending: AtomicU64::new(0),
            limit,
        }
    }

    pub fn bytes_pending(&self) -> u64 {
        self.bytes_pending.load(Ordering::Relaxed)
    }

    pub fn is_over_limit(&self) -> bool {
        self.bytes_pending() >= self.limit
    }

    /// Push a copy of `buf`. Producers must check `is_over_limit` first;
    /// this call itself never blocks or rejects.
    pub fn push(&self, buf: &[u8]) {
        let len = buf.len() as u64;
        self.stack.push(SampleNode { data: buf.to_vec() });
        self.bytes_pending.fetch_add(len, Ordering::Relaxed);
    }

    /// Atomically detach and return every sample currently on the stack.
    /// Order is LIFO and not semantically meaningful for training.
    pub fn drain_all(&self) -> Vec<SampleNode> {
        self.stack.pop_all()
    }

    /// Decrement `bytes_pending` by the amount actually consumed for
    /// training, saturating at zero to tolerate concurrent pushes that
    /// happened between drain and this call.
    pub fn release_bytes(&self, amount: u64) {
        let mut backoff = crate::concurrent::Backoff::new();
        loop {
            let current = self.bytes_pending.load(Ordering::Relaxed);
            let updated = current.saturating_sub(amount);
            match self.bytes_pending.compare_exchange_weak(
                current,
                updated,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Return previously-drained-but-unused bytes to the pending count, used
    /// by the trainer's Fail transition (batch dropped, bytes given back).
    pub fn return_bytes(&self, amount: u64) {
        self.bytes_pending.fetch_add(amount, Ordering::Relaxed);
    }
}
