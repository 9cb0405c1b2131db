// Lock-free stack implementation.
//
// This is the Treiber stack algorithm, a lock-free LIFO that uses
// compare-and-swap. It backs the sample reservoir (C2) and the retired
// routing-table queue (C7): many producer threads push, a single background
// thread drains with `pop_all`.
//
// Reference: "Systems Programming: Coping with Parallelism" by R.K. Treiber (1986)

use super::epoch::{Atomic, Epoch, EpochGuard, Owned, Shared};
use super::Backoff;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Cache-line padded node to avoid false sharing.
#[repr(C, align(64))]
pub struct StackNode<T> {
    data: T,
    next: Atomic<StackNode<T>>,
}

impl<T> StackNode<T> {
    fn new(data: T) -> Self {
        Self {
            data,
            next: Atomic::null(),
        }
    }
}

/// Treiber lock-free stack.
///
/// Supports concurrent push and pop without locks, using the epoch scheme in
/// [`super::epoch`] to defer reclamation of popped nodes until no other
/// thread can still be dereferencing them.
#[repr(C, align(64))]
pub struct LockFreeStack<T> {
    head: Atomic<StackNode<T>>,
    size: AtomicUsize,
    push_count: AtomicU64,
    pop_count: AtomicU64,
}

impl<T: 'static> LockFreeStack<T> {
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
            size: AtomicUsize::new(0),
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
        }
    }

    /// Push an item onto the stack. Lock-free, always succeeds.
    pub fn push(&self, value: T) {
        let guard = Epoch::pin();
        let node = Owned::new(StackNode::new(value));
        let node_ptr = node.into_shared();
        let mut backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);

            // Safety: node_ptr is not yet visible to other threads.
            unsafe {
                node_ptr.as_ref().unwrap().next.store(head, Ordering::Relaxed);
            }

            match self.head.compare_exchange_weak(
                head,
                node_ptr,
                Ordering::Release,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    self.push_count.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Pop an item from the stack, or `None` if empty.
    pub fn pop(&self) -> Option<T> {
        let guard = Epoch::pin();
        let mut backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);

            if head.is_null() {
                return None;
            }

            // Safety: protected by the epoch guard.
            let next = unsafe { head.as_ref().unwrap().next.load(Ordering::Acquire, &guard) };

            match self.head.compare_exchange_weak(
                head,
                next,
                Ordering::Release,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    self.size.fetch_sub(1, Ordering::Relaxed);
                    self.pop_count.fetch_add(1, Ordering::Relaxed);

                    // Safety: we just unlinked this node, we're its sole owner now.
                    let result = unsafe {
                        let node_ptr = head.as_ptr();
                        std::ptr::read(&(*node_ptr).data)
                    };

                    Epoch::defer(head.as_ptr());
                    return Some(result);
                }
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Peek at the top item without removing it.
    pub fn peek<'g>(&self, guard: &'g EpochGuard) -> Option<&'g T> {
        let head = self.head.load(Ordering::Acquire, guard);
        if head.is_null() {
            None
        } else {
            // Safety: protected by the epoch guard.
            Some(unsafe { &head.as_ref().unwrap().data })
        }
    }

    pub fn is_empty(&self) -> bool {
        let guard = Epoch::pin();
        self.head.load(Ordering::Acquire, &guard).is_null()
    }

    /// Approximate size (a relaxed counter, not linearizable with push/pop).
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> StackStats {
        StackStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            current_size: self.size.load(Ordering::Relaxed),
        }
    }

    /// Atomically detach the entire stack and return its contents in LIFO order.
    ///
    /// Used by the reservoir and GC queue consumers to drain everything in
    /// one CAS instead of popping one at a time.
    pub fn pop_all(&self) -> Vec<T> {
        let guard = Epoch::pin();
        let mut backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);

            if head.is_null() {
                return Vec::new();
            }

            match self.head.compare_exchange_weak(
                head,
                Shared::null(),
                Ordering::Release,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    let mut result = Vec::new();
                    let mut current = head;

                    while !current.is_null() {
                        // Safety: we detached this chain, we're its sole owner now.
                        unsafe {
                            let node_ptr = current.as_ptr();
                            let data = std::ptr::read(&(*node_ptr).data);
                            result.push(data);

                            let next = (*node_ptr).next.load(Ordering::Relaxed, &guard);
                            Epoch::defer(node_ptr);
                            current = next;
                        }
                    }

                    self.size.store(0, Ordering::Relaxed);
                    return result;
                }
                Err(_) => backoff.spin(),
            }
        }
    }
}

impl<T: 'static> Default for LockFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

// Safety: all mutation goes through atomic CAS on `head`.
unsafe impl<T: Send + 'static> Send for LockFreeStack<T> {}
unsafe impl<T: Send + 'static> Sync for LockFreeStack<T> {}

#[derive(Debug, Clone, Copy)]
pub struct StackStats {
    pub push_count: u64,
    pub pop_count: u64,
    pub current_size: usize,
}
