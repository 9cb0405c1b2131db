// C7: Deferred reclamation.
//
// A single-threaded background reaper of retired routing tables. When a new
// table is published, the old pointer is wrapped in a retired node stamped
// with the retirement time and pushed onto this module's MPSC stack. The
// reap loop periodically drains the stack and frees any table whose
// cool-off period has elapsed, releasing its DictMeta back to the pool
// first. It also unlinks dict files whose id has both aged out of
// quarantine and no longer appears in the live table.

use crate::concurrent::LockFreeStack;
use crate::dict::meta::{self, DictId};
use crate::pool::DictPool;
use crate::ratelimit::RateLimitedLog;
use crate::routing::{RoutingTable, RoutingTableHandle};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct RetiredNode {
    table: *mut RoutingTable,
    retired_at: u64,
}

// Safety: a RetiredNode's table pointer is only ever dereferenced by the
// single GC thread that owns this queue.
unsafe impl Send for RetiredNode {}

pub struct Gc {
    queue: LockFreeStack<RetiredNode>,
    stop: Arc<AtomicBool>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Gc {
    pub fn new() -> Self {
        Self {
            queue: LockFreeStack::new(),
            stop: Arc::new(AtomicBool::new(false)),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Enqueue a retired table for eventual reclamation.
    pub fn retire(&self, table: *mut RoutingTable) {
        self.queue.push(RetiredNode {
            table,
            retired_at: meta::now_epoch_s(),
        });
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn start(
        self: &Arc<Self>,
        pool: Arc<DictPool>,
        dict_dir: PathBuf,
        live_table: Arc<RoutingTableHandle>,
        cool_period_s: u64,
        quarantine_period_s: u64,
    ) {
        let this = self.clone();
        let stop = self.stop.clone();
        let log = Arc::new(RateLimitedLog::new(60));

        let handle = std::thread::spawn(move || {
            reap_loop(
                this,
                pool,
                dict_dir,
                live_table,
                cool_period_s,
                quarantine_period_s,
                stop,
                log,
            );
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Set the stop flag; the loop observes it at the top of each iteration
    /// and exits after one final drain.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        // Any tables still queued at shutdown are leaked rather than freed
        // unconditionally — a reader could still hold a reference and we
        // have no way to prove otherwise outside the reap loop's cool-off
        // check. This mirrors the "no hazard pointers" tradeoff in the
        // concurrency model.
    }
}

fn reap_once(
    gc: &Gc,
    pool: &DictPool,
    dict_dir: &std::path::Path,
    live_table: &RoutingTableHandle,
    cool_period_s: u64,
    quarantine_period_s: u64,
    log: &RateLimitedLog,
) {
    let now = meta::now_epoch_s();
    let drained = gc.queue.pop_all();

    let mut live_ids: HashSet<DictId> = HashSet::new();
    for dict_meta in live_table.current().all_dicts() {
        live_ids.insert(dict_meta.id);
    }

    for node in drained {
        if now.saturating_sub(node.retired_at) >= cool_period_s {
            // Safety: cool-off has elapsed; no reader can still be holding
            // a reference bounded by the concurrency model's assumption
            // that every operation completes within that window.
            let table = unsafe { Box::from_raw(node.table) };
            for dict_meta in table.all_dicts() {
                pool.release_for_meta(dict_meta);
            }
            drop(table);
        } else {
            gc.queue.push(node);
        }
    }

    if let Err(e) = unlink_quarantined_files(dict_dir, &live_ids, quarantine_period_s, now) {
        log.error(&format!("gc: failed to unlink quarantined dict files: {e}"));
    }
}

/// Unlink dict files whose retirement has aged past quarantine and whose id
/// no longer appears in the live table.
fn unlink_quarantined_files(
    dict_dir: &std::path::Path,
    live_ids: &HashSet<DictId>,
    quarantine_period_s: u64,
    now: u64,
) -> std::io::Result<()> {
    let ids = match meta::scan_ids(dict_dir) {
        Ok(ids) => ids,
        Err(_) => return Ok(()),
    };
    for id in ids {
        if live_ids.contains(&id) {
            continue;
        }
        let Ok(m) = meta::load_meta(dict_dir, id) else {
            continue;
        };
        if m.is_active() {
            continue;
        }
        if now.saturating_sub(m.retired_at) < quarantine_period_s {
            continue;
        }
        let _ = std::fs::remove_file(&m.dict_path);
        let _ = std::fs::remove_file(&m.manifest_path);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn reap_loop(
    gc: Arc<Gc>,
    pool: Arc<DictPool>,
    dict_dir: PathBuf,
    live_table: Arc<RoutingTableHandle>,
    cool_period_s: u64,
    quarantine_period_s: u64,
    stop: Arc<AtomicBool>,
    log: Arc<RateLimitedLog>,
) {
    loop {
        if stop.load(Ordering::Acquire) {
            reap_once(
                &gc,
                &pool,
                &dict_dir,
                &live_table,
                cool_period_s,
                quarantine_period_s,
                &log,
            );
            return;
        }
        reap_once(
            &gc,
            &pool,
            &dict_dir,
            &live_table,
            cool_period_s,
            quarantine_period_s,
            &log,
        );
        std::thread::sleep(POLL_INTERVAL);
    }
}
