// C8: Online trainer.
//
// A single background thread, looping roughly once a second, that watches
// the efficiency tracker and the sample reservoir. When the workload drifts
// enough (or there is no "default" dictionary yet), it drains the reservoir,
// trains a new dictionary, persists it, rebuilds and publishes a routing
// table, and retires the old one to the GC. Everything here runs off the
// hot path; failures are logged rate-limited and counted, never panicked.

use crate::config::{Config, TrainMode};
use crate::dict::meta::{self, DictId};
use crate::error::DcError;
use crate::gc::Gc;
use crate::pool::DictPool;
use crate::ratelimit::RateLimitedLog;
use crate::reservoir::Reservoir;
use crate::routing::{scan_dict_dir, RoutingTableHandle};
use crate::stats::Stats;
use crate::tracker::EfficiencyTracker;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_DICT_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Active,
}

pub struct Trainer {
    stop: Arc<AtomicBool>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Trainer {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            worker: std::sync::Mutex::new(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &self,
        config: Arc<Config>,
        tracker: Arc<EfficiencyTracker>,
        reservoir: Arc<Reservoir>,
        live_table: Arc<RoutingTableHandle>,
        pool: Arc<DictPool>,
        gc: Arc<Gc>,
        stats: Arc<Stats>,
    ) {
        let stop = self.stop.clone();
        let log = Arc::new(RateLimitedLog::new(60));

        let handle = std::thread::spawn(move || {
            train_loop(config, tracker, reservoir, live_table, pool, gc, stats, stop, log);
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::too_many_arguments)]
fn train_loop(
    config: Arc<Config>,
    tracker: Arc<EfficiencyTracker>,
    reservoir: Arc<Reservoir>,
    live_table: Arc<RoutingTableHandle>,
    pool: Arc<DictPool>,
    gc: Arc<Gc>,
    stats: Arc<Stats>,
    stop: Arc<AtomicBool>,
    log: Arc<RateLimitedLog>,
) {
    let mut state = State::Idle;

    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }

        let now = meta::now_epoch_s();

        match state {
            State::Idle => {
                let needs_bootstrap = !live_table.current().has_default();
                if needs_bootstrap || tracker.should_retrain(now) {
                    state = State::Active;
                }
            }
            State::Active => {
                if reservoir.bytes_pending() < config.min_training_size as u64 {
                    // wait
                } else {
                    state = run_build_iteration(
                        &config, &tracker, &reservoir, &live_table, &pool, &gc, &stats, &log, now,
                    );
                }
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Runs the Build -> Persist|Fail portion of one iteration and returns the
/// state to resume from (Idle after a successful publish, Active otherwise).
#[allow(clippy::too_many_arguments)]
fn run_build_iteration(
    config: &Config,
    tracker: &EfficiencyTracker,
    reservoir: &Reservoir,
    live_table: &Arc<RoutingTableHandle>,
    pool: &Arc<DictPool>,
    gc: &Arc<Gc>,
    stats: &Stats,
    log: &RateLimitedLog,
    now: u64,
) -> State {
    stats.record_trainer_run();

    let samples = reservoir.drain_all();
    if samples.is_empty() {
        log.warn("trainer: reservoir empty at build time");
        return State::Active;
    }

    // Overflow in size accumulation drops the batch defensively: the drained
    // samples are gone either way, so zero out the accounting rather than
    // leave it stuck on an unrepresentable total.
    let total_bytes = match samples
        .iter()
        .try_fold(0u64, |acc, s| acc.checked_add(s.data.len() as u64))
    {
        Some(total) => total,
        None => {
            log.error("trainer: sample byte count overflowed, batch dropped");
            stats.record_trainer_err();
            reservoir.release_bytes(u64::MAX);
            stats.set_reservoir_gauges(0, 0);
            return State::Active;
        }
    };
    let sample_bufs: Vec<Vec<u8>> = samples.into_iter().map(|s| s.data).collect();

    // The drained batch is off the stack now; reflect that immediately so
    // `bytes_pending` never double-counts it. A failed attempt below gives
    // the same amount back via `return_bytes`, leaving the counter exactly
    // where it was before this batch was drained.
    reservoir.release_bytes(total_bytes);
    stats.set_reservoir_gauges(0, 0);

    match train_dictionary(&sample_bufs, config) {
        Ok(dict_bytes) if dict_bytes.len() >= MIN_DICT_BYTES => {
            match persist_and_publish(config, live_table, pool, gc, &dict_bytes, now) {
                Ok(()) => {
                    tracker.mark_retrained(now);
                    State::Idle
                }
                Err(e) => {
                    log.error(&format!("trainer: persist/publish failed: {e}"));
                    stats.record_trainer_err();
                    reservoir.return_bytes(total_bytes);
                    State::Active
                }
            }
        }
        Ok(_too_small) => {
            log.warn("trainer: trained dictionary below minimum size, batch dropped");
            stats.record_trainer_err();
            reservoir.return_bytes(total_bytes);
            State::Active
        }
        Err(e) => {
            log.error(&format!("trainer: training failed: {e}"));
            stats.record_trainer_err();
            reservoir.return_bytes(total_bytes);
            State::Active
        }
    }
}

/// Train a dictionary from the flattened sample set. FAST uses the codec's
/// default "fast cover" parameters; OPTIMIZE runs the COVER algorithm's
/// parameter-search variant.
fn train_dictionary(samples: &[Vec<u8>], config: &Config) -> Result<Vec<u8>, DcError> {
    if samples.is_empty() {
        return Err(DcError::InvalidArg("no samples to train on".into()));
    }
    match config.train_mode {
        TrainMode::Fast => zstd::dict::from_samples(samples, config.dict_size)
            .map_err(|e| DcError::CodecError(e.raw_os_error().unwrap_or(-1))),
        TrainMode::Optimize => {
            train_dictionary_optimize(samples, config.dict_size, config.zstd_level)
        }
    }
}

/// OPTIMIZE mode: `ZDICT_optimizeTrainFromBuffer_cover`, which tries many
/// `(k, d)` parameter combinations and keeps the best dictionary found. The
/// safe `zstd` crate's `dict` module only wraps the single-pass
/// `ZDICT_trainFromBuffer` entry point FAST uses, so this goes straight
/// through `zstd-sys`.
fn train_dictionary_optimize(
    samples: &[Vec<u8>],
    dict_size: usize,
    zstd_level: i32,
) -> Result<Vec<u8>, DcError> {
    let total: usize = samples.iter().map(|s| s.len()).sum();
    let mut flat = Vec::with_capacity(total);
    let mut sizes = Vec::with_capacity(samples.len());
    for s in samples {
        flat.extend_from_slice(s);
        sizes.push(s.len());
    }

    let mut dict_buffer = vec![0u8; dict_size];
    // k, d, and steps left at 0 so the search covers its own default grid
    // (d in {6, 8}, k in the [50, 2000]-step range); single-threaded.
    let mut params: zstd_sys::ZDICT_cover_params_t = unsafe { std::mem::zeroed() };
    params.nbThreads = 1;
    params.zParams.compressionLevel = zstd_level;

    let written = unsafe {
        zstd_sys::ZDICT_optimizeTrainFromBuffer_cover(
            dict_buffer.as_mut_ptr() as *mut std::ffi::c_void,
            dict_buffer.len(),
            flat.as_ptr() as *const std::ffi::c_void,
            sizes.as_ptr(),
            sizes.len() as u32,
            &mut params,
        )
    };

    if unsafe { zstd_sys::ZDICT_isError(written) } != 0 {
        return Err(DcError::CodecError(written as i32));
    }

    dict_buffer.truncate(written);
    Ok(dict_buffer)
}

fn persist_and_publish(
    config: &Config,
    live_table: &Arc<RoutingTableHandle>,
    pool: &Arc<DictPool>,
    gc: &Arc<Gc>,
    dict_bytes: &[u8],
    now: u64,
) -> Result<(), DcError> {
    let dict_dir = std::path::Path::new(&config.dict_dir);
    std::fs::create_dir_all(dict_dir)?;

    let id = allocate_next_id(dict_dir, config.gc_quarantine_period_s, now)?;
    meta::persist_new_dict(dict_dir, id, dict_bytes, config.zstd_level, Vec::new())?;

    let generation = live_table.next_generation();
    let new_table = scan_dict_dir(dict_dir, config.dict_retain_max, pool, generation)?;
    let old_table_ptr = live_table.publish(new_table);
    gc.retire(old_table_ptr);
    Ok(())
}

fn allocate_next_id(dict_dir: &std::path::Path, quarantine_s: u64, now: u64) -> Result<DictId, DcError> {
    let ids = meta::scan_ids(dict_dir)?;
    let mut active: HashSet<DictId> = HashSet::new();
    let mut retired: HashMap<DictId, u64> = HashMap::new();

    for id in ids {
        if let Ok(m) = meta::load_meta(dict_dir, id) {
            if m.is_active() {
                active.insert(id);
            } else {
                retired.insert(id, m.retired_at);
            }
        }
    }

    meta::allocate_id(&active, |id| retired.get(&id).copied(), quarantine_s, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingTable;

    fn fixture_samples() -> Vec<Vec<u8>> {
        (0..300)
            .map(|i| format!("{{\"type\":\"order\",\"id\":{i},\"status\":\"ok\"}}").into_bytes())
            .collect()
    }

    #[test]
    fn train_dictionary_produces_nonempty_dict() {
        let config = Config {
            dict_size: 8192,
            ..Config::default()
        };
        let dict = train_dictionary(&fixture_samples(), &config).unwrap();
        assert!(!dict.is_empty());
    }

    #[test]
    fn optimize_mode_runs_cover_parameter_search() {
        let config = Config {
            dict_size: 8192,
            train_mode: TrainMode::Optimize,
            ..Config::default()
        };
        let dict = train_dictionary(&fixture_samples(), &config).unwrap();
        assert!(!dict.is_empty());
        assert!(dict.len() <= 8192);
    }

    #[test]
    fn successful_retrain_releases_drained_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            dict_dir: dir.path().to_string_lossy().to_string(),
            dict_size: 8192,
            ..Config::default()
        };
        let reservoir = Reservoir::new(u64::MAX);
        for s in fixture_samples() {
            reservoir.push(&s);
        }
        let pending_before = reservoir.bytes_pending();
        assert!(pending_before > 0);

        let tracker = EfficiencyTracker::new(0.2, 0.1, 0, 0, true);
        let pool = Arc::new(DictPool::new());
        let live_table = Arc::new(RoutingTableHandle::new(RoutingTable::empty(1)));
        let gc = Arc::new(Gc::new());
        let stats = Stats::new();

        let state = run_build_iteration(
            &config,
            &tracker,
            &reservoir,
            &live_table,
            &pool,
            &gc,
            &stats,
            &RateLimitedLog::new(60),
            meta::now_epoch_s(),
        );

        assert_eq!(state, State::Idle);
        assert_eq!(reservoir.bytes_pending(), 0);
        let snap = stats.snapshot();
        assert_eq!(snap.reservoir_bytes, 0);
        assert_eq!(snap.reservoir_items, 0);
    }

    #[test]
    fn failed_retrain_leaves_bytes_pending_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // dict_size below MIN_DICT_BYTES forces the "too small" branch.
        let config = Config {
            dict_dir: dir.path().to_string_lossy().to_string(),
            dict_size: 200,
            ..Config::default()
        };
        let reservoir = Reservoir::new(u64::MAX);
        for s in fixture_samples() {
            reservoir.push(&s);
        }
        let pending_before = reservoir.bytes_pending();

        let tracker = EfficiencyTracker::new(0.2, 0.1, 0, 0, true);
        let pool = Arc::new(DictPool::new());
        let live_table = Arc::new(RoutingTableHandle::new(RoutingTable::empty(1)));
        let gc = Arc::new(Gc::new());
        let stats = Stats::new();

        let state = run_build_iteration(
            &config,
            &tracker,
            &reservoir,
            &live_table,
            &pool,
            &gc,
            &stats,
            &RateLimitedLog::new(60),
            meta::now_epoch_s(),
        );

        assert_eq!(state, State::Active);
        assert_eq!(reservoir.bytes_pending(), pending_before);
    }

    #[test]
    fn bootstrap_end_to_end_matches_scenario_1() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            dict_dir: dir.path().to_string_lossy().to_string(),
            dict_size: 65_536,
            min_training_size: 1_048_576,
            ewma_alpha: 0.2,
            retrain_drop: 0.1,
            min_comp_size: 32,
            max_comp_size: 100_000,
            ..Config::default()
        });

        let tracker = Arc::new(EfficiencyTracker::new(
            config.ewma_alpha,
            config.retrain_drop,
            config.retraining_interval_s,
            config.min_training_size as u64,
            true,
        ));
        let reservoir = Arc::new(Reservoir::new(config.dict_size as u64 * 100));
        let pool = Arc::new(DictPool::new());
        let live_table = Arc::new(RoutingTableHandle::new(RoutingTable::empty(1)));
        let gc = Arc::new(Gc::new());
        let stats = Arc::new(Stats::new());

        for i in 0..20_000u32 {
            let value = format!(
                "{{\"type\":\"event\",\"seq\":{i},\"payload\":\"constant-shared-structure-filler\"}}"
            );
            reservoir.push(value.as_bytes());
        }

        let now = meta::now_epoch_s();
        let state = run_build_iteration(
            &config,
            &tracker,
            &reservoir,
            &live_table,
            &pool,
            &gc,
            &stats,
            &RateLimitedLog::new(60),
            now,
        );

        assert_eq!(state, State::Idle);
        assert_eq!(live_table.current().generation, 2);
        assert!(live_table.current().has_default());

        let dict_meta = live_table.current().pick_dict(b"anything").unwrap();
        assert_eq!(dict_meta.id, 1);
        assert!(dict_meta.size_bytes >= MIN_DICT_BYTES as u64);
    }
}
