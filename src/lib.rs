// RustyDict - Adaptive dictionary-compression core for an in-memory
// key/value cache server.
//
// Wires together the live dictionary lifecycle: the routing table (C6) that
// maps keys to compression dictionaries, the online trainer (C8) that builds
// new dictionaries from a sampled reservoir (C2), the efficiency tracker
// (C1) that decides when to retrain, the shared dictionary pool (C5), the
// sampler spooler (C3) that persists raw samples for offline analysis, and
// the deferred reclamation (C7) that retires old routing tables safely.

pub mod concurrent;
pub mod config;
pub mod dict;
pub mod error;
pub mod gc;
pub mod hotpath;
pub mod pool;
pub mod ratelimit;
pub mod reservoir;
pub mod routing;
pub mod sampler;
pub mod stats;
pub mod tracker;
pub mod trainer;

pub use config::Config;
pub use error::{DcError, Result, SkipReason};
pub use hotpath::{CompressOutcome, CompressResult, CompressedItem, DecompressResult, HotPath};
pub use stats::{Stats, StatsSnapshot};

use crate::dict::meta;
use crate::gc::Gc;
use crate::pool::DictPool;
use crate::reservoir::Reservoir;
use crate::routing::{scan_dict_dir, RoutingTable, RoutingTableHandle};
use crate::sampler::Sampler;
use crate::tracker::EfficiencyTracker;
use crate::trainer::Trainer;
use std::path::Path;
use std::sync::Arc;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process-wide facade over every in-scope subsystem. One instance per
/// process, built from a validated [`Config`] and held behind `Arc`s so the
/// trainer, GC, and sampler threads, plus every hot-path caller, share the
/// same routing table, pool, and tracker (spec §9 "Global state").
pub struct Core {
    pub config: Arc<Config>,
    pub tracker: Arc<EfficiencyTracker>,
    pub reservoir: Arc<Reservoir>,
    pub sampler: Arc<Sampler>,
    pub pool: Arc<DictPool>,
    pub live_table: Arc<RoutingTableHandle>,
    pub gc: Arc<Gc>,
    pub stats: Arc<Stats>,
    trainer: Trainer,
    hot_path: HotPath,
}

impl Core {
    /// Build every subsystem from a validated config, scanning `dict_dir`
    /// for any dictionaries already on disk (startup rescan). Does not start
    /// the trainer, GC, or sampler background threads; call [`Core::start`]
    /// for that once the caller is ready to serve traffic.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let pool = Arc::new(DictPool::new());
        let dict_dir = Path::new(&config.dict_dir);
        std::fs::create_dir_all(dict_dir)?;
        let initial_table = scan_dict_dir(dict_dir, config.dict_retain_max, &pool, 1)?;
        let live_table = Arc::new(RoutingTableHandle::new(initial_table));

        let tracker = Arc::new(EfficiencyTracker::new(
            config.ewma_alpha,
            config.retrain_drop,
            config.retraining_interval_s,
            config.min_training_size as u64,
            config.enable_training,
        ));
        let reservoir = Arc::new(Reservoir::new(config.dict_size as u64 * 100));

        let mut sampler = Sampler::new();
        sampler.init(
            config.spool_dir.clone(),
            config.sample_p,
            config.sample_window(),
            config.spool_max_bytes,
        );
        let sampler = Arc::new(sampler);

        let gc = Arc::new(Gc::new());
        let stats = Arc::new(Stats::new());

        let hot_path = HotPath::new(
            config.clone(),
            tracker.clone(),
            reservoir.clone(),
            sampler.clone(),
            live_table.clone(),
            stats.clone(),
        );

        Ok(Self {
            config,
            tracker,
            reservoir,
            sampler,
            pool,
            live_table,
            gc,
            stats,
            trainer: Trainer::new(),
            hot_path,
        })
    }

    /// Start the trainer, GC reaper, and (if enabled) the sampler spool
    /// consumer. Idempotent only in the sense that each background thread
    /// guards its own start; calling twice spawns a second set of threads
    /// and is a caller error.
    pub fn start(&self) {
        self.trainer.start(
            self.config.clone(),
            self.tracker.clone(),
            self.reservoir.clone(),
            self.live_table.clone(),
            self.pool.clone(),
            self.gc.clone(),
            self.stats.clone(),
        );
        self.gc.start(
            self.pool.clone(),
            Path::new(&self.config.dict_dir).to_path_buf(),
            self.live_table.clone(),
            self.config.gc_cool_period_s,
            self.config.gc_quarantine_period_s,
        );
        if self.config.enable_sampling {
            let _ = self.sampler.start();
        }
    }

    /// Stop every background thread and join them. Safe to call once at
    /// shutdown; the hot path keeps working with whatever table was last
    /// published.
    pub fn stop(&self) {
        self.trainer.stop();
        self.gc.stop();
        self.sampler.stop();
    }

    /// The compress/decompress/sample entry points used on every request.
    pub fn hot_path(&self) -> &HotPath {
        &self.hot_path
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn routing_generation(&self) -> u64 {
        self.live_table.current().generation
    }

    pub fn now_epoch_s() -> u64 {
        meta::now_epoch_s()
    }
}
