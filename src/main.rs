// RustyDict Agent
//
// A small standalone harness that boots the dictionary-compression core,
// starts its background threads (trainer, GC, sampler), and prints periodic
// stats. The request protocol, storage engine, and config file loader are
// external collaborators (spec.md §1 Non-goals) — this binary only exists to
// exercise the core end-to-end outside of a host cache engine, the way the
// teacher's `main.rs` boots its own subsystems before handing off to a
// network server.

use rustydict::{Config, Core};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let install_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut config = Config::default();
    config.dict_dir = install_dir.join("dicts").display().to_string();
    config.spool_dir = install_dir.join("spool").display().to_string();

    if let Err(e) = config.validate() {
        tracing::error!("invalid configuration, falling back to pass-through mode: {e}");
        config.enable_comp = false;
        config.enable_dict = false;
    }

    print_banner();
    info!("dict_dir={} spool_dir={}", config.dict_dir, config.spool_dir);
    info!(
        "zstd_level={} dict_size={} retrain_drop={} ewma_alpha={}",
        config.zstd_level, config.dict_size, config.retrain_drop, config.ewma_alpha
    );

    let core = match Core::new(config) {
        Ok(core) => core,
        Err(e) => {
            tracing::error!("failed to initialize core: {e}");
            std::process::exit(1);
        }
    };

    core.start();
    info!("trainer, gc, and sampler threads started; routing generation {}", core.routing_generation());

    loop {
        std::thread::sleep(Duration::from_secs(5));
        let snap = core.stats_snapshot();
        info!(
            "writes={} reads={} ratio={:.3} trainer_runs={} routing_gen={}",
            snap.writes,
            snap.reads,
            snap.compression_ratio(),
            snap.trainer_runs,
            core.routing_generation(),
        );
    }
}

fn print_banner() {
    println!("╔══════════════════════════════════════════════════╗");
    println!("║  RustyDict — adaptive dictionary-compression core ║");
    println!("║  version {:<42}║", rustydict::VERSION);
    println!("╚══════════════════════════════════════════════════╝");
}
