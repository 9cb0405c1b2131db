// Concurrent reader safety under routing-table publication.
//
// Many threads repeatedly look up the live routing table while a single
// writer publishes a fresh generation underneath them and retires the old
// one through the GC's cool-off queue. No reader may ever observe a
// decreasing generation, and the GC must not free a table before its
// cool-off period elapses.

use rustydict::dict::meta::persist_new_dict;
use rustydict::gc::Gc;
use rustydict::pool::DictPool;
use rustydict::routing::{scan_dict_dir, RoutingTable, RoutingTableHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn readers_never_observe_a_stale_generation_while_gc_reclaims_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(DictPool::new());

    let handle = Arc::new(RoutingTableHandle::new(RoutingTable::empty(1)));
    let gc = Arc::new(Gc::new());
    gc.start(
        pool.clone(),
        dir.path().to_path_buf(),
        handle.clone(),
        /* cool_period_s */ 0,
        /* quarantine_period_s */ 0,
    );

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut last_seen = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let table = handle.current();
                    assert!(table.generation >= last_seen);
                    last_seen = table.generation;
                    let _ = table.has_default();
                    let _ = table.pick_dict(b"any-key");
                }
            })
        })
        .collect();

    for id in 1u16..=5 {
        let samples: Vec<Vec<u8>> = (0..200)
            .map(|i| format!("{{\"id\":{i},\"gen\":{id}}}").into_bytes())
            .collect();
        let bytes = zstd::dict::from_samples(&samples, 4096).unwrap();
        persist_new_dict(dir.path(), id, &bytes, 3, vec![]).unwrap();

        let next_gen = handle.next_generation();
        let fresh = scan_dict_dir(dir.path(), 3, &pool, next_gen).unwrap();
        assert_eq!(fresh.generation, next_gen);
        let old = handle.publish(fresh);
        gc.retire(old);

        std::thread::sleep(Duration::from_millis(20));
    }

    stop.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }
    gc.stop();

    assert_eq!(handle.current().generation, 6);
    assert!(handle.current().has_default());
}
