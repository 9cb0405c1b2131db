// Hot path benchmarks: compress/decompress throughput with and without a
// trained dictionary, and the dict-lookup cost the routing table adds on
// top of a bare zstd call.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rustydict::dict::meta::persist_new_dict;
use rustydict::pool::DictPool;
use rustydict::routing::{scan_dict_dir, RoutingTable, RoutingTableHandle};
use rustydict::{CompressResult, CompressedItem, Config, HotPath};
use rustydict::reservoir::Reservoir;
use rustydict::sampler::Sampler;
use rustydict::stats::Stats;
use rustydict::tracker::EfficiencyTracker;
use std::sync::Arc;
use tempfile::TempDir;

fn sample_payload(size: usize) -> Vec<u8> {
    let unit = br#"{"id":1234,"kind":"order","status":"shipped","region":"us-east-1"}"#;
    unit.iter().cycle().take(size).copied().collect()
}

fn build_hot_path(with_dict: bool) -> (HotPath, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(Config {
        dict_dir: dir.path().to_string_lossy().to_string(),
        min_comp_size: 8,
        max_comp_size: 1 << 20,
        ..Config::default()
    });

    let tracker = Arc::new(EfficiencyTracker::new(0.2, 0.1, 0, 0, true));
    let reservoir = Arc::new(Reservoir::new(config.dict_size as u64 * 100));
    let sampler = Arc::new(Sampler::new());
    let stats = Arc::new(Stats::new());
    let pool = Arc::new(DictPool::new());

    let table = if with_dict {
        let samples: Vec<Vec<u8>> = (0..500)
            .map(|i| format!("{{\"id\":{i},\"kind\":\"order\",\"status\":\"shipped\"}}").into_bytes())
            .collect();
        let bytes = zstd::dict::from_samples(&samples, 16 * 1024).unwrap();
        persist_new_dict(dir.path(), 1, &bytes, 3, vec![]).unwrap();
        scan_dict_dir(dir.path(), 3, &pool, 1).unwrap()
    } else {
        RoutingTable::empty(1)
    };
    let live_table = Arc::new(RoutingTableHandle::new(table));

    let hot_path = HotPath::new(config, tracker, reservoir, sampler, live_table, stats);
    (hot_path, dir)
}

fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("maybe_compress");

    for with_dict in [false, true] {
        let (hot_path, _dir) = build_hot_path(with_dict);
        let payload = sample_payload(4096);

        group.bench_with_input(
            BenchmarkId::new("payload_4k", with_dict),
            &with_dict,
            |b, _| {
                b.iter(|| match hot_path.maybe_compress(black_box(&payload), black_box(b"bench-key")) {
                    Ok(CompressResult::Compressed(outcome)) => black_box(outcome.dict_id),
                    Ok(CompressResult::Bypass(_)) => 0,
                    Err(_) => 0,
                });
            },
        );
    }

    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("maybe_decompress");

    for with_dict in [false, true] {
        let (hot_path, _dir) = build_hot_path(with_dict);
        let payload = sample_payload(4096);
        let (compressed, dict_id) = match hot_path.maybe_compress(&payload, b"bench-key").unwrap() {
            CompressResult::Compressed(outcome) => (outcome.data.to_vec(), outcome.dict_id),
            CompressResult::Bypass(reason) => panic!("fixture payload bypassed: {reason:?}"),
        };

        group.bench_with_input(
            BenchmarkId::new("payload_4k", with_dict),
            &with_dict,
            |b, _| {
                b.iter(|| {
                    let item = CompressedItem {
                        compressed: true,
                        chunked: false,
                        dict_id,
                        bytes: &compressed,
                    };
                    black_box(hot_path.maybe_decompress(black_box(&item)).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_compress, bench_decompress);
criterion_main!(benches);
