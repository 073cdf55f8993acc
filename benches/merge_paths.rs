use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use satellite::daemon::types::{Plot, PlotsResponse};
use satellite::ingest::harvester::plot_summary;
use satellite::stats::merge::{diff_object, merge_object, Record};
use satellite::stats::{ServiceName, StatsStore};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn full_node_record(height: u32) -> Record {
    record(json!({
        "blockchainState": {
            "difficulty": 3328,
            "spaceInGib": "30752000263.214111328125",
            "isSynced": true,
            "syncing": false,
            "syncedHeight": height,
            "tipHeight": height,
        },
        "fullNodeConnectionsCount": 8,
    }))
}

fn farmer_record(entries: usize) -> Record {
    let infos: Vec<Value> = (0..entries)
        .map(|i| {
            json!({
                "challenge": format!("0x{i:064x}"),
                "signagePoint": format!("0x{:064x}", i * 7),
                "proofs": i % 3,
                "passedFilter": i * 2,
                "receivedAt": "2024-03-01T12:00:00.000Z",
                "lastUpdated": "2024-03-01T12:00:01.000Z",
            })
        })
        .collect();

    record(json!({
        "farmingInfos": infos,
        "averageHarvesterResponseTime": "233.33333333333333333333",
        "worstHarvesterResponseTime": "812",
        "harvesterConnectionsCount": 3,
    }))
}

fn plots(count: usize) -> PlotsResponse {
    PlotsResponse {
        plots: (0..count)
            .map(|i| Plot {
                size: if i % 10 == 0 { 33 } else { 32 },
                file_size: 108_000_000_000 + i as u64,
                pool_contract_puzzle_hash: (i % 2 == 0).then(|| format!("0x{i:064x}")),
            })
            .collect(),
        failed_to_open_filenames: Vec::new(),
        not_found_filenames: Vec::new(),
    }
}

fn bench_diff(c: &mut Criterion) {
    let prev = farmer_record(20);
    let mut next = prev.clone();
    next.insert("harvesterConnectionsCount".into(), json!(4));

    c.bench_function("diff_object/farmer_unchanged_list", |b| {
        b.iter(|| black_box(diff_object(black_box(&prev), black_box(&next))))
    });

    let prev = full_node_record(4_500_000);
    let next = full_node_record(4_500_001);

    c.bench_function("diff_object/full_node_height", |b| {
        b.iter(|| black_box(diff_object(black_box(&prev), black_box(&next))))
    });
}

fn bench_merge(c: &mut Criterion) {
    let base = farmer_record(20);
    let patch = farmer_record(20);

    c.bench_function("merge_object/farmer_replace_list", |b| {
        b.iter(|| {
            let mut target = base.clone();
            merge_object(&mut target, black_box(patch.clone()));
            black_box(target.len())
        })
    });
}

fn bench_store(c: &mut Criterion) {
    c.bench_function("store/apply_and_take_100_rounds", |b| {
        b.iter(|| {
            let mut store = StatsStore::new(&[ServiceName::FullNode]);
            for height in 0..100u32 {
                store.apply(ServiceName::FullNode, full_node_record(height));
                if height % 10 == 0 {
                    black_box(store.take_payload(false));
                }
            }
            black_box(store.has_pending())
        })
    });

    let inventory = plots(5_000);
    c.bench_function("harvester/plot_summary_5000", |b| {
        b.iter(|| black_box(plot_summary(black_box(&inventory))))
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_diff(c);
    bench_merge(c);
    bench_store(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
