//! 🏎️ How fast can one message go from bytes to an enriched, routed document?

use chrono::Utc;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use hfx::common::RawMessage;
use hfx::pipeline::{IndexRouter, decode, enrich};
use std::hint::black_box;

const COWRIE: &str = r#"{"app":"cowrie","src_ip":"203.0.113.7","src_port":51234,"dest_port":22,"protocol":"ssh","username":"root","password":"123456","src_latitude":37.7749,"src_longitude":-122.4194,"dest_latitude":52.52,"dest_longitude":13.405}"#;

fn bench_decode_enrich(c: &mut Criterion) {
    let raw = RawMessage::new("cowrie.sessions", COWRIE);
    let router = IndexRouter::default();
    let now = Utc::now();

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Bytes(COWRIE.len() as u64));
    group.bench_function("decode", |b| b.iter(|| decode(black_box(&raw))));
    group.bench_function("decode_enrich_route", |b| {
        b.iter(|| {
            let mut record = decode(black_box(&raw)).expect("valid json");
            enrich(&mut record, now);
            black_box(router.route(record.app()))
        })
    });
    group.finish();
}

criterion_group!(benches, bench_decode_enrich);
criterion_main!(benches);
