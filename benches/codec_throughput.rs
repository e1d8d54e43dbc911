//! Message codec throughput benchmark.
//!
//! Measures encode/decode latency for messages of increasing field count
//! using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use msgbus_core::codec::{decode, encode};
use msgbus_core::{DateTime, MessageValue};

fn build_message(fields: usize) -> MessageValue {
    let mut msg = MessageValue::new();
    msg.set_send_subject("BENCH.CODEC").unwrap();
    for i in 0..fields {
        let name = format!("F{i}");
        match i % 4 {
            0 => msg.add_i64(name.as_str(), i as i128).unwrap(),
            1 => msg.add(name.as_str(), format!("value-{i}")).unwrap(),
            2 => msg.add(name.as_str(), vec![i as f64; 16]).unwrap(),
            _ => msg.add(name.as_str(), DateTime::from_secs(i as i64)).unwrap(),
        }
    }
    msg
}

fn bench_encode(c: &mut Criterion) {
    let field_counts: &[usize] = &[0, 8, 64, 512];

    let mut group = c.benchmark_group("encode");
    for &count in field_counts {
        let msg = build_message(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &msg, |b, m| {
            b.iter(|| encode(black_box(m)).unwrap());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let field_counts: &[usize] = &[0, 8, 64, 512];

    let mut group = c.benchmark_group("decode");
    for &count in field_counts {
        let wire = encode(&build_message(count)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(count), &wire, |b, w| {
            b.iter(|| decode(black_box(w)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
