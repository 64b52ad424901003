//! Codec benchmarks for switchboard-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use switchboard_protocol::{codec, Envelope};

fn bench_encode_small(c: &mut Criterion) {
    let envelope = Envelope::broadcast("x".repeat(64)).with_sender("ws_ab12cd34");

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| b.iter(|| codec::encode(black_box(&envelope))));
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let envelope = Envelope::private("ws_zz99abcd", "x".repeat(64));
    let encoded = codec::encode(&envelope).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(encoded.as_bytes())))
    });
    group.finish();
}

fn bench_decode_forged_sender(c: &mut Criterion) {
    let frame = format!(
        r#"{{"type":"broadcast","content":"{}","sender":"ws_forged00"}}"#,
        "x".repeat(256)
    );

    c.bench_function("decode_forged_sender_256B", |b| {
        b.iter(|| codec::decode(black_box(frame.as_bytes())).unwrap())
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_decode_forged_sender
);
criterion_main!(benches);
