use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use deploy_host::host::{encode_message, read_message, RemoteFile, DEFAULT_MAX_MESSAGE_SIZE};

fn make_envelope(size: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    serde_json::json!({
        "name": "bench/payload.bin",
        "data": STANDARD.encode(&data),
        "isCompressed": false,
        "nr": 1,
        "totalCount": 1,
    })
    .to_string()
    .into_bytes()
}

fn bench_read_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_message");
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for size in [1024usize, 64 * 1024, 1024 * 1024].iter() {
        let frame = encode_message(&make_envelope(*size));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut reader: &[u8] = &frame;
                rt.block_on(read_message(&mut reader, DEFAULT_MAX_MESSAGE_SIZE))
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_parse_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_envelope");

    for size in [1024usize, 64 * 1024, 1024 * 1024].iter() {
        let envelope = make_envelope(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| RemoteFile::from_json(black_box(&envelope)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_read_message, bench_parse_envelope);
criterion_main!(benches);
