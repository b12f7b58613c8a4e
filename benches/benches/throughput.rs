use std::{hint::black_box, io::Cursor};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jdump::{
    dump, load, Codec, Compression, DumpOptions, KeyOrder, LoadOptions, Record, RecordReader,
    RecordWriter,
};
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

fn make_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            json!({
                "id": i,
                "user": format!("user-{i}"),
                "score": i as f64 / 8.0,
                "tags": ["alpha", "beta", "gamma"],
                "meta": {"z": i % 7, "a": null, "m": i % 2 == 0},
            })
        })
        .collect()
}

fn encode_all(records: &[Record]) -> Vec<u8> {
    let mut writer = RecordWriter::new(Vec::new(), Codec::default(), false);
    writer.write_many(records).unwrap();
    writer.into_inner()
}

// ============================================================================
// Benchmarks: codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let record = make_records(1).remove(0);

    for order in [KeyOrder::Sorted, KeyOrder::Insertion] {
        let codec = Codec::new(order);
        group.bench_function(format!("encode/{order:?}"), |b| {
            b.iter(|| black_box(codec.encode(black_box(&record)).unwrap()));
        });
    }

    let codec = Codec::default();
    let line = codec.encode(&record).unwrap();
    group.bench_function("decode", |b| {
        b.iter(|| black_box(codec.decode(black_box(&line)).unwrap()));
    });
    group.bench_function("fingerprint", |b| {
        b.iter(|| black_box(codec.fingerprint(black_box(&record)).unwrap()));
    });

    group.finish();
}

// ============================================================================
// Benchmarks: in-memory stream
// ============================================================================

fn bench_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");

    for size in [100, 1_000, 10_000].iter() {
        let records = make_records(*size);
        let encoded = encode_all(&records);
        group.throughput(Throughput::Elements(*size as u64));

        for unique in [false, true] {
            let label = if unique { "write/unique" } else { "write/plain" };
            group.bench_with_input(BenchmarkId::new(label, size), &records, |b, recs| {
                b.iter(|| {
                    let mut writer = RecordWriter::new(
                        Vec::with_capacity(encoded.len()),
                        Codec::default(),
                        unique,
                    );
                    writer.write_many(black_box(recs)).unwrap();
                    black_box(writer.into_inner());
                });
            });
        }

        group.bench_with_input(BenchmarkId::new("read", size), &encoded, |b, data| {
            b.iter(|| {
                let reader = RecordReader::new(Cursor::new(black_box(data)), Codec::default(), true);
                black_box(reader.map(Result::unwrap).count());
            });
        });

        group.bench_with_input(BenchmarkId::new("skip", size), &encoded, |b, data| {
            b.iter(|| {
                let mut reader =
                    RecordReader::new(Cursor::new(black_box(data)), Codec::default(), false);
                black_box(reader.skip_frames(u64::MAX).unwrap());
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmarks: compressed files on disk
// ============================================================================

fn bench_files(c: &mut Criterion) {
    let mut group = c.benchmark_group("files");
    group.sample_size(20);

    let records = make_records(5_000);
    group.throughput(Throughput::Elements(records.len() as u64));

    for compression in [Compression::None, Compression::Gzip, Compression::Zstd] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("bench.{compression}"));
        let opts = DumpOptions {
            overwrite: true,
            compression: Some(compression),
            ..Default::default()
        };

        group.bench_function(BenchmarkId::new("dump", compression), |b| {
            b.iter(|| black_box(dump(black_box(&records), &path, &opts).unwrap()));
        });

        dump(&records, &path, &opts).unwrap();
        group.bench_function(BenchmarkId::new("load", compression), |b| {
            b.iter(|| {
                let loaded = load(&path, &LoadOptions::default()).unwrap();
                black_box(loaded.map(Result::unwrap).count());
            });
        });
    }

    group.finish();
}

// ============================================================================
// Criterion configuration
// ============================================================================

criterion_group!(benches, bench_codec, bench_stream, bench_files);

criterion_main!(benches);
