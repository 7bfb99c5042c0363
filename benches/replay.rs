use criterion::{black_box, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use serde_json::json;
use tempfile::{tempdir, TempDir};

use jsonstore::core::{
    Envelope, ReplayDescriptor, StoreConfig, StoreReader, StoreWriter, StreamMetadata,
    TimeInterval,
};

const RECORDS_PER_STREAM: i64 = 5_000;
const STREAMS: u32 = 4;

fn build_store() -> TempDir {
    let dir = tempdir().expect("tempdir");
    let mut writer =
        StoreWriter::create("bench", dir.path(), false, StoreConfig::default()).expect("writer");
    for id in 1..=STREAMS {
        writer
            .open_stream(StreamMetadata::new(id, format!("s{id}")))
            .expect("open stream");
    }
    for t in 0..RECORDS_PER_STREAM {
        for id in 1..=STREAMS {
            writer
                .write(
                    &Envelope::new(id, t as u64, t * 1_000, t * 1_000 + 7),
                    &json!({"value": t, "tag": "bench"}),
                )
                .expect("write");
        }
    }
    writer.close().expect("close");
    dir
}

fn bench_replay(c: &mut Criterion) {
    let store = build_store();
    let mut group = c.benchmark_group("replay");
    for &start_pct in &[0_i64, 50, 90] {
        let left = RECORDS_PER_STREAM * 1_000 * start_pct / 100;
        group.bench_with_input(BenchmarkId::new("seek_one_stream", start_pct), &left, |b, &left| {
            b.iter(|| {
                let mut reader = StoreReader::open("bench", store.path(), StoreConfig::default())
                    .expect("reader");
                reader.open_stream_by_id(2).expect("stream");
                reader
                    .seek(ReplayDescriptor::new(TimeInterval::new(left, i64::MAX), true))
                    .expect("seek");
                let mut count = 0u64;
                while let Some(message) = reader.move_next().expect("move") {
                    black_box(&message);
                    count += 1;
                }
                count
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_replay);
criterion_main!(benches);
