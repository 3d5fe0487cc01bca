//! Benchmarks for mzrtree-rs
//!
//! Run with: cargo bench -p mzrtree-rs

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mzrtree::{
    BlobRef, BlobStore, BoxEntry, MemoryStore, Peak, PrecursorWindow, QueryRegion, SpatialIndex,
    Strip, build_boxes, decode_row_range, encode_box, range_query,
};

const ROWS: usize = 64;
const PEAKS_PER_ROW: usize = 200;

/// Deterministic strip: dense sorted rows spanning m/z 400..=480.
fn synthetic_strip() -> Strip {
    let mut strip = Strip::new(0, ROWS);
    for row in 0..ROWS {
        let mut peaks = Vec::with_capacity(PEAKS_PER_ROW);
        for j in 0..PEAKS_PER_ROW {
            let mz = 400.0 + j as f32 * 0.4 + (row % 7) as f32 * 0.01;
            peaks.push(Peak::new(mz, 1.0 + (row * j % 100) as f32));
        }
        strip.push_row(peaks);
    }
    strip
}

fn bench_build_boxes(c: &mut Criterion) {
    let strip = synthetic_strip();

    let mut group = c.benchmark_group("build_boxes");
    for width in [2.5f32, 5.0, 10.0] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| build_boxes(black_box(&strip), 400.0, 481.0, width));
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let strip = synthetic_strip();
    let boxes = build_boxes(&strip, 400.0, 481.0, 5.0);

    c.bench_function("encode_box", |b| {
        b.iter(|| {
            for bbox in &boxes {
                black_box(encode_box(bbox, &strip));
            }
        });
    });
}

fn bench_decode_window(c: &mut Criterion) {
    let strip = synthetic_strip();
    let boxes = build_boxes(&strip, 400.0, 481.0, 5.0);
    let bbox = boxes[boxes.len() / 2];
    let payload = encode_box(&bbox, &strip);

    // a narrow row window in the middle of the payload: most rows are
    // skipped via their length prefix
    let row_lo = bbox.min_row + bbox.row_count() / 2;
    let row_hi = (row_lo + 3).min(bbox.max_row);

    c.bench_function("decode_row_window", |b| {
        b.iter(|| {
            decode_row_range(
                black_box(&payload),
                bbox.min_row,
                row_lo,
                row_hi,
                bbox.min_mz,
                bbox.max_mz,
            )
            .unwrap()
        });
    });
}

fn bench_range_query(c: &mut Criterion) {
    let strip = synthetic_strip();
    let window = PrecursorWindow::new(400.0, 425.0);

    let mut store = MemoryStore::new();
    for (i, bbox) in build_boxes(&strip, 400.0, 481.0, 5.0).into_iter().enumerate() {
        let id = i as i64 + 1;
        let payload = encode_box(&bbox, &strip);
        store.put(id, &payload).unwrap();
        store
            .insert(&BoxEntry {
                id,
                bbox,
                window,
                payload: BlobRef::whole(id, payload.len()),
            })
            .unwrap();
    }

    c.bench_function("range_query_memory_store", |b| {
        b.iter(|| {
            range_query(
                &store,
                &store,
                black_box(QueryRegion {
                    min_row: 10,
                    max_row: 40,
                    min_mz: 420.0,
                    max_mz: 450.0,
                    precursor_mz: 410.0,
                }),
            )
            .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_build_boxes,
    bench_encode,
    bench_decode_window,
    bench_range_query
);
criterion_main!(benches);
