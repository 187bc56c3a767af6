//! Per-frame cost benchmarks
//!
//! ```bash
//! cargo bench --package engagement --bench pipeline
//! ```

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use engagement::config::{EngagementConfig, MotionConfig};
use engagement::contrast::clahe;
use engagement::{MotionTracker, Observation, Rect, Stabilizer};
use image::{GrayImage, Luma};

fn test_frame(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 11) % 256) as u8]))
}

fn bench_stabilizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("stabilizer");
    let config = EngagementConfig::default();
    let face = Rect::new(200, 120, 240, 240);
    let observations = [
        Observation::Frontal { face, eyes: 2, smiling: true },
        Observation::Frontal { face, eyes: 1, smiling: false },
        Observation::Profile { region: face },
        Observation::Absent,
    ];

    group.throughput(Throughput::Elements(1));
    group.bench_function("update", |b| {
        let mut stabilizer = Stabilizer::new(&config);
        let start = Instant::now();
        let mut i = 0usize;
        b.iter(|| {
            i += 1;
            let now = start + Duration::from_millis(i as u64 * 33);
            let metrics = stabilizer.update(black_box(&observations[i % observations.len()]), 640, i % 3 != 0, now);
            black_box(metrics)
        })
    });

    group.finish();
}

fn bench_clahe(c: &mut Criterion) {
    let mut group = c.benchmark_group("clahe");
    group.measurement_time(Duration::from_secs(5));

    for (width, height) in [(640, 480), (320, 240)] {
        let frame = test_frame(width, height);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("equalize", format!("{}x{}", width, height)),
            &frame,
            |b, frame| b.iter(|| black_box(clahe(black_box(frame), 2.0, 8))),
        );
    }

    group.finish();
}

fn bench_motion(c: &mut Criterion) {
    let mut group = c.benchmark_group("motion");
    let frame = test_frame(320, 240);
    let face = Rect::new(100, 60, 120, 120);

    group.throughput(Throughput::Elements(1));
    group.bench_function("track_steady_face", |b| {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        tracker.update(&frame, Some(face));
        b.iter(|| black_box(tracker.update(black_box(&frame), Some(face))))
    });

    group.finish();
}

criterion_group!(benches, bench_stabilizer, bench_clahe, bench_motion);
criterion_main!(benches);
