//! Benchmarks for curve ingestion and UI-side event folding
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use echem_session::marshal::{self, ThreadMarshalExt};
use echem_session::session::{CurveStream, SessionEvent, SessionModel};
use echem_session::types::{CurveId, CurveInfo, Sample};

fn curve_info(points: usize) -> CurveInfo {
    CurveInfo {
        id: CurveId(1),
        title: "bench".to_string(),
        x_unit: "Potential (V)".to_string(),
        y_unit: "Current (µA)".to_string(),
        expected_points: Some(points),
    }
}

fn batches(points: usize, batch_size: usize) -> Vec<(usize, Vec<Sample>)> {
    (0..points)
        .step_by(batch_size)
        .map(|start| {
            let end = (start + batch_size).min(points);
            let samples = (start..end)
                .map(|i| {
                    let e = -0.5 + i as f64 * 0.001;
                    Sample::new(i, e, (e * 10.0).tanh(), e)
                })
                .collect();
            (start, samples)
        })
        .collect()
}

fn bench_curve_stream_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("curve_stream_ingest");

    for batch_size in [1, 8, 64].iter() {
        let points = 10_000;
        let data = batches(points, *batch_size);
        group.throughput(Throughput::Elements(points as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &data,
            |b, data| {
                b.iter(|| {
                    let mut stream = CurveStream::new(curve_info(points));
                    for (start, samples) in data {
                        stream.ingest(*start, samples).unwrap();
                    }
                    stream.finalize();
                    black_box(stream.len())
                });
            },
        );
    }

    group.finish();
}

fn bench_model_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_model_apply");

    for points in [1_000, 10_000].iter() {
        let events: Vec<SessionEvent> = std::iter::once(SessionEvent::CurveStarted(curve_info(*points)))
            .chain(batches(*points, 8).into_iter().map(|(start_index, samples)| {
                SessionEvent::SamplesAdded {
                    curve: CurveId(1),
                    start_index,
                    samples,
                }
            }))
            .collect();

        group.throughput(Throughput::Elements(*points as u64));
        group.bench_with_input(BenchmarkId::from_parameter(points), &events, |b, events| {
            b.iter(|| {
                let mut model = SessionModel::default();
                for event in events {
                    model.apply(event);
                }
                black_box(model.curves().len())
            });
        });
    }

    group.finish();
}

fn bench_marshal_pump(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal_pump");
    let jobs = 1_000;
    group.throughput(Throughput::Elements(jobs as u64));

    group.bench_function("redirect_and_pump", |b| {
        let (ui, pump) = marshal::channel();
        b.iter(|| {
            let producer = {
                let ui = ui.clone();
                std::thread::spawn(move || {
                    for i in 0..jobs {
                        ui.invoke_if_required(move || {
                            black_box(i);
                        });
                    }
                })
            };
            producer.join().unwrap();
            black_box(pump.pump())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_curve_stream_ingest,
    bench_model_apply,
    bench_marshal_pump
);
criterion_main!(benches);
