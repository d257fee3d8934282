use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use mapopt::grid::evaluate_time_point;
use mapopt::{Scheduler, Signal};

const HOURS: usize = 14;

fn recording(hours: usize) -> Signal {
    let n = hours * 60;
    let times: Vec<f64> = (0..n).map(|i| i as f64 / 60.0).collect();
    let map: Vec<f64> = times
        .iter()
        .map(|&t| 70.0 + 20.0 * (2.0 * std::f64::consts::PI * t / 3.0).sin())
        .collect();
    let rso2 = map
        .iter()
        .enumerate()
        .map(|(i, &m)| {
            let d = m - 70.0;
            60.0 + 1.5 * (d.powi(3) / 1200.0 - 0.5 * d) + (0.37 * i as f64).sin() * 0.5
        })
        .collect();
    Signal::new(times, map, rso2).expect("benchmark signal should be valid")
}

fn benchmark_time_point(c: &mut Criterion) {
    let signal = recording(HOURS);
    let mut group = c.benchmark_group("grid_sweep");
    group.bench_function("evaluate_time_point_14h", |b| {
        b.iter(|| evaluate_time_point(black_box(&signal), black_box(13.0)))
    });
    group.finish();
}

fn benchmark_scheduler(c: &mut Criterion) {
    let signal = recording(HOURS);
    let grid: Vec<f64> = (0..100).map(|i| 12.0 + i as f64 / 60.0).collect();
    let mut group = c.benchmark_group("scheduler");
    group.sample_size(10);
    for workers in [1_usize, 4] {
        let scheduler = Scheduler::new(workers);
        group.bench_function(format!("run_100_points_w{workers}"), |b| {
            b.iter(|| scheduler.run(black_box(&signal), black_box(&grid), None))
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_time_point, benchmark_scheduler);
criterion_main!(benches);
