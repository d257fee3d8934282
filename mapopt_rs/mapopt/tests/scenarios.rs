use std::sync::{Mutex, OnceLock};

use mapopt::config::{MAP_OPT_MAX, MAP_OPT_MIN};
use mapopt::{analyze, compute_mapopt, BurdenEngine, MapOptRun, Params, Rejection, Signal, SignalSample};

/// Deterministic uniform noise in `[-0.5, 0.5)`.
struct Lcg(u64);

impl Lcg {
    fn next_centered(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    }
}

/// 24 h at one sample per minute. MAP swings 50-90 mmHg over a 3 h period;
/// rSO2 falls with MAP close to 70 mmHg and rises with it further out, so the
/// COx curve has its minimum near 70.
fn autoregulation_recording() -> Signal {
    let n = 24 * 60;
    let mut rng = Lcg(0xfeed_f00d_dead_beef);
    let mut times = Vec::with_capacity(n);
    let mut map = Vec::with_capacity(n);
    let mut rso2 = Vec::with_capacity(n);
    for i in 0..n {
        let t = i as f64 / 60.0;
        let m = 70.0 + 20.0 * (2.0 * std::f64::consts::PI * t / 3.0).sin();
        let d = m - 70.0;
        let noise = 0.5 * rng.next_centered() * 2.0;
        times.push(t);
        map.push(m);
        rso2.push(60.0 + 1.5 * (d.powi(3) / 1200.0 - 0.5 * d) + noise);
    }
    Signal::new(times, map, rso2).unwrap()
}

fn autoregulation_run() -> &'static (Signal, MapOptRun) {
    static RUN: OnceLock<(Signal, MapOptRun)> = OnceLock::new();
    RUN.get_or_init(|| {
        let signal = autoregulation_recording();
        let run = compute_mapopt(&signal, &Params::default(), None).unwrap();
        (signal, run)
    })
}

#[test]
fn constant_recording_has_no_fits_and_a_constant_series() {
    let samples: Vec<SignalSample> = (0..600)
        .map(|i| SignalSample {
            time_h: i as f64 / 60.0,
            map: 70.0,
            rso2: 60.0,
        })
        .collect();
    let progress = Mutex::new(Vec::new());
    let sink = |p: f64| progress.lock().unwrap().push(p);
    let analysis = analyze(&samples, &Params::default(), Some(&sink)).unwrap();
    let run = &analysis.run;

    assert_eq!(run.time_grid.len(), 599);
    assert!(run.diagnostics.iter().all(Vec::is_empty));
    assert!(run.raw.iter().all(|v| v.is_nan()));
    assert!(run.series.iter().all(|v| (v - 70.0).abs() < 1e-9));
    assert_eq!(run.summary.valid_points, 0);
    assert_eq!(run.summary.validity_percent, 0.0);
    assert!(run.rejections.get(Rejection::HistoryBeforeStart) > 0);

    let progress = progress.into_inner().unwrap();
    assert_eq!(progress.len(), 599usize.div_ceil(25));
    assert!((progress.last().copied().unwrap() - 100.0).abs() < 1e-9);
}

#[test]
fn autoregulating_recording_centres_on_seventy() {
    let (_, run) = autoregulation_run();

    assert!(run.series.iter().all(|v| (MAP_OPT_MIN..=MAP_OPT_MAX).contains(v)));
    for (t, v) in run.time_grid.iter().zip(&run.series) {
        if *t >= 2.0 {
            assert!((v - 70.0).abs() < 5.0, "t={t}: {v}");
        }
    }
    assert!((run.summary.mapopt_mean - 70.0).abs() < 3.0);
    assert!(run.summary.validity_percent > 85.0);
    // No lookback is available during the first hour.
    assert!(run.raw[..59].iter().all(|v| v.is_nan()));
}

#[test]
fn accepted_fits_open_upward_inside_their_bins() {
    let (_, run) = autoregulation_run();
    let mut seen = 0;
    for fits in &run.diagnostics {
        for fit in fits {
            seen += 1;
            assert!(fit.coefficients[0] > 0.0);
            assert!((MAP_OPT_MIN..=MAP_OPT_MAX).contains(&fit.mapopt));
            assert!(fit.weight > 0.0);
            let populated: Vec<f64> = fit
                .bin_centers
                .iter()
                .zip(&fit.binned_cox)
                .filter(|(_, c)| c.is_finite())
                .map(|(&x, _)| x)
                .collect();
            let lo = populated.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = populated.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            assert!(fit.mapopt >= lo - 1e-9 && fit.mapopt <= hi + 1e-9);
        }
    }
    assert!(seen > 0);
}

#[test]
fn midday_candidates_cluster_near_seventy() {
    let (_, run) = autoregulation_run();
    let idx = run
        .time_grid
        .iter()
        .position(|&t| t >= 12.0 - 1e-9)
        .unwrap();
    let mut candidates: Vec<f64> = run.diagnostics[idx].iter().map(|f| f.mapopt).collect();
    assert!(candidates.len() >= 10);
    candidates.sort_by(f64::total_cmp);
    let median = candidates[candidates.len() / 2];
    assert!((median - 70.0).abs() < 3.0, "median {median}");
}

#[test]
fn forced_hypertension_is_full_burden() {
    let (signal, run) = autoregulation_run();
    let times = signal.times().to_vec();
    let rso2 = signal.rso2().to_vec();
    let map: Vec<f64> = times
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            if (7.5..=12.5).contains(&t) {
                run.series[i] + 15.0
            } else {
                signal.map()[i]
            }
        })
        .collect();
    let forced = Signal::new(times, map, rso2).unwrap();

    let engine = BurdenEngine::new(&forced, &run.time_grid, &run.series).unwrap();
    let burden = engine.burden(8.0, 12.0);
    assert_eq!(burden.time_burden, 100.0);
    assert!(burden.area_burden_ratio > 0.0);
    assert!((burden.area_burden_ratio - 100.0).abs() < 1e-6);
    assert_eq!(burden.start_hour, 8.0);
    assert_eq!(burden.end_hour, 12.0);
}
