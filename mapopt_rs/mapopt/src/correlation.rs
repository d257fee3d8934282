//! Sliding-window MAP/rSO2 correlation (COx).

use std::collections::BTreeMap;

use ndarray::{s, ArrayView1};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::config::{
    COX_SERIES_MAX_WINDOW_MIN, COX_WINDOWS_MIN, MIN_CORRELATION_POINTS, MIN_DATA_POINTS,
    MIN_OBSERVATIONS, MIN_SEGMENT_POINTS,
};
use crate::fit::Rejection;
use crate::Signal;

/// Mean MAP and correlation of one sub-window inside a lookback period.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrelationObservation {
    pub mean_map: f64,
    pub cox: f64,
}

/// Time-averaged COx values from the short-window diagnostic sweep.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoxSeries {
    pub times_h: Vec<f64>,
    pub values: Vec<f64>,
}

impl CoxSeries {
    pub fn len(&self) -> usize {
        self.times_h.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_h.is_empty()
    }
}

/// Pearson correlation over pairwise-finite values.
///
/// Returns `None` with fewer than [`MIN_CORRELATION_POINTS`] usable pairs or
/// when either side has zero variance.
pub fn pearson(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> Option<f64> {
    if x.len() != y.len() {
        return None;
    }
    let mut n = 0usize;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for (&a, &b) in x.iter().zip(y.iter()) {
        if a.is_finite() && b.is_finite() {
            n += 1;
            sum_x += a;
            sum_y += b;
        }
    }
    if n < MIN_CORRELATION_POINTS {
        return None;
    }
    let mean_x = sum_x / n as f64;
    let mean_y = sum_y / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&a, &b) in x.iter().zip(y.iter()) {
        if a.is_finite() && b.is_finite() {
            let dx = a - mean_x;
            let dy = b - mean_y;
            cov += dx * dy;
            var_x += dx * dx;
            var_y += dy * dy;
        }
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Correlation of the samples in `[start, end)`, paired with their mean MAP.
fn window_observation(signal: &Signal, start: f64, end: f64) -> Option<CorrelationObservation> {
    let range = signal.index_range(start, end);
    if range.len() < MIN_DATA_POINTS {
        return None;
    }
    let map = signal.map().slice_move(s![range.clone()]);
    let rso2 = signal.rso2().slice_move(s![range]);
    let cox = pearson(map, rso2)?;
    Some(CorrelationObservation {
        mean_map: map.mean().unwrap_or(f64::NAN),
        cox,
    })
}

/// Number of half-overlapping windows of `window_h` that start inside a span
/// of `span_h`; zero when the window does not fit.
fn window_steps(span_h: f64, window_h: f64) -> usize {
    let raw = (span_h - window_h) / (window_h / 2.0);
    if raw.is_finite() && raw >= 0.0 {
        raw as usize + 1
    } else {
        0
    }
}

/// Collect COx observations for one (window, history) pair ending at `t_now`.
///
/// The lookback `[t_now - history_h, t_now)` must hold at least
/// [`MIN_SEGMENT_POINTS`] samples, and the pair must yield at least
/// [`MIN_OBSERVATIONS`] defined windows.
pub fn sliding_window_correlations(
    signal: &Signal,
    window_h: f64,
    history_h: f64,
    t_now: f64,
) -> Result<Vec<CorrelationObservation>, Rejection> {
    let lookback_start = t_now - history_h;
    if signal.index_range(lookback_start, t_now).len() < MIN_SEGMENT_POINTS {
        return Err(Rejection::InsufficientLookback);
    }

    let step = window_h / 2.0;
    let steps = window_steps(history_h, window_h);
    let mut observations = Vec::with_capacity(steps);
    for s in 0..steps {
        let win_start = lookback_start + s as f64 * step;
        let win_end = (win_start + window_h).min(t_now);
        if let Some(obs) = window_observation(signal, win_start, win_end) {
            observations.push(obs);
        }
    }

    if observations.len() < MIN_OBSERVATIONS {
        return Err(Rejection::TooFewObservations);
    }
    Ok(observations)
}

/// Diagnostic COx series over the whole record using the short windows.
///
/// Values from different window lengths that share a midpoint are averaged.
pub fn cox_series(signal: &Signal) -> CoxSeries {
    if signal.is_empty() {
        return CoxSeries::default();
    }
    let t0 = signal.start();
    let span = signal.end() - t0;
    let mut by_time: BTreeMap<OrderedFloat<f64>, (f64, usize)> = BTreeMap::new();

    for &window_min in COX_WINDOWS_MIN
        .iter()
        .filter(|&&w| w <= COX_SERIES_MAX_WINDOW_MIN)
    {
        let window_h = f64::from(window_min) / 60.0;
        let step = window_h / 2.0;
        for s in 0..window_steps(span, window_h) {
            let win_start = t0 + s as f64 * step;
            let win_end = win_start + window_h;
            if let Some(obs) = window_observation(signal, win_start, win_end) {
                let entry = by_time
                    .entry(OrderedFloat((win_start + win_end) / 2.0))
                    .or_insert((0.0, 0));
                entry.0 += obs.cox;
                entry.1 += 1;
            }
        }
    }

    let mut series = CoxSeries {
        times_h: Vec::with_capacity(by_time.len()),
        values: Vec::with_capacity(by_time.len()),
    };
    for (time, (sum, count)) in by_time {
        series.times_h.push(time.into_inner());
        series.values.push(sum / count as f64);
    }
    series
}
