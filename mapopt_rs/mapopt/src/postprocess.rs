//! Turns raw per-minute estimates into the final MAPopt series.
//!
//! Steps, in order: shape-preserving cubic fill of interior gaps, clamp to the
//! physiological band, forward/backward fill of the ends, Savitzky–Golay
//! smoothing, and a final clamp.

use ndarray::{Array1, ArrayView1};

use crate::config::{MAP_OPT_MAX, MAP_OPT_MIN, SAVGOL_ORDER, SAVGOL_WINDOW};
use crate::linalg;

const SAVGOL_TERMS: usize = SAVGOL_ORDER + 1;

/// Fill NaN gaps that lie between finite values using monotone piecewise
/// cubic Hermite interpolation (Fritsch–Carlson slopes). Leading and trailing
/// NaN runs are left untouched.
pub fn fill_gaps(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    let known: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    if known.len() < 2 {
        return out;
    }
    let xs: Vec<f64> = known.iter().map(|&i| i as f64).collect();
    let ys: Vec<f64> = known.iter().map(|&i| values[i]).collect();
    let slopes = pchip_slopes(&xs, &ys);

    for seg in 0..known.len() - 1 {
        let (lo, hi) = (known[seg], known[seg + 1]);
        if hi - lo < 2 {
            continue;
        }
        let h = xs[seg + 1] - xs[seg];
        for (idx, slot) in out.iter_mut().enumerate().take(hi).skip(lo + 1) {
            let s = (idx as f64 - xs[seg]) / h;
            *slot = hermite(ys[seg], ys[seg + 1], slopes[seg], slopes[seg + 1], h, s);
        }
    }
    out
}

fn hermite(y0: f64, y1: f64, d0: f64, d1: f64, h: f64, s: f64) -> f64 {
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    h00 * y0 + h10 * h * d0 + h01 * y1 + h11 * h * d1
}

fn pchip_slopes(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|k| (ys[k + 1] - ys[k]) / h[k]).collect();
    if n == 2 {
        return vec![delta[0]; 2];
    }

    let mut d = vec![0.0; n];
    for k in 1..n - 1 {
        let (prev, next) = (delta[k - 1], delta[k]);
        if prev == 0.0 || next == 0.0 || prev.signum() != next.signum() {
            continue;
        }
        let w1 = 2.0 * h[k] + h[k - 1];
        let w2 = h[k] + 2.0 * h[k - 1];
        d[k] = (w1 + w2) / (w1 / prev + w2 / next);
    }
    d[0] = edge_slope(h[0], h[1], delta[0], delta[1]);
    d[n - 1] = edge_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    d
}

/// One-sided three-point slope at an end, kept shape preserving.
fn edge_slope(h0: f64, h1: f64, m0: f64, m1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * m0 - h0 * m1) / (h0 + h1);
    if d.signum() != m0.signum() || m0 == 0.0 {
        0.0
    } else if m0.signum() != m1.signum() && d.abs() > 3.0 * m0.abs() {
        3.0 * m0
    } else {
        d
    }
}

/// Savitzky–Golay weights that evaluate the local polynomial at `offset`
/// samples from the window center.
fn savgol_weights(offset: isize) -> Array1<f64> {
    let half = (SAVGOL_WINDOW / 2) as isize;
    let us: Vec<f64> = (-half..=half).map(|u| u as f64).collect();
    let (xtx, _) = linalg::normal_equations::<SAVGOL_TERMS>(&us, &us);

    let mut weights = Array1::zeros(SAVGOL_WINDOW);
    for (j, &u) in us.iter().enumerate() {
        let mut basis = [1.0; SAVGOL_TERMS];
        for p in 1..SAVGOL_TERMS {
            basis[p] = basis[p - 1] * u;
        }
        // Coefficients of the fit to the j-th unit impulse.
        if let Some(coef) = linalg::solve(xtx, basis) {
            weights[j] = coef
                .iter()
                .rev()
                .fold(0.0, |acc, &c| acc * offset as f64 + c);
        }
    }
    weights
}

/// Savitzky–Golay smoothing with the polynomial of the first/last full window
/// used for the edge samples. Shorter inputs are returned unchanged.
pub fn savgol_filter(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < SAVGOL_WINDOW {
        return values.to_vec();
    }
    let half = SAVGOL_WINDOW / 2;
    let weights: Vec<Array1<f64>> = (-(half as isize)..=half as isize)
        .map(savgol_weights)
        .collect();
    let smooth = |start: usize, weights: &Array1<f64>| {
        ArrayView1::from(&values[start..start + SAVGOL_WINDOW]).dot(weights)
    };

    (0..n)
        .map(|i| {
            if i < half {
                smooth(0, &weights[i])
            } else if i + half >= n {
                let start = n - SAVGOL_WINDOW;
                smooth(start, &weights[i - start])
            } else {
                smooth(i - half, &weights[half])
            }
        })
        .collect()
}

fn clamp_to_band(values: &mut [f64]) {
    for v in values.iter_mut() {
        *v = v.clamp(MAP_OPT_MIN, MAP_OPT_MAX);
    }
}

fn forward_back_fill(values: &mut [f64]) {
    let mut last = None;
    for v in values.iter_mut() {
        if v.is_finite() {
            last = Some(*v);
        } else if let Some(prev) = last {
            *v = prev;
        }
    }
    let mut next = None;
    for v in values.iter_mut().rev() {
        if v.is_finite() {
            next = Some(*v);
        } else if let Some(following) = next {
            *v = following;
        }
    }
}

/// Produce the gap-free series from raw estimates. `fallback` is used for
/// every point when no raw estimate is finite.
pub fn post_process(raw: &[f64], fallback: f64) -> Vec<f64> {
    let mut series = fill_gaps(raw);
    clamp_to_band(&mut series);
    forward_back_fill(&mut series);
    if !series.iter().any(|v| v.is_finite()) {
        series.fill(fallback.clamp(MAP_OPT_MIN, MAP_OPT_MAX));
    }
    if series.len() > SAVGOL_WINDOW {
        series = savgol_filter(&series);
    }
    clamp_to_band(&mut series);
    series
}
