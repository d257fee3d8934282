//! Binned COx curve and the quadratic fit that locates its minimum.

use serde::{Deserialize, Serialize};

use crate::config::{
    map_bin_centers, map_bin_edges, MAP_BIN_COUNT, MAP_OPT_MAX, MAP_OPT_MIN, MIN_FIT_BINS,
    MIN_FIT_WEIGHT,
};
use crate::correlation::CorrelationObservation;
use crate::fisher::{fisher_transform, inverse_fisher_transform};
use crate::linalg;
use crate::weight::fit_weight;

/// Why a (window, history) attempt produced no curve fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Lookback would start before the first sample.
    HistoryBeforeStart,
    /// Fewer than the minimum samples inside the lookback period.
    InsufficientLookback,
    /// Too few sub-windows produced a defined correlation.
    TooFewObservations,
    /// Fewer than three populated MAP bins.
    TooFewBins,
    SingularFit,
    /// Parabola opens downward or is flat.
    NoMinimum,
    /// Clamped vertex outside the physiological band.
    OutOfBand,
    NonFiniteQuality,
    NegligibleWeight,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::HistoryBeforeStart => "history_before_start",
            Rejection::InsufficientLookback => "insufficient_lookback",
            Rejection::TooFewObservations => "too_few_observations",
            Rejection::TooFewBins => "too_few_bins",
            Rejection::SingularFit => "singular_fit",
            Rejection::NoMinimum => "no_minimum",
            Rejection::OutOfBand => "out_of_band",
            Rejection::NonFiniteQuality => "non_finite_quality",
            Rejection::NegligibleWeight => "negligible_weight",
        }
    }
}

/// One retained fit, with everything needed to redraw it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveFit {
    pub window_min: u32,
    pub history_hr: u32,
    pub bin_centers: Vec<f64>,
    pub binned_cox: Vec<f64>,
    pub binned_cox_fisher: Vec<f64>,
    /// Highest power first: `a·x² + b·x + c`.
    pub coefficients: [f64; 3],
    pub mapopt: f64,
    pub nadir_cox: f64,
    pub r2: f64,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FitOutcome {
    Accepted(CurveFit),
    Rejected(Rejection),
}

impl FitOutcome {
    pub fn accepted(self) -> Option<CurveFit> {
        match self {
            FitOutcome::Accepted(fit) => Some(fit),
            FitOutcome::Rejected(_) => None,
        }
    }
}

/// Mean correlation per MAP bin; empty bins are NaN.
#[derive(Clone, Debug, PartialEq)]
pub struct BinnedCurve {
    pub means: [f64; MAP_BIN_COUNT],
}

impl BinnedCurve {
    pub fn from_observations(observations: &[CorrelationObservation]) -> Self {
        let mut sums = [0.0; MAP_BIN_COUNT];
        let mut counts = [0usize; MAP_BIN_COUNT];
        for obs in observations {
            if let Some(idx) = bin_index(obs.mean_map) {
                sums[idx] += obs.cox;
                counts[idx] += 1;
            }
        }
        let mut means = [f64::NAN; MAP_BIN_COUNT];
        for idx in 0..MAP_BIN_COUNT {
            if counts[idx] > 0 {
                means[idx] = sums[idx] / counts[idx] as f64;
            }
        }
        Self { means }
    }

    /// Fisher-transformed bin means.
    pub fn transformed(&self) -> [f64; MAP_BIN_COUNT] {
        self.means.map(fisher_transform)
    }
}

fn bin_index(map: f64) -> Option<usize> {
    (0..MAP_BIN_COUNT).find(|&idx| {
        let (lower, upper) = map_bin_edges(idx);
        map >= lower && map < upper
    })
}

/// Least-squares parabola through `(xs, ys)`, highest power first.
///
/// Abscissae are centred and scaled before solving so the normal equations
/// stay well conditioned for MAP-sized inputs.
pub fn fit_quadratic(xs: &[f64], ys: &[f64]) -> Option<[f64; 3]> {
    if xs.len() != ys.len() || xs.len() < 3 {
        return None;
    }
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let x_scale = xs
        .iter()
        .map(|x| (x - x_mean).abs())
        .fold(0.0_f64, f64::max);
    if !(x_scale > 0.0) {
        return None;
    }
    let us: Vec<f64> = xs.iter().map(|x| (x - x_mean) / x_scale).collect();
    let (xtx, xty) = linalg::normal_equations::<3>(&us, ys);
    let [p0, p1, p2] = linalg::solve(xtx, xty)?;

    // y = p2·u² + p1·u + p0 with u = (x - m) / s
    let s2 = x_scale * x_scale;
    let a = p2 / s2;
    let b = p1 / x_scale - 2.0 * p2 * x_mean / s2;
    let c = p0 - p1 * x_mean / x_scale + p2 * x_mean * x_mean / s2;
    [a, b, c].iter().all(|v| v.is_finite()).then_some([a, b, c])
}

pub fn polyval(coefficients: &[f64; 3], x: f64) -> f64 {
    let [a, b, c] = *coefficients;
    (a * x + b) * x + c
}

/// Fit one (window, history) combination's observations.
pub fn fit_curve(
    window_min: u32,
    history_hr: u32,
    observations: &[CorrelationObservation],
) -> FitOutcome {
    let binned = BinnedCurve::from_observations(observations);
    let transformed = binned.transformed();
    let centers = map_bin_centers();

    let valid: Vec<usize> = (0..MAP_BIN_COUNT)
        .filter(|&idx| transformed[idx].is_finite())
        .collect();
    if valid.len() < MIN_FIT_BINS {
        return FitOutcome::Rejected(Rejection::TooFewBins);
    }
    let xs: Vec<f64> = valid.iter().map(|&idx| centers[idx]).collect();
    let zs: Vec<f64> = valid.iter().map(|&idx| transformed[idx]).collect();

    let Some(coefficients) = fit_quadratic(&xs, &zs) else {
        return FitOutcome::Rejected(Rejection::SingularFit);
    };
    let [a, b, _] = coefficients;
    if !(a > 0.0) {
        return FitOutcome::Rejected(Rejection::NoMinimum);
    }

    let lowest = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let highest = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mapopt = (-b / (2.0 * a)).clamp(lowest, highest);
    if !(MAP_OPT_MIN..=MAP_OPT_MAX).contains(&mapopt) {
        return FitOutcome::Rejected(Rejection::OutOfBand);
    }

    let z_mean = zs.iter().sum::<f64>() / zs.len() as f64;
    let sse: f64 = xs
        .iter()
        .zip(zs.iter())
        .map(|(&x, &z)| (z - polyval(&coefficients, x)).powi(2))
        .sum();
    let sst: f64 = zs.iter().map(|z| (z - z_mean).powi(2)).sum();
    let r2 = 1.0 - sse / sst;
    if !r2.is_finite() {
        return FitOutcome::Rejected(Rejection::NonFiniteQuality);
    }

    let nadir_cox = inverse_fisher_transform(polyval(&coefficients, mapopt));
    let weight = fit_weight(nadir_cox, r2);
    if !(weight > MIN_FIT_WEIGHT) {
        return FitOutcome::Rejected(Rejection::NegligibleWeight);
    }

    FitOutcome::Accepted(CurveFit {
        window_min,
        history_hr,
        bin_centers: xs,
        binned_cox: valid.iter().map(|&idx| binned.means[idx]).collect(),
        binned_cox_fisher: zs,
        coefficients,
        mapopt,
        nadir_cox,
        r2,
        weight,
    })
}
