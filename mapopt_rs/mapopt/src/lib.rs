//! Optimal mean arterial pressure (MAPopt) estimation from MAP and cerebral
//! oximetry (rSO2) recordings.
//!
//! A run sweeps a grid of correlation windows and history lengths at every
//! minute of the record, fits a parabola to the binned COx curve of each
//! combination, and combines the accepted vertices into one weighted estimate
//! per minute. The raw estimates are gap-filled, clamped and smoothed into the
//! final series, which [`burden::BurdenEngine`] then scores against the
//! observed MAP.

use std::ops::Range;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod burden;
pub mod config;
pub mod correlation;
pub mod fisher;
pub mod fit;
pub mod grid;
mod linalg;
pub mod postprocess;
pub mod scheduler;
pub mod weight;

pub use burden::{BurdenEngine, BurdenPoint, BurdenResult, BurdenSummary, DeviationStatistics};
pub use config::Params;
pub use correlation::CoxSeries;
pub use fit::{CurveFit, FitOutcome, Rejection};
pub use grid::{MapOptEstimate, RejectionTally};
pub use scheduler::{ProgressSink, Scheduler};

use config::{MAP_OPT_MAX, MAP_OPT_MIN, TIME_STEP_HR};

#[derive(Error, Debug)]
pub enum MapoptError {
    #[error("insufficient data for MAPopt estimation")]
    InsufficientData,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// One synchronized sample of the input recording.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    /// Hours since recording start.
    pub time_h: f64,
    /// mmHg; NaN marks a missing value.
    pub map: f64,
    /// Percent; NaN marks a missing value.
    pub rso2: f64,
}

/// Validated MAP/rSO2 recording on a strictly increasing time axis.
#[derive(Clone, Debug)]
pub struct Signal {
    times: Array1<f64>,
    map: Array1<f64>,
    rso2: Array1<f64>,
}

impl Signal {
    pub fn new(times: Vec<f64>, map: Vec<f64>, rso2: Vec<f64>) -> Result<Self, MapoptError> {
        if times.len() != map.len() || times.len() != rso2.len() {
            return Err(MapoptError::InvalidInput(format!(
                "column lengths differ: time {}, map {}, rso2 {}",
                times.len(),
                map.len(),
                rso2.len()
            )));
        }
        if times.len() < 2 {
            return Err(MapoptError::InsufficientData);
        }
        if let Some(idx) = times.iter().position(|t| !t.is_finite()) {
            return Err(MapoptError::InvalidInput(format!(
                "non-finite time at sample {idx}"
            )));
        }
        if let Some(idx) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(MapoptError::InvalidInput(format!(
                "time is not strictly increasing at sample {}",
                idx + 1
            )));
        }
        Ok(Self {
            times: Array1::from_vec(times),
            map: Array1::from_vec(map),
            rso2: Array1::from_vec(rso2),
        })
    }

    pub fn from_samples(samples: &[SignalSample]) -> Result<Self, MapoptError> {
        let mut times = Vec::with_capacity(samples.len());
        let mut map = Vec::with_capacity(samples.len());
        let mut rso2 = Vec::with_capacity(samples.len());
        for sample in samples {
            times.push(sample.time_h);
            map.push(sample.map);
            rso2.push(sample.rso2);
        }
        Self::new(times, map, rso2)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn start(&self) -> f64 {
        self.times.iter().next().copied().unwrap_or(f64::NAN)
    }

    pub fn end(&self) -> f64 {
        self.times.iter().next_back().copied().unwrap_or(f64::NAN)
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn map(&self) -> ArrayView1<'_, f64> {
        self.map.view()
    }

    pub fn rso2(&self) -> ArrayView1<'_, f64> {
        self.rso2.view()
    }

    /// Indices of the samples with `start <= t < end`.
    pub fn index_range(&self, start: f64, end: f64) -> Range<usize> {
        let times = self.times.as_slice().unwrap_or(&[]);
        let lo = times.partition_point(|&t| t < start);
        let hi = times.partition_point(|&t| t < end).max(lo);
        lo..hi
    }

    /// Mean of the finite MAP values.
    pub fn mean_map(&self) -> Option<f64> {
        let (sum, count) = self
            .map
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    /// Constant used when no time point produced an estimate.
    pub fn fallback_mapopt(&self) -> f64 {
        match self.mean_map() {
            Some(mean) => mean.clamp(MAP_OPT_MIN, MAP_OPT_MAX),
            None => (MAP_OPT_MIN + MAP_OPT_MAX) / 2.0,
        }
    }
}

/// Evaluation times from `start` (inclusive) to `end` (exclusive) at the fixed
/// one-minute step.
pub fn build_time_grid(start: f64, end: f64) -> Vec<f64> {
    if !(start.is_finite() && end.is_finite()) || end <= start {
        return Vec::new();
    }
    (0usize..)
        .map(|i| start + i as f64 * TIME_STEP_HR)
        .take_while(|&t| t < end)
        .collect()
}

/// Data-quality figures for one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationSummary {
    pub total_points: usize,
    pub valid_points: usize,
    pub validity_percent: f64,
    pub nan_fraction: f64,
    pub total_fits: usize,
    pub mean_fits_per_point: f64,
    pub mapopt_min: f64,
    pub mapopt_max: f64,
    pub mapopt_mean: f64,
    pub mapopt_std: f64,
}

impl CalculationSummary {
    pub fn from_run(raw: &[f64], series: &[f64], diagnostics: &[Vec<CurveFit>]) -> Self {
        let total_points = raw.len();
        if total_points == 0 {
            return Self::default();
        }
        let valid_points = raw.iter().filter(|v| !v.is_nan()).count();
        let total_fits: usize = diagnostics.iter().map(Vec::len).sum();

        let series = ArrayView1::from(series);
        let (mapopt_min, mapopt_max) = series
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        Self {
            total_points,
            valid_points,
            validity_percent: valid_points as f64 / total_points as f64 * 100.0,
            nan_fraction: (total_points - valid_points) as f64 / total_points as f64,
            total_fits,
            mean_fits_per_point: total_fits as f64 / total_points as f64,
            mapopt_min,
            mapopt_max,
            mapopt_mean: series.mean().unwrap_or(f64::NAN),
            mapopt_std: series.std(0.0),
        }
    }
}

/// Everything one estimation run produces, aligned to `time_grid`.
#[derive(Clone, Debug, Serialize)]
pub struct MapOptRun {
    pub time_grid: Vec<f64>,
    /// Weighted estimates before gap filling; NaN where nothing was accepted.
    pub raw: Vec<f64>,
    /// Gap-free, smoothed series inside the physiological band.
    pub series: Vec<f64>,
    pub diagnostics: Vec<Vec<CurveFit>>,
    pub rejections: RejectionTally,
    pub summary: CalculationSummary,
}

/// Estimate the MAPopt series for `signal`.
pub fn compute_mapopt(
    signal: &Signal,
    params: &Params,
    progress: Option<&dyn ProgressSink>,
) -> Result<MapOptRun, MapoptError> {
    params.validate()?;

    let time_grid = build_time_grid(signal.start(), signal.end());
    if time_grid.is_empty() {
        return Err(MapoptError::InsufficientData);
    }

    let workers = params.resolved_workers();
    debug!(
        samples = signal.len(),
        grid_points = time_grid.len(),
        workers,
        "starting MAPopt sweep"
    );

    let estimates = Scheduler::new(workers).run(signal, &time_grid, progress);

    let mut raw = Vec::with_capacity(estimates.len());
    let mut diagnostics = Vec::with_capacity(estimates.len());
    let mut rejections = RejectionTally::default();
    for estimate in estimates {
        raw.push(estimate.mapopt);
        rejections.merge(&estimate.rejections);
        diagnostics.push(estimate.fits);
    }

    if raw.iter().all(|v| v.is_nan()) {
        warn!(
            fallback = signal.fallback_mapopt(),
            "no time point produced a MAPopt estimate; using constant fallback"
        );
    }

    let series = postprocess::post_process(&raw, signal.fallback_mapopt());
    let summary = CalculationSummary::from_run(&raw, &series, &diagnostics);
    info!(
        total = summary.total_points,
        valid = summary.valid_points,
        fits = summary.total_fits,
        mean = summary.mapopt_mean,
        "MAPopt estimation complete"
    );

    Ok(MapOptRun {
        time_grid,
        raw,
        series,
        diagnostics,
        rejections,
        summary,
    })
}

/// Full report: estimation run, COx diagnostics and burden figures.
#[derive(Clone, Debug, Serialize)]
pub struct Analysis {
    pub run: MapOptRun,
    pub cox: CoxSeries,
    /// Burden over the requested range (the whole series by default).
    pub burden: BurdenResult,
    pub burden_summary: BurdenSummary,
    pub burden_profile: Vec<BurdenPoint>,
    pub map_on_grid: Vec<f64>,
    pub deviation: Vec<f64>,
    pub outside_band: Vec<bool>,
}

/// Run the estimator on raw samples and score the result.
pub fn analyze(
    samples: &[SignalSample],
    params: &Params,
    progress: Option<&dyn ProgressSink>,
) -> Result<Analysis, MapoptError> {
    let signal = Signal::from_samples(samples)?;
    let run = compute_mapopt(&signal, params, progress)?;
    let cox = correlation::cox_series(&signal);
    debug!(points = cox.len(), "computed COx series");

    let engine = BurdenEngine::new(&signal, &run.time_grid, &run.series)?;
    let (first, last) = engine.span();
    let start = params.burden_start_hour.unwrap_or(first);
    let end = params.burden_end_hour.unwrap_or(last);
    let burden = engine.burden(start, end);
    let burden_summary = engine.summary();
    let burden_profile =
        engine.burden_profile(params.burden_window_hours, params.burden_step_hours);
    info!(
        start = burden.start_hour,
        end = burden.end_hour,
        time_burden = burden.time_burden,
        area_burden = burden.area_burden_ratio,
        "burden computed"
    );

    Ok(Analysis {
        map_on_grid: engine.map_on_grid().to_vec(),
        deviation: engine.deviation().to_vec(),
        outside_band: engine.outside_band(),
        run,
        cox,
        burden,
        burden_summary,
        burden_profile,
    })
}
