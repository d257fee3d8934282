//! Deviation of observed MAP from the MAPopt series and the burden metrics
//! derived from it.

use ndarray::{s, Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::config::{BURDEN_BOUNDS, DEVIATION_MAX, DEVIATION_MIN};
use crate::{MapoptError, Signal};

/// Burden over one queried time range.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BurdenResult {
    /// Range actually used after clamping to the series span.
    pub start_hour: f64,
    pub end_hour: f64,
    /// Percent of in-range points outside the tolerance band.
    pub time_burden: f64,
    /// Area outside the band relative to the band area, in percent.
    pub area_burden_ratio: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviationStatistics {
    pub mean: f64,
    pub std: f64,
    pub max_positive: f64,
    pub max_negative: f64,
    pub percent_above: f64,
    pub percent_below: f64,
    pub percent_outside: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BurdenPoint {
    pub center_hour: f64,
    pub time_burden: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BurdenSummary {
    pub full_range: BurdenResult,
    pub deviation: DeviationStatistics,
    pub total_excess_above: f64,
    pub total_excess_below: f64,
    /// `None` when MAP never rose above the band.
    pub mean_excess_above: Option<f64>,
    /// `None` when MAP never fell below the band.
    pub mean_excess_below: Option<f64>,
}

/// Observed MAP on the series grid, scored against a ±[`BURDEN_BOUNDS`] band
/// around MAPopt.
#[derive(Clone, Debug)]
pub struct BurdenEngine {
    times: Array1<f64>,
    map: Array1<f64>,
    mapopt: Array1<f64>,
    deviation: Array1<f64>,
    outside_upper: Vec<bool>,
    outside_lower: Vec<bool>,
    excess_above: Array1<f64>,
    excess_below: Array1<f64>,
}

/// Linear interpolation of `(xp, fp)` at `x`, holding the end values outside
/// the sampled span. Non-finite `fp` entries are skipped.
fn interp(x: &[f64], xp: ArrayView1<'_, f64>, fp: ArrayView1<'_, f64>) -> Array1<f64> {
    let (kx, ky): (Vec<f64>, Vec<f64>) = xp
        .iter()
        .zip(fp.iter())
        .filter(|(_, y)| y.is_finite())
        .map(|(&a, &b)| (a, b))
        .unzip();
    if kx.is_empty() {
        return Array1::from_elem(x.len(), f64::NAN);
    }
    let last = kx.len() - 1;
    x.iter()
        .map(|&t| {
            if t <= kx[0] {
                return ky[0];
            }
            if t >= kx[last] {
                return ky[last];
            }
            let hi = kx.partition_point(|&v| v <= t);
            let lo = hi - 1;
            let frac = (t - kx[lo]) / (kx[hi] - kx[lo]);
            ky[lo] + frac * (ky[hi] - ky[lo])
        })
        .collect()
}

fn trapezoid(y: ArrayView1<'_, f64>, x: ArrayView1<'_, f64>) -> f64 {
    (1..x.len())
        .map(|i| (x[i] - x[i - 1]) * (y[i] + y[i - 1]) / 2.0)
        .sum()
}

fn percent(flags: &[bool]) -> f64 {
    if flags.is_empty() {
        return 0.0;
    }
    flags.iter().filter(|&&f| f).count() as f64 / flags.len() as f64 * 100.0
}

impl BurdenEngine {
    pub fn new(signal: &Signal, times: &[f64], mapopt: &[f64]) -> Result<Self, MapoptError> {
        if times.len() != mapopt.len() {
            return Err(MapoptError::InvalidInput(format!(
                "series length {} does not match grid length {}",
                mapopt.len(),
                times.len()
            )));
        }
        if times.is_empty() {
            return Err(MapoptError::InsufficientData);
        }

        let map = interp(times, signal.times(), signal.map());
        let mapopt = Array1::from_vec(mapopt.to_vec());
        let deviation = (&map - &mapopt).mapv(|d| d.clamp(DEVIATION_MIN, DEVIATION_MAX));

        let n = times.len();
        let mut outside_upper = vec![false; n];
        let mut outside_lower = vec![false; n];
        let mut excess_above = Array1::zeros(n);
        let mut excess_below = Array1::zeros(n);
        for i in 0..n {
            let upper = mapopt[i] + BURDEN_BOUNDS;
            let lower = mapopt[i] - BURDEN_BOUNDS;
            if map[i] > upper {
                outside_upper[i] = true;
                excess_above[i] = map[i] - upper;
            } else if map[i] < lower {
                outside_lower[i] = true;
                excess_below[i] = lower - map[i];
            }
        }

        Ok(Self {
            times: Array1::from_vec(times.to_vec()),
            map,
            mapopt,
            deviation,
            outside_upper,
            outside_lower,
            excess_above,
            excess_below,
        })
    }

    /// First and last grid time.
    pub fn span(&self) -> (f64, f64) {
        let n = self.times.len();
        (self.times[0], self.times[n - 1])
    }

    pub fn map_on_grid(&self) -> ArrayView1<'_, f64> {
        self.map.view()
    }

    pub fn mapopt(&self) -> ArrayView1<'_, f64> {
        self.mapopt.view()
    }

    /// `MAP - MAPopt`, clipped to ±50 mmHg.
    pub fn deviation(&self) -> ArrayView1<'_, f64> {
        self.deviation.view()
    }

    pub fn outside_band(&self) -> Vec<bool> {
        self.outside_upper
            .iter()
            .zip(&self.outside_lower)
            .map(|(&up, &down)| up || down)
            .collect()
    }

    /// Burden over `[start_hour, end_hour]` after clamping to the series span.
    /// A range holding no grid point yields zeros.
    pub fn burden(&self, start_hour: f64, end_hour: f64) -> BurdenResult {
        let (first, last) = self.span();
        let start_hour = start_hour.max(first);
        let end_hour = end_hour.min(last);

        let times = self.times.as_slice().unwrap_or(&[]);
        let lo = times.partition_point(|&t| t < start_hour);
        let hi = times.partition_point(|&t| t <= end_hour);
        if hi <= lo {
            return BurdenResult {
                start_hour,
                end_hour,
                ..BurdenResult::default()
            };
        }

        let outside = self.outside_band();
        let time_burden = percent(&outside[lo..hi]);

        let t = self.times.slice(s![lo..hi]);
        let excess = &self.excess_above.slice(s![lo..hi]) + &self.excess_below.slice(s![lo..hi]);
        let band_width = Array1::from_elem(hi - lo, 2.0 * BURDEN_BOUNDS);

        let area_outside = trapezoid(excess.view(), t);
        let area_band = trapezoid(band_width.view(), t);
        let area_burden_ratio = if area_band > 0.0 {
            area_outside / area_band * 100.0
        } else {
            0.0
        };

        BurdenResult {
            start_hour,
            end_hour,
            time_burden,
            area_burden_ratio,
        }
    }

    /// Statistics of the deviation over the whole series.
    pub fn deviation_statistics(&self) -> DeviationStatistics {
        let outside = self.outside_band();
        let (max_positive, max_negative) = self
            .deviation
            .iter()
            .fold((f64::NEG_INFINITY, f64::INFINITY), |(hi, lo), &d| {
                (hi.max(d), lo.min(d))
            });
        DeviationStatistics {
            mean: self.deviation.mean().unwrap_or(f64::NAN),
            std: self.deviation.std(0.0),
            max_positive,
            max_negative,
            percent_above: percent(&self.outside_upper),
            percent_below: percent(&self.outside_lower),
            percent_outside: percent(&outside),
        }
    }

    /// Time burden over sliding windows of `window_hours`, advancing by
    /// `step_hours` while the window fits inside the series.
    pub fn burden_profile(&self, window_hours: f64, step_hours: f64) -> Vec<BurdenPoint> {
        if !(window_hours > 0.0 && step_hours > 0.0) {
            return Vec::new();
        }
        let (first, last) = self.span();
        let latest_start = last - window_hours;
        (0usize..)
            .map(|k| first + k as f64 * step_hours)
            .take_while(|&start| start <= latest_start)
            .map(|start| BurdenPoint {
                center_hour: start + window_hours / 2.0,
                time_burden: self.burden(start, start + window_hours).time_burden,
            })
            .collect()
    }

    pub fn summary(&self) -> BurdenSummary {
        let (first, last) = self.span();
        let mean_where = |values: &Array1<f64>, mask: &[bool]| {
            let picked: Vec<f64> = values
                .iter()
                .zip(mask)
                .filter(|(_, &m)| m)
                .map(|(&v, _)| v)
                .collect();
            (!picked.is_empty()).then(|| picked.iter().sum::<f64>() / picked.len() as f64)
        };
        BurdenSummary {
            full_range: self.burden(first, last),
            deviation: self.deviation_statistics(),
            total_excess_above: self.excess_above.sum(),
            total_excess_below: self.excess_below.sum(),
            mean_excess_above: mean_where(&self.excess_above, &self.outside_upper),
            mean_excess_below: mean_where(&self.excess_below, &self.outside_lower),
        }
    }
}
