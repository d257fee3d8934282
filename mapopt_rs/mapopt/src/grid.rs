//! Per-time-point sweep over the (window, history) parameter grid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::parameter_grid;
use crate::correlation::sliding_window_correlations;
use crate::fit::{fit_curve, CurveFit, FitOutcome, Rejection};
use crate::Signal;

/// Count of rejected attempts per reason.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionTally {
    counts: BTreeMap<Rejection, usize>,
}

impl RejectionTally {
    pub fn record(&mut self, reason: Rejection) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &RejectionTally) {
        for (&reason, &count) in &other.counts {
            *self.counts.entry(reason).or_insert(0) += count;
        }
    }

    pub fn get(&self, reason: Rejection) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rejection, usize)> + '_ {
        self.counts.iter().map(|(&reason, &count)| (reason, count))
    }
}

/// Weighted MAPopt for one evaluation time plus the fits behind it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapOptEstimate {
    /// NaN when no fit was retained.
    pub mapopt: f64,
    pub fits: Vec<CurveFit>,
    pub rejections: RejectionTally,
}

impl Default for MapOptEstimate {
    fn default() -> Self {
        Self {
            mapopt: f64::NAN,
            fits: Vec::new(),
            rejections: RejectionTally::default(),
        }
    }
}

impl MapOptEstimate {
    pub fn has_candidates(&self) -> bool {
        !self.fits.is_empty()
    }
}

/// Run one (window, history) combination ending at `t_now`.
pub fn attempt_combination(
    signal: &Signal,
    t_now: f64,
    window_min: u32,
    history_hr: u32,
) -> FitOutcome {
    let history_h = f64::from(history_hr);
    if t_now - history_h < signal.start() {
        return FitOutcome::Rejected(Rejection::HistoryBeforeStart);
    }
    let window_h = f64::from(window_min) / 60.0;
    match sliding_window_correlations(signal, window_h, history_h, t_now) {
        Ok(observations) => fit_curve(window_min, history_hr, &observations),
        Err(reason) => FitOutcome::Rejected(reason),
    }
}

/// Sweep the full parameter grid at `t_now` and combine the accepted fits.
pub fn evaluate_time_point(signal: &Signal, t_now: f64) -> MapOptEstimate {
    let mut estimate = MapOptEstimate::default();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for (window_min, history_hr) in parameter_grid() {
        match attempt_combination(signal, t_now, window_min, history_hr) {
            FitOutcome::Accepted(fit) => {
                weighted_sum += fit.mapopt * fit.weight;
                weight_total += fit.weight;
                estimate.fits.push(fit);
            }
            FitOutcome::Rejected(reason) => estimate.rejections.record(reason),
        }
    }

    if weight_total > 0.0 {
        estimate.mapopt = weighted_sum / weight_total;
    }
    estimate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAP_OPT_MAX, MAP_OPT_MIN};

    fn coupled_signal(hours: usize) -> Signal {
        // rSO2 falls with MAP near 70 and rises with it further out.
        let times: Vec<f64> = (0..hours * 60).map(|i| i as f64 / 60.0).collect();
        let map: Vec<f64> = times
            .iter()
            .map(|&t| 70.0 + 20.0 * (2.0 * std::f64::consts::PI * t / 3.0).sin())
            .collect();
        let rso2 = map
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                let d = m - 70.0;
                let jitter = ((i * 7919) % 101) as f64 / 100.0 - 0.5;
                60.0 + 1.5 * (d.powi(3) / 1200.0 - 0.5 * d) + 0.5 * jitter
            })
            .collect();
        Signal::new(times, map, rso2).unwrap()
    }

    #[test]
    fn early_time_points_reject_every_combination() {
        let signal = coupled_signal(2);
        let estimate = evaluate_time_point(&signal, 0.5);
        assert!(estimate.mapopt.is_nan());
        assert!(!estimate.has_candidates());
        assert_eq!(estimate.rejections.get(Rejection::HistoryBeforeStart), 72);
        assert_eq!(estimate.rejections.total(), 72);
    }

    #[test]
    fn weighted_mean_lies_between_candidates() {
        let signal = coupled_signal(8);
        let estimate = evaluate_time_point(&signal, 6.0);
        assert!(estimate.has_candidates());
        assert_eq!(estimate.fits.len() + estimate.rejections.total(), 72);

        let lo = estimate.fits.iter().map(|f| f.mapopt).fold(f64::INFINITY, f64::min);
        let hi = estimate.fits.iter().map(|f| f.mapopt).fold(f64::NEG_INFINITY, f64::max);
        assert!(estimate.mapopt >= lo - 1e-9 && estimate.mapopt <= hi + 1e-9);
        for fit in &estimate.fits {
            assert!(fit.coefficients[0] > 0.0);
            assert!((MAP_OPT_MIN..=MAP_OPT_MAX).contains(&fit.mapopt));
            assert!(fit.weight > 0.0);
        }
        assert!((estimate.mapopt - 70.0).abs() < 5.0, "mapopt {}", estimate.mapopt);
    }

    #[test]
    fn fits_follow_window_major_sweep_order() {
        let signal = coupled_signal(8);
        let estimate = evaluate_time_point(&signal, 7.5);
        let order: Vec<_> = estimate
            .fits
            .iter()
            .map(|f| (f.window_min, f.history_hr))
            .collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }

    #[test]
    fn tally_merges_counts() {
        let mut a = RejectionTally::default();
        a.record(Rejection::NoMinimum);
        a.record(Rejection::NoMinimum);
        let mut b = RejectionTally::default();
        b.record(Rejection::TooFewBins);
        a.merge(&b);
        assert_eq!(a.get(Rejection::NoMinimum), 2);
        assert_eq!(a.get(Rejection::TooFewBins), 1);
        assert_eq!(a.total(), 3);
    }
}
