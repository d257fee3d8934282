//! Confidence weight of an accepted curve fit.

use crate::config::COX_WEIGHT_THRESHOLD;

/// Reward for the correlation at the fitted nadir.
///
/// Negative COx (intact autoregulation) scores its magnitude, small positive
/// values decay linearly to zero at [`COX_WEIGHT_THRESHOLD`], anything above
/// scores nothing.
pub fn cox_weight(nadir_cox: f64) -> f64 {
    if nadir_cox < 0.0 {
        -nadir_cox
    } else if nadir_cox <= COX_WEIGHT_THRESHOLD {
        (COX_WEIGHT_THRESHOLD - nadir_cox) / COX_WEIGHT_THRESHOLD
    } else {
        0.0
    }
}

/// `R² × cox_weight`, never negative. Non-finite inputs score zero.
pub fn fit_weight(nadir_cox: f64, r2: f64) -> f64 {
    let weight = r2 * cox_weight(nadir_cox);
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_nadir_rewards_magnitude() {
        assert!((cox_weight(-0.4) - 0.4).abs() < 1e-12);
        assert!((fit_weight(-0.5, 0.8) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn small_positive_nadir_decays_linearly() {
        assert!((cox_weight(0.0) - 1.0).abs() < 1e-12);
        assert!((cox_weight(0.15) - 0.5).abs() < 1e-12);
        assert_eq!(cox_weight(COX_WEIGHT_THRESHOLD), 0.0);
    }

    #[test]
    fn impaired_nadir_scores_zero() {
        for r2 in [0.0, 0.5, 1.0, 10.0] {
            assert_eq!(fit_weight(0.31, r2), 0.0);
            assert_eq!(fit_weight(0.95, r2), 0.0);
        }
    }

    #[test]
    fn weight_is_never_negative() {
        assert_eq!(fit_weight(-0.5, -0.2), 0.0);
        assert_eq!(fit_weight(f64::NAN, 0.9), 0.0);
        assert_eq!(fit_weight(-0.5, f64::NAN), 0.0);
    }
}
