//! Fisher z transform for correlation coefficients.

use crate::config::FISHER_BOUNDS;

/// Clip `r` to ±[`FISHER_BOUNDS`] and map it to z space.
pub fn fisher_transform(r: f64) -> f64 {
    let r = r.clamp(-FISHER_BOUNDS, FISHER_BOUNDS);
    0.5 * ((1.0 + r) / (1.0 - r)).ln()
}

pub fn inverse_fisher_transform(z: f64) -> f64 {
    z.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_inside_clip_bound() {
        for r in [-0.998, -0.5, -0.01, 0.0, 0.2, 0.73, 0.998] {
            let back = inverse_fisher_transform(fisher_transform(r));
            assert!((back - r).abs() < 1e-12, "r={r} back={back}");
        }
    }

    #[test]
    fn perfect_correlation_is_clipped() {
        let z = fisher_transform(1.0);
        assert!(z.is_finite());
        assert!((inverse_fisher_transform(z) - FISHER_BOUNDS).abs() < 1e-12);
        assert_eq!(fisher_transform(-1.0), -z);
    }

    #[test]
    fn nan_propagates() {
        assert!(fisher_transform(f64::NAN).is_nan());
    }
}
