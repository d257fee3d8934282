//! Fixed analysis constants and the run-level [`Params`].
//!
//! The numeric constants are part of the estimation algorithm and are not
//! meant to be tuned per run. Only scheduling and burden reporting knobs live
//! in [`Params`].

use serde::{Deserialize, Serialize};

use crate::MapoptError;

/// Lower edge of the first MAP bin (mmHg).
pub const MAP_BIN_START: f64 = 40.0;
/// Width of every MAP bin (mmHg).
pub const MAP_BIN_WIDTH: f64 = 5.0;
/// Number of MAP bins spanning 40-100 mmHg.
pub const MAP_BIN_COUNT: usize = 12;

/// Correlation window lengths swept by the grid search (minutes).
pub const COX_WINDOWS_MIN: [u32; 8] = [3, 5, 10, 20, 30, 60, 90, 120];
/// History lookback lengths swept by the grid search (hours).
pub const HISTORY_WINDOWS_HR: [u32; 9] = [1, 2, 3, 4, 5, 6, 7, 8, 12];
/// Longest window used for the standalone COx diagnostic series (minutes).
pub const COX_SERIES_MAX_WINDOW_MIN: u32 = 30;

/// Physiological band for MAPopt candidates and the final series (mmHg).
pub const MAP_OPT_MIN: f64 = 40.0;
pub const MAP_OPT_MAX: f64 = 90.0;

pub const DEVIATION_MIN: f64 = -50.0;
pub const DEVIATION_MAX: f64 = 50.0;
/// Half-width of the tolerance band around MAPopt (mmHg).
pub const BURDEN_BOUNDS: f64 = 5.0;

/// Evaluation step of the time grid (hours).
pub const TIME_STEP_HR: f64 = 1.0 / 60.0;

pub const SAVGOL_WINDOW: usize = 11;
pub const SAVGOL_ORDER: usize = 3;

pub const COX_WEIGHT_THRESHOLD: f64 = 0.3;
pub const FISHER_BOUNDS: f64 = 0.999;
pub const MIN_FIT_WEIGHT: f64 = 1e-6;

pub const MIN_CORRELATION_POINTS: usize = 3;
pub const MIN_DATA_POINTS: usize = 10;
pub const MIN_SEGMENT_POINTS: usize = 60;
pub const MIN_OBSERVATIONS: usize = 5;
pub const MIN_FIT_BINS: usize = 3;

pub const CHUNK_SIZE: usize = 25;
pub const MAX_WORKERS: usize = 8;

/// Lower/upper edge of MAP bin `idx`.
pub fn map_bin_edges(idx: usize) -> (f64, f64) {
    let lower = MAP_BIN_START + MAP_BIN_WIDTH * idx as f64;
    (lower, lower + MAP_BIN_WIDTH)
}

pub fn map_bin_centers() -> [f64; MAP_BIN_COUNT] {
    let mut centers = [0.0; MAP_BIN_COUNT];
    for (idx, center) in centers.iter_mut().enumerate() {
        let (lower, _) = map_bin_edges(idx);
        *center = lower + MAP_BIN_WIDTH / 2.0;
    }
    centers
}

/// Cross product of window (minutes) and history (hours) lengths, window-major.
pub fn parameter_grid() -> impl Iterator<Item = (u32, u32)> {
    COX_WINDOWS_MIN.iter().flat_map(|&window_min| {
        HISTORY_WINDOWS_HR
            .iter()
            .map(move |&history_hr| (window_min, history_hr))
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Upper bound on worker threads; `None` uses the available parallelism.
    /// Always capped at [`MAX_WORKERS`].
    pub max_workers: Option<usize>,
    pub burden_start_hour: Option<f64>,
    pub burden_end_hour: Option<f64>,
    pub burden_window_hours: f64,
    pub burden_step_hours: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_workers: None,
            burden_start_hour: None,
            burden_end_hour: None,
            burden_window_hours: 4.0,
            burden_step_hours: 1.0,
        }
    }
}

impl Params {
    /// Parse params from a JSON object; missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, MapoptError> {
        let params: Params = serde_json::from_str(text)
            .map_err(|e| MapoptError::InvalidParameter(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), MapoptError> {
        if self.max_workers == Some(0) {
            return Err(MapoptError::InvalidParameter(
                "max_workers must be at least 1".into(),
            ));
        }
        if !(self.burden_window_hours.is_finite() && self.burden_window_hours > 0.0) {
            return Err(MapoptError::InvalidParameter(format!(
                "burden_window_hours must be > 0; got {}",
                self.burden_window_hours
            )));
        }
        if !(self.burden_step_hours.is_finite() && self.burden_step_hours > 0.0) {
            return Err(MapoptError::InvalidParameter(format!(
                "burden_step_hours must be > 0; got {}",
                self.burden_step_hours
            )));
        }
        for (name, bound) in [
            ("burden_start_hour", self.burden_start_hour),
            ("burden_end_hour", self.burden_end_hour),
        ] {
            if let Some(value) = bound {
                if !value.is_finite() {
                    return Err(MapoptError::InvalidParameter(format!(
                        "{name} must be finite; got {value}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Worker count actually used: requested bound, available parallelism and
    /// [`MAX_WORKERS`], whichever is smallest.
    pub fn resolved_workers(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let requested = self.max_workers.unwrap_or(available);
        requested.min(available).clamp(1, MAX_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_centers_are_offset_from_lower_edges() {
        let centers = map_bin_centers();
        assert_eq!(centers[0], 42.5);
        assert_eq!(centers[MAP_BIN_COUNT - 1], 97.5);
        assert_eq!(map_bin_edges(MAP_BIN_COUNT - 1).1, 100.0);
    }

    #[test]
    fn parameter_grid_has_72_window_major_combinations() {
        let grid: Vec<_> = parameter_grid().collect();
        assert_eq!(grid.len(), 72);
        assert_eq!(grid[0], (3, 1));
        assert_eq!(grid[8], (3, 12));
        assert_eq!(grid[9], (5, 1));
        assert_eq!(grid[71], (120, 12));
    }

    #[test]
    fn params_json_fills_defaults() {
        let params = Params::from_json_str(r#"{"max_workers": 2}"#).unwrap();
        assert_eq!(params.max_workers, Some(2));
        assert_eq!(params.burden_window_hours, 4.0);
        assert!(params.resolved_workers() <= 2);
    }

    #[test]
    fn params_reject_bad_values() {
        assert!(Params::from_json_str(r#"{"max_workers": 0}"#).is_err());
        assert!(Params::from_json_str(r#"{"burden_step_hours": 0.0}"#).is_err());
        assert!(Params::from_json_str("not json").is_err());
    }

    #[test]
    fn resolved_workers_never_exceeds_cap() {
        let params = Params {
            max_workers: Some(64),
            ..Params::default()
        };
        assert!(params.resolved_workers() <= MAX_WORKERS);
        assert!(params.resolved_workers() >= 1);
    }
}
