//! Chunked dispatch of per-time-point work over a bounded worker pool.

use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::config::{CHUNK_SIZE, MAX_WORKERS};
use crate::grid::{evaluate_time_point, MapOptEstimate};
use crate::Signal;

/// Receives run progress as a percentage in `0..=100`.
pub trait ProgressSink: Sync {
    fn on_progress(&self, percent: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Sync,
{
    fn on_progress(&self, percent: f64) {
        self(percent)
    }
}

/// Runs work in chunks of [`CHUNK_SIZE`] on up to [`MAX_WORKERS`] threads.
///
/// A scheduler with one worker runs every chunk inline on the calling thread.
/// If the pool cannot be built, or a chunk panics while running on it, the
/// scheduler recomputes that chunk inline and finishes the run sequentially.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scheduler {
    workers: usize,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.clamp(1, MAX_WORKERS),
        }
    }

    pub fn sequential() -> Self {
        Self { workers: 1 }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn build_pool(&self) -> Option<ThreadPool> {
        if self.workers <= 1 {
            return None;
        }
        match ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("mapopt-worker-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!(error = %err, workers = self.workers, "worker pool unavailable; running sequentially");
                None
            }
        }
    }

    /// Apply `f` to every item, storing each result at the item's index.
    pub fn map_indexed<T, F>(
        &self,
        items: &[f64],
        f: F,
        progress: Option<&dyn ProgressSink>,
    ) -> Vec<T>
    where
        T: Send + Default,
        F: Fn(f64) -> T + Sync,
    {
        let mut slots: Vec<T> = Vec::with_capacity(items.len());
        slots.resize_with(items.len(), T::default);
        let total_chunks = items.len().div_ceil(CHUNK_SIZE);
        let mut pool = self.build_pool();

        let chunks = items
            .chunks(CHUNK_SIZE)
            .zip(slots.chunks_mut(CHUNK_SIZE))
            .enumerate();
        for (chunk_idx, (inputs, outputs)) in chunks {
            let mut done = false;
            if let Some(active) = pool.as_ref() {
                let dispatch = panic::catch_unwind(AssertUnwindSafe(|| {
                    active.install(|| {
                        outputs
                            .par_iter_mut()
                            .zip(inputs.par_iter())
                            .for_each(|(slot, &t)| *slot = f(t));
                    })
                }));
                if dispatch.is_ok() {
                    done = true;
                } else {
                    warn!(chunk = chunk_idx, "parallel chunk failed; continuing sequentially");
                }
            }
            if !done {
                pool = None;
                for (slot, &t) in outputs.iter_mut().zip(inputs) {
                    *slot = f(t);
                }
            }

            if let Some(sink) = progress {
                sink.on_progress((chunk_idx + 1) as f64 / total_chunks as f64 * 100.0);
            }
        }
        slots
    }

    /// Evaluate the parameter grid sweep at every time in `grid`.
    pub fn run(
        &self,
        signal: &Signal,
        grid: &[f64],
        progress: Option<&dyn ProgressSink>,
    ) -> Vec<MapOptEstimate> {
        debug!(points = grid.len(), workers = self.workers, "dispatching grid sweep");
        self.map_indexed(grid, |t| evaluate_time_point(signal, t), progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn items(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn worker_count_is_bounded() {
        assert_eq!(Scheduler::new(0).workers(), 1);
        assert_eq!(Scheduler::new(3).workers(), 3);
        assert_eq!(Scheduler::new(64).workers(), MAX_WORKERS);
    }

    #[test]
    fn parallel_matches_sequential() {
        let xs = items(103);
        let square = |t: f64| t * t + 1.0;
        let seq: Vec<f64> = Scheduler::sequential().map_indexed(&xs, square, None);
        let par: Vec<f64> = Scheduler::new(4).map_indexed(&xs, square, None);
        assert_eq!(seq, par);
        assert_eq!(par[102], 102.0 * 102.0 + 1.0);
    }

    #[test]
    fn progress_is_reported_per_chunk_and_reaches_100() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: f64| seen.lock().unwrap().push(p);
        let _: Vec<f64> = Scheduler::new(2).map_indexed(&items(60), |t| t, Some(&sink));

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert!((seen[2] - 100.0).abs() < 1e-12);
    }

    #[test]
    fn empty_input_reports_nothing() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: f64| seen.lock().unwrap().push(p);
        let out: Vec<f64> = Scheduler::new(2).map_indexed(&[], |t| t, Some(&sink));
        assert!(out.is_empty());
        assert!(seen.into_inner().unwrap().is_empty());
    }

    #[test]
    fn panicking_chunk_is_recomputed_inline() {
        let tripped = AtomicBool::new(false);
        let flaky = |t: f64| {
            if t == 30.0 && !tripped.swap(true, Ordering::SeqCst) {
                panic!("transient worker failure");
            }
            t * 2.0
        };
        let seen = Mutex::new(Vec::new());
        let sink = |p: f64| seen.lock().unwrap().push(p);
        let out: Vec<f64> = Scheduler::new(4).map_indexed(&items(80), flaky, Some(&sink));

        assert!(tripped.load(Ordering::SeqCst));
        assert_eq!(out, items(80).iter().map(|t| t * 2.0).collect::<Vec<_>>());
        assert_eq!(seen.into_inner().unwrap().len(), 4);
    }

    #[test]
    fn run_keeps_grid_order() {
        let times: Vec<f64> = (0..90).map(|i| i as f64 / 60.0).collect();
        let signal = Signal::new(times, vec![70.0; 90], vec![60.0; 90]).unwrap();
        let grid: Vec<f64> = (0..89).map(|i| i as f64 / 60.0).collect();
        let estimates = Scheduler::new(3).run(&signal, &grid, None);
        assert_eq!(estimates.len(), grid.len());
        assert!(estimates.iter().all(|e| e.mapopt.is_nan()));
        assert!(estimates.iter().all(|e| e.rejections.total() == 72));
    }
}
