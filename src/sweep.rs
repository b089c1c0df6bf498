//! Parallel grid sweep over initial velocities
//!
//! Every pixel `(x, y)` of the grid is an initial state
//! `(pos.x, pos.y, v0.x + dv·x, v0.y + dv·y)`; its norm lands at row `y`,
//! column `x` of a [`ScalarField`]. Rows are spread over rayon workers, each
//! pixel builds its own integrator, so the result does not depend on the
//! number of threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, ExplorerConfig};
use crate::detector::EventDetector;
use crate::events::EventSignal;
use crate::model::{Axis, ForceModel};
use crate::norm::NormEvaluator;
use crate::solver::OdeSystem;

/// Sweep failures that abort the whole matrix
#[derive(Debug, Error)]
pub enum SweepError {
    /// Grid, detector settings or model rejected before any pixel was
    /// computed
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The cancellation flag was raised
    #[error("sweep cancelled")]
    Cancelled,
    /// The dedicated worker pool could not be built
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Mapping from pixels to initial states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridSpec {
    /// Pixels per row
    pub width: usize,
    /// Number of rows
    pub height: usize,
    /// Initial position shared by every pixel
    pub position: [f64; 2],
    /// Initial velocity of pixel `(0, 0)`
    pub velocity_origin: [f64; 2],
    /// Velocity increment per pixel along both axes
    pub velocity_step: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            width: 400,
            height: 200,
            position: [0.0, 0.0],
            velocity_origin: [-4.0, 0.0],
            velocity_step: 0.02,
        }
    }
}

impl GridSpec {
    /// Reject empty grids and non-finite coordinates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyGrid {
                width: self.width,
                height: self.height,
            });
        }
        if !self.position.iter().all(|v| v.is_finite()) {
            return Err(ConfigError::NonFiniteGrid("position"));
        }
        if !self.velocity_origin.iter().all(|v| v.is_finite()) {
            return Err(ConfigError::NonFiniteGrid("velocity_origin"));
        }
        if !self.velocity_step.is_finite() {
            return Err(ConfigError::NonFiniteGrid("velocity_step"));
        }
        Ok(())
    }

    /// Initial state `[x, y, vx, vy]` of pixel `(x, y)`.
    pub fn initial_state(&self, x: usize, y: usize) -> [f64; 4] {
        [
            self.position[0],
            self.position[1],
            self.velocity_origin[0] + self.velocity_step * x as f64,
            self.velocity_origin[1] + self.velocity_step * y as f64,
        ]
    }

    /// Total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Row-major `height × width` matrix of norm values
///
/// Pixels whose evaluation failed hold `f64::NAN` and are counted in
/// `failures`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    /// Columns
    pub width: usize,
    /// Rows
    pub height: usize,
    /// `values[y * width + x]`
    pub values: Vec<f64>,
    /// Pixels that failed to evaluate
    pub failures: usize,
}

impl ScalarField {
    /// Value at column `x`, row `y`, if inside the matrix.
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get(y * self.width + x).copied()
    }

    /// Rows in storage order
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        // width is never zero for a validated grid, chunks() would panic on it
        self.values.chunks(self.width.max(1))
    }

    /// Largest non-NaN value, `None` if every pixel failed
    pub fn max_finite(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
    }
}

/// A norm evaluator applied to every pixel of a grid
#[derive(Debug, Clone)]
pub struct GridSweep<S, A, B> {
    evaluator: NormEvaluator<S, A, B>,
    grid: GridSpec,
    threads: usize,
}

impl GridSweep<ForceModel, Axis, Axis> {
    /// Sweep described by a validated configuration, for animation frame
    /// `frame`.
    pub fn from_config(config: &ExplorerConfig, frame: usize) -> Result<Self, SweepError> {
        config.validate()?;
        let detector = EventDetector::new(
            config.model_for_frame(frame),
            config.events.signal_a,
            config.events.signal_b,
            config.detector_settings(),
        );
        let evaluator = NormEvaluator::new(detector, config.mode, config.targets());
        Ok(Self::new(evaluator, config.grid.clone()).with_threads(config.threads))
    }
}

impl<S, A, B> GridSweep<S, A, B>
where
    S: OdeSystem<4> + Sync,
    A: EventSignal<4> + Sync,
    B: EventSignal<4> + Sync,
{
    /// Sweep `grid` with `evaluator` on the global rayon pool.
    pub fn new(evaluator: NormEvaluator<S, A, B>, grid: GridSpec) -> Self {
        Self {
            evaluator,
            grid,
            threads: 0,
        }
    }

    /// Run on a dedicated pool of `threads` workers; 0 keeps the global pool.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Grid being swept
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Compute the whole matrix.
    pub fn run(&self) -> Result<ScalarField, SweepError> {
        self.run_with_cancel(&AtomicBool::new(false))
    }

    /// Compute the whole matrix, stopping early once `cancel` is set.
    ///
    /// Grid and detector settings are validated before any pixel is
    /// computed. The flag is checked before every pixel. A cancelled sweep
    /// returns [`SweepError::Cancelled`] and discards partial results.
    pub fn run_with_cancel(&self, cancel: &AtomicBool) -> Result<ScalarField, SweepError> {
        self.grid.validate()?;
        self.evaluator.detector().settings().validate()?;

        let width = self.grid.width;
        let height = self.grid.height;
        let mut values = vec![f64::NAN; self.grid.pixel_count()];
        let failures = AtomicUsize::new(0);
        let rows_done = AtomicUsize::new(0);
        let started = Instant::now();

        info!(width, height, threads = self.threads, "sweep started");

        let compute = |values: &mut [f64]| {
            values
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(row, chunk)| {
                    for (col, slot) in chunk.iter_mut().enumerate() {
                        if cancel.load(Ordering::Relaxed) {
                            return;
                        }
                        let y0 = self.grid.initial_state(col, row);
                        *slot = match self.evaluator.norm(&y0) {
                            Ok(norm) => norm,
                            Err(err) => {
                                failures.fetch_add(1, Ordering::Relaxed);
                                debug!(row, col, error = %err, "pixel failed");
                                f64::NAN
                            }
                        };
                    }

                    let done = rows_done.fetch_add(1, Ordering::Relaxed) + 1;
                    if done * 10 / height > (done - 1) * 10 / height {
                        info!(
                            rows = done,
                            percent = done * 100 / height,
                            "sweep progress"
                        );
                    }
                });
        };

        if self.threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .build()?;
            pool.install(|| compute(&mut values));
        } else {
            compute(&mut values);
        }

        if cancel.load(Ordering::Relaxed) {
            info!(elapsed = ?started.elapsed(), "sweep cancelled");
            return Err(SweepError::Cancelled);
        }

        let failures = failures.into_inner();
        info!(elapsed = ?started.elapsed(), failures, "sweep finished");

        Ok(ScalarField {
            width,
            height,
            values,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectorSettings, EventTargets};
    use crate::norm::CompositeMode;
    use approx::assert_abs_diff_eq;

    fn harmonic_sweep(grid: GridSpec) -> GridSweep<ForceModel, Axis, Axis> {
        let detector = EventDetector::new(
            ForceModel::harmonic(1.0),
            Axis::Y,
            Axis::X,
            DetectorSettings::default(),
        );
        let evaluator = NormEvaluator::new(detector, CompositeMode::A, EventTargets::new(1, 0));
        GridSweep::new(evaluator, grid)
    }

    fn small_grid() -> GridSpec {
        GridSpec {
            width: 5,
            height: 3,
            position: [0.0, 0.0],
            velocity_origin: [-0.5, 0.25],
            velocity_step: 0.25,
        }
    }

    #[test]
    fn test_initial_state_mapping() {
        let grid = GridSpec::default();
        assert_eq!(grid.initial_state(0, 0), [0.0, 0.0, -4.0, 0.0]);
        let s = grid.initial_state(399, 199);
        assert_abs_diff_eq!(s[2], 3.98, epsilon = 1e-12);
        assert_abs_diff_eq!(s[3], 3.98, epsilon = 1e-12);
        assert_eq!(grid.pixel_count(), 80_000);
    }

    #[test]
    fn test_grid_validation() {
        assert!(GridSpec::default().validate().is_ok());
        let empty = GridSpec {
            height: 0,
            ..Default::default()
        };
        assert!(matches!(
            empty.validate(),
            Err(ConfigError::EmptyGrid { height: 0, .. })
        ));
        let bad = GridSpec {
            velocity_step: f64::INFINITY,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::NonFiniteGrid("velocity_step"))
        ));
    }

    #[test]
    fn test_sweep_layout_and_values() {
        let field = harmonic_sweep(small_grid()).run().unwrap();
        assert_eq!((field.width, field.height), (5, 3));
        assert_eq!(field.values.len(), 15);
        assert_eq!(field.failures, 0);

        // Every row starts with vy > 0, so the event is half a period later
        for y in 0..3 {
            for x in 0..5 {
                let [_, _, vx, vy] = small_grid().initial_state(x, y);
                let norm = field.get(x, y).unwrap();
                assert_abs_diff_eq!(norm, 4.0 * (vx * vx + vy * vy), epsilon = 1e-6);
            }
        }
        assert_eq!(field.get(5, 0), None);
        assert_eq!(field.rows().count(), 3);
    }

    #[test]
    fn test_sweep_deterministic_across_thread_counts() {
        let serial = harmonic_sweep(small_grid()).with_threads(1).run().unwrap();
        let parallel = harmonic_sweep(small_grid()).with_threads(3).run().unwrap();
        let global = harmonic_sweep(small_grid()).run().unwrap();

        let bits = |f: &ScalarField| f.values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&serial), bits(&parallel));
        assert_eq!(bits(&serial), bits(&global));
    }

    #[test]
    fn test_sweep_cancelled() {
        let cancel = AtomicBool::new(true);
        let result = harmonic_sweep(small_grid()).run_with_cancel(&cancel);
        assert!(matches!(result, Err(SweepError::Cancelled)));
    }

    #[test]
    fn test_sweep_rejects_empty_grid() {
        let grid = GridSpec {
            width: 0,
            ..small_grid()
        };
        assert!(matches!(
            harmonic_sweep(grid).run(),
            Err(SweepError::Config(ConfigError::EmptyGrid { .. }))
        ));
    }

    #[test]
    fn test_sweep_rejects_invalid_settings() {
        for settings in [
            DetectorSettings {
                tolerance: 0.0,
                ..Default::default()
            },
            DetectorSettings {
                seed_step: -0.1,
                ..Default::default()
            },
        ] {
            let detector =
                EventDetector::new(ForceModel::harmonic(1.0), Axis::Y, Axis::X, settings);
            let evaluator =
                NormEvaluator::new(detector, CompositeMode::A, EventTargets::new(1, 0));
            let result = GridSweep::new(evaluator, small_grid()).run();
            assert!(
                matches!(result, Err(SweepError::Config(_))),
                "expected a config error, got {:?}",
                result
            );
        }
    }

    /// Harmonic oscillator that blows up once |vx| exceeds one
    struct Fragile;

    impl OdeSystem<4> for Fragile {
        fn rhs(&self, _t: f64, s: &[f64; 4], dsdt: &mut [f64; 4]) {
            let blowup = if s[2].abs() > 1.0 { f64::NAN } else { 1.0 };
            dsdt[0] = s[2];
            dsdt[1] = s[3];
            dsdt[2] = -s[0] * blowup;
            dsdt[3] = -s[1] * blowup;
        }
    }

    #[test]
    fn test_failed_pixels_become_nan() {
        let detector =
            EventDetector::new(Fragile, Axis::Y, Axis::X, DetectorSettings::default());
        let evaluator = NormEvaluator::new(detector, CompositeMode::A, EventTargets::new(1, 0));
        let grid = GridSpec {
            width: 4,
            height: 1,
            position: [0.0, 0.0],
            velocity_origin: [-1.5, 0.5],
            velocity_step: 1.0,
        };

        let field = GridSweep::new(evaluator, grid).run().unwrap();

        assert_eq!(field.failures, 2);
        assert!(field.values[0].is_nan());
        assert!(field.values[3].is_nan());
        assert_abs_diff_eq!(field.values[1], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(field.values[2], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(field.max_finite().unwrap(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_from_config() {
        let mut config = ExplorerConfig::default();
        config.grid.width = 2;
        config.grid.height = 2;
        config.threads = 2;
        let sweep = GridSweep::from_config(&config, 0).unwrap();
        assert_eq!(sweep.grid().pixel_count(), 4);

        config.tolerance = -1.0;
        assert!(matches!(
            GridSweep::from_config(&config, 0),
            Err(SweepError::Config(ConfigError::InvalidTolerance(_)))
        ));
    }
}
