//! # ode_explorer: event-norm heatmaps for planar dynamical systems
//!
//! Integrates a family of trajectories that share an initial position and
//! differ in initial velocity, stops each one at a composite event (the n-th
//! crossing of one signal, of another, of both, or of either), and records
//! how far the state has moved by then. Sweeping the velocity plane yields a
//! scalar field whose structure shows how the dynamics depend on the launch
//! velocity.
//!
//! ## Features
//!
//! - Dormand–Prince 5(4) adaptive integrator with a fixed-step mode for
//!   refinement
//! - Crossing counting on two event signals with four composite stopping
//!   rules and bisection refinement of the final crossing
//! - Mass-spring force laws and a harmonic reference model
//! - Row-parallel grid sweep on rayon with cooperative cancellation
//! - CSV export and log-scaled rendering of the resulting field
//!
//! ## Basic Usage
//!
//! ```rust
//! use ode_explorer::{Dopri5, OdeSystem, Tolerances};
//!
//! struct HarmonicOscillator { omega: f64 }
//!
//! impl OdeSystem<2> for HarmonicOscillator {
//!     fn rhs(&self, _t: f64, y: &[f64; 2], dydt: &mut [f64; 2]) {
//!         dydt[0] = y[1];
//!         dydt[1] = -self.omega * self.omega * y[0];
//!     }
//! }
//!
//! let sys = HarmonicOscillator { omega: 1.0 };
//! let mut solver = Dopri5::new(Tolerances::new(1e-10, 1e-10));
//!
//! let (mut t, mut y, mut h) = (0.0, [1.0, 0.0], 0.1_f64);
//! while t < 1.0 {
//!     let step = solver.try_step(&sys, t, &y, h.min(1.0 - t)).unwrap();
//!     (t, y, h) = (step.t, step.y, step.h_next);
//! }
//! assert!((y[0] - t.cos()).abs() < 1e-8);
//! ```
//!
//! ## Finding Events
//!
//! ```rust
//! use ode_explorer::{
//!     Axis, DetectorSettings, EventDetector, EventKind, EventTargets, ForceModel,
//! };
//!
//! // x-axis crossings (signal A = y) of a unit harmonic oscillator
//! let detector = EventDetector::new(
//!     ForceModel::harmonic(1.0),
//!     Axis::Y,
//!     Axis::X,
//!     DetectorSettings::default(),
//! );
//!
//! let event = detector
//!     .find_event(&[0.0, 0.0, 0.0, 1.0], 0.0, EventKind::A, EventTargets::new(2, 0))
//!     .unwrap();
//! assert!((event.t - 2.0 * std::f64::consts::PI).abs() < 1e-6);
//! ```
//!
//! ## Sweeping a Grid
//!
//! ```rust,no_run
//! use ode_explorer::{ExplorerConfig, FrameSequence, GridSweep};
//!
//! let config = ExplorerConfig::load("explorer.toml")?;
//! let field = GridSweep::from_config(&config, 0)?.run()?;
//!
//! let frames = FrameSequence::next_free(&config.output.directory, &config.output.base_name);
//! frames.save(0, &field, config.tolerance)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Tolerance
//!
//! A single tolerance drives the absolute and relative integration error and
//! the acceptance bound |g| ≤ tol of a refined crossing. Tightening it moves
//! event times monotonically closer to the true crossing; the number of
//! bisections grows with `log2(1/tol)`.
//!
//! ## References
//!
//! 1. Dormand, J.R. & Prince, P.J. (1980). "A family of embedded Runge-Kutta
//!    formulae". Journal of Computational and Applied Mathematics 6(1).
//!
//! 2. Hairer, E., Nørsett, S.P., & Wanner, G. (1993). "Solving
//!    Ordinary Differential Equations I: Nonstiff Problems".
//!    Springer.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod coefficients;
pub mod config;
pub mod detector;
pub mod events;
pub mod model;
pub mod norm;
pub mod sink;
pub mod solver;
pub mod sweep;

pub use config::{AnimationConfig, ConfigError, EventsConfig, ExplorerConfig, OutputConfig};
pub use detector::{
    Bracket, DetectorSettings, EventDetector, EventKind, EventOutcome, EventTargets, Sample,
};
pub use events::{crossing_detected, Bisection, EventSignal, Refined, SignalId, TieBreak};
pub use model::{Axis, ForceModel, LawKind};
pub use norm::{squared_distance, CompositeMode, NormEvaluator};
pub use sink::{log_normalize, write_csv, write_log_csv, FrameSequence, Heatmap, SinkError};
pub use solver::{
    AdaptiveStep, Dopri5, IntegrationError, OdeSystem, Stats, StepController, StepResult,
    Tolerances,
};
pub use sweep::{GridSpec, GridSweep, ScalarField, SweepError};
