//! Composite event detection
//!
//! [`EventDetector::find_event`] integrates a trajectory step by step,
//! counting crossings of two event signals until a composite target is met,
//! then refines the last crossing by bisection:
//!
//! 1. one trial adaptive step of `seed_step` sizes the scan,
//! 2. the counting loop checks the continuation predicate *before* every
//!    step and returns the final [`Bracket`],
//! 3. the [`TieBreak`] policy picks the signal to refine for composite kinds,
//! 4. bisection over the length of a fixed step from the bracket start.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::events::{crossing_detected, Bisection, EventSignal, SignalId, TieBreak};
use crate::solver::{Dopri5, IntegrationError, OdeSystem, Tolerances};

/// How the two crossing counters combine into one stopping rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Wait for the A count only
    A,
    /// Wait for the B count only
    B,
    /// Wait until both counts are exhausted
    Both,
    /// Stop as soon as either count is exhausted
    Either,
}

impl EventKind {
    /// Whether the counting loop should take another step.
    pub fn should_continue(self, remaining_a: u32, remaining_b: u32) -> bool {
        let (a, b) = (remaining_a > 0, remaining_b > 0);
        match self {
            EventKind::A => a,
            EventKind::B => b,
            EventKind::Both => a || b,
            EventKind::Either => a && b,
        }
    }
}

/// Number of crossings to wait for on each signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventTargets {
    /// Crossings of signal A
    pub a: u32,
    /// Crossings of signal B
    pub b: u32,
}

impl EventTargets {
    /// Targets for both signals.
    pub fn new(a: u32, b: u32) -> Self {
        Self { a, b }
    }
}

/// Immutable knobs of one detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// Absolute and relative integration tolerance, also the acceptance
    /// bound |g| ≤ tolerance for a refined crossing
    pub tolerance: f64,
    /// Step length of the trial step that seeds the scan
    pub seed_step: f64,
    /// Cap on counting-loop steps per call
    pub max_steps: u64,
    /// Cap on bisections per call
    pub max_refinements: usize,
    /// Signal choice when a composite event ends
    pub tie_break: TieBreak,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            seed_step: 0.1,
            max_steps: 1_000_000,
            max_refinements: 200,
            tie_break: TieBreak::PreferA,
        }
    }
}

impl DetectorSettings {
    /// Reject settings that would disable error control or the caps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::InvalidTolerance(self.tolerance));
        }
        if !(self.seed_step.is_finite() && self.seed_step > 0.0) {
            return Err(ConfigError::InvalidSetting(format!(
                "seed_step must be positive and finite, got {}",
                self.seed_step
            )));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::InvalidSetting(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.max_refinements == 0 {
            return Err(ConfigError::InvalidSetting(
                "max_refinements must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A state snapshot with its time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<const N: usize> {
    /// State vector
    pub y: [f64; N],
    /// Time
    pub t: f64,
}

/// Two consecutive samples straddling the final counted crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket<const N: usize> {
    /// Sample before the last step
    pub prev: Sample<N>,
    /// Sample after the last step
    pub curr: Sample<N>,
    /// Length of the last step
    pub h: f64,
    /// Steps taken by the counting loop
    pub steps: u64,
}

/// Where the requested event happened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventOutcome<const N: usize> {
    /// State at the event
    pub y: [f64; N],
    /// Time of the event
    pub t: f64,
    /// Signal the event was refined against; `None` when no step was taken
    pub signal: Option<SignalId>,
    /// Signal value at the event
    pub g_value: f64,
    /// Steps taken by the counting loop
    pub steps: u64,
    /// Bisections spent on refinement
    pub refinements: usize,
}

impl<const N: usize> EventOutcome<N> {
    fn unchanged(start: Sample<N>) -> Self {
        Self {
            y: start.y,
            t: start.t,
            signal: None,
            g_value: 0.0,
            steps: 0,
            refinements: 0,
        }
    }
}

/// Event detector over a dynamical model and two event signals
///
/// Holds no mutable state: every call builds its own integrator and
/// counters, so identical calls give bit-identical results and one detector
/// can be shared across threads.
#[derive(Debug, Clone)]
pub struct EventDetector<S, A, B> {
    system: S,
    signal_a: A,
    signal_b: B,
    settings: DetectorSettings,
}

impl<S, A, B> EventDetector<S, A, B> {
    /// Create a detector from a model, two signals and its settings.
    pub fn new(system: S, signal_a: A, signal_b: B, settings: DetectorSettings) -> Self {
        Self {
            system,
            signal_a,
            signal_b,
            settings,
        }
    }

    /// Settings this detector was built with
    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// The dynamical model
    pub fn system(&self) -> &S {
        &self.system
    }

    /// Integrate from `(y0, t0)` until the composite event `kind` with the
    /// given crossing `targets` has happened, and locate it precisely.
    ///
    /// If the targets already satisfy the stopping rule, nothing is
    /// integrated and `(y0, t0)` is returned unchanged.
    ///
    /// # Errors
    /// * `IntegrationError::InvalidInput` - the settings fail
    ///   [`DetectorSettings::validate`]; checked before anything else
    /// * any other [`IntegrationError`]: non-finite model output, step-size
    ///   collapse, the `max_steps` cap, or refinement that does not converge
    pub fn find_event<const N: usize>(
        &self,
        y0: &[f64; N],
        t0: f64,
        kind: EventKind,
        targets: EventTargets,
    ) -> Result<EventOutcome<N>, IntegrationError>
    where
        S: OdeSystem<N>,
        A: EventSignal<N>,
        B: EventSignal<N>,
    {
        self.settings
            .validate()
            .map_err(|err| IntegrationError::InvalidInput {
                message: err.to_string(),
            })?;

        let start = Sample { y: *y0, t: t0 };
        if !kind.should_continue(targets.a, targets.b) {
            return Ok(EventOutcome::unchanged(start));
        }

        let mut solver = Dopri5::new(Tolerances::uniform(self.settings.tolerance));

        // Trial step only sizes the scan; its state is thrown away
        let h = solver
            .try_step(&self.system, t0, y0, self.settings.seed_step)?
            .h_next;

        let bracket = self.scan(&mut solver, start, h, kind, targets)?;
        let signal = self.resolve(kind, &bracket);
        self.refine(&mut solver, &bracket, signal)
    }

    /// Counting loop. Must only be entered when `kind` wants at least one
    /// step for `targets`.
    fn scan<const N: usize>(
        &self,
        solver: &mut Dopri5<N>,
        start: Sample<N>,
        mut h: f64,
        kind: EventKind,
        targets: EventTargets,
    ) -> Result<Bracket<N>, IntegrationError>
    where
        S: OdeSystem<N>,
        A: EventSignal<N>,
        B: EventSignal<N>,
    {
        let mut remaining_a = targets.a;
        let mut remaining_b = targets.b;

        let mut prev = start;
        let mut curr = start;
        let mut h_taken = 0.0;
        let mut steps = 0u64;

        let mut g_a = self.signal_a.eval(curr.t, &curr.y);
        let mut g_b = self.signal_b.eval(curr.t, &curr.y);

        while kind.should_continue(remaining_a, remaining_b) {
            if steps >= self.settings.max_steps {
                return Err(IntegrationError::MaxStepsExceeded { steps });
            }

            prev = curr;
            let step = solver.try_step(&self.system, prev.t, &prev.y, h)?;
            curr = Sample {
                y: step.y,
                t: step.t,
            };
            h_taken = step.h_taken;
            h = step.h_next;
            steps += 1;

            let g_a_new = self.signal_a.eval(curr.t, &curr.y);
            let g_b_new = self.signal_b.eval(curr.t, &curr.y);

            if remaining_a > 0 && crossing_detected(g_a, g_a_new) {
                remaining_a -= 1;
            }
            if remaining_b > 0 && crossing_detected(g_b, g_b_new) {
                remaining_b -= 1;
            }

            g_a = g_a_new;
            g_b = g_b_new;
        }

        Ok(Bracket {
            prev,
            curr,
            h: h_taken,
            steps,
        })
    }

    fn resolve<const N: usize>(&self, kind: EventKind, bracket: &Bracket<N>) -> SignalId
    where
        A: EventSignal<N>,
        B: EventSignal<N>,
    {
        match kind {
            EventKind::A => SignalId::A,
            EventKind::B => SignalId::B,
            EventKind::Both | EventKind::Either => {
                let a_crosses = crossing_detected(
                    self.eval(SignalId::A, &bracket.prev),
                    self.eval(SignalId::A, &bracket.curr),
                );
                let b_crosses = crossing_detected(
                    self.eval(SignalId::B, &bracket.prev),
                    self.eval(SignalId::B, &bracket.curr),
                );
                self.settings.tie_break.resolve(a_crosses, b_crosses)
            }
        }
    }

    fn refine<const N: usize>(
        &self,
        solver: &mut Dopri5<N>,
        bracket: &Bracket<N>,
        signal: SignalId,
    ) -> Result<EventOutcome<N>, IntegrationError>
    where
        S: OdeSystem<N>,
        A: EventSignal<N>,
        B: EventSignal<N>,
    {
        let tol = self.settings.tolerance;

        let g_curr = self.eval(signal, &bracket.curr);
        if g_curr.abs() <= tol {
            return Ok(EventOutcome {
                y: bracket.curr.y,
                t: bracket.curr.t,
                signal: Some(signal),
                g_value: g_curr,
                steps: bracket.steps,
                refinements: 0,
            });
        }

        let prev = bracket.prev;
        let g_prev = self.eval(signal, &prev);
        let refined = Bisection::new(tol, self.settings.max_refinements).refine(
            g_prev,
            bracket.h,
            |s| {
                let (y, t) = solver.fixed_step(&self.system, prev.t, &prev.y, s)?;
                let sample = Sample { y, t };
                Ok((sample, self.eval(signal, &sample)))
            },
        )?;

        Ok(EventOutcome {
            y: refined.value.y,
            t: refined.value.t,
            signal: Some(signal),
            g_value: refined.g_value,
            steps: bracket.steps,
            refinements: refined.iterations,
        })
    }

    fn eval<const N: usize>(&self, signal: SignalId, sample: &Sample<N>) -> f64
    where
        A: EventSignal<N>,
        B: EventSignal<N>,
    {
        match signal {
            SignalId::A => self.signal_a.eval(sample.t, &sample.y),
            SignalId::B => self.signal_b.eval(sample.t, &sample.y),
        }
    }
}
