//! Dormand–Prince 5(4) Integrator
//!
//! A 7-stage embedded RK5(4) pair with adaptive step-size control. This is
//! the stepping primitive under event detection: the detector only ever sees
//! the `(state, time)` pairs returned by [`Dopri5::try_step`] and
//! [`Dopri5::fixed_step`], never the stage workspace.
//!
//! Reference: Dormand & Prince (1980), J. Comput. Appl. Math. 6(1).

use thiserror::Error;

use crate::coefficients::{A, B, B_ERR, C, EMBEDDED_ORDER, STAGES};

/// System of ordinary differential equations: dy/dt = f(t, y)
pub trait OdeSystem<const N: usize> {
    /// Evaluate the right-hand side of the ODE system
    ///
    /// # Arguments
    /// * `t` - Current time
    /// * `y` - Current state vector
    /// * `dydt` - Output: derivative dy/dt
    fn rhs(&self, t: f64, y: &[f64; N], dydt: &mut [f64; N]);
}

impl<const N: usize, S: OdeSystem<N> + ?Sized> OdeSystem<N> for &S {
    fn rhs(&self, t: f64, y: &[f64; N], dydt: &mut [f64; N]) {
        (**self).rhs(t, y, dydt)
    }
}

/// Integration result from a single trial step
#[derive(Debug, Clone)]
pub struct StepResult<const N: usize> {
    /// New state after the step (5th order solution)
    pub y: [f64; N],
    /// New time value
    pub t: f64,
    /// Step size actually used, after clamping to the step limits
    pub h: f64,
    /// Normalized error estimate (should be ≤ 1.0 for acceptance)
    pub error: f64,
    /// Suggested magnitude for the next step
    pub h_next: f64,
    /// Whether the step was accepted
    pub accepted: bool,
}

/// An accepted adaptive step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveStep<const N: usize> {
    /// State at the end of the step
    pub y: [f64; N],
    /// Time at the end of the step
    pub t: f64,
    /// Signed step length that was accepted
    pub h_taken: f64,
    /// Signed step length the controller suggests next
    pub h_next: f64,
}

/// Integration statistics for diagnostics
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Total number of function evaluations
    pub fn_evals: u64,
    /// Number of accepted steps
    pub accepted_steps: u64,
    /// Number of rejected steps
    pub rejected_steps: u64,
}

/// Step-size controller using an I-controller
///
/// h_new = safety * h * error^(-1/(q+1)), q = 4 for the embedded solution
#[derive(Debug, Clone)]
pub struct StepController {
    /// Safety factor (0.8-0.9 typical)
    pub safety: f64,
    /// Maximum growth factor per step
    pub max_factor: f64,
    /// Minimum reduction factor per step
    pub min_factor: f64,
    exponent: f64,
}

impl Default for StepController {
    fn default() -> Self {
        Self {
            safety: 0.9,
            max_factor: 5.0,
            min_factor: 0.2,
            exponent: 1.0 / (EMBEDDED_ORDER as f64 + 1.0),
        }
    }
}

impl StepController {
    /// Compute the step size adjustment factor
    pub fn compute_factor(&self, error: f64) -> f64 {
        if error == 0.0 {
            return self.max_factor;
        }
        if !error.is_finite() {
            return self.min_factor;
        }

        let factor = self.safety * error.powf(-self.exponent);
        factor.clamp(self.min_factor, self.max_factor)
    }
}

/// Tolerance specification for error control
///
/// Error is computed as: |y5 - y4| / (atol + rtol * |y5|)
#[derive(Debug, Clone)]
pub struct Tolerances<const N: usize> {
    /// Absolute tolerance per component
    pub atol: [f64; N],
    /// Relative tolerance per component
    pub rtol: [f64; N],
}

impl<const N: usize> Tolerances<N> {
    /// Create tolerances with uniform values
    pub fn new(atol: f64, rtol: f64) -> Self {
        Self {
            atol: [atol; N],
            rtol: [rtol; N],
        }
    }

    /// Same bound for absolute and relative error, as the explorer uses it.
    pub fn uniform(tol: f64) -> Self {
        Self::new(tol, tol)
    }
}

/// Dormand–Prince 5(4) integrator
///
/// # Example
/// ```
/// use ode_explorer::{Dopri5, OdeSystem, Tolerances};
///
/// struct Decay;
///
/// impl OdeSystem<1> for Decay {
///     fn rhs(&self, _t: f64, y: &[f64; 1], dydt: &mut [f64; 1]) {
///         dydt[0] = -y[0];
///     }
/// }
///
/// let mut solver = Dopri5::new(Tolerances::uniform(1e-10));
/// let step = solver.try_step(&Decay, 0.0, &[1.0], 0.1).unwrap();
/// assert!(step.t > 0.0 && step.y[0] < 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct Dopri5<const N: usize> {
    tol: Tolerances<N>,
    controller: StepController,
    /// Minimum step size
    pub h_min: f64,
    /// Maximum step size
    pub h_max: f64,
    /// Maximum consecutive rejections inside one [`Dopri5::try_step`]
    pub max_rejections: u32,
    k: [[f64; N]; STAGES],
    /// Integration statistics
    pub stats: Stats,
}

impl<const N: usize> Dopri5<N> {
    /// Create a new solver with specified tolerances
    pub fn new(tol: Tolerances<N>) -> Self {
        Self {
            tol,
            controller: StepController::default(),
            h_min: 1e-14,
            h_max: f64::INFINITY,
            max_rejections: 200,
            k: [[0.0; N]; STAGES],
            stats: Stats::default(),
        }
    }

    /// Perform a single trial step
    ///
    /// Computes the 7 stages, forms the 5th order solution, estimates the
    /// error against the embedded 4th order solution and decides acceptance.
    pub fn step<S: OdeSystem<N>>(
        &mut self,
        sys: &S,
        t: f64,
        y: &[f64; N],
        h: f64,
    ) -> StepResult<N> {
        let h = h.signum() * h.abs().clamp(self.h_min, self.h_max);

        self.compute_stages(sys, t, y, h);
        let y5 = self.compute_solution(y, h);
        let error = self.compute_error(&y5, h);

        // NaN compares false, so a poisoned step is never accepted
        let accepted = error <= 1.0;

        let factor = self.controller.compute_factor(error);
        let h_next = (h.abs() * factor).clamp(self.h_min, self.h_max);

        self.stats.fn_evals += STAGES as u64;
        if accepted {
            self.stats.accepted_steps += 1;
        } else {
            self.stats.rejected_steps += 1;
        }

        StepResult {
            y: y5,
            t: t + h,
            h,
            error,
            h_next,
            accepted,
        }
    }

    /// Advance by approximately `h`, shrinking the step until the local
    /// error is within tolerance.
    ///
    /// # Returns
    /// * `Ok(AdaptiveStep)` - the accepted state, its time, the step taken
    ///   and the suggested next step (same sign as `h`)
    /// * `Err(IntegrationError::NonFiniteState)` - the right-hand side is
    ///   not finite at `(t, y)`
    /// * `Err(IntegrationError::StepSizeTooSmall)` - no acceptable step at
    ///   or above `h_min`
    pub fn try_step<S: OdeSystem<N>>(
        &mut self,
        sys: &S,
        t: f64,
        y: &[f64; N],
        h: f64,
    ) -> Result<AdaptiveStep<N>, IntegrationError> {
        let direction = if h < 0.0 { -1.0 } else { 1.0 };
        let mut h = h;

        for _ in 0..=self.max_rejections {
            let result = self.step(sys, t, y, h);

            // Stage 0 is f(t, y): if that is not finite no smaller step helps
            if !self.k[0].iter().all(|v| v.is_finite()) {
                return Err(IntegrationError::NonFiniteState { t });
            }

            if result.accepted && result.y.iter().all(|v| v.is_finite()) {
                return Ok(AdaptiveStep {
                    y: result.y,
                    t: result.t,
                    h_taken: result.h,
                    h_next: direction * result.h_next,
                });
            }

            if result.h.abs() <= self.h_min {
                return Err(IntegrationError::StepSizeTooSmall {
                    t,
                    h: result.h_next,
                });
            }
            h = direction * result.h_next;
        }

        Err(IntegrationError::StepSizeTooSmall { t, h })
    }

    /// One non-adaptive step of exactly `h` (no clamping, no error control).
    pub fn fixed_step<S: OdeSystem<N>>(
        &mut self,
        sys: &S,
        t: f64,
        y: &[f64; N],
        h: f64,
    ) -> Result<([f64; N], f64), IntegrationError> {
        self.compute_stages(sys, t, y, h);
        self.stats.fn_evals += STAGES as u64;

        let y_new = self.compute_solution(y, h);
        if !y_new.iter().all(|v| v.is_finite()) {
            return Err(IntegrationError::NonFiniteState { t: t + h });
        }
        Ok((y_new, t + h))
    }

    #[allow(clippy::needless_range_loop)]
    fn compute_stages<S: OdeSystem<N>>(&mut self, sys: &S, t: f64, y: &[f64; N], h: f64) {
        let mut y_temp = [0.0; N];

        sys.rhs(t, y, &mut self.k[0]);

        for i in 1..STAGES {
            for n in 0..N {
                let mut sum = 0.0;
                for j in 0..i {
                    sum += A[i][j] * self.k[j][n];
                }
                y_temp[n] = y[n] + h * sum;
            }

            sys.rhs(t + C[i] * h, &y_temp, &mut self.k[i]);
        }
    }

    #[allow(clippy::needless_range_loop)]
    fn compute_solution(&self, y: &[f64; N], h: f64) -> [f64; N] {
        let mut y_new = [0.0; N];

        for n in 0..N {
            let mut sum = 0.0;
            for i in 0..STAGES {
                sum += B[i] * self.k[i][n];
            }
            y_new[n] = y[n] + h * sum;
        }

        y_new
    }

    /// Infinity norm of the scaled error estimate
    #[allow(clippy::needless_range_loop)]
    fn compute_error(&self, y5: &[f64; N], h: f64) -> f64 {
        let mut max_err: f64 = 0.0;

        for n in 0..N {
            let mut err_n = 0.0;
            for i in 0..STAGES {
                err_n += B_ERR[i] * self.k[i][n];
            }
            err_n *= h;

            let scale = self.tol.atol[n] + self.tol.rtol[n] * y5[n].abs();
            let scaled_err = err_n.abs() / scale;

            // f64::max drops NaN, which would hide a poisoned stage
            if scaled_err.is_nan() {
                return f64::NAN;
            }
            max_err = max_err.max(scaled_err);
        }

        max_err
    }
}

/// Numeric failures while integrating or refining a single trajectory
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    /// Step size became too small
    #[error("step size {h} too small at t = {t}")]
    StepSizeTooSmall {
        /// Time at which step size became too small
        t: f64,
        /// Step size that was too small
        h: f64,
    },
    /// Maximum number of integration steps exceeded
    #[error("maximum number of integration steps ({steps}) exceeded")]
    MaxStepsExceeded {
        /// The step cap that was hit
        steps: u64,
    },
    /// Bisection hit its iteration cap or a floating-point plateau
    #[error("event refinement did not converge after {iterations} bisections (|g| = {residual:e})")]
    RefinementNonConvergence {
        /// Bisections performed
        iterations: usize,
        /// Event signal magnitude at the last candidate
        residual: f64,
    },
    /// Invalid input parameters
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the invalid input
        message: String,
    },
    /// Non-finite state or derivative detected during integration
    #[error("non-finite state detected at t = {t}")]
    NonFiniteState {
        /// Time at which non-finite state was detected
        t: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Harmonic oscillator: y'' + ω²y = 0
    struct HarmonicOscillator {
        omega: f64,
    }

    impl OdeSystem<2> for HarmonicOscillator {
        fn rhs(&self, _t: f64, y: &[f64; 2], dydt: &mut [f64; 2]) {
            dydt[0] = y[1];
            dydt[1] = -self.omega * self.omega * y[0];
        }
    }

    struct Singular;

    impl OdeSystem<1> for Singular {
        fn rhs(&self, _t: f64, y: &[f64; 1], dydt: &mut [f64; 1]) {
            dydt[0] = 1.0 / y[0];
        }
    }

    /// Chain adaptive steps up to `tf`, cutting the last one short
    fn propagate<const N: usize, S: OdeSystem<N>>(
        solver: &mut Dopri5<N>,
        sys: &S,
        y0: &[f64; N],
        tf: f64,
        h0: f64,
    ) -> (f64, [f64; N]) {
        let (mut t, mut y, mut h) = (0.0, *y0, h0);
        while tf - t > 1e-14 {
            let step = solver.try_step(sys, t, &y, h.min(tf - t)).unwrap();
            t = step.t;
            y = step.y;
            h = step.h_next;
        }
        (t, y)
    }

    #[test]
    fn test_harmonic_oscillator_period() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let tf = 2.0 * std::f64::consts::PI;

        let mut solver = Dopri5::new(Tolerances::uniform(1e-12));
        let (t_final, y_final) = propagate(&mut solver, &sys, &[1.0, 0.0], tf, 0.1);

        assert_abs_diff_eq!(t_final, tf, epsilon = 1e-10);
        assert_abs_diff_eq!(y_final[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(y_final[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_exponential_decay() {
        struct ExpDecay;
        impl OdeSystem<1> for ExpDecay {
            fn rhs(&self, _t: f64, y: &[f64; 1], dydt: &mut [f64; 1]) {
                dydt[0] = -y[0];
            }
        }

        let mut solver = Dopri5::new(Tolerances::uniform(1e-12));
        let (_, y_final) = propagate(&mut solver, &ExpDecay, &[1.0], 5.0, 0.1);
        let exact = (-5.0f64).exp();

        let rel_error = (y_final[0] - exact).abs() / exact;
        assert!(rel_error < 1e-9, "Relative error {} too large", rel_error);
    }

    #[test]
    fn test_try_step_shrinks_oversized_step() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = Dopri5::new(Tolerances::uniform(1e-10));

        let step = solver.try_step(&sys, 0.0, &[1.0, 0.0], 10.0).unwrap();

        assert!(step.h_taken < 10.0, "step should have been shortened");
        assert_abs_diff_eq!(step.t, step.h_taken, epsilon = 1e-15);
        assert_abs_diff_eq!(step.y[0], step.t.cos(), epsilon = 1e-8);
        assert!(solver.stats.rejected_steps > 0);
    }

    #[test]
    fn test_try_step_grows_small_step() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = Dopri5::new(Tolerances::uniform(1e-6));

        let step = solver.try_step(&sys, 0.0, &[1.0, 0.0], 1e-4).unwrap();

        assert_eq!(step.h_taken, 1e-4);
        assert!(step.h_next > step.h_taken);
    }

    #[test]
    fn test_try_step_backward_keeps_direction() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = Dopri5::new(Tolerances::uniform(1e-10));

        let step = solver.try_step(&sys, 0.0, &[1.0, 0.0], -0.1).unwrap();

        assert!(step.t < 0.0);
        assert!(step.h_next < 0.0);
    }

    #[test]
    fn test_fixed_step_exact_for_polynomial() {
        // y' = 3t², exact y = t³: a 5th order method integrates it exactly
        struct Cubic;
        impl OdeSystem<1> for Cubic {
            fn rhs(&self, t: f64, _y: &[f64; 1], dydt: &mut [f64; 1]) {
                dydt[0] = 3.0 * t * t;
            }
        }

        let mut solver = Dopri5::new(Tolerances::uniform(1e-10));
        let (y, t) = solver.fixed_step(&Cubic, 1.0, &[1.0], 0.5).unwrap();

        assert_eq!(t, 1.5);
        assert_abs_diff_eq!(y[0], 1.5f64.powi(3), epsilon = 1e-13);
    }

    #[test]
    fn test_fixed_step_zero_length_is_identity() {
        let sys = HarmonicOscillator { omega: 2.0 };
        let mut solver = Dopri5::new(Tolerances::uniform(1e-10));

        let (y, t) = solver.fixed_step(&sys, 3.0, &[0.25, -1.0], 0.0).unwrap();

        assert_eq!(y, [0.25, -1.0]);
        assert_eq!(t, 3.0);
    }

    #[test]
    fn test_singular_rhs_is_non_finite() {
        let mut solver = Dopri5::new(Tolerances::uniform(1e-10));
        let result = solver.try_step(&Singular, 0.0, &[0.0], 0.1);
        assert!(
            matches!(result, Err(IntegrationError::NonFiniteState { .. })),
            "Expected NonFiniteState, got {:?}",
            result
        );

        let result = solver.fixed_step(&Singular, 0.0, &[0.0], 0.1);
        assert!(matches!(
            result,
            Err(IntegrationError::NonFiniteState { .. })
        ));
    }

    #[test]
    fn test_step_size_too_small_error() {
        struct SingularODE;
        impl OdeSystem<1> for SingularODE {
            fn rhs(&self, _t: f64, y: &[f64; 1], dydt: &mut [f64; 1]) {
                dydt[0] = -1.0 / (y[0] * y[0] + 1e-30);
            }
        }

        let mut solver = Dopri5::new(Tolerances::uniform(1e-12));
        solver.h_min = 1e-4;

        let result = solver.try_step(&SingularODE, 0.0, &[0.001], 0.0001);
        assert!(
            matches!(result, Err(IntegrationError::StepSizeTooSmall { .. })),
            "Expected StepSizeTooSmall, got {:?}",
            result
        );
    }

    #[test]
    fn test_stats_count_stage_evaluations() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = Dopri5::new(Tolerances::uniform(1e-10));

        solver.try_step(&sys, 0.0, &[1.0, 0.0], 1e-3).unwrap();
        solver.fixed_step(&sys, 0.0, &[1.0, 0.0], 1e-3).unwrap();

        assert_eq!(solver.stats.accepted_steps, 1);
        assert_eq!(solver.stats.rejected_steps, 0);
        assert_eq!(solver.stats.fn_evals, 2 * STAGES as u64);
    }

    #[test]
    fn test_tolerance_sensitivity() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let tf = 10.0 * 2.0 * std::f64::consts::PI;

        let error_at = |tol: f64| {
            let mut solver = Dopri5::new(Tolerances::uniform(tol));
            let (_, y) = propagate(&mut solver, &sys, &[1.0, 0.0], tf, 0.1);
            (y[0] - tf.cos()).abs()
        };

        let loose = error_at(1e-6);
        let tight = error_at(1e-10);
        assert!(
            tight < loose,
            "tight tolerance error {:.3e} should beat loose {:.3e}",
            tight,
            loose
        );
    }

    #[test]
    fn test_step_controller_zero_error() {
        let ctrl = StepController::default();
        assert_eq!(ctrl.compute_factor(0.0), ctrl.max_factor);
    }

    #[test]
    fn test_step_controller_unit_error() {
        let ctrl = StepController::default();
        assert_abs_diff_eq!(ctrl.compute_factor(1.0), ctrl.safety, epsilon = 1e-15);
    }

    #[test]
    fn test_step_controller_clamps() {
        let ctrl = StepController::default();
        assert_eq!(ctrl.compute_factor(1e-20), ctrl.max_factor);
        assert_eq!(ctrl.compute_factor(1e20), ctrl.min_factor);
        assert_eq!(ctrl.compute_factor(f64::NAN), ctrl.min_factor);
    }
}
