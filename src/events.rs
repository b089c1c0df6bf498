//! Event signals, crossing detection and bracketed refinement
//!
//! An event signal `g(t, y)` is monitored along a trajectory. A crossing is
//! a sign change of `g` between two consecutive samples; once the detector
//! has the bracket it narrows the crossing down by bisecting the length of a
//! single fixed integrator step taken from the left end of the bracket.

use crate::solver::IntegrationError;

/// Event signal trait
///
/// Implement this trait to define the scalar whose zero crossings count as
/// events. It must be pure and continuous along trajectories for the
/// bisection to converge.
///
/// # Example
///
/// ```
/// use ode_explorer::EventSignal;
///
/// // Crossing of the line y = x
/// struct Diagonal;
///
/// impl EventSignal<4> for Diagonal {
///     fn eval(&self, _t: f64, y: &[f64; 4]) -> f64 {
///         y[1] - y[0]
///     }
/// }
///
/// assert_eq!(Diagonal.eval(0.0, &[1.0, 1.0, 0.0, 0.0]), 0.0);
/// ```
pub trait EventSignal<const N: usize> {
    /// Evaluate the signal at time `t` and state `y`.
    fn eval(&self, t: f64, y: &[f64; N]) -> f64;
}

impl<const N: usize, E: EventSignal<N> + ?Sized> EventSignal<N> for &E {
    fn eval(&self, t: f64, y: &[f64; N]) -> f64 {
        (**self).eval(t, y)
    }
}

/// Which of the two tracked signals an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalId {
    /// Signal A
    A,
    /// Signal B
    B,
}

/// Policy choosing the signal to refine against when a composite event
/// ends on an interval that both signals may cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// A whenever A crosses in the final interval, otherwise B.
    ///
    /// A near-simultaneous B crossing in the same interval is ignored.
    #[default]
    PreferA,
    /// B whenever B crosses in the final interval, otherwise A.
    PreferB,
}

impl TieBreak {
    /// Resolve the signal given which signals cross the final interval.
    pub fn resolve(self, a_crosses: bool, b_crosses: bool) -> SignalId {
        match self {
            TieBreak::PreferA if a_crosses => SignalId::A,
            TieBreak::PreferA => SignalId::B,
            TieBreak::PreferB if b_crosses => SignalId::B,
            TieBreak::PreferB if a_crosses => SignalId::A,
            TieBreak::PreferB => SignalId::B,
        }
    }
}

/// Check whether the signal crosses zero between two samples.
///
/// Opposite signs always count. Arriving exactly at zero counts; leaving an
/// exact zero does not, so a zero sitting on a sample point is counted once
/// and a trajectory starting on the axis does not register its own start.
pub fn crossing_detected(g_old: f64, g_new: f64) -> bool {
    if g_old * g_new > 0.0 {
        return false;
    }

    if g_new == 0.0 {
        return true;
    }

    // Old value exactly at zero: already counted when it was reached
    g_old != 0.0
}

/// A refined crossing produced by [`Bisection::refine`]
#[derive(Debug, Clone)]
pub struct Refined<T> {
    /// Whatever the sampler produced at the accepted step length
    pub value: T,
    /// Signal value there, |g| ≤ tolerance
    pub g_value: f64,
    /// Accepted step length measured from the bracket start
    pub step: f64,
    /// Number of bisections performed
    pub iterations: usize,
}

/// Bisection on the length of a step taken from the start of a bracket
#[derive(Debug, Clone)]
pub struct Bisection {
    /// Accept a candidate once |g| ≤ tol
    pub tol: f64,
    /// Maximum number of halvings
    pub max_iter: usize,
}

impl Default for Bisection {
    fn default() -> Self {
        Self {
            tol: 1e-10,
            max_iter: 200,
        }
    }
}

impl Bisection {
    /// Create a bisection solver with the given acceptance tolerance.
    pub fn new(tol: f64, max_iter: usize) -> Self {
        Self { tol, max_iter }
    }

    /// Narrow down a crossing inside `[0, h]`.
    ///
    /// `sample(s)` must return the value reached after a step of length `s`
    /// from the bracket start together with the signal there; `g_start` is
    /// the signal at the bracket start. A candidate with the same sign as
    /// `g_start` moves the lower end up, anything else moves the upper end
    /// down.
    ///
    /// # Returns
    /// * `Ok(Refined)` - first candidate with |g| ≤ tol
    /// * `Err(IntegrationError::RefinementNonConvergence)` - iteration cap
    ///   reached or the interval stopped shrinking in floating point
    /// * any error returned by `sample`
    pub fn refine<T, F>(
        &self,
        g_start: f64,
        h: f64,
        mut sample: F,
    ) -> Result<Refined<T>, IntegrationError>
    where
        F: FnMut(f64) -> Result<(T, f64), IntegrationError>,
    {
        let mut lo = 0.0;
        let mut hi = h;
        let mut residual = g_start.abs();

        for iter in 0..self.max_iter {
            let mid = 0.5 * (lo + hi);
            if mid == lo || mid == hi {
                return Err(IntegrationError::RefinementNonConvergence {
                    iterations: iter,
                    residual,
                });
            }

            let (value, g) = sample(mid)?;
            if g.abs() <= self.tol {
                return Ok(Refined {
                    value,
                    g_value: g,
                    step: mid,
                    iterations: iter + 1,
                });
            }

            if g * g_start > 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
            residual = g.abs();
        }

        Err(IntegrationError::RefinementNonConvergence {
            iterations: self.max_iter,
            residual,
        })
    }
}
