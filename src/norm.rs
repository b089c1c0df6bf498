//! Event norm: how far a trajectory has moved, in state space, by the time
//! its event happens.

use serde::{Deserialize, Serialize};

use crate::detector::{EventDetector, EventKind, EventTargets};
use crate::events::EventSignal;
use crate::solver::{IntegrationError, OdeSystem};

/// How the two crossing counts turn into one norm value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    /// Distance at the A-th crossing of signal A
    #[default]
    A,
    /// Distance at the B-th crossing of signal B
    B,
    /// Mean of the "both counts met" and "either count met" distances
    Combined,
}

/// Maps an initial state to its squared distance from the event state
#[derive(Debug, Clone)]
pub struct NormEvaluator<S, A, B> {
    detector: EventDetector<S, A, B>,
    mode: CompositeMode,
    targets: EventTargets,
}

impl<S, A, B> NormEvaluator<S, A, B> {
    /// Evaluate `mode` with the given crossing targets.
    pub fn new(detector: EventDetector<S, A, B>, mode: CompositeMode, targets: EventTargets) -> Self {
        Self {
            detector,
            mode,
            targets,
        }
    }

    /// The detector doing the integration
    pub fn detector(&self) -> &EventDetector<S, A, B> {
        &self.detector
    }

    /// Composite mode
    pub fn mode(&self) -> CompositeMode {
        self.mode
    }

    /// Crossing targets
    pub fn targets(&self) -> EventTargets {
        self.targets
    }

    /// Squared Euclidean distance between `y0` and the event state.
    ///
    /// Every detector run starts from a fresh copy of `y0` at `t = 0`.
    pub fn norm<const N: usize>(&self, y0: &[f64; N]) -> Result<f64, IntegrationError>
    where
        S: OdeSystem<N>,
        A: EventSignal<N>,
        B: EventSignal<N>,
    {
        let EventTargets { a, b } = self.targets;
        match self.mode {
            CompositeMode::A => self.distance(y0, EventKind::A, EventTargets::new(a, 0)),
            CompositeMode::B => self.distance(y0, EventKind::B, EventTargets::new(0, b)),
            CompositeMode::Combined => {
                let both = self.distance(y0, EventKind::Both, self.targets)?;
                let either = self.distance(y0, EventKind::Either, self.targets)?;
                Ok((both + either) / 2.0)
            }
        }
    }

    fn distance<const N: usize>(
        &self,
        y0: &[f64; N],
        kind: EventKind,
        targets: EventTargets,
    ) -> Result<f64, IntegrationError>
    where
        S: OdeSystem<N>,
        A: EventSignal<N>,
        B: EventSignal<N>,
    {
        let outcome = self.detector.find_event(y0, 0.0, kind, targets)?;
        Ok(squared_distance(y0, &outcome.y))
    }
}

/// Sum of squared component differences
pub fn squared_distance<const N: usize>(a: &[f64; N], b: &[f64; N]) -> f64 {
    a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorSettings;
    use crate::model::{Axis, ForceModel};
    use approx::assert_abs_diff_eq;

    fn evaluator(
        mode: CompositeMode,
        targets: EventTargets,
    ) -> NormEvaluator<ForceModel, Axis, Axis> {
        let detector = EventDetector::new(
            ForceModel::harmonic(1.0),
            Axis::Y,
            Axis::X,
            DetectorSettings::default(),
        );
        NormEvaluator::new(detector, mode, targets)
    }

    #[test]
    fn test_zero_count_norm_is_zero() {
        let eval = evaluator(CompositeMode::A, EventTargets::new(0, 7));
        for y0 in [[0.0, 0.0, 1.0, 1.0], [0.4, -1.2, 3.0, -0.5]] {
            assert_eq!(eval.norm(&y0).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_harmonic_half_period_norm() {
        // Half a period later the velocity is reversed: |Δv|² = 4|v|²
        let eval = evaluator(CompositeMode::A, EventTargets::new(1, 0));
        let norm = eval.norm(&[0.0, 0.0, 0.5, 1.5]).unwrap();
        assert_abs_diff_eq!(norm, 4.0 * (0.25 + 2.25), epsilon = 1e-6);
    }

    #[test]
    fn test_b_mode_uses_signal_b() {
        let eval = evaluator(CompositeMode::B, EventTargets::new(5, 2));
        // x = sin t: second crossing after a full period, back at the start
        let norm = eval.norm(&[0.0, 0.0, 1.0, 2.0]).unwrap();
        assert_abs_diff_eq!(norm, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_combined_is_mean_of_both_and_either() {
        let targets = EventTargets::new(2, 1);
        let eval = evaluator(CompositeMode::Combined, targets);
        let y0 = [0.5, 0.0, 0.0, 1.0];

        let detector = eval.detector();
        let both = detector.find_event(&y0, 0.0, EventKind::Both, targets).unwrap();
        let either = detector.find_event(&y0, 0.0, EventKind::Either, targets).unwrap();
        let expected = (squared_distance(&y0, &both.y) + squared_distance(&y0, &either.y)) / 2.0;

        assert_eq!(eval.norm(&y0).unwrap(), expected);
        assert!(expected > 0.0);
    }

    #[test]
    fn test_squared_distance() {
        assert_eq!(squared_distance(&[1.0, 2.0], &[4.0, -2.0]), 25.0);
        assert_eq!(squared_distance(&[3.0; 4], &[3.0; 4]), 0.0);
    }

    #[test]
    fn test_mode_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: CompositeMode,
        }
        let parsed: Wrapper = toml::from_str("mode = \"combined\"").unwrap();
        assert_eq!(parsed.mode, CompositeMode::Combined);
        let parsed: Wrapper = toml::from_str("mode = \"b\"").unwrap();
        assert_eq!(parsed.mode, CompositeMode::B);
    }
}
