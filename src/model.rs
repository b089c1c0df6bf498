//! Planar mass-spring models and axis event signals
//!
//! All models share the state layout `[x, y, vx, vy]`. The anchored laws
//! pull a unit of mass towards two anchors on the x-axis; they differ only in
//! how the pull scales with the distance `d_i` to anchor `i`.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::events::EventSignal;
use crate::solver::OdeSystem;

/// Force law selecting the coupling `c_i(d_i)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawKind {
    /// Isotropic oscillator `a = -ω² (x, y)`, anchors unused
    Harmonic,
    /// `c_i = sign(d_i - L_i) |d_i - L_i|^degree`
    #[default]
    DegreeForce,
    /// Hooke springs, `c_i = 1 - L_i / d_i`
    Springs,
    /// Unit pull towards each anchor, `c_i = 1 / d_i`
    ConstantForce,
}

/// A mass on two springs anchored at `(anchors[i], 0)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForceModel {
    /// Which coupling to use
    pub law: LawKind,
    /// Mass of the body
    pub mass: f64,
    /// Spring constants `k1`, `k2`
    pub stiffness: [f64; 2],
    /// Natural lengths `L1`, `L2`
    pub natural_length: [f64; 2],
    /// Anchor positions `p1`, `p2` on the x-axis
    pub anchors: [f64; 2],
    /// Exponent of [`LawKind::DegreeForce`]
    pub degree: f64,
    /// Angular frequency of [`LawKind::Harmonic`]
    pub omega: f64,
}

impl Default for ForceModel {
    fn default() -> Self {
        Self {
            law: LawKind::DegreeForce,
            mass: 1.0,
            stiffness: [1.0, 1.0],
            natural_length: [2.0, 2.0],
            anchors: [-2.0, 2.0],
            degree: 0.0,
            omega: 1.0,
        }
    }
}

impl ForceModel {
    /// Isotropic harmonic oscillator with angular frequency `omega`.
    pub fn harmonic(omega: f64) -> Self {
        Self {
            law: LawKind::Harmonic,
            omega,
            ..Default::default()
        }
    }

    /// Default anchors and springs with the given law.
    pub fn with_law(law: LawKind) -> Self {
        Self {
            law,
            ..Default::default()
        }
    }

    /// Reject parameters that make every evaluation meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(ConfigError::InvalidModel(format!(
                "mass must be positive and finite, got {}",
                self.mass
            )));
        }
        let finite = self
            .stiffness
            .iter()
            .chain(&self.natural_length)
            .chain(&self.anchors)
            .chain([&self.degree, &self.omega])
            .all(|v| v.is_finite());
        if !finite {
            return Err(ConfigError::InvalidModel(
                "model parameters must be finite".to_string(),
            ));
        }
        Ok(())
    }

    fn coupling(&self, i: usize, x: f64, y: f64) -> f64 {
        let dx = self.anchors[i] - x;
        let d = (dx * dx + y * y).sqrt();
        match self.law {
            LawKind::DegreeForce => {
                let stretch = d - self.natural_length[i];
                sign(stretch) * stretch.abs().powf(self.degree)
            }
            LawKind::Springs => 1.0 - self.natural_length[i] / d,
            LawKind::ConstantForce => 1.0 / d,
            LawKind::Harmonic => 0.0,
        }
    }
}

impl OdeSystem<4> for ForceModel {
    fn rhs(&self, _t: f64, s: &[f64; 4], dsdt: &mut [f64; 4]) {
        let (x, y) = (s[0], s[1]);
        dsdt[0] = s[2];
        dsdt[1] = s[3];

        if self.law == LawKind::Harmonic {
            let w2 = self.omega * self.omega;
            dsdt[2] = -w2 * x;
            dsdt[3] = -w2 * y;
            return;
        }

        let [k1, k2] = self.stiffness;
        let [p1, p2] = self.anchors;
        let c1 = self.coupling(0, x, y);
        let c2 = self.coupling(1, x, y);

        dsdt[2] = (k1 * c1 * (p1 - x) + k2 * c2 * (p2 - x)) / self.mass;
        dsdt[3] = -(k1 * c1 + k2 * c2) * y / self.mass;
    }
}

/// Sign with `sign(0) = 0`
fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Event signal equal to one state coordinate
///
/// `Axis::Y` vanishes on the x-axis, so its crossings are x-axis crossings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Position x
    X,
    /// Position y
    Y,
    /// Velocity x
    Vx,
    /// Velocity y
    Vy,
}

impl Axis {
    /// Index of the coordinate in `[x, y, vx, vy]`
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Vx => 2,
            Axis::Vy => 3,
        }
    }
}

impl EventSignal<4> for Axis {
    fn eval(&self, _t: f64, y: &[f64; 4]) -> f64 {
        y[self.index()]
    }
}
