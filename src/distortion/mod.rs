//! Radial lens distortion models.
//!
//! Three lensfun-compatible families are supported, all mapping a normalized
//! undistorted radius `ru` to a distorted radius `rd`:
//!
//! * [`DistortionModel::Poly3`]: `rd = ru·(1 - k1 + k1·ru²)`
//! * [`DistortionModel::Poly5`]: `rd = ru·(1 + k1·ru² + k2·ru⁴)`
//! * [`DistortionModel::PTLens`]: `rd = ru·(a·ru³ + b·ru² + c·ru + 1 - a - b - c)`
//!
//! Radii are normalized so that `1` corresponds to half of the smaller image side.
//! A model is only meaningful while it is monotonic; [`DistortionModel::max_undistorted_radius`]
//! reports where that stops being the case.

use crate::polynomial::{solve_cubic, solve_quadratic};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value returned by [`DistortionModel::max_undistorted_radius`] when the model
/// stays monotonic for every `ru >= 0`.
pub const UNBOUNDED_RADIUS: f64 = f32::MAX as f64;

/// Number of halvings used by [`DistortionModel::inverse_distortion`].
const INVERSE_BISECTION_STEPS: usize = 53;

/// The distortion family, without coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistortionKind {
    Poly3,
    Poly5,
    PTLens,
}

impl DistortionKind {
    /// Number of coefficients the family carries.
    pub fn coefficient_count(self) -> usize {
        match self {
            DistortionKind::Poly3 => 1,
            DistortionKind::Poly5 => 2,
            DistortionKind::PTLens => 3,
        }
    }

    /// The lensfun name of the model (`poly3`, `poly5`, `ptlens`).
    pub fn name(self) -> &'static str {
        match self {
            DistortionKind::Poly3 => "poly3",
            DistortionKind::Poly5 => "poly5",
            DistortionKind::PTLens => "ptlens",
        }
    }

    /// Parses a lensfun model name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "poly3" => Some(DistortionKind::Poly3),
            "poly5" => Some(DistortionKind::Poly5),
            "ptlens" => Some(DistortionKind::PTLens),
            _ => None,
        }
    }
}

impl fmt::Display for DistortionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A radial distortion model together with its coefficients.
///
/// The model is a pure function of its coefficients and carries no other state.
///
/// # Examples
///
/// ```rust
/// use lens_distortion_estimator::distortion::DistortionModel;
///
/// let model = DistortionModel::Poly3 { k1: 0.1 };
/// assert!((model.apply_distortion(1.0) - 1.0).abs() < 1e-15);
/// assert!((model.apply_distortion(0.5) - 0.4625).abs() < 1e-15);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum DistortionModel {
    Poly3 { k1: f64 },
    Poly5 { k1: f64, k2: f64 },
    PTLens { a: f64, b: f64, c: f64 },
}

impl Default for DistortionModel {
    fn default() -> Self {
        DistortionModel::Poly3 { k1: 0.0 }
    }
}

impl DistortionModel {
    /// Creates a model of the given family with all coefficients set to zero.
    pub fn identity(kind: DistortionKind) -> Self {
        Self::from_coefficients(kind, &[])
    }

    /// Creates a model from a coefficient slice.
    ///
    /// Missing coefficients are treated as zero and extra ones are ignored, so
    /// switching families keeps the leading terms.
    pub fn from_coefficients(kind: DistortionKind, coefficients: &[f64]) -> Self {
        let term = |i: usize| coefficients.get(i).copied().unwrap_or(0.0);
        match kind {
            DistortionKind::Poly3 => DistortionModel::Poly3 { k1: term(0) },
            DistortionKind::Poly5 => DistortionModel::Poly5 {
                k1: term(0),
                k2: term(1),
            },
            DistortionKind::PTLens => DistortionModel::PTLens {
                a: term(0),
                b: term(1),
                c: term(2),
            },
        }
    }

    pub fn kind(&self) -> DistortionKind {
        match self {
            DistortionModel::Poly3 { .. } => DistortionKind::Poly3,
            DistortionModel::Poly5 { .. } => DistortionKind::Poly5,
            DistortionModel::PTLens { .. } => DistortionKind::PTLens,
        }
    }

    /// The active coefficients, in lensfun order.
    pub fn coefficients(&self) -> Vec<f64> {
        match *self {
            DistortionModel::Poly3 { k1 } => vec![k1],
            DistortionModel::Poly5 { k1, k2 } => vec![k1, k2],
            DistortionModel::PTLens { a, b, c } => vec![a, b, c],
        }
    }

    /// Maps an undistorted radius to a distorted one.
    pub fn apply_distortion(&self, ru: f64) -> f64 {
        let ru2 = ru * ru;
        match *self {
            DistortionModel::Poly3 { k1 } => ru * (1.0 - k1 + k1 * ru2),
            DistortionModel::Poly5 { k1, k2 } => ru * (1.0 + k1 * ru2 + k2 * ru2 * ru2),
            DistortionModel::PTLens { a, b, c } => {
                ru * (a * ru2 * ru + b * ru2 + c * ru + 1.0 - a - b - c)
            }
        }
    }

    /// The smallest positive radius where `d rd / d ru = 0`, i.e. where the model
    /// ceases to be monotonic. Returns [`UNBOUNDED_RADIUS`] when there is none.
    pub fn max_undistorted_radius(&self) -> f64 {
        match *self {
            DistortionModel::Poly3 { k1 } => {
                // d/dru: 1 - k1 + 3·k1·ru² = 0
                let square = (k1 - 1.0) / (3.0 * k1);
                if square < 0.0 || !square.is_finite() {
                    return UNBOUNDED_RADIUS;
                }
                square.sqrt()
            }
            DistortionModel::Poly5 { k1, k2 } => {
                // d/dru: 1 + 3·k1·ru² + 5·k2·ru⁴ = 0, a quadratic in ru²
                if k2 == 0.0 && k1 < 0.0 {
                    return 1.0 / (-3.0 * k1).sqrt();
                }
                solve_quadratic(5.0 * k2, 3.0 * k1, 1.0)
                    .into_iter()
                    .filter(|square| *square > 0.0 && square.is_finite())
                    .map(f64::sqrt)
                    .next()
                    .unwrap_or(UNBOUNDED_RADIUS)
            }
            DistortionModel::PTLens { a, b, c } => {
                solve_cubic(4.0 * a, 3.0 * b, 2.0 * c, 1.0 - a - b - c)
                    .into_iter()
                    .find(|root| *root > 0.0 && root.is_finite())
                    .unwrap_or(UNBOUNDED_RADIUS)
            }
        }
    }

    /// Finds the undistorted radius that distorts to `rd`, searching `[0, ru_max]`.
    ///
    /// Bisects for at most 53 halvings and stops early once the bracket
    /// collapses to a single value.
    pub fn inverse_distortion(&self, rd: f64, ru_max: f64) -> f64 {
        let mut ru_min = 0.0;
        let mut ru_max = ru_max;
        for _ in 0..INVERSE_BISECTION_STEPS {
            if ru_min == ru_max {
                break;
            }
            let ru = (ru_min + ru_max) / 2.0;
            if self.apply_distortion(ru) < rd {
                ru_min = ru;
            } else {
                ru_max = ru;
            }
        }
        (ru_min + ru_max) / 2.0
    }

    /// `true` if every coefficient is zero, i.e. the model is the identity.
    pub fn is_identity(&self) -> bool {
        self.coefficients().iter().all(|term| *term == 0.0)
    }
}

impl fmt::Display for DistortionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DistortionModel::Poly3 { k1 } => write!(f, "poly3 [k1: {k1}]"),
            DistortionModel::Poly5 { k1, k2 } => write!(f, "poly5 [k1: {k1} k2: {k2}]"),
            DistortionModel::PTLens { a, b, c } => write!(f, "ptlens [a: {a} b: {b} c: {c}]"),
        }
    }
}

/// Upper bound for the undistorted radius search on a `width × height` image.
///
/// 1.3 times the ratio of the image diagonal to its smaller side.
pub fn undistorted_search_limit(width: u32, height: u32) -> f64 {
    let w = f64::from(width);
    let h = f64::from(height);
    1.3 * w.hypot(h) / w.min(h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_models() -> Vec<DistortionModel> {
        vec![
            DistortionModel::Poly3 { k1: 0.1 },
            DistortionModel::Poly3 { k1: -0.08 },
            DistortionModel::Poly3 { k1: 0.4 },
            DistortionModel::Poly5 { k1: -0.05, k2: 0.0 },
            DistortionModel::Poly5 { k1: 0.02, k2: -0.01 },
            DistortionModel::Poly5 { k1: -0.12, k2: 0.03 },
            DistortionModel::PTLens {
                a: 0.01,
                b: -0.03,
                c: 0.02,
            },
            DistortionModel::PTLens {
                a: -0.02,
                b: 0.05,
                c: -0.04,
            },
            DistortionModel::PTLens {
                a: 0.0,
                b: 0.0,
                c: 0.0,
            },
        ]
    }

    /// Upper end of the radius range exercised by the property tests.
    fn test_radius_limit(model: &DistortionModel) -> f64 {
        model.max_undistorted_radius().min(3.0)
    }

    #[test]
    fn test_poly3_concrete_values() {
        let model = DistortionModel::Poly3 { k1: 0.1 };
        assert_relative_eq!(model.apply_distortion(1.0), 1.0, epsilon = 1e-15);
        assert_relative_eq!(model.apply_distortion(0.5), 0.4625, epsilon = 1e-15);
        assert_eq!(model.apply_distortion(0.0), 0.0);
    }

    #[test]
    fn test_identity_models() {
        for kind in [DistortionKind::Poly3, DistortionKind::Poly5, DistortionKind::PTLens] {
            let model = DistortionModel::identity(kind);
            assert!(model.is_identity());
            assert_eq!(model.kind(), kind);
            assert_eq!(model.coefficients().len(), kind.coefficient_count());
            assert_relative_eq!(model.apply_distortion(0.73), 0.73, epsilon = 1e-15);
            assert_eq!(model.max_undistorted_radius(), UNBOUNDED_RADIUS);
        }
    }

    #[test]
    fn test_max_undistorted_radius_closed_forms() {
        // Poly3 with k1 = -0.5: ru² = (-1.5)/(-1.5) = 1
        let poly3 = DistortionModel::Poly3 { k1: -0.5 };
        assert_relative_eq!(poly3.max_undistorted_radius(), 1.0, epsilon = 1e-15);

        // Poly3 with 0 < k1 < 1 never turns around
        assert_eq!(
            DistortionModel::Poly3 { k1: 0.1 }.max_undistorted_radius(),
            UNBOUNDED_RADIUS
        );

        // Poly5 with k2 = 0, k1 < 0
        let poly5 = DistortionModel::Poly5 { k1: -1.0 / 3.0, k2: 0.0 };
        assert_relative_eq!(poly5.max_undistorted_radius(), 1.0, epsilon = 1e-15);

        // Poly5 with k1 = 0, k2 < 0: 1 + 5·k2·ru⁴ = 0
        let poly5 = DistortionModel::Poly5 { k1: 0.0, k2: -0.2 };
        assert_relative_eq!(poly5.max_undistorted_radius(), 1.0, epsilon = 1e-12);

        // PTLens with only the linear term: ru·(c·ru + 1 - c) → 2c·ru + 1 - c = 0
        let ptlens = DistortionModel::PTLens {
            a: 0.0,
            b: 0.0,
            c: -0.5,
        };
        assert_relative_eq!(ptlens.max_undistorted_radius(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_derivative_vanishes_at_max_radius() {
        for model in sample_models() {
            let limit = model.max_undistorted_radius();
            if limit == UNBOUNDED_RADIUS {
                continue;
            }
            let h = 1e-6;
            let slope =
                (model.apply_distortion(limit + h) - model.apply_distortion(limit - h)) / (2.0 * h);
            assert!(slope.abs() < 1e-6, "{model}: slope {slope} at {limit}");
        }
    }

    #[test]
    fn test_monotonic_below_max_radius() {
        for model in sample_models() {
            let limit = test_radius_limit(&model);
            let samples = 1000;
            let mut previous = model.apply_distortion(0.0);
            for i in 1..samples {
                let ru = limit * i as f64 / samples as f64;
                let current = model.apply_distortion(ru);
                assert!(
                    current >= previous,
                    "{model} decreases between {} and {ru}",
                    limit * (i - 1) as f64 / samples as f64
                );
                previous = current;
            }
        }
    }

    #[test]
    fn test_inverse_distortion_round_trip() {
        let search_limit = undistorted_search_limit(6000, 4000);
        for model in sample_models() {
            let limit = test_radius_limit(&model).min(search_limit);
            for i in 0..50 {
                let ru = limit * i as f64 / 50.0;
                let rd = model.apply_distortion(ru);
                let recovered = model.inverse_distortion(rd, limit);
                assert_relative_eq!(recovered, ru, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_undistorted_search_limit() {
        assert_relative_eq!(
            undistorted_search_limit(100, 100),
            1.3 * 2f64.sqrt(),
            epsilon = 1e-15
        );
        assert_relative_eq!(
            undistorted_search_limit(4000, 3000),
            1.3 * 5000.0 / 3000.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(DistortionKind::PTLens.to_string(), "ptlens");
        assert_eq!(DistortionKind::from_name("Poly5"), Some(DistortionKind::Poly5));
        assert_eq!(DistortionKind::from_name("fisheye"), None);
    }

    #[test]
    fn test_from_coefficients_pads_and_truncates() {
        let model = DistortionModel::from_coefficients(DistortionKind::PTLens, &[0.1]);
        assert_eq!(model.coefficients(), vec![0.1, 0.0, 0.0]);
        let model = DistortionModel::from_coefficients(DistortionKind::Poly3, &[0.2, 0.3, 0.4]);
        assert_eq!(model.coefficients(), vec![0.2]);
    }
}
