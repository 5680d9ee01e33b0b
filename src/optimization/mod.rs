//! The `optimization` module refines a [`LensCamera`] against point correspondences.
//!
//! This module defines the [`Optimizer`] trait, the interface of a calibration
//! run, and its Nelder–Mead implementation [`LensOptimizationCost`].
//!
//! The free parameters are the center shift, the field rotation, the projection
//! center and the active distortion coefficients. Each candidate is placed on
//! the sky with two-point alignment before it is scored, so the field of view
//! always follows from the first two correspondences. The objective is the sum
//! of squared angular residuals over all correspondences.
//!
//! A run works on its own copy of the camera. The caller's camera only changes
//! when the run converges, so a failed or cancelled run leaves no trace.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod nelder_mead;

pub use nelder_mead::LensOptimizationCost;

use crate::camera::{CalibrationError, Correspondence, LensCamera};
use crate::distortion::DistortionKind;

/// Number of correspondences a calibration run needs.
pub const MIN_OPTIMIZATION_CORRESPONDENCES: usize = 3;

/// Inclusive `[min, max]` range of one free parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
}

impl ParameterRange {
    pub fn new(min: f64, max: f64) -> Self {
        ParameterRange { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    /// Distance from `value` to the range, zero inside it.
    pub fn excess(&self, value: f64) -> f64 {
        if value < self.min {
            self.min - value
        } else if value > self.max {
            value - self.max
        } else {
            0.0
        }
    }

    fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Search box of a calibration run.
///
/// Angles are in radians and the center shift in normalized image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub center_shift_x: ParameterRange,
    pub center_shift_y: ParameterRange,
    pub field_rotation: ParameterRange,
    pub center_azimuth: ParameterRange,
    pub center_elevation: ParameterRange,
    /// Ranges of the distortion coefficients in lensfun order. Coefficients
    /// without an entry use [`ParameterBounds::DEFAULT_DISTORTION_RANGE`].
    pub distortion: Vec<ParameterRange>,
}

impl ParameterBounds {
    pub const DEFAULT_DISTORTION_RANGE: ParameterRange = ParameterRange { min: -1.0, max: 1.0 };

    /// The ranges of the optimization vector
    /// `[shift_x, shift_y, rotation, azimuth, elevation, d1, ...]` for `kind`.
    pub fn ranges(&self, kind: DistortionKind) -> Vec<ParameterRange> {
        let mut ranges = vec![
            self.center_shift_x,
            self.center_shift_y,
            self.field_rotation,
            self.center_azimuth,
            self.center_elevation,
        ];
        ranges.extend((0..kind.coefficient_count()).map(|i| {
            self.distortion
                .get(i)
                .copied()
                .unwrap_or(Self::DEFAULT_DISTORTION_RANGE)
        }));
        ranges
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let named = [
            ("center_shift_x", &self.center_shift_x),
            ("center_shift_y", &self.center_shift_y),
            ("field_rotation", &self.field_rotation),
            ("center_azimuth", &self.center_azimuth),
            ("center_elevation", &self.center_elevation),
        ];
        for (name, range) in named {
            if !range.is_valid() {
                return Err(CalibrationError::InvalidParams(format!(
                    "bounds of {name} must be finite with min <= max"
                )));
            }
        }
        if self.distortion.iter().any(|range| !range.is_valid()) {
            return Err(CalibrationError::InvalidParams(
                "distortion bounds must be finite with min <= max".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ParameterBounds {
    fn default() -> Self {
        ParameterBounds {
            center_shift_x: ParameterRange::new(-0.5, 0.5),
            center_shift_y: ParameterRange::new(-0.5, 0.5),
            field_rotation: ParameterRange::new(-PI, PI),
            center_azimuth: ParameterRange::new(-2.0 * PI, 2.0 * PI),
            center_elevation: ParameterRange::new(-FRAC_PI_2, FRAC_PI_2),
            distortion: vec![Self::DEFAULT_DISTORTION_RANGE; 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerOptions {
    /// Relative change of the cost below which the search stops.
    pub relative_tolerance: f64,
    /// Iteration budget of a single Nelder–Mead run.
    pub max_iterations: u64,
    /// How many times the simplex may be rebuilt around the best vertex.
    pub max_restarts: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        OptimizerOptions {
            relative_tolerance: 1e-3,
            max_iterations: 20_000,
            max_restarts: 12,
        }
    }
}

impl OptimizerOptions {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !(self.relative_tolerance.is_finite() && self.relative_tolerance > 0.0) {
            return Err(CalibrationError::InvalidParams(
                "relative tolerance must be positive".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(CalibrationError::InvalidParams(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a calibration run: `Idle -> Running -> (Converged | Failed |
/// Cancelled) -> Idle`. The terminal state of the last run is kept by
/// [`Optimizer::last_outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerStatus {
    Idle,
    Running,
    Converged,
    Failed,
    Cancelled,
}

/// Shared flag used to stop a running optimization from another thread.
///
/// The flag is checked before every objective evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a converged calibration run. Costs are sums of squared radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: u64,
    pub restarts: usize,
    pub evaluations: usize,
    pub status: OptimizerStatus,
}

/// A trait for camera calibration tasks.
///
/// Types implementing `Optimizer` refine the parameters of a [`LensCamera`]
/// so that the image points of the correspondences show their true directions.
pub trait Optimizer {
    /// Runs the optimization.
    ///
    /// # Arguments
    ///
    /// * `verbose` - If `true`, progress is logged at `info` level.
    ///
    /// # Returns
    ///
    /// * `Ok(OptimizationSummary)` - The run converged and the camera returned by
    ///   [`Optimizer::get_camera`] holds the refined parameters.
    /// * `Err(CalibrationError)` - The run failed or was cancelled; the camera
    ///   is unchanged.
    fn optimize(&mut self, verbose: bool) -> Result<OptimizationSummary, CalibrationError>;

    /// `Running` while [`Optimizer::optimize`] executes, `Idle` otherwise.
    fn status(&self) -> OptimizerStatus;

    /// How the last run ended, `None` before the first run.
    fn last_outcome(&self) -> Option<OptimizerStatus>;

    fn get_camera(&self) -> &LensCamera;

    /// Retrieves the current distortion coefficients, in lensfun order.
    fn get_distortion(&self) -> Vec<f64>;
}

/// Calibrates `camera` in place.
///
/// On success the camera holds the converged parameters; on any error it is
/// left exactly as it was.
///
/// # Errors
///
/// * [`CalibrationError::NotEnoughCorrespondences`] with fewer than three correspondences.
/// * [`CalibrationError::InvalidParams`] if the bounds or options are invalid.
/// * [`CalibrationError::DegenerateGeometry`] if the first two correspondences
///   cannot place the image.
/// * [`CalibrationError::OptimizerFailure`] if the search does not converge.
/// * [`CalibrationError::Cancelled`] if `cancel` was triggered.
pub fn optimize_calibration(
    camera: &mut LensCamera,
    correspondences: &[Correspondence],
    bounds: &ParameterBounds,
    options: &OptimizerOptions,
    cancel: &CancellationToken,
    verbose: bool,
) -> Result<OptimizationSummary, CalibrationError> {
    let mut cost = LensOptimizationCost::new(
        camera.clone(),
        correspondences.to_vec(),
        bounds,
        options.clone(),
    )?
    .with_cancellation(cancel.clone());

    let summary = cost.optimize(verbose)?;
    *camera = cost.get_camera().clone();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_range() {
        let range = ParameterRange::new(-1.0, 2.0);
        assert_eq!(range.width(), 3.0);
        assert_eq!(range.clamp(5.0), 2.0);
        assert_eq!(range.clamp(-3.0), -1.0);
        assert_eq!(range.clamp(0.5), 0.5);
        assert_eq!(range.excess(5.0), 3.0);
        assert_eq!(range.excess(-1.5), 0.5);
        assert_eq!(range.excess(0.0), 0.0);
    }

    #[test]
    fn test_bounds_ranges_follow_distortion_kind() {
        let mut bounds = ParameterBounds::default();
        bounds.distortion = vec![ParameterRange::new(-0.3, 0.3)];

        let poly3 = bounds.ranges(DistortionKind::Poly3);
        assert_eq!(poly3.len(), 6);
        assert_eq!(poly3[5], ParameterRange::new(-0.3, 0.3));

        let ptlens = bounds.ranges(DistortionKind::PTLens);
        assert_eq!(ptlens.len(), 8);
        assert_eq!(ptlens[6], ParameterBounds::DEFAULT_DISTORTION_RANGE);
    }

    #[test]
    fn test_bounds_validation() {
        assert!(ParameterBounds::default().validate().is_ok());
        let mut bounds = ParameterBounds::default();
        bounds.center_elevation = ParameterRange::new(1.0, -1.0);
        assert!(bounds.validate().is_err());
        bounds = ParameterBounds::default();
        bounds.distortion[1] = ParameterRange::new(f64::NEG_INFINITY, 0.0);
        assert!(bounds.validate().is_err());
    }

    #[test]
    fn test_options_validation() {
        assert!(OptimizerOptions::default().validate().is_ok());
        let options = OptimizerOptions {
            relative_tolerance: 0.0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
