// src/optimization/nelder_mead.rs

use crate::alignment::reposition_by_points;
use crate::camera::{CalibrationError, CameraModel, Correspondence, LensCamera};
use crate::distortion::DistortionModel;
use crate::geometry::angle_between;
use crate::optimization::{
    CancellationToken, OptimizationSummary, Optimizer, OptimizerOptions, OptimizerStatus,
    ParameterBounds, ParameterRange, MIN_OPTIMIZATION_CORRESPONDENCES,
};
use argmin::{
    core::{CostFunction, Error, Executor, State, TerminationReason},
    solver::neldermead::NelderMead,
};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Cost reported for candidates that cannot be aligned or whose residuals
/// are not finite.
const NON_FINITE_COST: f64 = 1e6;

/// Weight of the quadratic penalty on out-of-bounds parameters.
const BOUNDS_PENALTY_WEIGHT: f64 = 1.0;

/// Floor of the simplex standard-deviation tolerance, in squared radians.
const ABSOLUTE_COST_TOLERANCE: f64 = 1e-14;

/// Initial simplex edge as a fraction of each parameter's range.
const INITIAL_STEP_FRACTION: f64 = 0.05;
const MIN_INITIAL_STEP: f64 = 1e-4;

/// Simplex size factor applied on every restart.
const RESTART_SCALE: f64 = 0.5;

/// Cost function for calibrating a [`LensCamera`] with Nelder–Mead.
///
/// The parameter vector is `[shift_x, shift_y, rotation, azimuth, elevation,
/// d1, ...]` with one entry per coefficient of the camera's distortion model.
/// Every evaluation clamps the vector into its bounds, applies it, re-aligns
/// the image on the first two correspondences and returns the sum of squared
/// angular residuals plus a quadratic penalty on the clamped distance.
#[derive(Clone)]
pub struct LensOptimizationCost {
    camera: LensCamera,
    correspondences: Vec<Correspondence>,
    ranges: Vec<ParameterRange>,
    options: OptimizerOptions,
    cancel: CancellationToken,
    evaluations: Arc<AtomicUsize>,
    status: OptimizerStatus,
    outcome: Option<OptimizerStatus>,
}

impl LensOptimizationCost {
    /// Creates a calibration run for `camera`.
    ///
    /// The distortion family and the bounds are frozen here.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::NotEnoughCorrespondences`] with fewer than three correspondences.
    /// * [`CalibrationError::InvalidParams`] if the camera, bounds or options are invalid.
    /// * [`CalibrationError::DegenerateGeometry`] if the first two correspondences
    ///   cannot place the image.
    pub fn new(
        camera: LensCamera,
        correspondences: Vec<Correspondence>,
        bounds: &ParameterBounds,
        options: OptimizerOptions,
    ) -> Result<Self, CalibrationError> {
        if correspondences.len() < MIN_OPTIMIZATION_CORRESPONDENCES {
            return Err(CalibrationError::NotEnoughCorrespondences {
                required: MIN_OPTIMIZATION_CORRESPONDENCES,
                found: correspondences.len(),
            });
        }
        camera.validate_params()?;
        bounds.validate()?;
        options.validate()?;
        // The alignment pair does not depend on the free parameters.
        reposition_by_points(&mut camera.clone(), &correspondences)?;

        let ranges = bounds.ranges(camera.state.distortion.kind());
        Ok(LensOptimizationCost {
            camera,
            correspondences,
            ranges,
            options,
            cancel: CancellationToken::new(),
            evaluations: Arc::new(AtomicUsize::new(0)),
            status: OptimizerStatus::Idle,
            outcome: None,
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The current camera as an optimization vector.
    pub fn parameters(&self) -> Vec<f64> {
        let state = &self.camera.state;
        let mut params = vec![
            state.center_shift_x,
            state.center_shift_y,
            state.field_rotation,
            state.center_azimuth,
            state.center_elevation,
        ];
        params.extend(state.distortion.coefficients());
        params
    }

    fn clamp(&self, params: &[f64]) -> Vec<f64> {
        params
            .iter()
            .zip(&self.ranges)
            .map(|(value, range)| range.clamp(*value))
            .collect()
    }

    /// Applies a (clamped) vector and re-aligns the image on the first two points.
    fn camera_for(&self, params: &[f64]) -> Result<LensCamera, CalibrationError> {
        let params = self.clamp(params);
        let mut camera = self.camera.clone();
        let state = &mut camera.state;
        state.center_shift_x = params[0];
        state.center_shift_y = params[1];
        state.field_rotation = params[2];
        state.center_azimuth = params[3];
        state.center_elevation = params[4];
        state.distortion = DistortionModel::from_coefficients(state.distortion.kind(), &params[5..]);

        reposition_by_points(&mut camera, &self.correspondences)?;
        Ok(camera)
    }

    fn penalty(&self, params: &[f64]) -> f64 {
        params
            .iter()
            .zip(&self.ranges)
            .map(|(value, range)| range.excess(*value).powi(2))
            .sum::<f64>()
            * BOUNDS_PENALTY_WEIGHT
    }

    /// Sum of squared angular residuals of `camera` over all correspondences.
    fn residual_cost(&self, camera: &LensCamera) -> f64 {
        self.correspondences
            .iter()
            .map(|c| {
                angle_between(&camera.image_to_direction(&c.image_point), &c.true_direction)
                    .powi(2)
            })
            .sum()
    }

    /// Objective value of a parameter vector, without cancellation checks.
    pub fn evaluate(&self, params: &[f64]) -> f64 {
        let camera = match self.camera_for(params) {
            Ok(camera) => camera,
            Err(err) => {
                debug!("Candidate could not be aligned: {}", err);
                return NON_FINITE_COST;
            }
        };
        let cost = self.residual_cost(&camera) + self.penalty(params);
        if cost.is_finite() {
            cost
        } else {
            NON_FINITE_COST
        }
    }

    fn initial_simplex(&self, center: &[f64], scale: f64) -> Vec<Vec<f64>> {
        let mut simplex = vec![center.to_vec()];
        for (i, range) in self.ranges.iter().enumerate() {
            let step = (INITIAL_STEP_FRACTION * range.width()).max(MIN_INITIAL_STEP) * scale;
            let mut vertex = center.to_vec();
            vertex[i] = if center[i] + step <= range.max {
                center[i] + step
            } else {
                center[i] - step
            };
            simplex.push(vertex);
        }
        simplex
    }

    /// One Nelder–Mead run from `start`. Returns the best vector, its cost and
    /// the number of iterations.
    fn run_nelder_mead(
        &self,
        start: &[f64],
        scale: f64,
        tolerance: f64,
    ) -> Result<(Vec<f64>, f64, u64), CalibrationError> {
        let solver = NelderMead::new(self.initial_simplex(start, scale))
            .with_sd_tolerance(tolerance)
            .map_err(|e| CalibrationError::OptimizerFailure(e.to_string()))?;

        let res = Executor::new(self.clone(), solver)
            .configure(|state| state.max_iters(self.options.max_iterations))
            .run()
            .map_err(into_calibration_error)?;

        let state = res.state();
        match state.get_termination_reason() {
            Some(TerminationReason::SolverConverged) => {}
            Some(TerminationReason::MaxItersReached) => {
                return Err(CalibrationError::OptimizerFailure(format!(
                    "no convergence after {} iterations",
                    self.options.max_iterations
                )))
            }
            other => {
                return Err(CalibrationError::OptimizerFailure(format!(
                    "unexpected termination: {:?}",
                    other
                )))
            }
        }

        let best = state.get_best_param().cloned().ok_or_else(|| {
            CalibrationError::OptimizerFailure("solver returned no parameters".to_string())
        })?;
        Ok((best, state.get_best_cost(), state.get_iter()))
    }

    fn run(&mut self, verbose: bool) -> Result<OptimizationSummary, CalibrationError> {
        if self.cancel.is_cancelled() {
            return Err(CalibrationError::Cancelled);
        }

        let tolerance = self.options.relative_tolerance;
        let mut best = self.clamp(&self.parameters());
        let initial_cost = self.evaluate(&best);
        let mut best_cost = initial_cost;
        let mut iterations = 0;
        let mut restarts = 0;
        let mut scale = 1.0;

        if verbose {
            info!(
                "Starting Nelder-Mead over {} parameters with {} correspondences, initial cost {:e}",
                best.len(),
                self.correspondences.len(),
                initial_cost
            );
        }

        loop {
            let sd_tolerance = (tolerance * best_cost).max(ABSOLUTE_COST_TOLERANCE);
            let (param, cost, iters) = self.run_nelder_mead(&best, scale, sd_tolerance)?;
            iterations += iters;

            let previous = best_cost;
            if cost < best_cost {
                best = self.clamp(&param);
                best_cost = self.evaluate(&best);
            }
            debug!(
                "Nelder-Mead run {} finished after {} iterations, cost {:e} -> {:e}",
                restarts, iters, previous, best_cost
            );

            if previous - best_cost <= tolerance * previous || restarts >= self.options.max_restarts
            {
                break;
            }
            restarts += 1;
            scale *= RESTART_SCALE;
        }

        let camera = self.camera_for(&best)?;
        camera.validate_params()?;
        let final_cost = self.residual_cost(&camera);
        self.camera = camera;

        let summary = OptimizationSummary {
            initial_cost,
            final_cost,
            iterations,
            restarts,
            evaluations: self.evaluations.load(Ordering::Relaxed),
            status: OptimizerStatus::Converged,
        };
        if verbose {
            info!(
                "Optimization converged: cost {:e} -> {:e} after {} iterations and {} restarts",
                summary.initial_cost, summary.final_cost, summary.iterations, summary.restarts
            );
            info!("Final calibration: {:?}", self.camera.state);
        }
        Ok(summary)
    }
}

fn into_calibration_error(err: Error) -> CalibrationError {
    match err.downcast::<CalibrationError>() {
        Ok(err) => err,
        Err(err) => CalibrationError::OptimizerFailure(err.to_string()),
    }
}

impl fmt::Debug for LensOptimizationCost {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "LensOptimizationCost Summary:\n camera: {:?}\n correspondences: {}, parameters: {}, status: {:?}",
            self.camera,
            self.correspondences.len(),
            self.ranges.len(),
            self.status,
        )
    }
}

impl Optimizer for LensOptimizationCost {
    fn optimize(&mut self, verbose: bool) -> Result<OptimizationSummary, CalibrationError> {
        self.status = OptimizerStatus::Running;
        self.outcome = None;
        self.evaluations.store(0, Ordering::Relaxed);

        let result = self.run(verbose);
        let outcome = match &result {
            Ok(_) => OptimizerStatus::Converged,
            Err(CalibrationError::Cancelled) => OptimizerStatus::Cancelled,
            Err(_) => OptimizerStatus::Failed,
        };
        if let Err(err) = &result {
            warn!("Optimization stopped: {}", err);
        }
        debug!("Optimizer status: Running -> {:?} -> Idle", outcome);
        self.outcome = Some(outcome);
        self.status = OptimizerStatus::Idle;
        result
    }

    fn status(&self) -> OptimizerStatus {
        self.status
    }

    fn last_outcome(&self) -> Option<OptimizerStatus> {
        self.outcome
    }

    fn get_camera(&self) -> &LensCamera {
        &self.camera
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.camera.state.distortion.coefficients()
    }
}

impl CostFunction for LensOptimizationCost {
    /// `[shift_x, shift_y, rotation, azimuth, elevation, d1, ...]`
    type Param = Vec<f64>;
    /// Sum of squared angular residuals in radians², plus the bounds penalty.
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> Result<Self::Output, Error> {
        if self.cancel.is_cancelled() {
            return Err(CalibrationError::Cancelled.into());
        }
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        Ok(self.evaluate(p))
    }
}
