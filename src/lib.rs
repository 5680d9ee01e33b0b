//! Lens Distortion Estimator Library
//!
//! Estimates the lens parameters of a photograph of the sky from a handful of
//! image points whose true directions are known. The library provides:
//! - Closed-form real roots of quadratics and cubics
//! - The lensfun radial distortion models Poly3, Poly5 and PTLens
//! - A camera model mapping pixels to sky directions and back
//! - Two-point alignment that places the camera from two correspondences
//! - Nelder–Mead calibration of the full parameter set with argmin
//! - Angular error reports, lensfun profiles and CSV point files

pub mod alignment;
pub mod camera;
pub mod config;
pub mod distortion;
pub mod geometry;
pub mod optimization;
pub mod polynomial;
pub mod util;

// Re-export commonly used types
pub use alignment::{reposition_by_points, rotate_by_drag, solve_field_of_view};
pub use camera::{
    CalibrationError, CalibrationState, CameraModel, Correspondence, DirectionTable, LensCamera,
    PickedPoint, Resolution, SkyDirectionResolver,
};
pub use config::{CalibrationConfig, LensMetadata};
pub use distortion::{DistortionKind, DistortionModel};
pub use optimization::{
    optimize_calibration, CancellationToken, LensOptimizationCost, OptimizationSummary, Optimizer,
    OptimizerOptions, ParameterBounds, ParameterRange,
};
pub use util::{CalibrationReport, LensProfile};
