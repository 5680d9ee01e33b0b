//! Camera model for sky-calibrated photographs.
//!
//! A [`LensCamera`] maps image pixels to unit directions in the observer's
//! sky frame and back. Its free parameters live in [`CalibrationState`].
//! Point correspondences between the photograph and the sky are described by
//! [`Correspondence`] and [`PickedPoint`].

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod correspondence;
pub mod lens_camera;
pub mod state;

pub use correspondence::{
    resolve_correspondences, Correspondence, DirectionTable, PickedPoint, SkyDirectionResolver,
};
pub use lens_camera::LensCamera;
pub use state::CalibrationState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("Not enough correspondences: {required} required, {found} found")]
    NotEnoughCorrespondences { required: usize, found: usize },
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),
    #[error("Optimizer failed: {0}")]
    OptimizerFailure(String),
    #[error("Optimization was cancelled")]
    Cancelled,
    #[error("Direction is 90 degrees or more away from the projection center")]
    PointBehindCamera,
    #[error("Direction is beyond the valid radius of the distortion model")]
    OutsideValidRadius,
    #[error("Invalid calibration parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("CSV error: {0}")]
    CsvError(String),
    #[error("JSON error: {0}")]
    JsonError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CalibrationError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CalibrationError {
    fn from(err: serde_yaml::Error) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<csv::Error> for CalibrationError {
    fn from(err: csv::Error) -> Self {
        CalibrationError::CsvError(err.to_string())
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(err: serde_json::Error) -> Self {
        CalibrationError::JsonError(err.to_string())
    }
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Project a unit direction in the sky frame to pixel coordinates
    fn project(&self, direction: &Vector3<f64>) -> Result<Vector2<f64>, CalibrationError>;

    /// Unproject pixel coordinates to a unit direction in the sky frame
    fn unproject(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>, CalibrationError>;

    /// Load camera parameters from a YAML file
    fn load_from_yaml(path: &str) -> Result<Self, CalibrationError>
    where
        Self: Sized;

    /// Save camera parameters to a YAML file
    fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CalibrationError>;

    fn get_resolution(&self) -> Resolution;

    fn get_distortion(&self) -> Vec<f64>;
}

/// Common validation functions for calibration parameters
pub mod validation {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    pub fn validate_resolution(resolution: &Resolution) -> Result<(), CalibrationError> {
        if resolution.width < 2 || resolution.height < 2 {
            return Err(CalibrationError::InvalidParams(format!(
                "image must be at least 2x2 pixels, got {}x{}",
                resolution.width, resolution.height
            )));
        }
        Ok(())
    }

    pub fn validate_state(state: &CalibrationState) -> Result<(), CalibrationError> {
        let values = [
            state.center_shift_x,
            state.center_shift_y,
            state.field_rotation,
            state.center_azimuth,
            state.center_elevation,
            state.field_of_view,
        ];
        if values.iter().any(|v| !v.is_finite())
            || state.distortion.coefficients().iter().any(|v| !v.is_finite())
        {
            return Err(CalibrationError::InvalidParams(
                "calibration parameters must be finite".to_string(),
            ));
        }
        if state.field_of_view <= 0.0 || state.field_of_view >= PI {
            return Err(CalibrationError::InvalidParams(format!(
                "field of view must be inside (0, 180) degrees, got {}",
                state.field_of_view.to_degrees()
            )));
        }
        if state.center_elevation.abs() > FRAC_PI_2 {
            return Err(CalibrationError::InvalidParams(format!(
                "center elevation must be inside [-90, 90] degrees, got {}",
                state.center_elevation.to_degrees()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_resolution() {
        assert!(validation::validate_resolution(&Resolution {
            width: 3000,
            height: 2000
        })
        .is_ok());
        assert!(matches!(
            validation::validate_resolution(&Resolution {
                width: 1,
                height: 2000
            }),
            Err(CalibrationError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_validate_state() {
        let mut state = CalibrationState::default();
        assert!(validation::validate_state(&state).is_ok());

        state.field_of_view = 0.0;
        assert!(validation::validate_state(&state).is_err());

        state = CalibrationState::default();
        state.center_elevation = 2.0;
        assert!(validation::validate_state(&state).is_err());

        state = CalibrationState::default();
        state.center_shift_x = f64::NAN;
        assert!(validation::validate_state(&state).is_err());
    }

    #[test]
    fn test_error_messages() {
        let err = CalibrationError::NotEnoughCorrespondences {
            required: 3,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "Not enough correspondences: 3 required, 1 found"
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            CalibrationError::from(io),
            CalibrationError::IOError(_)
        ));
    }
}
