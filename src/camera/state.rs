use crate::distortion::{DistortionKind, DistortionModel};
use serde::{Deserialize, Serialize};

/// Field of view given to a freshly loaded image, in radians (60 degrees).
pub const DEFAULT_FIELD_OF_VIEW: f64 = std::f64::consts::FRAC_PI_3;

/// The free parameters of a calibrated photograph.
///
/// All angles are in radians. The center shift is the offset of the image
/// relative to the projection center, in normalized image coordinates (`1` is
/// half of the smaller image side) with `x` to the right and `y` down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub center_shift_x: f64,
    pub center_shift_y: f64,
    /// Rotation of the image about the projection center.
    pub field_rotation: f64,
    pub center_azimuth: f64,
    pub center_elevation: f64,
    /// Field of view across the smaller image side.
    pub field_of_view: f64,
    pub distortion: DistortionModel,
}

impl Default for CalibrationState {
    fn default() -> Self {
        CalibrationState {
            center_shift_x: 0.0,
            center_shift_y: 0.0,
            field_rotation: 0.0,
            center_azimuth: 0.0,
            center_elevation: 0.0,
            field_of_view: DEFAULT_FIELD_OF_VIEW,
            distortion: DistortionModel::default(),
        }
    }
}

impl CalibrationState {
    /// A default state using an identity model of the given family.
    pub fn with_distortion_kind(kind: DistortionKind) -> Self {
        CalibrationState {
            distortion: DistortionModel::identity(kind),
            ..Default::default()
        }
    }

    /// Restores orientation and field of view to their defaults.
    pub fn reset_placement(&mut self) {
        let defaults = CalibrationState::default();
        self.field_rotation = defaults.field_rotation;
        self.center_azimuth = defaults.center_azimuth;
        self.center_elevation = defaults.center_elevation;
        self.field_of_view = defaults.field_of_view;
    }

    /// Zeroes the center shift and every distortion coefficient, keeping the family.
    pub fn reset_distortion(&mut self) {
        self.center_shift_x = 0.0;
        self.center_shift_y = 0.0;
        self.distortion = DistortionModel::identity(self.distortion.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resets() {
        let mut state = CalibrationState {
            center_shift_x: 0.1,
            center_shift_y: -0.05,
            field_rotation: 0.3,
            center_azimuth: 1.0,
            center_elevation: 0.5,
            field_of_view: 0.7,
            distortion: DistortionModel::Poly5 { k1: 0.1, k2: -0.01 },
        };

        state.reset_placement();
        assert_eq!(state.field_rotation, 0.0);
        assert_eq!(state.center_azimuth, 0.0);
        assert_eq!(state.center_elevation, 0.0);
        assert_eq!(state.field_of_view, DEFAULT_FIELD_OF_VIEW);
        assert_eq!(state.center_shift_x, 0.1);

        state.reset_distortion();
        assert_eq!(state.center_shift_x, 0.0);
        assert_eq!(state.center_shift_y, 0.0);
        assert_eq!(state.distortion, DistortionModel::Poly5 { k1: 0.0, k2: 0.0 });
    }
}
