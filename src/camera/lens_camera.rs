//! Implements the projection between image pixels and sky directions.
//!
//! This module provides the [`LensCamera`] struct, the only camera model of the
//! crate. It adheres to the [`CameraModel`] trait defined in the parent
//! `camera` module ([`crate::camera`]).
//!
//! A pixel is first expressed in normalized image coordinates: the origin is the
//! image center, `1` is half of the smaller image side, `x` points right and `y`
//! points up. The center shift is then removed, the radial distortion is
//! inverted and the resulting tangent-plane point is mapped onto the sky through
//! an orthonormal basis built from the projection center, the image "up"
//! direction and the field of view.

use crate::camera::{validation, CalibrationError, CalibrationState, CameraModel, Resolution};
use crate::config::{yaml_f64, yaml_pair};
use crate::distortion::{undistorted_search_limit, DistortionKind, DistortionModel};
use crate::geometry::{
    angle_between, clamp_unit, direction_from_azimuth_elevation, elevation_tangent, rotate_about,
};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

/// A photograph placed on the sky.
///
/// # Examples
///
/// ```rust
/// use lens_distortion_estimator::camera::{CalibrationState, LensCamera, Resolution};
///
/// let camera = LensCamera::new(
///     Resolution { width: 3001, height: 2001 },
///     CalibrationState::default(),
/// )
/// .unwrap();
///
/// // The image center looks along the projection center.
/// let dir = camera.image_to_direction(&nalgebra::Vector2::new(1500.0, 1000.0));
/// assert!((dir - camera.center_direction()).norm() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensCamera {
    pub resolution: Resolution,
    pub state: CalibrationState,
}

impl LensCamera {
    /// Creates a camera and validates its parameters.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] if the image is smaller than 2x2
    ///   pixels or the state is out of range.
    pub fn new(resolution: Resolution, state: CalibrationState) -> Result<Self, CalibrationError> {
        let camera = LensCamera { resolution, state };
        camera.validate_params()?;
        Ok(camera)
    }

    /// A camera with the default placement and an identity distortion of `kind`.
    pub fn with_distortion_kind(
        resolution: Resolution,
        kind: DistortionKind,
    ) -> Result<Self, CalibrationError> {
        Self::new(resolution, CalibrationState::with_distortion_kind(kind))
    }

    pub fn reset_placement(&mut self) {
        self.state.reset_placement();
    }

    pub fn reset_distortion(&mut self) {
        self.state.reset_distortion();
    }

    /// `(W - 1, H - 1, min(W - 1, H - 1))` as floats.
    fn pixel_extent(&self) -> (f64, f64, f64) {
        let w = f64::from(self.resolution.width) - 1.0;
        let h = f64::from(self.resolution.height) - 1.0;
        (w, h, w.min(h))
    }

    /// The center shift in the y-up normalized frame.
    fn internal_shift(&self) -> Vector2<f64> {
        Vector2::new(-self.state.center_shift_x, self.state.center_shift_y)
    }

    /// Distorted normalized position of a pixel relative to the projection center.
    pub fn pixel_to_normalized(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let (w, h, m) = self.pixel_extent();
        Vector2::new((2.0 * pixel.x - w) / m, -(2.0 * pixel.y - h) / m) - self.internal_shift()
    }

    /// Inverse of [`LensCamera::pixel_to_normalized`].
    pub fn normalized_to_pixel(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        let (w, h, m) = self.pixel_extent();
        let p = normalized + self.internal_shift();
        Vector2::new((w + m * p.x) / 2.0, (h - m * p.y) / 2.0)
    }

    /// Upper bound used when inverting the distortion for this image.
    ///
    /// The search never goes past the point where the model stops being monotonic.
    pub fn undistorted_radius_limit(&self) -> f64 {
        undistorted_search_limit(self.resolution.width, self.resolution.height)
            .min(self.state.distortion.max_undistorted_radius())
    }

    /// Undistorted tangent-plane coordinates of a pixel, in units of `tan(fov / 2)`.
    pub fn image_point_tilt(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let p = self.pixel_to_normalized(pixel);
        let rd = p.norm();
        if rd == 0.0 {
            return Vector2::zeros();
        }
        let ru = self
            .state
            .distortion
            .inverse_distortion(rd, self.undistorted_radius_limit());
        p / rd * ru
    }

    pub fn center_direction(&self) -> Vector3<f64> {
        direction_from_azimuth_elevation(self.state.center_azimuth, self.state.center_elevation)
    }

    /// Direction of the image's upward axis, perpendicular to the center direction.
    pub fn up_direction(&self) -> Vector3<f64> {
        let unrotated =
            elevation_tangent(self.state.center_azimuth, self.state.center_elevation);
        rotate_about(
            &unrotated,
            &self.center_direction(),
            -self.state.field_rotation,
        )
    }

    pub fn right_direction(&self) -> Vector3<f64> {
        self.center_direction().cross(&self.up_direction())
    }

    /// Maps a pixel to the unit sky direction it shows.
    pub fn image_to_direction(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        let tilt = self.image_point_tilt(pixel);
        let t = (self.state.field_of_view / 2.0).tan();
        let center = self.center_direction();
        let up = self.up_direction();
        let right = center.cross(&up);
        (right * (tilt.x * t) + up * (tilt.y * t) + center).normalize()
    }

    /// Maps a sky direction to the pixel showing it.
    ///
    /// The pixel may lie outside the image bounds.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] if `direction` is zero or not finite.
    /// * [`CalibrationError::PointBehindCamera`] if `direction` is 90 degrees or
    ///   more from the projection center.
    /// * [`CalibrationError::OutsideValidRadius`] if `direction` lies beyond the
    ///   radius where the distortion model stops being monotonic.
    pub fn direction_to_pixel(
        &self,
        direction: &Vector3<f64>,
    ) -> Result<Vector2<f64>, CalibrationError> {
        let norm = direction.norm();
        if norm == 0.0 || !norm.is_finite() {
            return Err(CalibrationError::InvalidParams(
                "direction must be a finite non-zero vector".to_string(),
            ));
        }
        let dir = direction / norm;

        let center = self.center_direction();
        let up = self.up_direction();
        let right = center.cross(&up);

        let cos_r = dir.dot(&center);
        if cos_r <= 0.0 {
            return Err(CalibrationError::PointBehindCamera);
        }

        let radius = clamp_unit(cos_r).acos();
        let ru = radius.tan() / (self.state.field_of_view / 2.0).tan();
        if ru > self.state.distortion.max_undistorted_radius() {
            return Err(CalibrationError::OutsideValidRadius);
        }
        let rd = self.state.distortion.apply_distortion(ru);

        let polar = dir.dot(&up).atan2(dir.dot(&right));
        let normalized = Vector2::new(rd * polar.cos(), rd * polar.sin());
        Ok(self.normalized_to_pixel(&normalized))
    }

    /// Angle between the directions of two pixels if the field of view were `field_of_view`.
    ///
    /// The orientation does not affect the result, so the points are placed in
    /// the camera-local frame. The state is not modified.
    pub fn angle_between_image_points(
        &self,
        a: &Vector2<f64>,
        b: &Vector2<f64>,
        field_of_view: f64,
    ) -> f64 {
        angle_between_tilts(
            &self.image_point_tilt(a),
            &self.image_point_tilt(b),
            field_of_view,
        )
    }
}

/// Angle between two tangent-plane points (see [`LensCamera::image_point_tilt`])
/// for a given field of view.
pub fn angle_between_tilts(a: &Vector2<f64>, b: &Vector2<f64>, field_of_view: f64) -> f64 {
    let t = (field_of_view / 2.0).tan();
    let local = |tilt: &Vector2<f64>| Vector3::new(tilt.x * t, tilt.y * t, 1.0).normalize();
    angle_between(&local(a), &local(b))
}

impl CameraModel for LensCamera {
    fn project(&self, direction: &Vector3<f64>) -> Result<Vector2<f64>, CalibrationError> {
        self.direction_to_pixel(direction)
    }

    fn unproject(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>, CalibrationError> {
        if !pixel.x.is_finite() || !pixel.y.is_finite() {
            return Err(CalibrationError::InvalidParams(
                "pixel coordinates must be finite".to_string(),
            ));
        }
        Ok(self.image_to_direction(pixel))
    }

    /// Loads a calibrated camera from a YAML file.
    ///
    /// Angles in the file are in degrees. The expected layout is:
    ///
    /// ```yaml
    /// camera:
    ///   resolution: [6000, 4000]
    ///   center_shift: [0.01, -0.02]
    ///   field_rotation: 1.5
    ///   center_azimuth: 120.0
    ///   center_elevation: 35.0
    ///   field_of_view: 48.0
    ///   distortion_model: poly3
    ///   distortion: [0.05]
    /// ```
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * [`CalibrationError::YamlError`] if the content is not valid YAML.
    /// * [`CalibrationError::InvalidParams`] if a field is missing, has the
    ///   wrong type, or the loaded parameters fail validation.
    fn load_from_yaml(path: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CalibrationError::YamlError("empty YAML document".to_string()))?;
        let camera = &doc["camera"];

        let (width, height) = yaml_pair(&camera["resolution"], "resolution")?;
        let (shift_x, shift_y) = yaml_pair(&camera["center_shift"], "center_shift")?;
        let angle = |key: &str| -> Result<f64, CalibrationError> {
            yaml_f64(&camera[key])
                .map(f64::to_radians)
                .ok_or_else(|| CalibrationError::InvalidParams(format!("Invalid {key}: not a number")))
        };

        let kind_name = camera["distortion_model"].as_str().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML missing 'distortion_model'".to_string())
        })?;
        let kind = DistortionKind::from_name(kind_name).ok_or_else(|| {
            CalibrationError::InvalidParams(format!("Unknown distortion model: {kind_name}"))
        })?;
        let coefficients = camera["distortion"]
            .as_vec()
            .ok_or_else(|| {
                CalibrationError::InvalidParams("YAML missing 'distortion' or not an array".to_string())
            })?
            .iter()
            .map(|term| {
                yaml_f64(term).ok_or_else(|| {
                    CalibrationError::InvalidParams("Invalid distortion term: not a number".to_string())
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let state = CalibrationState {
            center_shift_x: shift_x,
            center_shift_y: shift_y,
            field_rotation: angle("field_rotation")?,
            center_azimuth: angle("center_azimuth")?,
            center_elevation: angle("center_elevation")?,
            field_of_view: angle("field_of_view")?,
            distortion: DistortionModel::from_coefficients(kind, &coefficients),
        };

        LensCamera::new(
            Resolution {
                width: width as u32,
                height: height as u32,
            },
            state,
        )
    }

    /// Saves the camera in the layout read by [`LensCamera::load_from_yaml`].
    fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError> {
        let state = &self.state;
        let camera = Mapping::from_iter([
            (
                Value::String("resolution".to_string()),
                serde_yaml::to_value(vec![self.resolution.width, self.resolution.height])?,
            ),
            (
                Value::String("center_shift".to_string()),
                serde_yaml::to_value(vec![state.center_shift_x, state.center_shift_y])?,
            ),
            (
                Value::String("field_rotation".to_string()),
                Value::from(state.field_rotation.to_degrees()),
            ),
            (
                Value::String("center_azimuth".to_string()),
                Value::from(state.center_azimuth.to_degrees()),
            ),
            (
                Value::String("center_elevation".to_string()),
                Value::from(state.center_elevation.to_degrees()),
            ),
            (
                Value::String("field_of_view".to_string()),
                Value::from(state.field_of_view.to_degrees()),
            ),
            (
                Value::String("distortion_model".to_string()),
                Value::String(state.distortion.kind().name().to_string()),
            ),
            (
                Value::String("distortion".to_string()),
                serde_yaml::to_value(state.distortion.coefficients())?,
            ),
        ]);
        let yaml = Mapping::from_iter([(Value::String("camera".to_string()), Value::Mapping(camera))]);

        let yaml_string = serde_yaml::to_string(&yaml)?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }

    fn validate_params(&self) -> Result<(), CalibrationError> {
        validation::validate_resolution(&self.resolution)?;
        validation::validate_state(&self.state)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.state.distortion.coefficients()
    }
}
