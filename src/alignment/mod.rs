//! Two-point alignment of a photograph on the sky.
//!
//! Given two pixels and the true directions of the objects they show, the
//! field of view is solved so that the angular separation of the pixels matches
//! the true one, then the image is rotated so both pixels land on their
//! directions. The distortion model and center shift are left as they are.

use crate::camera::lens_camera::angle_between_tilts;
use crate::camera::{CalibrationError, Correspondence, LensCamera};
use crate::geometry::{angle_between, azimuth_elevation, clockwise_angle};
use log::debug;
use nalgebra::{Matrix3, Vector2, Vector3};
use std::f64::consts::PI;

const FIELD_OF_VIEW_BISECTION_STEPS: usize = 53;

/// Largest field of view the bisection may return.
pub const MAX_FIELD_OF_VIEW: f64 = 0.999 * PI;

/// Cross products shorter than this are treated as parallel vectors.
const PARALLEL_TOLERANCE: f64 = 1e-12;

/// Offset along "up" used to carry the up direction through the solved rotation.
const UP_PROBE_STEP: f64 = 1e-8;

/// Finds the field of view at which pixels `a` and `b` are `target_angle` apart.
///
/// Bisects over `(0, 0.999π)` assuming the separation grows with the field of
/// view, which holds when the pixels lie on opposite sides of the projection
/// center. Returns the upper end when the pixels cannot be that far apart.
pub fn solve_field_of_view(
    camera: &LensCamera,
    a: &Vector2<f64>,
    b: &Vector2<f64>,
    target_angle: f64,
) -> f64 {
    let tilt_a = camera.image_point_tilt(a);
    let tilt_b = camera.image_point_tilt(b);
    let mut fov_min = 0.0;
    let mut fov_max = MAX_FIELD_OF_VIEW;
    for _ in 0..FIELD_OF_VIEW_BISECTION_STEPS {
        if fov_min == fov_max {
            break;
        }
        let fov = (fov_min + fov_max) / 2.0;
        if angle_between_tilts(&tilt_a, &tilt_b, fov) > target_angle {
            fov_max = fov;
        } else {
            fov_min = fov;
        }
    }
    (fov_min + fov_max) / 2.0
}

/// Places the image so the first two correspondences match their true directions.
///
/// Solves the field of view, the projection center and the field rotation.
///
/// # Errors
///
/// * [`CalibrationError::NotEnoughCorrespondences`] with fewer than two correspondences.
/// * [`CalibrationError::DegenerateGeometry`] if the true directions coincide or
///   are antipodal, or the two pixels map to the same direction.
///
/// On error `camera` is left untouched.
pub fn reposition_by_points(
    camera: &mut LensCamera,
    correspondences: &[Correspondence],
) -> Result<(), CalibrationError> {
    let (first, second) = match correspondences {
        [first, second, ..] => (first, second),
        _ => {
            return Err(CalibrationError::NotEnoughCorrespondences {
                required: 2,
                found: correspondences.len(),
            })
        }
    };
    align_pair(
        camera,
        (&first.image_point, &first.true_direction),
        (&second.image_point, &second.true_direction),
    )
}

/// Rotates the image so `drag_pixel` shows `target_direction` while
/// `fixed_pixel` keeps showing what it shows now.
///
/// The field of view follows the angular distance between the two.
///
/// # Errors
///
/// * [`CalibrationError::DegenerateGeometry`] if the target coincides with, or
///   is opposite to, the fixed pixel's direction, or the pixels coincide.
pub fn rotate_by_drag(
    camera: &mut LensCamera,
    fixed_pixel: &Vector2<f64>,
    drag_pixel: &Vector2<f64>,
    target_direction: &Vector3<f64>,
) -> Result<(), CalibrationError> {
    let fixed_direction = camera.image_to_direction(fixed_pixel);
    align_pair(
        camera,
        (fixed_pixel, &fixed_direction),
        (drag_pixel, target_direction),
    )
}

fn align_pair(
    camera: &mut LensCamera,
    (pixel_a, direction_a): (&Vector2<f64>, &Vector3<f64>),
    (pixel_b, direction_b): (&Vector2<f64>, &Vector3<f64>),
) -> Result<(), CalibrationError> {
    let true_a = direction_a.normalize();
    let true_b = direction_b.normalize();
    let true_cross = true_a.cross(&true_b);
    if !(true_cross.norm() > PARALLEL_TOLERANCE) {
        return Err(CalibrationError::DegenerateGeometry(
            "true directions are parallel".to_string(),
        ));
    }

    let mut work = camera.clone();
    work.state.field_of_view =
        solve_field_of_view(&work, pixel_a, pixel_b, angle_between(&true_a, &true_b));

    let image_a = work.image_to_direction(pixel_a);
    let image_b = work.image_to_direction(pixel_b);
    let image_cross = image_a.cross(&image_b);
    if !(image_cross.norm() > PARALLEL_TOLERANCE) {
        return Err(CalibrationError::DegenerateGeometry(
            "image points map to parallel directions".to_string(),
        ));
    }

    let image_basis = Matrix3::from_columns(&[image_a, image_b, image_cross]);
    let true_basis = Matrix3::from_columns(&[true_a, true_b, true_cross]);
    let image_to_true = true_basis
        * image_basis.try_inverse().ok_or_else(|| {
            CalibrationError::DegenerateGeometry("image basis is singular".to_string())
        })?;

    let old_center = work.center_direction();
    let old_up = work.up_direction();
    let new_center = (image_to_true * old_center).normalize();
    let (azimuth, elevation) = azimuth_elevation(&new_center);

    let top = (old_center + old_up * UP_PROBE_STEP).normalize();
    let desired_up = ((image_to_true * top).normalize() - new_center).normalize();

    work.state.center_azimuth = azimuth;
    work.state.center_elevation = elevation;
    work.state.field_rotation = 0.0;
    let renewed_up = work.up_direction();
    work.state.field_rotation = clockwise_angle(&renewed_up, &desired_up, &new_center);

    let state = &work.state;
    if ![
        state.field_of_view,
        state.center_azimuth,
        state.center_elevation,
        state.field_rotation,
    ]
    .iter()
    .all(|v| v.is_finite())
    {
        return Err(CalibrationError::DegenerateGeometry(
            "alignment produced non-finite parameters".to_string(),
        ));
    }

    debug!(
        "Aligned image: fov {:.4} deg, az {:.4} deg, el {:.4} deg, rot {:.4} deg",
        state.field_of_view.to_degrees(),
        state.center_azimuth.to_degrees(),
        state.center_elevation.to_degrees(),
        state.field_rotation.to_degrees()
    );

    *camera = work;
    Ok(())
}
