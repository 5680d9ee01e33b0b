//! Sky-frame geometry helpers.
//!
//! Directions live in an observer frame where azimuth is measured with
//! `atan2(y, -x)` and elevation is the angle above the `xy` plane. The
//! functions here are pure and shared by the projection, alignment and
//! reporting code.

use nalgebra::{Rotation3, Unit, Vector3};

/// Clamps a cosine or sine into `[-1, 1]` before it reaches `acos`/`asin`.
pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

/// Unit direction of the given azimuth and elevation (radians).
pub fn direction_from_azimuth_elevation(azimuth: f64, elevation: f64) -> Vector3<f64> {
    let (sin_el, cos_el) = elevation.sin_cos();
    let (sin_az, cos_az) = azimuth.sin_cos();
    Vector3::new(-cos_el * cos_az, cos_el * sin_az, sin_el)
}

/// Derivative of [`direction_from_azimuth_elevation`] with respect to elevation.
///
/// This is the "up" vector of an image whose field rotation is zero.
pub fn elevation_tangent(azimuth: f64, elevation: f64) -> Vector3<f64> {
    let (sin_el, cos_el) = elevation.sin_cos();
    let (sin_az, cos_az) = azimuth.sin_cos();
    Vector3::new(sin_el * cos_az, -sin_el * sin_az, cos_el)
}

/// Recovers `(azimuth, elevation)` in radians from a direction.
///
/// The direction does not need to be normalized; a zero vector yields `(0, 0)`.
pub fn azimuth_elevation(direction: &Vector3<f64>) -> (f64, f64) {
    let norm = direction.norm();
    if norm == 0.0 || !norm.is_finite() {
        return (0.0, 0.0);
    }
    let unit = direction / norm;
    let elevation = clamp_unit(unit.z).asin();
    let azimuth = unit.y.atan2(-unit.x);
    (azimuth, elevation)
}

/// Angle between two unit directions, in radians.
pub fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    clamp_unit(a.dot(b)).acos()
}

/// Rotates `vector` by `angle` (right-handed) about `axis`.
pub fn rotate_about(vector: &Vector3<f64>, axis: &Vector3<f64>, angle: f64) -> Vector3<f64> {
    Rotation3::from_axis_angle(&Unit::new_normalize(*axis), angle) * vector
}

/// Angle `theta` such that rotating `from` by `-theta` about `axis` gives `to`.
///
/// Both vectors are expected to be perpendicular to `axis`. Used to turn a
/// desired "up" vector into a field rotation.
pub fn clockwise_angle(from: &Vector3<f64>, to: &Vector3<f64>, axis: &Vector3<f64>) -> f64 {
    let cross = from.cross(to);
    let cos = from.dot(to);
    let sign = if cross.dot(axis) > 0.0 { -1.0 } else { 1.0 };
    (sign * cross.norm()).atan2(cos)
}

/// Centers of the cells of a `columns x rows` grid laid over a `width x height` image.
#[cfg(test)]
pub(crate) fn pixel_grid(
    width: f64,
    height: f64,
    columns: usize,
    rows: usize,
) -> Vec<nalgebra::Vector2<f64>> {
    let (cell_w, cell_h) = (width / columns as f64, height / rows as f64);
    (0..rows)
        .flat_map(|row| {
            (0..columns).map(move |column| {
                nalgebra::Vector2::new((column as f64 + 0.5) * cell_w, (row as f64 + 0.5) * cell_h)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_direction_conventions() {
        let north = direction_from_azimuth_elevation(0.0, 0.0);
        assert_relative_eq!(north, Vector3::new(-1.0, 0.0, 0.0), epsilon = 1e-15);

        let east = direction_from_azimuth_elevation(FRAC_PI_2, 0.0);
        assert_relative_eq!(east, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-15);

        let zenith = direction_from_azimuth_elevation(1.0, FRAC_PI_2);
        assert_relative_eq!(zenith.z, 1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_azimuth_elevation_inverse() {
        for &(az, el) in &[(0.3, 0.2), (-2.0, -0.7), (3.0, 1.2), (1.0, 0.0)] {
            let dir = direction_from_azimuth_elevation(az, el);
            let (az2, el2) = azimuth_elevation(&dir);
            assert_relative_eq!(az, az2, epsilon = 1e-12);
            assert_relative_eq!(el, el2, epsilon = 1e-12);
        }
        assert_eq!(azimuth_elevation(&Vector3::zeros()), (0.0, 0.0));
    }

    #[test]
    fn test_elevation_tangent_is_orthonormal() {
        let (az, el) = (0.8, 0.4);
        let center = direction_from_azimuth_elevation(az, el);
        let up = elevation_tangent(az, el);
        assert_relative_eq!(up.norm(), 1.0, epsilon = 1e-15);
        assert_relative_eq!(center.dot(&up), 0.0, epsilon = 1e-15);

        let h = 1e-6;
        let numeric = (direction_from_azimuth_elevation(az, el + h)
            - direction_from_azimuth_elevation(az, el - h))
            / (2.0 * h);
        assert_relative_eq!(numeric, up, epsilon = 1e-8);
    }

    #[test]
    fn test_angle_between_clamps() {
        let a = Vector3::new(1.0, 0.0, 0.0);
        // Slightly longer than unit, dot exceeds 1.
        let b = Vector3::new(1.0 + 1e-15, 0.0, 0.0);
        assert_eq!(angle_between(&a, &b), 0.0);
        assert_relative_eq!(angle_between(&a, &-a), PI, epsilon = 1e-15);
    }

    #[test]
    fn test_clockwise_angle_recovers_rotation() {
        let axis = direction_from_azimuth_elevation(0.5, 0.3);
        let from = elevation_tangent(0.5, 0.3);
        for &theta in &[0.0, 0.4, -1.2, 2.9, -3.0] {
            let to = rotate_about(&from, &axis, -theta);
            assert_relative_eq!(clockwise_angle(&from, &to, &axis), theta, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pixel_grid_covers_image() {
        let grid = pixel_grid(3000.0, 2000.0, 3, 2);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0], Vector2::new(500.0, 500.0));
        assert_eq!(grid[2], Vector2::new(2500.0, 500.0));
        assert_eq!(grid[5], Vector2::new(2500.0, 1500.0));
    }
}
