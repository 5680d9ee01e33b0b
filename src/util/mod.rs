//! Calibration reports and file exports.

use crate::camera::{
    CalibrationError, CalibrationState, CameraModel, Correspondence, LensCamera, Resolution,
};
use crate::geometry::angle_between;
use crate::optimization::OptimizationSummary;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::Path;

pub mod lensfun;
pub mod points;

pub use lensfun::{compute_crop_factor, LensProfile};
pub use points::{export_points_csv, import_points_csv, read_points_csv, write_points_csv};

/// Creates the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &str) -> Result<(), CalibrationError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Summary statistics of angular residuals, in degrees.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AngularError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for AngularError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Angular Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

/// Residual of one correspondence. Angles are in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointResidual {
    pub label: String,
    pub image_x: f64,
    pub image_y: f64,
    /// Angle between the true direction and the projection center.
    pub distance_from_center: f64,
    /// Angle between the true direction and the direction the camera shows.
    pub error: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub resolution: Resolution,
    pub state: CalibrationState,
    pub residuals: Vec<PointResidual>,
    pub statistics: AngularError,
    pub optimization: Option<OptimizationSummary>,
    pub profile: Option<LensProfile>,
}

impl CalibrationReport {
    /// Builds the report of `camera` over `correspondences`.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::NotEnoughCorrespondences`] if `correspondences` is empty.
    pub fn new(
        camera: &LensCamera,
        correspondences: &[Correspondence],
    ) -> Result<Self, CalibrationError> {
        let residuals = compute_angular_errors(camera, correspondences)?;
        let errors: Vec<f64> = residuals.iter().map(|r| r.error).collect();
        let statistics = compute_error_statistics(&errors)?;
        Ok(CalibrationReport {
            resolution: camera.get_resolution(),
            state: camera.state.clone(),
            residuals,
            statistics,
            optimization: None,
            profile: None,
        })
    }

    pub fn with_optimization(mut self, summary: OptimizationSummary) -> Self {
        self.optimization = Some(summary);
        self
    }

    pub fn with_profile(mut self, profile: LensProfile) -> Self {
        self.profile = Some(profile);
        self
    }
}

/// Angular residual of every correspondence, in input order.
///
/// # Errors
///
/// * [`CalibrationError::NotEnoughCorrespondences`] if `correspondences` is empty.
pub fn compute_angular_errors(
    camera: &LensCamera,
    correspondences: &[Correspondence],
) -> Result<Vec<PointResidual>, CalibrationError> {
    if correspondences.is_empty() {
        return Err(CalibrationError::NotEnoughCorrespondences {
            required: 1,
            found: 0,
        });
    }
    let center = camera.center_direction();
    Ok(correspondences
        .iter()
        .map(|c| {
            let shown = camera.image_to_direction(&c.image_point);
            PointResidual {
                label: c.label.clone(),
                image_x: c.image_point.x,
                image_y: c.image_point.y,
                distance_from_center: angle_between(&c.true_direction, &center).to_degrees(),
                error: angle_between(&c.true_direction, &shown).to_degrees(),
            }
        })
        .collect())
}

pub fn compute_error_statistics(errors: &[f64]) -> Result<AngularError, CalibrationError> {
    if errors.is_empty() {
        return Err(CalibrationError::NotEnoughCorrespondences {
            required: 1,
            found: 0,
        });
    }

    let n = errors.len() as f64;
    let mean = errors.iter().sum::<f64>() / n;
    let variance = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let rmse = (errors.iter().map(|x| x.powi(2)).sum::<f64>() / n).sqrt();
    let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    let mut sorted = errors.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    Ok(AngularError {
        rmse,
        min,
        max,
        mean,
        stddev: variance.sqrt(),
        median,
    })
}

pub fn export_report_json(report: &CalibrationReport, path: &str) -> Result<(), CalibrationError> {
    ensure_parent_dir(path)?;
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    info!("Saved calibration report to {}", path);
    Ok(())
}

pub fn display_report(report: &CalibrationReport) {
    let state = &report.state;
    println!("\n📷 Calibrated Parameters:");
    println!(
        "  Image: {}x{}",
        report.resolution.width, report.resolution.height
    );
    println!(
        "  Center shift: ({:.6}, {:.6})",
        state.center_shift_x, state.center_shift_y
    );
    println!("  Field rotation: {:.4}°", state.field_rotation.to_degrees());
    println!(
        "  Center: azimuth {:.4}°, elevation {:.4}°",
        state.center_azimuth.to_degrees(),
        state.center_elevation.to_degrees()
    );
    println!("  Field of view: {:.4}°", state.field_of_view.to_degrees());
    if state.distortion.is_identity() {
        println!("  Distortion: none ({})", state.distortion.kind());
    } else {
        println!("  Distortion: {}", state.distortion);
    }

    if let Some(summary) = &report.optimization {
        println!("\n⚙️  Optimization:");
        println!("  Status: {:?}", summary.status);
        println!("  Initial cost: {:.8e}", summary.initial_cost);
        println!("  Final cost: {:.8e}", summary.final_cost);
        println!(
            "  Iterations: {} ({} restarts, {} evaluations)",
            summary.iterations, summary.restarts, summary.evaluations
        );
    }

    println!("\n🎯 Point Residuals:");
    println!(
        "  {:<24} | {:>10} | {:>10} | {:>12} | {:>10}",
        "Object", "X", "Y", "From center", "Error"
    );
    println!("  {:-<24}-+-{:-<10}-+-{:-<10}-+-{:-<12}-+-{:-<10}", "", "", "", "", "");
    for residual in &report.residuals {
        println!(
            "  {:<24} | {:>10.2} | {:>10.2} | {:>11.4}° | {:>9.5}°",
            residual.label,
            residual.image_x,
            residual.image_y,
            residual.distance_from_center,
            residual.error
        );
    }

    let stats = &report.statistics;
    println!("\nAngular Error Statistics:");
    println!("  Mean: {:.8}°", stats.mean);
    println!("  RMSE: {:.8}°", stats.rmse);
    println!("  Min: {:.8}°", stats.min);
    println!("  Max: {:.8}°", stats.max);
    println!("  Std Dev: {:.8}°", stats.stddev);
    println!("  Median: {:.8}°", stats.median);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distortion::DistortionModel;
    use crate::geometry::pixel_grid;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn camera() -> LensCamera {
        LensCamera::new(
            Resolution {
                width: 3000,
                height: 2000,
            },
            CalibrationState {
                center_azimuth: 0.7,
                center_elevation: 0.4,
                field_of_view: 1.0,
                distortion: DistortionModel::Poly3 { k1: 0.05 },
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_error_statistics() {
        let stats = compute_error_statistics(&[3.0, 1.0, 2.0, 4.0]).unwrap();
        assert_relative_eq!(stats.mean, 2.5);
        assert_relative_eq!(stats.median, 2.5);
        assert_relative_eq!(stats.min, 1.0);
        assert_relative_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.rmse, 7.5f64.sqrt());
        assert_relative_eq!(stats.stddev, 1.25f64.sqrt());

        let odd = compute_error_statistics(&[5.0, 1.0, 2.0]).unwrap();
        assert_relative_eq!(odd.median, 2.0);

        assert!(compute_error_statistics(&[]).is_err());
    }

    #[test]
    fn test_exact_correspondences_have_no_error() {
        let camera = camera();
        let correspondences: Vec<Correspondence> = pixel_grid(3000.0, 2000.0, 2, 2)
            .into_iter()
            .enumerate()
            .map(|(i, pixel)| {
                Correspondence::new(format!("p{i}"), pixel, camera.image_to_direction(&pixel))
            })
            .collect();

        let report = CalibrationReport::new(&camera, &correspondences).unwrap();
        assert_eq!(report.residuals.len(), correspondences.len());
        assert!(report.statistics.max < 1e-6);
        for residual in &report.residuals {
            assert!(residual.distance_from_center >= 0.0);
            assert!(residual.distance_from_center < 60.0);
        }
    }

    #[test]
    fn test_residual_of_offset_direction() {
        let camera = camera();
        let center_pixel = camera.direction_to_pixel(&camera.center_direction()).unwrap();
        let shown = camera.image_to_direction(&center_pixel);
        let offset = crate::geometry::rotate_about(&shown, &camera.up_direction(), 0.01);
        let correspondences = vec![Correspondence::new("c", center_pixel, offset)];

        let residuals = compute_angular_errors(&camera, &correspondences).unwrap();
        assert_relative_eq!(residuals[0].error, 0.01f64.to_degrees(), epsilon = 1e-9);
        assert_relative_eq!(residuals[0].distance_from_center, 0.01f64.to_degrees(), epsilon = 1e-6);
        assert!(compute_angular_errors(&camera, &[]).is_err());
    }

    #[test]
    fn test_export_report_json() {
        let camera = camera();
        let pixel = Vector2::new(100.0, 200.0);
        let correspondences = vec![Correspondence::new(
            "Vega",
            pixel,
            camera.image_to_direction(&pixel),
        )];
        let report = CalibrationReport::new(&camera, &correspondences).unwrap();

        let path = "output/report_test/report.json";
        export_report_json(&report, path).unwrap();
        let text = fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["resolution"]["width"], 3000);
        assert_eq!(value["residuals"][0]["label"], "Vega");
        assert_eq!(value["state"]["distortion"]["model"], "poly3");
        assert!(value["optimization"].is_null());
    }
}
