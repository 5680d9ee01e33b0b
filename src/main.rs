//! Lens calibration from picked sky points.
//!
//! Usage:
//! ```bash
//! cargo run --release -- \
//!   --config samples/calibration.yaml \
//!   --points samples/points.csv \
//!   --optimize \
//!   --report output/report.json \
//!   --output output/camera.yaml
//! ```

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use lens_distortion_estimator::camera::{resolve_correspondences, CameraModel};
use lens_distortion_estimator::optimization::{optimize_calibration, CancellationToken};
use lens_distortion_estimator::util::{self, CalibrationReport, LensProfile};
use lens_distortion_estimator::{alignment, CalibrationConfig};
use log::{error, info, warn};
use std::path::{Path, PathBuf};

/// Estimate orientation, field of view and lens distortion of a sky photograph
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the calibration config file
    #[arg(short, long)]
    config: PathBuf,

    /// CSV file with the picked points and their sky directions
    #[arg(short, long)]
    points: PathBuf,

    /// Refine all parameters with Nelder–Mead after two-point alignment
    #[arg(long)]
    optimize: bool,

    /// Write the calibration report as JSON
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Write the calibrated camera as YAML
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the effective configuration back as YAML
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn path_str(path: &Path) -> Result<&str, Box<dyn std::error::Error>> {
    path.to_str()
        .ok_or_else(|| format!("Invalid path string: {path:?}").into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        // error;warn;info;debug;trace
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    info!("Config: {:?}", cli.config);
    info!("Points: {:?}", cli.points);

    let config = CalibrationConfig::load_from_yaml(path_str(&cli.config)?)?;
    info!(
        "Image {}x{}, distortion model {}",
        config.resolution.width, config.resolution.height, config.distortion_kind
    );

    let (points, directions) = util::import_points_csv(path_str(&cli.points)?)?;
    let correspondences = resolve_correspondences(&points, &directions);
    if correspondences.len() < points.len() {
        warn!(
            "{} of {} points have no sky direction and are ignored",
            points.len() - correspondences.len(),
            points.len()
        );
    }

    let mut camera = config.initial_camera()?;
    alignment::reposition_by_points(&mut camera, &correspondences)?;
    info!(
        "Two-point alignment: field of view {:.4}°",
        camera.state.field_of_view.to_degrees()
    );

    let mut summary = None;
    if cli.optimize {
        let cancel = CancellationToken::new();
        match optimize_calibration(
            &mut camera,
            &correspondences,
            &config.bounds,
            &config.optimizer,
            &cancel,
            true,
        ) {
            Ok(result) => {
                info!("Optimization completed successfully!");
                summary = Some(result);
            }
            Err(e) => {
                error!("Optimization failed: {:?}", e);
                info!("Continuing with two-point alignment results...");
            }
        }
    }

    let mut report = CalibrationReport::new(&camera, &correspondences)?;
    if let Some(summary) = summary {
        report = report.with_optimization(summary);
    }
    if let Some(lens) = &config.lens {
        report = report.with_profile(LensProfile::from_camera(&camera, lens)?);
    }
    util::display_report(&report);
    info!("{:?}", report.statistics);

    if let Some(profile) = &report.profile {
        println!("\n🔭 Lensfun profile:");
        print!("{}", profile.to_lensfun_xml());
    }

    if let Some(path) = &cli.report {
        util::export_report_json(&report, path_str(path)?)?;
    }
    if let Some(path) = &cli.output {
        let path = path_str(path)?;
        util::ensure_parent_dir(path)?;
        camera.save_to_yaml(path)?;
        info!("Saved calibrated camera to {}", path);
    }
    if let Some(path) = &cli.save_config {
        let path = path_str(path)?;
        util::ensure_parent_dir(path)?;
        config.save_to_yaml(path)?;
        info!("Saved configuration to {}", path);
    }

    Ok(())
}
