//! Lens profiles in the lensfun database format.

use crate::camera::{CalibrationError, LensCamera};
use crate::config::LensMetadata;
use crate::distortion::DistortionModel;
use serde::{Deserialize, Serialize};

/// Diagonal of a 36x24 mm full-frame sensor.
fn full_frame_diagonal() -> f64 {
    36f64.hypot(24.0)
}

/// Everything a lensfun `<lens>` entry needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensProfile {
    pub maker: String,
    pub model: String,
    pub mount: String,
    pub crop_factor: f64,
    pub focal_length: f64,
    /// Reduced `width:height` of the image.
    pub aspect_ratio: (u32, u32),
    /// Image center offset in normalized units, as lensfun stores it.
    pub center_x: f64,
    pub center_y: f64,
    pub distortion: DistortionModel,
}

impl LensProfile {
    /// Builds the profile of a calibrated camera.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] if the focal length is not positive.
    pub fn from_camera(camera: &LensCamera, lens: &LensMetadata) -> Result<Self, CalibrationError> {
        let crop_factor = compute_crop_factor(camera, lens.focal_length)?;
        let (width, height) = (camera.resolution.width, camera.resolution.height);
        let divisor = gcd(width, height).max(1);
        Ok(LensProfile {
            maker: lens.maker.clone(),
            model: lens.model.clone(),
            mount: lens.mount.clone(),
            crop_factor,
            focal_length: lens.focal_length,
            aspect_ratio: (width / divisor, height / divisor),
            center_x: camera.state.center_shift_x,
            center_y: -camera.state.center_shift_y,
            distortion: camera.state.distortion,
        })
    }

    /// Renders the profile as a lensfun `<lens>` XML element.
    pub fn to_lensfun_xml(&self) -> String {
        let distortion = match self.distortion {
            DistortionModel::Poly3 { k1 } => format!("k1=\"{}\"", format_general(k1, 7)),
            DistortionModel::Poly5 { k1, k2 } => format!(
                "k1=\"{}\" k2=\"{}\"",
                format_general(k1, 7),
                format_general(k2, 7)
            ),
            DistortionModel::PTLens { a, b, c } => format!(
                "a=\"{}\" b=\"{}\" c=\"{}\"",
                format_general(a, 7),
                format_general(b, 7),
                format_general(c, 7)
            ),
        };

        format!(
            "<lens>\n\
             \x20   <maker>{maker}</maker>\n\
             \x20   <model>{model}</model>\n\
             \x20   <mount>{mount}</mount>\n\
             \x20   <cropfactor>{crop}</cropfactor>\n\
             \x20   <aspect-ratio>{aspect_w}:{aspect_h}</aspect-ratio>\n\
             \x20   <center x=\"{center_x:.7}\" y=\"{center_y:.7}\"/>\n\
             \x20   <calibration>\n\
             \x20       <distortion model=\"{kind}\" focal=\"{focal}\" {distortion}/>\n\
             \x20   </calibration>\n\
             </lens>\n",
            maker = escape_xml(&self.maker),
            model = escape_xml(&self.model),
            mount = escape_xml(&self.mount),
            crop = format_general(self.crop_factor, 7),
            aspect_w = self.aspect_ratio.0,
            aspect_h = self.aspect_ratio.1,
            center_x = self.center_x,
            center_y = self.center_y,
            kind = self.distortion.kind().name(),
            focal = format_general(self.focal_length, 7),
        )
    }
}

/// Crop factor of the sensor that gives `camera`'s field of view at `focal_length` mm.
///
/// # Errors
///
/// * [`CalibrationError::InvalidParams`] if the focal length is not positive.
pub fn compute_crop_factor(camera: &LensCamera, focal_length: f64) -> Result<f64, CalibrationError> {
    if !(focal_length.is_finite() && focal_length > 0.0) {
        return Err(CalibrationError::InvalidParams(
            "focal length must be positive".to_string(),
        ));
    }
    let width = f64::from(camera.resolution.width);
    let height = f64::from(camera.resolution.height);
    let smaller_side = 2.0 * focal_length * (camera.state.field_of_view / 2.0).tan();
    let larger_side = smaller_side * width.max(height) / width.min(height);
    Ok(full_frame_diagonal() / smaller_side.hypot(larger_side))
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// `printf("%.{precision}g")`-style formatting with trailing zeros removed.
fn format_general(value: f64, precision: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let precision = precision.max(1);
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= precision as i32 {
        let formatted = format!("{:.*e}", precision - 1, value);
        match formatted.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", trim_fraction(mantissa), exp),
            None => formatted,
        }
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value))
    }
}

fn trim_fraction(number: &str) -> String {
    if number.contains('.') {
        number
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        number.to_string()
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
