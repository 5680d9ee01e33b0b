//! YAML configuration of a calibration session.
//!
//! Angles in the file are in degrees; the center shift is in normalized image
//! coordinates. Only `image` and `distortion_model` are required.
//!
//! ```yaml
//! image:
//!   width: 6000
//!   height: 4000
//! distortion_model: poly3
//! bounds:
//!   center_shift_x: [-0.2, 0.2]
//!   center_shift_y: [-0.2, 0.2]
//!   field_rotation: [-180.0, 180.0]
//!   center_azimuth: [-360.0, 360.0]
//!   center_elevation: [-90.0, 90.0]
//!   distortion: [[-0.5, 0.5]]
//! optimizer:
//!   relative_tolerance: 0.001
//!   max_iterations: 20000
//!   max_restarts: 12
//! lens:
//!   maker: Samyang
//!   model: 14mm f/2.8 IF ED UMC Aspherical
//!   mount: Canon EF
//!   focal_length: 14.0
//! ```

use crate::camera::{CalibrationError, LensCamera, Resolution};
use crate::distortion::DistortionKind;
use crate::optimization::{OptimizerOptions, ParameterBounds, ParameterRange};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::io::Write;
use yaml_rust::{Yaml, YamlLoader};

/// Descriptive data written into lens profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensMetadata {
    pub maker: String,
    pub model: String,
    pub mount: String,
    /// Focal length in millimetres.
    pub focal_length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub resolution: Resolution,
    pub distortion_kind: DistortionKind,
    pub bounds: ParameterBounds,
    pub optimizer: OptimizerOptions,
    pub lens: Option<LensMetadata>,
}

impl CalibrationConfig {
    pub fn new(resolution: Resolution, distortion_kind: DistortionKind) -> Self {
        CalibrationConfig {
            resolution,
            distortion_kind,
            bounds: ParameterBounds::default(),
            optimizer: OptimizerOptions::default(),
            lens: None,
        }
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * [`CalibrationError::YamlError`] if the content is not valid YAML.
    /// * [`CalibrationError::InvalidParams`] if a field is missing or invalid.
    pub fn load_from_yaml(path: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, CalibrationError> {
        let docs = YamlLoader::load_from_str(contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CalibrationError::YamlError("empty YAML document".to_string()))?;

        let image = &doc["image"];
        let resolution = Resolution {
            width: yaml_dimension(&image["width"], "image.width")?,
            height: yaml_dimension(&image["height"], "image.height")?,
        };

        let kind_name = doc["distortion_model"].as_str().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML missing 'distortion_model'".to_string())
        })?;
        let distortion_kind = DistortionKind::from_name(kind_name).ok_or_else(|| {
            CalibrationError::InvalidParams(format!("Unknown distortion model: {kind_name}"))
        })?;

        let config = CalibrationConfig {
            resolution,
            distortion_kind,
            bounds: parse_bounds(&doc["bounds"])?,
            optimizer: parse_optimizer(&doc["optimizer"])?,
            lens: parse_lens(&doc["lens"])?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        crate::camera::validation::validate_resolution(&self.resolution)?;
        self.bounds.validate()?;
        self.optimizer.validate()?;
        if let Some(lens) = &self.lens {
            if !(lens.focal_length.is_finite() && lens.focal_length > 0.0) {
                return Err(CalibrationError::InvalidParams(
                    "lens focal_length must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// A camera with the default placement and an identity distortion model.
    pub fn initial_camera(&self) -> Result<LensCamera, CalibrationError> {
        LensCamera::with_distortion_kind(self.resolution.clone(), self.distortion_kind)
    }

    /// Renders the configuration in the layout read by [`CalibrationConfig::from_yaml_str`].
    pub fn to_yaml_string(&self) -> Result<String, CalibrationError> {
        let key = |name: &str| Value::String(name.to_string());
        let linear = |range: &ParameterRange| -> Result<Value, CalibrationError> {
            Ok(serde_yaml::to_value(vec![range.min, range.max])?)
        };
        let angular = |range: &ParameterRange| -> Result<Value, CalibrationError> {
            Ok(serde_yaml::to_value(vec![
                range.min.to_degrees(),
                range.max.to_degrees(),
            ])?)
        };

        let bounds = &self.bounds;
        let distortion_bounds = bounds
            .distortion
            .iter()
            .map(|range| vec![range.min, range.max])
            .collect::<Vec<_>>();

        let mut root = Mapping::from_iter([
            (
                key("image"),
                Value::Mapping(Mapping::from_iter([
                    (key("width"), Value::from(self.resolution.width)),
                    (key("height"), Value::from(self.resolution.height)),
                ])),
            ),
            (
                key("distortion_model"),
                Value::String(self.distortion_kind.name().to_string()),
            ),
            (
                key("bounds"),
                Value::Mapping(Mapping::from_iter([
                    (key("center_shift_x"), linear(&bounds.center_shift_x)?),
                    (key("center_shift_y"), linear(&bounds.center_shift_y)?),
                    (key("field_rotation"), angular(&bounds.field_rotation)?),
                    (key("center_azimuth"), angular(&bounds.center_azimuth)?),
                    (key("center_elevation"), angular(&bounds.center_elevation)?),
                    (key("distortion"), serde_yaml::to_value(distortion_bounds)?),
                ])),
            ),
            (key("optimizer"), serde_yaml::to_value(&self.optimizer)?),
        ]);
        if let Some(lens) = &self.lens {
            root.insert(key("lens"), serde_yaml::to_value(lens)?);
        }

        Ok(serde_yaml::to_string(&root)?)
    }

    pub fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError> {
        let yaml_string = self.to_yaml_string()?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }
}

/// Reads a YAML number, accepting both integers and reals.
pub(crate) fn yaml_f64(value: &Yaml) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

/// Reads a two-element numeric array.
pub(crate) fn yaml_pair(value: &Yaml, name: &str) -> Result<(f64, f64), CalibrationError> {
    let invalid = || CalibrationError::InvalidParams(format!("Invalid {name}: expected [a, b]"));
    match value.as_vec().map(Vec::as_slice) {
        Some([a, b]) => Ok((yaml_f64(a).ok_or_else(invalid)?, yaml_f64(b).ok_or_else(invalid)?)),
        _ => Err(invalid()),
    }
}

fn yaml_dimension(value: &Yaml, name: &str) -> Result<u32, CalibrationError> {
    value
        .as_i64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            CalibrationError::InvalidParams(format!("Invalid {name}: not a positive integer"))
        })
}

fn parse_range(
    value: &Yaml,
    name: &str,
    default: ParameterRange,
    degrees: bool,
) -> Result<ParameterRange, CalibrationError> {
    if value.is_badvalue() {
        return Ok(default);
    }
    let (min, max) = yaml_pair(value, name)?;
    Ok(if degrees {
        ParameterRange::new(min.to_radians(), max.to_radians())
    } else {
        ParameterRange::new(min, max)
    })
}

fn parse_bounds(value: &Yaml) -> Result<ParameterBounds, CalibrationError> {
    let defaults = ParameterBounds::default();
    if value.is_badvalue() {
        return Ok(defaults);
    }

    let distortion = match &value["distortion"] {
        Yaml::BadValue => defaults.distortion.clone(),
        Yaml::Array(items) => items
            .iter()
            .map(|item| parse_range(item, "bounds.distortion", defaults.distortion[0], false))
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(CalibrationError::InvalidParams(
                "Invalid bounds.distortion: expected a list of [min, max]".to_string(),
            ))
        }
    };

    Ok(ParameterBounds {
        center_shift_x: parse_range(
            &value["center_shift_x"],
            "bounds.center_shift_x",
            defaults.center_shift_x,
            false,
        )?,
        center_shift_y: parse_range(
            &value["center_shift_y"],
            "bounds.center_shift_y",
            defaults.center_shift_y,
            false,
        )?,
        field_rotation: parse_range(
            &value["field_rotation"],
            "bounds.field_rotation",
            defaults.field_rotation,
            true,
        )?,
        center_azimuth: parse_range(
            &value["center_azimuth"],
            "bounds.center_azimuth",
            defaults.center_azimuth,
            true,
        )?,
        center_elevation: parse_range(
            &value["center_elevation"],
            "bounds.center_elevation",
            defaults.center_elevation,
            true,
        )?,
        distortion,
    })
}

fn parse_optimizer(value: &Yaml) -> Result<OptimizerOptions, CalibrationError> {
    let defaults = OptimizerOptions::default();
    if value.is_badvalue() {
        return Ok(defaults);
    }
    let count = |key: &str, default: u64| -> Result<u64, CalibrationError> {
        match &value[key] {
            Yaml::BadValue => Ok(default),
            v => v.as_i64().and_then(|v| u64::try_from(v).ok()).ok_or_else(|| {
                CalibrationError::InvalidParams(format!(
                    "Invalid optimizer.{key}: not a non-negative integer"
                ))
            }),
        }
    };
    let relative_tolerance = match &value["relative_tolerance"] {
        Yaml::BadValue => defaults.relative_tolerance,
        v => yaml_f64(v).ok_or_else(|| {
            CalibrationError::InvalidParams(
                "Invalid optimizer.relative_tolerance: not a number".to_string(),
            )
        })?,
    };
    Ok(OptimizerOptions {
        relative_tolerance,
        max_iterations: count("max_iterations", defaults.max_iterations)?,
        max_restarts: count("max_restarts", defaults.max_restarts as u64)? as usize,
    })
}

fn parse_lens(value: &Yaml) -> Result<Option<LensMetadata>, CalibrationError> {
    if value.is_badvalue() {
        return Ok(None);
    }
    let text = |key: &str| value[key].as_str().unwrap_or_default().to_string();
    let focal_length = yaml_f64(&value["focal_length"]).ok_or_else(|| {
        CalibrationError::InvalidParams("Invalid lens.focal_length: not a number".to_string())
    })?;
    Ok(Some(LensMetadata {
        maker: text("maker"),
        model: text("model"),
        mount: text("mount"),
        focal_length,
    }))
}
