//! Image-to-sky point correspondences.

use log::warn;
use nalgebra::{Vector2, Vector3};
use std::collections::HashMap;

/// A pixel position paired with the true direction of the object seen there.
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondence {
    pub label: String,
    pub image_point: Vector2<f64>,
    /// Unit direction in the sky frame.
    pub true_direction: Vector3<f64>,
}

impl Correspondence {
    pub fn new(label: impl Into<String>, image_point: Vector2<f64>, direction: Vector3<f64>) -> Self {
        Correspondence {
            label: label.into(),
            image_point,
            true_direction: direction.normalize(),
        }
    }
}

/// An object picked on the image whose sky direction is not known yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PickedPoint {
    pub label: String,
    pub localized_label: String,
    pub image_point: Vector2<f64>,
}

impl PickedPoint {
    pub fn new(label: impl Into<String>, image_point: Vector2<f64>) -> Self {
        let label = label.into();
        PickedPoint {
            localized_label: label.clone(),
            label,
            image_point,
        }
    }
}

/// Looks up the current true direction of a named sky object.
pub trait SkyDirectionResolver {
    /// Returns a unit direction, or `None` if the object cannot be found.
    fn resolve(&self, label: &str) -> Option<Vector3<f64>>;
}

/// A fixed label → direction table.
#[derive(Debug, Clone, Default)]
pub struct DirectionTable {
    directions: HashMap<String, Vector3<f64>>,
}

impl DirectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, direction: Vector3<f64>) {
        self.directions.insert(label.into(), direction.normalize());
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }
}

impl SkyDirectionResolver for DirectionTable {
    fn resolve(&self, label: &str) -> Option<Vector3<f64>> {
        self.directions.get(label).copied()
    }
}

/// Resolves every picked point, keeping their order.
///
/// Points the resolver does not know, or resolves to a non-finite or zero
/// vector, are skipped with a warning.
pub fn resolve_correspondences<R: SkyDirectionResolver + ?Sized>(
    points: &[PickedPoint],
    resolver: &R,
) -> Vec<Correspondence> {
    points
        .iter()
        .filter_map(|point| match resolver.resolve(&point.label) {
            Some(dir) if dir.iter().all(|v| v.is_finite()) && dir.norm() > 0.0 => Some(
                Correspondence::new(point.label.clone(), point.image_point, dir),
            ),
            _ => {
                warn!("Failed to find object {}, skipping it", point.label);
                None
            }
        })
        .collect()
}
