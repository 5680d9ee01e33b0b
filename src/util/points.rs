//! CSV import and export of picked points.
//!
//! The columns are `Object name, Localized object name, Image position X,
//! Image position Y, Exact object azimuth, Exact object elevation`. Angles are
//! in degrees with the azimuth in `[0, 360)`; objects without a known direction
//! are written with `NaN` angles.

use crate::camera::{CalibrationError, DirectionTable, PickedPoint, SkyDirectionResolver};
use crate::geometry::{azimuth_elevation, direction_from_azimuth_elevation};
use log::{info, warn};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Serialize, Deserialize)]
struct PointRecord {
    #[serde(rename = "Object name")]
    name: String,
    #[serde(rename = "Localized object name")]
    localized_name: String,
    #[serde(rename = "Image position X")]
    x: f64,
    #[serde(rename = "Image position Y")]
    y: f64,
    #[serde(rename = "Exact object azimuth")]
    azimuth: f64,
    #[serde(rename = "Exact object elevation")]
    elevation: f64,
}

/// Writes `points` as CSV, with the directions `resolver` reports for them.
pub fn write_points_csv<W, R>(
    writer: W,
    points: &[PickedPoint],
    resolver: &R,
) -> Result<(), CalibrationError>
where
    W: Write,
    R: SkyDirectionResolver + ?Sized,
{
    let mut csv_writer = csv::Writer::from_writer(writer);
    for point in points {
        let (azimuth, elevation) = match resolver.resolve(&point.label) {
            Some(direction) => {
                let (az, el) = azimuth_elevation(&direction);
                let az = az.to_degrees();
                (if az < 0.0 { az + 360.0 } else { az }, el.to_degrees())
            }
            None => {
                warn!("Failed to find object {}, exporting it without a direction", point.label);
                (f64::NAN, f64::NAN)
            }
        };
        csv_writer.serialize(PointRecord {
            name: point.label.clone(),
            localized_name: point.localized_label.clone(),
            x: point.image_point.x,
            y: point.image_point.y,
            azimuth,
            elevation,
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Reads points written by [`write_points_csv`].
///
/// Returns the points in file order and a table with the directions of those
/// rows whose angles are finite.
pub fn read_points_csv<R: Read>(
    reader: R,
) -> Result<(Vec<PickedPoint>, DirectionTable), CalibrationError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut points = Vec::new();
    let mut directions = DirectionTable::new();
    for result in csv_reader.deserialize() {
        let record: PointRecord = result?;
        if record.azimuth.is_finite() && record.elevation.is_finite() {
            directions.insert(
                record.name.clone(),
                direction_from_azimuth_elevation(
                    record.azimuth.to_radians(),
                    record.elevation.to_radians(),
                ),
            );
        }
        points.push(PickedPoint {
            label: record.name,
            localized_label: record.localized_name,
            image_point: Vector2::new(record.x, record.y),
        });
    }
    Ok((points, directions))
}

pub fn export_points_csv<R: SkyDirectionResolver + ?Sized>(
    path: &str,
    points: &[PickedPoint],
    resolver: &R,
) -> Result<(), CalibrationError> {
    let file = std::fs::File::create(path)?;
    write_points_csv(file, points, resolver)?;
    info!("Exported {} points to {}", points.len(), path);
    Ok(())
}

pub fn import_points_csv(path: &str) -> Result<(Vec<PickedPoint>, DirectionTable), CalibrationError> {
    let file = std::fs::File::open(path)?;
    let (points, directions) = read_points_csv(file)?;
    info!(
        "Imported {} points ({} with directions) from {}",
        points.len(),
        directions.len(),
        path
    );
    Ok((points, directions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::resolve_correspondences;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_points_csv_round_trip() {
        let mut table = DirectionTable::new();
        let vega = direction_from_azimuth_elevation(-0.5, 0.9);
        let deneb = direction_from_azimuth_elevation(2.0, 0.3);
        table.insert("Vega", vega);
        table.insert("Deneb", deneb);

        let mut altair = PickedPoint::new("Altair", Vector2::new(5.0, 6.0));
        altair.localized_label = "Альтаир".to_string();
        let points = vec![
            PickedPoint::new("Vega", Vector2::new(100.5, 200.25)),
            altair,
            PickedPoint::new("Deneb", Vector2::new(1200.0, 80.0)),
        ];

        let mut buffer = Vec::new();
        write_points_csv(&mut buffer, &points, &table).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with(
            "Object name,Localized object name,Image position X,Image position Y,Exact object azimuth,Exact object elevation\n"
        ));
        assert!(text.contains("Altair,Альтаир,5.0,6.0,NaN,NaN"));

        let (read, directions) = read_points_csv(buffer.as_slice()).unwrap();
        assert_eq!(read, points);
        assert_eq!(directions.len(), 2);
        assert!(directions.resolve("Altair").is_none());
        assert_relative_eq!(directions.resolve("Vega").unwrap(), vega, epsilon = 1e-12);
        assert_relative_eq!(directions.resolve("Deneb").unwrap(), deneb, epsilon = 1e-12);

        let resolved = resolve_correspondences(&read, &directions);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_exported_azimuth_is_positive() {
        let mut table = DirectionTable::new();
        table.insert("West", Vector3::new(0.0, -1.0, 0.0));
        let points = vec![PickedPoint::new("West", Vector2::new(1.0, 2.0))];

        let mut buffer = Vec::new();
        write_points_csv(&mut buffer, &points, &table).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let row = text.lines().nth(1).unwrap();
        let azimuth: f64 = row.split(',').nth(4).unwrap().parse().unwrap();
        assert_relative_eq!(azimuth, 270.0, epsilon = 1e-12);
    }

    #[test]
    fn test_import_sample_points() {
        let (points, directions) = import_points_csv("samples/points.csv").unwrap();
        assert!(points.len() >= 3);
        assert_eq!(directions.len(), points.len());
    }
}
