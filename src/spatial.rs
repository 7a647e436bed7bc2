mod polygon;
pub use polygon::{load_polygon, PolygonFormat};

use crate::error::{Result, SyncError};
use geo::algorithm::orient::{Direction, Orient};
use geo::{ConvexHull, MultiPoint, Point};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bounding box in the user-facing order (lat_min, lon_min, lat_max, lon_max).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Latitude ordering and coordinate ranges are checked. Longitude ordering
    /// is not, since boxes crossing the antimeridian have lon_min > lon_max.
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Result<Self> {
        for lat in [lat_min, lat_max] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(SyncError::Configuration(format!(
                    "Latitude {lat} outside [-90, 90]"
                )));
            }
        }
        for lon in [lon_min, lon_max] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(SyncError::Configuration(format!(
                    "Longitude {lon} outside [-180, 180]"
                )));
            }
        }
        if lat_min > lat_max {
            return Err(SyncError::Configuration(format!(
                "Bounding box lat_min {lat_min} is greater than lat_max {lat_max}"
            )));
        }
        Ok(Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        })
    }

    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            &[lat_min, lon_min, lat_max, lon_max] => Self::new(lat_min, lon_min, lat_max, lon_max),
            _ => Err(SyncError::Configuration(format!(
                "Bounding box needs 4 values, got {}",
                values.len()
            ))),
        }
    }

    /// The catalog expects lon_min,lat_min,lon_max,lat_max.
    pub fn to_query_value(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6},{:.6}",
            self.lon_min, self.lat_min, self.lon_max, self.lat_max
        )
    }

    pub fn from_query_value(value: &str) -> Result<Self> {
        let values = value
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SyncError::parse("bounding_box", e))?;
        match values[..] {
            [lon_min, lat_min, lon_max, lat_max] => Self::new(lat_min, lon_min, lat_max, lon_max),
            _ => Err(SyncError::parse("bounding_box", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SpatialFilter {
    #[default]
    None,
    BoundingBox(BoundingBox),
    /// Closed exterior ring of (lon, lat) vertices wound counter-clockwise.
    Polygon(Vec<(f64, f64)>),
}

impl SpatialFilter {
    pub fn resolve(bbox: Option<BoundingBox>, polygon: Option<&Path>) -> Result<Self> {
        match (bbox, polygon) {
            (Some(_), Some(_)) => Err(SyncError::Configuration(
                "Bounding box and polygon are mutually exclusive".to_string(),
            )),
            (Some(bbox), None) => Ok(Self::BoundingBox(bbox)),
            (None, Some(path)) => Self::from_vertices(&load_polygon(path)?),
            (None, None) => Ok(Self::None),
        }
    }

    /// Reduce an arbitrary vertex set to its counter-clockwise convex hull.
    pub fn from_vertices(vertices: &[(f64, f64)]) -> Result<Self> {
        Ok(Self::Polygon(convex_hull(vertices)?))
    }

    pub fn query_param(&self) -> Option<(&'static str, String)> {
        match self {
            Self::None => None,
            Self::BoundingBox(bbox) => Some(("bounding_box", bbox.to_query_value())),
            Self::Polygon(ring) => {
                let value = ring
                    .iter()
                    .map(|(x, y)| format!("{x:.6},{y:.6}"))
                    .collect::<Vec<_>>()
                    .join(",");
                Some(("polygon[]", value))
            }
        }
    }
}

/// Convex hull of `vertices` as a closed ring wound counter-clockwise.
pub fn convex_hull(vertices: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
    if vertices.len() < 3 {
        return Err(SyncError::Configuration(format!(
            "Polygon needs at least 3 vertices, got {}",
            vertices.len()
        )));
    }

    let points: MultiPoint<f64> = vertices
        .iter()
        .map(|&(x, y)| Point::new(x, y))
        .collect::<Vec<_>>()
        .into();
    let hull = points.convex_hull().orient(Direction::Default);

    let ring: Vec<(f64, f64)> = hull.exterior().coords().map(|c| (c.x, c.y)).collect();
    // A closed ring around a non-degenerate area has at least 4 coordinates
    if ring.len() < 4 {
        return Err(SyncError::Configuration(
            "Polygon vertices are collinear".to_string(),
        ));
    }
    Ok(ring)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, LineString, Polygon};

    fn signed_area(ring: &[(f64, f64)]) -> f64 {
        Polygon::new(LineString::from(ring.to_vec()), vec![]).signed_area()
    }

    #[test]
    fn test_bounding_box_clause() {
        let bbox = BoundingBox::new(40.0, -100.0, 42.0, -96.0).unwrap();
        let filter = SpatialFilter::BoundingBox(bbox);
        assert_eq!(
            filter.query_param().unwrap(),
            ("bounding_box", "-100.000000,40.000000,-96.000000,42.000000".to_string())
        );
    }

    #[test]
    fn test_bounding_box_round_trip() {
        let boxes = [
            (40.0, -100.0, 42.0, -96.0),
            (-12.5, 170.25, -3.0, -175.5),
            (-90.0, -180.0, 90.0, 180.0),
        ];
        for (lat_min, lon_min, lat_max, lon_max) in boxes {
            let bbox = BoundingBox::new(lat_min, lon_min, lat_max, lon_max).unwrap();
            let parsed = BoundingBox::from_query_value(&bbox.to_query_value()).unwrap();
            assert_eq!(parsed, bbox);
        }
    }

    #[test]
    fn test_bounding_box_validation() {
        assert!(BoundingBox::new(42.0, -100.0, 40.0, -96.0).is_err());
        assert!(BoundingBox::new(40.0, -200.0, 42.0, -96.0).is_err());
        assert!(BoundingBox::from_slice(&[1.0, 2.0, 3.0]).is_err());
        // antimeridian crossing is allowed
        assert!(BoundingBox::new(-5.0, 179.0, 5.0, -179.0).is_ok());
    }

    #[test]
    fn test_convex_hull_is_counter_clockwise() {
        let clockwise = vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
        let counter_clockwise = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        for input in [clockwise, counter_clockwise] {
            let ring = convex_hull(&input).unwrap();
            assert!(signed_area(&ring) > 0.0);
            assert_eq!(ring.first(), ring.last());
        }
    }

    #[test]
    fn test_convex_hull_drops_interior_vertices() {
        let vertices = vec![
            (-96.0, 40.0),
            (-100.0, 40.0),
            (-98.0, 41.0),
            (-96.0, 42.0),
            (-100.0, 42.0),
            (-97.5, 41.5),
        ];
        let ring = convex_hull(&vertices).unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.contains(&(-98.0, 41.0)), false);
        assert!(signed_area(&ring) > 0.0);
    }

    #[test]
    fn test_convex_hull_rejects_degenerate_input() {
        assert!(convex_hull(&[(0.0, 0.0), (1.0, 1.0)]).is_err());
    }

    #[test]
    fn test_polygon_clause() {
        let filter = SpatialFilter::from_vertices(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]).unwrap();
        let (key, value) = filter.query_param().unwrap();
        assert_eq!(key, "polygon[]");
        assert_eq!(value.split(',').count(), 8);
    }

    #[test]
    fn test_filters_are_mutually_exclusive() {
        let bbox = BoundingBox::new(40.0, -100.0, 42.0, -96.0).unwrap();
        let result = SpatialFilter::resolve(Some(bbox), Some(Path::new("region.geojson")));
        assert!(matches!(result, Err(SyncError::Configuration(_))));
        assert_eq!(SpatialFilter::resolve(None, None).unwrap(), SpatialFilter::None);
    }
}
