//! Loaders turning georeferenced polygon files into a flat list of (lon, lat) vertices
use crate::error::{Result, SyncError};
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonFormat {
    Shapefile,
    Kml,
    GeoJson,
}

impl PolygonFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "shp" => Ok(Self::Shapefile),
            "kml" => Ok(Self::Kml),
            "json" | "geojson" => Ok(Self::GeoJson),
            _ => Err(SyncError::UnsupportedFormat(format!(".{extension}"))),
        }
    }

    pub fn load(self: &Self, path: &Path) -> Result<Vec<(f64, f64)>> {
        match self {
            Self::Shapefile => {
                let bytes = fs::read(path).map_err(|e| SyncError::io(path, e))?;
                parse_shapefile(&bytes)
            }
            Self::Kml => {
                let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
                parse_kml(&content)
            }
            Self::GeoJson => {
                let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
                parse_geojson(&content)
            }
        }
    }
}

pub fn load_polygon(path: &Path) -> Result<Vec<(f64, f64)>> {
    let vertices = PolygonFormat::from_path(path)?.load(path)?;
    if vertices.is_empty() {
        return Err(SyncError::parse(
            "polygon file",
            format!("no polygons found in {}", path.display()),
        ));
    }
    Ok(vertices)
}

const SHAPEFILE_CODE: i32 = 9994;
const SHAPEFILE_HEADER_LEN: usize = 100;

fn be_i32(bytes: &[u8], at: usize) -> Option<i32> {
    Some(i32::from_be_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
}

fn le_i32(bytes: &[u8], at: usize) -> Option<i32> {
    Some(i32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
}

fn le_f64(bytes: &[u8], at: usize) -> Option<f64> {
    Some(f64::from_le_bytes(bytes.get(at..at + 8)?.try_into().ok()?))
}

fn parse_shapefile(bytes: &[u8]) -> Result<Vec<(f64, f64)>> {
    if be_i32(bytes, 0) != Some(SHAPEFILE_CODE) || bytes.len() < SHAPEFILE_HEADER_LEN {
        return Err(SyncError::parse("shapefile", "invalid file header"));
    }

    let mut vertices = vec![];
    let mut offset = SHAPEFILE_HEADER_LEN;
    while offset + 8 <= bytes.len() {
        // Record lengths are counted in 16-bit words
        let content_len = be_i32(bytes, offset + 4)
            .and_then(|words| usize::try_from(words).ok())
            .map(|words| words * 2)
            .ok_or_else(|| SyncError::parse("shapefile", "invalid record header"))?;
        let end = (offset + 8)
            .checked_add(content_len)
            .ok_or_else(|| SyncError::parse("shapefile", "invalid record header"))?;
        let content = bytes
            .get(offset + 8..end)
            .ok_or_else(|| SyncError::parse("shapefile", "truncated record"))?;
        offset = end;

        match le_i32(content, 0) {
            // null shape
            Some(0) => continue,
            // Polygon, PolygonZ, PolygonM
            Some(5) | Some(15) | Some(25) => {
                let points = extract_shape_points(content)
                    .ok_or_else(|| SyncError::parse("shapefile", "malformed polygon record"))?;
                vertices.extend(points);
            }
            Some(other) => {
                return Err(SyncError::UnsupportedFormat(format!(
                    "shapefile shape type {other}"
                )))
            }
            None => return Err(SyncError::parse("shapefile", "empty record")),
        }
    }
    Ok(vertices)
}

fn extract_shape_points(content: &[u8]) -> Option<Vec<(f64, f64)>> {
    // shape type (4) + bounding box (32)
    let num_parts = usize::try_from(le_i32(content, 36)?).ok()?;
    let num_points = usize::try_from(le_i32(content, 40)?).ok()?;
    let start = num_parts.checked_mul(4)?.checked_add(44)?;
    // Point data must fit inside the record
    if num_points.checked_mul(16)?.checked_add(start)? > content.len() {
        return None;
    }
    (0..num_points)
        .map(|i| {
            let at = start + 16 * i;
            Some((le_f64(content, at)?, le_f64(content, at + 8)?))
        })
        .collect()
}

fn parse_kml(content: &str) -> Result<Vec<(f64, f64)>> {
    let doc = roxmltree::Document::parse(content).map_err(|e| SyncError::parse("kml", e))?;

    let mut vertices = vec![];
    for boundary in doc
        .descendants()
        .filter(|n| n.has_tag_name("outerBoundaryIs"))
    {
        let coordinates = boundary
            .descendants()
            .find(|n| n.has_tag_name("coordinates"))
            .and_then(|n| n.text())
            .ok_or_else(|| SyncError::parse("kml", "polygon without coordinates"))?;

        for tuple in coordinates.split_whitespace() {
            let vertex = extract_kml_vertex(tuple)
                .ok_or_else(|| SyncError::parse("kml", format!("bad coordinate '{tuple}'")))?;
            vertices.push(vertex);
        }
    }
    Ok(vertices)
}

fn extract_kml_vertex(tuple: &str) -> Option<(f64, f64)> {
    // lon,lat[,alt]
    let mut parts = tuple.split(',');
    let lon = parts.next()?.parse().ok()?;
    let lat = parts.next()?.parse().ok()?;
    Some((lon, lat))
}

fn parse_geojson(content: &str) -> Result<Vec<(f64, f64)>> {
    let value: Value = serde_json::from_str(content).map_err(|e| SyncError::parse("geojson", e))?;
    let mut vertices = vec![];
    collect_geojson_vertices(&value, &mut vertices)?;
    Ok(vertices)
}

fn collect_geojson_vertices(value: &Value, vertices: &mut Vec<(f64, f64)>) -> Result<()> {
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            for feature in value.get("features").and_then(Value::as_array).into_iter().flatten() {
                collect_geojson_vertices(feature, vertices)?;
            }
        }
        Some("Feature") => {
            if let Some(geometry) = value.get("geometry") {
                collect_geojson_vertices(geometry, vertices)?;
            }
        }
        Some("GeometryCollection") => {
            for geometry in value.get("geometries").and_then(Value::as_array).into_iter().flatten() {
                collect_geojson_vertices(geometry, vertices)?;
            }
        }
        Some("Polygon") => {
            let exterior = value.get("coordinates").and_then(|c| c.get(0));
            vertices.extend(extract_geojson_ring(exterior)?);
        }
        Some("MultiPolygon") => {
            for polygon in value.get("coordinates").and_then(Value::as_array).into_iter().flatten() {
                vertices.extend(extract_geojson_ring(polygon.get(0))?);
            }
        }
        // points and lines do not bound an area
        _ => {}
    }
    Ok(())
}

fn extract_geojson_ring(ring: Option<&Value>) -> Result<Vec<(f64, f64)>> {
    ring.and_then(Value::as_array)
        .and_then(|positions| {
            positions
                .iter()
                .map(|p| Some((p.get(0)?.as_f64()?, p.get(1)?.as_f64()?)))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| SyncError::parse("geojson", "malformed polygon ring"))
}
