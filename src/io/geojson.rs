//! GeoJSON FeatureCollection reader and writer.
//!
//! Coordinates beyond x/y are ignored on read. Features with a null
//! geometry carry nothing to clip and are skipped.

use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use serde_json::{json, Map, Value};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

use super::ColumnSchema;
use crate::error::{Error, Result};
use crate::models::{AttrValue, Feature, FeatureCollection};

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidGeoJson(message.into())
}

/// Read a GeoJSON FeatureCollection file
pub fn read_geojson(path: &Path) -> Result<FeatureCollection> {
    if !path.exists() {
        return Err(Error::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let value: Value = serde_json::from_reader(reader)?;
    let collection = parse_collection(&value)?;
    debug!("Read {} features from {}", collection.len(), path.display());
    Ok(collection)
}

pub fn parse_collection(value: &Value) -> Result<FeatureCollection> {
    if value.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(invalid("top-level object is not a FeatureCollection"));
    }
    let features = value
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("FeatureCollection has no features array"))?;

    let mut columns: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(features.len());
    let mut skipped = 0;

    for feature in features {
        let geometry = match feature.get("geometry") {
            None | Some(Value::Null) => {
                skipped += 1;
                continue;
            }
            Some(g) => parse_geometry(g)?,
        };

        let mut row = Feature::new(geometry);
        if let Some(properties) = feature.get("properties").and_then(Value::as_object) {
            for (key, value) in properties {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
                row.set(key.as_str(), parse_value(value));
            }
        }
        out.push(row);
    }

    if skipped > 0 {
        warn!("Skipped {} features without geometry", skipped);
    }

    let mut collection = FeatureCollection::new(columns);
    collection.features = out;
    Ok(collection)
}

fn parse_value(value: &Value) -> AttrValue {
    match value {
        Value::Null => AttrValue::Null,
        Value::Bool(b) => AttrValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttrValue::Int(i),
            None => n.as_f64().map(AttrValue::Float).unwrap_or(AttrValue::Null),
        },
        Value::String(s) => AttrValue::Text(s.clone()),
        // nested values are kept as their JSON text
        other => AttrValue::Text(other.to_string()),
    }
}

fn parse_coord(value: &Value) -> Result<Coord<f64>> {
    let position = value
        .as_array()
        .filter(|p| p.len() >= 2)
        .ok_or_else(|| invalid("position must have at least two numbers"))?;
    match (position[0].as_f64(), position[1].as_f64()) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => Err(invalid("position contains a non-numeric value")),
    }
}

fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| invalid(format!("{} must be an array", what)))
}

fn parse_line(value: &Value) -> Result<LineString<f64>> {
    let coords = as_array(value, "line coordinates")?
        .iter()
        .map(parse_coord)
        .collect::<Result<Vec<_>>>()?;
    Ok(LineString::new(coords))
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let mut rings = as_array(value, "polygon rings")?
        .iter()
        .map(parse_line)
        .collect::<Result<Vec<_>>>()?;
    if rings.is_empty() {
        return Ok(Polygon::new(LineString::new(vec![]), vec![]));
    }
    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}

pub fn parse_geometry(value: &Value) -> Result<Geometry<f64>> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("geometry has no type"))?;

    if kind == "GeometryCollection" {
        let members = value
            .get("geometries")
            .ok_or_else(|| invalid("GeometryCollection has no geometries"))?;
        let members = as_array(members, "geometries")?
            .iter()
            .map(parse_geometry)
            .collect::<Result<Vec<_>>>()?;
        return Ok(Geometry::GeometryCollection(GeometryCollection(members)));
    }

    let coordinates = value
        .get("coordinates")
        .ok_or_else(|| invalid(format!("{} has no coordinates", kind)))?;

    let geometry = match kind {
        "Point" => Geometry::Point(Point::from(parse_coord(coordinates)?)),
        "MultiPoint" => Geometry::MultiPoint(MultiPoint::new(
            as_array(coordinates, "MultiPoint coordinates")?
                .iter()
                .map(|c| parse_coord(c).map(Point::from))
                .collect::<Result<Vec<_>>>()?,
        )),
        "LineString" => Geometry::LineString(parse_line(coordinates)?),
        "MultiLineString" => Geometry::MultiLineString(MultiLineString::new(
            as_array(coordinates, "MultiLineString coordinates")?
                .iter()
                .map(parse_line)
                .collect::<Result<Vec<_>>>()?,
        )),
        "Polygon" => Geometry::Polygon(parse_polygon(coordinates)?),
        "MultiPolygon" => Geometry::MultiPolygon(MultiPolygon::new(
            as_array(coordinates, "MultiPolygon coordinates")?
                .iter()
                .map(parse_polygon)
                .collect::<Result<Vec<_>>>()?,
        )),
        other => return Err(invalid(format!("unsupported geometry type '{}'", other))),
    };
    Ok(geometry)
}

fn coord_value(c: &Coord<f64>) -> Value {
    json!([c.x, c.y])
}

fn line_value(line: &LineString<f64>) -> Value {
    Value::Array(line.coords().map(coord_value).collect())
}

fn polygon_value(polygon: &Polygon<f64>) -> Value {
    let mut rings = vec![line_value(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(line_value));
    Value::Array(rings)
}

pub fn geometry_to_value(geometry: &Geometry<f64>) -> Value {
    match geometry {
        Geometry::Point(p) => json!({ "type": "Point", "coordinates": coord_value(&p.0) }),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": mp.iter().map(|p| coord_value(&p.0)).collect::<Vec<_>>(),
        }),
        Geometry::LineString(ls) => json!({ "type": "LineString", "coordinates": line_value(ls) }),
        Geometry::Line(l) => json!({
            "type": "LineString",
            "coordinates": [coord_value(&l.start), coord_value(&l.end)],
        }),
        Geometry::MultiLineString(mls) => json!({
            "type": "MultiLineString",
            "coordinates": mls.iter().map(line_value).collect::<Vec<_>>(),
        }),
        Geometry::Polygon(p) => json!({ "type": "Polygon", "coordinates": polygon_value(p) }),
        Geometry::Rect(r) => json!({
            "type": "Polygon",
            "coordinates": polygon_value(&r.to_polygon()),
        }),
        Geometry::Triangle(t) => json!({
            "type": "Polygon",
            "coordinates": polygon_value(&t.to_polygon()),
        }),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.iter().map(polygon_value).collect::<Vec<_>>(),
        }),
        Geometry::GeometryCollection(gc) => json!({
            "type": "GeometryCollection",
            "geometries": gc.iter().map(geometry_to_value).collect::<Vec<_>>(),
        }),
    }
}

/// Render a collection as a GeoJSON value, typing columns through `schema`
pub fn collection_to_value(collection: &FeatureCollection, schema: &ColumnSchema) -> Result<Value> {
    let mut features = Vec::with_capacity(collection.len());
    for feature in collection.iter() {
        let mut properties = Map::new();
        for column in &collection.columns {
            properties.insert(column.clone(), schema.to_json(column, feature.get(column))?);
        }
        features.push(json!({
            "type": "Feature",
            "geometry": geometry_to_value(&feature.geometry),
            "properties": Value::Object(properties),
        }));
    }
    Ok(json!({ "type": "FeatureCollection", "features": features }))
}

/// Write a collection to `path`, replacing any existing file
pub fn write_geojson(path: &Path, collection: &FeatureCollection, schema: &ColumnSchema) -> Result<()> {
    let value = collection_to_value(collection, schema)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer(&mut writer, &value)?;
    writer.flush()?;
    debug!("Wrote {} features to {}", collection.len(), path.display());
    Ok(())
}
