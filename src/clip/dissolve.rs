//! Attribute dissolve: group rows by an attribute tuple and merge geometries.

use geo::{Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, Point, Polygon};
use std::collections::BTreeMap;
use tracing::debug;

use crate::geometry::ops::{self, explode_features, lineal, polygonal};
use crate::geometry::drop_empty;
use crate::models::{AttrValue, Feature, FeatureCollection, GeometryKind};

/// Grouping tuple and aggregation for a dissolve
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DissolveSpec {
    pub group_by: Vec<String>,
    /// Numeric columns summed per group; other columns keep the first non-null value
    pub sum: Vec<String>,
}

impl DissolveSpec {
    pub fn by(group_by: &[String]) -> Self {
        Self {
            group_by: group_by.to_vec(),
            sum: Vec::new(),
        }
    }

    pub fn with_sum(mut self, sum: &[String]) -> Self {
        self.sum = sum.to_vec();
        self
    }
}

/// Replace null (or missing) values of the grouping attributes with the empty
/// string, so that null and "" form a single group. Every dissolve goes
/// through here.
pub fn coalesce_for_grouping(collection: &FeatureCollection, attrs: &[String]) -> FeatureCollection {
    let mut out = collection.clone();
    for attr in attrs {
        out.ensure_column(attr);
    }
    for feature in &mut out.features {
        for attr in attrs {
            if feature.get(attr).is_null() {
                feature.set(attr.as_str(), AttrValue::Text(String::new()));
            }
        }
    }
    out
}

fn sum_values<'a>(values: impl Iterator<Item = &'a AttrValue>) -> AttrValue {
    let mut int_sum: i64 = 0;
    let mut float_sum = 0.0;
    let mut any_float = false;
    for value in values {
        match value {
            AttrValue::Int(i) => int_sum = int_sum.saturating_add(*i),
            AttrValue::Float(f) => {
                float_sum += f;
                any_float = true;
            }
            _ => {}
        }
    }
    if any_float {
        AttrValue::Float(float_sum + int_sum as f64)
    } else {
        AttrValue::Int(int_sum)
    }
}

fn merge_geometries(members: &[&Feature], kind: GeometryKind) -> Geometry<f64> {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    let mut lines: Vec<LineString<f64>> = Vec::new();
    let mut points: Vec<Point<f64>> = Vec::new();

    for feature in members {
        if let Some(mp) = polygonal(&feature.geometry) {
            polygons.extend(mp.0);
        } else if let Some(ml) = lineal(&feature.geometry) {
            lines.extend(ml.0);
        } else {
            for part in ops::explode(feature.geometry.clone()) {
                if let Geometry::Point(p) = part {
                    points.push(p);
                }
            }
        }
    }

    let mut parts: Vec<Geometry<f64>> = Vec::new();
    if !polygons.is_empty() {
        parts.push(Geometry::MultiPolygon(ops::union_all(polygons.iter())));
    }
    if kind == GeometryKind::Line || polygons.is_empty() {
        if !lines.is_empty() {
            parts.push(Geometry::MultiLineString(MultiLineString::new(lines)));
        }
        if !points.is_empty() {
            parts.push(Geometry::MultiPoint(MultiPoint::new(points)));
        }
    }

    match parts.len() {
        0 => ops::empty_of(kind),
        1 => parts.remove(0),
        _ => Geometry::GeometryCollection(GeometryCollection::new_from(parts)),
    }
}

/// Group rows sharing the `group_by` tuple, merge their geometries, explode
/// to single parts and drop empties.
///
/// With an empty tuple no merging happens; rows are only exploded. Output
/// groups come in sorted key order.
pub fn dissolve(
    collection: &FeatureCollection,
    spec: &DissolveSpec,
    kind: GeometryKind,
) -> FeatureCollection {
    if spec.group_by.is_empty() {
        return drop_empty(&explode_features(collection));
    }

    let coalesced = coalesce_for_grouping(collection, &spec.group_by);

    let mut groups: BTreeMap<Vec<String>, Vec<&Feature>> = BTreeMap::new();
    for feature in coalesced.iter() {
        let key = spec
            .group_by
            .iter()
            .map(|attr| feature.get(attr).group_label())
            .collect();
        groups.entry(key).or_default().push(feature);
    }

    debug!(
        "Dissolving {} rows into {} groups by {:?}",
        coalesced.len(),
        groups.len(),
        spec.group_by
    );

    let mut columns = coalesced.columns.clone();
    for column in &spec.sum {
        if !columns.contains(column) {
            columns.push(column.clone());
        }
    }

    let features = groups
        .into_values()
        .map(|members| {
            let mut attributes = BTreeMap::new();
            for column in &columns {
                let value = if spec.sum.contains(column) {
                    sum_values(members.iter().map(|f| f.get(column)))
                } else {
                    members
                        .iter()
                        .map(|f| f.get(column))
                        .find(|v| !v.is_null())
                        .cloned()
                        .unwrap_or(AttrValue::Null)
                };
                attributes.insert(column.clone(), value);
            }
            Feature {
                geometry: merge_geometries(&members, kind),
                attributes,
            }
        })
        .collect();

    let merged = FeatureCollection { columns, features };
    drop_empty(&explode_features(&merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, Area, Rect};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()
    }

    fn attrs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_null_and_empty_string_form_one_group() {
        let fc = FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 2.0, 2.0)).with("class", AttrValue::Null),
            Feature::new(square(1.0, 0.0, 3.0, 2.0)).with("class", ""),
        ]);
        let out = dissolve(&fc, &DissolveSpec::by(&attrs(&["class"])), GeometryKind::Polygon);
        assert_eq!(out.len(), 1);
        assert_eq!(out.features[0].get("class"), &AttrValue::Text(String::new()));
        assert!((out.features[0].geometry.unsigned_area() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_members_explode_under_one_key() {
        let fc = FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 1.0, 1.0)).with("class", "A"),
            Feature::new(square(5.0, 5.0, 6.0, 6.0)).with("class", "A"),
            Feature::new(square(10.0, 10.0, 11.0, 11.0)).with("class", "B"),
        ]);
        let out = dissolve(&fc, &DissolveSpec::by(&attrs(&["class"])), GeometryKind::Polygon);
        assert_eq!(out.len(), 3);
        let a_rows = out.iter().filter(|f| f.get("class") == &AttrValue::from("A")).count();
        assert_eq!(a_rows, 2);
        assert!(out.iter().all(|f| matches!(f.geometry, Geometry::Polygon(_))));
    }

    #[test]
    fn test_sum_aggregation() {
        let fc = FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 1.0, 1.0)).with("k", "x").with("lines", 1i64),
            Feature::new(square(0.5, 0.0, 1.5, 1.0)).with("k", "x").with("lines", 2i64),
        ]);
        let spec = DissolveSpec::by(&attrs(&["k"])).with_sum(&attrs(&["lines"]));
        let out = dissolve(&fc, &spec, GeometryKind::Polygon);
        assert_eq!(out.len(), 1);
        assert_eq!(out.features[0].get("lines"), &AttrValue::Int(3));
    }

    #[test]
    fn test_first_non_null_wins_for_other_columns() {
        let fc = FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 1.0, 1.0)).with("k", "x").with("name", AttrValue::Null),
            Feature::new(square(0.5, 0.0, 1.5, 1.0)).with("k", "x").with("name", "Main"),
        ]);
        let out = dissolve(&fc, &DissolveSpec::by(&attrs(&["k"])), GeometryKind::Polygon);
        assert_eq!(out.features[0].get("name"), &AttrValue::from("Main"));
    }

    #[test]
    fn test_empty_tuple_only_explodes() {
        let fc = FeatureCollection::from_features(vec![Feature::new(geo::MultiPolygon::new(vec![
            square(0.0, 0.0, 1.0, 1.0),
            square(0.5, 0.0, 1.5, 1.0),
        ]))]);
        let out = dissolve(&fc, &DissolveSpec::default(), GeometryKind::Polygon);
        assert_eq!(out.len(), 2);
    }
}
