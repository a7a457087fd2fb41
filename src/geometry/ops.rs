//! Thin wrappers over `geo` primitives used throughout the pipeline.

use geo::{
    unary_union, Buffer, Geometry, GeometryCollection, HasDimensions, Line, LineString,
    MultiLineString, MultiPolygon, Polygon,
};

use crate::models::{FeatureCollection, GeometryKind};

/// Split multi-part and collection geometries into single parts
pub fn explode(geometry: Geometry<f64>) -> Vec<Geometry<f64>> {
    match geometry {
        Geometry::MultiPolygon(mp) => mp.0.into_iter().map(Geometry::Polygon).collect(),
        Geometry::MultiLineString(ml) => ml.0.into_iter().map(Geometry::LineString).collect(),
        Geometry::MultiPoint(mp) => mp.0.into_iter().map(Geometry::Point).collect(),
        Geometry::GeometryCollection(gc) => gc.0.into_iter().flat_map(explode).collect(),
        Geometry::Rect(r) => vec![Geometry::Polygon(r.to_polygon())],
        Geometry::Triangle(t) => vec![Geometry::Polygon(t.to_polygon())],
        other => vec![other],
    }
}

/// Explode every row; each piece inherits its row's attributes
pub fn explode_features(collection: &FeatureCollection) -> FeatureCollection {
    let features = collection
        .iter()
        .flat_map(|feature| {
            explode(feature.geometry.clone())
                .into_iter()
                .map(move |piece| feature.with_geometry(piece))
        })
        .collect();
    collection.with_features(features)
}

/// Areal view of a geometry; `None` for points and lines
pub fn polygonal(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
        Geometry::GeometryCollection(gc) => {
            let polygons: Vec<Polygon<f64>> = gc
                .iter()
                .filter_map(polygonal)
                .flat_map(|mp| mp.0)
                .collect();
            if polygons.is_empty() {
                None
            } else {
                Some(MultiPolygon::new(polygons))
            }
        }
        _ => None,
    }
}

/// Lineal view of a geometry; `None` for anything without line parts
pub fn lineal(geometry: &Geometry<f64>) -> Option<MultiLineString<f64>> {
    match geometry {
        Geometry::LineString(ls) => Some(MultiLineString::new(vec![ls.clone()])),
        Geometry::MultiLineString(ml) => Some(ml.clone()),
        Geometry::Line(Line { start, end }) => Some(MultiLineString::new(vec![LineString::new(
            vec![*start, *end],
        )])),
        Geometry::GeometryCollection(gc) => {
            let lines: Vec<LineString<f64>> =
                gc.iter().filter_map(lineal).flat_map(|ml| ml.0).collect();
            if lines.is_empty() {
                None
            } else {
                Some(MultiLineString::new(lines))
            }
        }
        _ => None,
    }
}

/// Collapse a one-member multipolygon into a polygon
pub fn simplify_multi(mp: MultiPolygon<f64>) -> Geometry<f64> {
    if mp.0.len() == 1 {
        let mut parts = mp.0;
        Geometry::Polygon(parts.remove(0))
    } else {
        Geometry::MultiPolygon(mp)
    }
}

/// Areal buffer of any geometry. Negative distances shrink areal input.
pub fn buffer(geometry: &Geometry<f64>, distance: f64) -> MultiPolygon<f64> {
    if distance == 0.0 {
        if let Some(mp) = polygonal(geometry) {
            return mp;
        }
    }
    geometry.buffer(distance)
}

/// Union of a set of polygons into non-overlapping parts
pub fn union_all<'a>(polygons: impl IntoIterator<Item = &'a Polygon<f64>>) -> MultiPolygon<f64> {
    unary_union(polygons)
}

/// True when the geometry cannot belong to a layer of the target kind
pub fn is_degenerate_for(geometry: &Geometry<f64>, kind: GeometryKind) -> bool {
    match (kind, geometry) {
        (_, Geometry::Point(_) | Geometry::MultiPoint(_)) => true,
        (
            GeometryKind::Polygon,
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_),
        ) => true,
        (GeometryKind::Polygon, Geometry::GeometryCollection(_)) => polygonal(geometry).is_none(),
        _ => false,
    }
}

pub fn is_empty(geometry: &Geometry<f64>) -> bool {
    geometry.is_empty()
}

/// Geometry for an empty result of the given kind
pub fn empty_of(kind: GeometryKind) -> Geometry<f64> {
    match kind {
        GeometryKind::Polygon => Geometry::MultiPolygon(MultiPolygon::new(vec![])),
        GeometryKind::Line => Geometry::GeometryCollection(GeometryCollection::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, point, Area, Rect};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()
    }

    #[test]
    fn test_explode_multipolygon() {
        let mp = MultiPolygon::new(vec![square(0.0, 0.0, 1.0, 1.0), square(5.0, 5.0, 6.0, 6.0)]);
        let parts = explode(Geometry::MultiPolygon(mp));
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|g| matches!(g, Geometry::Polygon(_))));
    }

    #[test]
    fn test_explode_nested_collection() {
        let gc = GeometryCollection::new_from(vec![
            Geometry::Point(point! { x: 0.0, y: 0.0 }),
            Geometry::MultiPolygon(MultiPolygon::new(vec![
                square(0.0, 0.0, 1.0, 1.0),
                square(2.0, 2.0, 3.0, 3.0),
            ])),
        ]);
        assert_eq!(explode(Geometry::GeometryCollection(gc)).len(), 3);
    }

    #[test]
    fn test_union_all_merges_overlap() {
        let a = square(0.0, 0.0, 2.0, 2.0);
        let b = square(1.0, 0.0, 3.0, 2.0);
        let merged = union_all([&a, &b]);
        assert_eq!(merged.0.len(), 1);
        assert!((merged.unsigned_area() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_for_polygon_target() {
        let line = Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]));
        assert!(is_degenerate_for(&line, GeometryKind::Polygon));
        assert!(!is_degenerate_for(&line, GeometryKind::Line));
        let poly = Geometry::Polygon(square(0.0, 0.0, 1.0, 1.0));
        assert!(!is_degenerate_for(&poly, GeometryKind::Polygon));
    }

    #[test]
    fn test_buffer_line_is_areal() {
        let line = Geometry::LineString(LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]));
        let area = buffer(&line, 1.0).unsigned_area();
        // 10x2 rectangle plus two round caps
        assert!(area > 20.0 && area < 20.0 + std::f64::consts::PI + 0.1);
    }
}
