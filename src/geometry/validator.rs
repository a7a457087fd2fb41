use geo::orient::{Direction, Orient};
use geo::{Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Polygon, Validation};
use hashbrown::HashSet;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, warn};

use super::ops::{self, polygonal, simplify_multi};
use crate::models::{FeatureCollection, GeometryKind};

/// Geometry that stays invalid after reconstruction
#[derive(Debug, Clone, Error)]
#[error("geometry could not be repaired: {reason}")]
pub struct GeometryRepairFailure {
    pub reason: &'static str,
}

/// Return a valid version of `geometry`.
///
/// Valid input comes back unchanged. Invalid areal input is rebuilt as the
/// unary union of its parts, which resolves self-intersections and
/// overlapping parts. Collections are repaired member by member.
pub fn repair(geometry: &Geometry<f64>) -> Result<Geometry<f64>, GeometryRepairFailure> {
    if geometry.is_valid() {
        return Ok(geometry.clone());
    }

    let repaired = match geometry {
        Geometry::GeometryCollection(gc) => {
            let members: Vec<Geometry<f64>> = gc.iter().filter_map(|g| repair(g).ok()).collect();
            if members.is_empty() {
                return Err(GeometryRepairFailure {
                    reason: "no collection member could be repaired",
                });
            }
            Geometry::GeometryCollection(GeometryCollection::new_from(members))
        }
        other => match polygonal(other) {
            Some(mp) => simplify_multi(ops::union_all(mp.0.iter())),
            None => {
                return Err(GeometryRepairFailure {
                    reason: "invalid non-areal geometry",
                })
            }
        },
    };

    if repaired.is_valid() {
        Ok(repaired)
    } else {
        Err(GeometryRepairFailure {
            reason: "reconstruction is still invalid",
        })
    }
}

/// Repair every row, dropping rows that cannot be made valid.
///
/// Returns the repaired collection and the number of dropped rows.
pub fn repair_features(collection: &FeatureCollection) -> (FeatureCollection, usize) {
    let mut dropped = 0;
    let mut features = Vec::with_capacity(collection.len());

    for feature in collection.iter() {
        match repair(&feature.geometry) {
            Ok(geometry) => features.push(feature.with_geometry(geometry)),
            Err(e) => {
                warn!("Dropping feature {:?}: {}", feature.attributes, e);
                dropped += 1;
            }
        }
    }

    (collection.with_features(features), dropped)
}

fn cmp_coord(a: &Coord<f64>, b: &Coord<f64>) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

fn cmp_coords(a: &[Coord<f64>], b: &[Coord<f64>]) -> Ordering {
    for (ca, cb) in a.iter().zip(b.iter()) {
        let ord = cmp_coord(ca, cb);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Rotate a closed ring so that its smallest coordinate comes first
fn canonical_ring(ring: &LineString<f64>) -> LineString<f64> {
    let mut coords = ring.0.clone();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.is_empty() {
        return LineString::new(coords);
    }

    let start = coords
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| cmp_coord(a, b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    coords.rotate_left(start);
    coords.push(coords[0]);
    LineString::new(coords)
}

fn canonical_polygon(polygon: &Polygon<f64>) -> Polygon<f64> {
    let oriented = polygon.orient(Direction::Default);
    let exterior = canonical_ring(oriented.exterior());
    let mut interiors: Vec<LineString<f64>> =
        oriented.interiors().iter().map(canonical_ring).collect();
    interiors.sort_by(|a, b| cmp_coords(&a.0, &b.0));
    Polygon::new(exterior, interiors)
}

fn canonical_line(line: &LineString<f64>) -> LineString<f64> {
    let mut reversed = line.0.clone();
    reversed.reverse();
    if cmp_coords(&reversed, &line.0) == Ordering::Less {
        LineString::new(reversed)
    } else {
        line.clone()
    }
}

/// Canonical coordinate ordering: exterior rings counter-clockwise starting at
/// their smallest coordinate, holes and parts sorted, lines in the direction
/// that starts at the smaller end.
pub fn normalize(geometry: &Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Polygon(p) => Geometry::Polygon(canonical_polygon(p)),
        Geometry::MultiPolygon(mp) => {
            let mut parts: Vec<Polygon<f64>> = mp.iter().map(canonical_polygon).collect();
            parts.sort_by(|a, b| cmp_coords(&a.exterior().0, &b.exterior().0));
            Geometry::MultiPolygon(MultiPolygon::new(parts))
        }
        Geometry::LineString(ls) => Geometry::LineString(canonical_line(ls)),
        Geometry::MultiLineString(ml) => {
            let mut parts: Vec<LineString<f64>> = ml.iter().map(canonical_line).collect();
            parts.sort_by(|a, b| cmp_coords(&a.0, &b.0));
            Geometry::MultiLineString(MultiLineString::new(parts))
        }
        Geometry::Rect(r) => Geometry::Polygon(canonical_polygon(&r.to_polygon())),
        Geometry::Triangle(t) => Geometry::Polygon(canonical_polygon(&t.to_polygon())),
        Geometry::GeometryCollection(gc) => {
            Geometry::GeometryCollection(GeometryCollection::new_from(
                gc.iter().map(normalize).collect(),
            ))
        }
        other => other.clone(),
    }
}

/// Exact fingerprint of a normalized geometry, including part structure
fn fingerprint(geometry: &Geometry<f64>, out: &mut Vec<u64>) {
    fn ring(ls: &LineString<f64>, out: &mut Vec<u64>) {
        out.push(ls.0.len() as u64);
        for c in &ls.0 {
            out.push(c.x.to_bits());
            out.push(c.y.to_bits());
        }
    }
    fn polygon(p: &Polygon<f64>, out: &mut Vec<u64>) {
        out.push(p.interiors().len() as u64);
        ring(p.exterior(), out);
        for hole in p.interiors() {
            ring(hole, out);
        }
    }

    match geometry {
        Geometry::Point(p) => {
            out.extend([0, p.x().to_bits(), p.y().to_bits()]);
        }
        Geometry::Line(l) => {
            out.extend([1, l.start.x.to_bits(), l.start.y.to_bits()]);
            out.extend([l.end.x.to_bits(), l.end.y.to_bits()]);
        }
        Geometry::LineString(ls) => {
            out.push(2);
            ring(ls, out);
        }
        Geometry::Polygon(p) => {
            out.push(3);
            polygon(p, out);
        }
        Geometry::MultiPoint(mp) => {
            out.extend([4, mp.0.len() as u64]);
            for p in mp {
                out.extend([p.x().to_bits(), p.y().to_bits()]);
            }
        }
        Geometry::MultiLineString(ml) => {
            out.extend([5, ml.0.len() as u64]);
            for ls in ml {
                ring(ls, out);
            }
        }
        Geometry::MultiPolygon(mp) => {
            out.extend([6, mp.0.len() as u64]);
            for p in mp {
                polygon(p, out);
            }
        }
        Geometry::GeometryCollection(gc) => {
            out.extend([7, gc.0.len() as u64]);
            for g in gc {
                fingerprint(g, out);
            }
        }
        Geometry::Rect(r) => {
            out.push(8);
            polygon(&r.to_polygon(), out);
        }
        Geometry::Triangle(t) => {
            out.push(9);
            polygon(&t.to_polygon(), out);
        }
    }
}

/// Normalize every geometry, then drop rows whose geometry and attributes
/// both repeat an earlier row.
pub fn normalize_and_dedupe(collection: &FeatureCollection) -> FeatureCollection {
    let mut seen: HashSet<(Vec<u64>, String)> = HashSet::new();
    let mut features = Vec::with_capacity(collection.len());

    for feature in collection.iter() {
        let geometry = normalize(&feature.geometry);
        let mut key = Vec::new();
        fingerprint(&geometry, &mut key);
        if seen.insert((key, format!("{:?}", feature.attributes))) {
            features.push(feature.with_geometry(geometry));
        }
    }

    let removed = collection.len() - features.len();
    if removed > 0 {
        debug!("Removed {} duplicate rows", removed);
    }

    collection.with_features(features)
}

/// Buffer by `+epsilon` then `-epsilon` to close sliver gaps left by unions.
///
/// Only areal rows are touched. Rows that vanish are dropped. A non-positive
/// epsilon leaves the collection unchanged.
pub fn micro_buffer_pass(collection: &FeatureCollection, epsilon: f64) -> FeatureCollection {
    if epsilon <= 0.0 {
        return collection.clone();
    }

    let features = collection
        .iter()
        .filter_map(|feature| {
            if polygonal(&feature.geometry).is_none() {
                return Some(feature.clone());
            }
            let grown = ops::buffer(&feature.geometry, epsilon);
            let shrunk = ops::buffer(&Geometry::MultiPolygon(grown), -epsilon);
            if shrunk.0.is_empty() {
                None
            } else {
                Some(feature.with_geometry(simplify_multi(shrunk)))
            }
        })
        .collect();

    collection.with_features(features)
}

/// Remove rows whose geometry type cannot belong to a layer of `kind`,
/// such as tangent-contact points and lines left by polygon clipping.
pub fn drop_degenerate(collection: &FeatureCollection, kind: GeometryKind) -> FeatureCollection {
    let features: Vec<_> = collection
        .iter()
        .filter(|f| !ops::is_degenerate_for(&f.geometry, kind))
        .cloned()
        .collect();

    let removed = collection.len() - features.len();
    if removed > 0 {
        debug!("Removed {} degenerate {:?}-layer fragments", removed, kind);
    }

    collection.with_features(features)
}

pub fn drop_empty(collection: &FeatureCollection) -> FeatureCollection {
    let features = collection
        .iter()
        .filter(|f| !ops::is_empty(&f.geometry))
        .cloned()
        .collect();
    collection.with_features(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Feature;
    use geo::{coord, Area, LineString, Point, Rect};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()
    }

    fn bowtie() -> Geometry<f64> {
        Geometry::Polygon(Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
            vec![],
        ))
    }

    #[test]
    fn test_repair_valid_is_unchanged() {
        let g = Geometry::Polygon(square(0.0, 0.0, 1.0, 1.0));
        assert_eq!(repair(&g).unwrap(), g);
    }

    #[test]
    fn test_repair_self_intersection() {
        let g = bowtie();
        assert!(!g.is_valid());
        let fixed = repair(&g).unwrap();
        assert!(fixed.is_valid());
        assert!(fixed.unsigned_area() > 0.0);
    }

    #[test]
    fn test_repair_is_idempotent() {
        for g in [bowtie(), Geometry::Polygon(square(0.0, 0.0, 3.0, 3.0))] {
            let once = repair(&g).unwrap();
            let twice = repair(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_repair_overlapping_multipolygon() {
        let g = Geometry::MultiPolygon(MultiPolygon::new(vec![
            square(0.0, 0.0, 2.0, 2.0),
            square(1.0, 0.0, 3.0, 2.0),
        ]));
        let fixed = repair(&g).unwrap();
        assert!(fixed.is_valid());
        assert!((fixed.unsigned_area() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_repair_features_drops_unrepairable() {
        let fc = FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 1.0, 1.0)).with("id", 1i64),
            Feature::new(LineString::from(vec![(0.0, 0.0)])).with("id", 2i64),
        ]);
        let (repaired, dropped) = repair_features(&fc);
        assert_eq!(repaired.len(), 1);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_normalize_makes_rotations_equal() {
        let a = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        // Same square, clockwise and starting elsewhere
        let b = Polygon::new(
            LineString::from(vec![(1.0, 1.0), (1.0, 0.0), (0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]),
            vec![],
        );
        assert_eq!(
            normalize(&Geometry::Polygon(a)),
            normalize(&Geometry::Polygon(b))
        );
    }

    #[test]
    fn test_dedupe_requires_same_attributes() {
        let sq = square(0.0, 0.0, 1.0, 1.0);
        let fc = FeatureCollection::from_features(vec![
            Feature::new(sq.clone()).with("a", "x"),
            Feature::new(sq.clone()).with("a", "x"),
            Feature::new(sq).with("a", "y"),
        ]);
        assert_eq!(normalize_and_dedupe(&fc).len(), 2);
    }

    #[test]
    fn test_micro_buffer_closes_sliver_gap() {
        let fc = FeatureCollection::from_features(vec![Feature::new(MultiPolygon::new(vec![
            square(0.0, 0.0, 5.0, 5.0),
            square(5.01, 0.0, 10.0, 5.0),
        ]))]);
        let out = micro_buffer_pass(&fc, 0.1);
        assert_eq!(out.len(), 1);
        assert!(matches!(out.features[0].geometry, Geometry::Polygon(_)));
        assert!((out.features[0].geometry.unsigned_area() - 50.0).abs() < 0.5);
    }

    #[test]
    fn test_micro_buffer_zero_epsilon_is_noop() {
        let fc = FeatureCollection::from_features(vec![Feature::new(square(0.0, 0.0, 1.0, 1.0))]);
        assert_eq!(micro_buffer_pass(&fc, 0.0), fc);
    }

    #[test]
    fn test_drop_degenerate_for_polygon_layer() {
        let fc = FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 1.0, 1.0)),
            Feature::new(Point::new(1.0, 1.0)),
            Feature::new(LineString::from(vec![(0.0, 0.0), (0.0, 1.0)])),
        ]);
        let out = drop_degenerate(&fc, GeometryKind::Polygon);
        assert_eq!(out.len(), 1);
        assert!(out
            .iter()
            .all(|f| !matches!(f.geometry, Geometry::Point(_) | Geometry::LineString(_))));
    }
}
