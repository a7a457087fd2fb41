//! Mask dissolving and the spatial index used to clip against it.

use geo::{BooleanOps, BoundingRect, Geometry, MultiPolygon, Polygon, Relate};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::dissolve::coalesce_for_grouping;
use crate::geometry::ops::{self, lineal, polygonal, simplify_multi};
use crate::geometry::{normalize_and_dedupe, repair_features};
use crate::models::{AttrValue, Feature, FeatureCollection};

/// Merge mask features sharing the `group_attrs` tuple into single-part,
/// valid polygons.
///
/// Each mask geometry is first grown by `pre_buffer` (zero leaves it as is).
/// An empty attribute list merges the whole mask into one region. Non-areal
/// mask rows are ignored.
pub fn dissolve_mask(
    mask: &FeatureCollection,
    group_attrs: &[String],
    pre_buffer: f64,
) -> FeatureCollection {
    let coalesced = coalesce_for_grouping(mask, group_attrs);

    let mut groups: BTreeMap<Vec<String>, (BTreeMap<String, AttrValue>, Vec<Polygon<f64>>)> =
        BTreeMap::new();

    for feature in coalesced.iter() {
        let polygons = if pre_buffer != 0.0 {
            ops::buffer(&feature.geometry, pre_buffer)
        } else {
            match polygonal(&feature.geometry) {
                Some(mp) => mp,
                None => continue,
            }
        };

        let key: Vec<String> = group_attrs
            .iter()
            .map(|attr| feature.get(attr).group_label())
            .collect();
        let entry = groups.entry(key).or_insert_with(|| {
            let attributes = group_attrs
                .iter()
                .map(|attr| (attr.clone(), feature.get(attr).clone()))
                .collect();
            (attributes, Vec::new())
        });
        entry.1.extend(polygons.0);
    }

    let mut pieces = FeatureCollection::new(group_attrs.to_vec());
    for (attributes, polygons) in groups.into_values() {
        for polygon in ops::union_all(polygons.iter()) {
            pieces.push(Feature {
                geometry: Geometry::Polygon(polygon),
                attributes: attributes.clone(),
            });
        }
    }

    let (repaired, dropped) = repair_features(&pieces);
    if dropped > 0 {
        debug!("Dropped {} unrepairable mask pieces", dropped);
    }
    normalize_and_dedupe(&repaired)
}

/// A mask piece in the R-tree
struct IndexedPiece {
    index: usize,
    polygon: Polygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedPiece {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index over dissolved mask pieces
pub struct MaskIndex {
    tree: RTree<IndexedPiece>,
    pieces: FeatureCollection,
}

impl MaskIndex {
    /// Index already dissolved, single-part mask pieces
    pub fn build(pieces: FeatureCollection) -> Self {
        let indexed: Vec<IndexedPiece> = pieces
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| {
                let polygon = match &feature.geometry {
                    Geometry::Polygon(p) => p.clone(),
                    _ => return None,
                };
                let rect = polygon.bounding_rect()?;
                Some(IndexedPiece {
                    index,
                    polygon,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        let tree = RTree::bulk_load(indexed);
        info!("Mask index built with {} pieces", tree.size());

        Self { tree, pieces }
    }

    /// Dissolve `mask` by `group_attrs` and index the result
    pub fn from_mask(mask: &FeatureCollection, group_attrs: &[String], pre_buffer: f64) -> Self {
        Self::build(dissolve_mask(mask, group_attrs, pre_buffer))
    }

    fn candidates(&self, geometry: &Geometry<f64>) -> Vec<&IndexedPiece> {
        let Some(rect) = geometry.bounding_rect() else {
            return Vec::new();
        };
        let envelope =
            AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.tree.locate_in_envelope_intersecting(&envelope).collect()
    }

    /// Union of the mask pieces whose envelope meets `geometry`; `None` when
    /// no piece is near it.
    pub fn region_near(&self, geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
        let polygons: Vec<&Polygon<f64>> = self
            .candidates(geometry)
            .into_iter()
            .map(|p| &p.polygon)
            .collect();
        if polygons.is_empty() {
            return None;
        }
        Some(ops::union_all(polygons))
    }

    /// Part of `geometry` inside the mask; `None` when nothing is left.
    /// Areal input is intersected, lineal input is cut to the inside.
    pub fn clip(&self, geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
        let region = self.region_near(geometry)?;
        if let Some(areal) = polygonal(geometry) {
            let clipped = areal.intersection(&region);
            if clipped.0.is_empty() {
                return None;
            }
            Some(simplify_multi(clipped))
        } else if let Some(lines) = lineal(geometry) {
            let clipped = region.clip(&lines, false);
            if clipped.0.is_empty() {
                return None;
            }
            Some(Geometry::MultiLineString(clipped))
        } else {
            None
        }
    }

    /// First mask piece (in dissolve order) that contains `geometry`
    pub fn containing(&self, geometry: &Geometry<f64>) -> Option<&Feature> {
        let mut hits: Vec<&IndexedPiece> = self
            .candidates(geometry)
            .into_iter()
            .filter(|piece| geometry.relate(&piece.polygon).is_within())
            .collect();
        hits.sort_by_key(|piece| piece.index);
        hits.first().map(|piece| &self.pieces.features[piece.index])
    }

    pub fn pieces(&self) -> &FeatureCollection {
        &self.pieces
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, Area, LineString, Rect};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()
    }

    fn attrs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn mask() -> FeatureCollection {
        FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 2.0, 2.0)).with("area", "a").with("name", "x"),
            Feature::new(square(2.0, 0.0, 4.0, 2.0)).with("area", "a").with("name", "y"),
            Feature::new(square(10.0, 0.0, 12.0, 2.0)).with("area", "a"),
            Feature::new(square(20.0, 0.0, 22.0, 2.0)).with("area", AttrValue::Null),
        ])
    }

    #[test]
    fn test_dissolve_merges_and_explodes() {
        let out = dissolve_mask(&mask(), &attrs(&["area"]), 0.0);
        // group "a": adjacent pair merges, far square stays separate; group "": one square
        assert_eq!(out.len(), 3);
        assert_eq!(out.columns, attrs(&["area"]));
        assert!(out.iter().all(|f| matches!(f.geometry, Geometry::Polygon(_))));
        let merged = out
            .iter()
            .find(|f| (f.geometry.unsigned_area() - 8.0).abs() < 1e-9);
        assert!(merged.is_some());
    }

    #[test]
    fn test_empty_group_list_is_one_region() {
        let out = dissolve_mask(&mask(), &[], 0.0);
        assert_eq!(out.len(), 3);
        assert!(out.columns.is_empty());
    }

    #[test]
    fn test_pre_buffer_grows_pieces() {
        let single = FeatureCollection::from_features(vec![Feature::new(square(0.0, 0.0, 2.0, 2.0))]);
        let out = dissolve_mask(&single, &[], 1.0);
        assert_eq!(out.len(), 1);
        assert!(out.features[0].geometry.unsigned_area() > 4.0 + 8.0);
    }

    #[test]
    fn test_index_region_and_containment() {
        let index = MaskIndex::from_mask(&mask(), &attrs(&["area"]), 0.0);
        assert_eq!(index.len(), 3);

        let far = Geometry::Polygon(square(50.0, 50.0, 51.0, 51.0));
        assert!(index.region_near(&far).is_none());

        let line = Geometry::LineString(LineString::from(vec![(0.5, 1.0), (3.5, 1.0)]));
        let hit = index.containing(&line).expect("line lies inside merged piece");
        assert_eq!(hit.get("area"), &AttrValue::from("a"));

        let outside = Geometry::LineString(LineString::from(vec![(5.0, 1.0), (6.0, 1.0)]));
        assert!(index.containing(&outside).is_none());
    }
}
