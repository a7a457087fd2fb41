//! Plain clip to a bounding region, with no remainder step.

use tracing::info;

use super::mask::MaskIndex;
use crate::geometry::ops::explode_features;
use crate::geometry::{drop_degenerate, drop_empty, repair_features};
use crate::models::{FeatureCollection, GeometryKind};

/// Keep only the parts of `features` inside `region`.
///
/// Unlike the clip engine, rows outside the region are discarded. The region
/// layer is merged into one area first; its attributes are ignored.
pub fn clip_to_region(
    features: &FeatureCollection,
    region: &FeatureCollection,
    kind: GeometryKind,
) -> FeatureCollection {
    let index = MaskIndex::from_mask(region, &[], 0.0);

    let clipped = features.with_features(
        features
            .iter()
            .filter_map(|f| index.clip(&f.geometry).map(|g| f.with_geometry(g)))
            .collect(),
    );
    let (clipped, _) = repair_features(&explode_features(&clipped));
    let clipped = drop_empty(&drop_degenerate(&clipped, kind));

    info!(
        "Region clip kept {} pieces of {} rows",
        clipped.len(),
        features.len()
    );
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttrValue, Feature};
    use geo::{coord, Area, Polygon, Rect};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()
    }

    #[test]
    fn test_outside_rows_are_discarded() {
        let region = FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 10.0, 10.0)).with("name", "hki")
        ]);
        let features = FeatureCollection::from_features(vec![
            Feature::new(square(5.0, 5.0, 15.0, 15.0)).with("class", "a"),
            Feature::new(square(50.0, 50.0, 60.0, 60.0)).with("class", "b"),
        ]);

        let out = clip_to_region(&features, &region, GeometryKind::Polygon);

        assert_eq!(out.len(), 1);
        assert_eq!(out.features[0].get("class"), &AttrValue::from("a"));
        assert!(out.features[0].get("name").is_null());
        assert!((out.features[0].geometry.unsigned_area() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_split_result_is_exploded() {
        let region = FeatureCollection::from_features(vec![
            Feature::new(square(0.0, 0.0, 4.0, 4.0)),
            Feature::new(square(6.0, 0.0, 10.0, 4.0)),
        ]);
        let features =
            FeatureCollection::from_features(vec![Feature::new(square(2.0, 1.0, 8.0, 3.0))]);

        let out = clip_to_region(&features, &region, GeometryKind::Polygon);

        assert_eq!(out.len(), 2);
        let total: f64 = out.iter().map(|f| f.geometry.unsigned_area()).sum();
        assert!((total - 8.0).abs() < 1e-6);
    }
}
