//! Mark features with the attributes of the mask group they lie within.

use tracing::info;

use crate::clip::MaskIndex;
use crate::models::{AttrValue, FeatureCollection};

/// Copy `attrs` from the first dissolved mask piece that contains each row.
///
/// The mask is dissolved by `attrs` and grown by `buffer` first. Rows within
/// no piece get null values, which makes them bypass rows for a later clip
/// that uses one of these attributes as its eligibility attribute.
pub fn tag_within_mask(
    features: &FeatureCollection,
    mask: &FeatureCollection,
    attrs: &[String],
    buffer: f64,
) -> FeatureCollection {
    let index = MaskIndex::from_mask(mask, attrs, buffer);

    let mut out = features.clone();
    for attr in attrs {
        out.ensure_column(attr);
    }

    let mut tagged = 0;
    for feature in &mut out.features {
        let hit = index.containing(&feature.geometry);
        if hit.is_some() {
            tagged += 1;
        }
        for attr in attrs {
            let value = hit.map(|piece| piece.get(attr).clone()).unwrap_or(AttrValue::Null);
            feature.set(attr.as_str(), value);
        }
    }

    info!(
        "Tagged {} of {} features within mask groups {:?}",
        tagged,
        out.len(),
        attrs
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Feature;
    use geo::{coord, LineString, Rect};

    #[test]
    fn test_tagging_sets_attrs_or_null() {
        let mask = FeatureCollection::from_features(vec![Feature::new(
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }).to_polygon(),
        )
        .with("ylre_class", "Katualue")]);

        let lines = FeatureCollection::from_features(vec![
            Feature::new(LineString::from(vec![(1.0, 5.0), (9.0, 5.0)])).with("id", 1i64),
            Feature::new(LineString::from(vec![(1.0, 5.0), (10.5, 5.0)])).with("id", 2i64),
            Feature::new(LineString::from(vec![(50.0, 5.0), (60.0, 5.0)])).with("id", 3i64),
        ]);
        let attrs = vec!["ylre_class".to_string()];

        let strict = tag_within_mask(&lines, &mask, &attrs, 0.0);
        assert_eq!(strict.features[0].get("ylre_class"), &AttrValue::from("Katualue"));
        assert!(strict.features[1].get("ylre_class").is_null());
        assert!(strict.features[2].get("ylre_class").is_null());

        // a buffered mask also takes in the line that pokes out by 0.5
        let loose = tag_within_mask(&lines, &mask, &attrs, 1.0);
        assert_eq!(loose.features[1].get("ylre_class"), &AttrValue::from("Katualue"));
        assert!(loose.has_column("ylre_class"));
    }
}
