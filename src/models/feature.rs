//! Features and feature collections.

use geo::Geometry;
use std::collections::BTreeMap;

use super::AttrValue;

/// Target geometry family of a processing stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    #[default]
    Polygon,
    Line,
}

static NULL: AttrValue = AttrValue::Null;

/// One row: a geometry plus named attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            geometry: geometry.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attribute value, `Null` when absent
    pub fn get(&self, key: &str) -> &AttrValue {
        self.attributes.get(key).unwrap_or(&NULL)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Same attributes, different geometry
    pub fn with_geometry(&self, geometry: Geometry<f64>) -> Self {
        Self {
            geometry,
            attributes: self.attributes.clone(),
        }
    }

    /// Keep only the listed attributes
    pub fn project(&self, columns: &[String]) -> Self {
        let attributes = columns
            .iter()
            .filter_map(|c| self.attributes.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        Self {
            geometry: self.geometry.clone(),
            attributes,
        }
    }
}

/// An ordered schema plus its rows.
///
/// `columns` is the attribute schema; rows may omit a column, which reads as
/// `Null`. Attributes not listed in `columns` are not part of the schema and
/// are dropped by `project`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    pub columns: Vec<String>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            features: Vec::new(),
        }
    }

    /// Build from rows, deriving the schema from attribute keys in first-seen order
    pub fn from_features(features: Vec<Feature>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for feature in &features {
            for key in feature.attributes.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, features }
    }

    /// Same schema, new rows
    pub fn with_features(&self, features: Vec<Feature>) -> Self {
        Self {
            columns: self.columns.clone(),
            features,
        }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Add a column to the schema if it is not there yet
    pub fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    /// Restrict schema and rows to `columns` (in the given order)
    pub fn project(&self, columns: &[String]) -> Self {
        Self {
            columns: columns.to_vec(),
            features: self.features.iter().map(|f| f.project(columns)).collect(),
        }
    }

    /// Remove columns from schema and rows
    pub fn drop_columns(&self, columns: &[String]) -> Self {
        let kept: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !columns.contains(c))
            .cloned()
            .collect();
        self.project(&kept)
    }

    /// Assign a 1-based sequential id column, for layers without a natural key
    pub fn with_sequential_ids(&self, column: &str) -> Self {
        let mut out = self.clone();
        out.ensure_column(column);
        for (i, feature) in out.features.iter_mut().enumerate() {
            feature.set(column, (i as i64) + 1);
        }
        out
    }
}

impl FeatureCollection {
    /// Turn empty-string values of `column` back into null, undoing the
    /// grouping coalesce so that null-based eligibility works again
    pub fn blank_to_null(&self, column: &str) -> Self {
        let mut out = self.clone();
        for feature in &mut out.features {
            if feature.get(column).as_text() == Some("") {
                feature.set(column, AttrValue::Null);
            }
        }
        out
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}
