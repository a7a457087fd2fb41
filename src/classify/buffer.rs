//! Category to buffer-distance mapping.

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::ops::{self, simplify_multi};
use crate::models::{Feature, FeatureCollection};

/// Buffer distance per category.
///
/// A category missing from the table is an intentional exclusion: rows
/// carrying it are dropped, never buffered with a default distance.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferTable {
    entries: BTreeMap<String, f64>,
}

impl BufferTable {
    /// Build a table, requiring exactly `expected` entries of finite distance
    pub fn new(item: &str, entries: BTreeMap<String, f64>, expected: usize) -> Result<Self> {
        if entries.len() != expected {
            return Err(Error::config(
                item,
                format!(
                    "expected {} buffer classes, found {}",
                    expected,
                    entries.len()
                ),
            ));
        }
        if let Some((category, distance)) = entries.iter().find(|(_, d)| !d.is_finite()) {
            return Err(Error::config(
                item,
                format!("buffer class '{}' has non-finite distance {}", category, distance),
            ));
        }
        Ok(Self { entries })
    }

    pub fn distance(&self, category: &str) -> Option<f64> {
        self.entries.get(category).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The one distance of a single-class table
    fn single(&self) -> Option<f64> {
        match self.entries.len() {
            1 => self.entries.values().next().copied(),
            _ => None,
        }
    }

    /// Buffer every row by the distance of its category.
    ///
    /// Without a category attribute the table must hold a single class that
    /// applies to every row. Rows whose category is absent from the table
    /// (or null) are dropped.
    pub fn apply(&self, features: &FeatureCollection, category_attr: Option<&str>) -> FeatureCollection {
        let mut buffered = Vec::with_capacity(features.len());
        let mut excluded = 0;

        for feature in features.iter() {
            let distance = match category_attr {
                Some(attr) => feature
                    .get(attr)
                    .as_text()
                    .and_then(|category| self.distance(category)),
                None => self.single(),
            };

            match distance {
                Some(d) => {
                    let geometry = simplify_multi(ops::buffer(&feature.geometry, d));
                    buffered.push(Feature {
                        geometry,
                        attributes: feature.attributes.clone(),
                    });
                }
                None => excluded += 1,
            }
        }

        debug!(
            "Buffered {} rows, excluded {} rows with unmapped category",
            buffered.len(),
            excluded
        );

        features.with_features(buffered)
    }
}
