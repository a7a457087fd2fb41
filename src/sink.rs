//! Destinations for finished layers.
//!
//! A sink replaces a whole table at a time: the previous contents are gone
//! once `replace_table` returns, and nothing is visible before that.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::io::geojson::{collection_to_value, read_geojson};
use crate::io::ColumnSchema;
use crate::models::FeatureCollection;

pub trait FeatureSink {
    /// Current row count of `table`, `None` when it does not exist
    fn row_count(&self, table: &str) -> Result<Option<usize>>;

    /// Replace `table` with `features`, numbering rows in `primary_key`
    fn replace_table(
        &mut self,
        table: &str,
        primary_key: &str,
        features: &FeatureCollection,
        schema: &ColumnSchema,
    ) -> Result<()>;
}

/// 0-based row index column, placed first in the schema
fn with_primary_key(features: &FeatureCollection, primary_key: &str) -> FeatureCollection {
    let mut columns = vec![primary_key.to_string()];
    columns.extend(features.columns.iter().filter(|c| *c != primary_key).cloned());

    let mut out = features.clone();
    out.columns = columns;
    for (i, feature) in out.features.iter_mut().enumerate() {
        feature.set(primary_key, i as i64);
    }
    out
}

/// Keeps tables in memory. Used by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: HashMap<String, FeatureCollection>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, table: &str) -> Option<&FeatureCollection> {
        self.tables.get(table)
    }
}

impl FeatureSink for MemorySink {
    fn row_count(&self, table: &str) -> Result<Option<usize>> {
        Ok(self.tables.get(table).map(FeatureCollection::len))
    }

    fn replace_table(
        &mut self,
        table: &str,
        primary_key: &str,
        features: &FeatureCollection,
        schema: &ColumnSchema,
    ) -> Result<()> {
        // reject values the declared column types cannot hold, as a file sink would
        collection_to_value(features, schema)?;
        self.tables
            .insert(table.to_string(), with_primary_key(features, primary_key));
        Ok(())
    }
}

/// One GeoJSON file per table under a directory.
///
/// Files are written to a temporary file in the same directory and renamed
/// into place, so readers see either the old or the new table.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, table: &str) -> PathBuf {
        self.root.join(format!("{}.geojson", table))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FeatureSink for DirectorySink {
    fn row_count(&self, table: &str) -> Result<Option<usize>> {
        let path = self.path_for(table);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_geojson(&path)?.len()))
    }

    fn replace_table(
        &mut self,
        table: &str,
        primary_key: &str,
        features: &FeatureCollection,
        schema: &ColumnSchema,
    ) -> Result<()> {
        let value = collection_to_value(&with_primary_key(features, primary_key), schema)?;

        fs::create_dir_all(&self.root)?;
        let tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &value)?;
            writer.flush()?;
        }
        let path = self.path_for(table);
        tmp.persist(&path).map_err(|e| e.error)?;

        info!("Replaced table '{}' with {} rows", table, features.len());
        Ok(())
    }
}
