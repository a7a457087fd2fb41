//! Error types shared by the processing stages.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Buffer class table, dissolve attribute list or tuning value has an
    /// unexpected shape. Raised before any processing starts.
    #[error("configuration error in '{item}': {message}")]
    Configuration { item: String, message: String },

    /// A required upstream layer file is absent
    #[error("required input layer not found: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("merge id '{value}' occurs more than once in field '{field}'")]
    DuplicateMergeId { field: String, value: String },

    #[error("feature has no value in merge id field '{field}'")]
    MissingMergeId { field: String },

    #[error("row count {new} outside limits {min}..={max} (previous count {old})")]
    CountOutOfLimits {
        old: usize,
        new: usize,
        min: usize,
        max: usize,
    },

    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    #[error("column '{column}': value {value} is not representable as {expected}")]
    ColumnType {
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(item: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Configuration {
            item: item.into(),
            message: message.into(),
        }
    }
}
