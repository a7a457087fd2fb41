//! Tormays - clip buffered line layers against area masks without losing area
//!
//! This library holds the processing stages used by the `process` binary.

pub mod classify;
pub mod clip;
pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod sink;
pub mod validate;

pub use error::{Error, Result};
pub use models::{AttrValue, Feature, FeatureCollection, GeometryKind};
