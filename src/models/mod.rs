//! Core data models for the processing pipeline.

pub mod attribute;
pub mod feature;

pub use attribute::AttrValue;
pub use feature::{Feature, FeatureCollection, GeometryKind};
