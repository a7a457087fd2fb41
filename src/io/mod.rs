//! Layer file input and output.

pub mod geojson;
mod schema;

pub use geojson::{read_geojson, write_geojson};
pub use schema::{ColumnSchema, ColumnType};
