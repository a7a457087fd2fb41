//! Upstream classification: buffer-distance tables and mask tagging.

mod buffer;
mod tag;

pub use buffer::BufferTable;
pub use tag::tag_within_mask;
