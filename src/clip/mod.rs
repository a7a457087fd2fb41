//! Area clip-and-merge engine.
//!
//! Clips buffered features against a dissolved mask layer without losing
//! features that fall entirely outside the mask, then re-aggregates the
//! result by a caller-chosen attribute tuple.

mod dissolve;
mod engine;
mod mask;
mod merge;
mod region;

pub use dissolve::{coalesce_for_grouping, dissolve, DissolveSpec};
pub use engine::{ClipEngine, ClipOutcome, ClipProfile, ClipStats, DEFAULT_MICRO_BUFFER};
pub use mask::{dissolve_mask, MaskIndex};
pub use merge::assemble;
pub use region::clip_to_region;
