//! Geometry adapters and validity handling.
//!
//! All boolean, buffer and validity primitives come from `geo`; this module
//! only shapes them into feature-collection transforms.

pub mod ops;
mod validator;

pub use validator::{
    drop_degenerate, drop_empty, micro_buffer_pass, normalize, normalize_and_dedupe, repair,
    repair_features, GeometryRepairFailure,
};
