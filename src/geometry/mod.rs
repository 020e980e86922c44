//! Geometry primitives for zone derivation.
//!
//! Reprojection between WGS84 and a metric grid, metric buffering, and the
//! region algebra (union/difference) used to cut land out of buffers.

pub mod algebra;
mod buffer;
mod projection;

pub use algebra::{difference, is_effectively_empty, normalize, union_all, RegionMask};
pub use buffer::{MetricBuffer, MIN_SEGMENTS};
pub use projection::{DatumShift, Ellipsoid, Projection};
