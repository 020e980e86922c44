//! Point-in-polygon containment lookups over the zone collection.
//!
//! The lookup strategy sits behind [`ZoneLookup`] so a linear scan and an
//! R-tree index are interchangeable for callers.

mod index;
mod service;

pub use index::{LinearZoneIndex, LookupStrategy, RTreeZoneIndex, ZoneLookup};
pub use service::{ContainmentService, LookupResult, ZoneMatch};
