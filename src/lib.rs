//! noswim - maritime no-swim zones around wastewater discharge points
//!
//! This library provides the zone pipeline and the containment lookup shared by
//! the `zones` and `query` binaries.

pub mod change;
pub mod config;
pub mod discord;
pub mod error;
pub mod geometry;
pub mod kml;
pub mod models;
pub mod pip;
pub mod pipeline;
pub mod publish;
pub mod regions;
pub mod source;

pub use config::{Config, PipelineConfig};
pub use error::ZonesError;
pub use models::{ComplianceStatus, ZoneCollection, ZoneFeature};
pub use pipeline::{RunReport, RunStatus, ZonePipeline};
