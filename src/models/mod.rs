//! Core data models for the zone pipeline.

pub mod facility;
pub mod zone;

pub use facility::{
    parse_wkt_point, payload_records, DischargeSource, FacilityRecord, FieldMapping,
    MappingVersion,
};
pub use zone::{
    CollectionMetadata, ComplianceStatus, ZoneCollection, ZoneFeature, ZoneGeometry,
    ZoneProperties,
};
