//! Containment query over a published zone collection.

use geo::Point;
use serde::Serialize;
use tracing::debug;

use super::{LookupStrategy, ZoneLookup};
use crate::error::QueryError;
use crate::models::{ComplianceStatus, ZoneCollection, ZoneFeature, ZoneProperties};

/// Matched zone as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneMatch {
    pub properties: ZoneProperties,
    pub geometry: geojson::Geometry,
}

impl From<&ZoneFeature> for ZoneMatch {
    fn from(feature: &ZoneFeature) -> Self {
        Self {
            properties: feature.properties.clone(),
            geometry: geojson::Geometry::new(geojson::Value::from(&feature.geometry.to_geometry())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub in_no_swim_zone: bool,
    /// `None` when the point is outside every zone.
    pub compliance_status: Option<ComplianceStatus>,
    pub zone: Option<ZoneMatch>,
}

/// Point-in-zone lookup service
pub struct ContainmentService {
    index: Box<dyn ZoneLookup>,
}

impl ContainmentService {
    pub fn new(index: Box<dyn ZoneLookup>) -> Self {
        Self { index }
    }

    pub fn from_collection(collection: ZoneCollection, strategy: LookupStrategy) -> Self {
        Self::new(strategy.build(collection.features))
    }

    /// First zone covering the coordinate, boundary included.
    pub fn query(&self, lat: f64, lon: f64) -> Result<LookupResult, QueryError> {
        if !lat.is_finite()
            || !lon.is_finite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lon)
        {
            return Err(QueryError::InvalidCoordinate { lat, lon });
        }

        let hit = self.index.first_containing(&Point::new(lon, lat));
        debug!("Lookup at ({}, {}): {}", lat, lon, hit.is_some());

        Ok(LookupResult {
            in_no_swim_zone: hit.is_some(),
            compliance_status: hit.map(|z| z.properties.compliance_status()),
            zone: hit.map(ZoneMatch::from),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectionMetadata, ZoneGeometry};
    use geo::polygon;

    fn service() -> ContainmentService {
        let zone = ZoneFeature {
            geometry: ZoneGeometry::Polygon(polygon![
                (x: 23.49, y: 37.89),
                (x: 23.51, y: 37.89),
                (x: 23.51, y: 37.91),
                (x: 23.49, y: 37.91),
                (x: 23.49, y: 37.89),
            ]),
            properties: ZoneProperties {
                code: Some("A1".to_string()),
                compliance: Some(false),
                ..Default::default()
            },
        };
        let collection = ZoneCollection::new(vec![zone], CollectionMetadata::default());
        ContainmentService::from_collection(collection, LookupStrategy::Linear)
    }

    #[test]
    fn test_inside_zone() {
        let result = service().query(37.9, 23.5).unwrap();
        assert!(result.in_no_swim_zone);
        assert_eq!(result.compliance_status, Some(ComplianceStatus::NonCompliant));
        let zone = result.zone.unwrap();
        assert_eq!(zone.properties.code.as_deref(), Some("A1"));

        let json = serde_json::to_value(&zone.geometry).unwrap();
        assert_eq!(json["type"], "Polygon");
    }

    #[test]
    fn test_outside_zone() {
        let result = service().query(38.5, 23.5).unwrap();
        assert!(!result.in_no_swim_zone);
        assert!(result.compliance_status.is_none());
        assert!(result.zone.is_none());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["zone"], serde_json::Value::Null);
    }

    #[test]
    fn test_invalid_coordinates() {
        let service = service();
        assert!(service.query(91.0, 0.0).is_err());
        assert!(service.query(0.0, -180.5).is_err());
        assert!(service.query(f64::NAN, 0.0).is_err());
    }
}
