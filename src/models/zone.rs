//! Exclusion-zone features and the GeoJSON codec for the zone collection.

use geo::{BoundingRect, Geometry, Intersects, MultiPolygon, Point, Polygon, Rect};
use geojson::{FeatureCollection, GeoJson, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::facility::{DischargeSource, FacilityRecord};
use crate::error::{CodecError, GeometryError};

/// Three-valued compliance derived from the optional upstream flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    Unknown,
}

impl From<Option<bool>> for ComplianceStatus {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => ComplianceStatus::Compliant,
            Some(false) => ComplianceStatus::NonCompliant,
            None => ComplianceStatus::Unknown,
        }
    }
}

/// Zone geometry: one polygon, or several when land splits the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneGeometry {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl ZoneGeometry {
    /// Collapse an overlay result. Empty input yields `None`.
    pub fn from_parts(mut parts: MultiPolygon<f64>) -> Option<Self> {
        match parts.0.len() {
            0 => None,
            1 => parts.0.pop().map(ZoneGeometry::Polygon),
            _ => Some(ZoneGeometry::MultiPolygon(parts)),
        }
    }

    pub fn try_from_geometry(geometry: Geometry<f64>) -> Result<Self, GeometryError> {
        match geometry {
            Geometry::Polygon(p) => Ok(ZoneGeometry::Polygon(p)),
            Geometry::MultiPolygon(mp) if mp.0.is_empty() => {
                Err(GeometryError::Invalid("empty MultiPolygon".to_string()))
            }
            Geometry::MultiPolygon(mp) => Ok(ZoneGeometry::MultiPolygon(mp)),
            Geometry::Point(_) => Err(GeometryError::Unsupported("Point")),
            Geometry::LineString(_) => Err(GeometryError::Unsupported("LineString")),
            Geometry::MultiLineString(_) => Err(GeometryError::Unsupported("MultiLineString")),
            Geometry::MultiPoint(_) => Err(GeometryError::Unsupported("MultiPoint")),
            Geometry::GeometryCollection(_) => {
                Err(GeometryError::Unsupported("GeometryCollection"))
            }
            Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
                Err(GeometryError::Unsupported("non-GeoJSON primitive"))
            }
        }
    }

    pub fn to_geometry(&self) -> Geometry<f64> {
        match self {
            ZoneGeometry::Polygon(p) => Geometry::Polygon(p.clone()),
            ZoneGeometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.clone()),
        }
    }

    pub fn parts(&self) -> &[Polygon<f64>] {
        match self {
            ZoneGeometry::Polygon(p) => std::slice::from_ref(p),
            ZoneGeometry::MultiPolygon(mp) => &mp.0,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, ZoneGeometry::MultiPolygon(_))
    }

    /// Boundary-inclusive point membership.
    pub fn covers(&self, point: &Point<f64>) -> bool {
        match self {
            ZoneGeometry::Polygon(p) => p.intersects(point),
            ZoneGeometry::MultiPolygon(mp) => mp.intersects(point),
        }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            ZoneGeometry::Polygon(p) => p.bounding_rect(),
            ZoneGeometry::MultiPolygon(mp) => mp.bounding_rect(),
        }
    }
}

/// Provenance carried by every zone feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredProperties")]
pub struct ZoneProperties {
    pub code: Option<String>,
    pub name: Option<String>,
    pub receiver_name: Option<String>,
    pub receiver_name_en: Option<String>,
    pub receiver_water_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub compliance: Option<bool>,
    pub discharge_source: Option<DischargeSource>,
}

/// Stored properties as found in artifacts, including the legacy
/// `is_compliant` key. `compliance` wins when both are present.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct StoredProperties {
    code: Option<String>,
    name: Option<String>,
    receiver_name: Option<String>,
    receiver_name_en: Option<String>,
    receiver_water_type: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    compliance: Option<bool>,
    #[serde(rename = "is_compliant")]
    legacy_compliance: Option<bool>,
    discharge_source: Option<DischargeSource>,
}

impl From<StoredProperties> for ZoneProperties {
    fn from(stored: StoredProperties) -> Self {
        Self {
            code: stored.code,
            name: stored.name,
            receiver_name: stored.receiver_name,
            receiver_name_en: stored.receiver_name_en,
            receiver_water_type: stored.receiver_water_type,
            latitude: stored.latitude,
            longitude: stored.longitude,
            compliance: stored.compliance.or(stored.legacy_compliance),
            discharge_source: stored.discharge_source,
        }
    }
}

impl ZoneProperties {
    pub fn from_facility(facility: &FacilityRecord, source: DischargeSource) -> Self {
        Self {
            code: facility.code.clone(),
            name: facility.name.clone(),
            receiver_name: facility.receiver_name.clone(),
            receiver_name_en: facility.receiver_name_en.clone(),
            receiver_water_type: facility.receiver_water_type.clone(),
            latitude: facility.latitude,
            longitude: facility.longitude,
            compliance: facility.compliance,
            discharge_source: Some(source),
        }
    }

    pub fn compliance_status(&self) -> ComplianceStatus {
        self.compliance.into()
    }

    /// Display name: facility name, then code.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or("Unknown Location")
    }
}

/// One facility's maritime exclusion zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneFeature {
    pub geometry: ZoneGeometry,
    pub properties: ZoneProperties,
}

/// Collection-level provenance written next to the features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionMetadata {
    pub source_digest: Option<String>,
    pub buffer_radius_meters: Option<f64>,
    pub feature_count: usize,
}

/// The unit of publication: every zone produced by one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneCollection {
    pub features: Vec<ZoneFeature>,
    pub metadata: CollectionMetadata,
}

impl ZoneCollection {
    pub fn new(features: Vec<ZoneFeature>, metadata: CollectionMetadata) -> Self {
        let metadata = CollectionMetadata {
            feature_count: features.len(),
            ..metadata
        };
        Self { features, metadata }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn to_geojson(&self) -> Result<FeatureCollection, CodecError> {
        let features = self
            .features
            .iter()
            .map(|f| {
                let properties = match serde_json::to_value(&f.properties)? {
                    Value::Object(map) => map,
                    _ => JsonObject::new(),
                };
                Ok(geojson::Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::from(
                        &f.geometry.to_geometry(),
                    ))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        let mut foreign = JsonObject::new();
        foreign.insert("metadata".to_string(), serde_json::to_value(&self.metadata)?);

        Ok(FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign),
        })
    }

    /// Serialized primary artifact.
    pub fn to_geojson_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&self.to_geojson()?)?)
    }

    /// Parse a stored primary artifact. Properties are read leniently.
    pub fn from_geojson_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(bytes)?;
        let collection = match text.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(CodecError::NotACollection),
        };

        let metadata = collection
            .foreign_members
            .as_ref()
            .and_then(|m| m.get("metadata"))
            .and_then(|v| serde_json::from_value::<CollectionMetadata>(v.clone()).ok())
            .unwrap_or_default();

        let mut features = Vec::with_capacity(collection.features.len());
        for (index, feature) in collection.features.into_iter().enumerate() {
            let geometry = feature.geometry.ok_or(CodecError::Feature {
                index,
                source: GeometryError::Invalid("missing geometry".to_string()),
            })?;
            let geometry = Geometry::<f64>::try_from(geometry)?;
            let geometry = ZoneGeometry::try_from_geometry(geometry)
                .map_err(|source| CodecError::Feature { index, source })?;

            let properties = feature
                .properties
                .map(|p| serde_json::from_value::<ZoneProperties>(Value::Object(p)))
                .transpose()?
                .unwrap_or_default();

            features.push(ZoneFeature {
                geometry,
                properties,
            });
        }

        Ok(Self::new(features, metadata))
    }
}
