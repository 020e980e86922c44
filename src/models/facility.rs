//! Facility records and the adapter that normalizes upstream key spellings.

use std::sync::LazyLock;

use geo::Coord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FacilityResolutionError, FetchError};

/// Upstream schema revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MappingVersion {
    /// Spreadsheet export with `Column1.`-prefixed keys and a split discharge point
    TabularV1,
    /// Facility API with plain camelCase keys and a WKT discharge point
    #[default]
    ApiV2,
}

/// Candidate upstream keys for every field of [`FacilityRecord`].
///
/// Keys are tried in order; the first present, non-null value wins.
#[derive(Debug)]
pub struct FieldMapping {
    pub version: MappingVersion,
    code: &'static [&'static str],
    name: &'static [&'static str],
    receiver_name: &'static [&'static str],
    receiver_name_en: &'static [&'static str],
    receiver_water_type: &'static [&'static str],
    latitude: &'static [&'static str],
    longitude: &'static [&'static str],
    receiver_location: &'static [&'static str],
    receiver_longitude: &'static [&'static str],
    receiver_latitude: &'static [&'static str],
    compliance: &'static [&'static str],
}

static TABULAR_V1: FieldMapping = FieldMapping {
    version: MappingVersion::TabularV1,
    code: &["Column1.code"],
    name: &["Column1.name"],
    receiver_name: &["Column1.receiverName"],
    receiver_name_en: &["Column1.receiverNameEn"],
    receiver_water_type: &["Column1.receiverWaterType"],
    latitude: &["Column1.latitude"],
    longitude: &["Column1.longitude"],
    receiver_location: &[],
    receiver_longitude: &["Column1.receiverLocation.1"],
    receiver_latitude: &["Column1.receiverLocation.2"],
    compliance: &["Column1.compliance", "Column1.is_compliant"],
};

static API_V2: FieldMapping = FieldMapping {
    version: MappingVersion::ApiV2,
    code: &["code"],
    name: &["name"],
    receiver_name: &["receiverName"],
    receiver_name_en: &["receiverNameEn"],
    receiver_water_type: &["receiverWaterType"],
    latitude: &["latitude"],
    longitude: &["longitude"],
    receiver_location: &["receiverLocation"],
    receiver_longitude: &[],
    receiver_latitude: &[],
    compliance: &["compliance", "is_compliant"],
};

impl FieldMapping {
    pub fn for_version(version: MappingVersion) -> &'static FieldMapping {
        match version {
            MappingVersion::TabularV1 => &TABULAR_V1,
            MappingVersion::ApiV2 => &API_V2,
        }
    }
}

/// Which input produced the discharge point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DischargeSource {
    /// Parsed from the WKT `receiverLocation` field
    ReceiverLocation,
    /// Split receiver longitude/latitude columns
    ReceiverCoordinates,
    /// The facility's own longitude/latitude
    Coordinates,
}

/// A facility as reported by the upstream API, in typed form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacilityRecord {
    pub code: Option<String>,
    pub name: Option<String>,
    pub receiver_name: Option<String>,
    pub receiver_name_en: Option<String>,
    pub receiver_water_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// WKT point string
    pub receiver_location: Option<String>,
    /// (lon, lat) from split receiver columns
    pub receiver_coordinates: Option<(f64, f64)>,
    pub compliance: Option<bool>,
}

fn lookup<'a>(props: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| props.get(*k))
        .find(|v| !v.is_null())
}

fn string_field(props: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    match lookup(props, keys)? {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_field(props: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    match lookup(props, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn bool_field(props: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<bool> {
    match lookup(props, keys)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

impl FacilityRecord {
    /// Normalize one upstream record, bare or wrapped in `properties`.
    pub fn from_json(
        value: &Value,
        mapping: &FieldMapping,
    ) -> Result<Self, FacilityResolutionError> {
        let outer = value
            .as_object()
            .ok_or(FacilityResolutionError::NotAnObject)?;
        let props = match outer.get("properties") {
            Some(Value::Object(inner)) => inner,
            _ => outer,
        };

        let receiver_coordinates = match (
            number_field(props, mapping.receiver_longitude),
            number_field(props, mapping.receiver_latitude),
        ) {
            (Some(lon), Some(lat)) => Some((lon, lat)),
            _ => None,
        };

        Ok(Self {
            code: string_field(props, mapping.code),
            name: string_field(props, mapping.name),
            receiver_name: string_field(props, mapping.receiver_name),
            receiver_name_en: string_field(props, mapping.receiver_name_en),
            receiver_water_type: string_field(props, mapping.receiver_water_type),
            latitude: number_field(props, mapping.latitude),
            longitude: number_field(props, mapping.longitude),
            receiver_location: string_field(props, mapping.receiver_location),
            receiver_coordinates,
            compliance: bool_field(props, mapping.compliance),
        })
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or("<unnamed>")
    }

    /// Discharge point: WKT first, then split receiver columns, then lon/lat.
    pub fn resolve_discharge_point(
        &self,
    ) -> Result<(Coord<f64>, DischargeSource), FacilityResolutionError> {
        let candidates = [
            (
                self.receiver_location.as_deref().and_then(parse_wkt_point),
                DischargeSource::ReceiverLocation,
            ),
            (
                self.receiver_coordinates.map(|(x, y)| Coord { x, y }),
                DischargeSource::ReceiverCoordinates,
            ),
            (
                self.longitude
                    .zip(self.latitude)
                    .map(|(x, y)| Coord { x, y }),
                DischargeSource::Coordinates,
            ),
        ];

        let mut rejected = None;
        for (coord, source) in candidates {
            let Some(c) = coord else { continue };
            if in_range(c) {
                return Ok((c, source));
            }
            rejected = Some(FacilityResolutionError::OutOfRange { lon: c.x, lat: c.y });
        }

        Err(rejected.unwrap_or(FacilityResolutionError::MissingCoordinates))
    }
}

fn in_range(c: Coord<f64>) -> bool {
    c.x.is_finite()
        && c.y.is_finite()
        && (-180.0..=180.0).contains(&c.x)
        && (-90.0..=90.0).contains(&c.y)
}

static WKT_POINT: LazyLock<Regex> = LazyLock::new(|| {
    let num = r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?";
    let pattern = format!(
        r"(?i)^\s*(?:SRID=\d+\s*;\s*)?POINT\s*(?:ZM|Z|M)?\s*\(\s*({num})\s+({num})(?:\s+{num}){{0,2}}\s*\)\s*$"
    );
    Regex::new(&pattern).expect("static WKT pattern")
});

/// Parse a WKT `POINT (lon lat)`; extra Z/M ordinates are ignored.
pub fn parse_wkt_point(wkt: &str) -> Option<Coord<f64>> {
    let caps = WKT_POINT.captures(wkt)?;
    let x = caps.get(1)?.as_str().parse().ok()?;
    let y = caps.get(2)?.as_str().parse().ok()?;
    Some(Coord { x, y })
}

/// The record list inside a payload: `{"features": [...]}` or a bare list.
pub fn payload_records(payload: &Value) -> Result<&[Value], FetchError> {
    match payload {
        Value::Array(items) => Ok(items),
        Value::Object(obj) => match obj.get("features") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(FetchError::Shape(
                "object payload without a 'features' list".to_string(),
            )),
        },
        other => Err(FetchError::Shape(format!(
            "expected a list or feature collection, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v2() -> &'static FieldMapping {
        FieldMapping::for_version(MappingVersion::ApiV2)
    }

    #[test]
    fn test_parse_wkt_variants() {
        assert_eq!(
            parse_wkt_point("POINT (23.5 37.9)"),
            Some(Coord { x: 23.5, y: 37.9 })
        );
        assert_eq!(
            parse_wkt_point("point(23.5 37.9)"),
            Some(Coord { x: 23.5, y: 37.9 })
        );
        assert_eq!(
            parse_wkt_point("SRID=4326;POINT Z (23.5 37.9 12)"),
            Some(Coord { x: 23.5, y: 37.9 })
        );
        assert_eq!(
            parse_wkt_point("POINT (-1.5e1 .5)"),
            Some(Coord { x: -15.0, y: 0.5 })
        );
        assert_eq!(parse_wkt_point("POINT EMPTY"), None);
        assert_eq!(parse_wkt_point("LINESTRING (0 0, 1 1)"), None);
        assert_eq!(parse_wkt_point("POINT (abc def)"), None);
    }

    #[test]
    fn test_bare_record() {
        let value = json!({
            "code": "A1",
            "name": "Plant",
            "receiverWaterType": "SEA",
            "longitude": 23.5,
            "latitude": "37.9",
            "compliance": false
        });
        let record = FacilityRecord::from_json(&value, v2()).unwrap();
        assert_eq!(record.code.as_deref(), Some("A1"));
        assert_eq!(record.latitude, Some(37.9));
        assert_eq!(record.compliance, Some(false));
        assert_eq!(record.receiver_water_type.as_deref(), Some("SEA"));
    }

    #[test]
    fn test_nested_properties_and_alias() {
        let value = json!({
            "type": "Feature",
            "properties": { "code": 17, "is_compliant": "true", "longitude": 23.0, "latitude": 38.0 }
        });
        let record = FacilityRecord::from_json(&value, v2()).unwrap();
        assert_eq!(record.code.as_deref(), Some("17"));
        assert_eq!(record.compliance, Some(true));
    }

    #[test]
    fn test_tabular_mapping() {
        let value = json!({
            "properties": {
                "Column1.code": "T9",
                "Column1.name": "Old Plant",
                "Column1.longitude": 22.0,
                "Column1.latitude": 39.0,
                "Column1.receiverLocation.1": 22.1,
                "Column1.receiverLocation.2": 39.1
            }
        });
        let mapping = FieldMapping::for_version(MappingVersion::TabularV1);
        let record = FacilityRecord::from_json(&value, mapping).unwrap();
        assert_eq!(record.code.as_deref(), Some("T9"));

        let (point, source) = record.resolve_discharge_point().unwrap();
        assert_eq!(source, DischargeSource::ReceiverCoordinates);
        assert_eq!(point, Coord { x: 22.1, y: 39.1 });
    }

    #[test]
    fn test_wkt_preferred_over_coordinates() {
        let record = FacilityRecord {
            receiver_location: Some("POINT (23.6 37.8)".into()),
            longitude: Some(23.5),
            latitude: Some(37.9),
            ..Default::default()
        };
        let (point, source) = record.resolve_discharge_point().unwrap();
        assert_eq!(source, DischargeSource::ReceiverLocation);
        assert_eq!(point, Coord { x: 23.6, y: 37.8 });
    }

    #[test]
    fn test_bad_wkt_falls_back() {
        let record = FacilityRecord {
            receiver_location: Some("not wkt".into()),
            longitude: Some(23.5),
            latitude: Some(37.9),
            ..Default::default()
        };
        let (_, source) = record.resolve_discharge_point().unwrap();
        assert_eq!(source, DischargeSource::Coordinates);
    }

    #[test]
    fn test_out_of_range_wkt_falls_back() {
        let record = FacilityRecord {
            receiver_location: Some("POINT (4200000 23)".into()),
            longitude: Some(23.5),
            latitude: Some(37.9),
            ..Default::default()
        };
        let (_, source) = record.resolve_discharge_point().unwrap();
        assert_eq!(source, DischargeSource::Coordinates);
    }

    #[test]
    fn test_unresolvable() {
        let record = FacilityRecord {
            longitude: Some(23.5),
            ..Default::default()
        };
        assert_eq!(
            record.resolve_discharge_point(),
            Err(FacilityResolutionError::MissingCoordinates)
        );

        let record = FacilityRecord {
            longitude: Some(523.5),
            latitude: Some(37.9),
            ..Default::default()
        };
        assert!(matches!(
            record.resolve_discharge_point(),
            Err(FacilityResolutionError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(
            FacilityRecord::from_json(&json!("nope"), v2()),
            Err(FacilityResolutionError::NotAnObject)
        );
    }

    #[test]
    fn test_payload_shapes() {
        let list = json!([{ "code": "A" }]);
        assert_eq!(payload_records(&list).unwrap().len(), 1);

        let collection = json!({ "type": "FeatureCollection", "features": [{}, {}] });
        assert_eq!(payload_records(&collection).unwrap().len(), 2);

        assert!(payload_records(&json!({ "data": [] })).is_err());
        assert!(payload_records(&json!(42)).is_err());
    }
}
