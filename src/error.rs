//! Error taxonomy for the zone pipeline.
//!
//! Per-facility errors (`FacilityResolutionError`, `GeometryError`) are caught
//! at the facility boundary and turned into skips. Everything else propagates
//! to the run boundary as a [`ZonesError`].

use thiserror::Error;

/// Upstream facility data could not be retrieved or understood.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("failed to read facility file: {0}")]
    Io(#[from] std::io::Error),

    #[error("facility payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected facility payload shape: {0}")]
    Shape(String),
}

/// The region mask could not be loaded or unified.
#[derive(Debug, Error)]
pub enum ReferenceDataError {
    #[error("region dataset '{0}' not found")]
    Missing(String),

    #[error("failed to read region dataset: {0}")]
    Store(#[from] StoreError),

    #[error("region dataset is not valid GeoJSON: {0}")]
    Parse(String),

    #[error("region dataset contains no usable polygons")]
    Empty,

    #[error("failed to unify regions: {0}")]
    Geometry(#[from] GeometryError),
}

/// A single facility has no usable discharge point.
#[derive(Debug, Error, PartialEq)]
pub enum FacilityResolutionError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("no discharge coordinates")]
    MissingCoordinates,

    #[error("coordinates out of range: ({lon}, {lat})")]
    OutOfRange { lon: f64, lat: f64 },
}

/// Invalid or degenerate geometry in the buffer or algebra steps.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("non-finite coordinate ({x}, {y})")]
    NonFinite { x: f64, y: f64 },

    #[error("buffer radius must be positive and finite, got {0}")]
    InvalidRadius(f64),

    #[error("unsupported geometry type: {0}")]
    Unsupported(&'static str),

    #[error("subtraction mask is empty")]
    EmptyMask,

    #[error("normalization did not produce a valid geometry: {0}")]
    Invalid(String),

    #[error("boolean overlay panicked")]
    OverlayPanic,
}

/// Raw object store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("i/o error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store rejected the request: {0}")]
    Rejected(String),
}

/// Writing an artifact to a sink failed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to look up '{key}': {source}")]
    Lookup {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to write '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to encode '{key}': {reason}")]
    Encode { key: String, reason: String },
}

/// The post-publish access grant failed. Never rolls back the upload.
#[derive(Debug, Error)]
#[error("failed to grant read access on '{reference}': {source}")]
pub struct GrantError {
    pub reference: String,
    #[source]
    pub source: StoreError,
}

/// The zone collection artifact could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("expected a FeatureCollection")]
    NotACollection,

    #[error("feature {index}: {source}")]
    Feature {
        index: usize,
        #[source]
        source: GeometryError,
    },
}

/// Failed to render or read KML.
#[derive(Debug, Error)]
pub enum KmlError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed KML: {0}")]
    Malformed(String),
}

/// Invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A containment query could not be answered.
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

/// Run-boundary error: every fatal outcome of a pipeline invocation.
#[derive(Debug, Error)]
pub enum ZonesError {
    #[error("upstream fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("reference data failed to load: {0}")]
    ReferenceData(#[from] ReferenceDataError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("stored zone artifact is unreadable: {0}")]
    Artifact(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ZonesError {
    /// Process exit code distinguishing each failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            ZonesError::Fetch(_) => 20,
            ZonesError::ReferenceData(_) => 21,
            ZonesError::Publish(_) => 22,
            ZonesError::Artifact(_) => 23,
            ZonesError::Config(_) => 2,
        }
    }

    /// Short machine-readable label for reports and notifications.
    pub fn label(&self) -> &'static str {
        match self {
            ZonesError::Fetch(_) => "fetch_failed",
            ZonesError::ReferenceData(_) => "reference_data_failed",
            ZonesError::Publish(_) => "publish_failed",
            ZonesError::Artifact(_) => "artifact_unreadable",
            ZonesError::Config(_) => "config_invalid",
        }
    }
}
