//! TOML configuration for the zone pipeline and the query server.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::geometry::{Projection, MIN_SEGMENTS};
use crate::models::MappingVersion;
use crate::pip::LookupStrategy;
use crate::publish::ArtifactTarget;

pub const DEFAULT_SOURCE_URL: &str =
    "https://astikalimata.ypeka.gr/api/query/wastewatertreatmentplants";
pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";
pub const KML_CONTENT_TYPE: &str = "application/vnd.google-earth.kml+xml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub secondary: SecondaryConfig,
    pub zones: ZonesConfig,
    pub notify: NotifyConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub mapping: MappingVersion,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            timeout_secs: 30,
            mapping: MappingVersion::default(),
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Primary store: region dataset, change record and the GeoJSON artifact.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub regions_key: String,
    pub change_record_key: String,
    pub zones_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            regions_key: "perifereiesWGS84.geojson".to_string(),
            change_record_key: "wastewater_data_hash.txt".to_string(),
            zones_key: "no_swim_zones/wastewater_no_swim_zones.geojson".to_string(),
        }
    }
}

/// Secondary (document-hosting) store receiving the KML rendition.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecondaryConfig {
    pub enabled: bool,
    pub root: PathBuf,
    pub folder: Option<String>,
    pub key: String,
    pub grant_read: bool,
    /// Re-render the KML from the stored zones when the input is unchanged.
    pub repair_on_skip: bool,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("data/published"),
            folder: None,
            key: "wastewater_no_swim_zones.kml".to_string(),
            grant_read: true,
            repair_on_skip: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectionKind {
    GreekGrid,
    Utm,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ZonesConfig {
    pub buffer_radius_m: f64,
    pub segments: usize,
    pub projection: ProjectionKind,
    pub utm_zone: u8,
    pub utm_north: bool,
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self {
            buffer_radius_m: 200.0,
            segments: 64,
            projection: ProjectionKind::GreekGrid,
            utm_zone: 34,
            utm_north: true,
        }
    }
}

impl ZonesConfig {
    pub fn projection(&self) -> Projection {
        match self.projection {
            ProjectionKind::GreekGrid => Projection::greek_grid(),
            ProjectionKind::Utm => Projection::utm(self.utm_zone, self.utm_north),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NotifyConfig {
    pub discord_webhook: Option<String>,
}

/// Containment query server.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub listen: String,
    pub strategy: LookupStrategy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            strategy: LookupStrategy::Linear,
        }
    }
}

/// Everything the pipeline needs, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub regions_key: String,
    pub change_record_key: String,
    pub primary: ArtifactTarget,
    pub secondary: Option<ArtifactTarget>,
    pub repair_secondary_on_skip: bool,
    pub buffer_radius_m: f64,
    pub segments: usize,
    pub projection: Projection,
    pub mapping: MappingVersion,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Config::default().pipeline()
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Point both stores below `dir`.
    pub fn with_data_dir(mut self, dir: &Path) -> Self {
        self.storage.root = dir.to_path_buf();
        self.secondary.root = dir.join("published");
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let radius = self.zones.buffer_radius_m;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "zones.buffer_radius_m must be positive, got {}",
                radius
            )));
        }
        if self.zones.segments < MIN_SEGMENTS {
            return Err(ConfigError::Invalid(format!(
                "zones.segments must be at least {}, got {}",
                MIN_SEGMENTS, self.zones.segments
            )));
        }
        if self.zones.projection == ProjectionKind::Utm && !(1..=60).contains(&self.zones.utm_zone)
        {
            return Err(ConfigError::Invalid(format!(
                "zones.utm_zone must be in 1..=60, got {}",
                self.zones.utm_zone
            )));
        }
        for (name, key) in [
            ("storage.regions_key", &self.storage.regions_key),
            ("storage.change_record_key", &self.storage.change_record_key),
            ("storage.zones_key", &self.storage.zones_key),
            ("secondary.key", &self.secondary.key),
        ] {
            if key.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }
        url::Url::parse(&self.source.url).map_err(|e| {
            ConfigError::Invalid(format!("source.url '{}': {}", self.source.url, e))
        })?;
        if let Some(webhook) = &self.notify.discord_webhook {
            url::Url::parse(webhook)
                .map_err(|e| ConfigError::Invalid(format!("notify.discord_webhook: {}", e)))?;
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "source.timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve into the pipeline's explicit configuration. Call after [`Config::validate`].
    pub fn pipeline(&self) -> PipelineConfig {
        let primary = ArtifactTarget::new(self.storage.zones_key.clone(), GEOJSON_CONTENT_TYPE);
        let secondary = self.secondary.enabled.then(|| {
            ArtifactTarget::new(self.secondary.key.clone(), KML_CONTENT_TYPE)
                .in_parent(self.secondary.folder.clone())
                .with_read_grant(self.secondary.grant_read)
        });

        PipelineConfig {
            regions_key: self.storage.regions_key.clone(),
            change_record_key: self.storage.change_record_key.clone(),
            primary,
            secondary,
            repair_secondary_on_skip: self.secondary.repair_on_skip,
            buffer_radius_m: self.zones.buffer_radius_m,
            segments: self.zones.segments,
            projection: self.zones.projection(),
            mapping: self.source.mapping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let config = Config::default();
        config.validate().unwrap();
        let pipeline = config.pipeline();
        assert_eq!(pipeline.buffer_radius_m, 200.0);
        assert_eq!(pipeline.change_record_key, "wastewater_data_hash.txt");
        assert_eq!(
            pipeline.primary.key,
            "no_swim_zones/wastewater_no_swim_zones.geojson"
        );
        assert_eq!(pipeline.primary.content_type, GEOJSON_CONTENT_TYPE);
        let secondary = pipeline.secondary.unwrap();
        assert_eq!(secondary.key, "wastewater_no_swim_zones.kml");
        assert!(secondary.grant_read);
        assert_eq!(pipeline.projection.name(), "EPSG:2100");
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [source]
            mapping = "tabular-v1"

            [zones]
            buffer_radius_m = 350.0
            projection = "utm"
            utm_zone = 35

            [secondary]
            enabled = false

            [query]
            strategy = "rtree"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let pipeline = config.pipeline();
        assert_eq!(pipeline.mapping, MappingVersion::TabularV1);
        assert_eq!(pipeline.buffer_radius_m, 350.0);
        assert!(pipeline.secondary.is_none());
        assert_eq!(config.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(config.query.strategy, LookupStrategy::Rtree);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.zones.buffer_radius_m = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.zones.buffer_radius_m = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.zones.segments = 8;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.zones.projection = ProjectionKind::Utm;
        config.zones.utm_zone = 61;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.zones_key = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noswim.toml");
        std::fs::write(&path, "[zones]\nsegments = 16\n").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "[zones\n").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_data_dir_override() {
        let config = Config::default().with_data_dir(Path::new("/tmp/run"));
        assert_eq!(config.storage.root, PathBuf::from("/tmp/run"));
        assert_eq!(config.secondary.root, PathBuf::from("/tmp/run/published"));
    }
}
