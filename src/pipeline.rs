//! Zone pipeline: fetch, change-gate, buffer, subtract land, publish.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::change::{digest_payload, should_recompute, ChangeDetector};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, FacilityResolutionError, GeometryError, KmlError, PublishError, ZonesError};
use crate::geometry::{MetricBuffer, RegionMask};
use crate::kml::render_kml;
use crate::models::{
    payload_records, CollectionMetadata, FacilityRecord, FieldMapping, ZoneCollection,
    ZoneFeature, ZoneGeometry, ZoneProperties,
};
use crate::publish::{read_object, ArtifactTarget, ObjectStore, PublishReceipt, Publisher};
use crate::regions::load_region_mask;
use crate::source::FacilitySource;

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Input changed and at least one zone was published.
    Updated,
    /// Input identical to the last committed snapshot; nothing recomputed.
    Unchanged,
    /// Input changed but produced no zones. The empty collection is published.
    Empty,
}

/// Outcome of the secondary (KML) leg. Never fails the run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SecondaryLeg {
    Published { receipt: PublishReceipt },
    /// The stored KML already matches the primary artifact; nothing written.
    UpToDate,
    Failed { error: String },
    NotConfigured,
    /// Nothing to re-render from: the primary artifact does not exist yet.
    MissingPrimary,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFacility {
    pub index: usize,
    pub code: Option<String>,
    pub name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub source_digest: String,
    pub facilities_seen: usize,
    pub facilities_skipped: usize,
    /// Facilities whose buffer lies entirely on land.
    pub facilities_inland: usize,
    pub zone_count: Option<usize>,
    pub primary: Option<PublishReceipt>,
    pub secondary: SecondaryLeg,
    pub skipped: Vec<SkippedFacility>,
}

#[derive(Debug, Error)]
enum SkipReason {
    #[error(transparent)]
    Resolution(#[from] FacilityResolutionError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

enum FacilityOutcome {
    Zone(ZoneFeature),
    Inland,
    Skipped(SkippedFacility),
}

/// Result of the per-facility stage, in deterministic order.
pub struct ProcessedFacilities {
    pub features: Vec<ZoneFeature>,
    pub inland: usize,
    pub skipped: Vec<SkippedFacility>,
}

pub struct ZonePipeline {
    config: PipelineConfig,
    source: Option<Arc<dyn FacilitySource>>,
    primary: Arc<dyn ObjectStore>,
    secondary: Option<Arc<dyn ObjectStore>>,
    buffer: MetricBuffer,
    detector: ChangeDetector,
}

impl ZonePipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn FacilitySource>,
        primary: Arc<dyn ObjectStore>,
    ) -> Self {
        Self::build(config, Some(source), primary)
    }

    /// A pipeline that can only re-publish stored artifacts; [`ZonePipeline::run`]
    /// fails on it.
    pub fn without_source(config: PipelineConfig, primary: Arc<dyn ObjectStore>) -> Self {
        Self::build(config, None, primary)
    }

    fn build(
        config: PipelineConfig,
        source: Option<Arc<dyn FacilitySource>>,
        primary: Arc<dyn ObjectStore>,
    ) -> Self {
        let buffer = MetricBuffer::new(config.projection.clone(), config.segments);
        let detector = ChangeDetector::new(config.change_record_key.clone());
        Self {
            config,
            source,
            primary,
            secondary: None,
            buffer,
            detector,
        }
    }

    /// Attach the store receiving the KML rendition.
    pub fn with_secondary(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.secondary = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run of the state machine.
    pub async fn run(&self) -> Result<RunReport, ZonesError> {
        let Some(source) = &self.source else {
            return Err(ConfigError::Invalid("pipeline has no facility source".to_string()).into());
        };
        let span = info_span!("zone_run", source = %source.describe());
        self.run_inner(source.as_ref()).instrument(span).await
    }

    async fn run_inner(&self, source: &dyn FacilitySource) -> Result<RunReport, ZonesError> {
        let payload = source.fetch().await?;
        let records = payload_records(&payload)?;
        let digest = digest_payload(&payload);
        info!("Fetched {} facility records (digest {})", records.len(), &digest[..12]);

        let stored = self.detector.stored_digest(self.primary.as_ref()).await;
        if !should_recompute(&digest, stored.as_deref()) {
            info!("Facility data unchanged, skipping recomputation");
            return Ok(self.skip(digest, records.len()).await);
        }

        let mask = load_region_mask(self.primary.as_ref(), &self.config.regions_key).await?;
        let processed = self.process_facilities(records, &mask);
        info!(
            "Built {} zones ({} inland, {} skipped)",
            processed.features.len(),
            processed.inland,
            processed.skipped.len()
        );

        let metadata = CollectionMetadata {
            source_digest: Some(digest.clone()),
            buffer_radius_meters: Some(self.config.buffer_radius_m),
            feature_count: 0,
        };
        let collection = ZoneCollection::new(processed.features, metadata);

        let bytes = collection
            .to_geojson_bytes()
            .map_err(|e| PublishError::Encode {
                key: self.config.primary.key.clone(),
                reason: e.to_string(),
            })?;
        let primary = Publisher::publish(self.primary.as_ref(), &self.config.primary, bytes).await?;

        // Only a published collection may advance the change record.
        self.detector.commit(self.primary.as_ref(), &digest).await?;

        let secondary = self.publish_secondary(&collection).await;

        let status = if collection.is_empty() {
            RunStatus::Empty
        } else {
            RunStatus::Updated
        };

        Ok(RunReport {
            status,
            source_digest: digest,
            facilities_seen: records.len(),
            facilities_skipped: processed.skipped.len(),
            facilities_inland: processed.inland,
            zone_count: Some(collection.len()),
            primary: Some(primary),
            secondary,
            skipped: processed.skipped,
        })
    }

    async fn skip(&self, digest: String, seen: usize) -> RunReport {
        let secondary = if self.config.repair_secondary_on_skip {
            match self.reconcile_secondary(true).await {
                Ok(leg) => leg,
                Err(e) => {
                    warn!("Secondary self-repair failed: {}", e);
                    SecondaryLeg::Failed {
                        error: e.to_string(),
                    }
                }
            }
        } else {
            SecondaryLeg::NotConfigured
        };

        RunReport {
            status: RunStatus::Unchanged,
            source_digest: digest,
            facilities_seen: seen,
            facilities_skipped: 0,
            facilities_inland: 0,
            zone_count: None,
            primary: None,
            secondary,
            skipped: Vec::new(),
        }
    }

    /// Buffer and clip every facility. Failures are isolated to the facility.
    ///
    /// Output is sorted by facility code, then input position, regardless of
    /// the order in which workers finish.
    pub fn process_facilities(&self, records: &[Value], mask: &RegionMask) -> ProcessedFacilities {
        let mapping = FieldMapping::for_version(self.config.mapping);

        let outcomes: Vec<(usize, FacilityOutcome)> = records
            .par_iter()
            .enumerate()
            .map(|(index, record)| (index, self.process_facility(index, record, mapping, mask)))
            .collect();

        let mut features = Vec::new();
        let mut inland = 0;
        let mut skipped = Vec::new();
        for (index, outcome) in outcomes {
            match outcome {
                FacilityOutcome::Zone(feature) => features.push((index, feature)),
                FacilityOutcome::Inland => inland += 1,
                FacilityOutcome::Skipped(skip) => skipped.push(skip),
            }
        }

        features.sort_by(|(ia, a), (ib, b)| {
            let ka = a.properties.code.as_deref().unwrap_or("");
            let kb = b.properties.code.as_deref().unwrap_or("");
            ka.cmp(kb).then(ia.cmp(ib))
        });

        ProcessedFacilities {
            features: features.into_iter().map(|(_, f)| f).collect(),
            inland,
            skipped,
        }
    }

    fn process_facility(
        &self,
        index: usize,
        record: &Value,
        mapping: &FieldMapping,
        mask: &RegionMask,
    ) -> FacilityOutcome {
        let facility = match FacilityRecord::from_json(record, mapping) {
            Ok(facility) => facility,
            Err(e) => {
                warn!("Skipping facility #{}: {}", index, e);
                return FacilityOutcome::Skipped(SkippedFacility {
                    index,
                    code: None,
                    name: None,
                    reason: e.to_string(),
                });
            }
        };

        let reason = match catch_unwind(AssertUnwindSafe(|| self.build_zone(&facility, mask))) {
            Ok(Ok(Some(feature))) => return FacilityOutcome::Zone(feature),
            Ok(Ok(None)) => return FacilityOutcome::Inland,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "panicked while building zone".to_string(),
        };

        warn!("Skipping facility {} (#{}): {}", facility.label(), index, reason);
        FacilityOutcome::Skipped(SkippedFacility {
            index,
            code: facility.code.clone(),
            name: facility.name.clone(),
            reason,
        })
    }

    fn build_zone(
        &self,
        facility: &FacilityRecord,
        mask: &RegionMask,
    ) -> Result<Option<ZoneFeature>, SkipReason> {
        let (point, source) = facility.resolve_discharge_point()?;
        let disk = self.buffer.buffer(point, self.config.buffer_radius_m)?;
        let maritime = mask.subtract_from(&disk)?;

        Ok(ZoneGeometry::from_parts(maritime).map(|geometry| ZoneFeature {
            geometry,
            properties: ZoneProperties::from_facility(facility, source),
        }))
    }

    /// Re-render the KML from the stored primary artifact and publish it.
    pub async fn sync_secondary(&self) -> Result<SecondaryLeg, ZonesError> {
        self.reconcile_secondary(false).await
    }

    /// With `only_if_stale`, the KML is written only when the stored copy is
    /// missing or differs from a fresh rendering.
    async fn reconcile_secondary(&self, only_if_stale: bool) -> Result<SecondaryLeg, ZonesError> {
        let (Some(target), Some(store)) = (&self.config.secondary, &self.secondary) else {
            return Ok(SecondaryLeg::NotConfigured);
        };

        let key = &self.config.primary.key;
        let stored = read_object(
            self.primary.as_ref(),
            key,
            self.config.primary.parent.as_deref(),
        )
        .await
        .map_err(|source| PublishError::Lookup {
            key: key.clone(),
            source,
        })?;

        let Some(bytes) = stored else {
            warn!("No primary artifact at '{}', cannot sync KML", key);
            return Ok(SecondaryLeg::MissingPrimary);
        };

        let collection = ZoneCollection::from_geojson_bytes(&bytes)?;
        let kml = match render_kml(&collection) {
            Ok(kml) => kml,
            Err(e) => return Ok(render_failed(e)),
        };

        if only_if_stale {
            match read_object(store.as_ref(), &target.key, target.parent.as_deref()).await {
                Ok(Some(existing)) if existing == kml => {
                    info!("KML '{}' is up to date", target.key);
                    return Ok(SecondaryLeg::UpToDate);
                }
                Ok(Some(_)) => info!("KML '{}' is stale, republishing", target.key),
                Ok(None) => info!("KML '{}' is missing, republishing", target.key),
                Err(e) => warn!("Could not read KML '{}': {}", target.key, e),
            }
        }

        Ok(upload_secondary(store.as_ref(), target, kml).await)
    }

    async fn publish_secondary(&self, collection: &ZoneCollection) -> SecondaryLeg {
        let (Some(target), Some(store)) = (&self.config.secondary, &self.secondary) else {
            return SecondaryLeg::NotConfigured;
        };

        match render_kml(collection) {
            Ok(kml) => upload_secondary(store.as_ref(), target, kml).await,
            Err(e) => render_failed(e),
        }
    }
}

fn render_failed(e: KmlError) -> SecondaryLeg {
    warn!("Failed to render KML: {}", e);
    SecondaryLeg::Failed {
        error: e.to_string(),
    }
}

async fn upload_secondary(
    store: &dyn ObjectStore,
    target: &ArtifactTarget,
    kml: Vec<u8>,
) -> SecondaryLeg {
    match Publisher::publish(store, target, kml).await {
        Ok(receipt) => SecondaryLeg::Published { receipt },
        Err(e) => {
            warn!("Secondary publish failed: {}", e);
            SecondaryLeg::Failed {
                error: e.to_string(),
            }
        }
    }
}
