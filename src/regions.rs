//! Landmass region dataset loading.

use geo::Geometry;
use geojson::GeoJson;
use tracing::{info, warn};

use crate::error::{GeometryError, ReferenceDataError};
use crate::geometry::RegionMask;
use crate::publish::{read_object, ObjectStore};

/// Polygonal geometries of a GeoJSON region dataset, in input order.
pub fn parse_regions(bytes: &[u8]) -> Result<Vec<Geometry<f64>>, ReferenceDataError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ReferenceDataError::Parse(e.to_string()))?;
    let geojson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| ReferenceDataError::Parse(e.to_string()))?;

    let features = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(g) => vec![geojson::Feature::from(g)],
    };

    let mut regions = Vec::with_capacity(features.len());
    for (index, feature) in features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            warn!("Region feature {} has no geometry, ignoring", index);
            continue;
        };

        match Geometry::<f64>::try_from(geometry) {
            Ok(g @ (Geometry::Polygon(_) | Geometry::MultiPolygon(_))) => regions.push(g),
            Ok(_) => warn!("Region feature {} is not polygonal, ignoring", index),
            Err(e) => warn!("Region feature {} has invalid geometry: {}", index, e),
        }
    }

    Ok(regions)
}

/// Load the region dataset from the store and unify it into a mask.
pub async fn load_region_mask(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<RegionMask, ReferenceDataError> {
    let bytes = read_object(store, key, None)
        .await?
        .ok_or_else(|| ReferenceDataError::Missing(key.to_string()))?;

    let regions = parse_regions(&bytes)?;
    if regions.is_empty() {
        return Err(ReferenceDataError::Empty);
    }

    let mask = RegionMask::unify(&regions).map_err(|e| match e {
        GeometryError::EmptyMask => ReferenceDataError::Empty,
        other => ReferenceDataError::Geometry(other),
    })?;

    info!(
        "Loaded {} regions from '{}' ({} unified parts)",
        regions.len(),
        key,
        mask.len()
    );
    Ok(mask)
}
