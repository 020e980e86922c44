//! Zone lookup strategies.

use geo::Point;
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;
use tracing::info;

use crate::models::ZoneFeature;

/// Finds the first zone, in collection order, covering a point.
pub trait ZoneLookup: Send + Sync {
    fn first_containing(&self, point: &Point<f64>) -> Option<&ZoneFeature>;

    fn zones(&self) -> &[ZoneFeature];

    fn len(&self) -> usize {
        self.zones().len()
    }

    fn is_empty(&self) -> bool {
        self.zones().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupStrategy {
    #[default]
    Linear,
    Rtree,
}

impl LookupStrategy {
    pub fn build(self, zones: Vec<ZoneFeature>) -> Box<dyn ZoneLookup> {
        match self {
            LookupStrategy::Linear => Box::new(LinearZoneIndex::new(zones)),
            LookupStrategy::Rtree => Box::new(RTreeZoneIndex::build(zones)),
        }
    }
}

/// Scans every zone. Fine for tens to low hundreds of zones.
pub struct LinearZoneIndex {
    zones: Vec<ZoneFeature>,
}

impl LinearZoneIndex {
    pub fn new(zones: Vec<ZoneFeature>) -> Self {
        Self { zones }
    }
}

impl ZoneLookup for LinearZoneIndex {
    fn first_containing(&self, point: &Point<f64>) -> Option<&ZoneFeature> {
        self.zones.iter().find(|z| z.geometry.covers(point))
    }

    fn zones(&self) -> &[ZoneFeature] {
        &self.zones
    }
}

/// Envelope of one zone, pointing back at its collection position.
struct IndexedZone {
    position: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedZone {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over zone envelopes.
pub struct RTreeZoneIndex {
    zones: Vec<ZoneFeature>,
    tree: RTree<IndexedZone>,
}

impl RTreeZoneIndex {
    pub fn build(zones: Vec<ZoneFeature>) -> Self {
        let indexed: Vec<IndexedZone> = zones
            .iter()
            .enumerate()
            .filter_map(|(position, zone)| {
                let rect = zone.geometry.bounding_rect()?;
                Some(IndexedZone {
                    position,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        let tree = RTree::bulk_load(indexed);
        info!("Zone index built with {} entries", tree.size());
        Self { zones, tree }
    }
}

impl ZoneLookup for RTreeZoneIndex {
    fn first_containing(&self, point: &Point<f64>) -> Option<&ZoneFeature> {
        let query = AABB::from_point([point.x(), point.y()]);

        // Candidates come back in tree order; keep the earliest collection position.
        self.tree
            .locate_in_envelope_intersecting(&query)
            .filter(|iz| self.zones[iz.position].geometry.covers(point))
            .map(|iz| iz.position)
            .min()
            .map(|position| &self.zones[position])
    }

    fn zones(&self) -> &[ZoneFeature] {
        &self.zones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ZoneGeometry, ZoneProperties};
    use geo::polygon;

    fn zone(code: &str, x0: f64, y0: f64, size: f64) -> ZoneFeature {
        ZoneFeature {
            geometry: ZoneGeometry::Polygon(polygon![
                (x: x0, y: y0),
                (x: x0 + size, y: y0),
                (x: x0 + size, y: y0 + size),
                (x: x0, y: y0 + size),
                (x: x0, y: y0),
            ]),
            properties: ZoneProperties {
                code: Some(code.to_string()),
                ..Default::default()
            },
        }
    }

    fn zones() -> Vec<ZoneFeature> {
        // B and C overlap; B comes first.
        vec![
            zone("A", 0.0, 0.0, 1.0),
            zone("B", 5.0, 5.0, 2.0),
            zone("C", 6.0, 6.0, 2.0),
        ]
    }

    fn code(zone: Option<&ZoneFeature>) -> Option<&str> {
        zone.and_then(|z| z.properties.code.as_deref())
    }

    #[test]
    fn test_strategies_agree_on_first_match() {
        for strategy in [LookupStrategy::Linear, LookupStrategy::Rtree] {
            let index = strategy.build(zones());
            assert_eq!(index.len(), 3);
            assert_eq!(code(index.first_containing(&Point::new(0.5, 0.5))), Some("A"));
            assert_eq!(code(index.first_containing(&Point::new(6.5, 6.5))), Some("B"));
            assert_eq!(code(index.first_containing(&Point::new(7.5, 7.5))), Some("C"));
            assert_eq!(code(index.first_containing(&Point::new(3.0, 3.0))), None);
        }
    }

    #[test]
    fn test_boundary_point_matches() {
        for strategy in [LookupStrategy::Linear, LookupStrategy::Rtree] {
            let index = strategy.build(zones());
            assert_eq!(code(index.first_containing(&Point::new(1.0, 0.5))), Some("A"));
        }
    }

    #[test]
    fn test_empty_index() {
        let index = LookupStrategy::Rtree.build(vec![]);
        assert!(index.is_empty());
        assert!(index.first_containing(&Point::new(0.0, 0.0)).is_none());
    }
}
