//! Region algebra: normalization, union and difference over polygonal geometry.

use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{
    unary_union, Area, BooleanOps, BoundingRect, CoordsIter, Geometry, LineString, MultiPolygon,
    Polygon, RemoveRepeatedPoints, Validation,
};
use rstar::{RTree, RTreeObject, AABB};
use tracing::debug;

use crate::error::GeometryError;

/// Area (square degrees) under which a geometry counts as empty.
///
/// Roughly 0.01 m² at Mediterranean latitudes; absorbs reprojection residue.
pub const EMPTY_AREA_TOLERANCE: f64 = 1e-12;

/// Run a boolean overlay, turning a panic inside it into an error.
fn guarded<F>(op: F) -> Result<MultiPolygon<f64>, GeometryError>
where
    F: FnOnce() -> MultiPolygon<f64>,
{
    catch_unwind(AssertUnwindSafe(op)).map_err(|_| GeometryError::OverlayPanic)
}

/// Accept Polygon and MultiPolygon, reject everything else.
pub fn to_multipolygon(geometry: &Geometry<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Ok(mp.clone()),
        Geometry::Point(_) => Err(GeometryError::Unsupported("Point")),
        Geometry::Line(_) => Err(GeometryError::Unsupported("Line")),
        Geometry::LineString(_) => Err(GeometryError::Unsupported("LineString")),
        Geometry::MultiPoint(_) => Err(GeometryError::Unsupported("MultiPoint")),
        Geometry::MultiLineString(_) => Err(GeometryError::Unsupported("MultiLineString")),
        Geometry::GeometryCollection(_) => Err(GeometryError::Unsupported("GeometryCollection")),
        Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Ok(MultiPolygon::new(vec![t.to_polygon()])),
    }
}

/// True when the geometry's area is below [`EMPTY_AREA_TOLERANCE`].
pub fn is_effectively_empty(geometry: &MultiPolygon<f64>) -> bool {
    geometry.unsigned_area() < EMPTY_AREA_TOLERANCE
}

/// Drop parts whose area is floating-point residue.
fn drop_slivers(geometry: MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        geometry
            .into_iter()
            .filter(|p| p.unsigned_area() >= EMPTY_AREA_TOLERANCE)
            .collect(),
    )
}

fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let ring = ring.remove_repeated_points();
    if ring.0.len() < 4 {
        return None;
    }
    Some(ring)
}

/// Structural cleanup only. Area is not a usable filter here: the lobes of a
/// self-intersecting ring cancel in the shoelace sum.
fn clean_polygon(polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = clean_ring(polygon.exterior())?;
    let interiors = polygon.interiors().iter().filter_map(clean_ring).collect();
    Some(Polygon::new(exterior, interiors))
}

/// Repair a polygonal geometry so the overlay operations can trust it.
///
/// Removes duplicate vertices and degenerate rings, then resolves
/// self-intersections by re-noding the geometry against itself. Fails only
/// when the repaired result is still not a valid geometry.
pub fn normalize(geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
    if let Some(c) = geometry
        .coords_iter()
        .find(|c| !c.x.is_finite() || !c.y.is_finite())
    {
        return Err(GeometryError::NonFinite { x: c.x, y: c.y });
    }

    let cleaned: Vec<Polygon<f64>> = geometry.iter().filter_map(clean_polygon).collect();
    if cleaned.is_empty() {
        return Ok(MultiPolygon::new(vec![]));
    }

    let cleaned = MultiPolygon::new(cleaned);
    if cleaned.is_valid() {
        return Ok(drop_slivers(cleaned));
    }

    let resolved = drop_slivers(guarded(|| cleaned.union(&cleaned))?);
    if !resolved.is_valid() {
        return Err(GeometryError::Invalid(format!(
            "{} part(s) still invalid after re-noding",
            resolved.0.len()
        )));
    }
    Ok(resolved)
}

/// Merge many region geometries into one minimal cover.
///
/// Empty input yields an empty geometry; callers that subtract must treat
/// that as a precondition failure (see [`RegionMask::unify`]).
pub fn union_all(geometries: &[Geometry<f64>]) -> Result<MultiPolygon<f64>, GeometryError> {
    let mut polygons = Vec::new();
    for geometry in geometries {
        let normalized = normalize(&to_multipolygon(geometry)?)?;
        polygons.extend(normalized);
    }

    if polygons.is_empty() {
        return Ok(MultiPolygon::new(vec![]));
    }

    Ok(drop_slivers(guarded(|| unary_union(polygons.iter()))?))
}

/// Portion of `a` not covered by `b`.
///
/// An empty `b` is rejected: subtracting nothing would silently return `a`.
pub fn difference(
    a: &Geometry<f64>,
    b: &Geometry<f64>,
) -> Result<MultiPolygon<f64>, GeometryError> {
    let b = normalize(&to_multipolygon(b)?)?;
    if is_effectively_empty(&b) {
        return Err(GeometryError::EmptyMask);
    }
    let a = normalize(&to_multipolygon(a)?)?;
    Ok(drop_slivers(guarded(|| a.difference(&b))?))
}

// ── Region mask ─────────────────────────────────────────────────────────

#[derive(Debug)]
struct MaskPart {
    polygon: Polygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for MaskPart {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl MaskPart {
    fn new(polygon: Polygon<f64>) -> Option<Self> {
        let rect = polygon.bounding_rect()?;
        Some(Self {
            envelope: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            polygon,
        })
    }
}

/// The unified landmass, guaranteed non-empty, indexed by part envelope.
#[derive(Debug)]
pub struct RegionMask {
    tree: RTree<MaskPart>,
    area: f64,
}

impl RegionMask {
    /// Union the regions; fails with [`GeometryError::EmptyMask`] if nothing remains.
    pub fn unify(regions: &[Geometry<f64>]) -> Result<Self, GeometryError> {
        let unified = union_all(regions)?;
        if is_effectively_empty(&unified) {
            return Err(GeometryError::EmptyMask);
        }

        let area = unified.unsigned_area();
        let parts: Vec<MaskPart> = unified.into_iter().filter_map(MaskPart::new).collect();
        debug!("Region mask unified into {} parts", parts.len());

        Ok(Self {
            tree: RTree::bulk_load(parts),
            area,
        })
    }

    /// Number of disjoint parts in the mask.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Total area in square degrees.
    pub fn area(&self) -> f64 {
        self.area
    }

    /// The unified mask as a single geometry.
    pub fn geometry(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(self.tree.iter().map(|p| p.polygon.clone()).collect())
    }

    /// Portion of `polygon` lying outside the mask. Possibly empty.
    pub fn subtract_from(&self, polygon: &Polygon<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
        let subject = normalize(&MultiPolygon::new(vec![polygon.clone()]))?;
        let Some(rect) = subject.bounding_rect() else {
            return Ok(subject);
        };

        let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let nearby: Vec<Polygon<f64>> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|part| part.polygon.clone())
            .collect();

        if nearby.is_empty() {
            return Ok(subject);
        }

        let clip = MultiPolygon::new(nearby);
        Ok(drop_slivers(guarded(|| subject.difference(&clip))?))
    }
}
