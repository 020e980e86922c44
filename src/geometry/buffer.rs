//! Circular buffers of an exact metric radius.

use std::f64::consts::PI;

use geo::{Coord, LineString, Polygon};

use super::Projection;
use crate::error::GeometryError;

/// Fewest segments accepted for a circle approximation.
pub const MIN_SEGMENTS: usize = 32;

/// Builds disk polygons in the projected system and returns them in degrees.
#[derive(Debug, Clone)]
pub struct MetricBuffer {
    projection: Projection,
    segments: usize,
}

impl MetricBuffer {
    pub fn new(projection: Projection, segments: usize) -> Self {
        Self {
            projection,
            segments: segments.max(MIN_SEGMENTS),
        }
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Polygon approximating every point within `radius_m` metres of `center`.
    pub fn buffer(&self, center: Coord<f64>, radius_m: f64) -> Result<Polygon<f64>, GeometryError> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(GeometryError::InvalidRadius(radius_m));
        }

        let origin = self.projection.to_metric(center)?;

        // Counter-clockwise exterior, closed explicitly.
        let mut ring = Vec::with_capacity(self.segments + 1);
        for i in 0..self.segments {
            let theta = 2.0 * PI * i as f64 / self.segments as f64;
            ring.push(Coord {
                x: origin.x + radius_m * theta.cos(),
                y: origin.y + radius_m * theta.sin(),
            });
        }
        ring.push(ring[0]);

        let disk = Polygon::new(LineString::new(ring), vec![]);
        self.projection.geometry_to_geographic(&disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Contains, GeodesicArea, Point};

    #[test]
    fn test_geodesic_area_close_to_disk() {
        // Measured on the ellipsoid, independent of the grid that built it.
        let buffer = MetricBuffer::new(Projection::greek_grid(), 64);
        for (lon, lat) in [(23.5, 37.9), (20.0, 39.6), (28.2, 36.4), (24.0, 41.7), (26.1, 34.9)] {
            for radius in [50.0, 200.0, 1_000.0] {
                let polygon = buffer.buffer(Coord { x: lon, y: lat }, radius).unwrap();
                let area = polygon.geodesic_area_unsigned();
                let expected = PI * radius * radius;
                let rel = (area - expected).abs() / expected;
                assert!(rel < 0.01, "{lon},{lat} r {radius}: area {area} vs {expected}");
            }
        }
    }

    #[test]
    fn test_utm_buffer_geodesic_area() {
        let buffer = MetricBuffer::new(Projection::utm(34, true), 64);
        let polygon = buffer.buffer(Coord { x: 21.5, y: 38.0 }, 200.0).unwrap();
        let expected = PI * 200.0 * 200.0;
        let rel = (polygon.geodesic_area_unsigned() - expected).abs() / expected;
        assert!(rel < 0.01, "relative error {rel}");
    }

    #[test]
    fn test_buffer_is_circular_not_degree_scaled() {
        // A degree-scaled buffer would be stretched east-west at 38°N.
        let buffer = MetricBuffer::new(Projection::greek_grid(), 64);
        let polygon = buffer.buffer(Coord { x: 23.5, y: 38.0 }, 200.0).unwrap();
        let metric = buffer.projection().geometry_to_metric(&polygon).unwrap();
        let center = buffer.projection().to_metric(Coord { x: 23.5, y: 38.0 }).unwrap();

        for c in metric.exterior().coords() {
            let r = ((c.x - center.x).powi(2) + (c.y - center.y).powi(2)).sqrt();
            assert!((r - 200.0).abs() < 0.05, "vertex at {r} m");
        }
    }

    #[test]
    fn test_buffer_contains_center() {
        let buffer = MetricBuffer::new(Projection::greek_grid(), 32);
        let polygon = buffer.buffer(Coord { x: 23.5, y: 37.9 }, 200.0).unwrap();
        assert!(polygon.contains(&Point::new(23.5, 37.9)));
        assert_eq!(polygon.exterior().0.len(), 33);
    }

    #[test]
    fn test_segments_clamped_to_minimum() {
        let buffer = MetricBuffer::new(Projection::greek_grid(), 4);
        let polygon = buffer.buffer(Coord { x: 23.5, y: 37.9 }, 200.0).unwrap();
        assert_eq!(polygon.exterior().0.len(), MIN_SEGMENTS + 1);
    }

    #[test]
    fn test_degenerate_input_rejected() {
        let buffer = MetricBuffer::new(Projection::greek_grid(), 64);
        assert!(matches!(
            buffer.buffer(Coord { x: f64::INFINITY, y: 37.9 }, 200.0),
            Err(GeometryError::NonFinite { .. })
        ));
        assert!(matches!(
            buffer.buffer(Coord { x: 23.5, y: 37.9 }, 0.0),
            Err(GeometryError::InvalidRadius(_))
        ));
        assert!(matches!(
            buffer.buffer(Coord { x: 23.5, y: 37.9 }, f64::NAN),
            Err(GeometryError::InvalidRadius(_))
        ));
    }
}
