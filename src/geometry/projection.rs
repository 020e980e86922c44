//! WGS84 ↔ projected-metres reprojection (Snyder 1987, USGS formulas).
//!
//! Transverse Mercator forward and inverse series over a configurable
//! ellipsoid, with an optional three-parameter geocentric datum shift for
//! grids that are not on WGS84 (EPSG:2100 sits on GGRS87).

use geo::{Coord, MapCoords};

use crate::error::GeometryError;

// ── Ellipsoids ──────────────────────────────────────────────────────────

/// Reference ellipsoid defined by semi-major axis and inverse flattening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub a: f64,
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_223_563,
    };

    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };

    /// First eccentricity squared.
    fn e2(&self) -> f64 {
        let f = 1.0 / self.inv_f;
        2.0 * f - f * f
    }
}

/// Geocentric translation from the grid datum to WGS84, in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatumShift {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

// ── Projection ──────────────────────────────────────────────────────────

/// Transverse Mercator projected CRS paired with WGS84 geographic.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    name: String,
    ellipsoid: Ellipsoid,
    /// Central meridian in degrees
    lon0: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
    to_wgs84: Option<DatumShift>,
}

impl Projection {
    /// GGRS87 / Greek Grid (EPSG:2100).
    pub fn greek_grid() -> Self {
        Self {
            name: "EPSG:2100".to_string(),
            ellipsoid: Ellipsoid::GRS80,
            lon0: 24.0,
            k0: 0.9996,
            false_easting: 500_000.0,
            false_northing: 0.0,
            to_wgs84: Some(DatumShift {
                dx: -199.87,
                dy: 74.79,
                dz: 246.62,
            }),
        }
    }

    /// WGS84 / UTM zone `zone` (EPSG 326xx north, 327xx south).
    pub fn utm(zone: u8, north: bool) -> Self {
        let epsg = if north { 32600 } else { 32700 } + zone as u32;
        Self {
            name: format!("EPSG:{}", epsg),
            ellipsoid: Ellipsoid::WGS84,
            lon0: (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0,
            k0: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
            to_wgs84: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Geographic (lon, lat) degrees → projected (easting, northing) metres.
    pub fn to_metric(&self, c: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
        check_finite(c)?;
        let (lon, lat) = match self.to_wgs84 {
            Some(shift) => shift_datum(c.x, c.y, &Ellipsoid::WGS84, &self.ellipsoid, shift, -1.0),
            None => (c.x, c.y),
        };
        let (e, n) = self.forward(lon, lat);
        check_finite(Coord { x: e, y: n })
    }

    /// Projected (easting, northing) metres → geographic (lon, lat) degrees.
    pub fn to_geographic(&self, c: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
        check_finite(c)?;
        let (lon, lat) = self.inverse(c.x, c.y);
        let (lon, lat) = match self.to_wgs84 {
            Some(shift) => shift_datum(lon, lat, &self.ellipsoid, &Ellipsoid::WGS84, shift, 1.0),
            None => (lon, lat),
        };
        check_finite(Coord { x: lon, y: lat })
    }

    /// Reproject every vertex of a geometry to metres, keeping its structure.
    pub fn geometry_to_metric<G>(&self, geometry: &G) -> Result<G::Output, GeometryError>
    where
        G: MapCoords<f64, f64>,
    {
        geometry.try_map_coords(|c| self.to_metric(c))
    }

    /// Reproject every vertex of a geometry back to degrees.
    pub fn geometry_to_geographic<G>(&self, geometry: &G) -> Result<G::Output, GeometryError>
    where
        G: MapCoords<f64, f64>,
    {
        geometry.try_map_coords(|c| self.to_geographic(c))
    }

    /// Snyder eq. 8-9 / 8-10.
    fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let e2 = self.ellipsoid.e2();
        let ep2 = e2 / (1.0 - e2);
        let a = self.ellipsoid.a;

        let lat = lat_deg.to_radians();
        let dlon = (lon_deg - self.lon0).to_radians();

        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let tan_lat = lat.tan();

        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let t = tan_lat * tan_lat;
        let c = ep2 * cos_lat * cos_lat;
        let a_coeff = cos_lat * dlon;
        let m = meridional_arc(a, e2, lat);

        let a2 = a_coeff * a_coeff;
        let a4 = a2 * a2;
        let a6 = a4 * a2;

        let easting = self.k0
            * n
            * (a_coeff
                + (1.0 - t + c) * a2 * a_coeff / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a4 * a_coeff / 120.0)
            + self.false_easting;

        let northing = self.k0
            * (m + n
                * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0))
            + self.false_northing;

        (easting, northing)
    }

    /// Snyder eq. 8-12 to 8-18 (footpoint latitude series).
    fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let e2 = self.ellipsoid.e2();
        let ep2 = e2 / (1.0 - e2);
        let a = self.ellipsoid.a;
        let e4 = e2 * e2;
        let e6 = e4 * e2;

        let m = (northing - self.false_northing) / self.k0;
        let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let sqrt_1_e2 = (1.0 - e2).sqrt();
        let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
        let e1_2 = e1 * e1;
        let e1_3 = e1_2 * e1;
        let e1_4 = e1_3 * e1;

        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

        let sin_phi1 = phi1.sin();
        let cos_phi1 = phi1.cos();
        let tan_phi1 = phi1.tan();

        let c1 = ep2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let w = 1.0 - e2 * sin_phi1 * sin_phi1;
        let n1 = a / w.sqrt();
        let r1 = a * (1.0 - e2) / w.powf(1.5);
        let d = (easting - self.false_easting) / (n1 * self.k0);

        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d3 * d;
        let d5 = d4 * d;
        let d6 = d5 * d;

        let lat = phi1
            - (n1 * tan_phi1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d6
                        / 720.0);

        let dlon = (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d5
                / 120.0)
            / cos_phi1;

        (self.lon0 + dlon.to_degrees(), lat.to_degrees())
    }
}

fn check_finite(c: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
    if c.x.is_finite() && c.y.is_finite() {
        Ok(c)
    } else {
        Err(GeometryError::NonFinite { x: c.x, y: c.y })
    }
}

/// Meridional arc from equator to latitude `lat` (radians). Snyder eq. 3-21.
fn meridional_arc(a: f64, e2: f64, lat: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    a * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

// ── Datum shift ─────────────────────────────────────────────────────────

/// Move a point between datums through geocentric coordinates.
///
/// `sign` = 1.0 applies the shift (grid datum → WGS84), -1.0 removes it.
fn shift_datum(
    lon_deg: f64,
    lat_deg: f64,
    from: &Ellipsoid,
    to: &Ellipsoid,
    shift: DatumShift,
    sign: f64,
) -> (f64, f64) {
    let (x, y, z) = geodetic_to_geocentric(lon_deg, lat_deg, from);
    geocentric_to_geodetic(
        x + sign * shift.dx,
        y + sign * shift.dy,
        z + sign * shift.dz,
        to,
    )
}

fn geodetic_to_geocentric(lon_deg: f64, lat_deg: f64, ellipsoid: &Ellipsoid) -> (f64, f64, f64) {
    let e2 = ellipsoid.e2();
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let n = ellipsoid.a / (1.0 - e2 * lat.sin() * lat.sin()).sqrt();

    (
        n * lat.cos() * lon.cos(),
        n * lat.cos() * lon.sin(),
        n * (1.0 - e2) * lat.sin(),
    )
}

fn geocentric_to_geodetic(x: f64, y: f64, z: f64, ellipsoid: &Ellipsoid) -> (f64, f64) {
    let e2 = ellipsoid.e2();
    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..6 {
        let n = ellipsoid.a / (1.0 - e2 * lat.sin() * lat.sin()).sqrt();
        let h = p / lat.cos() - n;
        lat = z.atan2(p * (1.0 - e2 * n / (n + h)));
    }

    (lon.to_degrees(), lat.to_degrees())
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon};

    fn assert_close(a: f64, b: f64, tol: f64, msg: &str) {
        let diff = (a - b).abs();
        assert!(
            diff < tol,
            "{msg}: expected {b}, got {a}, diff {diff} exceeds tolerance {tol}"
        );
    }

    // pyproj: Transformer.from_crs(4326, 32630, always_xy=True)
    //   .transform(-3.7037, 40.4168) → (440298.94, 4474257.31)
    #[test]
    fn madrid_to_utm30n() {
        let p = Projection::utm(30, true);
        let m = p.to_metric(Coord { x: -3.7037, y: 40.4168 }).unwrap();
        assert_close(m.x, 440_298.94, 1.0, "easting");
        assert_close(m.y, 4_474_257.31, 1.0, "northing");
    }

    #[test]
    fn buenos_aires_to_utm21s() {
        let p = Projection::utm(21, false);
        let m = p.to_metric(Coord { x: -58.3816, y: -34.6037 }).unwrap();
        assert_close(m.x, 373_317.50, 1.0, "easting");
        assert_close(m.y, 6_170_036.17, 1.0, "northing");
    }

    #[test]
    fn utm_round_trip() {
        let p = Projection::utm(34, true);
        let original = Coord { x: 23.5, y: 37.9 };
        let back = p.to_geographic(p.to_metric(original).unwrap()).unwrap();
        assert_close(back.x, original.x, 1e-8, "lon");
        assert_close(back.y, original.y, 1e-8, "lat");
    }

    #[test]
    fn greek_grid_round_trip_across_greece() {
        let p = Projection::greek_grid();
        for (lon, lat) in [(19.9, 39.6), (23.7348, 37.9755), (26.1, 35.2), (28.2, 36.4)] {
            let original = Coord { x: lon, y: lat };
            let back = p.to_geographic(p.to_metric(original).unwrap()).unwrap();
            assert_close(back.x, lon, 1e-7, "lon");
            assert_close(back.y, lat, 1e-7, "lat");
        }
    }

    // WGS84 → GGRS87 through the EPSG:1272 geocentric translation, then
    // Krüger 6th-order TM on GRS80 (matches PROJ's etmerc to the millimetre).
    #[test]
    fn athens_to_greek_grid() {
        let p = Projection::greek_grid();
        let m = p.to_metric(Coord { x: 23.7275, y: 37.9838 }).unwrap();
        assert_close(m.x, 475_920.27, 1.0, "easting");
        assert_close(m.y, 4_203_764.70, 1.0, "northing");
    }

    #[test]
    fn greek_grid_reference_points() {
        let p = Projection::greek_grid();
        for (lon, lat, e, n) in [
            (22.9444, 40.6401, 410_590.31, 4_499_055.40),
            (21.7346, 38.2466, 301_609.03, 4_235_315.29),
            (28.2176, 36.4341, 877_981.34, 4_040_083.15),
            (19.9219, 39.6243, 149_786.93, 4_393_724.79),
        ] {
            let m = p.to_metric(Coord { x: lon, y: lat }).unwrap();
            assert_close(m.x, e, 1.0, &format!("easting at {lon},{lat}"));
            assert_close(m.y, n, 1.0, &format!("northing at {lon},{lat}"));
        }
    }

    #[test]
    fn greek_grid_central_meridian_near_false_easting() {
        // The datum shift moves points by at most a few hundred metres.
        let p = Projection::greek_grid();
        let m = p.to_metric(Coord { x: 24.0, y: 38.0 }).unwrap();
        assert_close(m.x, 500_000.0, 300.0, "easting near CM");
        assert!(m.y > 4_150_000.0 && m.y < 4_250_000.0, "northing {}", m.y);
    }

    #[test]
    fn greek_grid_preserves_local_distances() {
        // 0.01° of latitude is ~1109 m around 38°N.
        let p = Projection::greek_grid();
        let a = p.to_metric(Coord { x: 23.5, y: 38.0 }).unwrap();
        let b = p.to_metric(Coord { x: 23.5, y: 38.01 }).unwrap();
        let d = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
        assert_close(d, 1109.6, 3.0, "distance");
    }

    #[test]
    fn rejects_non_finite() {
        let p = Projection::greek_grid();
        let err = p.to_metric(Coord { x: f64::NAN, y: 38.0 }).unwrap_err();
        assert!(matches!(err, GeometryError::NonFinite { .. }));
    }

    #[test]
    fn transforms_every_vertex_keeping_structure() {
        let p = Projection::greek_grid();
        let exterior = LineString::from(vec![(23.0, 38.0), (23.1, 38.0), (23.1, 38.1), (23.0, 38.0)]);
        let hole = LineString::from(vec![(23.05, 38.02), (23.07, 38.02), (23.06, 38.04), (23.05, 38.02)]);
        let polygon = Polygon::new(exterior, vec![hole]);

        let metric = p.geometry_to_metric(&polygon).unwrap();
        assert_eq!(metric.exterior().0.len(), 4);
        assert_eq!(metric.interiors().len(), 1);
        assert!(metric.exterior().0[0].x > 100_000.0);

        let back = p.geometry_to_geographic(&metric).unwrap();
        assert_close(back.interiors()[0].0[2].y, 38.04, 1e-7, "hole vertex");
    }
}
