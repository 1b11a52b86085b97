//! Zone areas in a projected coordinate system.
//!
//! Areas are never taken in raw longitude/latitude. Geographic polygons are
//! forward-projected either to a UTM zone (country-appropriate) or to a
//! cylindrical equal-area plane before the planar area is measured.

use crate::types::{CoordinateSystem, NtlError, NtlResult};
use geo::{Area, MapCoords, MultiPolygon};
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (meters)
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM central scale factor
const UTM_K0: f64 = 0.9996;
/// Radius of the sphere used by EPSG:6933-style equal-area grids
const AUTHALIC_RADIUS: f64 = 6_371_007.181;
/// Standard parallel of the equal-area projection (degrees)
const EQUAL_AREA_STANDARD_PARALLEL: f64 = 30.0;

/// Projection used for area computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AreaProjection {
    /// Transverse Mercator on WGS84, 6° zones
    Utm { zone: u8, south: bool },
    /// Lambert cylindrical equal-area on the authalic sphere
    CylindricalEqualArea,
    /// Coordinates are already projected in meters
    Native,
}

impl AreaProjection {
    /// Projection for an EPSG code (326xx, 327xx, 6933)
    pub fn from_epsg(epsg: u32) -> NtlResult<Self> {
        match epsg {
            32601..=32660 => Ok(AreaProjection::Utm {
                zone: (epsg - 32600) as u8,
                south: false,
            }),
            32701..=32760 => Ok(AreaProjection::Utm {
                zone: (epsg - 32700) as u8,
                south: true,
            }),
            6933 => Ok(AreaProjection::CylindricalEqualArea),
            _ => Err(NtlError::InvalidParameter(format!(
                "EPSG:{} is not a supported area projection",
                epsg
            ))),
        }
    }

    /// Country-appropriate projection keyed by ISO3 code
    pub fn for_country(iso: &str) -> Self {
        let epsg = match iso.to_ascii_uppercase().as_str() {
            "HTI" => 32618,
            "NPL" => 32645,
            "NAM" => 32733,
            "GHA" => 32630,
            "MOZ" => 32736,
            other => {
                log::debug!("No UTM zone registered for {}, using equal-area", other);
                return AreaProjection::CylindricalEqualArea;
            }
        };
        // every code above is in the UTM ranges
        AreaProjection::from_epsg(epsg).unwrap_or(AreaProjection::CylindricalEqualArea)
    }

    /// Projection to use for zones in `crs`
    pub fn resolve(self, crs: CoordinateSystem) -> Self {
        match crs {
            CoordinateSystem::Projected { .. } => AreaProjection::Native,
            CoordinateSystem::Geographic => self,
        }
    }

    /// Forward-project a (lon, lat) pair in degrees to meters
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            AreaProjection::Utm { zone, south } => utm_forward(lon, lat, zone, south),
            AreaProjection::CylindricalEqualArea => {
                let phi_s = EQUAL_AREA_STANDARD_PARALLEL.to_radians();
                (
                    AUTHALIC_RADIUS * lon.to_radians() * phi_s.cos(),
                    AUTHALIC_RADIUS * lat.to_radians().sin() / phi_s.cos(),
                )
            }
            AreaProjection::Native => (lon, lat),
        }
    }

    /// Polygon area in square kilometers
    pub fn area_km2(&self, geometry: &MultiPolygon<f64>) -> f64 {
        let projected = geometry.map_coords(|c| {
            let (x, y) = self.project(c.x, c.y);
            geo::Coord { x, y }
        });
        projected.unsigned_area() / 1.0e6
    }
}

impl Default for AreaProjection {
    fn default() -> Self {
        AreaProjection::CylindricalEqualArea
    }
}

/// UTM forward projection (Snyder, Map Projections - A Working Manual, p. 61)
fn utm_forward(lon: f64, lat: f64, zone: u8, south: bool) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let lon0 = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
    let phi = lat.to_radians();
    let dlam = (lon - lon0).to_radians();

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * dlam;

    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

    let x = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + 500_000.0;

    let mut y = UTM_K0
        * (m + n
            * tan_phi
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if south {
        y += 10_000_000.0;
    }

    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;

    fn cell(lon0: f64, lat0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: lon0, y: lat0),
            (x: lon0 + size, y: lat0),
            (x: lon0 + size, y: lat0 + size),
            (x: lon0, y: lat0 + size),
        ]])
    }

    #[test]
    fn test_utm_central_meridian_on_equator() {
        let (x, y) = utm_forward(-75.0, 0.0, 18, false);
        assert_relative_eq!(x, 500_000.0, epsilon = 1e-6);
        assert_relative_eq!(y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_utm_known_point() {
        // Port-au-Prince, zone 18N
        let (x, y) = utm_forward(-72.3388, 18.5392, 18, false);
        assert!((x - 780_000.0).abs() < 5_000.0, "easting {}", x);
        assert!((y - 2_052_000.0).abs() < 5_000.0, "northing {}", y);
    }

    #[test]
    fn test_equal_area_matches_spherical_band_area() {
        let area = AreaProjection::CylindricalEqualArea.area_km2(&cell(10.0, 0.0, 1.0));
        let r_km = AUTHALIC_RADIUS / 1000.0;
        let expected = r_km * r_km * 1.0f64.to_radians() * 1.0f64.to_radians().sin();
        assert_relative_eq!(area, expected, max_relative = 1e-9);
    }

    #[test]
    fn test_utm_and_equal_area_agree_near_central_meridian() {
        let geom = cell(-75.5, 18.0, 1.0);
        let utm = AreaProjection::from_epsg(32618).unwrap().area_km2(&geom);
        let eq = AreaProjection::CylindricalEqualArea.area_km2(&geom);
        assert!((utm - eq).abs() / eq < 0.01, "utm {} vs equal-area {}", utm, eq);
    }

    #[test]
    fn test_native_area() {
        let geom = cell(0.0, 0.0, 2000.0);
        assert_relative_eq!(AreaProjection::Native.area_km2(&geom), 4.0);
    }

    #[test]
    fn test_from_epsg() {
        assert_eq!(
            AreaProjection::from_epsg(32733).unwrap(),
            AreaProjection::Utm { zone: 33, south: true }
        );
        assert!(AreaProjection::from_epsg(4326).is_err());
        assert_eq!(
            AreaProjection::for_country("npl"),
            AreaProjection::Utm { zone: 45, south: false }
        );
        assert_eq!(AreaProjection::for_country("XYZ"), AreaProjection::CylindricalEqualArea);
    }

    #[test]
    fn test_projected_zones_use_native() {
        let p = AreaProjection::for_country("HTI").resolve(CoordinateSystem::Projected { epsg: 32618 });
        assert_eq!(p, AreaProjection::Native);
    }
}
