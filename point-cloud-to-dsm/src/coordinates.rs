/// CRS classification and the reprojections supported between source clouds and output
use crate::bounds::PointCloudBounds;
use crate::constants::EARTH_RADIUS;
use crate::error::{DsmError, DsmResult};
use crate::point_cloud::PointCloud;

pub const EPSG_WGS84: u32 = 4326;
pub const EPSG_WEB_MERCATOR: u32 = 3857;

/// Latitude beyond which spherical mercator is undefined.
const MERCATOR_MAX_LATITUDE: f64 = 85.051_128_779_806_6;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// EPSG codes 4000-4999 are geographic 2D systems (units: degrees).
pub fn is_geographic(epsg: u32) -> bool {
    (4000..5000).contains(&epsg)
}

/// Coordinate systems with a closed-form transform to and from WGS84.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Crs {
    Geographic,
    WebMercator,
    /// WGS84 / UTM, EPSG 326xx (north) and 327xx (south).
    Utm { zone: u32, north: bool },
}

impl Crs {
    fn from_epsg(epsg: u32) -> Option<Self> {
        match epsg {
            EPSG_WGS84 => Some(Self::Geographic),
            EPSG_WEB_MERCATOR => Some(Self::WebMercator),
            32601..=32660 => Some(Self::Utm {
                zone: epsg - 32600,
                north: true,
            }),
            32701..=32760 => Some(Self::Utm {
                zone: epsg - 32700,
                north: false,
            }),
            _ => None,
        }
    }

    /// (longitude, latitude) in degrees.
    fn unproject(self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Self::Geographic => (x, y),
            Self::WebMercator => (
                (x / EARTH_RADIUS).to_degrees(),
                (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
            ),
            Self::Utm { zone, north } => TransverseMercator::utm(zone, north).inverse(x, y),
        }
    }

    /// From (longitude, latitude) in degrees.
    fn project(self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Self::Geographic => (lon, lat),
            Self::WebMercator => {
                let lat = lat.clamp(-MERCATOR_MAX_LATITUDE, MERCATOR_MAX_LATITUDE);
                (
                    EARTH_RADIUS * lon.to_radians(),
                    EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
                )
            }
            Self::Utm { zone, north } => TransverseMercator::utm(zone, north).forward(lon, lat),
        }
    }
}

/// Ellipsoidal transverse mercator on WGS84, Krueger series to third order in `n`.
struct TransverseMercator {
    central_meridian: f64,
    false_northing: f64,
    /// `k0` times the rectifying radius.
    k0a: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
    /// `2 sqrt(n) / (1 + n)`, the eccentricity.
    e: f64,
}

impl TransverseMercator {
    fn utm(zone: u32, north: bool) -> Self {
        let n = WGS84_F / (2.0 - WGS84_F);
        let (n2, n3) = (n * n, n * n * n);
        Self {
            central_meridian: (zone as f64 * 6.0 - 183.0).to_radians(),
            false_northing: if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH },
            k0a: UTM_K0 * WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            alpha: [
                n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3,
                13.0 / 48.0 * n2 - 3.0 / 5.0 * n3,
                61.0 / 240.0 * n3,
            ],
            beta: [
                n / 2.0 - 2.0 / 3.0 * n2 + 37.0 / 96.0 * n3,
                n2 / 48.0 + n3 / 15.0,
                17.0 / 480.0 * n3,
            ],
            delta: [
                2.0 * n - 2.0 / 3.0 * n2 - 2.0 * n3,
                7.0 / 3.0 * n2 - 8.0 / 5.0 * n3,
                56.0 / 15.0 * n3,
            ],
            e: 2.0 * n.sqrt() / (1.0 + n),
        }
    }

    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let dlam = lon.to_radians() - self.central_meridian;
        let t = (phi.sin().atanh() - self.e * (self.e * phi.sin()).atanh()).sinh();
        let xi_p = t.atan2(dlam.cos());
        let eta_p = (dlam.sin() / (1.0 + t * t).sqrt()).atanh();

        let (mut xi, mut eta) = (xi_p, eta_p);
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }
        (
            UTM_FALSE_EASTING + self.k0a * eta,
            self.false_northing + self.k0a * xi,
        )
    }

    fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let xi = (northing - self.false_northing) / self.k0a;
        let eta = (easting - UTM_FALSE_EASTING) / self.k0a;

        let (mut xi_p, mut eta_p) = (xi, eta);
        for (j, b) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }
        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (j, d) in self.delta.iter().enumerate() {
            phi += d * (2.0 * (j + 1) as f64 * chi).sin();
        }
        let lam = self.central_meridian + eta_p.sinh().atan2(xi_p.cos());
        (lam.to_degrees(), phi.to_degrees())
    }
}

/// Planimetric transform between two EPSG codes. Heights are kept as is.
///
/// Pairs of distinct systems go through WGS84 geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reprojection {
    pub from: u32,
    pub to: u32,
    /// `None` for the identity.
    systems: Option<(Crs, Crs)>,
}

impl Reprojection {
    pub fn new(from: u32, to: u32) -> DsmResult<Self> {
        let systems = if from == to {
            None
        } else {
            match (Crs::from_epsg(from), Crs::from_epsg(to)) {
                (Some(source), Some(target)) => Some((source, target)),
                _ => {
                    return Err(DsmError::configuration(format!(
                        "no reprojection available from EPSG:{from} to EPSG:{to}"
                    )));
                }
            }
        };
        Ok(Self { from, to, systems })
    }

    pub fn is_identity(&self) -> bool {
        self.systems.is_none()
    }

    /// Transform one planimetric coordinate. Geographic order is (longitude, latitude).
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        match self.systems {
            None => (x, y),
            Some((source, target)) => {
                let (lon, lat) = source.unproject(x, y);
                target.project(lon, lat)
            }
        }
    }

    /// Bounds of the transformed footprint, sampled on corners and edge midpoints.
    pub fn apply_bounds(&self, bounds: &PointCloudBounds) -> PointCloudBounds {
        if self.is_identity() {
            return *bounds;
        }
        let (cx, cy) = bounds.center_xy();
        let samples = [
            (bounds.min_x, bounds.min_y),
            (bounds.min_x, bounds.max_y),
            (bounds.max_x, bounds.min_y),
            (bounds.max_x, bounds.max_y),
            (cx, bounds.min_y),
            (cx, bounds.max_y),
            (bounds.min_x, cy),
            (bounds.max_x, cy),
        ];
        let mut out = PointCloudBounds::new();
        for (x, y) in samples {
            let (tx, ty) = self.apply(x, y);
            out.update(tx, ty, f64::NAN);
        }
        out.min_z = bounds.min_z;
        out.max_z = bounds.max_z;
        out
    }

    /// Reproject every point of `cloud`, consuming it.
    pub fn apply_cloud(&self, mut cloud: PointCloud) -> PointCloud {
        if self.is_identity() {
            return cloud;
        }
        for i in 0..cloud.len() {
            let (x, y) = self.apply(cloud.x[i], cloud.y[i]);
            cloud.x[i] = x;
            cloud.y[i] = y;
        }
        cloud.attributes.epsg = self.to;
        cloud
    }
}

/// Express a tile width measured in the cloud CRS in output CRS units.
///
/// The ratio between the terrain bounds widths in both systems carries the unit change.
pub fn convert_optimal_tile_size_with_epsg(
    terrain_bounds: &PointCloudBounds,
    optimal_terrain_tile_width: f64,
    epsg: u32,
    epsg_cloud: u32,
) -> DsmResult<f64> {
    if epsg == epsg_cloud {
        return Ok(optimal_terrain_tile_width);
    }
    let to_cloud = Reprojection::new(epsg, epsg_cloud)?;
    let cloud_bounds = to_cloud.apply_bounds(terrain_bounds);
    let (width_out, _, _) = terrain_bounds.dimensions();
    let (width_cloud, _, _) = cloud_bounds.dimensions();
    if !(width_cloud > 0.0 && width_out > 0.0) {
        return Err(DsmError::configuration(
            "terrain bounds have no width to convert the tile size with",
        ));
    }
    Ok(optimal_terrain_tile_width * width_out / width_cloud)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geographic_range() {
        assert!(is_geographic(4326));
        assert!(is_geographic(4258));
        assert!(!is_geographic(32631));
        assert!(!is_geographic(3857));
        assert!(!is_geographic(2154));
    }

    #[test]
    fn mercator_round_trip() {
        let forward = Reprojection::new(EPSG_WGS84, EPSG_WEB_MERCATOR).unwrap();
        let back = Reprojection::new(EPSG_WEB_MERCATOR, EPSG_WGS84).unwrap();

        let (x, y) = forward.apply(1.4437, 43.6045);
        let (lon, lat) = back.apply(x, y);
        assert!((lon - 1.4437).abs() < 1e-9);
        assert!((lat - 43.6045).abs() < 1e-9);

        // One degree of longitude at the equator.
        let (x1, y0) = forward.apply(1.0, 0.0);
        assert!((x1 - 111_319.490_793_273_57).abs() < 1e-6);
        assert!(y0.abs() < 1e-9);
    }

    #[test]
    fn utm_central_meridian_points() {
        let to_utm = Reprojection::new(EPSG_WGS84, 32631).unwrap();
        let (e, n) = to_utm.apply(3.0, 0.0);
        assert!((e - 500_000.0).abs() < 1e-6);
        assert!(n.abs() < 1e-6);

        // k0 times the WGS84 meridian arc from the equator to 45 degrees.
        let (e, n) = to_utm.apply(3.0, 45.0);
        assert!((e - 500_000.0).abs() < 1e-6);
        assert!((n - 4_982_950.400).abs() < 0.01);

        let (e, n) = Reprojection::new(EPSG_WGS84, 32723).unwrap().apply(-45.0, -23.5);
        assert!((e - 500_000.0).abs() < 1e-6);
        assert!(n > 7_000_000.0 && n < UTM_FALSE_NORTHING_SOUTH);
    }

    #[test]
    fn utm_round_trips() {
        for (epsg, lon, lat) in [(32631, 2.3522, 48.8566), (32631, 5.9, 43.1), (32755, 147.3, -42.9)] {
            let forward = Reprojection::new(EPSG_WGS84, epsg).unwrap();
            let back = Reprojection::new(epsg, EPSG_WGS84).unwrap();
            let (e, n) = forward.apply(lon, lat);
            let (lon2, lat2) = back.apply(e, n);
            assert!((lon2 - lon).abs() < 1e-7, "{epsg}: {lon2} vs {lon}");
            assert!((lat2 - lat).abs() < 1e-7, "{epsg}: {lat2} vs {lat}");
        }
    }

    #[test]
    fn utm_to_mercator_goes_through_geographic() {
        let direct = Reprojection::new(32631, EPSG_WEB_MERCATOR).unwrap();
        let to_geo = Reprojection::new(32631, EPSG_WGS84).unwrap();
        let to_merc = Reprojection::new(EPSG_WGS84, EPSG_WEB_MERCATOR).unwrap();
        let (lon, lat) = to_geo.apply(431_000.0, 4_833_000.0);
        assert_eq!(direct.apply(431_000.0, 4_833_000.0), to_merc.apply(lon, lat));

        // Neighbouring zones agree on a shared point.
        let zone_31 = Reprojection::new(32631, 32632).unwrap();
        let (e, n) = zone_31.apply(700_000.0, 5_000_000.0);
        let back = Reprojection::new(32632, 32631).unwrap().apply(e, n);
        assert!((back.0 - 700_000.0).abs() < 1e-2);
        assert!((back.1 - 5_000_000.0).abs() < 1e-2);
    }

    #[test]
    fn unsupported_pairs_are_configuration_errors() {
        assert!(Reprojection::new(32631, 2154).is_err());
        assert!(Reprojection::new(32661, EPSG_WGS84).is_err());
        assert!(Reprojection::new(2154, 2154).unwrap().is_identity());
        assert!(Reprojection::new(32631, 32631).unwrap().is_identity());
    }

    #[test]
    fn tile_width_converted_from_degrees_to_metres() {
        let terrain = PointCloudBounds::from_xy(0.0, -1000.0, 10_000.0, 1000.0);
        let width = convert_optimal_tile_size_with_epsg(&terrain, 0.01, EPSG_WEB_MERCATOR, EPSG_WGS84)
            .unwrap();
        // 0.01 degree is about 1113 m near the equator.
        assert!((width - 1113.19).abs() < 0.5);

        let same = convert_optimal_tile_size_with_epsg(&terrain, 250.0, 32631, 32631).unwrap();
        assert_eq!(same, 250.0);
    }
}
