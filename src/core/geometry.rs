//! Solar and viewing geometry.
//!
//! The Sun position uses the low-precision almanac formulae (good to about
//! 0.01 degree between 1950 and 2050). The satellite position comes from the
//! Chebyshev orbit polynomials carried in the file header, with the nominal
//! geostationary position as fallback.

use crate::config::NavigationParams;
use crate::core::navigation::Geolocation;
use crate::core::time::{CdsTime, J2000_JD};
use crate::types::{PixelRect, FILL_VALUE, FILL_VALUE_F64};
use ndarray::{Array2, Zip};

/// Position of the Sun at one instant, independent of the observer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunEphemeris {
    /// Declination in radians
    pub declination: f64,
    /// Right ascension in radians
    pub right_ascension: f64,
    /// Greenwich mean sidereal time in degrees
    pub gmst: f64,
    /// Earth-Sun distance in astronomical units
    pub distance_au: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarAngles {
    /// Zenith angle in degrees, 0..180
    pub zenith: f64,
    /// Azimuth in degrees clockwise from north, 0..360
    pub azimuth: f64,
}

/// Sun ephemeris at Julian Day `jd`
pub fn sun_ephemeris(jd: f64) -> SunEphemeris {
    let n = jd - J2000_JD;

    let mean_longitude = (280.460 + 0.9856474 * n).rem_euclid(360.0);
    let mean_anomaly = (357.528 + 0.9856003 * n).rem_euclid(360.0).to_radians();
    let ecliptic_longitude = (mean_longitude
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin())
    .to_radians();
    let obliquity = (23.439 - 0.0000004 * n).to_radians();

    let right_ascension = (obliquity.cos() * ecliptic_longitude.sin())
        .atan2(ecliptic_longitude.cos())
        .rem_euclid(std::f64::consts::TAU);
    let declination = (obliquity.sin() * ecliptic_longitude.sin()).asin();
    let gmst = (280.46061837 + 360.98564736629 * n).rem_euclid(360.0);
    let distance_au =
        1.00014 - 0.01671 * mean_anomaly.cos() - 0.00014 * (2.0 * mean_anomaly).cos();

    SunEphemeris { declination, right_ascension, gmst, distance_au }
}

impl SunEphemeris {
    /// Local hour angle in radians for an observer at `lon_deg`
    pub fn hour_angle(&self, lon_deg: f64) -> f64 {
        let ha = (self.gmst + lon_deg - self.right_ascension.to_degrees()).rem_euclid(360.0);
        let ha = if ha > 180.0 { ha - 360.0 } else { ha };
        ha.to_radians()
    }

    pub fn angles_at(&self, lat_deg: f64, lon_deg: f64) -> SolarAngles {
        let lat = lat_deg.to_radians();
        let ha = self.hour_angle(lon_deg);
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_dec, cos_dec) = self.declination.sin_cos();

        let cos_zenith = (sin_lat * sin_dec + cos_lat * cos_dec * ha.cos()).clamp(-1.0, 1.0);
        let zenith = cos_zenith.acos().to_degrees();

        let azimuth = (-ha.sin() * cos_dec)
            .atan2(sin_dec * cos_lat - cos_dec * ha.cos() * sin_lat)
            .to_degrees()
            .rem_euclid(360.0);

        SolarAngles { zenith, azimuth }
    }
}

/// One orbit polynomial record: Chebyshev coefficients for the satellite
/// position (km, Earth fixed) over a validity window
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitPolynomial {
    pub start: CdsTime,
    pub end: CdsTime,
    pub x: [f64; 8],
    pub y: [f64; 8],
    pub z: [f64; 8],
}

impl OrbitPolynomial {
    pub fn covers(&self, jd: f64) -> bool {
        !self.start.is_zero() && self.start.julian_day() <= jd && jd <= self.end.julian_day()
    }

    /// Satellite position in km at `jd`
    pub fn position(&self, jd: f64) -> [f64; 3] {
        let start = self.start.julian_day();
        let end = self.end.julian_day();
        let half_span = 0.5 * (end - start);
        let t = if half_span > 0.0 {
            (jd - 0.5 * (start + end)) / half_span
        } else {
            0.0
        };
        [chebyshev(&self.x, t), chebyshev(&self.y, t), chebyshev(&self.z, t)]
    }
}

/// Chebyshev series with the leading coefficient halved
fn chebyshev(coefs: &[f64; 8], t: f64) -> f64 {
    let mut t_prev = 1.0;
    let mut t_curr = t;
    let mut sum = 0.5 * coefs[0] + coefs[1] * t;
    for &c in &coefs[2..] {
        let t_next = 2.0 * t * t_curr - t_prev;
        sum += c * t_next;
        t_prev = t_curr;
        t_curr = t_next;
    }
    sum
}

/// Satellite position at `jd` from the first polynomial covering it
pub fn orbit_position(orbit: &[OrbitPolynomial], jd: f64) -> Option<[f64; 3]> {
    orbit.iter().find(|p| p.covers(jd)).map(|p| p.position(jd))
}

/// Nominal geostationary position above `sub_lon_deg`
pub fn nominal_position(nav: &NavigationParams, sub_lon_deg: f64) -> [f64; 3] {
    let (sin_lon, cos_lon) = sub_lon_deg.to_radians().sin_cos();
    [nav.satellite_distance * cos_lon, nav.satellite_distance * sin_lon, 0.0]
}

/// Geocentric (lat, lon) in degrees of the point beneath `position`
pub fn sub_satellite_point(position: [f64; 3]) -> (f64, f64) {
    let [x, y, z] = position;
    let lat = z.atan2(x.hypot(y)).to_degrees();
    let lon = y.atan2(x).to_degrees();
    (lat, crate::core::navigation::normalize_longitude(lon))
}

/// Per-pixel viewing geometry towards a satellite
#[derive(Debug, Clone)]
pub struct ViewingGeometry {
    satellite: [f64; 3],
    equatorial_radius: f64,
    polar_radius: f64,
}

impl ViewingGeometry {
    pub fn new(nav: &NavigationParams, satellite: [f64; 3]) -> Self {
        Self {
            satellite,
            equatorial_radius: nav.equatorial_radius,
            polar_radius: nav.polar_radius,
        }
    }

    pub fn satellite_position(&self) -> [f64; 3] {
        self.satellite
    }

    /// (zenith, azimuth) in degrees of the satellite seen from a surface point.
    /// Azimuth is clockwise from north in 0..360.
    pub fn angles_at(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let a = self.equatorial_radius;
        let b = self.polar_radius;
        let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
        let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();

        let n = a * a / (a * a * cos_lat * cos_lat + b * b * sin_lat * sin_lat).sqrt();
        let p = [
            n * cos_lat * cos_lon,
            n * cos_lat * sin_lon,
            (b * b) / (a * a) * n * sin_lat,
        ];
        let d = [
            self.satellite[0] - p[0],
            self.satellite[1] - p[1],
            self.satellite[2] - p[2],
        ];
        let range = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();

        let up = d[0] * cos_lat * cos_lon + d[1] * cos_lat * sin_lon + d[2] * sin_lat;
        let east = -d[0] * sin_lon + d[1] * cos_lon;
        let north = -d[0] * sin_lat * cos_lon - d[1] * sin_lat * sin_lon + d[2] * cos_lat;

        let zenith = (up / range).clamp(-1.0, 1.0).acos().to_degrees();
        let azimuth = east.atan2(north).to_degrees().rem_euclid(360.0);
        (zenith, azimuth)
    }
}

/// Time and angle grids over a region
#[derive(Debug, Clone)]
pub struct AngleGrids {
    pub time: Array2<f64>,
    pub sza: Array2<f32>,
    pub saa: Array2<f32>,
    pub vza: Array2<f32>,
    pub vaa: Array2<f32>,
}

#[derive(Debug, Clone, Copy)]
struct PixelAngles {
    time: f64,
    sza: f32,
    saa: f32,
    vza: f32,
    vaa: f32,
}

impl PixelAngles {
    const FILL: PixelAngles = PixelAngles {
        time: FILL_VALUE_F64,
        sza: FILL_VALUE,
        saa: FILL_VALUE,
        vza: FILL_VALUE,
        vaa: FILL_VALUE,
    };
}

/// Computes the time and angle grids for geolocated regions
#[derive(Debug, Clone)]
pub struct GeometryEngine {
    viewing: ViewingGeometry,
}

impl GeometryEngine {
    pub fn new(viewing: ViewingGeometry) -> Self {
        Self { viewing }
    }

    /// `line_time` maps an absolute grid line to its acquisition Julian Day.
    /// Space pixels in `geo` produce `FILL_VALUE` in every output grid.
    pub fn compute<F>(&self, rect: &PixelRect, geo: &Geolocation, line_time: F) -> AngleGrids
    where
        F: Fn(usize) -> f64,
    {
        log::debug!("Computing solar and viewing geometry over {}", rect);

        let line_times: Vec<f64> = (rect.first_line..=rect.last_line).map(line_time).collect();
        let ephemerides: Vec<SunEphemeris> = line_times.iter().map(|&jd| sun_ephemeris(jd)).collect();

        let pixel = |(i, _j): (usize, usize), &lat: &f32, &lon: &f32| {
            if lat == FILL_VALUE {
                return PixelAngles::FILL;
            }
            let (lat, lon) = (lat as f64, lon as f64);
            let sun = ephemerides[i].angles_at(lat, lon);
            let (vza, vaa) = self.viewing.angles_at(lat, lon);
            PixelAngles {
                time: line_times[i],
                sza: sun.zenith as f32,
                saa: sun.azimuth as f32,
                vza: vza as f32,
                vaa: vaa as f32,
            }
        };

        #[cfg(feature = "parallel")]
        let angles = Zip::indexed(&geo.lat).and(&geo.lon).par_map_collect(pixel);
        #[cfg(not(feature = "parallel"))]
        let angles = Zip::indexed(&geo.lat).and(&geo.lon).map_collect(pixel);

        AngleGrids {
            time: angles.mapv(|a| a.time),
            sza: angles.mapv(|a| a.sza),
            saa: angles.mapv(|a| a.saa),
            vza: angles.mapv(|a| a.vza),
            vaa: angles.mapv(|a| a.vaa),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::navigation::GeolocationEngine;
    use crate::core::time::julian_day;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    fn jd(y: i32, m: u32, d: u32, h: u32) -> f64 {
        julian_day(&Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap())
    }

    #[test]
    fn test_sun_declination_seasons() {
        let june = sun_ephemeris(jd(2023, 6, 21, 12));
        let december = sun_ephemeris(jd(2023, 12, 22, 12));
        let march = sun_ephemeris(jd(2023, 3, 20, 21));
        assert_abs_diff_eq!(june.declination.to_degrees(), 23.44, epsilon = 0.1);
        assert_abs_diff_eq!(december.declination.to_degrees(), -23.44, epsilon = 0.1);
        assert_abs_diff_eq!(march.declination.to_degrees(), 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_earth_sun_distance() {
        let perihelion = sun_ephemeris(jd(2023, 1, 4, 12));
        let aphelion = sun_ephemeris(jd(2023, 7, 6, 12));
        assert_abs_diff_eq!(perihelion.distance_au, 0.9833, epsilon = 0.001);
        assert_abs_diff_eq!(aphelion.distance_au, 1.0167, epsilon = 0.001);
    }

    #[test]
    fn test_zenith_at_local_noon() {
        let sun = sun_ephemeris(jd(2023, 3, 20, 12));
        // Longitude where the hour angle is zero
        let noon_lon = crate::core::navigation::normalize_longitude(
            sun.right_ascension.to_degrees() - sun.gmst,
        );
        for &lat in &[-45.0, 0.0, 30.0, 60.0] {
            let angles = sun.angles_at(lat, noon_lon);
            assert_abs_diff_eq!(angles.zenith, (lat - sun.declination.to_degrees()).abs(), epsilon = 1e-6);
        }
        // Sun is due south of a northern observer at noon
        let angles = sun.angles_at(45.0, noon_lon);
        assert_abs_diff_eq!(angles.azimuth, 180.0, epsilon = 1e-6);
    }

    #[test]
    fn test_night_side() {
        let sun = sun_ephemeris(jd(2023, 6, 15, 0));
        let angles = sun.angles_at(0.0, 0.0);
        assert!(angles.zenith > 90.0);
        assert!((0.0..360.0).contains(&angles.azimuth));
    }

    #[test]
    fn test_chebyshev_orbit() {
        let poly = OrbitPolynomial {
            start: CdsTime::new(24000, 0),
            end: CdsTime::new(24000, 21_600_000),
            x: [2.0 * 42164.0, 10.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            y: [0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            z: [0.0; 8],
        };
        let mid = 0.5 * (poly.start.julian_day() + poly.end.julian_day());
        let pos = poly.position(mid);
        assert_abs_diff_eq!(pos[0], 42164.0, epsilon = 1e-9);
        // T2(0) = -1
        assert_abs_diff_eq!(pos[1], -2.0, epsilon = 1e-9);

        let end = poly.position(poly.end.julian_day());
        assert_abs_diff_eq!(end[0], 42174.0, epsilon = 1e-6);
        assert_abs_diff_eq!(end[1], 2.0, epsilon = 1e-6);

        assert!(orbit_position(&[poly.clone()], mid).is_some());
        assert!(orbit_position(&[poly], mid + 1.0).is_none());
    }

    #[test]
    fn test_viewing_angles() {
        let nav = NavigationParams::default();
        let viewing = ViewingGeometry::new(&nav, nominal_position(&nav, 0.0));

        let (vza, _) = viewing.angles_at(0.0, 0.0);
        assert_abs_diff_eq!(vza, 0.0, epsilon = 1e-6);

        // Satellite is to the east-ish of a point west of the sub-point
        let (vza, vaa) = viewing.angles_at(0.0, -30.0);
        assert!(vza > 30.0 && vza < 90.0);
        assert_abs_diff_eq!(vaa, 90.0, epsilon = 1e-6);

        // And to the south of a northern point
        let (_, vaa) = viewing.angles_at(40.0, 0.0);
        assert_abs_diff_eq!(vaa, 180.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sub_satellite_point() {
        let nav = NavigationParams::default();
        let (lat, lon) = sub_satellite_point(nominal_position(&nav, 9.5));
        assert_abs_diff_eq!(lat, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lon, 9.5, epsilon = 1e-9);
    }

    #[test]
    fn test_angle_grids() {
        let nav = NavigationParams::default();
        let geolocation = GeolocationEngine::new(&nav, 0.0);
        let rect = PixelRect::new(0, 3711, 1850, 1860);
        let geo = geolocation.locate_region(&rect);

        let engine = GeometryEngine::new(ViewingGeometry::new(&nav, nominal_position(&nav, 0.0)));
        let start = jd(2023, 6, 15, 12);
        let grids = engine.compute(&rect, &geo, |line| start + line as f64 * 1e-6);

        assert_eq!(grids.time.dim(), rect.dim());
        assert_eq!(grids.vaa.dim(), rect.dim());

        // Bottom row is off disk
        assert_eq!(grids.sza[[0, 0]], FILL_VALUE);
        assert_eq!(grids.time[[0, 0]], FILL_VALUE_F64);

        let centre = (1855, 5);
        assert!(grids.vza[centre] < 0.5);
        assert_abs_diff_eq!(grids.time[centre], start + 1855.0 * 1e-6, epsilon = 1e-12);
        assert!(grids.sza[centre] < 40.0);
    }
}
