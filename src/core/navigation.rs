//! Geolocation of the SEVIRI VIS/IR reference grid.
//!
//! Implements the normalized geostationary projection: a pixel's line and
//! column give two scan angles, and the view ray through those angles is
//! intersected with the Earth ellipsoid. The inverse mapping projects a
//! geographic point back onto the grid.

use crate::config::NavigationParams;
use crate::types::{PixelRect, FILL_VALUE};
use ndarray::{Array2, Zip};

const TWO_POW_16: f64 = 65536.0;

/// Per-pixel latitude and longitude over a region, in degrees
#[derive(Debug, Clone)]
pub struct Geolocation {
    pub lat: Array2<f32>,
    pub lon: Array2<f32>,
}

impl Geolocation {
    pub fn dim(&self) -> (usize, usize) {
        self.lat.dim()
    }

    /// Whether the pixel at region index (i, j) sees the Earth
    pub fn is_valid(&self, i: usize, j: usize) -> bool {
        self.lat[[i, j]] != FILL_VALUE
    }
}

/// Wrap a longitude into [-180, 180)
pub fn normalize_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Narrow a normalized longitude to f32 without rounding onto +180
pub(crate) fn longitude_to_f32(lon: f64) -> f32 {
    let narrowed = lon as f32;
    if narrowed >= 180.0 {
        -180.0
    } else {
        narrowed
    }
}

/// Pixel <-> geographic mapping for one satellite position
#[derive(Debug, Clone)]
pub struct GeolocationEngine {
    nav: NavigationParams,
    sub_satellite_lon: f64,
    /// (a / b)^2
    radius_ratio_sq: f64,
    /// h^2 - a^2
    limb_term: f64,
}

impl GeolocationEngine {
    pub fn new(nav: &NavigationParams, sub_satellite_lon: f64) -> Self {
        let ratio = nav.equatorial_radius / nav.polar_radius;
        Self {
            nav: nav.clone(),
            sub_satellite_lon,
            radius_ratio_sq: ratio * ratio,
            limb_term: nav.satellite_distance * nav.satellite_distance
                - nav.equatorial_radius * nav.equatorial_radius,
        }
    }

    pub fn navigation(&self) -> &NavigationParams {
        &self.nav
    }

    pub fn sub_satellite_lon(&self) -> f64 {
        self.sub_satellite_lon
    }

    /// Scan angles in radians for a 0-based grid position
    pub fn scan_angles(&self, line: f64, column: f64) -> (f64, f64) {
        let x = (column + 1.0 - self.nav.coff) * TWO_POW_16 / self.nav.cfac;
        let y = (line + 1.0 - self.nav.loff) * TWO_POW_16 / self.nav.lfac;
        (x, y)
    }

    /// Latitude/longitude of a 0-based pixel, `None` for space pixels
    pub fn pixel_to_lat_lon(&self, line: usize, column: usize) -> Option<(f64, f64)> {
        let (x, y) = self.scan_angles(line as f64, column as f64);
        self.scan_angles_to_lat_lon(x, y)
    }

    pub fn scan_angles_to_lat_lon(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let h = self.nav.satellite_distance;
        let (sin_x, cos_x) = x.sin_cos();
        let (sin_y, cos_y) = y.sin_cos();

        let along = h * cos_x * cos_y;
        let denom = cos_y * cos_y + self.radius_ratio_sq * sin_y * sin_y;
        let disc = along * along - denom * self.limb_term;
        if disc < 0.0 {
            return None;
        }

        let sn = (along - disc.sqrt()) / denom;
        let s1 = h - sn * cos_x * cos_y;
        let s2 = sn * sin_x * cos_y;
        let s3 = -sn * sin_y;
        let sxy = s1.hypot(s2);

        let lon = (s2 / s1).atan().to_degrees() + self.sub_satellite_lon;
        let lat = (self.radius_ratio_sq * s3 / sxy).atan().to_degrees();
        Some((lat, normalize_longitude(lon)))
    }

    /// Fractional 0-based (line, column) of a geographic point, `None` when
    /// the point is not visible from the satellite
    pub fn lat_lon_to_pixel(&self, lat: f64, lon: f64) -> Option<(f64, f64)> {
        if !(-90.0..=90.0).contains(&lat) || !lon.is_finite() {
            return None;
        }
        let h = self.nav.satellite_distance;
        let a = self.nav.equatorial_radius;
        let b = self.nav.polar_radius;

        let dlon = normalize_longitude(lon - self.sub_satellite_lon).to_radians();
        let c_lat = (lat.to_radians().tan() / self.radius_ratio_sq).atan();
        let (sin_c, cos_c) = c_lat.sin_cos();
        let e2 = 1.0 - (b * b) / (a * a);
        let rl = b / (1.0 - e2 * cos_c * cos_c).sqrt();

        let px = rl * cos_c * dlon.cos();
        let py = rl * cos_c * dlon.sin();
        let pz = rl * sin_c;

        let r1 = h - px;
        let r2 = -py;
        let r3 = pz;

        // Vector to the satellite must leave the surface upwards
        let facing = (r1 * px + r2 * py) / (a * a) - r3 * pz / (b * b);
        if facing <= 0.0 {
            return None;
        }

        let rn = (r1 * r1 + r2 * r2 + r3 * r3).sqrt();
        let x = (-r2 / r1).atan();
        let y = (-r3 / rn).asin();

        let column = self.nav.coff + x * self.nav.cfac / TWO_POW_16 - 1.0;
        let line = self.nav.loff + y * self.nav.lfac / TWO_POW_16 - 1.0;
        Some((line, column))
    }

    /// Latitude/longitude grids over an absolute pixel rectangle.
    /// Space pixels are set to `FILL_VALUE` in both grids.
    pub fn locate_region(&self, rect: &PixelRect) -> Geolocation {
        log::debug!("Geolocating {} ({} x {})", rect, rect.n_lines(), rect.n_columns());

        let mut lat = Array2::<f32>::from_elem(rect.dim(), FILL_VALUE);
        let mut lon = Array2::<f32>::from_elem(rect.dim(), FILL_VALUE);

        let locate = |(i, j): (usize, usize), lat: &mut f32, lon: &mut f32| {
            if let Some((la, lo)) = self.pixel_to_lat_lon(rect.first_line + i, rect.first_column + j) {
                *lat = la as f32;
                *lon = longitude_to_f32(lo);
            }
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut lat).and(&mut lon).par_for_each(locate);
        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut lat).and(&mut lon).for_each(locate);

        let on_disk = lat.iter().filter(|&&v| v != FILL_VALUE).count();
        log::debug!("{} of {} pixels on the Earth disk", on_disk, lat.len());

        Geolocation { lat, lon }
    }
}
