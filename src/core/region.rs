//! Resolution of caller region descriptors into absolute pixel rectangles.

use crate::core::navigation::GeolocationEngine;
use crate::types::{PixelRect, RegionSpec, SeviriError, SeviriResult};

/// Parameters of the geographic box search
#[derive(Debug, Clone)]
pub struct RegionSearchParams {
    /// Spacing in pixels of the coarse geolocation lattice
    pub coarse_stride: usize,
    /// Number of points sampled along each box edge for seeding
    pub edge_samples: usize,
}

impl Default for RegionSearchParams {
    fn default() -> Self {
        Self {
            coarse_stride: 32,
            edge_samples: 64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GeoBox {
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
}

impl GeoBox {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    fn empty_error(&self) -> SeviriError {
        SeviriError::RegionEmpty {
            lat_min: self.lat_min,
            lat_max: self.lat_max,
            lon_min: self.lon_min,
            lon_max: self.lon_max,
        }
    }
}

/// Turns a [`RegionSpec`] into a pixel rectangle of the full-disk grid
pub struct RegionResolver<'a> {
    geolocation: &'a GeolocationEngine,
    full_disk: (usize, usize),
    selected: PixelRect,
    params: RegionSearchParams,
}

impl<'a> RegionResolver<'a> {
    /// `selected` is the rectangle stored in the file, used for `ActualImage`
    pub fn new(geolocation: &'a GeolocationEngine, full_disk: (usize, usize), selected: PixelRect) -> Self {
        Self::with_params(geolocation, full_disk, selected, RegionSearchParams::default())
    }

    pub fn with_params(
        geolocation: &'a GeolocationEngine,
        full_disk: (usize, usize),
        selected: PixelRect,
        params: RegionSearchParams,
    ) -> Self {
        Self { geolocation, full_disk, selected, params }
    }

    pub fn resolve(&self, spec: &RegionSpec) -> SeviriResult<PixelRect> {
        let rect = match *spec {
            RegionSpec::PixelRange(rect) => self.resolve_pixel_range(rect)?,
            RegionSpec::GeographicBox { lat_min, lat_max, lon_min, lon_max } => {
                self.resolve_geographic_box(GeoBox { lat_min, lat_max, lon_min, lon_max })?
            }
            RegionSpec::FullDisk => PixelRect::full(self.full_disk.0, self.full_disk.1),
            RegionSpec::ActualImage => self.selected,
        };
        log::info!("Resolved region to {} ({} x {})", rect, rect.n_lines(), rect.n_columns());
        Ok(rect)
    }

    fn resolve_pixel_range(&self, rect: PixelRect) -> SeviriResult<PixelRect> {
        let (n_lines, n_columns) = self.full_disk;
        if rect.first_line > rect.last_line || rect.first_column > rect.last_column {
            return Err(SeviriError::Range(format!("first bound exceeds last bound in {}", rect)));
        }
        if rect.last_line >= n_lines || rect.last_column >= n_columns {
            return Err(SeviriError::Range(format!(
                "{} exceeds the {} x {} image",
                rect, n_lines, n_columns
            )));
        }
        Ok(rect)
    }

    fn resolve_geographic_box(&self, bbox: GeoBox) -> SeviriResult<PixelRect> {
        if !(-90.0..=90.0).contains(&bbox.lat_min)
            || !(-90.0..=90.0).contains(&bbox.lat_max)
            || !(-180.0..=180.0).contains(&bbox.lon_min)
            || !(-180.0..=180.0).contains(&bbox.lon_max)
        {
            return Err(SeviriError::Argument(format!("geographic box {:?} out of range", bbox)));
        }
        if bbox.lat_min > bbox.lat_max || bbox.lon_min > bbox.lon_max {
            return Err(SeviriError::Argument(format!("geographic box {:?} has min > max", bbox)));
        }

        let seeds = self.seed_pixels(&bbox);
        log::debug!("Geographic search: {} seed pixels", seeds.len());
        if seeds.is_empty() {
            return Err(bbox.empty_error());
        }

        let stride = self.params.coarse_stride.max(1);
        let (n_lines, n_columns) = self.full_disk;
        let mut window = PixelRect::new(n_lines, 0, n_columns, 0);
        for &(line, column) in &seeds {
            window.first_line = window.first_line.min(line);
            window.last_line = window.last_line.max(line);
            window.first_column = window.first_column.min(column);
            window.last_column = window.last_column.max(column);
        }
        let mut window = PixelRect::new(
            window.first_line.saturating_sub(stride),
            (window.last_line + stride).min(n_lines - 1),
            window.first_column.saturating_sub(stride),
            (window.last_column + stride).min(n_columns - 1),
        );

        // Grow the scanned window while matches touch one of its open edges
        loop {
            let found = self.scan_window(&bbox, &window).ok_or_else(|| bbox.empty_error())?;
            let mut grown = window;
            if found.first_line == window.first_line && window.first_line > 0 {
                grown.first_line = window.first_line.saturating_sub(stride);
            }
            if found.last_line == window.last_line && window.last_line < n_lines - 1 {
                grown.last_line = (window.last_line + stride).min(n_lines - 1);
            }
            if found.first_column == window.first_column && window.first_column > 0 {
                grown.first_column = window.first_column.saturating_sub(stride);
            }
            if found.last_column == window.last_column && window.last_column < n_columns - 1 {
                grown.last_column = (window.last_column + stride).min(n_columns - 1);
            }
            if grown == window {
                return Ok(found);
            }
            log::debug!("Growing search window to {}", grown);
            window = grown;
        }
    }

    /// Coarse lattice hits plus projected box edge points
    fn seed_pixels(&self, bbox: &GeoBox) -> Vec<(usize, usize)> {
        let (n_lines, n_columns) = self.full_disk;
        let stride = self.params.coarse_stride.max(1);
        let lattice = |n: usize| (0..n).step_by(stride).chain(std::iter::once(n - 1));

        let mut seeds = Vec::new();
        for line in lattice(n_lines) {
            for column in lattice(n_columns) {
                if let Some((lat, lon)) = self.geolocation.pixel_to_lat_lon(line, column) {
                    if bbox.contains(lat, lon) {
                        seeds.push((line, column));
                    }
                }
            }
        }

        let samples = self.params.edge_samples.max(1);
        let mut seed_at = |lat: f64, lon: f64| {
            if let Some((line, column)) = self.geolocation.lat_lon_to_pixel(lat, lon) {
                let line = line.round().clamp(0.0, (n_lines - 1) as f64) as usize;
                let column = column.round().clamp(0.0, (n_columns - 1) as f64) as usize;
                seeds.push((line, column));
            }
        };
        for k in 0..=samples {
            let f = k as f64 / samples as f64;
            let lat = bbox.lat_min + f * (bbox.lat_max - bbox.lat_min);
            let lon = bbox.lon_min + f * (bbox.lon_max - bbox.lon_min);
            seed_at(lat, bbox.lon_min);
            seed_at(lat, bbox.lon_max);
            seed_at(bbox.lat_min, lon);
            seed_at(bbox.lat_max, lon);
        }
        seed_at(
            0.5 * (bbox.lat_min + bbox.lat_max),
            0.5 * (bbox.lon_min + bbox.lon_max),
        );
        seeds
    }

    /// Full resolution scan; extent of pixels whose centre is inside the box
    fn scan_window(&self, bbox: &GeoBox, window: &PixelRect) -> Option<PixelRect> {
        let scan_line = |line: usize| -> Option<(usize, usize, usize)> {
            let mut first = None;
            let mut last = 0;
            for column in window.first_column..=window.last_column {
                if let Some((lat, lon)) = self.geolocation.pixel_to_lat_lon(line, column) {
                    if bbox.contains(lat, lon) {
                        first.get_or_insert(column);
                        last = column;
                    }
                }
            }
            first.map(|first| (line, first, last))
        };

        #[cfg(feature = "parallel")]
        let rows: Vec<(usize, usize, usize)> = {
            use rayon::prelude::*;
            (window.first_line..=window.last_line)
                .into_par_iter()
                .filter_map(scan_line)
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let rows: Vec<(usize, usize, usize)> =
            (window.first_line..=window.last_line).filter_map(scan_line).collect();

        rows.iter().fold(None, |acc: Option<PixelRect>, &(line, first, last)| {
            Some(match acc {
                None => PixelRect::new(line, line, first, last),
                Some(r) => PixelRect::new(
                    r.first_line.min(line),
                    r.last_line.max(line),
                    r.first_column.min(first),
                    r.last_column.max(last),
                ),
            })
        })
    }
}
