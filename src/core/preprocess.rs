//! End-to-end preprocessing of one native file.
//!
//! The [`Preprocessor`] drives the reader, region resolver, geolocation,
//! geometry and calibration stages in a fixed order and records its
//! progress in a [`PipelineState`]. A [`PreprocessedProduct`] only exists
//! once every stage has succeeded.

use crate::config::SensorConfig;
use crate::core::calibrate::{check_unit, CalibrationProcessor, CalibrationTable};
use crate::core::geometry::{
    nominal_position, sun_ephemeris, AngleGrids, GeometryEngine, ViewingGeometry,
};
use crate::core::navigation::{Geolocation, GeolocationEngine};
use crate::core::region::RegionResolver;
use crate::io::native::{NativeReader, RawImage};
use crate::types::{
    BandRequest, ChannelId, ChannelKind, ErrorKind, PixelRect, RegionMode, RegionSpec, Satellite, ScanWindow,
    SeviriError, SeviriResult, Unit, FILL_VALUE,
};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Progress of one preprocessing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    FileLoaded,
    RegionResolved,
    Geolocated,
    GeometryComputed,
    Calibrated,
    Ready,
    Failed(ErrorKind),
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Ready | PipelineState::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineState::Init => write!(f, "INIT"),
            PipelineState::FileLoaded => write!(f, "FILE_LOADED"),
            PipelineState::RegionResolved => write!(f, "REGION_RESOLVED"),
            PipelineState::Geolocated => write!(f, "GEOLOCATED"),
            PipelineState::GeometryComputed => write!(f, "GEOMETRY_COMPUTED"),
            PipelineState::Calibrated => write!(f, "CALIBRATED"),
            PipelineState::Ready => write!(f, "READY"),
            PipelineState::Failed(kind) => write!(f, "FAILED({:?})", kind),
        }
    }
}

/// A validated preprocessing request
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessRequest {
    pub path: PathBuf,
    pub bands: Vec<BandRequest>,
    pub region: RegionSpec,
    pub apply_intercal: bool,
}

impl PreprocessRequest {
    /// Pair channel numbers with units and reject anything that cannot be
    /// processed before touching the file.
    pub fn new<P: AsRef<Path>>(
        path: P,
        channels: &[u8],
        units: &[Unit],
        region: RegionSpec,
        apply_intercal: bool,
    ) -> SeviriResult<Self> {
        if channels.len() != units.len() {
            return Err(SeviriError::Argument(format!(
                "{} channels but {} units requested",
                channels.len(),
                units.len()
            )));
        }
        if channels.is_empty() {
            return Err(SeviriError::Argument("no channels requested".to_string()));
        }

        let bands = channels
            .iter()
            .zip(units)
            .map(|(&number, &unit)| {
                let channel = ChannelId::new(number)?;
                if channel.kind() == ChannelKind::HighResVisible {
                    return Err(SeviriError::Argument("HRV channel is not supported".to_string()));
                }
                check_unit(channel, unit)?;
                Ok(BandRequest { channel, unit })
            })
            .collect::<SeviriResult<Vec<_>>>()?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            bands,
            region,
            apply_intercal,
        })
    }

    /// Distinct channels in request order
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = Vec::with_capacity(self.bands.len());
        for band in &self.bands {
            if !channels.contains(&band.channel) {
                channels.push(band.channel);
            }
        }
        channels
    }
}

/// All output fields at one pixel
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSample {
    pub time: f64,
    pub lat: f32,
    pub lon: f32,
    pub sza: f32,
    pub saa: f32,
    pub vza: f32,
    pub vaa: f32,
    pub data: Vec<f32>,
}

/// Output of a successful run. Grids are indexed (line, column) relative to
/// the region; `data` is indexed (band, line, column) in request order.
#[derive(Debug, Clone)]
pub struct PreprocessedProduct {
    region: PixelRect,
    bands: Vec<BandRequest>,
    satellite: Satellite,
    scan: ScanWindow,
    sub_satellite: (f64, f64),
    earth_sun_distance: f64,
    config_version: String,
    intercal_applied: bool,
    time: Array2<f64>,
    lat: Array2<f32>,
    lon: Array2<f32>,
    sza: Array2<f32>,
    saa: Array2<f32>,
    vza: Array2<f32>,
    vaa: Array2<f32>,
    data: Array3<f32>,
}

impl PreprocessedProduct {
    pub fn n_lines(&self) -> usize {
        self.region.n_lines()
    }

    pub fn n_columns(&self) -> usize {
        self.region.n_columns()
    }

    /// Absolute full-disk rectangle covered by the product
    pub fn region(&self) -> PixelRect {
        self.region
    }

    pub fn bands(&self) -> &[BandRequest] {
        &self.bands
    }

    pub fn satellite(&self) -> Satellite {
        self.satellite
    }

    pub fn scan_window(&self) -> ScanWindow {
        self.scan
    }

    /// Sub-satellite (lat, lon) used for the viewing geometry
    pub fn sub_satellite_point(&self) -> (f64, f64) {
        self.sub_satellite
    }

    /// Earth-Sun distance in AU at the scan centre
    pub fn earth_sun_distance(&self) -> f64 {
        self.earth_sun_distance
    }

    pub fn config_version(&self) -> &str {
        &self.config_version
    }

    pub fn intercal_applied(&self) -> bool {
        self.intercal_applied
    }

    /// Acquisition Julian Day per pixel
    pub fn time(&self) -> &Array2<f64> {
        &self.time
    }

    pub fn lat(&self) -> &Array2<f32> {
        &self.lat
    }

    pub fn lon(&self) -> &Array2<f32> {
        &self.lon
    }

    pub fn sza(&self) -> &Array2<f32> {
        &self.sza
    }

    pub fn saa(&self) -> &Array2<f32> {
        &self.saa
    }

    pub fn vza(&self) -> &Array2<f32> {
        &self.vza
    }

    pub fn vaa(&self) -> &Array2<f32> {
        &self.vaa
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Calibrated grid of the `index`-th requested band
    pub fn band(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        (index < self.bands.len()).then(|| self.data.index_axis(Axis(0), index))
    }

    /// Region-relative centre, `(n_lines / 2, n_columns / 2)` truncated
    pub fn center_pixel(&self) -> (usize, usize) {
        (self.n_lines() / 2, self.n_columns() / 2)
    }

    /// Every output field at a region-relative pixel
    pub fn sample(&self, line: usize, column: usize) -> Option<PixelSample> {
        if line >= self.n_lines() || column >= self.n_columns() {
            return None;
        }
        let idx = [line, column];
        Some(PixelSample {
            time: self.time[idx],
            lat: self.lat[idx],
            lon: self.lon[idx],
            sza: self.sza[idx],
            saa: self.saa[idx],
            vza: self.vza[idx],
            vaa: self.vaa[idx],
            data: self.data.slice(s![.., line, column]).to_vec(),
        })
    }
}

/// Runs the preprocessing stages against a shared sensor configuration
pub struct Preprocessor {
    config: Arc<SensorConfig>,
    state: PipelineState,
}

impl Preprocessor {
    pub fn new(config: Arc<SensorConfig>) -> Self {
        Self {
            config,
            state: PipelineState::Init,
        }
    }

    /// Preprocessor over the built-in sensor tables
    pub fn standard() -> Self {
        Self::new(SensorConfig::builtin())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &Arc<SensorConfig> {
        &self.config
    }

    pub fn run(&mut self, request: &PreprocessRequest) -> SeviriResult<PreprocessedProduct> {
        log::info!(
            "Preprocessing {} ({} bands, region {:?}, intercal {})",
            request.path.display(),
            request.bands.len(),
            request.region,
            request.apply_intercal
        );
        self.state = PipelineState::Init;

        match self.execute(request) {
            Ok(product) => Ok(product),
            Err(err) => {
                log::warn!("Preprocessing failed in state {}: {}", self.state, err);
                self.transition(PipelineState::Failed(err.kind()));
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("Pipeline state {} -> {}", self.state, next);
        self.state = next;
    }

    fn execute(&mut self, request: &PreprocessRequest) -> SeviriResult<PreprocessedProduct> {
        let config = Arc::clone(&self.config);
        let channels = request.channels();

        let reader = NativeReader::open(&request.path)?;
        let raw = reader.read_image(&channels)?;
        self.transition(PipelineState::FileLoaded);

        let geolocation = GeolocationEngine::new(&config.navigation, raw.longitude_of_ssp());
        let region =
            RegionResolver::new(&geolocation, raw.full_disk_dim(), raw.selected_rect()).resolve(&request.region)?;
        self.transition(PipelineState::RegionResolved);

        let geo = geolocation.locate_region(&region);
        self.transition(PipelineState::Geolocated);

        let angles = self.compute_geometry(&raw, &region, &geo);
        self.transition(PipelineState::GeometryComputed);

        let centre_jd = raw.scan_centre_jd();
        let earth_sun_distance = sun_ephemeris(centre_jd).distance_au;
        let table = Arc::new(CalibrationTable::build(&raw, &config, &channels, request.apply_intercal)?);
        let processor = CalibrationProcessor::new(Arc::clone(&table), earth_sun_distance);

        let mut data = Array3::<f32>::from_elem((request.bands.len(), region.n_lines(), region.n_columns()), FILL_VALUE);
        for (k, band) in request.bands.iter().enumerate() {
            let counts = raw.counts_window(band.channel, &region)?;
            let calibrated = processor.calibrate(&counts, band.channel, band.unit, &angles.sza)?;
            data.index_axis_mut(Axis(0), k).assign(&calibrated);
        }
        self.transition(PipelineState::Calibrated);

        self.transition(PipelineState::Ready);
        log::info!(
            "Product ready: {} x {} pixels, {} bands",
            region.n_lines(),
            region.n_columns(),
            request.bands.len()
        );

        let AngleGrids { time, sza, saa, vza, vaa } = angles;
        Ok(PreprocessedProduct {
            region,
            bands: request.bands.clone(),
            satellite: raw.satellite(),
            scan: raw.scan_window(),
            sub_satellite: raw.sub_satellite_point(),
            earth_sun_distance,
            config_version: table.config_version.clone(),
            intercal_applied: request.apply_intercal,
            time,
            lat: geo.lat,
            lon: geo.lon,
            sza,
            saa,
            vza,
            vaa,
            data,
        })
    }

    fn compute_geometry(&self, raw: &RawImage, region: &PixelRect, geo: &Geolocation) -> AngleGrids {
        let nav = &self.config.navigation;
        let position = match raw.satellite_position() {
            Some(position) => position,
            None => {
                log::debug!("No orbit record covers the scan centre, using nominal position");
                nominal_position(nav, raw.longitude_of_ssp())
            }
        };
        let (sub_lat, sub_lon) = raw.sub_satellite_point();
        log::debug!(
            "Satellite position ({:.1}, {:.1}, {:.1}) km, sub-satellite point ({:.4}, {:.4})",
            position[0],
            position[1],
            position[2],
            sub_lat,
            sub_lon
        );

        let engine = GeometryEngine::new(ViewingGeometry::new(nav, position));
        engine.compute(region, geo, |line| raw.line_time(line))
    }
}

/// Preprocess one native file with the built-in sensor tables.
///
/// `region_params` holds `(first_line, last_line, first_column, last_column)`
/// for [`RegionMode::PixelRange`], `(lat_min, lat_max, lon_min, lon_max)` for
/// [`RegionMode::GeographicBox`], and is ignored otherwise.
pub fn preprocess<P: AsRef<Path>>(
    file_path: P,
    channel_list: &[u8],
    unit_list: &[Unit],
    region_mode: RegionMode,
    region_params: [f64; 4],
    apply_intercal: bool,
) -> SeviriResult<PreprocessedProduct> {
    let region = RegionSpec::from_mode(region_mode, region_params)?;
    let request = PreprocessRequest::new(file_path, channel_list, unit_list, region, apply_intercal)?;
    Preprocessor::standard().run(&request)
}
