//! SEVIRI Level 1.5 native format reader and writer.
//!
//! A native file is laid out as
//!
//! ```text
//! U-MARF ASCII header            5114 bytes
//! packet header + 15HEADER       38 + 445248 bytes
//! image data                     one line group per selected line
//! packet header + 15TRAILER      38 + 380325 bytes
//! ```
//!
//! Each line group holds one record per selected VIS/IR band in band order,
//! followed by three HRV records when HRV is selected. A record is a packet
//! header, a 27 byte line side info block and the 10-bit packed counts. The
//! first line of the file is the southernmost line, the first column of a
//! record the easternmost column. All binary fields are big-endian.

use crate::core::geometry::{orbit_position, sub_satellite_point, OrbitPolynomial};
use crate::core::time::CdsTime;
use crate::types::{
    ChannelId, PixelRect, Satellite, ScanWindow, SeviriError, SeviriResult, FULL_DISK_SIZE,
    N_CHANNELS, N_VIR_CHANNELS,
};
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MARF_HEADER_SIZE: usize = 5114;
pub const PACKET_HEADER_SIZE: usize = 38;
pub const LINE_SIDE_INFO_SIZE: usize = 27;
pub const L15_HEADER_SIZE: usize = 445_248;
pub const L15_TRAILER_SIZE: usize = 380_325;

const RECORD_PREFIX_SIZE: usize = PACKET_HEADER_SIZE + LINE_SIDE_INFO_SIZE;
const HRV_RECORDS_PER_LINE: usize = 3;

// 15HEADER offsets
const HDR_SATELLITE_ID: usize = 1;
const HDR_ORBIT_POLYNOMIAL: usize = 48;
const ORBIT_POLYNOMIAL_SIZE: usize = 396;
const N_ORBIT_POLYNOMIALS: usize = 100;
const HDR_LONGITUDE_OF_SSP: usize = 386_894;
const HDR_REFERENCE_GRID_VIS_IR: usize = 386_898;
const HDR_IMAGE_CALIBRATION: usize = 387_066;

// 15TRAILER offsets
const TRL_SATELLITE_ID: usize = 1;
const TRL_NOMINAL_IMAGE_SCANNING: usize = 3;
const TRL_REDUCED_SCAN: usize = 4;
const TRL_SCAN_FORWARD_START: usize = 5;
const TRL_SCAN_FORWARD_END: usize = 11;
const TRL_ACTUAL_RECTANGLE: usize = 149;

// Line side info offsets
const LSI_LINE_NUMBER: usize = 13;
const LSI_CHANNEL_ID: usize = 17;
const LSI_MEAN_ACQUISITION_TIME: usize = 18;
const LSI_LINE_VALIDITY: usize = 24;

const MARF_NAME_SIZE: usize = 30;
const MARF_VALUE_SIZE: usize = 50;
const MARF_DATA_SET_SIZE: usize = 62;
const N_MARF_DATA_SETS: usize = 27;

const MARF_MAIN_FIELDS: [&str; 6] = [
    "FormatName",
    "FormatDocumentName",
    "FormatDocumentMajorVersion",
    "FormatDocumentMinorVersion",
    "CreationDateTime",
    "CreatingCentre",
];

const MARF_PRODUCT_FIELDS: [&str; 19] = [
    "TotalFileSize", "GORT", "ASTI", "LLOS", "SNIT", "AIID", "SSBT", "SSST", "RRCC", "RRBT",
    "RRST", "PPRC", "PPDT", "GPLV", "APNM", "AARF", "UUDT", "QQOV", "UDSP",
];

const MARF_SECONDARY_FIELDS: [&str; 18] = [
    "ABID",
    "SMOD",
    "APXS",
    "AVPA",
    "LSCD",
    "LMPA",
    "QDLC",
    "QDLP",
    "QQAI",
    "SelectedBandIDs",
    "SouthLineSelectedRectangle",
    "NorthLineSelectedRectangle",
    "EastColumnSelectedRectangle",
    "WestColumnSelectedRectangle",
    "NumberLinesVISIR",
    "NumberColumnsVISIR",
    "NumberLinesHRV",
    "NumberColumnsHRV",
];

const NATIVE_MAGIC: &str = "NATIVE";

fn field<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes(field(buf, offset))
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes(field(buf, offset))
}

fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_be_bytes(field(buf, offset))
}

fn read_f64(buf: &[u8], offset: usize) -> f64 {
    f64::from_be_bytes(field(buf, offset))
}

fn read_cds(buf: &[u8], offset: usize) -> CdsTime {
    CdsTime::from_be_bytes(field(buf, offset))
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Map an unexpected end of file onto a format error
fn truncated(what: &str) -> impl FnOnce(std::io::Error) -> SeviriError + '_ {
    move |e| {
        if e.kind() == IoErrorKind::UnexpectedEof {
            SeviriError::Format(format!("truncated {}", what))
        } else {
            SeviriError::Io(e)
        }
    }
}

/// Unpack big-endian 10-bit samples, four samples per five bytes
pub fn unpack_10bit(packed: &[u8], out: &mut Vec<u16>, n_samples: usize) {
    for chunk in packed.chunks_exact(5).take(n_samples.div_ceil(4)) {
        let b = [chunk[0] as u16, chunk[1] as u16, chunk[2] as u16, chunk[3] as u16, chunk[4] as u16];
        out.push((b[0] << 2) | (b[1] >> 6));
        out.push(((b[1] & 0x3F) << 4) | (b[2] >> 4));
        out.push(((b[2] & 0x0F) << 6) | (b[3] >> 2));
        out.push(((b[3] & 0x03) << 8) | b[4]);
    }
}

/// Inverse of [`unpack_10bit`]; values are masked to 10 bits
pub fn pack_10bit(samples: impl IntoIterator<Item = u16>, out: &mut Vec<u8>) {
    let mut quad = [0u16; 4];
    let mut filled = 0;
    let flush = |q: &[u16; 4], out: &mut Vec<u8>| {
        out.push((q[0] >> 2) as u8);
        out.push((((q[0] & 0x03) << 6) | (q[1] >> 4)) as u8);
        out.push((((q[1] & 0x0F) << 4) | (q[2] >> 6)) as u8);
        out.push((((q[2] & 0x3F) << 2) | (q[3] >> 8)) as u8);
        out.push((q[3] & 0xFF) as u8);
    };
    for sample in samples {
        quad[filled] = sample & 0x03FF;
        filled += 1;
        if filled == 4 {
            flush(&quad, out);
            filled = 0;
        }
    }
    if filled > 0 {
        quad[filled..].iter_mut().for_each(|q| *q = 0);
        flush(&quad, out);
    }
}

/// U-MARF ASCII header as name/value pairs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarfHeader {
    values: BTreeMap<&'static str, String>,
}

impl MarfHeader {
    pub fn parse(buf: &[u8]) -> SeviriResult<Self> {
        if buf.len() < MARF_HEADER_SIZE {
            return Err(SeviriError::Format("truncated U-MARF header".to_string()));
        }
        let mut values = BTreeMap::new();
        let mut offset = 0;
        let mut take = |names: &[&'static str], offset: &mut usize| {
            for &name in names {
                let start = *offset + MARF_NAME_SIZE;
                let raw = &buf[start..start + MARF_VALUE_SIZE];
                let value = String::from_utf8_lossy(raw).trim().trim_start_matches(':').trim().to_string();
                values.insert(name, value);
                *offset += MARF_NAME_SIZE + MARF_VALUE_SIZE;
            }
        };
        take(&MARF_MAIN_FIELDS, &mut offset);
        offset += N_MARF_DATA_SETS * MARF_DATA_SET_SIZE;
        take(&MARF_PRODUCT_FIELDS, &mut offset);
        take(&MARF_SECONDARY_FIELDS, &mut offset);
        Ok(Self { values })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MARF_HEADER_SIZE);
        let write = |names: &[&'static str], out: &mut Vec<u8>| {
            for &name in names {
                let value = self.get(name).unwrap_or("");
                let name_field = format!("{:<width$}: ", name, width = MARF_NAME_SIZE - 2);
                out.extend(name_field.bytes().chain(std::iter::repeat(b' ')).take(MARF_NAME_SIZE));
                out.extend(value.bytes().chain(std::iter::repeat(b' ')).take(MARF_VALUE_SIZE));
            }
        };
        write(&MARF_MAIN_FIELDS, &mut out);
        out.resize(out.len() + N_MARF_DATA_SETS * MARF_DATA_SET_SIZE, b' ');
        write(&MARF_PRODUCT_FIELDS, &mut out);
        write(&MARF_SECONDARY_FIELDS, &mut out);
        out
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Set a known field; unknown names are ignored
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let known = MARF_MAIN_FIELDS
            .iter()
            .chain(MARF_PRODUCT_FIELDS.iter())
            .chain(MARF_SECONDARY_FIELDS.iter())
            .find(|&&n| n == name);
        if let Some(&key) = known {
            self.values.insert(key, value.into());
        }
    }

    pub fn integer(&self, name: &str) -> SeviriResult<i64> {
        let value = self
            .get(name)
            .ok_or_else(|| SeviriError::Format(format!("missing U-MARF field {}", name)))?;
        value.parse::<i64>().map_err(|_| {
            SeviriError::Format(format!("U-MARF field {} is not an integer: {:?}", name, value))
        })
    }
}

/// Bands and rectangle selected in the file
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSelection {
    pub bands: [bool; N_CHANNELS],
    /// 0-based VIS/IR rectangle
    pub rect: PixelRect,
    pub n_lines_hrv: usize,
    pub n_columns_hrv: usize,
}

impl ImageSelection {
    fn from_marf(marf: &MarfHeader, grid: (usize, usize)) -> SeviriResult<Self> {
        let ids = marf.get("SelectedBandIDs").unwrap_or("");
        if ids.chars().count() < N_CHANNELS {
            return Err(SeviriError::Format(format!("malformed SelectedBandIDs: {:?}", ids)));
        }
        let mut bands = [false; N_CHANNELS];
        for (band, c) in bands.iter_mut().zip(ids.chars()) {
            *band = c == 'X';
        }

        let south = marf.integer("SouthLineSelectedRectangle")?;
        let north = marf.integer("NorthLineSelectedRectangle")?;
        let east = marf.integer("EastColumnSelectedRectangle")?;
        let west = marf.integer("WestColumnSelectedRectangle")?;
        let n_lines = marf.integer("NumberLinesVISIR")?;
        let n_columns = marf.integer("NumberColumnsVISIR")?;

        let in_grid = |v: i64, extent: usize| v >= 1 && v as usize <= extent;
        if !in_grid(south, grid.0) || !in_grid(north, grid.0) || south > north
            || !in_grid(east, grid.1) || !in_grid(west, grid.1) || east > west
        {
            return Err(SeviriError::Format(format!(
                "selected rectangle S{} N{} E{} W{} outside the reference grid",
                south, north, east, west
            )));
        }
        if n_lines != north - south + 1 || n_columns != west - east + 1 {
            return Err(SeviriError::Format(format!(
                "selected rectangle disagrees with declared size {} x {}",
                n_lines, n_columns
            )));
        }
        if n_columns % 4 != 0 {
            return Err(SeviriError::Format(format!(
                "VIS/IR line length {} is not a whole number of packed words",
                n_columns
            )));
        }

        let (n_lines_hrv, n_columns_hrv) = if bands[N_CHANNELS - 1] {
            (
                marf.integer("NumberLinesHRV")?.max(0) as usize,
                marf.integer("NumberColumnsHRV")?.max(0) as usize,
            )
        } else {
            (0, 0)
        };

        Ok(Self {
            bands,
            rect: PixelRect::new(
                (south - 1) as usize,
                (north - 1) as usize,
                (east - 1) as usize,
                (west - 1) as usize,
            ),
            n_lines_hrv,
            n_columns_hrv,
        })
    }

    pub fn has_channel(&self, channel: ChannelId) -> bool {
        self.bands[channel.index()]
    }

    fn vir_record_size(&self) -> usize {
        RECORD_PREFIX_SIZE + self.rect.n_columns() / 4 * 5
    }

    fn hrv_record_size(&self) -> usize {
        RECORD_PREFIX_SIZE + self.n_columns_hrv / 4 * 5 / 2
    }

    /// Selected VIS/IR channels in file order
    pub fn vir_channels(&self) -> Vec<ChannelId> {
        ChannelId::vir_channels().filter(|c| self.has_channel(*c)).collect()
    }

    /// Bytes of one line group
    pub fn line_group_size(&self) -> usize {
        let vir = self.vir_channels().len() * self.vir_record_size();
        let hrv = if self.bands[N_CHANNELS - 1] {
            HRV_RECORDS_PER_LINE * self.hrv_record_size()
        } else {
            0
        };
        vir + hrv
    }
}

/// File calibration of one channel: radiance = slope * count + offset
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RadiometricCalibration {
    pub slope: f64,
    pub offset: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceGrid {
    pub n_lines: i32,
    pub n_columns: i32,
    pub line_step: f32,
    pub column_step: f32,
    pub grid_origin: u8,
}

impl Default for ReferenceGrid {
    fn default() -> Self {
        Self {
            n_lines: 3712,
            n_columns: 3712,
            line_step: 3.000_403_2,
            column_step: 3.000_403_2,
            grid_origin: 2,
        }
    }
}

/// Fields of the 15HEADER used by preprocessing
#[derive(Debug, Clone, PartialEq)]
pub struct Level15Header {
    pub satellite_id: u16,
    pub orbit: Vec<OrbitPolynomial>,
    pub longitude_of_ssp: f32,
    pub reference_grid: ReferenceGrid,
    pub calibration: [RadiometricCalibration; N_CHANNELS],
}

impl Level15Header {
    pub fn parse(buf: &[u8]) -> SeviriResult<Self> {
        if buf.len() < L15_HEADER_SIZE {
            return Err(SeviriError::Format("truncated 15HEADER".to_string()));
        }

        let mut orbit = Vec::new();
        for k in 0..N_ORBIT_POLYNOMIALS {
            let base = HDR_ORBIT_POLYNOMIAL + k * ORBIT_POLYNOMIAL_SIZE;
            let start = read_cds(buf, base);
            if start.is_zero() {
                continue;
            }
            let coefs = |axis: usize| {
                let mut c = [0.0; 8];
                for (n, v) in c.iter_mut().enumerate() {
                    *v = read_f64(buf, base + 12 + axis * 64 + n * 8);
                }
                c
            };
            orbit.push(OrbitPolynomial {
                start,
                end: read_cds(buf, base + 6),
                x: coefs(0),
                y: coefs(1),
                z: coefs(2),
            });
        }

        let grid = HDR_REFERENCE_GRID_VIS_IR;
        let reference_grid = ReferenceGrid {
            n_lines: read_i32(buf, grid),
            n_columns: read_i32(buf, grid + 4),
            line_step: read_f32(buf, grid + 8),
            column_step: read_f32(buf, grid + 12),
            grid_origin: buf[grid + 16],
        };

        let mut calibration = [RadiometricCalibration::default(); N_CHANNELS];
        for (k, cal) in calibration.iter_mut().enumerate() {
            let base = HDR_IMAGE_CALIBRATION + k * 16;
            cal.slope = read_f64(buf, base);
            cal.offset = read_f64(buf, base + 8);
        }

        Ok(Self {
            satellite_id: read_u16(buf, HDR_SATELLITE_ID),
            orbit,
            longitude_of_ssp: read_f32(buf, HDR_LONGITUDE_OF_SSP),
            reference_grid,
            calibration,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; L15_HEADER_SIZE];
        put(&mut buf, HDR_SATELLITE_ID, &self.satellite_id.to_be_bytes());

        for (k, poly) in self.orbit.iter().take(N_ORBIT_POLYNOMIALS).enumerate() {
            let base = HDR_ORBIT_POLYNOMIAL + k * ORBIT_POLYNOMIAL_SIZE;
            put(&mut buf, base, &poly.start.to_be_bytes());
            put(&mut buf, base + 6, &poly.end.to_be_bytes());
            for (axis, coefs) in [&poly.x, &poly.y, &poly.z].into_iter().enumerate() {
                for (n, v) in coefs.iter().enumerate() {
                    put(&mut buf, base + 12 + axis * 64 + n * 8, &v.to_be_bytes());
                }
            }
        }

        put(&mut buf, HDR_LONGITUDE_OF_SSP, &self.longitude_of_ssp.to_be_bytes());
        let grid = HDR_REFERENCE_GRID_VIS_IR;
        put(&mut buf, grid, &self.reference_grid.n_lines.to_be_bytes());
        put(&mut buf, grid + 4, &self.reference_grid.n_columns.to_be_bytes());
        put(&mut buf, grid + 8, &self.reference_grid.line_step.to_be_bytes());
        put(&mut buf, grid + 12, &self.reference_grid.column_step.to_be_bytes());
        buf[grid + 16] = self.reference_grid.grid_origin;

        for (k, cal) in self.calibration.iter().enumerate() {
            let base = HDR_IMAGE_CALIBRATION + k * 16;
            put(&mut buf, base, &cal.slope.to_be_bytes());
            put(&mut buf, base + 8, &cal.offset.to_be_bytes());
        }
        buf
    }
}

/// Fields of the 15TRAILER used by preprocessing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level15Trailer {
    pub satellite_id: u16,
    pub nominal_image_scanning: bool,
    pub reduced_scan: bool,
    pub scan_start: CdsTime,
    pub scan_end: CdsTime,
    /// 1-based south line, north line, east column, west column
    pub actual_rectangle: [i32; 4],
}

impl Level15Trailer {
    pub fn parse(buf: &[u8]) -> SeviriResult<Self> {
        if buf.len() < L15_TRAILER_SIZE {
            return Err(SeviriError::Format("truncated 15TRAILER".to_string()));
        }
        let mut actual_rectangle = [0i32; 4];
        for (k, v) in actual_rectangle.iter_mut().enumerate() {
            *v = read_i32(buf, TRL_ACTUAL_RECTANGLE + 4 * k);
        }
        Ok(Self {
            satellite_id: read_u16(buf, TRL_SATELLITE_ID),
            nominal_image_scanning: buf[TRL_NOMINAL_IMAGE_SCANNING] != 0,
            reduced_scan: buf[TRL_REDUCED_SCAN] != 0,
            scan_start: read_cds(buf, TRL_SCAN_FORWARD_START),
            scan_end: read_cds(buf, TRL_SCAN_FORWARD_END),
            actual_rectangle,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; L15_TRAILER_SIZE];
        put(&mut buf, TRL_SATELLITE_ID, &self.satellite_id.to_be_bytes());
        buf[TRL_NOMINAL_IMAGE_SCANNING] = self.nominal_image_scanning as u8;
        buf[TRL_REDUCED_SCAN] = self.reduced_scan as u8;
        put(&mut buf, TRL_SCAN_FORWARD_START, &self.scan_start.to_be_bytes());
        put(&mut buf, TRL_SCAN_FORWARD_END, &self.scan_end.to_be_bytes());
        for (k, v) in self.actual_rectangle.iter().enumerate() {
            put(&mut buf, TRL_ACTUAL_RECTANGLE + 4 * k, &v.to_be_bytes());
        }
        buf
    }
}

/// Decoded contents of a native file, read-only after construction.
///
/// Counts are addressed in full-disk coordinates. Only the file's selected
/// rectangle is stored; anything outside reads as count 0 (no data).
#[derive(Debug, Clone)]
pub struct RawImage {
    satellite: Satellite,
    scan: ScanWindow,
    scan_start_jd: f64,
    scan_end_jd: f64,
    full_disk: (usize, usize),
    selected: PixelRect,
    actual: Option<PixelRect>,
    longitude_of_ssp: f64,
    /// Orbit position (km) at the scan centre, when a polynomial covers it
    satellite_position: Option<[f64; 3]>,
    sub_satellite: (f64, f64),
    orbit: Vec<OrbitPolynomial>,
    calibration: [RadiometricCalibration; N_CHANNELS],
    counts: BTreeMap<ChannelId, Array2<u16>>,
    /// Mean acquisition Julian Day per selected line, 0 when not recorded
    line_times: Vec<f64>,
}

impl RawImage {
    pub fn satellite(&self) -> Satellite {
        self.satellite
    }

    pub fn scan_window(&self) -> ScanWindow {
        self.scan
    }

    pub fn scan_start_jd(&self) -> f64 {
        self.scan_start_jd
    }

    pub fn scan_end_jd(&self) -> f64 {
        self.scan_end_jd
    }

    pub fn scan_centre_jd(&self) -> f64 {
        0.5 * (self.scan_start_jd + self.scan_end_jd)
    }

    /// (lines, columns) of the full-disk reference grid
    pub fn full_disk_dim(&self) -> (usize, usize) {
        self.full_disk
    }

    /// Rectangle stored in the file
    pub fn selected_rect(&self) -> PixelRect {
        self.selected
    }

    /// Rectangle actually scanned, when the trailer records one
    pub fn actual_rect(&self) -> Option<PixelRect> {
        self.actual
    }

    /// Projection longitude of the reference grid
    pub fn longitude_of_ssp(&self) -> f64 {
        self.longitude_of_ssp
    }

    /// Satellite position from the orbit records at the scan centre
    pub fn satellite_position(&self) -> Option<[f64; 3]> {
        self.satellite_position
    }

    /// Sub-satellite (lat, lon): from the orbit when available, otherwise
    /// the equator below the projection longitude
    pub fn sub_satellite_point(&self) -> (f64, f64) {
        self.sub_satellite
    }

    pub fn sub_satellite_lat(&self) -> f64 {
        self.sub_satellite.0
    }

    pub fn sub_satellite_lon(&self) -> f64 {
        self.sub_satellite.1
    }

    pub fn orbit(&self) -> &[OrbitPolynomial] {
        &self.orbit
    }

    pub fn calibration(&self, channel: ChannelId) -> RadiometricCalibration {
        self.calibration[channel.index()]
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.counts.keys().copied()
    }

    /// Counts of the selected rectangle
    pub fn counts(&self, channel: ChannelId) -> Option<&Array2<u16>> {
        self.counts.get(&channel)
    }

    /// Count at a full-disk position, 0 outside the stored rectangle
    pub fn count(&self, channel: ChannelId, line: usize, column: usize) -> u16 {
        match self.counts.get(&channel) {
            Some(data) if self.selected.contains(line, column) => {
                data[[line - self.selected.first_line, column - self.selected.first_column]]
            }
            _ => 0,
        }
    }

    /// Counts over a full-disk rectangle
    pub fn counts_window(&self, channel: ChannelId, rect: &PixelRect) -> SeviriResult<Array2<u16>> {
        if !self.counts.contains_key(&channel) {
            return Err(SeviriError::Argument(format!("channel {} was not decoded", channel)));
        }
        Ok(Array2::from_shape_fn(rect.dim(), |(i, j)| {
            self.count(channel, rect.first_line + i, rect.first_column + j)
        }))
    }

    /// Acquisition Julian Day of a full-disk line. Uses the recorded line
    /// time when present, otherwise interpolates across the scan.
    pub fn line_time(&self, line: usize) -> f64 {
        if self.selected.first_line <= line && line <= self.selected.last_line {
            let recorded = self.line_times[line - self.selected.first_line];
            if recorded > 0.0 {
                return recorded;
            }
        }
        let span = (self.full_disk.0.max(2) - 1) as f64;
        self.scan_start_jd + line as f64 / span * (self.scan_end_jd - self.scan_start_jd)
    }
}

/// Trailer rectangle (1-based S, N, E, W) as a 0-based rectangle, `None`
/// when empty or outside the reference grid
fn actual_rectangle(bounds: [i32; 4], grid: (usize, usize)) -> Option<PixelRect> {
    let [south, north, east, west] = bounds;
    let in_grid = |v: i32, extent: usize| v >= 1 && v as usize <= extent;
    if !in_grid(south, grid.0) || !in_grid(north, grid.0) || south > north
        || !in_grid(east, grid.1) || !in_grid(west, grid.1) || east > west
    {
        if bounds != [0; 4] {
            log::warn!("Ignoring actual scan rectangle {:?} outside the reference grid", bounds);
        }
        return None;
    }
    Some(PixelRect::new(
        (south - 1) as usize,
        (north - 1) as usize,
        (east - 1) as usize,
        (west - 1) as usize,
    ))
}

/// Reader for one native file. Headers are parsed at open; image data is
/// decoded on demand in a single sequential pass.
#[derive(Debug)]
pub struct NativeReader {
    path: PathBuf,
    marf: MarfHeader,
    header: Level15Header,
    trailer: Level15Trailer,
    selection: ImageSelection,
    satellite: Satellite,
}

impl NativeReader {
    pub fn open<P: AsRef<Path>>(path: P) -> SeviriResult<Self> {
        let path = path.as_ref().to_path_buf();
        log::info!("Opening SEVIRI native file: {}", path.display());

        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut marf_buf = vec![0u8; MARF_HEADER_SIZE];
        reader.read_exact(&mut marf_buf).map_err(truncated("U-MARF header"))?;
        let marf = MarfHeader::parse(&marf_buf)?;
        if marf.get("FormatName") != Some(NATIVE_MAGIC) {
            return Err(SeviriError::Format(format!(
                "not a native file: FormatName is {:?}",
                marf.get("FormatName").unwrap_or("")
            )));
        }

        reader.seek(SeekFrom::Current(PACKET_HEADER_SIZE as i64))?;
        let mut header_buf = vec![0u8; L15_HEADER_SIZE];
        reader.read_exact(&mut header_buf).map_err(truncated("15HEADER"))?;
        let header = Level15Header::parse(&header_buf)?;
        drop(header_buf);

        let satellite = Satellite::from_id(header.satellite_id)?;
        let grid = header.reference_grid;
        if grid.n_lines as usize != FULL_DISK_SIZE || grid.n_columns as usize != FULL_DISK_SIZE {
            return Err(SeviriError::Format(format!(
                "unsupported reference grid {} x {}",
                grid.n_lines, grid.n_columns
            )));
        }
        let selection =
            ImageSelection::from_marf(&marf, (grid.n_lines as usize, grid.n_columns as usize))?;

        let image_offset = (MARF_HEADER_SIZE + PACKET_HEADER_SIZE + L15_HEADER_SIZE) as u64;
        let image_size = (selection.rect.n_lines() * selection.line_group_size()) as u64;
        let trailer_offset = image_offset + image_size + PACKET_HEADER_SIZE as u64;
        let expected_len = trailer_offset + L15_TRAILER_SIZE as u64;
        if file_len < expected_len {
            return Err(SeviriError::Format(format!(
                "file is {} bytes, layout requires {}",
                file_len, expected_len
            )));
        }
        if file_len > expected_len {
            log::warn!("Ignoring {} trailing bytes after 15TRAILER", file_len - expected_len);
        }

        reader.seek(SeekFrom::Start(trailer_offset))?;
        let mut trailer_buf = vec![0u8; L15_TRAILER_SIZE];
        reader.read_exact(&mut trailer_buf).map_err(truncated("15TRAILER"))?;
        let trailer = Level15Trailer::parse(&trailer_buf)?;
        if trailer.satellite_id != header.satellite_id {
            log::warn!(
                "Trailer satellite id {} differs from header id {}",
                trailer.satellite_id,
                header.satellite_id
            );
        }

        log::info!(
            "{} image, selected {}, {} VIS/IR bands",
            satellite,
            selection.rect,
            selection.vir_channels().len()
        );

        Ok(Self { path, marf, header, trailer, selection, satellite })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn marf_header(&self) -> &MarfHeader {
        &self.marf
    }

    pub fn header(&self) -> &Level15Header {
        &self.header
    }

    pub fn trailer(&self) -> &Level15Trailer {
        &self.trailer
    }

    pub fn selection(&self) -> &ImageSelection {
        &self.selection
    }

    pub fn satellite(&self) -> Satellite {
        self.satellite
    }

    /// Decode the requested VIS/IR channels
    pub fn read_image(&self, channels: &[ChannelId]) -> SeviriResult<RawImage> {
        let wanted: BTreeSet<ChannelId> = channels.iter().copied().collect();
        for &channel in &wanted {
            if channel == ChannelId::HRV {
                return Err(SeviriError::Argument("HRV channel is not supported".to_string()));
            }
            if !self.selection.has_channel(channel) {
                return Err(SeviriError::Argument(format!(
                    "channel {} is not present in {}",
                    channel,
                    self.path.display()
                )));
            }
        }

        let scan_start = self.trailer.scan_start;
        let scan_end = self.trailer.scan_end;
        if scan_start.is_zero() || scan_end.julian_day() < scan_start.julian_day() {
            return Err(SeviriError::Format(format!(
                "invalid scan window {:?} .. {:?}",
                scan_start, scan_end
            )));
        }

        let rect = self.selection.rect;
        let (n_lines, n_columns) = rect.dim();
        let vir_channels = self.selection.vir_channels();
        let record_size = self.selection.vir_record_size();
        let group_size = self.selection.line_group_size();

        log::debug!(
            "Decoding {} lines x {} columns, line group {} bytes",
            n_lines,
            n_columns,
            group_size
        );

        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(
            (MARF_HEADER_SIZE + PACKET_HEADER_SIZE + L15_HEADER_SIZE) as u64,
        ))?;

        let mut decoded: BTreeMap<ChannelId, Vec<u16>> = wanted
            .iter()
            .map(|&c| (c, Vec::with_capacity(n_lines * n_columns)))
            .collect();
        let mut line_times = vec![0.0; n_lines];
        let mut invalid_lines = 0usize;
        let mut group = vec![0u8; group_size];

        for line in 0..n_lines {
            reader
                .read_exact(&mut group)
                .map_err(truncated(&format!("image data at line {}", rect.first_line + line + 1)))?;

            for (k, &channel) in vir_channels.iter().enumerate() {
                let record = &group[k * record_size..(k + 1) * record_size];
                let side_info = &record[PACKET_HEADER_SIZE..RECORD_PREFIX_SIZE];

                if side_info[LSI_CHANNEL_ID] != channel.number() {
                    return Err(SeviriError::Format(format!(
                        "corrupted line record: expected channel {} at line {}, found {}",
                        channel.number(),
                        rect.first_line + line + 1,
                        side_info[LSI_CHANNEL_ID]
                    )));
                }

                let Some(counts) = decoded.get_mut(&channel) else {
                    continue;
                };
                if side_info[LSI_LINE_VALIDITY] > 1 {
                    invalid_lines += 1;
                }
                if line_times[line] == 0.0 {
                    let mean_time = read_cds(side_info, LSI_MEAN_ACQUISITION_TIME);
                    if !mean_time.is_zero() {
                        line_times[line] = mean_time.julian_day();
                    }
                }
                unpack_10bit(&record[RECORD_PREFIX_SIZE..], counts, n_columns);
                counts.truncate((line + 1) * n_columns);
            }
        }

        if invalid_lines > 0 {
            log::warn!("{} line records flagged with reduced validity", invalid_lines);
        }

        let mut counts = BTreeMap::new();
        for (channel, data) in decoded {
            let array = Array2::from_shape_vec((n_lines, n_columns), data)
                .map_err(|e| SeviriError::Format(format!("Shape error: {}", e)))?;
            counts.insert(channel, array);
        }

        let scan = ScanWindow {
            start: scan_start.to_datetime()?,
            end: scan_end.to_datetime()?,
        };
        let scan_centre = 0.5 * (scan_start.julian_day() + scan_end.julian_day());
        let longitude_of_ssp = self.header.longitude_of_ssp as f64;
        let satellite_position = orbit_position(&self.header.orbit, scan_centre);
        let sub_satellite = match satellite_position {
            Some(position) => sub_satellite_point(position),
            None => {
                log::debug!("No orbit polynomial covers the scan, using nominal sub-satellite point");
                (0.0, longitude_of_ssp)
            }
        };

        let full_disk = (
            self.header.reference_grid.n_lines as usize,
            self.header.reference_grid.n_columns as usize,
        );
        let actual = actual_rectangle(self.trailer.actual_rectangle, full_disk);

        log::info!(
            "Decoded {} channel(s), scan {} .. {}",
            counts.len(),
            scan.start,
            scan.end
        );

        Ok(RawImage {
            satellite: self.satellite,
            scan,
            scan_start_jd: scan_start.julian_day(),
            scan_end_jd: scan_end.julian_day(),
            full_disk,
            selected: rect,
            actual,
            longitude_of_ssp,
            satellite_position,
            sub_satellite,
            orbit: self.header.orbit.clone(),
            calibration: self.header.calibration,
            counts,
            line_times,
        })
    }
}

/// Open `path` and decode `channels`
pub fn read_native<P: AsRef<Path>>(path: P, channels: &[ChannelId]) -> SeviriResult<RawImage> {
    NativeReader::open(path)?.read_image(channels)
}

/// Contents of a native file to be written. Only VIS/IR channels are
/// supported; every count array must match the selected rectangle.
#[derive(Debug, Clone)]
pub struct NativeImage {
    pub satellite: Satellite,
    pub scan_start: CdsTime,
    pub scan_end: CdsTime,
    pub longitude_of_ssp: f32,
    pub selected: PixelRect,
    pub calibration: [RadiometricCalibration; N_CHANNELS],
    pub orbit: Vec<OrbitPolynomial>,
    pub counts: BTreeMap<ChannelId, Array2<u16>>,
    /// Record per-line mean acquisition times in the line side info
    pub stamp_line_times: bool,
    /// HRV line width; when non-zero, three zero-filled HRV records follow
    /// the VIS/IR records of every line group
    pub hrv_columns: usize,
}

impl NativeImage {
    pub fn new(satellite: Satellite, scan_start: CdsTime, scan_end: CdsTime, selected: PixelRect) -> Self {
        Self {
            satellite,
            scan_start,
            scan_end,
            longitude_of_ssp: 0.0,
            selected,
            calibration: [RadiometricCalibration::default(); N_CHANNELS],
            orbit: Vec::new(),
            counts: BTreeMap::new(),
            stamp_line_times: true,
            hrv_columns: 0,
        }
    }

    fn selected_band_ids(&self) -> String {
        (1..=N_CHANNELS as u8)
            .map(|n| {
                let selected = if n as usize == N_CHANNELS {
                    self.hrv_columns > 0
                } else {
                    self.counts.keys().any(|c| c.number() == n)
                };
                if selected { 'X' } else { '-' }
            })
            .collect()
    }

    fn line_time(&self, line: usize) -> CdsTime {
        let start = self.scan_start.days as i64 * 86_400_000 + self.scan_start.millis as i64;
        let end = self.scan_end.days as i64 * 86_400_000 + self.scan_end.millis as i64;
        let t = start + ((end - start) as f64 * line as f64 / (FULL_DISK_SIZE - 1) as f64).round() as i64;
        CdsTime::new((t / 86_400_000) as u16, (t % 86_400_000) as u32)
    }
}

pub struct NativeWriter;

impl NativeWriter {
    pub fn write<P: AsRef<Path>>(path: P, image: &NativeImage) -> SeviriResult<()> {
        let rect = image.selected;
        let (n_lines, n_columns) = rect.dim();
        if n_columns % 4 != 0 {
            return Err(SeviriError::Argument(format!(
                "selected width {} must be a multiple of 4",
                n_columns
            )));
        }
        if image.hrv_columns % 8 != 0 {
            return Err(SeviriError::Argument(format!(
                "HRV width {} must be a multiple of 8",
                image.hrv_columns
            )));
        }
        if image.counts.is_empty() {
            return Err(SeviriError::Argument("no channels to write".to_string()));
        }
        for (channel, data) in &image.counts {
            if channel.index() >= N_VIR_CHANNELS {
                return Err(SeviriError::Argument("HRV channel is not supported".to_string()));
            }
            if data.dim() != rect.dim() {
                return Err(SeviriError::Argument(format!(
                    "channel {} counts are {:?}, selection is {:?}",
                    channel,
                    data.dim(),
                    rect.dim()
                )));
            }
        }

        log::info!("Writing SEVIRI native file: {}", path.as_ref().display());

        let mut marf = MarfHeader::default();
        marf.set("FormatName", NATIVE_MAGIC);
        marf.set("FormatDocumentName", "EUM/MSG/ICD/105");
        marf.set("FormatDocumentMajorVersion", "1");
        marf.set("FormatDocumentMinorVersion", "2");
        marf.set("SelectedBandIDs", image.selected_band_ids());
        marf.set("SouthLineSelectedRectangle", (rect.first_line + 1).to_string());
        marf.set("NorthLineSelectedRectangle", (rect.last_line + 1).to_string());
        marf.set("EastColumnSelectedRectangle", (rect.first_column + 1).to_string());
        marf.set("WestColumnSelectedRectangle", (rect.last_column + 1).to_string());
        marf.set("NumberLinesVISIR", n_lines.to_string());
        marf.set("NumberColumnsVISIR", n_columns.to_string());
        let n_lines_hrv = if image.hrv_columns > 0 { HRV_RECORDS_PER_LINE * n_lines } else { 0 };
        marf.set("NumberLinesHRV", n_lines_hrv.to_string());
        marf.set("NumberColumnsHRV", image.hrv_columns.to_string());

        let header = Level15Header {
            satellite_id: image.satellite.id(),
            orbit: image.orbit.clone(),
            longitude_of_ssp: image.longitude_of_ssp,
            reference_grid: ReferenceGrid::default(),
            calibration: image.calibration,
        };
        let trailer = Level15Trailer {
            satellite_id: image.satellite.id(),
            nominal_image_scanning: true,
            reduced_scan: false,
            scan_start: image.scan_start,
            scan_end: image.scan_end,
            actual_rectangle: [
                rect.first_line as i32 + 1,
                rect.last_line as i32 + 1,
                rect.first_column as i32 + 1,
                rect.last_column as i32 + 1,
            ],
        };

        let mut out = BufWriter::new(File::create(path.as_ref())?);
        let packet_header = [0u8; PACKET_HEADER_SIZE];
        out.write_all(&marf.to_bytes())?;
        out.write_all(&packet_header)?;
        out.write_all(&header.to_bytes())?;

        let mut record = Vec::with_capacity(RECORD_PREFIX_SIZE + n_columns / 4 * 5);
        let hrv_records = if image.hrv_columns > 0 { HRV_RECORDS_PER_LINE } else { 0 };
        for line in 0..n_lines {
            let absolute_line = rect.first_line + line;
            for (channel, data) in &image.counts {
                record.clear();
                record.extend_from_slice(&packet_header);
                let mut side_info = [0u8; LINE_SIDE_INFO_SIZE];
                put(&mut side_info, 1, &image.satellite.id().to_be_bytes());
                put(&mut side_info, LSI_LINE_NUMBER, &(absolute_line as i32 + 1).to_be_bytes());
                side_info[LSI_CHANNEL_ID] = channel.number();
                if image.stamp_line_times {
                    put(&mut side_info, LSI_MEAN_ACQUISITION_TIME, &image.line_time(absolute_line).to_be_bytes());
                }
                side_info[LSI_LINE_VALIDITY] = 1;
                record.extend_from_slice(&side_info);
                pack_10bit(data.row(line).iter().copied(), &mut record);
                out.write_all(&record)?;
            }

            for k in 0..hrv_records {
                record.clear();
                record.extend_from_slice(&packet_header);
                let mut side_info = [0u8; LINE_SIDE_INFO_SIZE];
                put(&mut side_info, 1, &image.satellite.id().to_be_bytes());
                let hrv_line = HRV_RECORDS_PER_LINE * absolute_line + k;
                put(&mut side_info, LSI_LINE_NUMBER, &(hrv_line as i32 + 1).to_be_bytes());
                side_info[LSI_CHANNEL_ID] = N_CHANNELS as u8;
                side_info[LSI_LINE_VALIDITY] = 1;
                record.extend_from_slice(&side_info);
                record.resize(record.len() + image.hrv_columns / 4 * 5 / 2, 0);
                out.write_all(&record)?;
            }
        }

        out.write_all(&packet_header)?;
        out.write_all(&trailer.to_bytes())?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_image() -> NativeImage {
        let rect = PixelRect::new(1800, 1809, 1840, 1847);
        let mut image = NativeImage::new(
            Satellite::Msg3,
            CdsTime::new(23906, 43_200_000),
            CdsTime::new(23906, 43_920_000),
            rect,
        );
        image.longitude_of_ssp = 0.0;
        image.calibration[0] = RadiometricCalibration { slope: 0.0205, offset: -1.0455 };
        image.calibration[8] = RadiometricCalibration { slope: 0.2052, offset: -10.4660 };
        image.counts.insert(
            ChannelId::VIS006,
            Array2::from_shape_fn(rect.dim(), |(i, j)| (i * 37 + j * 11) as u16 % 1024),
        );
        image.counts.insert(
            ChannelId::IR_108,
            Array2::from_shape_fn(rect.dim(), |(i, j)| (1023 - i * 5 - j) as u16),
        );
        image
    }

    #[test]
    fn test_10bit_packing() {
        let samples = [0u16, 1023, 512, 3, 777, 1, 0, 1000];
        let mut packed = Vec::new();
        pack_10bit(samples.iter().copied(), &mut packed);
        assert_eq!(packed.len(), 10);

        let mut unpacked = Vec::new();
        unpack_10bit(&packed, &mut unpacked, samples.len());
        assert_eq!(unpacked, samples);
    }

    #[test]
    fn test_unpack_known_bytes() {
        // 0b1111111111_0000000001_1000000000_0000000011
        let packed = [0xFF, 0xC0, 0x18, 0x00, 0x03];
        let mut out = Vec::new();
        unpack_10bit(&packed, &mut out, 4);
        assert_eq!(out, vec![1023, 1, 512, 3]);
    }

    #[test]
    fn test_marf_header_round_trip() {
        let mut marf = MarfHeader::default();
        marf.set("FormatName", "NATIVE");
        marf.set("SelectedBandIDs", "XXXXXXXXXXX-");
        marf.set("NumberLinesVISIR", "3712");
        marf.set("NotAField", "ignored");
        let bytes = marf.to_bytes();
        assert_eq!(bytes.len(), MARF_HEADER_SIZE);

        let parsed = MarfHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.get("FormatName"), Some("NATIVE"));
        assert_eq!(parsed.get("SelectedBandIDs"), Some("XXXXXXXXXXX-"));
        assert_eq!(parsed.integer("NumberLinesVISIR").unwrap(), 3712);
        assert!(parsed.get("NotAField").is_none());
        assert!(parsed.integer("FormatName").is_err());
    }

    #[test]
    fn test_header_and_trailer_round_trip() {
        let image = sample_image();
        let header = Level15Header {
            satellite_id: 323,
            orbit: vec![OrbitPolynomial {
                start: image.scan_start,
                end: image.scan_end,
                x: [84328.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                y: [10.0; 8],
                z: [-3.0; 8],
            }],
            longitude_of_ssp: 9.5,
            reference_grid: ReferenceGrid::default(),
            calibration: image.calibration,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), L15_HEADER_SIZE);
        assert_eq!(Level15Header::parse(&bytes).unwrap(), header);

        let trailer = Level15Trailer {
            satellite_id: 323,
            nominal_image_scanning: true,
            reduced_scan: false,
            scan_start: image.scan_start,
            scan_end: image.scan_end,
            actual_rectangle: [1, 3712, 1, 3712],
        };
        let bytes = trailer.to_bytes();
        assert_eq!(bytes.len(), L15_TRAILER_SIZE);
        assert_eq!(Level15Trailer::parse(&bytes).unwrap(), trailer);
    }

    #[test]
    fn test_write_then_read() {
        let _ = env_logger::builder().is_test(true).try_init();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.nat");
        let image = sample_image();
        NativeWriter::write(&path, &image).unwrap();

        let reader = NativeReader::open(&path).unwrap();
        assert_eq!(reader.satellite(), Satellite::Msg3);
        assert_eq!(reader.selection().rect, image.selected);
        assert_eq!(reader.selection().vir_channels(), vec![ChannelId::VIS006, ChannelId::IR_108]);

        let raw = reader.read_image(&[ChannelId::IR_108, ChannelId::VIS006]).unwrap();
        assert_eq!(raw.full_disk_dim(), (3712, 3712));
        assert_eq!(raw.counts(ChannelId::VIS006), image.counts.get(&ChannelId::VIS006));
        assert_eq!(raw.counts(ChannelId::IR_108), image.counts.get(&ChannelId::IR_108));
        assert_eq!(raw.calibration(ChannelId::IR_108), image.calibration[8]);
        assert_eq!(raw.actual_rect(), Some(image.selected));

        // Outside the stored rectangle counts read as missing
        assert_eq!(raw.count(ChannelId::VIS006, 0, 0), 0);
        assert_eq!(raw.count(ChannelId::VIS006, 1800, 1840), image.counts[&ChannelId::VIS006][[0, 0]]);

        let window = raw.counts_window(ChannelId::IR_108, &PixelRect::new(1799, 1800, 1840, 1841)).unwrap();
        assert_eq!(window[[0, 0]], 0);
        assert_eq!(window[[1, 1]], image.counts[&ChannelId::IR_108][[0, 1]]);
        assert!(raw.counts_window(ChannelId::IR_039, &PixelRect::new(0, 1, 0, 1)).is_err());

        // Stamped line times agree with the linear scan model to the millisecond
        assert!((raw.line_time(1805) - raw.scan_start_jd()).abs() > 0.0);
        let interpolated = raw.scan_start_jd() + 1805.0 / 3711.0 * (raw.scan_end_jd() - raw.scan_start_jd());
        assert!((raw.line_time(1805) - interpolated).abs() < 1.0 / 86_400_000.0);
    }

    fn rewrite_trailer(path: &Path, edit: impl FnOnce(&mut Level15Trailer)) {
        let mut bytes = std::fs::read(path).unwrap();
        let offset = bytes.len() - L15_TRAILER_SIZE;
        let mut trailer = Level15Trailer::parse(&bytes[offset..]).unwrap();
        edit(&mut trailer);
        bytes[offset..].copy_from_slice(&trailer.to_bytes());
        std::fs::write(path, &bytes).unwrap();
    }

    #[test]
    fn test_actual_rectangle_from_trailer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.nat");
        let image = sample_image();
        NativeWriter::write(&path, &image).unwrap();

        rewrite_trailer(&path, |t| t.actual_rectangle = [1, 3712, 1, 3712]);
        let raw = read_native(&path, &[ChannelId::VIS006]).unwrap();
        assert_eq!(raw.actual_rect(), Some(PixelRect::full(3712, 3712)));
        assert_eq!(raw.selected_rect(), image.selected);

        rewrite_trailer(&path, |t| t.actual_rectangle = [1, 5000, 1, 4]);
        let raw = read_native(&path, &[ChannelId::VIS006]).unwrap();
        assert_eq!(raw.actual_rect(), None);
        assert_eq!(raw.selected_rect(), image.selected);

        rewrite_trailer(&path, |t| t.actual_rectangle = [0; 4]);
        let raw = read_native(&path, &[ChannelId::VIS006]).unwrap();
        assert_eq!(raw.actual_rect(), None);
    }

    #[test]
    fn test_unsupported_reference_grid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.nat");
        NativeWriter::write(&path, &sample_image()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let offset = MARF_HEADER_SIZE + PACKET_HEADER_SIZE;
        let mut header = Level15Header::parse(&bytes[offset..offset + L15_HEADER_SIZE]).unwrap();
        header.reference_grid.n_lines = 1000;
        header.reference_grid.n_columns = 1000;
        bytes[offset..offset + L15_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(NativeReader::open(&path), Err(SeviriError::Format(_))));
    }

    #[test]
    fn test_hrv_records_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.nat");
        let hrv_path = temp_dir.path().join("hrv.nat");
        let mut image = sample_image();
        NativeWriter::write(&plain_path, &image).unwrap();
        image.hrv_columns = 11136;
        NativeWriter::write(&hrv_path, &image).unwrap();

        let reader = NativeReader::open(&hrv_path).unwrap();
        let selection = reader.selection();
        assert!(selection.has_channel(ChannelId::HRV));
        assert_eq!(selection.n_lines_hrv, 30);
        assert_eq!(selection.n_columns_hrv, 11136);
        assert_eq!(selection.vir_channels(), vec![ChannelId::VIS006, ChannelId::IR_108]);

        let vir_group = 2 * (RECORD_PREFIX_SIZE + 8 / 4 * 5);
        let hrv_group = 3 * (RECORD_PREFIX_SIZE + 11136 / 4 * 5 / 2);
        assert_eq!(selection.line_group_size(), vir_group + hrv_group);
        let expected_len = MARF_HEADER_SIZE
            + PACKET_HEADER_SIZE
            + L15_HEADER_SIZE
            + 10 * (vir_group + hrv_group)
            + PACKET_HEADER_SIZE
            + L15_TRAILER_SIZE;
        assert_eq!(std::fs::metadata(&hrv_path).unwrap().len(), expected_len as u64);

        let channels = [ChannelId::VIS006, ChannelId::IR_108];
        let with_hrv = reader.read_image(&channels).unwrap();
        let plain = read_native(&plain_path, &channels).unwrap();
        for channel in channels {
            assert_eq!(with_hrv.counts(channel), image.counts.get(&channel));
            assert_eq!(with_hrv.counts(channel), plain.counts(channel));
        }
        for line in 1800..=1809 {
            assert_eq!(with_hrv.line_time(line), plain.line_time(line));
        }
        assert!(matches!(reader.read_image(&[ChannelId::HRV]), Err(SeviriError::Argument(_))));
    }

    #[test]
    fn test_missing_channel_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.nat");
        NativeWriter::write(&path, &sample_image()).unwrap();

        let reader = NativeReader::open(&path).unwrap();
        assert!(matches!(reader.read_image(&[ChannelId::WV_062]), Err(SeviriError::Argument(_))));
        assert!(matches!(reader.read_image(&[ChannelId::HRV]), Err(SeviriError::Argument(_))));
    }

    #[test]
    fn test_truncated_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.nat");
        NativeWriter::write(&path, &sample_image()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1000]).unwrap();
        assert!(matches!(NativeReader::open(&path), Err(SeviriError::Format(_))));

        std::fs::write(&path, &bytes[..4000]).unwrap();
        assert!(matches!(NativeReader::open(&path), Err(SeviriError::Format(_))));
    }

    #[test]
    fn test_bad_magic() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.nat");
        NativeWriter::write(&path, &sample_image()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[MARF_NAME_SIZE..MARF_NAME_SIZE + 6].copy_from_slice(b"HRIT  ");
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(NativeReader::open(&path), Err(SeviriError::Format(_))));
    }

    #[test]
    fn test_corrupted_line_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.nat");
        NativeWriter::write(&path, &sample_image()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let first_record = MARF_HEADER_SIZE + PACKET_HEADER_SIZE + L15_HEADER_SIZE;
        bytes[first_record + PACKET_HEADER_SIZE + LSI_CHANNEL_ID] = 7;
        std::fs::write(&path, &bytes).unwrap();

        let reader = NativeReader::open(&path).unwrap();
        assert!(matches!(reader.read_image(&[ChannelId::VIS006]), Err(SeviriError::Format(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = NativeReader::open("/nonexistent/path/file.nat");
        assert!(matches!(result, Err(SeviriError::Io(_))));
    }
}
