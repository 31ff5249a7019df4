use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// No-data value written into every output cell that has no physical meaning
/// (space pixels, darkness for reflectance, non-positive radiance for BT).
pub const FILL_VALUE: f32 = -999.0;

/// Same sentinel for the f64 time grid
pub const FILL_VALUE_F64: f64 = -999.0;

/// Number of SEVIRI spectral channels (11 VIS/IR + HRV)
pub const N_CHANNELS: usize = 12;

/// Number of VIS/IR channels stored in the low resolution grid
pub const N_VIR_CHANNELS: usize = 11;

/// Full-disk VIS/IR grid size in lines and columns
pub const FULL_DISK_SIZE: usize = 3712;

/// SEVIRI channel identifier (1-based sensor channel number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(u8);

/// Spectral class of a channel, decides which output units are meaningful
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Solar reflective channels (VIS0.6, VIS0.8, NIR1.6)
    Reflective,
    /// Thermal emissive channels (IR3.9 through IR13.4)
    Thermal,
    /// High resolution visible
    HighResVisible,
}

impl ChannelId {
    pub const VIS006: ChannelId = ChannelId(1);
    pub const VIS008: ChannelId = ChannelId(2);
    pub const IR_016: ChannelId = ChannelId(3);
    pub const IR_039: ChannelId = ChannelId(4);
    pub const WV_062: ChannelId = ChannelId(5);
    pub const WV_073: ChannelId = ChannelId(6);
    pub const IR_087: ChannelId = ChannelId(7);
    pub const IR_097: ChannelId = ChannelId(8);
    pub const IR_108: ChannelId = ChannelId(9);
    pub const IR_120: ChannelId = ChannelId(10);
    pub const IR_134: ChannelId = ChannelId(11);
    pub const HRV: ChannelId = ChannelId(12);

    const NAMES: [&'static str; N_CHANNELS] = [
        "VIS006", "VIS008", "IR_016", "IR_039", "WV_062", "WV_073",
        "IR_087", "IR_097", "IR_108", "IR_120", "IR_134", "HRV",
    ];

    /// Create a channel id from a 1-based channel number
    pub fn new(number: u8) -> SeviriResult<Self> {
        if (1..=N_CHANNELS as u8).contains(&number) {
            Ok(ChannelId(number))
        } else {
            Err(SeviriError::Argument(format!(
                "channel {} outside valid range 1..={}",
                number, N_CHANNELS
            )))
        }
    }

    /// All VIS/IR channels in band order
    pub fn vir_channels() -> impl Iterator<Item = ChannelId> {
        (1..=N_VIR_CHANNELS as u8).map(ChannelId)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// 0-based index into per-channel tables
    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self.index()]
    }

    pub fn kind(self) -> ChannelKind {
        match self.0 {
            1..=3 => ChannelKind::Reflective,
            12 => ChannelKind::HighResVisible,
            _ => ChannelKind::Thermal,
        }
    }

    /// Whether `unit` is physically meaningful for this channel
    pub fn supports(self, unit: Unit) -> bool {
        match unit {
            Unit::Radiance | Unit::RawCount => true,
            Unit::Reflectance => self.kind() != ChannelKind::Thermal,
            Unit::BrightnessTemperature => self.kind() == ChannelKind::Thermal,
        }
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = SeviriError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ChannelId::new(value)
    }
}

impl From<ChannelId> for u8 {
    fn from(channel: ChannelId) -> Self {
        channel.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

/// Output unit requested for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// Bidirectional reflectance factor
    Reflectance,
    /// Brightness temperature in Kelvin
    BrightnessTemperature,
    /// Spectral radiance, mW m-2 sr-1 (cm-1)-1
    Radiance,
    /// Raw 10-bit digital count
    RawCount,
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unit::Reflectance => write!(f, "BRF"),
            Unit::BrightnessTemperature => write!(f, "BT"),
            Unit::Radiance => write!(f, "RAD"),
            Unit::RawCount => write!(f, "CNT"),
        }
    }
}

impl FromStr for Unit {
    type Err = SeviriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BRF" | "REFLECTANCE" => Ok(Unit::Reflectance),
            "BT" | "BRIGHTNESS_TEMPERATURE" => Ok(Unit::BrightnessTemperature),
            "RAD" | "RADIANCE" => Ok(Unit::Radiance),
            "CNT" | "COUNT" | "RAW_COUNT" => Ok(Unit::RawCount),
            _ => Err(SeviriError::Argument(format!("unknown output unit: {}", s))),
        }
    }
}

/// MSG satellites carrying SEVIRI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Satellite {
    Msg1,
    Msg2,
    Msg3,
    Msg4,
}

impl Satellite {
    /// Map the satellite id stored in the file headers
    pub fn from_id(id: u16) -> SeviriResult<Self> {
        match id {
            321 => Ok(Satellite::Msg1),
            322 => Ok(Satellite::Msg2),
            323 => Ok(Satellite::Msg3),
            324 => Ok(Satellite::Msg4),
            _ => Err(SeviriError::Format(format!("unsupported satellite id: {}", id))),
        }
    }

    pub fn id(self) -> u16 {
        match self {
            Satellite::Msg1 => 321,
            Satellite::Msg2 => 322,
            Satellite::Msg3 => 323,
            Satellite::Msg4 => 324,
        }
    }
}

impl std::fmt::Display for Satellite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Satellite::Msg1 => write!(f, "MSG-1"),
            Satellite::Msg2 => write!(f, "MSG-2"),
            Satellite::Msg3 => write!(f, "MSG-3"),
            Satellite::Msg4 => write!(f, "MSG-4"),
        }
    }
}

/// Inclusive, 0-based pixel rectangle in full-disk coordinates.
/// Line 0 is the southernmost line, column 0 the easternmost column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub first_line: usize,
    pub last_line: usize,
    pub first_column: usize,
    pub last_column: usize,
}

impl PixelRect {
    pub fn new(first_line: usize, last_line: usize, first_column: usize, last_column: usize) -> Self {
        Self { first_line, last_line, first_column, last_column }
    }

    /// Whole grid of the given size
    pub fn full(n_lines: usize, n_columns: usize) -> Self {
        Self::new(0, n_lines.saturating_sub(1), 0, n_columns.saturating_sub(1))
    }

    pub fn n_lines(&self) -> usize {
        self.last_line - self.first_line + 1
    }

    pub fn n_columns(&self) -> usize {
        self.last_column - self.first_column + 1
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.n_lines(), self.n_columns())
    }

    pub fn contains(&self, line: usize, column: usize) -> bool {
        (self.first_line..=self.last_line).contains(&line)
            && (self.first_column..=self.last_column).contains(&column)
    }
}

impl std::fmt::Display for PixelRect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lines {}..={}, columns {}..={}",
            self.first_line, self.last_line, self.first_column, self.last_column
        )
    }
}

/// How the four region parameters of a request are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionMode {
    /// (first_line, last_line, first_column, last_column)
    PixelRange,
    /// (lat_min, lat_max, lon_min, lon_max)
    GeographicBox,
    /// Whole 3712 x 3712 disk, parameters ignored
    FullDisk,
    /// Rectangle declared in the file header, parameters ignored
    ActualImage,
}

/// Caller region descriptor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RegionSpec {
    PixelRange(PixelRect),
    GeographicBox {
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
    },
    FullDisk,
    ActualImage,
}

impl RegionSpec {
    /// Build a region from a mode and its four numeric bounds.
    /// Pixel bounds must be non-negative whole numbers.
    pub fn from_mode(mode: RegionMode, params: [f64; 4]) -> SeviriResult<Self> {
        match mode {
            RegionMode::PixelRange => {
                let mut bounds = [0usize; 4];
                for (bound, &value) in bounds.iter_mut().zip(params.iter()) {
                    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
                        return Err(SeviriError::Argument(format!(
                            "pixel bound {} is not a non-negative integer",
                            value
                        )));
                    }
                    *bound = value as usize;
                }
                Ok(RegionSpec::PixelRange(PixelRect::new(
                    bounds[0], bounds[1], bounds[2], bounds[3],
                )))
            }
            RegionMode::GeographicBox => {
                if params.iter().any(|v| !v.is_finite()) {
                    return Err(SeviriError::Argument(
                        "geographic bounds must be finite".to_string(),
                    ));
                }
                Ok(RegionSpec::GeographicBox {
                    lat_min: params[0],
                    lat_max: params[1],
                    lon_min: params[2],
                    lon_max: params[3],
                })
            }
            RegionMode::FullDisk => Ok(RegionSpec::FullDisk),
            RegionMode::ActualImage => Ok(RegionSpec::ActualImage),
        }
    }
}

/// One entry of a calibration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandRequest {
    pub channel: ChannelId,
    pub unit: Unit,
}

/// Coarse error classification carried by a failed pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    Argument,
    Range,
    RegionEmpty,
    ChannelUnitMismatch,
    Config,
}

/// Error types for SEVIRI preprocessing
#[derive(Debug, thiserror::Error)]
pub enum SeviriError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    Format(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Pixel bounds out of range: {0}")]
    Range(String),

    #[error("Geographic box lat [{lat_min}, {lat_max}] lon [{lon_min}, {lon_max}] matches no pixel")]
    RegionEmpty {
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
    },

    #[error("Channel {channel} cannot be calibrated to {unit}")]
    ChannelUnitMismatch { channel: ChannelId, unit: Unit },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SeviriError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SeviriError::Io(_) => ErrorKind::Io,
            SeviriError::Format(_) => ErrorKind::Format,
            SeviriError::Argument(_) => ErrorKind::Argument,
            SeviriError::Range(_) => ErrorKind::Range,
            SeviriError::RegionEmpty { .. } => ErrorKind::RegionEmpty,
            SeviriError::ChannelUnitMismatch { .. } => ErrorKind::ChannelUnitMismatch,
            SeviriError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<serde_json::Error> for SeviriError {
    fn from(err: serde_json::Error) -> Self {
        SeviriError::Config(err.to_string())
    }
}

/// Result type for SEVIRI operations
pub type SeviriResult<T> = Result<T, SeviriError>;

/// Scan window of one repeat cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kinds() {
        assert_eq!(ChannelId::VIS006.kind(), ChannelKind::Reflective);
        assert_eq!(ChannelId::IR_016.kind(), ChannelKind::Reflective);
        assert_eq!(ChannelId::IR_039.kind(), ChannelKind::Thermal);
        assert_eq!(ChannelId::IR_134.kind(), ChannelKind::Thermal);
        assert_eq!(ChannelId::HRV.kind(), ChannelKind::HighResVisible);
        assert!(ChannelId::new(0).is_err());
        assert!(ChannelId::new(13).is_err());
        assert_eq!(ChannelId::new(9).unwrap().name(), "IR_108");
    }

    #[test]
    fn test_channel_unit_support() {
        assert!(ChannelId::VIS008.supports(Unit::Reflectance));
        assert!(!ChannelId::VIS008.supports(Unit::BrightnessTemperature));
        assert!(ChannelId::IR_108.supports(Unit::BrightnessTemperature));
        assert!(!ChannelId::IR_108.supports(Unit::Reflectance));
        assert!(ChannelId::IR_108.supports(Unit::Radiance));
        assert!(ChannelId::VIS006.supports(Unit::RawCount));
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("brf".parse::<Unit>().unwrap(), Unit::Reflectance);
        assert_eq!("BT".parse::<Unit>().unwrap(), Unit::BrightnessTemperature);
        assert_eq!("Radiance".parse::<Unit>().unwrap(), Unit::Radiance);
        assert_eq!("CNT".parse::<Unit>().unwrap(), Unit::RawCount);
        assert!("kelvin".parse::<Unit>().is_err());
    }

    #[test]
    fn test_region_from_mode() {
        let region = RegionSpec::from_mode(RegionMode::PixelRange, [1899.0, 2199.0, 1700.0, 2299.0]).unwrap();
        match region {
            RegionSpec::PixelRange(rect) => {
                assert_eq!(rect.n_lines(), 301);
                assert_eq!(rect.n_columns(), 600);
            }
            _ => panic!("expected pixel range"),
        }

        assert!(RegionSpec::from_mode(RegionMode::PixelRange, [-1.0, 10.0, 0.0, 10.0]).is_err());
        assert!(RegionSpec::from_mode(RegionMode::PixelRange, [0.5, 10.0, 0.0, 10.0]).is_err());
        assert!(RegionSpec::from_mode(RegionMode::GeographicBox, [f64::NAN, 1.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn test_satellite_ids() {
        assert_eq!(Satellite::from_id(323).unwrap(), Satellite::Msg3);
        assert_eq!(Satellite::Msg4.id(), 324);
        assert!(matches!(Satellite::from_id(55), Err(SeviriError::Format(_))));
    }

    #[test]
    fn test_error_kind() {
        let err = SeviriError::ChannelUnitMismatch {
            channel: ChannelId::IR_108,
            unit: Unit::Reflectance,
        };
        assert_eq!(err.kind(), ErrorKind::ChannelUnitMismatch);
        assert!(err.to_string().contains("IR_108"));
    }
}
