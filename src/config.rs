//! Versioned, read-only sensor configuration.
//!
//! Holds the navigation constants of the SEVIRI reference grid and the
//! per-satellite spectral constants used by calibration. The built-in tables
//! are created once per process and handed out as `Arc<SensorConfig>`;
//! alternative tables can be loaded from JSON.

use crate::types::{ChannelId, ChannelKind, Satellite, SeviriError, SeviriResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

pub const BUILTIN_CONFIG_VERSION: &str = "seviri-msg1-4/2024.1";

/// Scan geometry of the VIS/IR reference grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationParams {
    /// Column scaling factor (CFAC)
    pub cfac: f64,
    /// Line scaling factor (LFAC)
    pub lfac: f64,
    /// Column offset (COFF)
    pub coff: f64,
    /// Line offset (LOFF)
    pub loff: f64,
    /// Distance from Earth centre to satellite in km
    pub satellite_distance: f64,
    /// Earth equatorial radius in km
    pub equatorial_radius: f64,
    /// Earth polar radius in km
    pub polar_radius: f64,
}

impl Default for NavigationParams {
    fn default() -> Self {
        Self {
            cfac: -781648343.0,
            lfac: -781648343.0,
            coff: 1856.0,
            loff: 1856.0,
            satellite_distance: 42164.0,
            equatorial_radius: 6378.169,
            polar_radius: 6356.5838,
        }
    }
}

/// Band constants for the radiance to brightness temperature conversion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalConstants {
    /// Central wavenumber in cm-1
    pub nu_c: f64,
    /// Band correction slope
    pub a: f64,
    /// Band correction offset in K
    pub b: f64,
}

/// Spectral constants of one satellite, keyed by 1-based channel number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteConstants {
    pub satellite: Satellite,
    /// Band solar irradiance, mW m-2 (cm-1)-1
    pub solar_irradiance: BTreeMap<u8, f64>,
    pub thermal: BTreeMap<u8, ThermalConstants>,
}

impl SatelliteConstants {
    pub fn solar_irradiance(&self, channel: ChannelId) -> Option<f64> {
        self.solar_irradiance.get(&channel.number()).copied()
    }

    pub fn thermal(&self, channel: ChannelId) -> Option<ThermalConstants> {
        self.thermal.get(&channel.number()).copied()
    }
}

/// Linear radiance correction towards a reference instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntercalEntry {
    pub satellite: Satellite,
    pub channel: u8,
    pub valid_from: DateTime<Utc>,
    /// Open ended when absent
    pub valid_until: Option<DateTime<Utc>>,
    pub gain: f64,
    pub offset: f64,
}

impl IntercalEntry {
    pub fn covers(&self, time: &DateTime<Utc>) -> bool {
        *time >= self.valid_from && self.valid_until.map_or(true, |until| *time < until)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub version: String,
    #[serde(default)]
    pub navigation: NavigationParams,
    pub satellites: Vec<SatelliteConstants>,
    #[serde(default)]
    pub intercal: Vec<IntercalEntry>,
}

static BUILTIN: OnceLock<Arc<SensorConfig>> = OnceLock::new();

impl SensorConfig {
    /// Shared instance of the built-in tables
    pub fn builtin() -> Arc<SensorConfig> {
        BUILTIN
            .get_or_init(|| {
                log::debug!("Loading built-in sensor configuration {}", BUILTIN_CONFIG_VERSION);
                Arc::new(builtin_tables())
            })
            .clone()
    }

    pub fn from_json_str(json: &str) -> SeviriResult<Self> {
        let config: SensorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SeviriResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        log::info!(
            "Loaded sensor configuration {} from {}",
            config.version,
            path.as_ref().display()
        );
        Ok(config)
    }

    pub fn to_json(&self) -> SeviriResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn satellite(&self, satellite: Satellite) -> SeviriResult<&SatelliteConstants> {
        self.satellites
            .iter()
            .find(|s| s.satellite == satellite)
            .ok_or_else(|| {
                SeviriError::Config(format!(
                    "no spectral constants for {} in configuration {}",
                    satellite, self.version
                ))
            })
    }

    /// Inter-calibration entry valid for the channel at `time`
    pub fn intercal_for(
        &self,
        satellite: Satellite,
        channel: ChannelId,
        time: &DateTime<Utc>,
    ) -> Option<&IntercalEntry> {
        self.intercal.iter().find(|entry| {
            entry.satellite == satellite && entry.channel == channel.number() && entry.covers(time)
        })
    }

    fn validate(&self) -> SeviriResult<()> {
        let nav = &self.navigation;
        if nav.cfac == 0.0 || nav.lfac == 0.0 {
            return Err(SeviriError::Config("scaling factors must be non-zero".to_string()));
        }
        if nav.polar_radius <= 0.0 || nav.equatorial_radius < nav.polar_radius {
            return Err(SeviriError::Config(format!(
                "invalid ellipsoid: a = {}, b = {}",
                nav.equatorial_radius, nav.polar_radius
            )));
        }
        if nav.satellite_distance <= nav.equatorial_radius {
            return Err(SeviriError::Config(
                "satellite distance must exceed the equatorial radius".to_string(),
            ));
        }

        for constants in &self.satellites {
            for (&channel, &irradiance) in &constants.solar_irradiance {
                let id = ChannelId::new(channel).map_err(|e| SeviriError::Config(e.to_string()))?;
                if id.kind() == ChannelKind::Thermal || irradiance <= 0.0 {
                    return Err(SeviriError::Config(format!(
                        "invalid solar irradiance for {} channel {}",
                        constants.satellite, channel
                    )));
                }
            }
            for (&channel, thermal) in &constants.thermal {
                let id = ChannelId::new(channel).map_err(|e| SeviriError::Config(e.to_string()))?;
                if id.kind() != ChannelKind::Thermal || thermal.nu_c <= 0.0 || thermal.a == 0.0 {
                    return Err(SeviriError::Config(format!(
                        "invalid thermal constants for {} channel {}",
                        constants.satellite, channel
                    )));
                }
            }
        }

        for entry in &self.intercal {
            ChannelId::new(entry.channel).map_err(|e| SeviriError::Config(e.to_string()))?;
            if entry.valid_until.map_or(false, |until| until <= entry.valid_from) {
                return Err(SeviriError::Config(format!(
                    "empty validity window for {} channel {}",
                    entry.satellite, entry.channel
                )));
            }
        }
        Ok(())
    }
}

// Solar irradiance for channels 1, 2, 3 and 12
const SOLAR_IRRADIANCE: [(Satellite, [f64; 4]); 4] = [
    (Satellite::Msg1, [65.2296, 73.0127, 62.3715, 78.7599]),
    (Satellite::Msg2, [65.2065, 73.1869, 61.9923, 79.0113]),
    (Satellite::Msg3, [65.5148, 73.1807, 62.0208, 78.9416]),
    (Satellite::Msg4, [65.2656, 73.1692, 61.9416, 79.0035]),
];

// (nu_c, A, B) for channels 4..=11
const THERMAL: [(Satellite, [(f64, f64, f64); 8]); 4] = [
    (
        Satellite::Msg1,
        [
            (2569.094, 0.9959, 3.471),
            (1598.566, 0.9963, 2.219),
            (1362.142, 0.9991, 0.485),
            (1149.083, 0.9996, 0.181),
            (1034.345, 0.9999, 0.060),
            (930.659, 0.9983, 0.627),
            (839.661, 0.9988, 0.397),
            (752.381, 0.9981, 0.576),
        ],
    ),
    (
        Satellite::Msg2,
        [
            (2568.832, 0.9954, 3.438),
            (1600.548, 0.9963, 2.185),
            (1360.330, 0.9991, 0.470),
            (1148.620, 0.9996, 0.179),
            (1035.289, 0.9999, 0.056),
            (931.700, 0.9983, 0.640),
            (836.445, 0.9988, 0.408),
            (751.792, 0.9981, 0.561),
        ],
    ),
    (
        Satellite::Msg3,
        [
            (2547.771, 0.9915, 2.9002),
            (1595.621, 0.9960, 2.0337),
            (1360.337, 0.9991, 0.4340),
            (1148.130, 0.9996, 0.1714),
            (1034.715, 0.9999, 0.0527),
            (929.842, 0.9983, 0.6084),
            (838.659, 0.9988, 0.3882),
            (750.653, 0.9982, 0.5390),
        ],
    ),
    (
        Satellite::Msg4,
        [
            (2555.280, 0.9916, 2.9438),
            (1596.080, 0.9959, 2.0780),
            (1361.748, 0.9990, 0.4929),
            (1147.433, 0.9996, 0.1731),
            (1034.851, 0.9998, 0.0597),
            (931.122, 0.9983, 0.6256),
            (839.113, 0.9988, 0.4002),
            (748.585, 0.9981, 0.5635),
        ],
    ),
];

fn builtin_tables() -> SensorConfig {
    let mut satellites = Vec::with_capacity(SOLAR_IRRADIANCE.len());
    for (satellite, irradiance) in SOLAR_IRRADIANCE {
        let solar_irradiance: BTreeMap<u8, f64> =
            [1u8, 2, 3, 12].into_iter().zip(irradiance).collect();
        let thermal: BTreeMap<u8, ThermalConstants> = THERMAL
            .iter()
            .find(|(s, _)| *s == satellite)
            .map(|(_, table)| {
                (4u8..=11)
                    .zip(table.iter())
                    .map(|(channel, &(nu_c, a, b))| (channel, ThermalConstants { nu_c, a, b }))
                    .collect()
            })
            .unwrap_or_default();
        satellites.push(SatelliteConstants { satellite, solar_irradiance, thermal });
    }

    SensorConfig {
        version: BUILTIN_CONFIG_VERSION.to_string(),
        navigation: NavigationParams::default(),
        satellites,
        // No coefficients ship with the crate; load them from a JSON config
        intercal: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builtin_tables() {
        let config = SensorConfig::builtin();
        assert_eq!(config.version, BUILTIN_CONFIG_VERSION);
        assert_eq!(config.satellites.len(), 4);
        assert!(config.validate().is_ok());

        let msg2 = config.satellite(Satellite::Msg2).unwrap();
        assert_eq!(msg2.solar_irradiance(ChannelId::VIS006), Some(65.2065));
        assert_eq!(msg2.solar_irradiance(ChannelId::IR_108), None);
        let ir108 = msg2.thermal(ChannelId::IR_108).unwrap();
        assert_eq!(ir108.nu_c, 931.700);
        assert_eq!(ir108.b, 0.640);
    }

    #[test]
    fn test_builtin_is_shared() {
        let a = SensorConfig::builtin();
        let b = SensorConfig::builtin();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_builtin_has_no_intercal() {
        let config = SensorConfig::builtin();
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(config.intercal.is_empty());
        assert!(config.intercal_for(Satellite::Msg4, ChannelId::IR_108, &now).is_none());
    }

    #[test]
    fn test_intercal_validity_window() {
        let mut config = (*SensorConfig::builtin()).clone();
        config.intercal.push(IntercalEntry {
            satellite: Satellite::Msg4,
            channel: 9,
            valid_from: Utc.with_ymd_and_hms(2015, 7, 15, 0, 0, 0).unwrap(),
            valid_until: Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()),
            gain: 0.9998,
            offset: 0.0254,
        });
        let config = SensorConfig::from_json_str(&config.to_json().unwrap()).unwrap();

        let before = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let inside = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();

        assert!(config.intercal_for(Satellite::Msg4, ChannelId::IR_108, &before).is_none());
        assert!(config.intercal_for(Satellite::Msg4, ChannelId::IR_108, &after).is_none());
        let entry = config.intercal_for(Satellite::Msg4, ChannelId::IR_108, &inside).unwrap();
        assert_eq!(entry.gain, 0.9998);
        assert!(config.intercal_for(Satellite::Msg3, ChannelId::IR_108, &inside).is_none());
        assert!(config.intercal_for(Satellite::Msg4, ChannelId::IR_120, &inside).is_none());
    }

    #[test]
    fn test_navigation_defaults_from_partial_json() {
        let json = r#"{ "version": "nav-only", "satellites": [] }"#;
        let config = SensorConfig::from_json_str(json).unwrap();
        assert_eq!(config.navigation, NavigationParams::default());
        assert!(config.intercal.is_empty());

        let json = r#"{ "version": "grid", "satellites": [], "navigation": { "cfac": -781648343.0, "lfac": -781648343.0,
            "coff": 1856.0, "loff": 1856.0, "satellite_distance": 42164.0, "equatorial_radius": 6378.169,
            "polar_radius": 6356.5838 } }"#;
        assert!(SensorConfig::from_json_str(json).is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = SensorConfig::builtin();
        let json = config.to_json().unwrap();
        let parsed = SensorConfig::from_json_str(&json).unwrap();
        assert_eq!(&parsed, config.as_ref());
    }

    #[test]
    fn test_invalid_json_config() {
        assert!(matches!(
            SensorConfig::from_json_str("{ not json"),
            Err(SeviriError::Config(_))
        ));

        let mut config = (*SensorConfig::builtin()).clone();
        config.navigation.polar_radius = 7000.0;
        let json = config.to_json().unwrap();
        assert!(SensorConfig::from_json_str(&json).is_err());
    }
}
