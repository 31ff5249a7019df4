use crate::config::{SensorConfig, ThermalConstants};
use crate::io::native::RawImage;
use crate::types::{ChannelId, Satellite, SeviriError, SeviriResult, Unit, FILL_VALUE};
use ndarray::{Array2, Zip};
use std::collections::BTreeMap;
use std::sync::Arc;

/// First radiation constant, mW m-2 sr-1 (cm-1)-4
pub const C1: f64 = 1.19104e-5;
/// Second radiation constant, K cm
pub const C2: f64 = 1.43877;

/// Linear radiance adjustment towards a reference instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntercalCorrection {
    pub gain: f64,
    pub offset: f64,
}

/// Everything needed to calibrate one channel of one file
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCoefficients {
    pub channel: ChannelId,
    /// Radiance per count
    pub slope: f64,
    /// Radiance at count zero
    pub offset: f64,
    /// Band solar irradiance, reflective channels only
    pub solar_irradiance: Option<f64>,
    /// Planck constants, thermal channels only
    pub thermal: Option<ThermalConstants>,
    /// Present when inter-calibration was requested
    pub intercal: Option<IntercalCorrection>,
}

impl CalibrationCoefficients {
    /// Radiance of a count, `None` for missing data (count 0)
    pub fn radiance(&self, count: u16) -> Option<f64> {
        if count == 0 {
            return None;
        }
        let radiance = self.slope * count as f64 + self.offset;
        Some(match self.intercal {
            Some(ic) => ic.gain * radiance + ic.offset,
            None => radiance,
        })
    }

    /// Bidirectional reflectance factor; `None` in darkness (sza >= 90)
    pub fn reflectance(&self, radiance: f64, sza_deg: f64, earth_sun_distance: f64) -> Option<f64> {
        let irradiance = self.solar_irradiance?;
        if !(0.0..90.0).contains(&sza_deg) {
            return None;
        }
        let cos_sza = sza_deg.to_radians().cos();
        Some(std::f64::consts::PI * radiance * earth_sun_distance * earth_sun_distance
            / (irradiance * cos_sza))
    }

    /// Brightness temperature in K; `None` for non-positive radiance
    pub fn brightness_temperature(&self, radiance: f64) -> Option<f64> {
        let ThermalConstants { nu_c, a, b } = self.thermal?;
        if radiance <= 0.0 {
            return None;
        }
        let t_eff = C2 * nu_c / (1.0 + C1 * nu_c.powi(3) / radiance).ln();
        let bt = (t_eff - b) / a;
        bt.is_finite().then_some(bt)
    }
}

/// Radiance of a black body at `temperature` K seen through a band
pub fn planck_radiance(constants: &ThermalConstants, temperature: f64) -> f64 {
    let t_eff = constants.a * temperature + constants.b;
    C1 * constants.nu_c.powi(3) / ((C2 * constants.nu_c / t_eff).exp() - 1.0)
}

/// Coefficients for the channels of one file, built once and shared
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    pub satellite: Satellite,
    pub config_version: String,
    coefficients: BTreeMap<ChannelId, CalibrationCoefficients>,
}

impl CalibrationTable {
    /// Combine the file slope/offset with the configured spectral constants.
    /// Inter-calibration entries must cover the scan start time.
    pub fn build(
        raw: &RawImage,
        config: &SensorConfig,
        channels: &[ChannelId],
        apply_intercal: bool,
    ) -> SeviriResult<Self> {
        let satellite = raw.satellite();
        let constants = config.satellite(satellite)?;
        let scan_start = raw.scan_window().start;

        let mut coefficients = BTreeMap::new();
        for &channel in channels {
            if coefficients.contains_key(&channel) {
                continue;
            }
            let file_cal = raw.calibration(channel);
            let intercal = if apply_intercal {
                let entry = config.intercal_for(satellite, channel, &scan_start).ok_or_else(|| {
                    SeviriError::Argument(format!(
                        "no inter-calibration coefficients for {} channel {} at {}",
                        satellite, channel, scan_start
                    ))
                })?;
                Some(IntercalCorrection { gain: entry.gain, offset: entry.offset })
            } else {
                None
            };

            log::debug!(
                "Channel {}: slope {:.6}, offset {:.6}, intercal {:?}",
                channel,
                file_cal.slope,
                file_cal.offset,
                intercal
            );

            coefficients.insert(
                channel,
                CalibrationCoefficients {
                    channel,
                    slope: file_cal.slope,
                    offset: file_cal.offset,
                    solar_irradiance: constants.solar_irradiance(channel),
                    thermal: constants.thermal(channel),
                    intercal,
                },
            );
        }

        Ok(Self {
            satellite,
            config_version: config.version.clone(),
            coefficients,
        })
    }

    pub fn get(&self, channel: ChannelId) -> SeviriResult<&CalibrationCoefficients> {
        self.coefficients.get(&channel).ok_or_else(|| {
            SeviriError::Argument(format!("channel {} has no calibration coefficients", channel))
        })
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.coefficients.keys().copied()
    }
}

/// Reject physically meaningless channel/unit pairs
pub fn check_unit(channel: ChannelId, unit: Unit) -> SeviriResult<()> {
    if channel.supports(unit) {
        Ok(())
    } else {
        Err(SeviriError::ChannelUnitMismatch { channel, unit })
    }
}

/// Radiometric calibration processor
pub struct CalibrationProcessor {
    table: Arc<CalibrationTable>,
    earth_sun_distance: f64,
}

impl CalibrationProcessor {
    /// `earth_sun_distance` in AU at the scan time
    pub fn new(table: Arc<CalibrationTable>, earth_sun_distance: f64) -> Self {
        Self { table, earth_sun_distance }
    }

    pub fn table(&self) -> &Arc<CalibrationTable> {
        &self.table
    }

    /// Calibrate counts of one channel. `sza` is only read for reflectance.
    pub fn calibrate(
        &self,
        counts: &Array2<u16>,
        channel: ChannelId,
        unit: Unit,
        sza: &Array2<f32>,
    ) -> SeviriResult<Array2<f32>> {
        log::info!("Applying radiometric calibration: channel {} -> {}", channel, unit);
        check_unit(channel, unit)?;
        if counts.dim() != sza.dim() {
            return Err(SeviriError::Argument(format!(
                "count grid {:?} does not match angle grid {:?}",
                counts.dim(),
                sza.dim()
            )));
        }

        let coefficients = self.table.get(channel)?;
        match unit {
            Unit::Reflectance if coefficients.solar_irradiance.is_none() => {
                return Err(SeviriError::Config(format!(
                    "no solar irradiance for {} channel {}",
                    self.table.satellite, channel
                )));
            }
            Unit::BrightnessTemperature if coefficients.thermal.is_none() => {
                return Err(SeviriError::Config(format!(
                    "no thermal constants for {} channel {}",
                    self.table.satellite, channel
                )));
            }
            _ => {}
        }

        let distance = self.earth_sun_distance;
        let convert = |&count: &u16, &sza: &f32| -> f32 {
            let value = match unit {
                Unit::RawCount => (count != 0).then_some(count as f64),
                Unit::Radiance => coefficients.radiance(count),
                Unit::Reflectance => coefficients
                    .radiance(count)
                    .and_then(|r| coefficients.reflectance(r, sza as f64, distance)),
                Unit::BrightnessTemperature => coefficients
                    .radiance(count)
                    .and_then(|r| coefficients.brightness_temperature(r)),
            };
            value.map_or(FILL_VALUE, |v| v as f32)
        };

        #[cfg(feature = "parallel")]
        let calibrated = Zip::from(counts).and(sza).par_map_collect(convert);
        #[cfg(not(feature = "parallel"))]
        let calibrated = Zip::from(counts).and(sza).map_collect(convert);

        let valid: Vec<f32> = calibrated.iter().copied().filter(|&v| v != FILL_VALUE).collect();
        if valid.is_empty() {
            log::warn!("Channel {} has no valid {} values in the region", channel, unit);
        } else {
            log::debug!(
                "Calibration completed. {} valid values, range {:.3} to {:.3}",
                valid.len(),
                valid.iter().cloned().fold(f32::INFINITY, f32::min),
                valid.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
            );
        }

        Ok(calibrated)
    }
}
