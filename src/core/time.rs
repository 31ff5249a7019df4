//! Time representations used by the native format and the output grids.
//!
//! Header times are CCSDS day segmented (CDS) values: days since 1958-01-01
//! plus milliseconds of day. Output times are Julian Days.

use crate::types::{SeviriError, SeviriResult};
use chrono::{DateTime, TimeZone, Utc};

/// Julian Day of 1958-01-01T00:00:00Z
pub const CDS_EPOCH_JD: f64 = 2436204.5;

/// Julian Day of 1970-01-01T00:00:00Z
pub const UNIX_EPOCH_JD: f64 = 2440587.5;

/// Julian Day of J2000.0 (2000-01-01T12:00:00 TT, treated as UTC)
pub const J2000_JD: f64 = 2451545.0;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Days between the CDS epoch and the Unix epoch
const CDS_TO_UNIX_DAYS: i64 = 4383;

/// CDS short time code: 16-bit day count and 32-bit millisecond of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CdsTime {
    pub days: u16,
    pub millis: u32,
}

impl CdsTime {
    pub const SIZE: usize = 6;

    pub fn new(days: u16, millis: u32) -> Self {
        Self { days, millis }
    }

    /// Decode from the 6-byte big-endian representation
    pub fn from_be_bytes(bytes: [u8; 6]) -> Self {
        Self {
            days: u16::from_be_bytes([bytes[0], bytes[1]]),
            millis: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }

    pub fn to_be_bytes(self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out[..2].copy_from_slice(&self.days.to_be_bytes());
        out[2..].copy_from_slice(&self.millis.to_be_bytes());
        out
    }

    /// Unset time fields are all zero in the headers
    pub fn is_zero(self) -> bool {
        self.days == 0 && self.millis == 0
    }

    pub fn julian_day(self) -> f64 {
        CDS_EPOCH_JD + self.days as f64 + self.millis as f64 / MILLIS_PER_DAY as f64
    }

    pub fn to_datetime(self) -> SeviriResult<DateTime<Utc>> {
        let unix_millis =
            (self.days as i64 - CDS_TO_UNIX_DAYS) * MILLIS_PER_DAY + self.millis as i64;
        Utc.timestamp_millis_opt(unix_millis).single().ok_or_else(|| {
            SeviriError::Format(format!("unrepresentable CDS time {:?}", self))
        })
    }

    pub fn from_datetime(time: &DateTime<Utc>) -> SeviriResult<Self> {
        let cds_millis = time.timestamp_millis() + CDS_TO_UNIX_DAYS * MILLIS_PER_DAY;
        let days = cds_millis.div_euclid(MILLIS_PER_DAY);
        if !(0..=u16::MAX as i64).contains(&days) {
            return Err(SeviriError::Argument(format!(
                "{} is outside the CDS time range",
                time
            )));
        }
        Ok(Self {
            days: days as u16,
            millis: cds_millis.rem_euclid(MILLIS_PER_DAY) as u32,
        })
    }
}

/// Julian Day of a UTC instant
pub fn julian_day(time: &DateTime<Utc>) -> f64 {
    UNIX_EPOCH_JD + time.timestamp_millis() as f64 / MILLIS_PER_DAY as f64
}

/// UTC instant of a Julian Day, millisecond resolution
pub fn datetime_from_julian_day(jd: f64) -> Option<DateTime<Utc>> {
    if !jd.is_finite() {
        return None;
    }
    let millis = ((jd - UNIX_EPOCH_JD) * MILLIS_PER_DAY as f64).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cds_epoch() {
        let epoch = CdsTime::new(0, 0);
        assert_abs_diff_eq!(epoch.julian_day(), CDS_EPOCH_JD);
        let dt = epoch.to_datetime().unwrap();
        assert_eq!(dt.to_rfc3339(), "1958-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_cds_datetime_round_trip() {
        let dt = Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap();
        let cds = CdsTime::from_datetime(&dt).unwrap();
        assert_eq!(cds.millis, 12 * 3_600_000);
        assert_eq!(cds.to_datetime().unwrap(), dt);

        let bytes = cds.to_be_bytes();
        assert_eq!(CdsTime::from_be_bytes(bytes), cds);
    }

    #[test]
    fn test_julian_day_reference_points() {
        let j2000 = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert_abs_diff_eq!(julian_day(&j2000), J2000_JD, epsilon = 1e-9);

        let cds = CdsTime::from_datetime(&j2000).unwrap();
        assert_abs_diff_eq!(cds.julian_day(), J2000_JD, epsilon = 1e-9);

        let back = datetime_from_julian_day(J2000_JD).unwrap();
        assert_eq!(back, j2000);
    }

    #[test]
    fn test_cds_out_of_range() {
        let before_epoch = Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).unwrap();
        assert!(CdsTime::from_datetime(&before_epoch).is_err());
    }
}
