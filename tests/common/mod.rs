//! Synthetic native files shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::Array2;
use seviri_preproc::core::geometry::OrbitPolynomial;
use seviri_preproc::core::time::CdsTime;
use seviri_preproc::io::native::{NativeImage, NativeWriter, RadiometricCalibration};
use seviri_preproc::{ChannelId, PixelRect, Satellite};
use std::path::{Path, PathBuf};

/// Stored rectangle: lines 1890..=2210, columns 1681..=2320 (1-based)
pub const SELECTED: PixelRect = PixelRect {
    first_line: 1889,
    last_line: 2209,
    first_column: 1680,
    last_column: 2319,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn noon_scan() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap()
}

pub fn midnight_scan() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 15, 0, 0, 0).unwrap()
}

/// Orbit record holding the satellite fixed above (0, 0) around `start`
pub fn stationary_orbit(start: DateTime<Utc>) -> OrbitPolynomial {
    let mut x = [0.0; 8];
    x[0] = 2.0 * 42164.0;
    OrbitPolynomial {
        start: CdsTime::from_datetime(&(start - Duration::hours(3))).unwrap(),
        end: CdsTime::from_datetime(&(start + Duration::hours(3))).unwrap(),
        x,
        y: [0.0; 8],
        z: [0.0; 8],
    }
}

/// Channels 1, 3, 7 and 9 over `SELECTED` with plausible slopes and counts
pub fn synthetic_image(satellite: Satellite, scan_start: DateTime<Utc>) -> NativeImage {
    let start = CdsTime::from_datetime(&scan_start).unwrap();
    let end = CdsTime::from_datetime(&(scan_start + Duration::seconds(12 * 60 + 30))).unwrap();
    let mut image = NativeImage::new(satellite, start, end, SELECTED);
    image.orbit.push(stationary_orbit(scan_start));

    let bands: [(ChannelId, f64, f64, u16); 4] = [
        (ChannelId::VIS006, 0.023, -1.17, 500),
        (ChannelId::IR_016, 0.009, -0.45, 400),
        (ChannelId::IR_087, 0.12, -6.12, 463),
        (ChannelId::IR_108, 0.2, -10.2, 457),
    ];
    for (channel, slope, offset, base) in bands {
        image.calibration[channel.index()] = RadiometricCalibration { slope, offset };
        image.counts.insert(
            channel,
            Array2::from_shape_fn(SELECTED.dim(), |(i, j)| base + ((i * 7 + j * 3) % 40) as u16),
        );
    }
    image
}

pub fn write_image(dir: &Path, name: &str, image: &NativeImage) -> PathBuf {
    let path = dir.join(name);
    NativeWriter::write(&path, image).expect("Failed to write synthetic native file");
    path
}

pub fn write_noon_file(dir: &Path) -> PathBuf {
    write_image(
        dir,
        "MSG3-SEVI-MSG15-0100-NA-20230615121243.nat",
        &synthetic_image(Satellite::Msg3, noon_scan()),
    )
}
