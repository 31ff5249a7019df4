//! seviri-preproc: SEVIRI Level 1.5 preprocessing
//!
//! Reads MSG/SEVIRI native files and produces calibrated reflectance or
//! brightness temperature for a sub-region of the full disk, together with
//! per-pixel geolocation, solar and viewing geometry and acquisition time.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BandRequest, ChannelId, ChannelKind, ErrorKind, PixelRect, RegionMode, RegionSpec, Satellite,
    SeviriError, SeviriResult, Unit, FILL_VALUE,
};

pub use config::{IntercalEntry, NavigationParams, SensorConfig};
pub use io::{NativeReader, NativeWriter, RawImage};
pub use crate::core::{preprocess, PipelineState, PreprocessRequest, PreprocessedProduct, Preprocessor};
