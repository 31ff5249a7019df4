//! Core SEVIRI processing modules

pub mod time;
pub mod navigation;
pub mod geometry;
pub mod region;
pub mod calibrate;
pub mod preprocess;

// Re-export main types
pub use time::{CdsTime, julian_day};
pub use navigation::{Geolocation, GeolocationEngine};
pub use geometry::{AngleGrids, GeometryEngine, OrbitPolynomial, SunEphemeris, ViewingGeometry};
pub use region::{RegionResolver, RegionSearchParams};
pub use calibrate::{CalibrationCoefficients, CalibrationProcessor, CalibrationTable};
pub use preprocess::{preprocess, PipelineState, PixelSample, PreprocessRequest, PreprocessedProduct, Preprocessor};
