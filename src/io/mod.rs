//! Readers and writers for SEVIRI file formats

pub mod native;

pub use native::{read_native, NativeImage, NativeReader, NativeWriter, RawImage};
