//! JPEG 2000 (Part 1) decoder for raw codestreams and JP2 files.
//!
//! ```no_run
//! let data = std::fs::read("image.jp2").unwrap();
//! let image = jpx_rs::decode(&data, &jpx_rs::DecodeOptions::default()).unwrap();
//! let pixels = image.to_interleaved_u8().unwrap();
//! assert_eq!(pixels.len(), (image.width * image.height) as usize * image.components.len());
//! ```

pub mod error;
pub mod grib2;
pub mod jpeg2000;
pub mod jpeg_marker_code;
pub mod jpeg_stream_reader;

pub use error::{ErrorKind, J2kError};
pub use jpeg2000::decoder::{DecodedImage, DecodedTile, J2kDecoder};
pub use jpeg2000::image::J2kComponentInfo;
pub use jpeg2000::jp2::Jp2Colorspace;
pub use jpeg2000::limits::DecodeOptions;
pub use jpeg2000::parser::J2kCodestreamHeader;

/// Decodes a raw codestream or JP2 file held in memory.
pub fn decode(data: &[u8], options: &DecodeOptions) -> Result<DecodedImage, J2kError> {
    J2kDecoder::new(data, options.clone()).decode()
}
