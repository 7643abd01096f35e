//! GRIB2 data template 7.40: grid point values stored as a JPEG 2000
//! codestream.
//!
//! The codestream holds the packed integers of one row of grid points;
//! unpacking applies the data representation section's linear rescaling.

use crate::error::J2kError;
use crate::jpeg2000::decoder::J2kDecoder;
use crate::jpeg2000::limits::DecodeOptions;

/// Rescaling parameters from the data representation section (template 5.40).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grib2Packing {
    /// R: reference value.
    pub reference_value: f64,
    /// E: binary scale factor.
    pub binary_scale_factor: i32,
    /// D: decimal scale factor.
    pub decimal_scale_factor: i32,
    /// Bits per packed value; 0 means every point equals R.
    pub bits_per_value: u8,
    /// Number of grid points described by the section.
    pub number_of_points: usize,
}

impl Grib2Packing {
    fn value(&self, packed: i32) -> f64 {
        let binary = 2f64.powi(self.binary_scale_factor);
        let decimal = 10f64.powi(self.decimal_scale_factor);
        (self.reference_value + packed as f64 * binary) / decimal
    }
}

/// Decodes `data` and returns one value per grid point. With a `bitmap`
/// (bit `i % 8` of byte `i / 8`), points whose bit is clear are missing and
/// come back as `f64::NEG_INFINITY`.
pub fn unpack_jpeg2000(
    data: &[u8],
    packing: &Grib2Packing,
    bitmap: Option<&[u8]>,
    options: &DecodeOptions,
) -> Result<Vec<f64>, J2kError> {
    if packing.bits_per_value == 0 {
        return Ok(vec![packing.reference_value; packing.number_of_points]);
    }

    let image = J2kDecoder::new(data, options.clone()).decode()?;
    if image.components.len() != 1 {
        return Err(J2kError::UnsupportedFeature(format!(
            "GRIB2 codestream with {} components",
            image.components.len()
        )));
    }
    let tile = match image.tiles.as_slice() {
        [tile] => tile,
        tiles => {
            return Err(J2kError::UnsupportedFeature(format!(
                "GRIB2 codestream with {} tiles",
                tiles.len()
            )));
        }
    };
    if tile.height != 1 {
        return Err(J2kError::UnsupportedFeature(format!(
            "GRIB2 codestream with {} rows",
            tile.height
        )));
    }
    let samples = &tile.planes[0];

    match bitmap {
        Some(bitmap) => (0..packing.number_of_points)
            .map(|i| {
                let present = bitmap.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0);
                if !present {
                    return Ok(f64::NEG_INFINITY);
                }
                samples
                    .get(i)
                    .map(|&packed| packing.value(packed))
                    .ok_or(J2kError::NeedMoreData)
            })
            .collect(),
        None => Ok(samples.iter().map(|&packed| packing.value(packed)).collect()),
    }
}
