//! Scalar dequantization (ISO/IEC 15444-1 Annex E).

use super::image::{J2kQuantization, SubbandOrientation};
use crate::error::J2kError;

/// Reconstruction parameters of one subband.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dequantizer {
    /// Step size Δb, 1 for reversible data.
    pub delta: f64,
    /// Mb: magnitude bit-planes of the subband.
    pub mb: u32,
    pub reversible: bool,
}

impl Dequantizer {
    /// Parameters of the `band`-th subband (counted over all resolutions) of
    /// resolution `resolution`. Derived quantization scales the single
    /// signalled exponent by the level (E-5).
    pub fn for_subband(
        quantization: &J2kQuantization,
        precision: u8,
        reversible: bool,
        resolution: usize,
        band: usize,
        orientation: SubbandOrientation,
    ) -> Result<Self, J2kError> {
        let (exponent, mantissa) = if quantization.is_expounded() {
            let step = quantization.step_sizes.get(band).ok_or_else(|| {
                J2kError::InvalidData(format!("No step size for subband {}", band))
            })?;
            (step.exponent as i32, step.mantissa)
        } else {
            let step = quantization
                .step_sizes
                .first()
                .ok_or_else(|| J2kError::InvalidData("No derived step size".to_string()))?;
            let level_adjust = if resolution > 0 {
                1 - resolution as i32
            } else {
                0
            };
            (step.exponent as i32 + level_adjust, step.mantissa)
        };

        let delta = if reversible {
            1.0
        } else {
            let range = precision as i32 + orientation.gain_log2();
            2f64.powi(range - exponent) * (1.0 + mantissa as f64 / 2048.0)
        };
        let mb = (quantization.guard_bits as i32 + exponent - 1).max(0) as u32;
        Ok(Self {
            delta,
            mb,
            reversible,
        })
    }

    /// Coefficient value of a decoded magnitude. `bits_decoded` counts the
    /// bit-planes known, zero bit-planes included; missing planes are
    /// restored by scaling.
    pub fn apply(&self, magnitude: u32, negative: bool, bits_decoded: u32) -> f64 {
        let correction = if self.reversible { 0.0 } else { 0.5 };
        let mut n = (magnitude as f64 + correction) * self.delta;
        if negative {
            n = -n;
        }
        if self.reversible && bits_decoded >= self.mb {
            n
        } else {
            n * 2f64.powi(self.mb.saturating_sub(bits_decoded) as i32)
        }
    }

    /// Highest number of coding passes a code-block of this subband can carry.
    pub fn max_coding_passes(&self, zero_bit_planes: u32) -> u32 {
        match self.mb.checked_sub(zero_bit_planes) {
            Some(planes) if planes > 0 => 1 + 3 * (planes - 1),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::image::{QuantizationStyle, StepSize};

    fn quantization(style: QuantizationStyle, steps: &[(u8, u16)]) -> J2kQuantization {
        J2kQuantization {
            style,
            guard_bits: 2,
            step_sizes: steps
                .iter()
                .map(|&(exponent, mantissa)| StepSize { exponent, mantissa })
                .collect(),
        }
    }

    #[test]
    fn test_reversible_step_is_one() {
        let q = quantization(QuantizationStyle::NoQuantization, &[(8, 0), (9, 0)]);
        let d = Dequantizer::for_subband(&q, 8, true, 1, 1, SubbandOrientation::HL).unwrap();
        assert_eq!(d.delta, 1.0);
        assert_eq!(d.mb, 2 + 9 - 1);
    }

    #[test]
    fn test_expounded_step_size() {
        // 2^(8 + 2 - 10) * (1 + 1024/2048)
        let q = quantization(
            QuantizationStyle::ScalarExpounded,
            &[(8, 0), (9, 0), (9, 0), (10, 1024)],
        );
        let d = Dequantizer::for_subband(&q, 8, false, 1, 3, SubbandOrientation::HH).unwrap();
        assert_eq!(d.delta, 1.5);
        assert_eq!(d.mb, 11);
    }

    #[test]
    fn test_derived_exponent_per_level() {
        let q = quantization(QuantizationStyle::ScalarDerived, &[(10, 0)]);
        let ll = Dequantizer::for_subband(&q, 8, false, 0, 0, SubbandOrientation::LL).unwrap();
        let r2 = Dequantizer::for_subband(&q, 8, false, 2, 4, SubbandOrientation::HL).unwrap();
        assert_eq!(ll.mb, 11);
        assert_eq!(r2.mb, 10);
        assert_eq!(r2.delta, 2f64.powi(8 + 1 - 9));
    }

    #[test]
    fn test_missing_step_size() {
        let q = quantization(QuantizationStyle::ScalarExpounded, &[(8, 0)]);
        assert!(Dequantizer::for_subband(&q, 8, false, 1, 1, SubbandOrientation::HL).is_err());
    }

    #[test]
    fn test_apply_scales_missing_bit_planes() {
        let reversible = Dequantizer {
            delta: 1.0,
            mb: 8,
            reversible: true,
        };
        assert_eq!(reversible.apply(5, false, 8), 5.0);
        assert_eq!(reversible.apply(5, true, 6), -20.0);

        let irreversible = Dequantizer {
            delta: 2.0,
            mb: 4,
            reversible: false,
        };
        assert_eq!(irreversible.apply(3, false, 4), 7.0);
        assert_eq!(irreversible.apply(3, true, 3), -14.0);
    }

    #[test]
    fn test_max_coding_passes() {
        let d = Dequantizer {
            delta: 1.0,
            mb: 9,
            reversible: true,
        };
        assert_eq!(d.max_coding_passes(0), 25);
        assert_eq!(d.max_coding_passes(8), 1);
        assert_eq!(d.max_coding_passes(9), 0);
    }
}
