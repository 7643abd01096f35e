//! Coefficient bit modeling (ISO/IEC 15444-1 Annex D).
//!
//! A [`BitModel`] holds the per code-block state driven by the three coding
//! passes. Coefficients are visited in stripes of four rows, column by column.

use super::image::SubbandOrientation;
use super::mq_coder::{MqDecoder, pack_context};
use crate::error::J2kError;

const UNIFORM_CONTEXT: usize = 17;
const RUN_LENGTH_CONTEXT: usize = 18;
const CONTEXT_COUNT: usize = 19;

const PROCESSED: u8 = 1;
const FIRST_MAGNITUDE_BIT: u8 = 2;

// Table D.1, indexed by the packed neighbour state 0dddvvhh:
// ddd diagonal count, vv vertical count, hh horizontal count.
static HH_CONTEXT_LABELS: [u8; 75] = [
    0, 1, 2, 0, 1, 2, 2, 0, 2, 2, 2, 0, 0, 0, 0, 0, 3, 4, 5, 0, 4, 5, 5, 0, 5, 5, 5, 0, 0, 0, 0, 0,
    6, 7, 7, 0, 7, 7, 7, 0, 7, 7, 7, 0, 0, 0, 0, 0, 8, 8, 8, 0, 8, 8, 8, 0, 8, 8, 8, 0, 0, 0, 0, 0,
    8, 8, 8, 0, 8, 8, 8, 0, 8, 8, 8,
];
static HL_CONTEXT_LABELS: [u8; 75] = [
    0, 3, 4, 0, 5, 7, 7, 0, 8, 8, 8, 0, 0, 0, 0, 0, 1, 3, 4, 0, 6, 7, 7, 0, 8, 8, 8, 0, 0, 0, 0, 0,
    2, 3, 4, 0, 6, 7, 7, 0, 8, 8, 8, 0, 0, 0, 0, 0, 2, 3, 4, 0, 6, 7, 7, 0, 8, 8, 8, 0, 0, 0, 0, 0,
    2, 3, 4, 0, 6, 7, 7, 0, 8, 8, 8,
];
static LL_LH_CONTEXT_LABELS: [u8; 75] = [
    0, 5, 8, 0, 3, 7, 8, 0, 4, 7, 8, 0, 0, 0, 0, 0, 1, 6, 8, 0, 3, 7, 8, 0, 4, 7, 8, 0, 0, 0, 0, 0,
    2, 6, 8, 0, 3, 7, 8, 0, 4, 7, 8, 0, 0, 0, 0, 0, 2, 6, 8, 0, 3, 7, 8, 0, 4, 7, 8, 0, 0, 0, 0, 0,
    2, 6, 8, 0, 3, 7, 8, 0, 4, 7, 8,
];

fn context_labels(orientation: SubbandOrientation) -> &'static [u8; 75] {
    match orientation {
        SubbandOrientation::HH => &HH_CONTEXT_LABELS,
        SubbandOrientation::HL => &HL_CONTEXT_LABELS,
        SubbandOrientation::LL | SubbandOrientation::LH => &LL_LH_CONTEXT_LABELS,
    }
}

/// Magnitude storage, as narrow as the magnitude bit budget allows.
/// Values wrap like the word they are stored in.
#[derive(Debug, Clone)]
enum Magnitudes {
    Narrow(Vec<u8>),
    Medium(Vec<u16>),
    Wide(Vec<u32>),
}

impl Magnitudes {
    fn new(count: usize, mb: u32) -> Self {
        if mb > 14 {
            Magnitudes::Wide(vec![0; count])
        } else if mb > 6 {
            Magnitudes::Medium(vec![0; count])
        } else {
            Magnitudes::Narrow(vec![0; count])
        }
    }

    fn word_size(mb: u32) -> usize {
        if mb > 14 {
            4
        } else if mb > 6 {
            2
        } else {
            1
        }
    }

    #[inline]
    fn get(&self, index: usize) -> u32 {
        match self {
            Magnitudes::Narrow(v) => v[index] as u32,
            Magnitudes::Medium(v) => v[index] as u32,
            Magnitudes::Wide(v) => v[index],
        }
    }

    #[inline]
    fn set(&mut self, index: usize, value: u32) {
        match self {
            Magnitudes::Narrow(v) => v[index] = value as u8,
            Magnitudes::Medium(v) => v[index] = value as u16,
            Magnitudes::Wide(v) => v[index] = value,
        }
    }
}

/// Code-block decoding state for one MQ-coded segment.
pub struct BitModel<'a> {
    width: usize,
    height: usize,
    labels: &'static [u8; 75],
    neighbors_significance: Vec<u8>,
    signs: Vec<u8>,
    magnitudes: Magnitudes,
    processing_flags: Vec<u8>,
    bits_decoded: Vec<u8>,
    contexts: [u8; CONTEXT_COUNT],
    decoder: MqDecoder<'a>,
}

impl<'a> BitModel<'a> {
    pub fn new(
        width: usize,
        height: usize,
        orientation: SubbandOrientation,
        zero_bit_planes: u32,
        mb: u32,
        decoder: MqDecoder<'a>,
    ) -> Self {
        let count = width * height;
        let mut model = Self {
            width,
            height,
            labels: context_labels(orientation),
            neighbors_significance: vec![0; count],
            signs: vec![0; count],
            magnitudes: Magnitudes::new(count, mb),
            processing_flags: vec![0; count],
            bits_decoded: vec![zero_bit_planes as u8; count],
            contexts: [0; CONTEXT_COUNT],
            decoder,
        };
        model.reset_contexts();
        model
    }

    /// Bytes allocated by [`BitModel::new`] for a block of this size.
    pub fn storage_bytes(width: usize, height: usize, mb: u32) -> u64 {
        let count = (width * height) as u64;
        count * (4 + Magnitudes::word_size(mb) as u64)
    }

    /// Table D.7 initial states.
    pub fn reset_contexts(&mut self) {
        self.contexts = [0; CONTEXT_COUNT];
        self.contexts[0] = pack_context(4, 0);
        self.contexts[UNIFORM_CONTEXT] = pack_context(46, 0);
        self.contexts[RUN_LENGTH_CONTEXT] = pack_context(3, 0);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// 1 for negative coefficients.
    pub fn sign(&self, index: usize) -> u8 {
        self.signs[index]
    }

    pub fn magnitude(&self, index: usize) -> u32 {
        self.magnitudes.get(index)
    }

    /// Bit-planes known for the coefficient, zero bit-planes included.
    pub fn bits_decoded(&self, index: usize) -> u32 {
        self.bits_decoded[index] as u32
    }

    /// Runs `passes` coding passes starting with a cleanup pass.
    pub fn decode_passes(
        &mut self,
        passes: u32,
        segmentation_symbol_used: bool,
        codeblock: usize,
    ) -> Result<(), J2kError> {
        let mut pass_type = 2;
        for _ in 0..passes {
            match pass_type {
                0 => self.run_significance_propagation_pass(),
                1 => self.run_magnitude_refinement_pass(),
                _ => {
                    self.run_cleanup_pass();
                    if segmentation_symbol_used {
                        self.check_segmentation_symbol(codeblock)?;
                    }
                }
            }
            pass_type = (pass_type + 1) % 3;
        }
        Ok(())
    }

    #[inline]
    fn read(&mut self, context: usize) -> u32 {
        self.decoder.read_bit(&mut self.contexts, context)
    }

    #[inline]
    fn label(&self, index: usize) -> usize {
        self.labels
            .get(self.neighbors_significance[index] as usize)
            .copied()
            .unwrap_or(0) as usize
    }

    fn set_neighbors_significance(&mut self, row: usize, column: usize, index: usize) {
        let width = self.width;
        let ns = &mut self.neighbors_significance;
        let left = column > 0;
        let right = column + 1 < width;

        if row > 0 {
            let i = index - width;
            if left {
                ns[i - 1] = ns[i - 1].wrapping_add(0x10);
            }
            if right {
                ns[i + 1] = ns[i + 1].wrapping_add(0x10);
            }
            ns[i] = ns[i].wrapping_add(0x04);
        }
        if row + 1 < self.height {
            let i = index + width;
            if left {
                ns[i - 1] = ns[i - 1].wrapping_add(0x10);
            }
            if right {
                ns[i + 1] = ns[i + 1].wrapping_add(0x10);
            }
            ns[i] = ns[i].wrapping_add(0x04);
        }
        if left {
            ns[index - 1] = ns[index - 1].wrapping_add(0x01);
        }
        if right {
            ns[index + 1] = ns[index + 1].wrapping_add(0x01);
        }
        ns[index] |= 0x80;
    }

    fn become_significant(&mut self, row: usize, column: usize, index: usize) {
        let sign = self.decode_sign_bit(row, column, index);
        self.signs[index] = sign;
        self.magnitudes.set(index, 1);
        self.set_neighbors_significance(row, column, index);
        self.processing_flags[index] |= FIRST_MAGNITUDE_BIT;
    }

    /// D.3.1
    pub fn run_significance_propagation_pass(&mut self) {
        let (width, height) = (self.width, self.height);
        for i0 in (0..height).step_by(4) {
            for j in 0..width {
                for i in i0..(i0 + 4).min(height) {
                    let index = i * width + j;
                    self.processing_flags[index] &= !PROCESSED;
                    if self.magnitudes.get(index) != 0 || self.neighbors_significance[index] == 0 {
                        continue;
                    }
                    let context = self.label(index);
                    if self.read(context) != 0 {
                        self.become_significant(i, j, index);
                    }
                    self.bits_decoded[index] = self.bits_decoded[index].wrapping_add(1);
                    self.processing_flags[index] |= PROCESSED;
                }
            }
        }
    }

    /// D.3.2, Table D.3
    fn decode_sign_bit(&mut self, row: usize, column: usize, index: usize) -> u8 {
        let width = self.width;
        let significant = |m: &Magnitudes, i: usize| m.get(i) != 0;
        let signs = &self.signs;
        let magnitudes = &self.magnitudes;

        let before = column > 0 && significant(magnitudes, index - 1);
        let after = column + 1 < width && significant(magnitudes, index + 1);
        let horizontal: i32 = match (before, after) {
            (true, true) => 1 - signs[index + 1] as i32 - signs[index - 1] as i32,
            (false, true) => 1 - 2 * signs[index + 1] as i32,
            (true, false) => 1 - 2 * signs[index - 1] as i32,
            (false, false) => 0,
        };
        let horizontal = 3 * horizontal;

        let above = row > 0 && significant(magnitudes, index - width);
        let below = row + 1 < self.height && significant(magnitudes, index + width);
        let contribution = horizontal
            + match (above, below) {
                (true, true) => 1 - signs[index + width] as i32 - signs[index - width] as i32,
                (false, true) => 1 - 2 * signs[index + width] as i32,
                (true, false) => 1 - 2 * signs[index - width] as i32,
                (false, false) => 0,
            };

        if contribution >= 0 {
            self.read(9 + contribution as usize) as u8
        } else {
            (self.read((9 - contribution) as usize) ^ 1) as u8
        }
    }

    /// D.3.3
    pub fn run_magnitude_refinement_pass(&mut self) {
        let (width, height) = (self.width, self.height);
        for i0 in (0..height).step_by(4) {
            for j in 0..width {
                for i in i0..(i0 + 4).min(height) {
                    let index = i * width + j;
                    let magnitude = self.magnitudes.get(index);
                    if magnitude == 0 || (self.processing_flags[index] & PROCESSED) != 0 {
                        continue;
                    }
                    let mut context = 16;
                    if (self.processing_flags[index] & FIRST_MAGNITUDE_BIT) != 0 {
                        self.processing_flags[index] ^= FIRST_MAGNITUDE_BIT;
                        context = if self.neighbors_significance[index] & 0x7F == 0 {
                            15
                        } else {
                            14
                        };
                    }
                    let bit = self.read(context);
                    self.magnitudes.set(index, (magnitude << 1) | bit);
                    self.bits_decoded[index] = self.bits_decoded[index].wrapping_add(1);
                    self.processing_flags[index] |= PROCESSED;
                }
            }
        }
    }

    /// D.3.4
    pub fn run_cleanup_pass(&mut self) {
        let (width, height) = (self.width, self.height);
        for i0 in (0..height).step_by(4) {
            let i_next = (i0 + 4).min(height);
            let check_all_empty = i0 + 3 < height;
            for j in 0..width {
                let index0 = i0 * width + j;
                let all_empty = check_all_empty
                    && (0..4).all(|k| {
                        let index = index0 + k * width;
                        self.processing_flags[index] == 0 && self.neighbors_significance[index] == 0
                    });

                let mut first_row = i0;
                if all_empty {
                    if self.read(RUN_LENGTH_CONTEXT) == 0 {
                        for k in 0..4 {
                            let index = index0 + k * width;
                            self.bits_decoded[index] = self.bits_decoded[index].wrapping_add(1);
                        }
                        continue;
                    }
                    let offset =
                        ((self.read(UNIFORM_CONTEXT) << 1) | self.read(UNIFORM_CONTEXT)) as usize;
                    let i = i0 + offset;
                    self.become_significant(i, j, i * width + j);
                    for row in i0..=i {
                        let index = row * width + j;
                        self.bits_decoded[index] = self.bits_decoded[index].wrapping_add(1);
                    }
                    first_row = i + 1;
                }

                for i in first_row..i_next {
                    let index = i * width + j;
                    if self.magnitudes.get(index) != 0
                        || (self.processing_flags[index] & PROCESSED) != 0
                    {
                        continue;
                    }
                    let context = self.label(index);
                    if self.read(context) == 1 {
                        self.become_significant(i, j, index);
                    }
                    self.bits_decoded[index] = self.bits_decoded[index].wrapping_add(1);
                }
            }
        }
    }

    /// D.5: four uniform-context bits that must read `1010`.
    pub fn check_segmentation_symbol(&mut self, codeblock: usize) -> Result<(), J2kError> {
        let mut symbol = 0u8;
        for _ in 0..4 {
            symbol = (symbol << 1) | self.read(UNIFORM_CONTEXT) as u8;
        }
        if symbol != 0xA {
            return Err(J2kError::InvalidSegmentationSymbol { codeblock, symbol });
        }
        Ok(())
    }
}
