//! Packet header bit reader (ISO/IEC 15444-1 B.10.1).

use crate::error::J2kError;
use crate::jpeg_marker_code::JPEG_MARKER_START_BYTE;

/// Bit cursor over the packet data of one tile-part.
///
/// A byte following `0xFF` only carries 7 bits: the encoder stuffs a zero
/// bit so the header can never emulate a marker.
pub struct J2kBitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit_buffer: u64,
    bits_left: u32,
    skip_next_bit: bool,
}

impl<'a> J2kBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bit_buffer: 0,
            bits_left: 0,
            skip_next_bit: false,
        }
    }

    pub fn read_bits(&mut self, count: u32) -> Result<u32, J2kError> {
        debug_assert!(count <= 32);
        while self.bits_left < count {
            let b = *self.data.get(self.pos).ok_or(J2kError::NeedMoreData)?;
            self.pos += 1;
            if self.skip_next_bit {
                self.bit_buffer = (self.bit_buffer << 7) | b as u64;
                self.bits_left += 7;
                self.skip_next_bit = false;
            } else {
                self.bit_buffer = (self.bit_buffer << 8) | b as u64;
                self.bits_left += 8;
            }
            if b == JPEG_MARKER_START_BYTE {
                self.skip_next_bit = true;
            }
        }
        self.bits_left -= count;
        let mask = if count == 32 {
            u32::MAX as u64
        } else {
            (1u64 << count) - 1
        };
        Ok(((self.bit_buffer >> self.bits_left) & mask) as u32)
    }

    pub fn read_bit(&mut self) -> Result<u32, J2kError> {
        self.read_bits(1)
    }

    /// Discards buffered bits. A pending stuffed byte is consumed as well.
    pub fn align_to_byte(&mut self) {
        self.bits_left = 0;
        if self.skip_next_bit {
            self.pos += 1;
            self.skip_next_bit = false;
        }
    }

    /// Skips a `0xFF value` marker sitting at the cursor, or straddling it
    /// when the `0xFF` byte was already consumed.
    pub fn skip_marker_if_equal(&mut self, value: u8) -> bool {
        let at = |i: usize| self.data.get(i).copied();
        if self.pos > 0
            && at(self.pos - 1) == Some(JPEG_MARKER_START_BYTE)
            && at(self.pos) == Some(value)
        {
            self.skip_bytes(1);
            true
        } else if at(self.pos) == Some(JPEG_MARKER_START_BYTE) && at(self.pos + 1) == Some(value) {
            self.skip_bytes(2);
            true
        } else {
            false
        }
    }

    pub fn skip_bytes(&mut self, count: usize) {
        self.pos += count;
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}
