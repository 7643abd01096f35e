//! MQ Arithmetic Decoder (ISO/IEC 15444-1 Annex C.3)
//!
//! Context states are packed into one byte each: the upper seven bits hold
//! the probability-estimation index, the lowest bit holds the MPS.

#[derive(Clone, Copy)]
struct MqContextState {
    qe: u32,
    nmps: u8,
    nlps: u8,
    switch: bool,
}

const fn state(qe: u32, nmps: u8, nlps: u8, switch: bool) -> MqContextState {
    MqContextState {
        qe,
        nmps,
        nlps,
        switch,
    }
}

// Table C-2
static MQ_TABLE: [MqContextState; 47] = [
    state(0x5601, 1, 1, true),
    state(0x3401, 2, 6, false),
    state(0x1801, 3, 9, false),
    state(0x0AC1, 4, 12, false),
    state(0x0521, 5, 29, false),
    state(0x0221, 38, 33, false),
    state(0x5601, 7, 6, true),
    state(0x5401, 8, 14, false),
    state(0x4801, 9, 14, false),
    state(0x3801, 10, 14, false),
    state(0x3001, 11, 17, false),
    state(0x2401, 12, 18, false),
    state(0x1C01, 13, 20, false),
    state(0x1601, 29, 21, false),
    state(0x5601, 15, 14, true),
    state(0x5401, 16, 14, false),
    state(0x5101, 17, 15, false),
    state(0x4801, 18, 16, false),
    state(0x3801, 19, 17, false),
    state(0x3401, 20, 18, false),
    state(0x3001, 21, 19, false),
    state(0x2801, 22, 19, false),
    state(0x2401, 23, 20, false),
    state(0x2201, 24, 21, false),
    state(0x1C01, 25, 22, false),
    state(0x1801, 26, 23, false),
    state(0x1601, 27, 24, false),
    state(0x1401, 28, 25, false),
    state(0x1201, 29, 26, false),
    state(0x1101, 30, 27, false),
    state(0x0AC1, 31, 28, false),
    state(0x09C1, 32, 29, false),
    state(0x08A1, 33, 30, false),
    state(0x0521, 34, 31, false),
    state(0x0441, 35, 32, false),
    state(0x02A1, 36, 33, false),
    state(0x0221, 37, 34, false),
    state(0x0141, 38, 35, false),
    state(0x0111, 39, 36, false),
    state(0x0085, 40, 37, false),
    state(0x0049, 41, 38, false),
    state(0x0025, 42, 39, false),
    state(0x0015, 43, 40, false),
    state(0x0009, 44, 41, false),
    state(0x0005, 45, 42, false),
    state(0x0001, 45, 43, false),
    state(0x5601, 46, 46, false),
];

/// Packs a probability-estimation index and MPS into a context byte.
pub const fn pack_context(index: u8, mps: u8) -> u8 {
    (index << 1) | (mps & 1)
}

/// Binary arithmetic decoder over `data[start..end]`.
pub struct MqDecoder<'a> {
    data: &'a [u8],
    bp: usize,
    end: usize,
    a: u32,
    chigh: u32,
    clow: u32,
    ct: u32,
}

impl<'a> MqDecoder<'a> {
    /// INITDEC
    pub fn new(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        let mut decoder = Self {
            data,
            bp: start,
            end,
            a: 0,
            chigh: if start < end { data[start] as u32 } else { 0 },
            clow: 0,
            ct: 0,
        };
        decoder.byte_in();
        decoder.chigh = ((decoder.chigh << 7) & 0xFFFF) | ((decoder.clow >> 9) & 0x7F);
        decoder.clow = (decoder.clow << 7) & 0xFFFF;
        decoder.ct = decoder.ct.saturating_sub(7);
        decoder.a = 0x8000;
        decoder
    }

    fn byte_at(&self, index: usize) -> Option<u8> {
        if index < self.end {
            Some(self.data[index])
        } else {
            None
        }
    }

    /// BYTEIN. Past the end of the window the decoder is fed `0xFF` bytes.
    fn byte_in(&mut self) {
        let bp = self.bp;
        if self.byte_at(bp) == Some(0xFF) {
            match self.byte_at(bp + 1) {
                Some(next) if next > 0x8F => {
                    // Marker: keep feeding ones without advancing.
                    self.clow += 0xFF00;
                    self.ct = 8;
                }
                next => {
                    self.bp = bp + 1;
                    self.clow += (next.unwrap_or(0) as u32) << 9;
                    self.ct = 7;
                }
            }
        } else {
            self.bp = bp + 1;
            self.clow += match self.byte_at(self.bp) {
                Some(b) => (b as u32) << 8,
                None => 0xFF00,
            };
            self.ct = 8;
        }
        if self.clow > 0xFFFF {
            self.chigh += self.clow >> 16;
            self.clow &= 0xFFFF;
        }
    }

    /// DECODE: returns the decision for `contexts[pos]` and updates that
    /// context's state.
    pub fn read_bit(&mut self, contexts: &mut [u8], pos: usize) -> u32 {
        let mut cx_index = (contexts[pos] >> 1) as usize;
        let mut cx_mps = (contexts[pos] & 1) as u32;
        let entry = MQ_TABLE[cx_index];
        let qe = entry.qe;
        let d;
        let mut a = self.a.wrapping_sub(qe);

        if self.chigh < qe {
            // LPS exchange
            if a < qe {
                a = qe;
                d = cx_mps;
                cx_index = entry.nmps as usize;
            } else {
                a = qe;
                d = 1 ^ cx_mps;
                if entry.switch {
                    cx_mps = d;
                }
                cx_index = entry.nlps as usize;
            }
        } else {
            self.chigh -= qe;
            if (a & 0x8000) != 0 {
                self.a = a;
                return cx_mps;
            }
            // MPS exchange
            if a < qe {
                d = 1 ^ cx_mps;
                if entry.switch {
                    cx_mps = d;
                }
                cx_index = entry.nlps as usize;
            } else {
                d = cx_mps;
                cx_index = entry.nmps as usize;
            }
        }

        // RENORMD
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            a <<= 1;
            self.chigh = ((self.chigh << 1) & 0xFFFF) | ((self.clow >> 15) & 1);
            self.clow = (self.clow << 1) & 0xFFFF;
            self.ct -= 1;
            if (a & 0x8000) != 0 {
                break;
            }
        }
        self.a = a;

        contexts[pos] = pack_context(cx_index as u8, cx_mps as u8);
        d
    }

    /// Byte position the decoder has consumed up to.
    pub fn position(&self) -> usize {
        self.bp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ITU-T T.88 Annex H.2 test sequence for the arithmetic coder.
    const ENCODED: [u8; 30] = [
        0x84, 0xC7, 0x3B, 0xFC, 0xE1, 0xA1, 0x43, 0x04, 0x02, 0x20, 0x00, 0x00, 0x41, 0x0D, 0xBB,
        0x86, 0xF4, 0x31, 0x7F, 0xFF, 0x88, 0xFF, 0x37, 0x47, 0x1A, 0xDB, 0x6A, 0xDF, 0xFF, 0xAC,
    ];
    const DECODED: [u8; 32] = [
        0x00, 0x02, 0x00, 0x51, 0x00, 0x00, 0x00, 0xC0, 0x03, 0x52, 0x87, 0x2A, 0xAA, 0xAA, 0xAA,
        0xAA, 0x82, 0xC0, 0x20, 0x00, 0xFC, 0xD7, 0x9E, 0xF6, 0xBF, 0x7F, 0xED, 0x90, 0x4F, 0x46,
        0xA3, 0xBF,
    ];

    fn decode_bytes(data: &[u8], count: usize, contexts: &mut [u8]) -> Vec<u8> {
        let mut decoder = MqDecoder::new(data, 0, data.len());
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let mut byte = 0u8;
            for _ in 0..8 {
                byte = (byte << 1) | decoder.read_bit(contexts, 0) as u8;
            }
            out.push(byte);
        }
        out
    }

    #[test]
    fn test_annex_h2_sequence() {
        let mut contexts = [0u8; 1];
        let out = decode_bytes(&ENCODED, DECODED.len(), &mut contexts);
        assert_eq!(out, DECODED);
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let mut contexts_a = [0u8; 1];
        let mut contexts_b = [0u8; 1];
        let a = decode_bytes(&ENCODED, 12, &mut contexts_a);
        let b = decode_bytes(&ENCODED, 12, &mut contexts_b);
        assert_eq!(a, b);
        assert_eq!(contexts_a, contexts_b);
    }

    #[test]
    fn test_window_offsets() {
        // The same payload embedded in a larger buffer decodes identically.
        let mut buffer = vec![0x55u8; 5];
        buffer.extend_from_slice(&ENCODED);
        buffer.extend_from_slice(&[0x12, 0x34]);
        let mut contexts = [0u8; 1];
        let mut decoder = MqDecoder::new(&buffer, 5, 5 + ENCODED.len());
        let mut first = 0u8;
        for _ in 0..8 {
            first = (first << 1) | decoder.read_bit(&mut contexts, 0) as u8;
        }
        assert_eq!(first, DECODED[0]);
    }

    #[test]
    fn test_empty_window_reads_ones_padding() {
        let mut contexts = [pack_context(46, 0)];
        let mut decoder = MqDecoder::new(&[], 0, 0);
        // Never panics past the end of data.
        for _ in 0..64 {
            let bit = decoder.read_bit(&mut contexts, 0);
            assert!(bit <= 1);
        }
    }
}
