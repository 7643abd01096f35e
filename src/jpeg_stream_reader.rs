use crate::error::J2kError;
use crate::jpeg_marker_code::{JPEG_MARKER_START_BYTE, JpegMarkerCode};

/// Big-endian byte cursor over a codestream or box payload.
///
/// All reads are bounds checked and report [`J2kError::NeedMoreData`] when
/// the source is exhausted.
#[derive(Debug, Clone)]
pub struct JpegStreamReader<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> JpegStreamReader<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn source(&self) -> &'a [u8] {
        self.source
    }

    pub fn remaining_data(&self) -> &'a [u8] {
        &self.source[self.position.min(self.source.len())..]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn advance(&mut self, count: usize) {
        self.position = self.position.saturating_add(count);
    }

    pub fn read_u8(&mut self) -> Result<u8, J2kError> {
        let val = *self
            .source
            .get(self.position)
            .ok_or(J2kError::NeedMoreData)?;
        self.position += 1;
        Ok(val)
    }

    pub fn read_u16(&mut self) -> Result<u16, J2kError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b1 << 8) | b2)
    }

    pub fn read_u32(&mut self) -> Result<u32, J2kError> {
        let b1 = self.read_u8()? as u32;
        let b2 = self.read_u8()? as u32;
        let b3 = self.read_u8()? as u32;
        let b4 = self.read_u8()? as u32;
        Ok((b1 << 24) | (b2 << 16) | (b3 << 8) | b4)
    }

    pub fn read_u64(&mut self) -> Result<u64, J2kError> {
        let high = self.read_u32()? as u64;
        let low = self.read_u32()? as u64;
        Ok((high << 32) | low)
    }

    /// Reads a two byte marker. Unknown codes are reported with their value.
    pub fn read_marker(&mut self) -> Result<JpegMarkerCode, J2kError> {
        let code = self.read_u16()?;
        if (code >> 8) as u8 != JPEG_MARKER_START_BYTE {
            return Err(J2kError::UnknownMarker(code));
        }
        JpegMarkerCode::try_from(code).map_err(|_| J2kError::UnknownMarker(code))
    }

    /// Reads a marker segment length and returns the number of body bytes.
    pub fn read_segment_length(&mut self) -> Result<usize, J2kError> {
        let length = self.read_u16()?;
        if length < 2 {
            return Err(J2kError::InvalidData(format!(
                "marker segment length {length} is shorter than its own field"
            )));
        }
        Ok(length as usize - 2)
    }

    pub fn skip_segment(&mut self) -> Result<(), J2kError> {
        let length = self.read_segment_length()?;
        self.advance(length);
        Ok(())
    }
}
