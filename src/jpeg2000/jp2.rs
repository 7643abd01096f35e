//! JP2 box structure (ISO/IEC 15444-1 Annex I).
//!
//! Only what is needed to find the codestream and the enumerated colorspace
//! is interpreted; everything else is skipped.

use std::ops::Range;

use log::warn;

use crate::error::J2kError;
use crate::jpeg_stream_reader::JpegStreamReader;

const JP2_SIGNATURE: u32 = 0x0D0A_870A;

/// Box types (TBox), as big-endian four-character codes.
mod box_type {
    pub const SIGNATURE: u32 = 0x6A50_2020; // 'jP  '
    pub const SIGNATURE_ALT: u32 = 0x6A50_1A1A; // 'jP\x1a\x1a'
    pub const FILE_TYPE: u32 = 0x6674_7970; // 'ftyp'
    pub const HEADER: u32 = 0x6A70_3268; // 'jp2h'
    pub const IMAGE_HEADER: u32 = 0x6968_6472; // 'ihdr'
    pub const COLOUR_SPECIFICATION: u32 = 0x636F_6C72; // 'colr'
    pub const READER_REQUIREMENTS: u32 = 0x7272_6571; // 'rreq'
    pub const RESOLUTION: u32 = 0x7265_7320; // 'res '
    pub const CODESTREAM: u32 = 0x6A70_3263; // 'jp2c'
}

/// Enumerated colorspace of a `colr` box (Table I.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jp2Colorspace {
    Srgb,
    Greyscale,
    Sycc,
}

impl Jp2Colorspace {
    fn from_enumerated(value: u32) -> Option<Self> {
        match value {
            16 => Some(Self::Srgb),
            17 => Some(Self::Greyscale),
            18 => Some(Self::Sycc),
            _ => None,
        }
    }
}

/// Header of one box and the byte range of its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jp2Box {
    pub box_type: u32,
    pub data_range: Range<usize>,
}

impl Jp2Box {
    /// TBox as text, for messages.
    pub fn type_name(&self) -> String {
        self.box_type
            .to_be_bytes()
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
            .collect()
    }
}

/// What the box walk found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jp2Contents {
    pub codestream: Option<Range<usize>>,
    pub colorspace: Option<Jp2Colorspace>,
}

/// Sequential reader over the boxes of a JP2 file. Superboxes the decoder
/// cares about (`jp2h`) are entered rather than skipped.
pub struct Jp2Reader<'a> {
    reader: JpegStreamReader<'a>,
}

impl<'a> Jp2Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: JpegStreamReader::new(data),
        }
    }

    /// Reads the next box header. `Ok(None)` at the end of the data.
    pub fn read_box(&mut self) -> Result<Option<Jp2Box>, J2kError> {
        let start = self.reader.position();
        if start >= self.reader.len() {
            return Ok(None);
        }
        let mut length = self.reader.read_u32()? as u64;
        let box_type = self.reader.read_u32()?;
        let mut header_size = 8u64;
        if length == 1 {
            length = self.reader.read_u64()?;
            header_size += 8;
        } else if length == 0 {
            length = (self.reader.len() - start) as u64;
        }
        if length < header_size {
            return Err(J2kError::InvalidBoxSize);
        }
        let end = (start as u64)
            .checked_add(length)
            .filter(|&end| end <= self.reader.len() as u64)
            .ok_or(J2kError::InvalidBoxSize)? as usize;
        Ok(Some(Jp2Box {
            box_type,
            data_range: start + header_size as usize..end,
        }))
    }

    /// Walks all boxes, recording the first codestream and the colorspace.
    pub fn read_contents(&mut self) -> Result<Jp2Contents, J2kError> {
        let mut contents = Jp2Contents::default();
        while let Some(jp2_box) = self.read_box()? {
            let mut skip_contents = true;
            match jp2_box.box_type {
                box_type::HEADER => skip_contents = false,
                box_type::COLOUR_SPECIFICATION => {
                    contents.colorspace = self.read_colour_specification(&jp2_box)?;
                }
                box_type::CODESTREAM => {
                    if contents.codestream.is_none() {
                        contents.codestream = Some(jp2_box.data_range.clone());
                    }
                }
                box_type::SIGNATURE => {
                    self.reader.seek(jp2_box.data_range.start);
                    if self.reader.read_u32()? != JP2_SIGNATURE {
                        warn!("Invalid JP2 signature");
                    }
                }
                box_type::SIGNATURE_ALT
                | box_type::FILE_TYPE
                | box_type::READER_REQUIREMENTS
                | box_type::RESOLUTION
                | box_type::IMAGE_HEADER => {}
                other => warn!(
                    "Unsupported header type {} ({})",
                    other,
                    jp2_box.type_name()
                ),
            }
            let next = if skip_contents {
                jp2_box.data_range.end
            } else {
                jp2_box.data_range.start
            };
            self.reader.seek(next);
        }
        Ok(contents)
    }

    fn read_colour_specification(
        &mut self,
        jp2_box: &Jp2Box,
    ) -> Result<Option<Jp2Colorspace>, J2kError> {
        self.reader.seek(jp2_box.data_range.start);
        let method = self.reader.read_u8()?;
        match method {
            1 => {
                // METH, PREC, APPROX, then EnumCS
                self.reader.advance(2);
                let value = self.reader.read_u32()?;
                let colorspace = Jp2Colorspace::from_enumerated(value);
                if colorspace.is_none() {
                    warn!("Unknown colorspace {}", value);
                }
                Ok(colorspace)
            }
            2 => {
                warn!("ICC profile not supported");
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jp2_box(tbox: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(tbox);
        out.extend_from_slice(payload);
        out
    }

    fn sample_file() -> Vec<u8> {
        let mut colr = vec![1, 0, 0];
        colr.extend_from_slice(&16u32.to_be_bytes());
        let mut header = jp2_box(b"ihdr", &[0; 14]);
        header.extend(jp2_box(b"colr", &colr));

        let mut file = jp2_box(b"jP  ", &[0x0D, 0x0A, 0x87, 0x0A]);
        file.extend(jp2_box(b"ftyp", b"jp2 \0\0\0\0jp2 "));
        file.extend(jp2_box(b"jp2h", &header));
        file.extend(jp2_box(b"jp2c", &[0xFF, 0x4F, 0xFF, 0xD9]));
        file
    }

    #[test]
    fn test_finds_codestream_and_colorspace() {
        let file = sample_file();
        let contents = Jp2Reader::new(&file).read_contents().unwrap();
        let range = contents.codestream.unwrap();
        assert_eq!(&file[range], &[0xFF, 0x4F, 0xFF, 0xD9]);
        assert_eq!(contents.colorspace, Some(Jp2Colorspace::Srgb));
    }

    #[test]
    fn test_extended_and_open_ended_lengths() {
        // XLBox = 20: 16 header bytes and 4 bytes of contents
        let mut file = vec![0, 0, 0, 1];
        file.extend_from_slice(b"uuid");
        file.extend_from_slice(&20u64.to_be_bytes());
        file.extend_from_slice(&[1, 2, 3, 4]);
        // LBox = 0: codestream runs to the end
        file.extend_from_slice(&[0, 0, 0, 0]);
        file.extend_from_slice(b"jp2c");
        file.extend_from_slice(&[0xFF, 0x4F]);

        let mut reader = Jp2Reader::new(&file);
        let uuid = reader.read_box().unwrap().unwrap();
        assert_eq!(uuid.type_name(), "uuid");
        assert_eq!(uuid.data_range, 16..20);
        let contents = Jp2Reader::new(&file).read_contents().unwrap();
        assert_eq!(contents.codestream, Some(28..30));
    }

    #[test]
    fn test_invalid_box_lengths() {
        let short = [0, 0, 0, 4, b'j', b'p', b'2', b'c'];
        assert_eq!(
            Jp2Reader::new(&short).read_contents(),
            Err(J2kError::InvalidBoxSize)
        );
        let overlong = [0, 0, 0, 64, b'j', b'p', b'2', b'c', 0xFF];
        assert_eq!(
            Jp2Reader::new(&overlong).read_contents(),
            Err(J2kError::InvalidBoxSize)
        );
    }

    #[test]
    fn test_unknown_colorspace_is_not_a_hint() {
        let mut colr = vec![1, 0, 0];
        colr.extend_from_slice(&12u32.to_be_bytes());
        let file = jp2_box(b"colr", &colr);
        let contents = Jp2Reader::new(&file).read_contents().unwrap();
        assert_eq!(contents.colorspace, None);
        assert_eq!(contents.codestream, None);
    }
}
