//! JPEG 2000 codestream parser.
//!
//! Handles the main header (SOC, SIZ, COD/COC, QCD/QCC) and the tile-part
//! headers (SOT up to SOD). Tile-part bodies are not read here; the parser
//! reports their byte range and seeks past them.

use std::ops::Range;

use log::{debug, warn};

use super::image::{
    CodeBlockStyle, J2kCod, J2kComponentCodingStyle, J2kComponentInfo, J2kImageSize,
    J2kQuantization, PrecinctSize, ProgressionOrder, QuantizationStyle, StepSize,
};
use super::jp2::Jp2Colorspace;
use super::limits::DecodeOptions;
use crate::error::J2kError;
use crate::jpeg_marker_code::JpegMarkerCode;
use crate::jpeg_stream_reader::JpegStreamReader;

/// Highest decomposition level count allowed by Table A.15.
const MAX_DECOMPOSITION_LEVELS: u8 = 32;
/// Deepest component the sample pipeline can hold in an `i32`.
const MAX_COMPONENT_DEPTH: u8 = 31;

/// COD/COC/QCD/QCC values at one level of the header hierarchy. Fields left
/// empty defer to the level above.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodingParameters {
    pub cod: Option<J2kCod>,
    pub coc: Vec<Option<J2kComponentCodingStyle>>,
    pub qcd: Option<J2kQuantization>,
    pub qcc: Vec<Option<J2kQuantization>>,
}

impl CodingParameters {
    fn with_components(count: usize) -> Self {
        Self {
            cod: None,
            coc: vec![None; count],
            qcd: None,
            qcc: vec![None; count],
        }
    }

    /// Tile coding style: tile COD, else main COD.
    pub fn resolve_cod(&self, main: &CodingParameters) -> Result<J2kCod, J2kError> {
        self.cod
            .as_ref()
            .or(main.cod.as_ref())
            .cloned()
            .ok_or_else(|| J2kError::InvalidData("Missing COD marker".to_string()))
    }

    /// Per-component coding style and quantization, tile values before main
    /// values and COC/QCC before COD/QCD at each level.
    pub fn resolve_components(
        &self,
        main: &CodingParameters,
        count: usize,
    ) -> Result<Vec<(J2kComponentCodingStyle, J2kQuantization)>, J2kError> {
        let cod = self.resolve_cod(main)?;
        let qcd = self
            .qcd
            .as_ref()
            .or(main.qcd.as_ref())
            .ok_or_else(|| J2kError::InvalidData("Missing QCD marker".to_string()))?;

        (0..count)
            .map(|c| {
                let coding = match (self.coc.get(c).and_then(Option::as_ref), &self.cod) {
                    (Some(coc), _) => coc.clone(),
                    (None, Some(tile_cod)) => tile_cod.component.clone(),
                    (None, None) => main
                        .coc
                        .get(c)
                        .and_then(Option::as_ref)
                        .cloned()
                        .unwrap_or_else(|| cod.component.clone()),
                };
                let quantization = match (self.qcc.get(c).and_then(Option::as_ref), &self.qcd) {
                    (Some(qcc), _) => qcc.clone(),
                    (None, Some(tile_qcd)) => tile_qcd.clone(),
                    (None, None) => main
                        .qcc
                        .get(c)
                        .and_then(Option::as_ref)
                        .cloned()
                        .unwrap_or_else(|| qcd.clone()),
                };
                Ok((coding, quantization))
            })
            .collect()
    }
}

/// Everything the main header declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kCodestreamHeader {
    pub siz: J2kImageSize,
    pub components: Vec<J2kComponentInfo>,
    pub coding: CodingParameters,
    /// Options seen in the stream that this decoder does not implement:
    /// code-block styles from any COD/COC, plus the decoder's own note on
    /// an ambiguous component transform. A non-empty list disables
    /// best-effort recovery.
    pub unsupported_options: Vec<&'static str>,
    /// Enumerated colorspace of the enclosing JP2 file, if any.
    pub colorspace: Option<Jp2Colorspace>,
}

impl J2kCodestreamHeader {
    pub fn tile_count(&self) -> usize {
        self.siz.tile_count()
    }
}

/// One tile-part: its SOT fields, its body and, for the first part of a
/// tile, the coding parameters of the tile-part header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePart {
    pub tile_index: usize,
    pub part_index: u8,
    pub parts_count: u8,
    pub data: Range<usize>,
    pub coding: CodingParameters,
}

/// A parser that turns J2K marker segments into structured metadata.
pub struct J2kParser<'a, 'b> {
    pub reader: &'b mut JpegStreamReader<'a>,
    pub header: J2kCodestreamHeader,
    siz_seen: bool,
}

impl<'a, 'b> J2kParser<'a, 'b> {
    pub fn new(reader: &'b mut JpegStreamReader<'a>) -> Self {
        Self {
            reader,
            header: J2kCodestreamHeader::default(),
            siz_seen: false,
        }
    }

    /// Reads SOC and the main header. Stops in front of the first SOT (or
    /// EOC), leaving the reader on that marker.
    pub fn parse_main_header(&mut self, options: &DecodeOptions) -> Result<(), J2kError> {
        if self.reader.read_marker()? != JpegMarkerCode::StartOfCodestream {
            return Err(J2kError::StartOfCodestreamNotFound);
        }

        loop {
            if self.reader.remaining_data().len() < 2 {
                break;
            }
            let position = self.reader.position();
            let marker = self.reader.read_marker()?;
            if !self.siz_seen && marker != JpegMarkerCode::ImageAndTileSize {
                return Err(J2kError::MissingSiz {
                    marker: marker as u16,
                });
            }
            match marker {
                JpegMarkerCode::ImageAndTileSize => self.parse_siz(options)?,
                JpegMarkerCode::CodingStyleDefault => {
                    let cod = self.parse_cod()?;
                    self.header.coding.cod = Some(cod);
                }
                JpegMarkerCode::CodingStyleComponent => {
                    let (component, style) = self.parse_coc()?;
                    self.header.coding.coc[component] = Some(style);
                }
                JpegMarkerCode::QuantizationDefault => {
                    let qcd = self.parse_qcd()?;
                    self.header.coding.qcd = Some(qcd);
                }
                JpegMarkerCode::QuantizationComponent => {
                    let (component, qcc) = self.parse_qcc()?;
                    self.header.coding.qcc[component] = Some(qcc);
                }
                JpegMarkerCode::StartOfTile | JpegMarkerCode::EndOfCodestream => {
                    self.reader.seek(position);
                    break;
                }
                other => self.skip_or_reject(other)?,
            }
        }
        if !self.siz_seen {
            return Err(J2kError::InvalidData(
                "Main header ends before SIZ".to_string(),
            ));
        }
        Ok(())
    }

    /// Reads the next tile-part header and seeks past its body. `Ok(None)`
    /// at EOC or at the end of the data.
    pub fn next_tile_part(&mut self) -> Result<Option<TilePart>, J2kError> {
        if self.reader.remaining_data().len() < 2 {
            return Ok(None);
        }
        let sot_position = self.reader.position();
        match self.reader.read_marker()? {
            JpegMarkerCode::StartOfTile => {}
            JpegMarkerCode::EndOfCodestream => return Ok(None),
            other => {
                return Err(J2kError::InvalidData(format!(
                    "Expected SOT, found {:?}",
                    other
                )))
            }
        }

        let length = self.reader.read_segment_length()?;
        if length < 8 {
            return Err(J2kError::InvalidData(format!(
                "SOT segment too short ({} bytes)",
                length
            )));
        }
        let index = self.reader.read_u16()?;
        let psot = self.reader.read_u32()? as usize;
        let part_index = self.reader.read_u8()?;
        let parts_count = self.reader.read_u8()?;
        self.reader.advance(length - 8);

        let count = self.header.tile_count();
        if index as usize >= count {
            return Err(J2kError::InvalidTileIndex { index, count });
        }

        let data_end = if psot == 0 {
            self.end_of_last_tile_part()
        } else {
            sot_position
                .checked_add(psot)
                .filter(|&end| end <= self.reader.len())
                .ok_or(J2kError::NeedMoreData)?
        };
        debug!(
            "SOT: tile {} part {}/{}, {} bytes",
            index,
            part_index,
            parts_count,
            data_end - sot_position
        );

        let component_count = self.header.components.len();
        let mut coding = CodingParameters::with_components(component_count);
        loop {
            let marker = self.reader.read_marker()?;
            match marker {
                JpegMarkerCode::StartOfData => break,
                JpegMarkerCode::CodingStyleDefault => {
                    let cod = self.parse_cod()?;
                    coding.cod = Some(cod);
                }
                JpegMarkerCode::CodingStyleComponent => {
                    let (component, style) = self.parse_coc()?;
                    coding.coc[component] = Some(style);
                }
                JpegMarkerCode::QuantizationDefault => {
                    let qcd = self.parse_qcd()?;
                    coding.qcd = Some(qcd);
                }
                JpegMarkerCode::QuantizationComponent => {
                    let (component, qcc) = self.parse_qcc()?;
                    coding.qcc[component] = Some(qcc);
                }
                other => self.skip_or_reject(other)?,
            }
        }

        let data_start = self.reader.position();
        if data_start > data_end {
            return Err(J2kError::InvalidData(format!(
                "Tile-part header of tile {} runs past Psot",
                index
            )));
        }
        if part_index > 0 && coding != CodingParameters::with_components(component_count) {
            debug!(
                "Ignoring coding parameters in tile {} part {}",
                index, part_index
            );
        }
        self.reader.seek(data_end);
        Ok(Some(TilePart {
            tile_index: index as usize,
            part_index,
            parts_count,
            data: data_start..data_end,
            coding,
        }))
    }

    /// End of the codestream data, not counting a trailing EOC.
    fn end_of_last_tile_part(&self) -> usize {
        let data = self.reader.source();
        if data.ends_with(&[0xFF, 0xD9]) {
            data.len() - 2
        } else {
            data.len()
        }
    }

    fn skip_or_reject(&mut self, marker: JpegMarkerCode) -> Result<(), J2kError> {
        if marker.is_skippable() {
            return self.reader.skip_segment();
        }
        match marker {
            JpegMarkerCode::RegionOfInterest
            | JpegMarkerCode::ProgressionOrderChange
            | JpegMarkerCode::PackedPacketHeadersMain
            | JpegMarkerCode::PackedPacketHeadersTilePart => Err(J2kError::UnsupportedFeature(
                format!("{:?} marker", marker),
            )),
            _ => Err(J2kError::UnknownMarker(marker as u16)),
        }
    }

    pub fn parse_siz(&mut self, options: &DecodeOptions) -> Result<(), J2kError> {
        let length = self.reader.read_segment_length()?;
        let end = self.reader.position() + length;
        let _capabilities = self.reader.read_u16()?; // Rsiz
        let siz = J2kImageSize {
            width: self.reader.read_u32()?,
            height: self.reader.read_u32()?,
            x_origin: self.reader.read_u32()?,
            y_origin: self.reader.read_u32()?,
            tile_width: self.reader.read_u32()?,
            tile_height: self.reader.read_u32()?,
            tile_x_origin: self.reader.read_u32()?,
            tile_y_origin: self.reader.read_u32()?,
            component_count: self.reader.read_u16()?,
        };

        if siz.width <= siz.x_origin || siz.height <= siz.y_origin {
            return Err(J2kError::InvalidData(format!(
                "Empty image area {}x{} at ({}, {})",
                siz.width, siz.height, siz.x_origin, siz.y_origin
            )));
        }
        if siz.tile_width == 0
            || siz.tile_height == 0
            || siz.tile_x_origin > siz.x_origin
            || siz.tile_y_origin > siz.y_origin
            || siz.tile_x_origin as u64 + siz.tile_width as u64 <= siz.x_origin as u64
            || siz.tile_y_origin as u64 + siz.tile_height as u64 <= siz.y_origin as u64
        {
            return Err(J2kError::InvalidData("Invalid tile grid".to_string()));
        }
        if siz.component_count == 0 {
            return Err(J2kError::InvalidData("No components".to_string()));
        }
        options.check_pixel_count(siz.image_width(), siz.image_height())?;

        let mut components = Vec::with_capacity(siz.component_count as usize);
        for _ in 0..siz.component_count {
            let ssiz = self.reader.read_u8()?;
            let dx = self.reader.read_u8()?;
            let dy = self.reader.read_u8()?;
            if dx == 0 || dy == 0 {
                return Err(J2kError::InvalidData(
                    "Component subsampling of zero".to_string(),
                ));
            }
            let info = J2kComponentInfo::new(ssiz, dx, dy, &siz);
            if info.depth > MAX_COMPONENT_DEPTH {
                return Err(J2kError::UnsupportedFeature(format!(
                    "{}-bit components",
                    info.depth
                )));
            }
            components.push(info);
        }
        self.reader.seek(end);

        debug!(
            "SIZ: {}x{} at ({}, {}), tiles {}x{} ({} total), {} components",
            siz.image_width(),
            siz.image_height(),
            siz.x_origin,
            siz.y_origin,
            siz.tile_width,
            siz.tile_height,
            siz.tile_count(),
            components.len()
        );

        self.header.coding = CodingParameters::with_components(components.len());
        self.header.siz = siz;
        self.header.components = components;
        self.siz_seen = true;
        Ok(())
    }

    /// Reads SPcod/SPcoc. `custom_precincts` comes from Scod/Scoc bit 0.
    fn parse_component_coding_style(
        &mut self,
        custom_precincts: bool,
    ) -> Result<J2kComponentCodingStyle, J2kError> {
        let decomposition_levels = self.reader.read_u8()?;
        if decomposition_levels > MAX_DECOMPOSITION_LEVELS {
            return Err(J2kError::InvalidData(format!(
                "{} decomposition levels",
                decomposition_levels
            )));
        }
        let xcb = (self.reader.read_u8()? & 0x0F) + 2;
        let ycb = (self.reader.read_u8()? & 0x0F) + 2;
        if xcb + ycb > 12 {
            return Err(J2kError::InvalidData(format!(
                "Code-block size 2^{} x 2^{}",
                xcb, ycb
            )));
        }
        let block_style = CodeBlockStyle::from_byte(self.reader.read_u8()?);
        let reversible = self.reader.read_u8()? != 0;

        let mut precinct_sizes = Vec::new();
        if custom_precincts {
            for _ in 0..=decomposition_levels {
                precinct_sizes.push(PrecinctSize::from_byte(self.reader.read_u8()?));
            }
        }

        let unsupported = block_style.unsupported_options();
        if !unsupported.is_empty() {
            warn!("Unsupported COD options ({})", unsupported.join(", "));
            for name in unsupported {
                if !self.header.unsupported_options.contains(&name) {
                    self.header.unsupported_options.push(name);
                }
            }
        }

        Ok(J2kComponentCodingStyle {
            custom_precincts,
            decomposition_levels,
            xcb,
            ycb,
            block_style,
            reversible,
            precinct_sizes,
        })
    }

    pub fn parse_cod(&mut self) -> Result<J2kCod, J2kError> {
        let length = self.reader.read_segment_length()?;
        let end = self.reader.position() + length;
        let scod = self.reader.read_u8()?;
        let progression = self.reader.read_u8()?;
        let progression_order = ProgressionOrder::try_from(progression)
            .map_err(|_| J2kError::InvalidProgressionOrder(progression))?;
        let layer_count = self.reader.read_u16()?;
        if layer_count == 0 {
            return Err(J2kError::InvalidData("Zero quality layers".to_string()));
        }
        let multiple_component_transform = self.reader.read_u8()?;
        let component = self.parse_component_coding_style(scod & 0x01 != 0)?;
        self.reader.seek(end);

        debug!(
            "COD: {} progression, {} layers, {} levels, {}, MCT {}",
            progression_order.name(),
            layer_count,
            component.decomposition_levels,
            if component.reversible { "5-3" } else { "9-7" },
            multiple_component_transform
        );

        Ok(J2kCod {
            sop_marker_used: scod & 0x02 != 0,
            eph_marker_used: scod & 0x04 != 0,
            progression_order,
            layer_count,
            multiple_component_transform,
            component,
        })
    }

    /// Ccoc/Cqcc: one byte below 257 components, two otherwise.
    fn read_component_index(&mut self) -> Result<usize, J2kError> {
        let count = self.header.components.len();
        let index = if count < 257 {
            self.reader.read_u8()? as usize
        } else {
            self.reader.read_u16()? as usize
        };
        if index >= count {
            return Err(J2kError::InvalidData(format!(
                "Component index {} out of range ({} components)",
                index, count
            )));
        }
        Ok(index)
    }

    pub fn parse_coc(&mut self) -> Result<(usize, J2kComponentCodingStyle), J2kError> {
        let length = self.reader.read_segment_length()?;
        let end = self.reader.position() + length;
        let component = self.read_component_index()?;
        let scoc = self.reader.read_u8()?;
        let style = self.parse_component_coding_style(scoc & 0x01 != 0)?;
        self.reader.seek(end);
        debug!(
            "COC: component {}, {} levels",
            component, style.decomposition_levels
        );
        Ok((component, style))
    }

    /// Sqcd/Sqcc and the step sizes up to `end`.
    fn parse_quantization(&mut self, end: usize) -> Result<J2kQuantization, J2kError> {
        let sqcd = self.reader.read_u8()?;
        let style = QuantizationStyle::try_from(sqcd & 0x1F)
            .map_err(|_| J2kError::InvalidQuantizationStyle(sqcd))?;
        let guard_bits = sqcd >> 5;

        let mut step_sizes = Vec::new();
        match style {
            QuantizationStyle::NoQuantization => {
                while self.reader.position() < end {
                    let b = self.reader.read_u8()?;
                    step_sizes.push(StepSize {
                        exponent: b >> 3,
                        mantissa: 0,
                    });
                }
            }
            QuantizationStyle::ScalarDerived | QuantizationStyle::ScalarExpounded => {
                while self.reader.position() + 1 < end {
                    let value = self.reader.read_u16()?;
                    step_sizes.push(StepSize {
                        exponent: (value >> 11) as u8,
                        mantissa: value & 0x07FF,
                    });
                }
            }
        }
        if step_sizes.is_empty() {
            return Err(J2kError::InvalidData("No quantization step sizes".to_string()));
        }
        self.reader.seek(end);
        Ok(J2kQuantization {
            style,
            guard_bits,
            step_sizes,
        })
    }

    pub fn parse_qcd(&mut self) -> Result<J2kQuantization, J2kError> {
        let length = self.reader.read_segment_length()?;
        let end = self.reader.position() + length;
        let qcd = self.parse_quantization(end)?;
        debug!(
            "QCD: {:?}, {} guard bits, {} step sizes",
            qcd.style,
            qcd.guard_bits,
            qcd.step_sizes.len()
        );
        Ok(qcd)
    }

    pub fn parse_qcc(&mut self) -> Result<(usize, J2kQuantization), J2kError> {
        let length = self.reader.read_segment_length()?;
        let end = self.reader.position() + length;
        let component = self.read_component_index()?;
        let qcc = self.parse_quantization(end)?;
        Ok((component, qcc))
    }
}
