//! JPEG 2000 decoder.
//!
//! `J2kDecoder` drives the whole pipeline: container detection, header
//! parsing, tier-2 packet parsing per tile-part, then per tile the tier-1
//! decoding of every code-block, dequantization, inverse wavelet transform,
//! inverse component transform and level shift.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use log::{debug, warn};

use super::bit_plane_coder::BitModel;
use super::dwt::{synthesize, Irreversible97, Level, Reversible53, Wavelet};
use super::geometry::{build_tile, J2kTile, Subband, TileComponent};
use super::image::{J2kComponentInfo, SubbandOrientation};
use super::jp2::{Jp2Colorspace, Jp2Reader};
use super::limits::{DecodeOptions, MemoryBudget};
use super::mct::{apply_inverse, level_shift, ComponentSamples};
use super::mq_coder::MqDecoder;
use super::packet::parse_tile_packets;
use super::parser::{J2kCodestreamHeader, J2kParser, TilePart};
use super::progression::PacketSequencer;
use super::quantization::Dequantizer;
use crate::error::J2kError;
use crate::jpeg_marker_code::JpegMarkerCode;
use crate::jpeg_stream_reader::JpegStreamReader;

/// Reconstructed samples of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    pub index: usize,
    /// Position of the first component on its sample grid.
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// One row-major plane per component, at the component's native
    /// precision. Subsampled components have smaller planes.
    pub planes: Vec<Vec<i32>>,
}

/// Result of a decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub components: Vec<J2kComponentInfo>,
    pub tiles: Vec<DecodedTile>,
    pub colorspace: Option<Jp2Colorspace>,
    /// Set when best-effort decoding swallowed an error; the image is then
    /// incomplete from that point on.
    pub recovered_error: Option<J2kError>,
}

impl DecodedImage {
    /// Composes the tiles into one interleaved 8-bit raster of
    /// `width * height * components` samples.
    pub fn to_interleaved_u8(&self) -> Result<Vec<u8>, J2kError> {
        if self.components.iter().any(|c| c.dx != 1 || c.dy != 1) {
            return Err(J2kError::UnsupportedFeature(
                "interleaving subsampled components".to_string(),
            ));
        }
        let count = self.components.len();
        let (width, height) = (self.width as usize, self.height as usize);
        let (x_origin, y_origin) = self
            .components
            .first()
            .map(|c| (c.x0, c.y0))
            .unwrap_or_default();

        let mut out = vec![0u8; width * height * count];
        for tile in &self.tiles {
            let (tile_width, tile_height) = (tile.width as usize, tile.height as usize);
            if tile.left < x_origin
                || tile.top < y_origin
                || (tile.left - x_origin) as usize + tile_width > width
                || (tile.top - y_origin) as usize + tile_height > height
            {
                return Err(J2kError::InvalidData(format!(
                    "Tile {} lies outside the image",
                    tile.index
                )));
            }
            let left = (tile.left - x_origin) as usize;
            let top = (tile.top - y_origin) as usize;
            for (c, (plane, info)) in tile.planes.iter().zip(&self.components).enumerate() {
                if plane.len() != tile_width * tile_height {
                    return Err(J2kError::InvalidData(format!(
                        "Plane {} of tile {} has {} samples, expected {}",
                        c,
                        tile.index,
                        plane.len(),
                        tile_width * tile_height
                    )));
                }
                for (y, row) in plane.chunks_exact(tile_width).enumerate() {
                    let mut position = ((top + y) * width + left) * count + c;
                    for &value in row {
                        out[position] = to_u8(value, info);
                        position += count;
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Scales a sample to 8 bits; signed samples are recentred first.
fn to_u8(value: i32, info: &J2kComponentInfo) -> u8 {
    let depth = info.depth as i64;
    let mut v = value as i64;
    if info.is_signed {
        v += 1 << (depth - 1);
    }
    let v = if depth >= 8 {
        v >> (depth - 8)
    } else {
        v << (8 - depth)
    };
    v.clamp(0, 255) as u8
}

/// Tier-2 state of a tile whose first tile-part has been seen.
struct TileState {
    tile: J2kTile,
    sequencer: PacketSequencer,
}

/// Best-effort bookkeeping: decides whether an error may be swallowed.
struct Recovery {
    allowed: bool,
    error: Option<J2kError>,
}

impl Recovery {
    fn absorb(&mut self, error: J2kError) -> Result<(), J2kError> {
        if !self.allowed || !error.is_recoverable() {
            return Err(error);
        }
        warn!("Trying to recover from: {}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        Ok(())
    }
}

/// High-level JPEG 2000 decoder over an in-memory `.j2k`/`.jp2` buffer.
pub struct J2kDecoder<'a> {
    data: &'a [u8],
    options: DecodeOptions,
}

impl<'a> J2kDecoder<'a> {
    pub fn new(data: &'a [u8], options: DecodeOptions) -> Self {
        Self { data, options }
    }

    /// The raw codestream, directly or from the first `jp2c` box.
    fn locate_codestream(&self) -> Result<(&'a [u8], Option<Jp2Colorspace>), J2kError> {
        if self.data.len() >= 2
            && u16::from_be_bytes([self.data[0], self.data[1]])
                == JpegMarkerCode::StartOfCodestream as u16
        {
            return Ok((self.data, None));
        }
        let contents = Jp2Reader::new(self.data).read_contents()?;
        let range = contents
            .codestream
            .ok_or(J2kError::StartOfCodestreamNotFound)?;
        Ok((&self.data[range], contents.colorspace))
    }

    /// Parses the main header only.
    pub fn read_header(&self) -> Result<J2kCodestreamHeader, J2kError> {
        let (codestream, colorspace) = self.locate_codestream()?;
        let mut reader = JpegStreamReader::new(codestream);
        let mut parser = J2kParser::new(&mut reader);
        parser.parse_main_header(&self.options)?;
        let mut header = parser.header;
        header.colorspace = colorspace;
        let transform = header
            .coding
            .cod
            .as_ref()
            .is_some_and(|cod| cod.multiple_component_transform != 0);
        flag_ambiguous_transform(&mut header, transform);
        Ok(header)
    }

    pub fn decode(&self) -> Result<DecodedImage, J2kError> {
        let (codestream, colorspace) = self.locate_codestream()?;
        let mut reader = JpegStreamReader::new(codestream);
        let mut parser = J2kParser::new(&mut reader);
        parser.parse_main_header(&self.options)?;
        parser.header.colorspace = colorspace;
        self.check_coding_options(&parser.header)?;

        let mut budget = MemoryBudget::new(self.options.max_memory_bytes);
        let tile_count = parser.header.tile_count();
        budget.reserve(
            (tile_count as u64).saturating_mul(std::mem::size_of::<DecodedTile>() as u64),
            "tile table",
        )?;
        let mut tiles = BTreeMap::new();
        let mut recovery = Recovery {
            allowed: false,
            error: None,
        };

        let parsed = self.read_tile_parts(codestream, &mut parser, &mut tiles, &mut budget);
        let transform = parser
            .header
            .coding
            .cod
            .as_ref()
            .is_some_and(|cod| cod.multiple_component_transform != 0)
            || tiles
                .values()
                .any(|state| state.tile.cod.multiple_component_transform != 0);
        flag_ambiguous_transform(&mut parser.header, transform);
        // Tile headers may declare options that rule recovery out.
        recovery.allowed = !self.options.strict && parser.header.unsupported_options.is_empty();
        if let Err(error) = parsed {
            recovery.absorb(error)?;
        }

        let header = parser.header;
        let mut decoded = Vec::with_capacity(tile_count);
        for index in 0..tile_count {
            let tile = match tiles.remove(&index) {
                Some(state) => state.tile,
                None => {
                    debug!("Tile {} has no data", index);
                    build_tile(
                        index,
                        header.siz.tile_bounds(index),
                        &header.components,
                        header.coding.resolve_cod(&header.coding)?,
                        header
                            .coding
                            .resolve_components(&header.coding, header.components.len())?,
                        &mut budget,
                    )?
                }
            };
            decoded.push(transform_tile(
                codestream,
                &tile,
                &header.components,
                colorspace,
                &mut budget,
                &mut recovery,
            )?);
        }

        Ok(DecodedImage {
            width: header.siz.image_width(),
            height: header.siz.image_height(),
            components: header.components,
            tiles: decoded,
            colorspace,
            recovered_error: recovery.error,
        })
    }

    fn check_coding_options(&self, header: &J2kCodestreamHeader) -> Result<(), J2kError> {
        if self.options.strict && !header.unsupported_options.is_empty() {
            return Err(J2kError::UnsupportedFeature(format!(
                "Unsupported COD options ({})",
                header.unsupported_options.join(", ")
            )));
        }
        Ok(())
    }

    fn read_tile_parts(
        &self,
        codestream: &[u8],
        parser: &mut J2kParser,
        tiles: &mut BTreeMap<usize, TileState>,
        budget: &mut MemoryBudget,
    ) -> Result<(), J2kError> {
        while let Some(part) = parser.next_tile_part()? {
            self.check_coding_options(&parser.header)?;
            let state = match tiles.entry(part.tile_index) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    entry.insert(initialize_tile(&parser.header, &part, budget)?)
                }
            };
            let packets = parse_tile_packets(
                codestream,
                part.data.start,
                part.data.end,
                &mut state.tile,
                &mut state.sequencer,
                budget,
            )?;
            debug!(
                "Tile {} part {}: {} packets",
                part.tile_index, part.part_index, packets
            );
        }
        Ok(())
    }
}

const AMBIGUOUS_TRANSFORM: &str = "component transform on 4 components without a colorspace";

/// With four components and no JP2 colorspace the component transform is
/// skipped (see `transform_tile`); such a stream cannot be recovered.
fn flag_ambiguous_transform(header: &mut J2kCodestreamHeader, transform: bool) {
    if transform
        && header.components.len() == 4
        && header.colorspace.is_none()
        && !header.unsupported_options.contains(&AMBIGUOUS_TRANSFORM)
    {
        warn!("Unsupported option: {}", AMBIGUOUS_TRANSFORM);
        header.unsupported_options.push(AMBIGUOUS_TRANSFORM);
    }
}

/// Geometry and packet order of a tile, from its first tile-part.
fn initialize_tile(
    header: &J2kCodestreamHeader,
    part: &TilePart,
    budget: &mut MemoryBudget,
) -> Result<TileState, J2kError> {
    let cod = part.coding.resolve_cod(&header.coding)?;
    let styles = part
        .coding
        .resolve_components(&header.coding, header.components.len())?;
    let tile = build_tile(
        part.tile_index,
        header.siz.tile_bounds(part.tile_index),
        &header.components,
        cod,
        styles,
        budget,
    )?;
    let sequencer = PacketSequencer::new(&tile);
    Ok(TileState { tile, sequencer })
}

fn transform_tile(
    data: &[u8],
    tile: &J2kTile,
    infos: &[J2kComponentInfo],
    colorspace: Option<Jp2Colorspace>,
    budget: &mut MemoryBudget,
    recovery: &mut Recovery,
) -> Result<DecodedTile, J2kError> {
    let mut samples = Vec::with_capacity(tile.components.len());
    for (component, info) in tile.components.iter().zip(infos) {
        let plane = if component.coding.reversible {
            ComponentSamples::Integer(reconstruct::<Reversible53>(
                data, component, info, budget, recovery,
            )?)
        } else {
            ComponentSamples::Float(reconstruct::<Irreversible97>(
                data, component, info, budget, recovery,
            )?)
        };
        samples.push(plane);
    }

    let bypass = samples.len() == 4 && colorspace.is_none();
    if tile.cod.multiple_component_transform != 0 && bypass {
        debug!("Tile {}: component transform skipped", tile.index);
    } else if tile.cod.multiple_component_transform != 0 {
        let reversible = tile
            .components
            .first()
            .map(|c| c.coding.reversible)
            .unwrap_or(true);
        apply_inverse(&mut samples, reversible)?;
    }

    let mut planes = Vec::with_capacity(samples.len());
    for (plane, info) in samples.into_iter().zip(infos) {
        budget.reserve(
            (plane.len() * std::mem::size_of::<i32>()) as u64,
            "tile planes",
        )?;
        planes.push(level_shift(plane, info));
    }

    let first = tile
        .components
        .first()
        .ok_or_else(|| J2kError::InvalidData("Tile without components".to_string()))?;
    Ok(DecodedTile {
        index: tile.index,
        left: first.x0,
        top: first.y0,
        width: first.x1 - first.x0,
        height: first.y1 - first.y0,
        planes,
    })
}

/// Dequantizes every subband of `component` and runs the wavelet synthesis.
fn reconstruct<W: Wavelet>(
    data: &[u8],
    component: &TileComponent,
    info: &J2kComponentInfo,
    budget: &mut MemoryBudget,
    recovery: &mut Recovery,
) -> Result<Vec<W::Sample>, J2kError> {
    let reversible = component.coding.reversible;
    let segmentation_symbols = component.coding.block_style.segmentation_symbols;
    let sample_size = std::mem::size_of::<W::Sample>() as u64;

    let mut levels = Vec::with_capacity(component.resolutions.len());
    let mut reserved = 0;
    let mut band = 0;
    for resolution in &component.resolutions {
        let (width, height) = (resolution.width(), resolution.height());
        let bytes = (width * height) as u64 * sample_size;
        budget.reserve(bytes, "coefficient planes")?;
        reserved += bytes;

        let mut items = vec![W::Sample::default(); width * height];
        for subband in &resolution.subbands {
            let dequantizer = Dequantizer::for_subband(
                &component.quantization,
                info.depth,
                reversible,
                resolution.level,
                band,
                subband.orientation,
            )?;
            band += 1;
            copy_coefficients::<W>(
                data,
                &mut items,
                width,
                height,
                subband,
                &dequantizer,
                segmentation_symbols,
                budget,
                recovery,
            )?;
        }
        levels.push(Level {
            width,
            height,
            items,
        });
    }

    let result = synthesize::<W>(levels, component.x0, component.y0)
        .ok_or_else(|| J2kError::InvalidData("Tile-component without resolutions".to_string()))?;
    budget.release(reserved);
    Ok(result.items)
}

/// Tier-1 decodes the code-blocks of `subband` into the level buffer. High
/// bands land directly on their interleaved positions (F.3.3).
#[allow(clippy::too_many_arguments)]
fn copy_coefficients<W: Wavelet>(
    data: &[u8],
    items: &mut [W::Sample],
    level_width: usize,
    level_height: usize,
    subband: &Subband,
    dequantizer: &Dequantizer,
    segmentation_symbols: bool,
    budget: &mut MemoryBudget,
    recovery: &mut Recovery,
) -> Result<(), J2kError> {
    let interleave = subband.orientation != SubbandOrientation::LL;
    let right = usize::from(subband.orientation.is_high_horizontal());
    let bottom = usize::from(subband.orientation.is_high_vertical());

    for (index, codeblock) in subband.codeblocks.iter().enumerate() {
        let (width, height) = (codeblock.width(), codeblock.height());
        if width == 0 || height == 0 || codeblock.segments.is_empty() {
            continue;
        }

        let passes = codeblock.coding_passes();
        let available = dequantizer.max_coding_passes(codeblock.zero_bit_planes);
        if passes > available {
            recovery.absorb(J2kError::CodingPassMismatch {
                codeblock: index,
                declared: passes,
                available,
            })?;
            continue;
        }

        let mut encoded = Vec::new();
        for segment in &codeblock.segments {
            let bytes = data
                .get(segment.start..segment.end)
                .ok_or(J2kError::NeedMoreData)?;
            encoded.extend_from_slice(bytes);
        }

        let storage = BitModel::storage_bytes(width, height, dequantizer.mb);
        budget.reserve(storage, "code-block state")?;
        let decoder = MqDecoder::new(&encoded, 0, encoded.len());
        let mut model = BitModel::new(
            width,
            height,
            subband.orientation,
            codeblock.zero_bit_planes,
            dequantizer.mb,
            decoder,
        );
        let decoded = model.decode_passes(passes, segmentation_symbols, index);
        budget.release(storage);
        if let Err(error) = decoded {
            recovery.absorb(error)?;
            continue;
        }

        let x0 = (codeblock.x0 - subband.x0) as usize;
        let y0 = (codeblock.y0 - subband.y0) as usize;
        let mut position = 0;
        for j in 0..height {
            for k in 0..width {
                let magnitude = model.magnitude(position);
                if magnitude != 0 {
                    let (x, y) = if interleave {
                        (2 * (x0 + k) + right, 2 * (y0 + j) + bottom)
                    } else {
                        (x0 + k, y0 + j)
                    };
                    if x < level_width && y < level_height {
                        let value = dequantizer.apply(
                            magnitude,
                            model.sign(position) != 0,
                            model.bits_decoded(position),
                        );
                        items[y * level_width + x] = W::from_coefficient(value);
                    }
                }
                position += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal one-tile codestream: `width` x `height`, one component of
    /// Ssiz `ssiz`, no decomposition, 5-3, and a tile body of `body`.
    fn codestream(width: u32, height: u32, ssiz: u8, body: &[u8]) -> Vec<u8> {
        tiled_codestream(width, height, (width, height), ssiz, body)
    }

    /// As `codestream`, on a grid of `tile` sized tiles; `body` goes to
    /// tile 0.
    fn tiled_codestream(
        width: u32,
        height: u32,
        tile: (u32, u32),
        ssiz: u8,
        body: &[u8],
    ) -> Vec<u8> {
        let mut data = vec![0xFF, 0x4F, 0xFF, 0x51, 0x00, 0x29, 0x00, 0x00];
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&tile.0.to_be_bytes());
        data.extend_from_slice(&tile.1.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&[0x00, 0x01, ssiz, 0x01, 0x01]);
        // COD: LRCP, one layer, no MCT, no levels, 64x64 blocks, 5-3
        data.extend_from_slice(&[
            0xFF, 0x52, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x04, 0x04, 0x00, 0x01,
        ]);
        // QCD: two guard bits, exponent 8
        data.extend_from_slice(&[0xFF, 0x5C, 0x00, 0x04, 0x40, 0x40]);
        let psot = 14 + body.len() as u32;
        data.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00]);
        data.extend_from_slice(&psot.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01, 0xFF, 0x93]);
        data.extend_from_slice(body);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn test_empty_packet_gives_mid_grey() {
        let data = codestream(4, 4, 7, &[0x00]);
        let image = J2kDecoder::new(&data, DecodeOptions::default())
            .decode()
            .unwrap();
        assert_eq!((image.width, image.height), (4, 4));
        assert_eq!(image.tiles.len(), 1);
        assert_eq!(image.tiles[0].planes, vec![vec![128; 16]]);
        assert_eq!(image.recovered_error, None);
        assert_eq!(image.to_interleaved_u8().unwrap(), vec![128u8; 16]);
    }

    #[test]
    fn test_signed_component_decodes_to_zero() {
        let data = codestream(4, 4, 0x87, &[0x00]);
        let image = J2kDecoder::new(&data, DecodeOptions::default())
            .decode()
            .unwrap();
        assert_eq!(image.tiles[0].planes, vec![vec![0; 16]]);
        assert!(image.components[0].is_signed);
    }

    #[test]
    fn test_read_header_only() {
        let data = codestream(7, 3, 11, &[0x00]);
        let header = J2kDecoder::new(&data, DecodeOptions::default())
            .read_header()
            .unwrap();
        assert_eq!(header.siz.image_width(), 7);
        assert_eq!(header.components[0].depth, 12);
        assert_eq!(header.colorspace, None);
    }

    #[test]
    fn test_trailing_packet_data_is_fatal_when_strict() {
        // one empty packet, then a byte no packet accounts for
        let data = codestream(4, 4, 7, &[0x00, 0x00]);
        let strict = J2kDecoder::new(&data, DecodeOptions::default()).decode();
        assert!(matches!(strict, Err(J2kError::InvalidData(_))));

        let lenient = J2kDecoder::new(&data, DecodeOptions::default().with_strict(false))
            .decode()
            .unwrap();
        assert!(matches!(
            lenient.recovered_error,
            Some(J2kError::InvalidData(_))
        ));
        assert_eq!(lenient.tiles[0].planes, vec![vec![128; 16]]);
    }

    #[test]
    fn test_memory_budget_applies() {
        let data = codestream(64, 64, 7, &[0x00]);
        let options = DecodeOptions::default().with_max_memory_bytes(1024);
        assert!(matches!(
            J2kDecoder::new(&data, options).decode(),
            Err(J2kError::ResourceLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_tile_table_counts_against_budget() {
        // 4000x4000 in 1x1 tiles
        let data = tiled_codestream(4000, 4000, (1, 1), 7, &[0x00]);
        let options = DecodeOptions::default().with_max_memory_bytes(1 << 20);
        assert!(matches!(
            J2kDecoder::new(&data, options).decode(),
            Err(J2kError::ResourceLimitExceeded {
                what: "tile table",
                ..
            })
        ));
    }

    #[test]
    fn test_to_u8_scaling() {
        let info = |depth, is_signed| J2kComponentInfo {
            depth,
            is_signed,
            dx: 1,
            dy: 1,
            ..Default::default()
        };
        assert_eq!(to_u8(4095, &info(12, false)), 255);
        assert_eq!(to_u8(2048, &info(12, false)), 128);
        assert_eq!(to_u8(1, &info(1, false)), 128);
        assert_eq!(to_u8(-128, &info(8, true)), 0);
        assert_eq!(to_u8(0, &info(8, true)), 128);
    }

    #[test]
    fn test_interleave_composes_tiles() {
        let info = J2kComponentInfo {
            depth: 8,
            dx: 1,
            dy: 1,
            x1: 3,
            y1: 1,
            ..Default::default()
        };
        let image = DecodedImage {
            width: 3,
            height: 1,
            components: vec![info.clone(), info],
            tiles: vec![
                DecodedTile {
                    index: 0,
                    left: 0,
                    top: 0,
                    width: 2,
                    height: 1,
                    planes: vec![vec![1, 2], vec![10, 20]],
                },
                DecodedTile {
                    index: 1,
                    left: 2,
                    top: 0,
                    width: 1,
                    height: 1,
                    planes: vec![vec![3], vec![30]],
                },
            ],
            colorspace: None,
            recovered_error: None,
        };
        assert_eq!(
            image.to_interleaved_u8().unwrap(),
            vec![1, 10, 2, 20, 3, 30]
        );
    }
}
