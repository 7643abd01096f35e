//! Tier-2: packet headers and code-block data ranges (B.9, B.10).

use log::trace;

use super::bit_io::J2kBitReader;
use super::geometry::{CodeBlockSegment, J2kTile, Precinct, Resolution};
use super::limits::MemoryBudget;
use super::progression::{Packet, PacketSequencer};
use super::tag_tree::{node_count, InclusionTree, TagTree};
use crate::error::J2kError;
use crate::jpeg_marker_code::{END_OF_PACKET_HEADER_BYTE, START_OF_PACKET_BYTE};

/// Bytes skipped after an SOP marker: Lsop and Nsop.
const SOP_SEGMENT_LENGTH: usize = 4;

/// One code-block's share of a packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution {
    pub subband: usize,
    pub codeblock: usize,
    pub coding_passes: u32,
    pub length: usize,
}

/// Decoded packet header. An empty packet has no contributions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet: Packet,
    pub contributions: Vec<Contribution>,
}

/// Table B.4 codeword for the number of coding passes.
pub fn read_coding_passes(reader: &mut J2kBitReader) -> Result<u32, J2kError> {
    if reader.read_bit()? == 0 {
        return Ok(1);
    }
    if reader.read_bit()? == 0 {
        return Ok(2);
    }
    let value = reader.read_bits(2)?;
    if value < 3 {
        return Ok(value + 3);
    }
    let value = reader.read_bits(5)?;
    if value < 31 {
        return Ok(value + 6);
    }
    Ok(reader.read_bits(7)? + 37)
}

fn ensure_trees(
    precinct: &mut Precinct,
    layer: u32,
    budget: &mut MemoryBudget,
) -> Result<(), J2kError> {
    if precinct.inclusion_tree.is_none() {
        let (width, height) = precinct.grid_size();
        let nodes = node_count(width, height) as u64;
        budget.reserve(nodes * 2 * std::mem::size_of::<u32>() as u64, "tag trees")?;
        precinct.inclusion_tree = Some(InclusionTree::new(width, height, layer));
        precinct.zero_bit_planes_tree = Some(TagTree::new(width, height));
    }
    Ok(())
}

impl PacketHeader {
    /// Reads the header of `packet` and updates the code-block state of
    /// `resolution`: inclusion, zero bit-planes and Lblock.
    pub fn read(
        reader: &mut J2kBitReader,
        resolution: &mut Resolution,
        packet: Packet,
        budget: &mut MemoryBudget,
    ) -> Result<Self, J2kError> {
        let mut header = PacketHeader {
            packet,
            contributions: Vec::new(),
        };
        if reader.read_bit()? == 0 {
            return Ok(header);
        }

        let layer = packet.layer;
        let level = resolution.level;
        for (s, subband) in resolution.subbands.iter_mut().enumerate() {
            let Some(precinct) = subband.precincts.get_mut(&packet.precinct) else {
                continue;
            };
            for n in 0..precinct.codeblocks.len() {
                let index = precinct.codeblocks[n];
                let codeblock = &mut subband.codeblocks[index];
                let column = (codeblock.cbx - precinct.cbx_min) as usize;
                let row = (codeblock.cby - precinct.cby_min) as usize;

                let mut first_inclusion = false;
                let included = if codeblock.included {
                    reader.read_bit()? != 0
                } else {
                    ensure_trees(precinct, layer, budget)?;
                    let tree = precinct.inclusion_tree.as_mut().ok_or(
                        J2kError::MissingInclusionTree {
                            resolution: level,
                            precinct: packet.precinct,
                        },
                    )?;
                    let mut included = false;
                    if tree.reset(column, row, layer) {
                        loop {
                            if reader.read_bit()? != 0 {
                                if !tree.next_level() {
                                    codeblock.included = true;
                                    included = true;
                                    first_inclusion = true;
                                    break;
                                }
                            } else {
                                tree.increment_value(layer);
                                break;
                            }
                        }
                    }
                    included
                };
                if !included {
                    continue;
                }

                if first_inclusion {
                    let tree = precinct.zero_bit_planes_tree.as_mut().ok_or(
                        J2kError::MissingInclusionTree {
                            resolution: level,
                            precinct: packet.precinct,
                        },
                    )?;
                    tree.reset(column, row);
                    loop {
                        if reader.read_bit()? != 0 {
                            if !tree.next_level() {
                                break;
                            }
                        } else {
                            tree.increment_value();
                        }
                    }
                    codeblock.zero_bit_planes = tree.value().unwrap_or(0);
                }

                let coding_passes = read_coding_passes(reader)?;
                while reader.read_bit()? != 0 {
                    codeblock.lblock += 1;
                }
                let bits = codeblock.lblock + (31 - coding_passes.leading_zeros());
                if bits > 32 {
                    return Err(J2kError::InvalidData(format!(
                        "Code-block length field of {} bits",
                        bits
                    )));
                }
                let length = reader.read_bits(bits)? as usize;
                header.contributions.push(Contribution {
                    subband: s,
                    codeblock: index,
                    coding_passes,
                    length,
                });
            }
        }
        Ok(header)
    }
}

/// Parses the packets of one tile-part, `data[start..end]`, appending the
/// byte ranges they carry to the code-blocks of `tile`. Returns the number of
/// packets read.
///
/// Running out of packets ends the tile normally only when the tile-part is
/// used up too. Bytes left after the sequencer is exhausted are an
/// `InvalidData("Out of packets")` error: fatal in strict mode, and in
/// best-effort mode absorbed by the decoder, which keeps the packets already
/// read.
pub fn parse_tile_packets(
    data: &[u8],
    start: usize,
    end: usize,
    tile: &mut J2kTile,
    sequencer: &mut PacketSequencer,
    budget: &mut MemoryBudget,
) -> Result<usize, J2kError> {
    let body = data.get(start..end).ok_or(J2kError::NeedMoreData)?;
    let sop_marker_used = tile.cod.sop_marker_used;
    let eph_marker_used = tile.cod.eph_marker_used;
    let mut reader = J2kBitReader::new(body);
    let mut packets = 0;

    while reader.position() < body.len() {
        reader.align_to_byte();
        if sop_marker_used && reader.skip_marker_if_equal(START_OF_PACKET_BYTE) {
            reader.skip_bytes(SOP_SEGMENT_LENGTH);
        }
        let packet = sequencer
            .next_packet()
            .ok_or_else(|| J2kError::InvalidData("Out of packets".to_string()))?;
        let resolution = tile
            .components
            .get_mut(packet.component)
            .and_then(|c| c.resolutions.get_mut(packet.resolution))
            .ok_or_else(|| J2kError::InvalidData("Packet outside the tile".to_string()))?;

        let header = PacketHeader::read(&mut reader, resolution, packet, budget)?;
        reader.align_to_byte();
        if eph_marker_used {
            reader.skip_marker_if_equal(END_OF_PACKET_HEADER_BYTE);
        }

        let mut position = reader.position();
        for contribution in &header.contributions {
            let segment_end = position + contribution.length;
            if segment_end > body.len() {
                return Err(J2kError::NeedMoreData);
            }
            resolution.subbands[contribution.subband].codeblocks[contribution.codeblock]
                .segments
                .push(CodeBlockSegment {
                    start: start + position,
                    end: start + segment_end,
                    coding_passes: contribution.coding_passes,
                });
            position = segment_end;
        }
        reader.skip_bytes(position - reader.position());

        trace!(
            "Packet l={} c={} r={} p={}: {} contributions",
            packet.layer,
            packet.component,
            packet.resolution,
            packet.precinct,
            header.contributions.len()
        );
        packets += 1;
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::geometry::build_tile;
    use crate::jpeg2000::image::{
        J2kCod, J2kComponentCodingStyle, J2kComponentInfo, J2kImageSize, J2kQuantization,
        TileBounds,
    };

    fn single_block_tile(layers: u16, sop: bool, eph: bool) -> J2kTile {
        let siz = J2kImageSize {
            width: 4,
            height: 4,
            tile_width: 4,
            tile_height: 4,
            component_count: 1,
            ..Default::default()
        };
        let cod = J2kCod {
            sop_marker_used: sop,
            eph_marker_used: eph,
            layer_count: layers,
            ..Default::default()
        };
        let style = J2kComponentCodingStyle {
            xcb: 6,
            ycb: 6,
            ..Default::default()
        };
        build_tile(
            0,
            TileBounds {
                x0: 0,
                y0: 0,
                x1: 4,
                y1: 4,
            },
            &[J2kComponentInfo::new(7, 1, 1, &siz)],
            cod,
            vec![(style, J2kQuantization::default())],
            &mut MemoryBudget::new(u64::MAX),
        )
        .unwrap()
    }

    fn parse(data: &[u8], tile: &mut J2kTile) -> Result<usize, J2kError> {
        let mut sequencer = PacketSequencer::new(tile);
        parse_tile_packets(
            data,
            0,
            data.len(),
            tile,
            &mut sequencer,
            &mut MemoryBudget::new(u64::MAX),
        )
    }

    fn segments(tile: &J2kTile) -> &[CodeBlockSegment] {
        &tile.components[0].resolutions[0].subbands[0].codeblocks[0].segments
    }

    #[test]
    fn test_coding_pass_codewords() {
        // 0 | 10 | 11 11 11111 0000000 | 1100 | 11 11 00000
        let data = [0x5F, 0xF0, 0x19, 0xE0];
        let mut reader = J2kBitReader::new(&data);
        assert_eq!(read_coding_passes(&mut reader).unwrap(), 1);
        assert_eq!(read_coding_passes(&mut reader).unwrap(), 2);
        assert_eq!(read_coding_passes(&mut reader).unwrap(), 37);
        assert_eq!(read_coding_passes(&mut reader).unwrap(), 3);
        assert_eq!(read_coding_passes(&mut reader).unwrap(), 6);
    }

    #[test]
    fn test_single_codeblock_packet() {
        // 1 nonempty, 1 included, 1 zero bit-plane count 0, 0 one pass,
        // 0 no Lblock increase, 011 three bytes of data
        let data = [0b1110_0011, 0xAA, 0xBB, 0xCC];
        let mut tile = single_block_tile(1, false, false);
        assert_eq!(parse(&data, &mut tile).unwrap(), 1);
        let block = &tile.components[0].resolutions[0].subbands[0].codeblocks[0];
        assert!(block.included);
        assert_eq!(block.zero_bit_planes, 0);
        assert_eq!(
            segments(&tile),
            &[CodeBlockSegment {
                start: 1,
                end: 4,
                coding_passes: 1
            }]
        );
    }

    #[test]
    fn test_zero_bit_planes_from_tag_tree() {
        // nonempty, included, zero bit-planes 0 0 1 = 2, one pass, length 1
        let data = [0b1100_1000, 0b0100_0000, 0x55];
        let mut tile = single_block_tile(1, false, false);
        parse(&data, &mut tile).unwrap();
        let block = &tile.components[0].resolutions[0].subbands[0].codeblocks[0];
        assert_eq!(block.zero_bit_planes, 2);
        assert_eq!(segments(&tile)[0].start, 2);
    }

    #[test]
    fn test_empty_packet_then_contribution_in_later_layer() {
        // layer 0: empty packet; layer 1: included with one pass of one byte
        let data = [0x00, 0b1110_0001, 0x42];
        let mut tile = single_block_tile(2, false, false);
        assert_eq!(parse(&data, &mut tile).unwrap(), 2);
        assert_eq!(
            segments(&tile),
            &[CodeBlockSegment {
                start: 2,
                end: 3,
                coding_passes: 1
            }]
        );
    }

    #[test]
    fn test_sop_and_eph_markers_are_skipped() {
        let data = [
            0xFF, 0x91, 0x00, 0x04, 0x00, 0x00, // SOP
            0b1110_0001, // header
            0xFF, 0x92, // EPH
            0x42,
        ];
        let mut tile = single_block_tile(1, true, true);
        parse(&data, &mut tile).unwrap();
        assert_eq!(segments(&tile)[0].start, 9);
        assert_eq!(segments(&tile)[0].end, 10);
    }

    #[test]
    fn test_body_past_tile_part_is_an_error() {
        let data = [0b1110_0010, 0xAA];
        let mut tile = single_block_tile(1, false, false);
        assert_eq!(parse(&data, &mut tile), Err(J2kError::NeedMoreData));
    }

    #[test]
    fn test_extra_data_runs_out_of_packets() {
        let data = [0x00, 0x00];
        let mut tile = single_block_tile(1, false, false);
        assert!(matches!(
            parse(&data, &mut tile),
            Err(J2kError::InvalidData(message)) if message == "Out of packets"
        ));
    }
}
