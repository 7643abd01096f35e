use num_enum::TryFromPrimitive;

/// JPEG 2000 codestream markers (ISO/IEC 15444-1 Annex A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum JpegMarkerCode {
    /// SOC: Start of codestream.
    StartOfCodestream = 0xFF4F,

    /// SIZ: Image and tile size.
    ImageAndTileSize = 0xFF51,

    /// COD: Coding style default.
    CodingStyleDefault = 0xFF52,
    /// COC: Coding style component.
    CodingStyleComponent = 0xFF53,

    /// TLM: Tile-part lengths.
    TilePartLengths = 0xFF55,
    /// PLM: Packet length, main header.
    PacketLengthMain = 0xFF57,
    /// PLT: Packet length, tile-part header.
    PacketLengthTilePart = 0xFF58,

    /// QCD: Quantization default.
    QuantizationDefault = 0xFF5C,
    /// QCC: Quantization component.
    QuantizationComponent = 0xFF5D,

    /// RGN: Region of interest.
    RegionOfInterest = 0xFF5E,
    /// POC: Progression order change.
    ProgressionOrderChange = 0xFF5F,
    /// PPM: Packed packet headers, main header.
    PackedPacketHeadersMain = 0xFF60,
    /// PPT: Packed packet headers, tile-part header.
    PackedPacketHeadersTilePart = 0xFF61,

    /// CRG: Component registration.
    ComponentRegistration = 0xFF63,
    /// COM: Comment.
    Comment = 0xFF64,

    /// SOT: Start of tile-part.
    StartOfTile = 0xFF90,
    /// SOP: Start of packet.
    StartOfPacket = 0xFF91,
    /// EPH: End of packet header.
    EndOfPacketHeader = 0xFF92,
    /// SOD: Start of data.
    StartOfData = 0xFF93,

    /// EOC: End of codestream.
    EndOfCodestream = 0xFFD9,
}

impl JpegMarkerCode {
    /// Informational segments that can be skipped by their declared length.
    pub fn is_skippable(self) -> bool {
        matches!(
            self,
            Self::TilePartLengths
                | Self::PacketLengthMain
                | Self::PacketLengthTilePart
                | Self::ComponentRegistration
                | Self::Comment
        )
    }
}

pub const JPEG_MARKER_START_BYTE: u8 = 0xFF;

/// Second byte of the SOP marker as it appears inside packet data.
pub const START_OF_PACKET_BYTE: u8 = 0x91;
/// Second byte of the EPH marker as it appears inside packet data.
pub const END_OF_PACKET_HEADER_BYTE: u8 = 0x92;
