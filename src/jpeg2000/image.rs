//! Marker-level parameter records (SIZ, COD/COC, QCD/QCC).

use num_enum::TryFromPrimitive;

/// Image and tile size (SIZ marker) on the reference grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kImageSize {
    /// Xsiz: width of the reference grid.
    pub width: u32,
    /// Ysiz: height of the reference grid.
    pub height: u32,
    /// Horizontal offset of the image area on the reference grid.
    pub x_origin: u32,
    /// Vertical offset of the image area on the reference grid.
    pub y_origin: u32,
    /// Width of an individual tile.
    pub tile_width: u32,
    /// Height of an individual tile.
    pub tile_height: u32,
    /// Horizontal offset of the first tile on the reference grid.
    pub tile_x_origin: u32,
    /// Vertical offset of the first tile on the reference grid.
    pub tile_y_origin: u32,
    /// Csiz
    pub component_count: u16,
}

/// Tile rectangle on the reference grid, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl J2kImageSize {
    /// Width of the image area.
    pub fn image_width(&self) -> u32 {
        self.width - self.x_origin
    }

    pub fn image_height(&self) -> u32 {
        self.height - self.y_origin
    }

    pub fn tile_columns(&self) -> u32 {
        (self.width - self.tile_x_origin).div_ceil(self.tile_width)
    }

    pub fn tile_rows(&self) -> u32 {
        (self.height - self.tile_y_origin).div_ceil(self.tile_height)
    }

    pub fn tile_count(&self) -> usize {
        self.tile_columns() as usize * self.tile_rows() as usize
    }

    /// B.3: tile `index` clipped to the image area.
    pub fn tile_bounds(&self, index: usize) -> TileBounds {
        let columns = self.tile_columns() as usize;
        let p = (index % columns) as u32;
        let q = (index / columns) as u32;
        TileBounds {
            x0: (self.tile_x_origin + p * self.tile_width).max(self.x_origin),
            y0: (self.tile_y_origin + q * self.tile_height).max(self.y_origin),
            x1: (self.tile_x_origin + (p + 1) * self.tile_width).min(self.width),
            y1: (self.tile_y_origin + (q + 1) * self.tile_height).min(self.height),
        }
    }
}

/// Metadata for a single component from the SIZ marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kComponentInfo {
    /// bit depth (1..=38)
    pub depth: u8,
    /// true if signed, false if unsigned
    pub is_signed: bool,
    /// Horizontal subsampling factor
    pub dx: u8,
    /// Vertical subsampling factor
    pub dy: u8,
    /// Component bounds (B.2), end exclusive.
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl J2kComponentInfo {
    /// Builds a component from its Ssiz/XRsiz/YRsiz bytes.
    pub fn new(ssiz: u8, dx: u8, dy: u8, siz: &J2kImageSize) -> Self {
        let dx = dx.max(1);
        let dy = dy.max(1);
        Self {
            depth: (ssiz & 0x7F) + 1,
            is_signed: (ssiz & 0x80) != 0,
            dx,
            dy,
            x0: siz.x_origin.div_ceil(dx as u32),
            y0: siz.y_origin.div_ceil(dy as u32),
            x1: siz.width.div_ceil(dx as u32),
            y1: siz.height.div_ceil(dy as u32),
        }
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// Progression order (Table A.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    /// Layer-resolution-component-position
    #[default]
    Lrcp = 0,
    /// Resolution-layer-component-position
    Rlcp = 1,
    /// Resolution-position-component-layer
    Rpcl = 2,
    /// Position-component-resolution-layer
    Pcrl = 3,
    /// Component-position-resolution-layer
    Cprl = 4,
}

impl ProgressionOrder {
    pub fn name(self) -> &'static str {
        match self {
            ProgressionOrder::Lrcp => "LRCP",
            ProgressionOrder::Rlcp => "RLCP",
            ProgressionOrder::Rpcl => "RPCL",
            ProgressionOrder::Pcrl => "PCRL",
            ProgressionOrder::Cprl => "CPRL",
        }
    }
}

/// Orientation of a wavelet subband.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum SubbandOrientation {
    /// Low-Low (base image)
    #[default]
    LL = 0,
    /// High-Low (horizontal details)
    HL = 1,
    /// Low-High (vertical details)
    LH = 2,
    /// High-High (diagonal details)
    HH = 3,
}

impl SubbandOrientation {
    /// Table E.1 nominal gain, log2.
    pub fn gain_log2(self) -> i32 {
        match self {
            SubbandOrientation::LL => 0,
            SubbandOrientation::HL | SubbandOrientation::LH => 1,
            SubbandOrientation::HH => 2,
        }
    }

    /// Column parity of the band in the interleaved level buffer.
    pub fn is_high_horizontal(self) -> bool {
        matches!(self, SubbandOrientation::HL | SubbandOrientation::HH)
    }

    /// Row parity of the band in the interleaved level buffer.
    pub fn is_high_vertical(self) -> bool {
        matches!(self, SubbandOrientation::LH | SubbandOrientation::HH)
    }
}

/// Code-block style flags (Table A.19).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeBlockStyle {
    pub selective_bypass: bool,
    pub reset_context_probabilities: bool,
    pub termination_on_each_pass: bool,
    pub vertically_causal: bool,
    pub predictable_termination: bool,
    pub segmentation_symbols: bool,
}

impl CodeBlockStyle {
    pub fn from_byte(b: u8) -> Self {
        Self {
            selective_bypass: b & 0x01 != 0,
            reset_context_probabilities: b & 0x02 != 0,
            termination_on_each_pass: b & 0x04 != 0,
            vertically_causal: b & 0x08 != 0,
            predictable_termination: b & 0x10 != 0,
            segmentation_symbols: b & 0x20 != 0,
        }
    }

    /// Names of the set options this decoder cannot honour.
    pub fn unsupported_options(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.selective_bypass {
            names.push("selectiveArithmeticCodingBypass");
        }
        if self.reset_context_probabilities {
            names.push("resetContextProbabilities");
        }
        if self.termination_on_each_pass {
            names.push("terminationOnEachCodingPass");
        }
        if self.vertically_causal {
            names.push("verticallyStripe");
        }
        if self.predictable_termination {
            names.push("predictableTermination");
        }
        names
    }
}

/// Precinct size exponents for one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecinctSize {
    pub ppx: u8,
    pub ppy: u8,
}

impl PrecinctSize {
    pub fn from_byte(b: u8) -> Self {
        Self {
            ppx: b & 0x0F,
            ppy: b >> 4,
        }
    }
}

/// Coding style parameters that COC may override per component.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct J2kComponentCodingStyle {
    /// Scod/Scoc bit 0.
    pub custom_precincts: bool,
    pub decomposition_levels: u8,
    /// Code-block width exponent (xcb + 2).
    pub xcb: u8,
    /// Code-block height exponent (ycb + 2).
    pub ycb: u8,
    pub block_style: CodeBlockStyle,
    /// 5-3 filter when true, 9-7 otherwise.
    pub reversible: bool,
    pub precinct_sizes: Vec<PrecinctSize>,
}

impl J2kComponentCodingStyle {
    /// Precinct exponents for resolution `r`; 15 when precincts are not
    /// signalled.
    pub fn precinct_size(&self, r: usize) -> PrecinctSize {
        if self.custom_precincts {
            if let Some(size) = self.precinct_sizes.get(r) {
                return *size;
            }
        }
        PrecinctSize { ppx: 15, ppy: 15 }
    }
}

/// Coding Style Default (COD) marker information
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct J2kCod {
    pub sop_marker_used: bool,
    pub eph_marker_used: bool,
    pub progression_order: ProgressionOrder,
    pub layer_count: u16,
    pub multiple_component_transform: u8,
    pub component: J2kComponentCodingStyle,
}

/// Quantization style (Table A.28).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum QuantizationStyle {
    #[default]
    NoQuantization = 0,
    ScalarDerived = 1,
    ScalarExpounded = 2,
}

/// Exponent/mantissa pair of one subband step size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepSize {
    pub exponent: u8,
    pub mantissa: u16,
}

/// Quantization Default/Component (QCD/QCC) marker information
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct J2kQuantization {
    pub style: QuantizationStyle,
    pub guard_bits: u8,
    pub step_sizes: Vec<StepSize>,
}

impl J2kQuantization {
    /// One entry per subband, as opposed to a single derived entry.
    pub fn is_expounded(&self) -> bool {
        self.style != QuantizationStyle::ScalarDerived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn siz(width: u32, height: u32, tile: u32) -> J2kImageSize {
        J2kImageSize {
            width,
            height,
            tile_width: tile,
            tile_height: tile,
            component_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_tile_grid() {
        let s = siz(100, 50, 32);
        assert_eq!(s.tile_columns(), 4);
        assert_eq!(s.tile_rows(), 2);
        assert_eq!(s.tile_count(), 8);
        assert_eq!(
            s.tile_bounds(3),
            TileBounds {
                x0: 96,
                y0: 0,
                x1: 100,
                y1: 32
            }
        );
        assert_eq!(s.tile_bounds(4).y1, 50);
    }

    #[test]
    fn test_component_bounds_with_subsampling() {
        let mut s = siz(9, 7, 9);
        s.x_origin = 1;
        let c = J2kComponentInfo::new(0x87, 2, 2, &s);
        assert_eq!(c.depth, 8);
        assert!(c.is_signed);
        assert_eq!((c.x0, c.x1, c.y0, c.y1), (1, 5, 0, 4));
        assert_eq!((c.width(), c.height()), (4, 4));
    }

    #[test]
    fn test_code_block_style_flags() {
        let style = CodeBlockStyle::from_byte(0x21);
        assert!(style.selective_bypass);
        assert!(style.segmentation_symbols);
        assert_eq!(
            style.unsupported_options(),
            vec!["selectiveArithmeticCodingBypass"]
        );
        assert!(CodeBlockStyle::from_byte(0x20)
            .unsupported_options()
            .is_empty());
    }

    #[test]
    fn test_precinct_size_defaults() {
        let mut style = J2kComponentCodingStyle::default();
        assert_eq!(style.precinct_size(2), PrecinctSize { ppx: 15, ppy: 15 });
        style.custom_precincts = true;
        style.precinct_sizes = vec![PrecinctSize::from_byte(0x77), PrecinctSize::from_byte(0x88)];
        assert_eq!(style.precinct_size(1), PrecinctSize { ppx: 8, ppy: 8 });
    }

    #[test]
    fn test_enums_from_bytes() {
        assert_eq!(ProgressionOrder::try_from(2).ok(), Some(ProgressionOrder::Rpcl));
        assert!(ProgressionOrder::try_from(5).is_err());
        assert_eq!(ProgressionOrder::Cprl.name(), "CPRL");
        assert_eq!(SubbandOrientation::try_from(3).ok(), Some(SubbandOrientation::HH));
        assert_eq!(SubbandOrientation::HH.gain_log2(), 2);
        assert!(QuantizationStyle::try_from(3).is_err());
    }
}
