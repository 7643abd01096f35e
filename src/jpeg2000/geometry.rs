//! Tile geometry (ISO/IEC 15444-1 Annex B).
//!
//! Records are owned strictly top-down: tile, tile-component, resolution,
//! subband, code-block. A code-block refers to its precinct by number and
//! each subband keeps its precincts in a map keyed by that number, together
//! with the indices of the code-blocks they contain.

use std::collections::BTreeMap;

use log::debug;

use super::image::{
    J2kCod, J2kComponentCodingStyle, J2kComponentInfo, J2kQuantization, SubbandOrientation,
    TileBounds,
};
use super::limits::MemoryBudget;
use super::tag_tree::{InclusionTree, TagTree};
use crate::error::J2kError;

/// Byte range of one packet's contribution to a code-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockSegment {
    pub start: usize,
    pub end: usize,
    pub coding_passes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Position in the code-block grid of the subband.
    pub cbx: u32,
    pub cby: u32,
    /// Bounds clipped to the subband, end exclusive.
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub precinct: usize,
    /// Length indicator state of the packet headers (B.10.7.1).
    pub lblock: u32,
    pub included: bool,
    pub zero_bit_planes: u32,
    pub segments: Vec<CodeBlockSegment>,
}

impl CodeBlock {
    pub fn width(&self) -> usize {
        (self.x1 - self.x0) as usize
    }

    pub fn height(&self) -> usize {
        (self.y1 - self.y0) as usize
    }

    /// Coding passes declared over all contributions so far.
    pub fn coding_passes(&self) -> u32 {
        self.segments.iter().map(|s| s.coding_passes).sum()
    }
}

/// Code-blocks of one subband that fall in one precinct.
#[derive(Debug, Clone)]
pub struct Precinct {
    pub cbx_min: u32,
    pub cby_min: u32,
    pub cbx_max: u32,
    pub cby_max: u32,
    /// Indices into [`Subband::codeblocks`], row-major.
    pub codeblocks: Vec<usize>,
    pub inclusion_tree: Option<InclusionTree>,
    pub zero_bit_planes_tree: Option<TagTree>,
}

impl Precinct {
    fn new(cbx: u32, cby: u32) -> Self {
        Self {
            cbx_min: cbx,
            cby_min: cby,
            cbx_max: cbx,
            cby_max: cby,
            codeblocks: Vec::new(),
            inclusion_tree: None,
            zero_bit_planes_tree: None,
        }
    }

    fn extend(&mut self, cbx: u32, cby: u32) {
        self.cbx_min = self.cbx_min.min(cbx);
        self.cbx_max = self.cbx_max.max(cbx);
        self.cby_min = self.cby_min.min(cby);
        self.cby_max = self.cby_max.max(cby);
    }

    /// Tag tree leaf grid size.
    pub fn grid_size(&self) -> (usize, usize) {
        (
            (self.cbx_max - self.cbx_min + 1) as usize,
            (self.cby_max - self.cby_min + 1) as usize,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Subband {
    pub orientation: SubbandOrientation,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub codeblock_width_exp: u8,
    pub codeblock_height_exp: u8,
    pub codeblocks: Vec<CodeBlock>,
    pub precincts: BTreeMap<usize, Precinct>,
}

impl Subband {
    pub fn width(&self) -> usize {
        (self.x1 - self.x0) as usize
    }

    pub fn height(&self) -> usize {
        (self.y1 - self.y0) as usize
    }
}

/// Precinct partition of one resolution (B.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrecinctParameters {
    pub width: u64,
    pub height: u64,
    pub num_wide: usize,
    pub num_high: usize,
    /// Precinct size mapped into the subbands of this resolution.
    pub width_in_subband: u64,
    pub height_in_subband: u64,
}

impl PrecinctParameters {
    pub fn count(&self) -> usize {
        self.num_wide * self.num_high
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub level: usize,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub precincts: PrecinctParameters,
    /// LL alone at level 0, otherwise HL, LH and HH in that order.
    pub subbands: Vec<Subband>,
}

impl Resolution {
    pub fn width(&self) -> usize {
        (self.x1 - self.x0) as usize
    }

    pub fn height(&self) -> usize {
        (self.y1 - self.y0) as usize
    }
}

#[derive(Debug, Clone)]
pub struct TileComponent {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub coding: J2kComponentCodingStyle,
    pub quantization: J2kQuantization,
    pub resolutions: Vec<Resolution>,
}

impl TileComponent {
    pub fn width(&self) -> usize {
        (self.x1 - self.x0) as usize
    }

    pub fn height(&self) -> usize {
        (self.y1 - self.y0) as usize
    }

    pub fn decomposition_levels(&self) -> usize {
        self.coding.decomposition_levels as usize
    }
}

#[derive(Debug, Clone)]
pub struct J2kTile {
    pub index: usize,
    pub bounds: TileBounds,
    /// Tile-level coding style: progression, layers, MCT, SOP/EPH.
    pub cod: J2kCod,
    pub components: Vec<TileComponent>,
}

/// Effective precinct and code-block exponents of one resolution (B.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockDimensions {
    ppx: u8,
    ppy: u8,
    xcb: u8,
    ycb: u8,
}

fn block_dimensions(coding: &J2kComponentCodingStyle, r: usize) -> BlockDimensions {
    let size = coding.precinct_size(r);
    let shrink = u8::from(r > 0);
    BlockDimensions {
        ppx: size.ppx,
        ppy: size.ppy,
        xcb: coding.xcb.min(size.ppx.saturating_sub(shrink)),
        ycb: coding.ycb.min(size.ppy.saturating_sub(shrink)),
    }
}

fn ceil_div(value: u32, divisor: u64) -> u32 {
    (value as u64).div_ceil(divisor) as u32
}

/// ceil(value / divisor - 0.5) for the high-pass band coordinates (B-15).
fn ceil_div_half(value: u32, divisor: u64) -> u32 {
    let numerator = 2 * value as i64 - divisor as i64;
    let denominator = 2 * divisor as i64;
    (-(-numerator).div_euclid(denominator)).max(0) as u32
}

fn precinct_parameters(
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    dims: BlockDimensions,
    r: usize,
) -> PrecinctParameters {
    let width = 1u64 << dims.ppx;
    let height = 1u64 << dims.ppy;
    let shrink = u8::from(r > 0);
    let count = |start: u32, end: u32, size: u64| {
        if end > start {
            ((end as u64).div_ceil(size) - start as u64 / size) as usize
        } else {
            0
        }
    };
    PrecinctParameters {
        width,
        height,
        num_wide: count(x0, x1, width),
        num_high: count(y0, y1, height),
        width_in_subband: 1u64 << dims.ppx.saturating_sub(shrink),
        height_in_subband: 1u64 << dims.ppy.saturating_sub(shrink),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_subband(
    orientation: SubbandOrientation,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    dims: BlockDimensions,
    precincts: &PrecinctParameters,
    budget: &mut MemoryBudget,
) -> Result<Subband, J2kError> {
    let cb_width = 1u64 << dims.xcb;
    let cb_height = 1u64 << dims.ycb;
    let cbx0 = (x0 as u64 >> dims.xcb) as u32;
    let cby0 = (y0 as u64 >> dims.ycb) as u32;
    let cbx1 = ((x1 as u64 + cb_width - 1) >> dims.xcb) as u32;
    let cby1 = ((y1 as u64 + cb_height - 1) >> dims.ycb) as u32;

    let grid = (cbx1 - cbx0) as u64 * (cby1 - cby0) as u64;
    budget.reserve(
        grid * std::mem::size_of::<CodeBlock>() as u64,
        "code-block records",
    )?;

    let mut codeblocks = Vec::with_capacity(grid as usize);
    let mut precinct_map: BTreeMap<usize, Precinct> = BTreeMap::new();
    for j in cby0..cby1 {
        for i in cbx0..cbx1 {
            let cx0 = (cb_width * i as u64).max(x0 as u64) as u32;
            let cy0 = (cb_height * j as u64).max(y0 as u64) as u32;
            let cx1 = (cb_width * (i as u64 + 1)).min(x1 as u64) as u32;
            let cy1 = (cb_height * (j as u64 + 1)).min(y1 as u64) as u32;
            if cx1 <= cx0 || cy1 <= cy0 {
                continue;
            }
            let pi = ((cx0 - x0) as u64 / precincts.width_in_subband) as usize;
            let pj = ((cy0 - y0) as u64 / precincts.height_in_subband) as usize;
            let precinct = pi + pj * precincts.num_wide;

            precinct_map
                .entry(precinct)
                .and_modify(|p| p.extend(i, j))
                .or_insert_with(|| Precinct::new(i, j))
                .codeblocks
                .push(codeblocks.len());
            codeblocks.push(CodeBlock {
                cbx: i,
                cby: j,
                x0: cx0,
                y0: cy0,
                x1: cx1,
                y1: cy1,
                precinct,
                lblock: 3,
                included: false,
                zero_bit_planes: 0,
                segments: Vec::new(),
            });
        }
    }

    Ok(Subband {
        orientation,
        x0,
        y0,
        x1,
        y1,
        codeblock_width_exp: dims.xcb,
        codeblock_height_exp: dims.ycb,
        codeblocks,
        precincts: precinct_map,
    })
}

/// B.5: resolutions and subbands of one tile-component.
pub fn build_tile_component(
    bounds: TileBounds,
    info: &J2kComponentInfo,
    coding: J2kComponentCodingStyle,
    quantization: J2kQuantization,
    budget: &mut MemoryBudget,
) -> Result<TileComponent, J2kError> {
    let tcx0 = ceil_div(bounds.x0, info.dx as u64);
    let tcy0 = ceil_div(bounds.y0, info.dy as u64);
    let tcx1 = ceil_div(bounds.x1, info.dx as u64);
    let tcy1 = ceil_div(bounds.y1, info.dy as u64);
    let levels = coding.decomposition_levels as usize;

    let mut resolutions = Vec::with_capacity(levels + 1);
    for r in 0..=levels {
        let dims = block_dimensions(&coding, r);
        let scale = 1u64 << (levels - r);
        let (x0, y0) = (ceil_div(tcx0, scale), ceil_div(tcy0, scale));
        let (x1, y1) = (ceil_div(tcx1, scale), ceil_div(tcy1, scale));
        let precincts = precinct_parameters(x0, y0, x1, y1, dims, r);

        let subbands = if r == 0 {
            vec![build_subband(
                SubbandOrientation::LL,
                x0,
                y0,
                x1,
                y1,
                dims,
                &precincts,
                budget,
            )?]
        } else {
            let bscale = 1u64 << (levels - r + 1);
            let low = |v: u32| ceil_div(v, bscale);
            let high = |v: u32| ceil_div_half(v, bscale);
            vec![
                build_subband(
                    SubbandOrientation::HL,
                    high(tcx0),
                    low(tcy0),
                    high(tcx1),
                    low(tcy1),
                    dims,
                    &precincts,
                    budget,
                )?,
                build_subband(
                    SubbandOrientation::LH,
                    low(tcx0),
                    high(tcy0),
                    low(tcx1),
                    high(tcy1),
                    dims,
                    &precincts,
                    budget,
                )?,
                build_subband(
                    SubbandOrientation::HH,
                    high(tcx0),
                    high(tcy0),
                    high(tcx1),
                    high(tcy1),
                    dims,
                    &precincts,
                    budget,
                )?,
            ]
        };

        resolutions.push(Resolution {
            level: r,
            x0,
            y0,
            x1,
            y1,
            precincts,
            subbands,
        });
    }

    Ok(TileComponent {
        x0: tcx0,
        y0: tcy0,
        x1: tcx1,
        y1: tcy1,
        coding,
        quantization,
        resolutions,
    })
}

/// Builds the geometry of every component of tile `index`.
pub fn build_tile(
    index: usize,
    bounds: TileBounds,
    infos: &[J2kComponentInfo],
    cod: J2kCod,
    styles: Vec<(J2kComponentCodingStyle, J2kQuantization)>,
    budget: &mut MemoryBudget,
) -> Result<J2kTile, J2kError> {
    let mut components = Vec::with_capacity(infos.len());
    for (info, (coding, quantization)) in infos.iter().zip(styles) {
        components.push(build_tile_component(
            bounds,
            info,
            coding,
            quantization,
            budget,
        )?);
    }
    debug!(
        "Tile {} geometry: {}x{} at ({}, {}), {} components, {} code-blocks",
        index,
        bounds.x1 - bounds.x0,
        bounds.y1 - bounds.y0,
        bounds.x0,
        bounds.y0,
        components.len(),
        components
            .iter()
            .flat_map(|c| &c.resolutions)
            .flat_map(|r| &r.subbands)
            .map(|s| s.codeblocks.len())
            .sum::<usize>()
    );
    Ok(J2kTile {
        index,
        bounds,
        cod,
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::image::{J2kImageSize, PrecinctSize};

    fn info(width: u32, height: u32) -> J2kComponentInfo {
        let siz = J2kImageSize {
            width,
            height,
            tile_width: width,
            tile_height: height,
            component_count: 1,
            ..Default::default()
        };
        J2kComponentInfo::new(7, 1, 1, &siz)
    }

    fn coding(levels: u8, xcb: u8) -> J2kComponentCodingStyle {
        J2kComponentCodingStyle {
            decomposition_levels: levels,
            xcb,
            ycb: xcb,
            reversible: true,
            ..Default::default()
        }
    }

    fn bounds(x0: u32, y0: u32, x1: u32, y1: u32) -> TileBounds {
        TileBounds { x0, y0, x1, y1 }
    }

    fn budget() -> MemoryBudget {
        MemoryBudget::new(u64::MAX)
    }

    #[test]
    fn test_high_pass_rounding() {
        assert_eq!(ceil_div_half(0, 2), 0);
        assert_eq!(ceil_div_half(1, 2), 0);
        assert_eq!(ceil_div_half(6, 2), 3);
        assert_eq!(ceil_div_half(7, 2), 3);
        assert_eq!(ceil_div_half(8, 4), 2);
        assert_eq!(ceil_div_half(7, 4), 2);
    }

    #[test]
    fn test_single_resolution_single_codeblock() {
        let component = build_tile_component(
            bounds(0, 0, 4, 4),
            &info(4, 4),
            coding(0, 6),
            J2kQuantization::default(),
            &mut budget(),
        )
        .unwrap();
        assert_eq!(component.resolutions.len(), 1);
        let resolution = &component.resolutions[0];
        assert_eq!(resolution.precincts.count(), 1);
        assert_eq!(resolution.precincts.width, 1 << 15);
        let ll = &resolution.subbands[0];
        assert_eq!(ll.orientation, SubbandOrientation::LL);
        assert_eq!(ll.codeblocks.len(), 1);
        let block = &ll.codeblocks[0];
        assert_eq!((block.x0, block.y0, block.x1, block.y1), (0, 0, 4, 4));
        assert_eq!(block.lblock, 3);
        assert_eq!(ll.precincts[&0].codeblocks, vec![0]);
    }

    #[test]
    fn test_one_level_subband_layout() {
        let component = build_tile_component(
            bounds(0, 0, 8, 8),
            &info(8, 8),
            coding(1, 6),
            J2kQuantization::default(),
            &mut budget(),
        )
        .unwrap();
        let r1 = &component.resolutions[1];
        assert_eq!((r1.width(), r1.height()), (8, 8));
        assert_eq!(component.resolutions[0].width(), 4);
        let orientations: Vec<_> = r1.subbands.iter().map(|s| s.orientation).collect();
        assert_eq!(
            orientations,
            vec![
                SubbandOrientation::HL,
                SubbandOrientation::LH,
                SubbandOrientation::HH
            ]
        );
        for subband in &r1.subbands {
            assert_eq!((subband.width(), subband.height()), (4, 4));
            // PPx = 15 leaves room for 2^14 code-blocks at r > 0
            assert_eq!(subband.codeblock_width_exp, 6);
        }
        assert_eq!(r1.precincts.count(), 1);
    }

    #[test]
    fn test_odd_origin_splits_low_and_high() {
        let component = build_tile_component(
            bounds(1, 0, 6, 1),
            &info(6, 1),
            coding(1, 6),
            J2kQuantization::default(),
            &mut budget(),
        )
        .unwrap();
        let ll = &component.resolutions[0].subbands[0];
        let hl = &component.resolutions[1].subbands[0];
        assert_eq!((ll.x0, ll.x1), (1, 3));
        assert_eq!((hl.x0, hl.x1), (0, 3));
        assert_eq!(ll.width() + hl.width(), component.width());
    }

    #[test]
    fn test_custom_precincts_group_codeblocks() {
        let mut style = coding(0, 2);
        style.custom_precincts = true;
        style.precinct_sizes = vec![PrecinctSize { ppx: 3, ppy: 3 }];
        let component = build_tile_component(
            bounds(0, 0, 16, 16),
            &info(16, 16),
            style,
            J2kQuantization::default(),
            &mut budget(),
        )
        .unwrap();
        let resolution = &component.resolutions[0];
        assert_eq!(resolution.precincts.num_wide, 2);
        assert_eq!(resolution.precincts.num_high, 2);
        let ll = &resolution.subbands[0];
        assert_eq!(ll.codeblocks.len(), 16);
        let first = &ll.precincts[&0];
        assert_eq!(first.codeblocks, vec![0, 1, 4, 5]);
        assert_eq!(first.grid_size(), (2, 2));
        let last = &ll.precincts[&3];
        assert_eq!((last.cbx_min, last.cby_min), (2, 2));
        assert_eq!(ll.codeblocks[15].precinct, 3);
    }

    #[test]
    fn test_codeblock_records_are_budgeted() {
        let mut small = MemoryBudget::new(16);
        let result = build_tile_component(
            bounds(0, 0, 64, 64),
            &info(64, 64),
            coding(0, 2),
            J2kQuantization::default(),
            &mut small,
        );
        assert!(matches!(
            result,
            Err(J2kError::ResourceLimitExceeded {
                what: "code-block records",
                ..
            })
        ));
    }
}
