//! Packet sequencing for the five progression orders (B.12.1).
//!
//! The sequencer keeps a copy of the few geometry numbers it needs, so it can
//! run while the packet parser mutates the tile it describes.

use super::geometry::{J2kTile, PrecinctParameters};
use super::image::ProgressionOrder;

/// Identity of one packet within a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub layer: u32,
    pub component: usize,
    pub resolution: usize,
    pub precinct: usize,
}

#[derive(Debug, Clone)]
struct ComponentShape {
    decomposition_levels: usize,
    resolutions: Vec<PrecinctParameters>,
}

/// Precinct size of one resolution on the component grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScaledSize {
    width: u64,
    height: u64,
}

#[derive(Debug, Clone)]
struct ComponentScale {
    resolutions: Vec<ScaledSize>,
    max_num_wide: usize,
    max_num_high: usize,
}

/// Precinct sizes brought to a common scale so positions line up across
/// resolutions and components.
#[derive(Debug, Clone)]
struct ImageScaleSizes {
    components: Vec<ComponentScale>,
    min_width: u64,
    min_height: u64,
    max_num_wide: usize,
    max_num_high: usize,
}

impl ImageScaleSizes {
    fn new(components: &[ComponentShape]) -> Self {
        let mut sizes = ImageScaleSizes {
            components: Vec::with_capacity(components.len()),
            min_width: u64::MAX,
            min_height: u64::MAX,
            max_num_wide: 0,
            max_num_high: 0,
        };
        for component in components {
            let mut scale = ComponentScale {
                resolutions: Vec::with_capacity(component.resolutions.len()),
                max_num_wide: 0,
                max_num_high: 0,
            };
            let levels = component.decomposition_levels;
            for (r, precincts) in component.resolutions.iter().enumerate() {
                let factor = 1u64 << (levels - r);
                let size = ScaledSize {
                    width: factor * precincts.width,
                    height: factor * precincts.height,
                };
                sizes.min_width = sizes.min_width.min(size.width);
                sizes.min_height = sizes.min_height.min(size.height);
                scale.max_num_wide = scale.max_num_wide.max(precincts.num_wide);
                scale.max_num_high = scale.max_num_high.max(precincts.num_high);
                scale.resolutions.push(size);
            }
            sizes.max_num_wide = sizes.max_num_wide.max(scale.max_num_wide);
            sizes.max_num_high = sizes.max_num_high.max(scale.max_num_high);
            sizes.components.push(scale);
        }
        sizes
    }

    /// Index of the precinct starting at grid position `(px, py)`, if that
    /// position is a precinct origin of the resolution.
    fn precinct_index(
        &self,
        px: usize,
        py: usize,
        size: ScaledSize,
        precincts: &PrecinctParameters,
    ) -> Option<usize> {
        let pos_x = px as u64 * self.min_width;
        let pos_y = py as u64 * self.min_height;
        if pos_x % size.width != 0 || pos_y % size.height != 0 {
            return None;
        }
        let column = (pos_x / size.width) as usize;
        let row = (pos_y / size.height) as usize;
        if column >= precincts.num_wide || row >= precincts.num_high {
            return None;
        }
        Some(column + row * precincts.num_wide)
    }
}

#[derive(Debug, Clone)]
enum Cursor {
    Lrcp {
        l: u32,
        r: usize,
        c: usize,
        k: usize,
    },
    Rlcp {
        r: usize,
        l: u32,
        c: usize,
        k: usize,
    },
    Rpcl {
        r: usize,
        p: usize,
        c: usize,
        l: u32,
        max_precincts_in_level: Vec<usize>,
    },
    Pcrl {
        py: usize,
        px: usize,
        c: usize,
        r: usize,
        l: u32,
        sizes: ImageScaleSizes,
    },
    Cprl {
        c: usize,
        py: usize,
        px: usize,
        r: usize,
        l: u32,
        sizes: ImageScaleSizes,
    },
}

/// Pull-based packet enumeration for one tile.
#[derive(Debug, Clone)]
pub struct PacketSequencer {
    layers: u32,
    max_levels: usize,
    components: Vec<ComponentShape>,
    cursor: Cursor,
}

impl PacketSequencer {
    pub fn new(tile: &J2kTile) -> Self {
        let components: Vec<ComponentShape> = tile
            .components
            .iter()
            .map(|c| ComponentShape {
                decomposition_levels: c.decomposition_levels(),
                resolutions: c.resolutions.iter().map(|r| r.precincts).collect(),
            })
            .collect();
        let max_levels = components
            .iter()
            .map(|c| c.decomposition_levels)
            .max()
            .unwrap_or(0);

        let cursor = match tile.cod.progression_order {
            ProgressionOrder::Lrcp => Cursor::Lrcp {
                l: 0,
                r: 0,
                c: 0,
                k: 0,
            },
            ProgressionOrder::Rlcp => Cursor::Rlcp {
                r: 0,
                l: 0,
                c: 0,
                k: 0,
            },
            ProgressionOrder::Rpcl => Cursor::Rpcl {
                r: 0,
                p: 0,
                c: 0,
                l: 0,
                max_precincts_in_level: (0..=max_levels)
                    .map(|r| {
                        components
                            .iter()
                            .filter_map(|c| c.resolutions.get(r))
                            .map(|p| p.count())
                            .max()
                            .unwrap_or(0)
                    })
                    .collect(),
            },
            ProgressionOrder::Pcrl => Cursor::Pcrl {
                py: 0,
                px: 0,
                c: 0,
                r: 0,
                l: 0,
                sizes: ImageScaleSizes::new(&components),
            },
            ProgressionOrder::Cprl => Cursor::Cprl {
                c: 0,
                py: 0,
                px: 0,
                r: 0,
                l: 0,
                sizes: ImageScaleSizes::new(&components),
            },
        };

        Self {
            layers: tile.cod.layer_count as u32,
            max_levels,
            components,
            cursor,
        }
    }

    /// Next packet in progression order, `None` once the tile is exhausted.
    pub fn next_packet(&mut self) -> Option<Packet> {
        let layers = self.layers;
        let max_levels = self.max_levels;
        let components = &self.components;
        let component_count = components.len();

        match &mut self.cursor {
            Cursor::Lrcp { l, r, c, k } => {
                while *l < layers {
                    while *r <= max_levels {
                        while *c < component_count {
                            let component = &components[*c];
                            if *r <= component.decomposition_levels {
                                if *k < component.resolutions[*r].count() {
                                    let packet = Packet {
                                        layer: *l,
                                        component: *c,
                                        resolution: *r,
                                        precinct: *k,
                                    };
                                    *k += 1;
                                    return Some(packet);
                                }
                                *k = 0;
                            }
                            *c += 1;
                        }
                        *c = 0;
                        *r += 1;
                    }
                    *r = 0;
                    *l += 1;
                }
                None
            }
            Cursor::Rlcp { r, l, c, k } => {
                while *r <= max_levels {
                    while *l < layers {
                        while *c < component_count {
                            let component = &components[*c];
                            if *r <= component.decomposition_levels {
                                if *k < component.resolutions[*r].count() {
                                    let packet = Packet {
                                        layer: *l,
                                        component: *c,
                                        resolution: *r,
                                        precinct: *k,
                                    };
                                    *k += 1;
                                    return Some(packet);
                                }
                                *k = 0;
                            }
                            *c += 1;
                        }
                        *c = 0;
                        *l += 1;
                    }
                    *l = 0;
                    *r += 1;
                }
                None
            }
            Cursor::Rpcl {
                r,
                p,
                c,
                l,
                max_precincts_in_level,
            } => {
                while *r <= max_levels {
                    while *p < max_precincts_in_level[*r] {
                        while *c < component_count {
                            let component = &components[*c];
                            if *r <= component.decomposition_levels
                                && *p < component.resolutions[*r].count()
                            {
                                if *l < layers {
                                    let packet = Packet {
                                        layer: *l,
                                        component: *c,
                                        resolution: *r,
                                        precinct: *p,
                                    };
                                    *l += 1;
                                    return Some(packet);
                                }
                                *l = 0;
                            }
                            *c += 1;
                        }
                        *c = 0;
                        *p += 1;
                    }
                    *p = 0;
                    *r += 1;
                }
                None
            }
            Cursor::Pcrl {
                py,
                px,
                c,
                r,
                l,
                sizes,
            } => {
                while *py < sizes.max_num_high {
                    while *px < sizes.max_num_wide {
                        while *c < component_count {
                            let component = &components[*c];
                            while *r <= component.decomposition_levels {
                                let size = sizes.components[*c].resolutions[*r];
                                let precincts = &component.resolutions[*r];
                                if let Some(k) = sizes.precinct_index(*px, *py, size, precincts) {
                                    if *l < layers {
                                        let packet = Packet {
                                            layer: *l,
                                            component: *c,
                                            resolution: *r,
                                            precinct: k,
                                        };
                                        *l += 1;
                                        return Some(packet);
                                    }
                                    *l = 0;
                                }
                                *r += 1;
                            }
                            *r = 0;
                            *c += 1;
                        }
                        *c = 0;
                        *px += 1;
                    }
                    *px = 0;
                    *py += 1;
                }
                None
            }
            Cursor::Cprl {
                c,
                py,
                px,
                r,
                l,
                sizes,
            } => {
                while *c < component_count {
                    let component = &components[*c];
                    let scale = &sizes.components[*c];
                    while *py < scale.max_num_high {
                        while *px < scale.max_num_wide {
                            while *r <= component.decomposition_levels {
                                let size = scale.resolutions[*r];
                                let precincts = &component.resolutions[*r];
                                if let Some(k) = sizes.precinct_index(*px, *py, size, precincts) {
                                    if *l < layers {
                                        let packet = Packet {
                                            layer: *l,
                                            component: *c,
                                            resolution: *r,
                                            precinct: k,
                                        };
                                        *l += 1;
                                        return Some(packet);
                                    }
                                    *l = 0;
                                }
                                *r += 1;
                            }
                            *r = 0;
                            *px += 1;
                        }
                        *px = 0;
                        *py += 1;
                    }
                    *py = 0;
                    *c += 1;
                }
                None
            }
        }
    }
}

impl Iterator for PacketSequencer {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        self.next_packet()
    }
}
