//! JPEG 2000 Implementation (Part 1, ISO/IEC 15444-1), decoding only.
//!
//! The sub-modules follow the stages of the decoder:
//!
//! - `jp2` / `parser`: JP2 boxes and codestream syntax (markers, headers).
//! - `image`: parameter records read from the marker segments.
//! - `geometry`: tiles, resolutions, subbands, precincts and code-blocks.
//! - `progression`: packet order for the five progression orders.
//! - `packet` / `tag_tree` / `bit_io`: tier-2 packet header parsing.
//! - `mq_coder` / `bit_plane_coder`: tier-1 decoding of code-blocks.
//! - `quantization`: scalar dequantization.
//! - `dwt`: inverse wavelet transform (5-3 and 9-7).
//! - `mct`: inverse component transforms and level shift.
//! - `decoder`: the pipeline tying these together.

pub mod bit_io;
pub mod bit_plane_coder;
pub mod decoder;
pub mod dwt;
pub mod geometry;
pub mod image;
pub mod jp2;
pub mod limits;
pub mod mct;
pub mod mq_coder;
pub mod packet;
pub mod parser;
pub mod progression;
pub mod quantization;
pub mod tag_tree;
