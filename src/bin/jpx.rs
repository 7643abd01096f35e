//! jpx CLI - JPEG 2000 decoding command-line utility.
//!
//! Decodes raw codestreams (.j2k/.j2c) and JP2 files (.jp2/.jpx) to raw
//! samples or PNM, and prints codestream metadata.

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use std::fs;
use std::path::PathBuf;

use jpx_rs::jpeg2000::image::QuantizationStyle;
use jpx_rs::{DecodeOptions, DecodedImage, J2kDecoder, Jp2Colorspace};

/// JPEG 2000 decoder for codestreams and JP2 files
#[derive(Parser)]
#[command(name = "jpx")]
#[command(version)]
#[command(about = "Decode and inspect JPEG 2000 images", long_about = None)]
#[command(after_help = "EXAMPLES:
    jpx decode -i image.j2k -o pixels.raw
    jpx decode -i image.jp2 -o image.ppm -f pnm
    jpx info -i image.jp2")]
struct Cli {
    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a JPEG 2000 image to raw samples or PNM
    ///
    /// Raw output is 8-bit interleaved samples. PNM output is a PGM for one
    /// component and a PPM for three or four (the fourth is dropped).
    #[command(visible_alias = "d")]
    Decode {
        /// Input file path (J2K, JP2 or JPX)
        #[arg(short, long, help = "Path to the input image file")]
        input: PathBuf,

        /// Output file path for decoded samples
        #[arg(short, long, help = "Path for the output file")]
        output: PathBuf,

        /// Output format: raw (binary samples) or pnm (PGM/PPM)
        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,

        /// Return what could be decoded instead of failing on corrupt data
        #[arg(long)]
        best_effort: bool,
    },

    /// Display image metadata and coding parameters
    #[command(visible_alias = "i")]
    Info {
        /// Input file path
        #[arg(short, long, help = "Path to the image file to inspect")]
        input: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Raw binary sample data
    Raw,
    /// Portable anymap (PGM/PPM)
    Pnm,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let result = match cli.command {
        Commands::Decode {
            input,
            output,
            format,
            best_effort,
        } => decode_image(&input, &output, &format, best_effort),
        Commands::Info { input } => show_info(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn decode_image(
    input: &PathBuf,
    output: &PathBuf,
    format: &OutputFormat,
    best_effort: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let options = DecodeOptions::default().with_strict(!best_effort);
    let image = jpx_rs::decode(&data, &options)?;
    let pixels = image.to_interleaved_u8()?;

    match format {
        OutputFormat::Raw => fs::write(output, &pixels)?,
        OutputFormat::Pnm => write_pnm(output, &image, &pixels)?,
    }

    if let Some(error) = &image.recovered_error {
        eprintln!("Warning: image is incomplete: {}", error);
    }
    println!(
        "Decoded {}x{} image ({} components) to {:?}",
        image.width,
        image.height,
        image.components.len(),
        output
    );
    Ok(())
}

fn write_pnm(
    path: &PathBuf,
    image: &DecodedImage,
    pixels: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let count = image.components.len();
    let (magic, kept) = match count {
        1 => ("P5", 1),
        3 | 4 => ("P6", 3),
        _ => {
            return Err(format!("PNM output needs 1, 3 or 4 components, found {}", count).into());
        }
    };

    let mut out = format!("{}\n{} {}\n255\n", magic, image.width, image.height).into_bytes();
    out.reserve(pixels.len());
    for sample in pixels.chunks_exact(count) {
        out.extend_from_slice(&sample[..kept]);
    }
    fs::write(path, out)?;
    Ok(())
}

fn show_info(input: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;

    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!();

    let is_codestream = data.starts_with(&[0xFF, 0x4F]);
    println!(
        "Format: {}",
        if is_codestream {
            "JPEG 2000 Codestream"
        } else {
            "JP2 Container (JPEG 2000)"
        }
    );

    let header = J2kDecoder::new(&data, DecodeOptions::default()).read_header()?;
    let siz = &header.siz;
    println!(
        "  Dimensions: {}x{}",
        siz.image_width(),
        siz.image_height()
    );
    if siz.x_origin != 0 || siz.y_origin != 0 {
        println!("  Origin:     ({}, {})", siz.x_origin, siz.y_origin);
    }
    println!("  Components: {}", header.components.len());
    for (i, component) in header.components.iter().enumerate() {
        println!(
            "    #{}: {} bits {}, subsampling {}x{}",
            i,
            component.depth,
            if component.is_signed { "signed" } else { "unsigned" },
            component.dx,
            component.dy
        );
    }
    println!(
        "  Tile size:  {}x{} ({} tiles)",
        siz.tile_width,
        siz.tile_height,
        header.tile_count()
    );
    if let Some(cod) = &header.coding.cod {
        println!("  DWT levels: {}", cod.component.decomposition_levels);
        println!(
            "  Wavelet:    {}",
            if cod.component.reversible {
                "5-3 reversible"
            } else {
                "9-7 irreversible"
            }
        );
        println!("  Layers:     {}", cod.layer_count);
        println!("  Progression: {}", cod.progression_order.name());
        println!(
            "  Code-blocks: {}x{}",
            1u32 << cod.component.xcb,
            1u32 << cod.component.ycb
        );
        println!(
            "  Component transform: {}",
            if cod.multiple_component_transform != 0 {
                "Yes"
            } else {
                "No"
            }
        );
    }
    if let Some(qcd) = &header.coding.qcd {
        println!(
            "  Quantization: {} ({} guard bits)",
            match qcd.style {
                QuantizationStyle::NoQuantization => "none",
                QuantizationStyle::ScalarDerived => "scalar derived",
                QuantizationStyle::ScalarExpounded => "scalar expounded",
            },
            qcd.guard_bits
        );
    }
    if let Some(colorspace) = header.colorspace {
        println!(
            "  Colorspace: {}",
            match colorspace {
                Jp2Colorspace::Srgb => "sRGB",
                Jp2Colorspace::Greyscale => "Greyscale",
                Jp2Colorspace::Sycc => "sYCC",
            }
        );
    }
    if !header.unsupported_options.is_empty() {
        println!(
            "  Unsupported options: {}",
            header.unsupported_options.join(", ")
        );
    }

    Ok(())
}
