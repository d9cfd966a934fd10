// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rasterwerk — command-line demo of the image filter pipeline.
//
// Entry point. Initialises logging, reads a PNG, runs its colour channels
// and alpha through the pipeline as an image with a separate soft mask, and
// writes the filtered raster back out.

mod cli;

use std::process::ExitCode;

use image::{RgbImage, RgbaImage};
use rasterwerk_core::error::{RasterwerkError, Result, classify_error};
use rasterwerk_core::geometry::Affine;
use rasterwerk_core::types::{Bpc, ErrorClass};
use rasterwerk_core::PipelineConfig;
use rasterwerk_filter::{
    CollectedLines, FilteredImageArgs, ImagePipeline, ImageSource, MaskData, MaskDesc,
    MemoryProvider,
};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use cli::Options;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let options = match Options::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };
    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, class = ?classify_error(&e), "rasterwerk failed");
            ExitCode::FAILURE
        }
    }
}

fn run(options: &Options) -> Result<()> {
    let config = match &options.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let input = image::open(&options.input)
        .map_err(|e| RasterwerkError::ImageError(e.to_string()))?
        .to_rgba8();
    let (width, height) = input.dimensions();
    info!(path = %options.input.display(), width, height, "Input loaded");

    let channels = split_channels(&input);
    let mut source = ImageSource::image(width, height, 8, 3)
        .with_transform(Affine::scale(options.scale))
        .interpolated(options.interpolate);
    let mut streams = vec![channels.rgb];
    if let Some(alpha) = channels.alpha {
        source = source.with_mask(MaskData::Separate(MaskDesc {
            width,
            height,
            bpc: 8,
            polarity: true,
        }));
        streams.push(alpha);
    }
    if let Some(matte) = &options.matte {
        source = source.with_matte(matte.clone());
    }
    let mut provider = MemoryProvider::new(streams);
    if let Some(chunk) = options.chunk {
        provider = provider.with_chunk(chunk);
    }

    let mut pipeline = ImagePipeline::new(config)?;
    let mut lines = CollectedLines::default();
    let raster = match pipeline.render(&source, &mut provider, None, &mut lines) {
        Ok(summary) => {
            info!(
                image_filters = ?summary.image_filters,
                mask_filters = ?summary.mask_filters,
                "Pipeline finished"
            );
            let image = summary.image.ok_or_else(|| {
                RasterwerkError::ImageError("pipeline produced no image lines".into())
            })?;
            assemble(&image, &lines.image, summary.mask.as_ref(), &lines.mask)?
        }
        Err(e) if classify_error(&e) == ErrorClass::Fallback => {
            warn!(error = %e, "Falling back to the unfiltered image");
            Raster::Rgba(input)
        }
        Err(e) => return Err(e),
    };

    info!(digest = %raster.digest(), "Output raster");
    raster.save(&options.output)?;
    info!(path = %options.output.display(), "Output written");
    Ok(())
}

// -- Input ------------------------------------------------------------------

struct Channels {
    rgb: Vec<u8>,
    /// Present only when some pixel is not fully opaque.
    alpha: Option<Vec<u8>>,
}

fn split_channels(input: &RgbaImage) -> Channels {
    let pixels = input.width() as usize * input.height() as usize;
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    for pixel in input.pixels() {
        let [r, g, b, a] = pixel.0;
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }
    let opaque = alpha.iter().all(|&a| a == u8::MAX);
    Channels {
        rgb,
        alpha: (!opaque).then_some(alpha),
    }
}

// -- Output -----------------------------------------------------------------

enum Raster {
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl Raster {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Rgb(image) => image.as_raw(),
            Self::Rgba(image) => image.as_raw(),
        }
    }

    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn save(&self, path: &std::path::Path) -> Result<()> {
        let saved = match self {
            Self::Rgb(image) => image.save(path),
            Self::Rgba(image) => image.save(path),
        };
        saved.map_err(|e| RasterwerkError::ImageError(e.to_string()))
    }
}

/// Build the output raster. The mask becomes an alpha channel when it
/// still lines up with the image pixel for pixel.
fn assemble(
    image: &FilteredImageArgs,
    image_lines: &[Vec<u8>],
    mask: Option<&FilteredImageArgs>,
    mask_lines: &[Vec<u8>],
) -> Result<Raster> {
    if image.bpc != Bpc::Eight || image.colorants != 3 {
        return Err(RasterwerkError::ImageError(format!(
            "cannot write {}-colorant {}-bit output",
            image.colorants,
            image.bpc.bits()
        )));
    }
    let rgb: Vec<u8> = image_lines.concat();
    let alpha = mask.filter(|m| {
        m.width == image.width && m.height == image.height && m.bpc == Bpc::Eight
    });
    let raster = match alpha {
        Some(_) => {
            let alpha = mask_lines.concat();
            let rgba = rgb
                .chunks_exact(3)
                .zip(&alpha)
                .flat_map(|(px, &a)| [px[0], px[1], px[2], a])
                .collect();
            RgbaImage::from_raw(image.width, image.height, rgba).map(Raster::Rgba)
        }
        None => {
            if mask.is_some() {
                warn!("Mask no longer matches the image, dropping alpha");
            }
            RgbImage::from_raw(image.width, image.height, rgb).map(Raster::Rgb)
        }
    };
    raster.ok_or_else(|| {
        RasterwerkError::ImageError(format!(
            "pipeline output does not fill a {}x{} raster",
            image.width, image.height
        ))
    })
}
