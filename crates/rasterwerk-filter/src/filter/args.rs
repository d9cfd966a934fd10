// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Negotiation arguments and results exchanged between the chain and its
// filters.

use rasterwerk_core::geometry::{self, Affine};
use rasterwerk_core::types::{Bpc, ContainerSize, ImageRole};

/// Normalised shape of one half of an image/mask combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub colorants: u32,
    pub bpc: Bpc,
}

/// What the page description said about the image as a whole. Both the
/// image chain and the mask chain see the same attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceAttributes {
    /// The image half, absent for stand-alone masks.
    pub image: Option<Geometry>,
    /// The mask half, absent for unmasked images.
    pub mask: Option<Geometry>,
    /// Soft-mask matte colour, one component in `[0, 1]` per image colorant.
    pub matte: Option<Vec<f32>>,
}

/// Read-only description of a line stream as a filter sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredImageArgs {
    pub width: u32,
    pub height: u32,
    /// Device pixels covered along the image's own x axis.
    pub device_width: u32,
    /// Device pixels covered along the image's own y axis.
    pub device_height: u32,
    pub colorants: u32,
    /// Depth the page description delivered before normalisation.
    pub original_bpc: u8,
    pub bpc: Bpc,
    pub role: ImageRole,
    pub interpolate: bool,
    pub image_to_device: Affine,
    pub source: SourceAttributes,
}

impl FilteredImageArgs {
    pub fn container(&self) -> ContainerSize {
        self.bpc.container()
    }

    /// Samples in one line.
    pub fn samples_per_line(&self) -> usize {
        self.width as usize * self.colorants as usize
    }

    /// Bytes in one normalised line.
    pub fn line_bytes(&self) -> usize {
        self.bpc.line_bytes(self.samples_per_line())
    }

    /// A result that leaves the image exactly as it is.
    pub fn unchanged(&self) -> FilteredImageResult {
        FilteredImageResult {
            width: self.width,
            height: self.height,
            bpc: self.bpc,
            interpolate: self.interpolate,
        }
    }

    /// The arguments the next filter sees after one that produces `result`.
    /// The transform is rescaled so the image keeps covering the same device
    /// area.
    pub fn apply(&self, result: &FilteredImageResult) -> FilteredImageArgs {
        let image_to_device = geometry::rescale(
            &self.image_to_device,
            (self.width, self.height),
            (result.width, result.height),
        );
        FilteredImageArgs {
            width: result.width,
            height: result.height,
            bpc: result.bpc,
            interpolate: result.interpolate,
            image_to_device,
            ..self.clone()
        }
    }
}

/// Output shape a filter declares while negotiating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilteredImageResult {
    pub width: u32,
    pub height: u32,
    pub bpc: Bpc,
    pub interpolate: bool,
}
