// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image source descriptors and their classification into the layouts the
// preparer can normalise.

use rasterwerk_core::geometry::Affine;
use rasterwerk_core::types::SOURCE_DEPTHS;

/// A mask delivered alongside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskDesc {
    pub width: u32,
    pub height: u32,
    pub bpc: u8,
    /// `true` when a set source bit means "paint".
    pub polarity: bool,
}

/// How an image's mask, if any, reaches the preparer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskData {
    #[default]
    None,
    /// One mask sample ahead of each pixel's colorants, same depth as the image.
    SampleFirst,
    /// One mask sample after each pixel's colorants.
    SampleLast,
    /// 1-bit mask lines multiplexed into the image stream.
    Scanline(MaskDesc),
    /// A mask with its own stream.
    Separate(MaskDesc),
}

/// Palette description of an indexed colour space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedSpace {
    /// Highest valid palette index.
    pub hival: u32,
    /// Decode range applied to raw values before lookup.
    pub decode: Option<[f32; 2]>,
}

/// Everything the preparer needs to know about one image or stand-alone
/// mask as the page description declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSource {
    pub width: u32,
    pub height: u32,
    pub bpc: u8,
    pub colorants: u32,
    /// Each colorant has its own stream.
    pub planar: bool,
    pub mask: MaskData,
    /// The source is itself a mask (stencil or soft mask).
    pub is_mask: bool,
    /// Polarity of stand-alone and sample-interleaved masks.
    pub polarity: bool,
    pub indexed: Option<IndexedSpace>,
    pub interpolate: bool,
    pub image_to_device: Affine,
    pub matte: Option<Vec<f32>>,
}

impl ImageSource {
    /// An unmasked image with interleaved colorants.
    pub fn image(width: u32, height: u32, bpc: u8, colorants: u32) -> Self {
        Self {
            width,
            height,
            bpc,
            colorants,
            planar: false,
            mask: MaskData::None,
            is_mask: false,
            polarity: true,
            indexed: None,
            interpolate: false,
            image_to_device: Affine::IDENTITY,
            matte: None,
        }
    }

    /// A stand-alone mask: a stencil at 1 bit, a soft mask above.
    pub fn stencil(width: u32, height: u32, bpc: u8, polarity: bool) -> Self {
        Self {
            is_mask: true,
            polarity,
            ..Self::image(width, height, bpc, 1)
        }
    }

    pub fn planar(mut self) -> Self {
        self.planar = true;
        self
    }

    pub fn with_mask(mut self, mask: MaskData) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_indexed(mut self, space: IndexedSpace) -> Self {
        self.indexed = Some(space);
        self
    }

    pub fn with_transform(mut self, image_to_device: Affine) -> Self {
        self.image_to_device = image_to_device;
        self
    }

    pub fn with_matte(mut self, matte: Vec<f32>) -> Self {
        self.matte = Some(matte);
        self
    }

    pub fn interpolated(mut self, interpolate: bool) -> Self {
        self.interpolate = interpolate;
        self
    }
}

/// The nine layouts the preparer normalises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// 1-bit stand-alone stencil.
    Mask,
    /// Stand-alone soft mask deeper than 1 bit.
    ContoneMask,
    Interleaved,
    Planar,
    SampleMaskFirst,
    SampleMaskLast,
    ScanlineMask,
    SeparateMaskInterleaved,
    SeparateMaskPlanar,
}

impl SourceType {
    pub fn has_image(self) -> bool {
        !matches!(self, Self::Mask | Self::ContoneMask)
    }

    pub fn has_mask(self) -> bool {
        !matches!(self, Self::Interleaved | Self::Planar)
    }

    /// Image and mask lines alternate by height ratio.
    pub fn uses_cadence(self) -> bool {
        matches!(
            self,
            Self::ScanlineMask | Self::SeparateMaskInterleaved | Self::SeparateMaskPlanar
        )
    }
}

/// Sort `source` into one of the supported layouts. Never allocates; the
/// error is a static description of what is unsupported.
pub fn classify(source: &ImageSource) -> Result<SourceType, &'static str> {
    if source.width == 0 || source.height == 0 {
        return Err("image has no pixels");
    }
    if !SOURCE_DEPTHS.contains(&source.bpc) {
        return Err("unsupported bit depth");
    }

    if source.is_mask {
        if source.mask != MaskData::None {
            return Err("a mask cannot carry a mask of its own");
        }
        if source.indexed.is_some() {
            return Err("indexed masks are not supported");
        }
        return Ok(if source.bpc == 1 {
            SourceType::Mask
        } else {
            SourceType::ContoneMask
        });
    }

    if source.colorants == 0 {
        return Err("image has no colorants");
    }
    if let Some(space) = &source.indexed {
        if source.bpc > 8 {
            return Err("indexed images deeper than 8 bits");
        }
        if source.colorants != 1 {
            return Err("indexed images must have a single colorant");
        }
        if space.hival > 255 {
            return Err("palette larger than 256 entries");
        }
    }

    let planar = source.planar && source.colorants > 1;
    match source.mask {
        MaskData::None => Ok(if planar {
            SourceType::Planar
        } else {
            SourceType::Interleaved
        }),
        MaskData::SampleFirst | MaskData::SampleLast => {
            if planar {
                return Err("sample-interleaved masks need interleaved colorants");
            }
            if source.indexed.is_some() {
                return Err("sample-interleaved masks on indexed images");
            }
            Ok(if source.mask == MaskData::SampleFirst {
                SourceType::SampleMaskFirst
            } else {
                SourceType::SampleMaskLast
            })
        }
        MaskData::Scanline(mask) => {
            if planar {
                return Err("scanline-interleaved masks need interleaved colorants");
            }
            if mask.bpc != 1 {
                return Err("scanline-interleaved masks must be 1-bit");
            }
            if mask.width == 0 || mask.height == 0 {
                return Err("mask has no pixels");
            }
            let (major, minor) = if mask.height > source.height {
                (mask.height, source.height)
            } else {
                (source.height, mask.height)
            };
            if major % minor != 0 {
                return Err("mask and image heights are not integer multiples");
            }
            Ok(SourceType::ScanlineMask)
        }
        MaskData::Separate(mask) => {
            if mask.width == 0 || mask.height == 0 {
                return Err("mask has no pixels");
            }
            if !SOURCE_DEPTHS.contains(&mask.bpc) {
                return Err("unsupported mask bit depth");
            }
            Ok(if planar {
                SourceType::SeparateMaskPlanar
            } else {
                SourceType::SeparateMaskInterleaved
            })
        }
    }
}

/// Whether [`classify`] accepts `source`.
pub fn is_supported(source: &ImageSource) -> bool {
    classify(source).is_ok()
}
