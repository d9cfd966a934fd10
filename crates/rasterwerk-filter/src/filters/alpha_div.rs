// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Alpha-divide — undoes soft-mask matte pre-multiplication. One half runs in
// the image chain, the other in the mask chain; the mask half hands each
// line of alpha to the image half through state owned by the image's
// `ImageContext`.

use std::cell::RefCell;
use std::rc::Rc;

use rasterwerk_core::error::{RasterwerkError, Result};
use rasterwerk_core::types::{Bpc, ImageRole};
use tracing::{debug, warn};

use crate::filter::{
    FilterInstance, FilteredImageArgs, FilteredImageResult, ImageContext, ImageFilter,
    LineAccumulator,
};
use crate::packer::{read_sample, write_sample};
use crate::transaction::{Transaction, zeroed};

pub const NAME: &str = "alpha-divide";

/// Line of alpha passed from the mask half to the image half, already
/// resampled to the image's depth.
#[derive(Debug)]
pub(crate) struct AlphaLine {
    values: Vec<u32>,
    pending: bool,
}

type Shared = Rc<RefCell<AlphaLine>>;

/// The half constructed first, with the line shape it negotiated.
#[derive(Debug)]
pub(crate) struct FirstHalf {
    shared: Shared,
    width: u32,
    height: u32,
}

/// Progress of pairing the two halves for one image.
#[derive(Debug, Default)]
pub(crate) enum AlphaDividePairing {
    #[default]
    Empty,
    ImageOnly(FirstHalf),
    MaskOnly(FirstHalf),
    Paired,
}

impl AlphaDividePairing {
    /// Claim the slot for one half, returning the state it shares with the
    /// other. The second half must arrive at the shape the first one
    /// negotiated.
    fn join(&mut self, role: ImageRole, width: u32, height: u32) -> Result<Shared> {
        match (&*self, role) {
            (Self::Empty, _) => {
                let len = width as usize;
                let mut values = Vec::new();
                values
                    .try_reserve_exact(len)
                    .map_err(|_| RasterwerkError::Allocation { bytes: len * 4 })?;
                values.resize(len, 0);
                let shared = Rc::new(RefCell::new(AlphaLine {
                    values,
                    pending: false,
                }));
                let first = FirstHalf {
                    shared: Rc::clone(&shared),
                    width,
                    height,
                };
                *self = match role {
                    ImageRole::Image => Self::ImageOnly(first),
                    ImageRole::Mask => Self::MaskOnly(first),
                };
                Ok(shared)
            }
            (Self::ImageOnly(first), ImageRole::Mask) | (Self::MaskOnly(first), ImageRole::Image) => {
                if (first.width, first.height) != (width, height) {
                    warn!(
                        first_w = first.width,
                        first_h = first.height,
                        width,
                        height,
                        "Alpha-divide halves negotiated different shapes"
                    );
                    return Err(RasterwerkError::Negotiation(format!(
                        "alpha-divide halves disagree: {}x{} against {width}x{height}",
                        first.width, first.height
                    )));
                }
                let shared = Rc::clone(&first.shared);
                *self = Self::Paired;
                Ok(shared)
            }
            (_, role) => Err(RasterwerkError::FilterConstruct {
                filter: NAME.into(),
                reason: format!("{role:?} half constructed twice for one image"),
            }),
        }
    }

    pub(crate) fn verify(&self) -> Result<()> {
        let missing = match self {
            Self::Empty | Self::Paired => return Ok(()),
            Self::ImageOnly(_) => "mask",
            Self::MaskOnly(_) => "image",
        };
        warn!(missing, "Alpha-divide half has no partner");
        Err(RasterwerkError::Negotiation(format!(
            "alpha-divide was accepted without its {missing} half"
        )))
    }
}

/// The registry entry for both halves.
#[derive(Debug, Default)]
pub struct AlphaDivide;

impl ImageFilter for AlphaDivide {
    fn name(&self) -> &'static str {
        NAME
    }

    fn present(&self, args: &FilteredImageArgs, _changes: &mut FilteredImageResult) -> bool {
        let attrs = &args.source;
        let (Some(image), Some(mask), Some(matte)) = (attrs.image, attrs.mask, &attrs.matte)
        else {
            return false;
        };
        if image.width != mask.width || image.height != mask.height {
            return false;
        }
        if image.bpc == Bpc::One || matte.len() != image.colorants as usize {
            return false;
        }
        // Earlier interpolators may have resized the line; the halves check
        // each other's shape when they pair up.
        let own = match args.role {
            ImageRole::Image => image,
            ImageRole::Mask => mask,
        };
        args.bpc == own.bpc && args.colorants == own.colorants
    }

    fn construct(
        &self,
        args: &FilteredImageArgs,
        _target: &FilteredImageResult,
        ctx: &mut ImageContext,
    ) -> Result<Box<dyn FilterInstance>> {
        let attrs = &args.source;
        let (Some(image), Some(mask), Some(matte)) = (attrs.image, attrs.mask, &attrs.matte)
        else {
            return Err(RasterwerkError::FilterConstruct {
                filter: NAME.into(),
                reason: "image is not a matted soft-mask pair".into(),
            });
        };
        let shared = ctx.alpha_divide.join(args.role, args.width, args.height)?;
        debug!(
            role = ?args.role,
            width = args.width,
            height = args.height,
            "Alpha-divide half constructed"
        );
        match args.role {
            ImageRole::Image => {
                let max = image.bpc.max_value() as f32;
                Ok(Box::new(ImageHalf {
                    shared,
                    line: LineAccumulator::new(args.line_bytes())?,
                    out: zeroed(args.line_bytes())?,
                    ready: false,
                    bpc: image.bpc,
                    colorants: image.colorants as usize,
                    matte: matte
                        .iter()
                        .map(|c| (c.clamp(0.0, 1.0) * max).round() as i64)
                        .collect(),
                }))
            }
            ImageRole::Mask => Ok(Box::new(MaskHalf {
                shared,
                line: LineAccumulator::new(args.line_bytes())?,
                ready: false,
                mask_bpc: mask.bpc,
                image_bpc: image.bpc,
            })),
        }
    }
}

// -- Image half ---------------------------------------------------------------

struct ImageHalf {
    shared: Shared,
    line: LineAccumulator,
    out: Vec<u8>,
    ready: bool,
    bpc: Bpc,
    colorants: usize,
    matte: Vec<i64>,
}

impl FilterInstance for ImageHalf {
    fn push(&mut self, data: &mut Transaction) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        if !self.line.fill(data) {
            return Ok(());
        }
        let mut alpha = self.shared.borrow_mut();
        if alpha.pending {
            divide(
                self.line.line(),
                &alpha.values,
                &mut self.out,
                self.bpc,
                self.colorants,
                &self.matte,
            );
            alpha.pending = false;
            self.line.clear();
            self.ready = true;
        }
        Ok(())
    }

    fn pull(&mut self) -> Option<&[u8]> {
        if !self.ready {
            return None;
        }
        self.ready = false;
        Some(&self.out)
    }
}

/// `out = matte + (s - matte) * max / alpha`, clamped. Zero alpha leaves
/// the sample alone.
fn divide(line: &[u8], alpha: &[u32], out: &mut [u8], bpc: Bpc, colorants: usize, matte: &[i64]) {
    let max = i64::from(bpc.max_value());
    for (pixel, &a) in alpha.iter().enumerate() {
        for (c, &k) in matte.iter().enumerate().take(colorants) {
            let index = pixel * colorants + c;
            let s = i64::from(read_sample(line, index, bpc));
            let value = if a == 0 {
                s
            } else {
                (k + (s - k) * max / i64::from(a)).clamp(0, max)
            };
            write_sample(out, index, bpc, value as u32);
        }
    }
}

// -- Mask half ----------------------------------------------------------------

struct MaskHalf {
    shared: Shared,
    line: LineAccumulator,
    ready: bool,
    mask_bpc: Bpc,
    image_bpc: Bpc,
}

impl FilterInstance for MaskHalf {
    fn push(&mut self, data: &mut Transaction) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        let mut alpha = self.shared.borrow_mut();
        // The image half has not used the previous line yet.
        if alpha.pending {
            return Ok(());
        }
        if !self.line.fill(data) {
            return Ok(());
        }
        for (pixel, value) in alpha.values.iter_mut().enumerate() {
            let m = read_sample(self.line.line(), pixel, self.mask_bpc);
            *value = resample(m, self.mask_bpc, self.image_bpc);
        }
        alpha.pending = true;
        self.ready = true;
        Ok(())
    }

    fn pull(&mut self) -> Option<&[u8]> {
        if !self.ready {
            return None;
        }
        self.ready = false;
        self.line.clear();
        Some(self.line.line())
    }
}

/// Bring a mask sample onto the image's scale.
fn resample(value: u32, from: Bpc, to: Bpc) -> u32 {
    match (from, to) {
        (Bpc::One, _) => {
            if value != 0 {
                to.max_value()
            } else {
                0
            }
        }
        (Bpc::Eight, Bpc::Sixteen) => value * 257,
        (Bpc::Sixteen, Bpc::Eight) => value >> 8,
        _ => value,
    }
}
