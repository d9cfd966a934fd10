// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Interpolate — bilinear enlargement of contone images towards device
// resolution, streaming with a window of two source lines. Weights are
// 8-bit fixed point.

use rasterwerk_core::config::InterpolateConfig;
use rasterwerk_core::error::{RasterwerkError, Result};
use rasterwerk_core::types::Bpc;
use tracing::debug;

use crate::filter::{
    FilterInstance, FilteredImageArgs, FilteredImageResult, ImageContext, ImageFilter,
    LineAccumulator,
};
use crate::packer::{read_sample, write_sample};
use crate::transaction::{Transaction, zeroed};

pub const NAME: &str = "interpolate";

/// For one output coordinate: the two source coordinates either side and
/// the weight of the second, in 256ths.
type Tap = (usize, usize, u64);

fn taps(source: u32, target: u32) -> Vec<Tap> {
    let last = source as usize - 1;
    (0..u64::from(target))
        .map(|i| {
            // Centre of output pixel i in source pixels, times 256, minus half
            // a pixel.
            let position = ((2 * i + 1) * u64::from(source) * 256 / (2 * u64::from(target)))
                .saturating_sub(128);
            let lower = ((position >> 8) as usize).min(last);
            let upper = (lower + 1).min(last);
            (lower, upper, position & 0xff)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Interpolate {
    config: InterpolateConfig,
}

impl Interpolate {
    pub fn new(config: InterpolateConfig) -> Self {
        Self { config }
    }
}

impl ImageFilter for Interpolate {
    fn name(&self) -> &'static str {
        NAME
    }

    fn present(&self, args: &FilteredImageArgs, changes: &mut FilteredImageResult) -> bool {
        if args.bpc == Bpc::One || !args.interpolate {
            return false;
        }
        if args.device_width < args.width || args.device_height < args.height {
            return false;
        }
        if args.device_width == args.width && args.device_height == args.height {
            return false;
        }
        let factor = self.config.max_factor;
        changes.width = args.device_width.min(args.width.saturating_mul(factor));
        changes.height = args.device_height.min(args.height.saturating_mul(factor));
        changes.interpolate = false;
        true
    }

    fn construct(
        &self,
        args: &FilteredImageArgs,
        target: &FilteredImageResult,
        _ctx: &mut ImageContext,
    ) -> Result<Box<dyn FilterInstance>> {
        if target.width < args.width || target.height < args.height || target.bpc != args.bpc {
            return Err(RasterwerkError::FilterConstruct {
                filter: NAME.into(),
                reason: format!(
                    "cannot interpolate {}x{} to {}x{}",
                    args.width, args.height, target.width, target.height
                ),
            });
        }
        let in_bytes = args.line_bytes();
        let out_bytes = args
            .bpc
            .line_bytes(target.width as usize * args.colorants as usize);
        debug!(
            from_w = args.width,
            from_h = args.height,
            to_w = target.width,
            to_h = target.height,
            "Interpolate constructed"
        );
        Ok(Box::new(InterpolateInstance {
            bpc: args.bpc,
            colorants: args.colorants as usize,
            source_height: args.height,
            columns: taps(args.width, target.width),
            rows: taps(args.height, target.height),
            window: [zeroed(in_bytes)?, zeroed(in_bytes)?],
            line: LineAccumulator::new(in_bytes)?,
            rows_in: 0,
            next_row: 0,
            out: zeroed(out_bytes)?,
            ready: false,
        }))
    }

    fn resizable(&self) -> bool {
        true
    }
}

struct InterpolateInstance {
    bpc: Bpc,
    colorants: usize,
    source_height: u32,
    columns: Vec<Tap>,
    rows: Vec<Tap>,
    /// Source line `n` lives in slot `n % 2`.
    window: [Vec<u8>; 2],
    line: LineAccumulator,
    rows_in: u32,
    next_row: usize,
    out: Vec<u8>,
    ready: bool,
}

impl FilterInstance for InterpolateInstance {
    fn push(&mut self, data: &mut Transaction) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        let Some(&(lower, upper, weight)) = self.rows.get(self.next_row) else {
            return Ok(());
        };
        if self.rows_in as usize <= upper
            && self.rows_in < self.source_height
            && self.line.fill(data)
        {
            self.window[self.rows_in as usize % 2].copy_from_slice(self.line.line());
            self.line.clear();
            self.rows_in += 1;
        }
        if self.rows_in as usize > upper {
            blend_row(
                &self.window[lower % 2],
                &self.window[upper % 2],
                weight,
                &self.columns,
                self.colorants,
                self.bpc,
                &mut self.out,
            );
            self.next_row += 1;
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

fn blend_row(
    top: &[u8],
    bottom: &[u8],
    fy: u64,
    columns: &[Tap],
    colorants: usize,
    bpc: Bpc,
    out: &mut [u8],
) {
    let sample = |line: &[u8], x: usize, c: usize| u64::from(read_sample(line, x * colorants + c, bpc));
    for (ox, &(x0, x1, fx)) in columns.iter().enumerate() {
        for c in 0..colorants {
            let upper = sample(top, x0, c) * (256 - fx) + sample(top, x1, c) * fx;
            let lower = sample(bottom, x0, c) * (256 - fx) + sample(bottom, x1, c) * fx;
            let value = (upper * (256 - fy) + lower * fy + (1 << 15)) >> 16;
            write_sample(out, ox * colorants + c, bpc, value as u32);
        }
    }
}
