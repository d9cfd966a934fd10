// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Average and decimate — reduce images far larger than their device area by
// whole blocks of pixels. Average emits each block's mean, decimate its
// top-left sample.

use rasterwerk_core::config::DecimateConfig;
use rasterwerk_core::error::{RasterwerkError, Result};
use rasterwerk_core::types::Bpc;
use tracing::debug;

use crate::filter::{
    FilterInstance, FilteredImageArgs, FilteredImageResult, ImageContext, ImageFilter,
    LineAccumulator,
};
use crate::packer::{read_sample, write_sample};
use crate::transaction::{Transaction, zeroed};

pub const AVERAGE: &str = "average";
pub const DECIMATE: &str = "decimate";

/// What a reduced pixel is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimateMode {
    Average,
    TopLeft,
}

#[derive(Debug, Clone)]
pub struct Decimate {
    mode: DecimateMode,
    config: DecimateConfig,
}

impl Decimate {
    pub fn average(config: DecimateConfig) -> Self {
        Self {
            mode: DecimateMode::Average,
            config,
        }
    }

    pub fn decimate(config: DecimateConfig) -> Self {
        Self {
            mode: DecimateMode::TopLeft,
            config,
        }
    }

    /// Block size on each axis for an image of `args`' shape.
    fn factors(args: &FilteredImageArgs) -> (u32, u32) {
        (
            (args.width / args.device_width.max(1)).max(1),
            (args.height / args.device_height.max(1)).max(1),
        )
    }
}

impl ImageFilter for Decimate {
    fn name(&self) -> &'static str {
        match self.mode {
            DecimateMode::Average => AVERAGE,
            DecimateMode::TopLeft => DECIMATE,
        }
    }

    fn present(&self, args: &FilteredImageArgs, changes: &mut FilteredImageResult) -> bool {
        if args.bpc == Bpc::One || args.device_width == 0 || args.device_height == 0 {
            return false;
        }
        let min = self.config.min_factor;
        let far_wider = args.width >= args.device_width.saturating_mul(min);
        let far_taller = args.height >= args.device_height.saturating_mul(min);
        if !far_wider && !far_taller {
            return false;
        }
        let (fx, fy) = Self::factors(args);
        changes.width = args.width.div_ceil(fx);
        changes.height = args.height.div_ceil(fy);
        true
    }

    fn construct(
        &self,
        args: &FilteredImageArgs,
        target: &FilteredImageResult,
        _ctx: &mut ImageContext,
    ) -> Result<Box<dyn FilterInstance>> {
        let (fx, fy) = Self::factors(args);
        if target.width != args.width.div_ceil(fx) || target.height != args.height.div_ceil(fy) {
            return Err(RasterwerkError::FilterConstruct {
                filter: self.name().into(),
                reason: format!(
                    "{}x{} is not a whole-block reduction of {}x{}",
                    target.width, target.height, args.width, args.height
                ),
            });
        }
        let colorants = args.colorants as usize;
        let samples = target.width as usize * colorants;
        let mut sums = Vec::new();
        sums.try_reserve_exact(samples)
            .map_err(|_| RasterwerkError::Allocation { bytes: samples * 8 })?;
        sums.resize(samples, 0);
        debug!(mode = ?self.mode, fx, fy, "Decimation constructed");
        Ok(Box::new(DecimateInstance {
            mode: self.mode,
            bpc: args.bpc,
            colorants,
            width: args.width as usize,
            height: args.height,
            fx: fx as usize,
            fy,
            line: LineAccumulator::new(args.line_bytes())?,
            rows_in: 0,
            sums,
            out: zeroed(args.bpc.line_bytes(samples))?,
            ready: false,
        }))
    }
}

struct DecimateInstance {
    mode: DecimateMode,
    bpc: Bpc,
    colorants: usize,
    width: usize,
    height: u32,
    fx: usize,
    fy: u32,
    line: LineAccumulator,
    rows_in: u32,
    /// Running per-sample totals for the current band of `fy` lines.
    sums: Vec<u64>,
    out: Vec<u8>,
    ready: bool,
}

impl DecimateInstance {
    fn accumulate(&mut self) {
        let first_in_band = self.rows_in % self.fy == 0;
        let line = self.line.line();
        match self.mode {
            DecimateMode::Average => {
                for x in 0..self.width {
                    for c in 0..self.colorants {
                        let value = read_sample(line, x * self.colorants + c, self.bpc);
                        self.sums[(x / self.fx) * self.colorants + c] += u64::from(value);
                    }
                }
            }
            DecimateMode::TopLeft if first_in_band => {
                for (i, sum) in self.sums.iter_mut().enumerate() {
                    let (ox, c) = (i / self.colorants, i % self.colorants);
                    *sum = u64::from(read_sample(line, ox * self.fx * self.colorants + c, self.bpc));
                }
            }
            DecimateMode::TopLeft => {}
        }
    }

    /// Write the finished band and start the next.
    fn emit(&mut self, band_rows: u32) {
        for (i, sum) in self.sums.iter_mut().enumerate() {
            let value = match self.mode {
                DecimateMode::Average => {
                    let ox = i / self.colorants;
                    let columns = (self.width - ox * self.fx).min(self.fx) as u64;
                    let count = columns * u64::from(band_rows);
                    (*sum + count / 2) / count
                }
                DecimateMode::TopLeft => *sum,
            };
            write_sample(&mut self.out, i, self.bpc, value as u32);
            *sum = 0;
        }
        self.ready = true;
    }
}

impl FilterInstance for DecimateInstance {
    fn push(&mut self, data: &mut Transaction) -> Result<()> {
        if self.ready || self.rows_in >= self.height || !self.line.fill(data) {
            return Ok(());
        }
        self.accumulate();
        self.line.clear();
        self.rows_in += 1;
        let band_rows = match self.rows_in % self.fy {
            0 => self.fy,
            partial => partial,
        };
        if self.rows_in % self.fy == 0 || self.rows_in == self.height {
            self.emit(band_rows);
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
