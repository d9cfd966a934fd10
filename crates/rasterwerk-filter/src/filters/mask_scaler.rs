// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mask scaler — enlarges 1-bit masks exactly 4x on both axes, cutting or
// filling the corners of each 4x4 output block where the surrounding pixels
// show a diagonal edge.
//
// Each input pixel looks at a 3-wide, 5-tall neighbourhood (15 bits,
// bit `row * 3 + col`, edges replicated). The corner rules are written for
// the top-left corner; the other three corners use the same rules on a
// mirrored neighbourhood.

use rasterwerk_core::config::MaskScalerConfig;
use rasterwerk_core::error::{RasterwerkError, Result};
use rasterwerk_core::types::{Bpc, ImageRole};
use tracing::debug;

use crate::filter::{
    FilterInstance, FilteredImageArgs, FilteredImageResult, ImageContext, ImageFilter,
    LineAccumulator,
};
use crate::transaction::{Transaction, zeroed};

pub const NAME: &str = "mask-scaler";

const SCALE: u32 = 4;
const WINDOW: usize = 5;
const CONTEXTS: usize = 1 << 15;

// -- Neighbourhood bits -------------------------------------------------------

const fn at(row: u16, col: u16) -> u16 {
    1 << (row * 3 + col)
}

const NN: u16 = at(0, 1);
const NW: u16 = at(1, 0);
const N: u16 = at(1, 1);
const W: u16 = at(2, 0);
const C: u16 = at(2, 1);
const E: u16 = at(2, 2);
const S: u16 = at(3, 1);
const SE: u16 = at(3, 2);
const SS: u16 = at(4, 1);

/// `(care, value)`: the top-left corner of an empty pixel is filled when
/// `context & care == value`.
const ADD: [(u16, u16); 2] = [(N | W | E | S, N | W), (NN | N | W | NW | E, NN | N | W | NW)];

/// The top-left corner of a set pixel is cut when `context & care == value`.
const REMOVE: [(u16, u16); 2] = [
    (N | W | NW | E | S | SS, E | S | SS),
    (N | W | NW | E | S | SE, E | S | SE),
];

// -- Output blocks --------------------------------------------------------------

// A block is 16 bits, four per output row, the leftmost sub-pixel in the
// high bit of each nibble.
const fn sub(row: u16, col: u16) -> u16 {
    1 << (row * 4 + (3 - col))
}

const TOP_LEFT: u16 = sub(0, 0) | sub(0, 1) | sub(1, 0);
const TOP_RIGHT: u16 = sub(0, 3) | sub(0, 2) | sub(1, 3);
const BOTTOM_LEFT: u16 = sub(3, 0) | sub(3, 1) | sub(2, 0);
const BOTTOM_RIGHT: u16 = sub(3, 3) | sub(3, 2) | sub(2, 3);

fn mirror_columns(context: u16) -> u16 {
    let mut out = 0;
    for row in 0..5 {
        for col in 0..3 {
            if context & at(row, col) != 0 {
                out |= at(row, 2 - col);
            }
        }
    }
    out
}

fn mirror_rows(context: u16) -> u16 {
    let mut out = 0;
    for row in 0..5 {
        for col in 0..3 {
            if context & at(row, col) != 0 {
                out |= at(4 - row, col);
            }
        }
    }
    out
}

fn matches(rules: &[(u16, u16)], context: u16) -> bool {
    rules.iter().any(|&(care, value)| context & care == value)
}

/// The 4x4 block an input pixel with this neighbourhood expands to.
fn block_for(context: u16) -> u16 {
    let flipped = mirror_rows(context);
    let corners = [
        (context, TOP_LEFT),
        (mirror_columns(context), TOP_RIGHT),
        (flipped, BOTTOM_LEFT),
        (mirror_columns(flipped), BOTTOM_RIGHT),
    ];
    if context & C != 0 {
        corners
            .iter()
            .filter(|(view, _)| matches(&REMOVE, *view))
            .fold(u16::MAX, |block, (_, corner)| block & !corner)
    } else {
        corners
            .iter()
            .filter(|(view, _)| matches(&ADD, *view))
            .fold(0, |block, (_, corner)| block | corner)
    }
}

fn pixel(line: &[u8], x: usize) -> u16 {
    u16::from((line[x / 8] >> (7 - x % 8)) & 1)
}

// -- Filter -------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MaskScaler {
    config: MaskScalerConfig,
}

impl MaskScaler {
    pub fn new(config: MaskScalerConfig) -> Self {
        Self { config }
    }
}

impl ImageFilter for MaskScaler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn present(&self, args: &FilteredImageArgs, changes: &mut FilteredImageResult) -> bool {
        if args.role != ImageRole::Mask
            || args.bpc != Bpc::One
            || args.colorants != 1
            || !args.interpolate
            || args.source.matte.is_some()
        {
            return false;
        }
        if args.device_width < args.width || args.device_height < args.height {
            return false;
        }
        let (Some(width), Some(height)) =
            (args.width.checked_mul(SCALE), args.height.checked_mul(SCALE))
        else {
            return false;
        };
        let limit = self.config.max_overscale;
        if f64::from(width) > limit * f64::from(args.device_width)
            || f64::from(height) > limit * f64::from(args.device_height)
        {
            return false;
        }
        changes.width = width;
        changes.height = height;
        changes.interpolate = false;
        true
    }

    fn construct(
        &self,
        args: &FilteredImageArgs,
        target: &FilteredImageResult,
        _ctx: &mut ImageContext,
    ) -> Result<Box<dyn FilterInstance>> {
        if args.width.checked_mul(SCALE) != Some(target.width)
            || args.height.checked_mul(SCALE) != Some(target.height)
        {
            return Err(RasterwerkError::FilterConstruct {
                filter: NAME.into(),
                reason: format!(
                    "cannot produce {}x{} from {}x{}",
                    target.width, target.height, args.width, args.height
                ),
            });
        }
        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(CONTEXTS)
            .map_err(|_| RasterwerkError::Allocation {
                bytes: CONTEXTS * 2,
            })?;
        blocks.extend((0..CONTEXTS).map(|context| block_for(context as u16)));

        let in_bytes = args.line_bytes();
        let out_bytes = Bpc::One.line_bytes(target.width as usize);
        let ring = (0..WINDOW)
            .map(|_| zeroed(in_bytes))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            width = args.width,
            height = args.height,
            "Mask scaler constructed"
        );
        Ok(Box::new(MaskScalerInstance {
            width: args.width as usize,
            height: args.height,
            out_bytes,
            blocks,
            ring,
            line: LineAccumulator::new(in_bytes)?,
            lines_in: 0,
            next_center: 0,
            output: zeroed(out_bytes * SCALE as usize)?,
            emitted: SCALE as usize,
        }))
    }
}

struct MaskScalerInstance {
    width: usize,
    height: u32,
    out_bytes: usize,
    /// Output block for every neighbourhood.
    blocks: Vec<u16>,
    /// The last five input lines, line `n` in slot `n % 5`.
    ring: Vec<Vec<u8>>,
    line: LineAccumulator,
    lines_in: u32,
    /// Next input row to expand.
    next_center: u32,
    /// Four output lines for the last expanded row.
    output: Vec<u8>,
    /// Output lines of `output` already pulled.
    emitted: usize,
}

impl MaskScalerInstance {
    /// Room for another input line without overwriting one still needed.
    fn accepts_input(&self) -> bool {
        self.lines_in < self.height && self.lines_in <= self.next_center + 2
    }

    fn center_ready(&self) -> bool {
        self.next_center < self.height
            && self.lines_in >= (self.next_center + 3).min(self.height)
    }

    /// Expand the next row once the previous block has been pulled.
    fn advance(&mut self) {
        if self.emitted == SCALE as usize && self.center_ready() {
            self.expand_center();
        }
    }

    fn expand_center(&mut self) {
        let y = self.next_center as i64;
        let last = i64::from(self.height) - 1;
        let rows: [&[u8]; WINDOW] = std::array::from_fn(|r| {
            let row = (y - 2 + r as i64).clamp(0, last) as usize;
            self.ring[row % WINDOW].as_slice()
        });
        self.output.fill(0);
        for x in 0..self.width {
            let left = x.saturating_sub(1);
            let right = (x + 1).min(self.width - 1);
            let mut context = 0u16;
            for (r, row) in rows.iter().enumerate() {
                for (c, col) in [left, x, right].into_iter().enumerate() {
                    context |= pixel(row, col) << (r * 3 + c);
                }
            }
            let block = self.blocks[context as usize];
            let shift = if x % 2 == 0 { 4 } else { 0 };
            for sub_row in 0..SCALE as usize {
                let nibble = ((block >> (sub_row * 4)) & 0xf) as u8;
                self.output[sub_row * self.out_bytes + x / 2] |= nibble << shift;
            }
        }
        self.next_center += 1;
        self.emitted = 0;
    }
}

impl FilterInstance for MaskScalerInstance {
    fn push(&mut self, data: &mut Transaction) -> Result<()> {
        self.advance();
        if self.accepts_input() && self.line.fill(data) {
            let slot = self.lines_in as usize % WINDOW;
            self.ring[slot].copy_from_slice(self.line.line());
            self.line.clear();
            self.lines_in += 1;
        }
        self.advance();
        Ok(())
    }

    fn pull(&mut self) -> Option<&[u8]> {
        if self.emitted >= SCALE as usize {
            return None;
        }
        let start = self.emitted * self.out_bytes;
        self.emitted += 1;
        Some(&self.output[start..start + self.out_bytes])
    }
}
