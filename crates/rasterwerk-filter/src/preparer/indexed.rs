// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Indexed colour. Palette indices are expanded to 8-bit base-space colour
// through a decode table (raw value to index) and a colour table (index to
// components), both built once per image from the external colour context.

use rasterwerk_core::error::{RasterwerkError, Result};
use tracing::{debug, warn};

use super::source::IndexedSpace;
use crate::transaction::zeroed;

/// The caller's graphics state, as far as indexed images need it.
///
/// The preparer calls `save` once before touching the context and `restore`
/// exactly once when it is dropped.
pub trait ColorContext {
    fn save(&mut self) -> Result<()>;
    fn restore(&mut self) -> Result<()>;
    /// Make the base space of the current indexed space current and return
    /// its colorant count.
    fn select_base_space(&mut self) -> Result<usize>;
    /// Components of palette entry `index`, each in `[0, 1]`.
    fn lookup(&mut self, index: u32, components: &mut [f32]) -> Result<()>;
}

/// In-memory palette of 8-bit base-space components.
#[derive(Debug, Clone, Default)]
pub struct PaletteContext {
    base: usize,
    palette: Vec<u8>,
    depth: u32,
    saves: u32,
    restores: u32,
}

impl PaletteContext {
    /// `palette` holds `base` bytes per entry.
    pub fn new(base: usize, palette: Vec<u8>) -> Self {
        Self {
            base,
            palette,
            ..Self::default()
        }
    }

    pub fn saves(&self) -> u32 {
        self.saves
    }

    pub fn restores(&self) -> u32 {
        self.restores
    }
}

impl ColorContext for PaletteContext {
    fn save(&mut self) -> Result<()> {
        if self.depth > 0 {
            return Err(RasterwerkError::ColorContext(
                "colour context saved twice without a restore".into(),
            ));
        }
        self.depth += 1;
        self.saves += 1;
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(RasterwerkError::ColorContext(
                "colour context restored without a save".into(),
            ));
        }
        self.depth -= 1;
        self.restores += 1;
        Ok(())
    }

    fn select_base_space(&mut self) -> Result<usize> {
        if self.base == 0 {
            return Err(RasterwerkError::ColorContext("palette has no base space".into()));
        }
        Ok(self.base)
    }

    fn lookup(&mut self, index: u32, components: &mut [f32]) -> Result<()> {
        let start = index as usize * self.base;
        let entry = self.palette.get(start..start + self.base).ok_or_else(|| {
            RasterwerkError::ColorContext(format!("palette has no entry {index}"))
        })?;
        for (out, &value) in components.iter_mut().zip(entry) {
            *out = f32::from(value) / 255.0;
        }
        Ok(())
    }
}

// -- Lookup tables ------------------------------------------------------------

/// Decode and colour tables for one indexed image. Holds the colour context
/// saved until dropped.
pub(crate) struct IndexedState<'c> {
    color: &'c mut dyn ColorContext,
    bits: u8,
    base: usize,
    decode: Vec<u8>,
    colors: Vec<u8>,
}

impl<'c> IndexedState<'c> {
    pub(crate) fn new(
        color: &'c mut dyn ColorContext,
        space: &IndexedSpace,
        bits: u8,
    ) -> Result<Self> {
        color.save()?;
        // From here on, dropping `state` restores the context.
        let mut state = Self {
            color,
            bits,
            base: 0,
            decode: Vec::new(),
            colors: Vec::new(),
        };
        state.base = state.color.select_base_space()?;
        if state.base == 0 {
            return Err(RasterwerkError::ColorContext(
                "indexed base space has no colorants".into(),
            ));
        }

        let entries = 1usize << bits;
        let top = (entries - 1) as f32;
        let (dmin, dmax) = space.decode.map_or((0.0, top), |[lo, hi]| (lo, hi));
        state.decode = zeroed(entries)?;
        for (value, index) in state.decode.iter_mut().enumerate() {
            let mapped = dmin + value as f32 * (dmax - dmin) / top;
            *index = mapped.round().clamp(0.0, space.hival as f32) as u8;
        }

        let palette_len = space.hival as usize + 1;
        state.colors = zeroed(palette_len * state.base)?;
        let mut components = vec![0.0f32; state.base];
        for index in 0..palette_len {
            state.color.lookup(index as u32, &mut components)?;
            let entry = &mut state.colors[index * state.base..(index + 1) * state.base];
            for (out, &component) in entry.iter_mut().zip(&components) {
                *out = (component.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
        debug!(bits, base = state.base, hival = space.hival, "Indexed colour tables built");
        Ok(state)
    }

    /// Colorants of the expanded output.
    pub(crate) fn base(&self) -> usize {
        self.base
    }

    /// Expand `width` raw indices into 8-bit colour, returning the bytes
    /// written.
    pub(crate) fn lookup(&self, raw: &[u8], out: &mut [u8], width: usize) -> usize {
        if self.bits == 8 && self.base == 3 {
            return self.lookup_rgb8(raw, out, width);
        }
        let base = self.base;
        for (pixel, chunk) in out[..width * base].chunks_exact_mut(base).enumerate() {
            let index = self.decode[raw_index(raw, pixel, self.bits)] as usize;
            chunk.copy_from_slice(&self.colors[index * base..(index + 1) * base]);
        }
        width * base
    }

    /// 8-bit indices into a three-colorant base space.
    fn lookup_rgb8(&self, raw: &[u8], out: &mut [u8], width: usize) -> usize {
        for (chunk, &value) in out[..width * 3].chunks_exact_mut(3).zip(&raw[..width]) {
            let index = self.decode[value as usize] as usize * 3;
            chunk.copy_from_slice(&self.colors[index..index + 3]);
        }
        width * 3
    }
}

impl Drop for IndexedState<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.color.restore() {
            warn!(error = %err, "Failed to restore colour context after indexed image");
        }
    }
}

fn raw_index(raw: &[u8], pixel: usize, bits: u8) -> usize {
    let bit_offset = pixel * bits as usize;
    let shift = 8 - bits as usize - bit_offset % 8;
    ((raw[bit_offset / 8] >> shift) & (((1u16 << bits) - 1) as u8)) as usize
}
