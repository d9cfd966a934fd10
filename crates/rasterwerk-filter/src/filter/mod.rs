// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The filter contract. Every filter negotiates with `present` before it is
// built, is built with `construct`, then exchanges lines through `push` and
// `pull`. Dropping an instance destroys it.

pub mod args;
pub mod context;

use rasterwerk_core::error::{RasterwerkError, Result};

use crate::transaction::{Transaction, zeroed};

pub use args::{FilteredImageArgs, FilteredImageResult, Geometry, SourceAttributes};
pub use context::ImageContext;

/// A filter as exposed by the registry. Holds no per-image state.
pub trait ImageFilter {
    /// Registry identifier, e.g. `"mask-scaler"`.
    fn name(&self) -> &'static str;

    /// Decide whether this filter would process the image described by
    /// `args`. On acceptance `changes`, which the caller initialises to
    /// `args.unchanged()`, holds the output shape.
    ///
    /// Must not allocate and must give the same answer however often it is
    /// called.
    fn present(&self, args: &FilteredImageArgs, changes: &mut FilteredImageResult) -> bool;

    /// Build an instance producing `target`. Only called after `present`
    /// accepted the same `args`.
    fn construct(
        &self,
        args: &FilteredImageArgs,
        target: &FilteredImageResult,
        ctx: &mut ImageContext,
    ) -> Result<Box<dyn FilterInstance>>;

    /// Whether a [`FilterController`] may change this filter's output size.
    fn resizable(&self) -> bool {
        false
    }
}

/// A filter built for one image.
pub trait FilterInstance {
    /// Offer input. The filter consumes as much of `data` as it can and
    /// leaves the rest unread. An empty transaction is a tick that lets the
    /// filter make progress on data it already holds.
    fn push(&mut self, data: &mut Transaction) -> Result<()>;

    /// The next output line, if one is ready. The slice stays valid until the
    /// next `push`; pulling again without pushing yields `None`.
    fn pull(&mut self) -> Option<&[u8]>;
}

/// One slot of a filter chain.
pub enum Filter {
    Local(Box<dyn ImageFilter>),
    /// A filter this build does not provide. Rejects every image.
    Dead { name: String },
}

impl Filter {
    pub fn name(&self) -> &str {
        match self {
            Self::Local(filter) => filter.name(),
            Self::Dead { name } => name,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead { .. })
    }

    pub fn present(&self, args: &FilteredImageArgs, changes: &mut FilteredImageResult) -> bool {
        match self {
            Self::Local(filter) => filter.present(args, changes),
            Self::Dead { .. } => false,
        }
    }

    pub fn construct(
        &self,
        args: &FilteredImageArgs,
        target: &FilteredImageResult,
        ctx: &mut ImageContext,
    ) -> Result<Box<dyn FilterInstance>> {
        match self {
            Self::Local(filter) => filter.construct(args, target, ctx),
            Self::Dead { name } => Err(RasterwerkError::FilterConstruct {
                filter: name.clone(),
                reason: "filter is not available in this build".into(),
            }),
        }
    }

    pub fn resizable(&self) -> bool {
        match self {
            Self::Local(filter) => filter.resizable(),
            Self::Dead { .. } => false,
        }
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(filter) => f.debug_tuple("Local").field(&filter.name()).finish(),
            Self::Dead { name } => f.debug_struct("Dead").field("name", name).finish(),
        }
    }
}

/// Caller hook consulted after a resizable filter accepts an image and
/// before it is constructed. Returns `true` if it changed `target`.
pub trait FilterController {
    fn adjust(&self, filter: &str, args: &FilteredImageArgs, target: &mut FilteredImageResult)
    -> bool;
}

// -- Line assembly ------------------------------------------------------------

/// Gathers pushed bytes into whole lines. Pushes may split lines anywhere.
#[derive(Debug)]
pub(crate) struct LineAccumulator {
    line: Vec<u8>,
    filled: usize,
}

impl LineAccumulator {
    pub(crate) fn new(len: usize) -> Result<Self> {
        Ok(Self {
            line: zeroed(len)?,
            filled: 0,
        })
    }

    /// Take bytes from `data` until the line is complete. Returns `true` once
    /// it is.
    pub(crate) fn fill(&mut self, data: &mut Transaction) -> bool {
        let wanted = (self.line.len() - self.filled).min(data.available());
        if wanted > 0 {
            let bytes = data.read(wanted);
            self.line[self.filled..self.filled + wanted].copy_from_slice(bytes);
            self.filled += wanted;
        }
        self.is_full()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.filled == self.line.len()
    }

    pub(crate) fn line(&self) -> &[u8] {
        &self.line
    }

    /// Start the next line.
    pub(crate) fn clear(&mut self) {
        self.filled = 0;
    }
}
