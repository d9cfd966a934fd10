// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rasterwerk filter pipeline — scanline normalisation, the image filters and
// the push/pull chains that connect them.

pub mod chain;
pub mod filter;
pub mod filters;
pub mod packer;
pub mod pipeline;
pub mod preparer;
pub mod transaction;

pub use chain::{ImageFilterChain, LinkState, Resume};
pub use filter::{
    Filter, FilterController, FilterInstance, FilteredImageArgs, FilteredImageResult,
    ImageContext, ImageFilter,
};
pub use filters::{FILTER_NAMES, expose};
pub use packer::Packer;
pub use pipeline::{CollectedLines, ImagePipeline, LineSink, RenderSummary};
pub use preparer::{
    ColorContext, DataPreparer, ImageSource, IndexedSpace, MaskData, MaskDesc, MemoryProvider,
    PaletteContext, SampleProvider, SourceType,
};
pub use transaction::Transaction;
