// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filter registry — maps configured filter names onto the filters this
// build provides.

pub mod alpha_div;
pub mod decimate;
pub mod interpolate;
pub mod mask_scaler;
pub mod smooth;

use rasterwerk_core::config::PipelineConfig;
use tracing::debug;

use crate::filter::{Filter, ImageFilter};

pub use alpha_div::AlphaDivide;
pub use decimate::{Decimate, DecimateMode};
pub use interpolate::Interpolate;
pub use mask_scaler::MaskScaler;
pub use smooth::Smooth;

/// Every filter name [`expose`] recognises.
pub const FILTER_NAMES: [&str; 6] = [
    mask_scaler::NAME,
    alpha_div::NAME,
    smooth::NAME,
    interpolate::NAME,
    decimate::AVERAGE,
    decimate::DECIMATE,
];

/// Look up a filter by name. Unknown names yield a dead slot that rejects
/// every image.
pub fn expose(name: &str, config: &PipelineConfig) -> Filter {
    let filter: Box<dyn ImageFilter> = match name {
        mask_scaler::NAME => Box::new(MaskScaler::new(config.mask_scaler.clone())),
        alpha_div::NAME => Box::new(AlphaDivide),
        smooth::NAME => Box::new(Smooth::new(config.smooth.clone())),
        interpolate::NAME => Box::new(Interpolate::new(config.interpolate.clone())),
        decimate::AVERAGE => Box::new(Decimate::average(config.decimate.clone())),
        decimate::DECIMATE => Box::new(Decimate::decimate(config.decimate.clone())),
        _ => {
            debug!(name, "Unknown filter, slot will stay dead");
            return Filter::Dead { name: name.into() };
        }
    };
    Filter::Local(filter)
}
