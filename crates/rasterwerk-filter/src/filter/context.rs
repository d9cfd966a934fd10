// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-image context handed to every filter constructor. Anything filters on
// the image chain and the mask chain need to share lives here, owned by the
// image being rendered rather than by a process-wide static.

use rasterwerk_core::error::Result;

use crate::filters::alpha_div::AlphaDividePairing;

/// State shared between the filters of one image.
#[derive(Default)]
pub struct ImageContext {
    pub(crate) alpha_divide: AlphaDividePairing,
}

impl ImageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that every cross-chain pairing started during negotiation was
    /// completed. Call once both chains have negotiated.
    pub fn verify(&self) -> Result<()> {
        self.alpha_divide.verify()
    }
}
