// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rasterwerk — Core types, geometry, configuration and error definitions
// shared across all crates.

pub mod config;
pub mod error;
pub mod geometry;
pub mod types;

pub use config::PipelineConfig;
pub use error::{RasterwerkError, Result, classify_error};
pub use geometry::Affine;
pub use types::*;
