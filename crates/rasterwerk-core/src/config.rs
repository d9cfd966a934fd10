// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::error::{RasterwerkError, Result};

/// Filter chain and normalisation settings. One instance configures both the
/// image chain and the mask chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Always-on filters, in chain order.
    pub filters: Vec<String>,
    /// Filters only considered when the image asks for interpolation. They
    /// run ahead of `filters`.
    pub interpolators: Vec<String>,
    /// Skip the interpolators even for images that request interpolation.
    pub force_no_interpolation: bool,
    /// Normalise 12- and 16-bit sources to 16-bit containers rather than 8-bit.
    pub preserve_16bit: bool,
    pub smooth: SmoothConfig,
    pub mask_scaler: MaskScalerConfig,
    pub interpolate: InterpolateConfig,
    pub decimate: DecimateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filters: vec!["alpha-divide".into(), "smooth".into(), "average".into()],
            interpolators: vec!["mask-scaler".into(), "interpolate".into()],
            force_no_interpolation: false,
            preserve_16bit: false,
            smooth: SmoothConfig::default(),
            mask_scaler: MaskScalerConfig::default(),
            interpolate: InterpolateConfig::default(),
            decimate: DecimateConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject settings no filter can work with.
    pub fn validate(&self) -> Result<()> {
        if self.smooth.max_run == 0 {
            return Err(RasterwerkError::InvalidConfig(
                "smooth.max_run must be at least 1".into(),
            ));
        }
        if self.smooth.skew_tolerance.is_nan() || self.smooth.skew_tolerance < 0.0 {
            return Err(RasterwerkError::InvalidConfig(
                "smooth.skew_tolerance must be non-negative".into(),
            ));
        }
        if self.mask_scaler.max_overscale.is_nan() || self.mask_scaler.max_overscale < 1.0 {
            return Err(RasterwerkError::InvalidConfig(
                "mask_scaler.max_overscale must be at least 1.0".into(),
            ));
        }
        if self.interpolate.max_factor < 1 {
            return Err(RasterwerkError::InvalidConfig(
                "interpolate.max_factor must be at least 1".into(),
            ));
        }
        if self.decimate.min_factor < 2 {
            return Err(RasterwerkError::InvalidConfig(
                "decimate.min_factor must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the anti-banding smooth filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothConfig {
    /// Largest per-channel difference still treated as the same colour.
    pub tolerance: u8,
    /// Colours with any channel at or above this value are never merged.
    pub white_threshold: u8,
    /// Longest run a single base colour may cover.
    pub max_run: u32,
    /// Images narrower than this are left alone.
    pub min_width: u32,
    /// Images shorter than this are left alone.
    pub min_height: u32,
    /// Minimum device pixels per image pixel on both axes.
    pub min_scale: f64,
    /// How far off axis-aligned the device transform may be.
    pub skew_tolerance: f64,
}

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            tolerance: 3,
            white_threshold: 240,
            max_run: 32,
            min_width: 64,
            min_height: 64,
            min_scale: 1.0,
            skew_tolerance: 0.01,
        }
    }
}

/// Settings for the 1-bit mask enlarger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskScalerConfig {
    /// Largest ratio of enlarged mask size to device size on either axis.
    pub max_overscale: f64,
}

impl Default for MaskScalerConfig {
    fn default() -> Self {
        Self { max_overscale: 1.5 }
    }
}

/// Settings for bilinear interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolateConfig {
    /// Largest enlargement factor on either axis.
    pub max_factor: u32,
}

impl Default for InterpolateConfig {
    fn default() -> Self {
        Self { max_factor: 4 }
    }
}

/// Settings shared by the average and decimate filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimateConfig {
    /// Images must exceed the device size by at least this factor on one
    /// axis before they are reduced.
    pub min_factor: u32,
}

impl Default for DecimateConfig {
    fn default() -> Self {
        Self { min_factor: 2 }
    }
}
