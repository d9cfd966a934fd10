// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Rasterwerk.

use thiserror::Error;

use crate::types::ErrorClass;

/// Top-level error type for all Rasterwerk operations.
#[derive(Debug, Error)]
pub enum RasterwerkError {
    // -- Resources --
    #[error("failed to allocate {bytes} bytes")]
    Allocation { bytes: usize },

    // -- Source data --
    #[error("unsupported image source: {0}")]
    UnsupportedSource(String),

    #[error("unsupported sample conversion: {from}-bit to {to}-bit")]
    UnsupportedConversion { from: u8, to: u8 },

    #[error("image data ended early: {lines_read} of {height} lines read")]
    PrematureEnd { lines_read: u32, height: u32 },

    #[error("sample provider failed: {0}")]
    Provider(String),

    #[error("colour context failed: {0}")]
    ColorContext(String),

    // -- Filters --
    #[error("filter negotiation failed: {0}")]
    Negotiation(String),

    #[error("filter {filter} could not be constructed: {reason}")]
    FilterConstruct { filter: String, reason: String },

    #[error("filter chain protocol violation: {0}")]
    ChainProtocol(String),

    #[error("pipeline stalled after {lines_read} source lines")]
    Stalled { lines_read: u32 },

    // -- Configuration / persistence --
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("image processing failed: {0}")]
    ImageError(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RasterwerkError>;

/// Classify a `RasterwerkError` by how far its damage reaches.
pub fn classify_error(err: &RasterwerkError) -> ErrorClass {
    match err {
        // The caller renders the image through the unfiltered path instead.
        RasterwerkError::UnsupportedSource(_) => ErrorClass::Fallback,
        RasterwerkError::UnsupportedConversion { .. } => ErrorClass::Fallback,
        RasterwerkError::Negotiation(_) => ErrorClass::Fallback,

        // This image is lost, the page carries on.
        RasterwerkError::PrematureEnd { .. } => ErrorClass::AbortImage,
        RasterwerkError::Provider(_) => ErrorClass::AbortImage,
        RasterwerkError::ColorContext(_) => ErrorClass::AbortImage,
        RasterwerkError::FilterConstruct { .. } => ErrorClass::AbortImage,
        RasterwerkError::Stalled { .. } => ErrorClass::AbortImage,
        RasterwerkError::ImageError(_) => ErrorClass::AbortImage,

        RasterwerkError::Allocation { .. } => ErrorClass::Fatal,
        RasterwerkError::ChainProtocol(_) => ErrorClass::Fatal,
        RasterwerkError::InvalidConfig(_) => ErrorClass::Fatal,
        RasterwerkError::Serialization(_) => ErrorClass::Fatal,
        RasterwerkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorClass::Fatal
            }
            _ => ErrorClass::AbortImage,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_topology_falls_back() {
        let err = RasterwerkError::UnsupportedSource("planar sample-interleaved mask".into());
        assert_eq!(classify_error(&err), ErrorClass::Fallback);
    }

    #[test]
    fn premature_end_aborts_only_the_image() {
        let err = RasterwerkError::PrematureEnd {
            lines_read: 3,
            height: 10,
        };
        assert_eq!(classify_error(&err), ErrorClass::AbortImage);
        assert_eq!(err.to_string(), "image data ended early: 3 of 10 lines read");
    }

    #[test]
    fn allocation_failure_is_fatal() {
        let err = RasterwerkError::Allocation { bytes: 1 << 40 };
        assert_eq!(classify_error(&err), ErrorClass::Fatal);
    }
}
