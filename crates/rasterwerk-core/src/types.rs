// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types shared by the preparer, the filters and the chain.

use serde::{Deserialize, Serialize};

/// Normalised bits per component. Every line that leaves the preparer or a
/// filter uses one of these three depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bpc {
    /// Packed bits, most significant bit first. Masks only.
    One,
    /// One byte per sample.
    Eight,
    /// One native-endian `u16` per sample.
    Sixteen,
}

impl Bpc {
    /// Map a raw bit depth onto a normalised depth, if it is one.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::One),
            8 => Some(Self::Eight),
            16 => Some(Self::Sixteen),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }

    /// Storage used by one sample at this depth.
    pub fn container(self) -> ContainerSize {
        match self {
            Self::One => ContainerSize::Bits,
            Self::Eight => ContainerSize::Byte,
            Self::Sixteen => ContainerSize::Word,
        }
    }

    /// Largest sample value at this depth.
    pub fn max_value(self) -> u32 {
        match self {
            Self::One => 1,
            Self::Eight => 0xff,
            Self::Sixteen => 0xffff,
        }
    }

    /// Bytes needed for `samples` samples at this depth.
    pub fn line_bytes(self, samples: usize) -> usize {
        match self {
            Self::One => samples.div_ceil(8),
            Self::Eight => samples,
            Self::Sixteen => samples * 2,
        }
    }
}

/// Byte size of a sample container. `Bits` means samples are packed below
/// byte granularity (the 1-bit case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerSize {
    Bits = 0,
    Byte = 1,
    Word = 2,
}

impl ContainerSize {
    pub fn bytes(self) -> usize {
        self as usize
    }
}

/// Which half of an image/mask combination a stream of lines belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageRole {
    Image,
    Mask,
}

/// How far the damage of an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Render the image through the unfiltered path instead.
    Fallback,
    /// Abandon this image; the rest of the page is unaffected.
    AbortImage,
    /// Stop rendering altogether.
    Fatal,
}

/// Raw bit depths a page description may deliver.
pub const SOURCE_DEPTHS: [u8; 6] = [1, 2, 4, 8, 12, 16];

/// Bytes occupied by `samples` raw samples of `bits` bits each.
pub fn packed_bytes(samples: usize, bits: u8) -> usize {
    (samples * bits as usize).div_ceil(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containers_follow_depth() {
        assert_eq!(Bpc::One.container(), ContainerSize::Bits);
        assert_eq!(Bpc::Eight.container().bytes(), 1);
        assert_eq!(Bpc::Sixteen.container().bytes(), 2);
        assert_eq!(Bpc::from_bits(12), None);
    }

    #[test]
    fn line_sizes() {
        assert_eq!(Bpc::One.line_bytes(9), 2);
        assert_eq!(Bpc::Sixteen.line_bytes(3), 6);
        assert_eq!(packed_bytes(3, 12), 5);
        assert_eq!(packed_bytes(5, 2), 2);
    }
}
