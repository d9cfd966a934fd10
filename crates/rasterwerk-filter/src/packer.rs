// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pixel packer — converts raw samples of any depth a page description can
// deliver into the normalised 1-, 8- or 16-bit containers, optionally
// interleaving several sources into one line.
//
// Raw 12- and 16-bit samples are big-endian (12-bit samples pack two to
// three bytes). 16-bit containers are native-endian `u16`.

use rasterwerk_core::error::{RasterwerkError, Result};
use rasterwerk_core::types::Bpc;

/// Conversion selected once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    /// 1-, 2- or 4-bit samples scaled onto 0..=255.
    ScaleTo8 { bits: u8, scale: u8 },
    Copy8,
    Shift12To8,
    High16To8,
    Widen12To16,
    Copy16,
    /// 8- or 16-bit samples reduced to one bit: non-zero is set.
    Threshold { bits: u8 },
    CopyBits,
}

/// Stateless converter from one raw depth to one normalised depth.
///
/// With `source_count > 1` each call handles one source and writes every
/// `source_count`-th container, so calling it once per source (with the
/// target offset by that source's container) interleaves the sources.
#[derive(Debug, Clone)]
pub struct Packer {
    target: Bpc,
    source_count: usize,
    conversion: Conversion,
}

impl Packer {
    /// Select the conversion from `source_bits` to `target`.
    ///
    /// Fails for pairs with no defined conversion, and for bit-packed targets
    /// fed by more than one source.
    pub fn new(source_bits: u8, target: Bpc, source_count: usize) -> Result<Self> {
        let unsupported = RasterwerkError::UnsupportedConversion {
            from: source_bits,
            to: target.bits(),
        };
        if source_count == 0 || (target == Bpc::One && source_count != 1) {
            return Err(unsupported);
        }
        let conversion = match (source_bits, target) {
            (1 | 2 | 4, Bpc::Eight) => Conversion::ScaleTo8 {
                bits: source_bits,
                scale: (255 / ((1u16 << source_bits) - 1)) as u8,
            },
            (8, Bpc::Eight) => Conversion::Copy8,
            (12, Bpc::Eight) => Conversion::Shift12To8,
            (16, Bpc::Eight) => Conversion::High16To8,
            (12, Bpc::Sixteen) => Conversion::Widen12To16,
            (16, Bpc::Sixteen) => Conversion::Copy16,
            (8 | 16, Bpc::One) => Conversion::Threshold { bits: source_bits },
            (1, Bpc::One) => Conversion::CopyBits,
            _ => return Err(unsupported),
        };
        Ok(Self {
            target,
            source_count,
            conversion,
        })
    }

    pub fn target(&self) -> Bpc {
        self.target
    }

    /// Convert `count` samples from `source` into `target`, returning the
    /// number of bytes this source contributed.
    ///
    /// # Panics
    ///
    /// Panics if either slice is too short for `count` samples.
    pub fn pack(&self, source: &[u8], target: &mut [u8], count: usize) -> usize {
        let container = self.target.container().bytes();
        let stride = container * self.source_count;
        match self.conversion {
            Conversion::ScaleTo8 { bits, scale } => {
                for i in 0..count {
                    target[i * stride] = sub_byte_sample(source, i, bits) * scale;
                }
            }
            Conversion::Copy8 => {
                if stride == 1 {
                    target[..count].copy_from_slice(&source[..count]);
                } else {
                    for (i, &sample) in source[..count].iter().enumerate() {
                        target[i * stride] = sample;
                    }
                }
            }
            Conversion::Shift12To8 => {
                for i in 0..count {
                    target[i * stride] = (twelve_bit_sample(source, i) >> 4) as u8;
                }
            }
            Conversion::High16To8 => {
                for i in 0..count {
                    target[i * stride] = source[2 * i];
                }
            }
            Conversion::Widen12To16 => {
                for i in 0..count {
                    let v = twelve_bit_sample(source, i);
                    write_u16(target, i * stride, (v << 4) | (v >> 8));
                }
            }
            Conversion::Copy16 => {
                for i in 0..count {
                    let v = u16::from_be_bytes([source[2 * i], source[2 * i + 1]]);
                    write_u16(target, i * stride, v);
                }
            }
            Conversion::Threshold { bits: 8 } => {
                pack_bits(target, count, |i| source[i] != 0);
            }
            Conversion::Threshold { .. } => {
                pack_bits(target, count, |i| (source[2 * i] | source[2 * i + 1]) != 0);
            }
            Conversion::CopyBits => {
                let bytes = count.div_ceil(8);
                target[..bytes].copy_from_slice(&source[..bytes]);
                clear_padding(&mut target[..bytes], count);
            }
        }
        match self.target {
            Bpc::One => count.div_ceil(8),
            _ => count * container,
        }
    }

    /// Pull a 1-bit mask out of a line of normalised containers: reads
    /// `count` samples starting at `source[0]`, stepping `step` containers
    /// between them, and packs "non-zero" into `target`.
    ///
    /// Used for sample-interleaved image+mask data once the combined line has
    /// been through [`pack`](Self::pack).
    pub fn mask_pack(&self, source: &[u8], target: &mut [u8], count: usize, step: usize) -> usize {
        let target_depth = self.target;
        pack_bits(target, count, |i| read_sample(source, i * step, target_depth) != 0);
        count.div_ceil(8)
    }
}

// -- Container access ----------------------------------------------------------

/// Read sample `index` from a line of normalised containers.
pub fn read_sample(line: &[u8], index: usize, bpc: Bpc) -> u32 {
    match bpc {
        Bpc::One => u32::from((line[index / 8] >> (7 - index % 8)) & 1),
        Bpc::Eight => u32::from(line[index]),
        Bpc::Sixteen => u32::from(u16::from_ne_bytes([line[2 * index], line[2 * index + 1]])),
    }
}

/// Write sample `index` into a line of normalised containers. `value` must
/// already be within the depth's range.
pub fn write_sample(line: &mut [u8], index: usize, bpc: Bpc, value: u32) {
    match bpc {
        Bpc::One => {
            let bit = 0x80 >> (index % 8);
            if value != 0 {
                line[index / 8] |= bit;
            } else {
                line[index / 8] &= !bit;
            }
        }
        Bpc::Eight => line[index] = value as u8,
        Bpc::Sixteen => write_u16(line, 2 * index, value as u16),
    }
}

/// Zero the bits of a packed 1-bit line past its first `count` samples.
pub fn clear_padding(line: &mut [u8], count: usize) {
    let used = count % 8;
    if used != 0 {
        if let Some(last) = line.get_mut(count / 8) {
            *last &= 0xff << (8 - used);
        }
    }
}

fn write_u16(target: &mut [u8], offset: usize, value: u16) {
    target[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

fn sub_byte_sample(source: &[u8], index: usize, bits: u8) -> u8 {
    let bit_offset = index * bits as usize;
    let shift = 8 - bits as usize - bit_offset % 8;
    (source[bit_offset / 8] >> shift) & ((1u8 << bits) - 1)
}

fn twelve_bit_sample(source: &[u8], index: usize) -> u16 {
    let base = (index / 2) * 3;
    if index % 2 == 0 {
        (u16::from(source[base]) << 4) | (u16::from(source[base + 1]) >> 4)
    } else {
        (u16::from(source[base + 1] & 0x0f) << 8) | u16::from(source[base + 2])
    }
}

fn pack_bits(target: &mut [u8], count: usize, set: impl Fn(usize) -> bool) {
    for (byte_index, byte) in target[..count.div_ceil(8)].iter_mut().enumerate() {
        let mut packed = 0u8;
        for bit in 0..8 {
            let i = byte_index * 8 + bit;
            if i < count && set(i) {
                packed |= 0x80 >> bit;
            }
        }
        *byte = packed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Pack raw samples MSB-first at `bits` per sample (big-endian for 16).
    fn raw(samples: &[u16], bits: u8) -> Vec<u8> {
        let mut out = vec![0u8; (samples.len() * bits as usize).div_ceil(8)];
        for (i, &v) in samples.iter().enumerate() {
            for b in 0..bits as usize {
                if (v >> (bits as usize - 1 - b)) & 1 == 1 {
                    let pos = i * bits as usize + b;
                    out[pos / 8] |= 0x80 >> (pos % 8);
                }
            }
        }
        out
    }

    fn containers(line: &[u8], count: usize, bpc: Bpc) -> Vec<u32> {
        (0..count).map(|i| read_sample(line, i, bpc)).collect()
    }

    #[test]
    fn sub_byte_depths_scale_to_full_range() {
        for (bits, max) in [(1u8, 1u16), (2, 3), (4, 15)] {
            let packer = Packer::new(bits, Bpc::Eight, 1).expect("supported");
            let mut out = [0u8; 2];
            assert_eq!(packer.pack(&raw(&[0, max], bits), &mut out, 2), 2);
            assert_eq!(out, [0, 255], "{bits}-bit");
        }
    }

    #[test]
    fn twelve_bit_samples_unpack_in_pairs() {
        let source = raw(&[0xabc, 0x123, 0xfff], 12);
        let packer = Packer::new(12, Bpc::Sixteen, 1).expect("supported");
        let mut out = [0u8; 6];
        assert_eq!(packer.pack(&source, &mut out, 3), 6);
        assert_eq!(containers(&out, 3, Bpc::Sixteen), vec![0xabca, 0x1231, 0xffff]);

        let packer = Packer::new(12, Bpc::Eight, 1).expect("supported");
        let mut out = [0u8; 3];
        packer.pack(&source, &mut out, 3);
        assert_eq!(out, [0xab, 0x12, 0xff]);
    }

    #[test]
    fn sixteen_bit_keeps_high_byte_for_eight() {
        let packer = Packer::new(16, Bpc::Eight, 1).expect("supported");
        let mut out = [0u8; 2];
        packer.pack(&[0x12, 0x34, 0xfe, 0x01], &mut out, 2);
        assert_eq!(out, [0x12, 0xfe]);
    }

    #[test]
    fn threshold_to_one_bit() {
        let packer = Packer::new(8, Bpc::One, 1).expect("supported");
        let mut out = [0xffu8; 2];
        let written = packer.pack(&[0, 1, 0, 200, 0, 0, 0, 0, 9], &mut out, 9);
        assert_eq!(written, 2);
        assert_eq!(out, [0b0101_0000, 0b1000_0000]);

        let packer = Packer::new(16, Bpc::One, 1).expect("supported");
        let mut out = [0u8; 1];
        packer.pack(&[0, 0, 0, 1, 1, 0], &mut out, 3);
        assert_eq!(out, [0b0110_0000]);
    }

    #[test]
    fn interleaves_planar_sources() {
        let packer = Packer::new(8, Bpc::Eight, 3).expect("supported");
        let planes: [&[u8]; 3] = [&[1, 4], &[2, 5], &[3, 6]];
        let mut out = [0u8; 6];
        for (c, plane) in planes.iter().enumerate() {
            assert_eq!(packer.pack(plane, &mut out[c..], 2), 2);
        }
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn mask_pack_steps_over_colorants() {
        // Two pixels of [mask, r, g, b].
        let line = [255u8, 10, 20, 30, 0, 40, 50, 60];
        let packer = Packer::new(8, Bpc::Eight, 1).expect("supported");
        let mut mask = [0u8; 1];
        assert_eq!(packer.mask_pack(&line, &mut mask, 2, 4), 1);
        assert_eq!(mask, [0b1000_0000]);
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        assert!(Packer::new(4, Bpc::Sixteen, 1).is_err());
        assert!(Packer::new(2, Bpc::One, 1).is_err());
        assert!(Packer::new(8, Bpc::One, 2).is_err());
        assert!(Packer::new(3, Bpc::Eight, 1).is_err());
    }

    #[test]
    fn padding_is_cleared() {
        let mut line = [0xff, 0xff];
        clear_padding(&mut line, 11);
        assert_eq!(line, [0xff, 0b1110_0000]);
    }

    proptest! {
        #[test]
        fn sub_byte_round_trip(bits in prop::sample::select(vec![1u8, 2, 4]),
                               seed in prop::collection::vec(any::<u16>(), 1..64)) {
            let max = (1u16 << bits) - 1;
            let samples: Vec<u16> = seed.iter().map(|v| v & max).collect();
            let packer = Packer::new(bits, Bpc::Eight, 1).unwrap();
            let mut out = vec![0u8; samples.len()];
            packer.pack(&raw(&samples, bits), &mut out, samples.len());
            let scale = 255 / u32::from(max);
            let back: Vec<u16> = out.iter().map(|&v| (u32::from(v) / scale) as u16).collect();
            prop_assert_eq!(back, samples);
        }

        #[test]
        fn eight_and_sixteen_copy_exactly(samples in prop::collection::vec(any::<u16>(), 1..64)) {
            let packer = Packer::new(16, Bpc::Sixteen, 1).unwrap();
            let mut out = vec![0u8; samples.len() * 2];
            packer.pack(&raw(&samples, 16), &mut out, samples.len());
            let back: Vec<u16> = containers(&out, samples.len(), Bpc::Sixteen)
                .into_iter().map(|v| v as u16).collect();
            prop_assert_eq!(&back, &samples);

            let bytes: Vec<u16> = samples.iter().map(|v| v & 0xff).collect();
            let packer = Packer::new(8, Bpc::Eight, 1).unwrap();
            let mut out = vec![0u8; bytes.len()];
            packer.pack(&raw(&bytes, 8), &mut out, bytes.len());
            let back: Vec<u16> = out.iter().map(|&v| u16::from(v)).collect();
            prop_assert_eq!(back, bytes);
        }

        #[test]
        fn twelve_to_sixteen_round_trip(seed in prop::collection::vec(any::<u16>(), 1..64)) {
            let samples: Vec<u16> = seed.iter().map(|v| v & 0x0fff).collect();
            let packer = Packer::new(12, Bpc::Sixteen, 1).unwrap();
            let mut out = vec![0u8; samples.len() * 2];
            packer.pack(&raw(&samples, 12), &mut out, samples.len());
            for (i, &v) in samples.iter().enumerate() {
                let widened = read_sample(&out, i, Bpc::Sixteen);
                prop_assert_eq!(widened >> 4, u32::from(v));
            }
        }

        #[test]
        fn sixteen_through_twelve_stays_close(v in any::<u16>()) {
            // A 16-bit value reduced to 12 bits and widened back again lands
            // within one 12-bit step of where it started.
            let packer = Packer::new(12, Bpc::Sixteen, 1).unwrap();
            let mut out = [0u8; 2];
            packer.pack(&raw(&[v >> 4], 12), &mut out, 1);
            let widened = read_sample(&out, 0, Bpc::Sixteen);
            prop_assert!((i64::from(widened) - i64::from(v)).abs() <= 15);
        }
    }
}
