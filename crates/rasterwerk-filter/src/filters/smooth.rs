// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Smooth — removes low-amplitude banding from 8-bit RGB images by merging
// runs of nearly identical colour into the colour that started the run.
// Runs follow the device's horizontal: along scanlines for upright images,
// down columns for images turned a quarter.

use rasterwerk_core::config::SmoothConfig;
use rasterwerk_core::error::Result;
use rasterwerk_core::geometry::{Axis, axis_alignment};
use rasterwerk_core::types::{Bpc, ImageRole};
use tracing::debug;

use crate::filter::{
    FilterInstance, FilteredImageArgs, FilteredImageResult, ImageContext, ImageFilter,
    LineAccumulator,
};
use crate::transaction::{Transaction, zeroed};

pub const NAME: &str = "smooth";

type Rgb = [u8; 3];

#[derive(Debug, Clone)]
pub struct Smooth {
    config: SmoothConfig,
}

impl Smooth {
    pub fn new(config: SmoothConfig) -> Self {
        Self { config }
    }
}

impl ImageFilter for Smooth {
    fn name(&self) -> &'static str {
        NAME
    }

    fn present(&self, args: &FilteredImageArgs, _changes: &mut FilteredImageResult) -> bool {
        let config = &self.config;
        if args.role != ImageRole::Image || args.colorants != 3 || args.bpc != Bpc::Eight {
            return false;
        }
        if args.width < config.min_width || args.height < config.min_height {
            return false;
        }
        let scale_x = f64::from(args.device_width) / f64::from(args.width);
        let scale_y = f64::from(args.device_height) / f64::from(args.height);
        if scale_x < config.min_scale || scale_y < config.min_scale {
            return false;
        }
        axis_alignment(&args.image_to_device, config.skew_tolerance).is_some()
    }

    fn construct(
        &self,
        args: &FilteredImageArgs,
        _target: &FilteredImageResult,
        _ctx: &mut ImageContext,
    ) -> Result<Box<dyn FilterInstance>> {
        let axis =
            axis_alignment(&args.image_to_device, self.config.skew_tolerance).unwrap_or(Axis::Rows);
        let width = args.width as usize;
        let columns = match axis {
            Axis::Rows => Vec::new(),
            Axis::Columns => vec![Run::default(); width],
        };
        debug!(?axis, width, "Smooth constructed");
        Ok(Box::new(SmoothInstance {
            rules: MergeRules::from(&self.config),
            axis,
            line: LineAccumulator::new(args.line_bytes())?,
            out: zeroed(args.line_bytes())?,
            ready: false,
            columns,
        }))
    }
}

/// Base colour of the current run and how many pixels it covers.
#[derive(Debug, Clone, Copy, Default)]
struct Run {
    base: Rgb,
    length: u32,
}

#[derive(Debug, Clone, Copy)]
struct MergeRules {
    tolerance: u8,
    white_threshold: u8,
    max_run: u32,
}

impl From<&SmoothConfig> for MergeRules {
    fn from(config: &SmoothConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            white_threshold: config.white_threshold,
            max_run: config.max_run,
        }
    }
}

impl MergeRules {
    fn mergeable(&self, base: Rgb, pixel: Rgb) -> bool {
        base.iter()
            .zip(pixel.iter())
            .all(|(&a, &b)| {
                a.abs_diff(b) <= self.tolerance
                    && a < self.white_threshold
                    && b < self.white_threshold
            })
    }

    /// Extend `run` with `pixel`, returning the colour to emit.
    fn step(&self, run: &mut Run, pixel: Rgb) -> Rgb {
        if run.length > 0 && run.length < self.max_run && self.mergeable(run.base, pixel) {
            run.length += 1;
            run.base
        } else {
            *run = Run {
                base: pixel,
                length: 1,
            };
            pixel
        }
    }
}

struct SmoothInstance {
    rules: MergeRules,
    axis: Axis,
    line: LineAccumulator,
    out: Vec<u8>,
    ready: bool,
    /// Per-column runs, only in column mode.
    columns: Vec<Run>,
}

impl FilterInstance for SmoothInstance {
    fn push(&mut self, data: &mut Transaction) -> Result<()> {
        if self.ready || !self.line.fill(data) {
            return Ok(());
        }
        let pixels = self.line.line().chunks_exact(3);
        let outputs = self.out.chunks_exact_mut(3);
        match self.axis {
            Axis::Rows => {
                let mut run = Run::default();
                for (pixel, out) in pixels.zip(outputs) {
                    let rgb = [pixel[0], pixel[1], pixel[2]];
                    out.copy_from_slice(&self.rules.step(&mut run, rgb));
                }
            }
            Axis::Columns => {
                for ((pixel, out), run) in pixels.zip(outputs).zip(self.columns.iter_mut()) {
                    let rgb = [pixel[0], pixel[1], pixel[2]];
                    out.copy_from_slice(&self.rules.step(run, rgb));
                }
            }
        }
        self.line.clear();
        self.ready = true;
        Ok(())
    }

    fn pull(&mut self) -> Option<&[u8]> {
        if !self.ready {
            return None;
        }
        self.ready = false;
        Some(&self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SourceAttributes;
    use rasterwerk_core::geometry::Affine;

    fn config() -> SmoothConfig {
        SmoothConfig {
            min_width: 2,
            min_height: 2,
            max_run: 3,
            ..SmoothConfig::default()
        }
    }

    fn rgb_args(width: u32, transform: Affine) -> FilteredImageArgs {
        let (device_width, device_height) =
            rasterwerk_core::geometry::device_extent(&transform, width, 4);
        FilteredImageArgs {
            width,
            height: 4,
            device_width,
            device_height,
            colorants: 3,
            original_bpc: 8,
            bpc: Bpc::Eight,
            role: ImageRole::Image,
            interpolate: false,
            image_to_device: transform,
            source: SourceAttributes::default(),
        }
    }

    fn build(args: &FilteredImageArgs) -> Box<dyn FilterInstance> {
        let filter = Smooth::new(config());
        assert!(filter.present(args, &mut args.unchanged()));
        filter
            .construct(args, &args.unchanged(), &mut ImageContext::new())
            .expect("construct")
    }

    fn line_through(instance: &mut dyn FilterInstance, pixels: &[Rgb]) -> Vec<Rgb> {
        let bytes: Vec<u8> = pixels.iter().flatten().copied().collect();
        let mut tx = Transaction::new(bytes.len()).expect("alloc");
        tx.write(&bytes);
        instance.push(&mut tx).expect("push");
        instance
            .pull()
            .expect("one line out per line in")
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect()
    }

    #[test]
    fn near_colours_merge_along_rows() {
        let args = rgb_args(5, Affine::scale(2.0));
        let mut instance = build(&args);
        let out = line_through(
            instance.as_mut(),
            &[[100, 100, 100], [102, 99, 101], [104, 100, 100], [120, 0, 0], [121, 0, 1]],
        );
        assert_eq!(
            out,
            vec![[100, 100, 100], [100, 100, 100], [104, 100, 100], [120, 0, 0], [120, 0, 0]]
        );
    }

    #[test]
    fn runs_stop_at_max_length() {
        let args = rgb_args(7, Affine::scale(2.0));
        let mut instance = build(&args);
        let flat = [[50, 60, 70]; 7];
        let nudged: Vec<Rgb> = flat
            .iter()
            .enumerate()
            .map(|(i, p)| [p[0] + (i % 2) as u8, p[1], p[2]])
            .collect();
        let out = line_through(instance.as_mut(), &nudged);
        // Bases at 0, 3 and 6: every run is at most three long.
        assert_eq!(out[0..3], [[50, 60, 70]; 3]);
        assert_eq!(out[3..6], [[51, 60, 70]; 3]);
        assert_eq!(out[6], [50, 60, 70]);
    }

    #[test]
    fn highlights_are_left_alone() {
        let args = rgb_args(3, Affine::scale(2.0));
        let mut instance = build(&args);
        let pixels = [[250, 250, 250], [251, 250, 249], [250, 251, 250]];
        assert_eq!(line_through(instance.as_mut(), &pixels), pixels.to_vec());
    }

    #[test]
    fn rotated_images_merge_down_columns() {
        let quarter = Affine::rotate(std::f64::consts::FRAC_PI_2) * Affine::scale(2.0);
        let args = rgb_args(2, quarter);
        let mut instance = build(&args);
        let first = line_through(instance.as_mut(), &[[10, 10, 10], [200, 0, 0]]);
        let second = line_through(instance.as_mut(), &[[11, 10, 10], [10, 10, 10]]);
        assert_eq!(first, vec![[10, 10, 10], [200, 0, 0]]);
        assert_eq!(second, vec![[10, 10, 10], [10, 10, 10]]);
    }

    #[test]
    fn rejects_skewed_small_or_non_rgb_images() {
        let filter = Smooth::new(config());
        let skewed = rgb_args(4, Affine::rotate(0.4) * Affine::scale(2.0));
        assert!(!filter.present(&skewed, &mut skewed.unchanged()));

        let shrunk = rgb_args(4, Affine::scale(0.5));
        assert!(!filter.present(&shrunk, &mut shrunk.unchanged()));

        let mut gray = rgb_args(4, Affine::scale(2.0));
        gray.colorants = 1;
        assert!(!filter.present(&gray, &mut gray.unchanged()));

        let narrow = rgb_args(1, Affine::scale(2.0));
        assert!(!filter.present(&narrow, &mut narrow.unchanged()));
    }

    #[test]
    fn pending_output_holds_back_input() {
        let args = rgb_args(2, Affine::scale(2.0));
        let mut instance = build(&args);
        let mut first = Transaction::new(6).expect("alloc");
        first.write(&[1, 2, 3, 4, 5, 6]);
        instance.push(&mut first).expect("push");
        let mut second = Transaction::new(6).expect("alloc");
        second.write(&[7, 8, 9, 10, 11, 12]);
        instance.push(&mut second).expect("push");
        assert_eq!(second.available(), 6);
        assert!(instance.pull().is_some());
        instance.push(&mut second).expect("push");
        assert_eq!(second.available(), 0);
    }
}
