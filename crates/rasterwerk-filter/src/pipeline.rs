// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image pipeline — the caller side of the chain protocol. Reads normalised
// lines from the preparer, pushes them through the image and mask chains
// and hands whatever comes out to a line sink.

use rasterwerk_core::config::PipelineConfig;
use rasterwerk_core::error::{RasterwerkError, Result};
use rasterwerk_core::types::ImageRole;
use tracing::{debug, info, instrument, warn};

use crate::chain::ImageFilterChain;
use crate::filter::{FilteredImageArgs, ImageContext};
use crate::preparer::{ColorContext, DataPreparer, ImageSource, SampleProvider, SourceType, classify};

/// Iterations without any movement before the pipeline gives up.
const STALL_LIMIT: u32 = 2;

/// Receives filtered lines in output order.
pub trait LineSink {
    fn line(&mut self, role: ImageRole, line: &[u8]) -> Result<()>;
}

impl<F> LineSink for F
where
    F: FnMut(ImageRole, &[u8]) -> Result<()>,
{
    fn line(&mut self, role: ImageRole, line: &[u8]) -> Result<()> {
        self(role, line)
    }
}

/// Sink that keeps every line in memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectedLines {
    pub image: Vec<Vec<u8>>,
    pub mask: Vec<Vec<u8>>,
}

impl LineSink for CollectedLines {
    fn line(&mut self, role: ImageRole, line: &[u8]) -> Result<()> {
        let lines = match role {
            ImageRole::Image => &mut self.image,
            ImageRole::Mask => &mut self.mask,
        };
        lines.push(line.to_vec());
        Ok(())
    }
}

/// What one [`ImagePipeline::render`] call did.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub source_type: SourceType,
    /// Shape of the emitted image lines.
    pub image: Option<FilteredImageArgs>,
    /// Shape of the emitted mask lines.
    pub mask: Option<FilteredImageArgs>,
    pub image_filters: Vec<String>,
    pub mask_filters: Vec<String>,
    pub image_lines: u32,
    pub mask_lines: u32,
    /// Raw source lines consumed.
    pub lines_read: u32,
}

/// One image chain and one mask chain, reused for every image.
pub struct ImagePipeline {
    config: PipelineConfig,
    image_chain: ImageFilterChain,
    mask_chain: ImageFilterChain,
}

impl ImagePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let image_chain = ImageFilterChain::new(&config);
        let mask_chain = ImageFilterChain::new(&config);
        info!(
            filters = ?config.filters,
            interpolators = ?config.interpolators,
            "Image pipeline created"
        );
        Ok(Self {
            config,
            image_chain,
            mask_chain,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn image_chain_mut(&mut self) -> &mut ImageFilterChain {
        &mut self.image_chain
    }

    pub fn mask_chain_mut(&mut self) -> &mut ImageFilterChain {
        &mut self.mask_chain
    }

    /// Normalise and filter one image, delivering every output line to
    /// `sink`. Both chains are reset before this returns, whatever happens.
    ///
    /// `UnsupportedSource` and `Negotiation` errors mean the caller should
    /// render the image unfiltered instead.
    #[instrument(skip_all, fields(width = source.width, height = source.height, bpc = source.bpc))]
    pub fn render(
        &mut self,
        source: &ImageSource,
        provider: &mut dyn SampleProvider,
        color: Option<&mut dyn ColorContext>,
        sink: &mut dyn LineSink,
    ) -> Result<RenderSummary> {
        if let Err(reason) = classify(source) {
            debug!(reason, "Source layout not supported");
            return Err(RasterwerkError::UnsupportedSource(reason.into()));
        }
        let result = self.run(source, provider, color, sink);
        self.image_chain.end_image();
        self.mask_chain.end_image();
        match &result {
            Ok(summary) => info!(
                source_type = ?summary.source_type,
                image_lines = summary.image_lines,
                mask_lines = summary.mask_lines,
                lines_read = summary.lines_read,
                "Image rendered"
            ),
            Err(err) => warn!(error = %err, "Image render failed"),
        }
        result
    }

    fn run(
        &mut self,
        source: &ImageSource,
        provider: &mut dyn SampleProvider,
        color: Option<&mut dyn ColorContext>,
        sink: &mut dyn LineSink,
    ) -> Result<RenderSummary> {
        let mut preparer = DataPreparer::new(source, &self.config, color)?;
        let mut ctx = ImageContext::new();
        let image = match preparer.image_args() {
            Some(args) => Some(self.image_chain.new_image(args, &mut ctx)?),
            None => None,
        };
        let mask = match preparer.mask_args() {
            Some(args) => Some(self.mask_chain.new_image(args, &mut ctx)?),
            None => None,
        };
        ctx.verify()?;

        let mut summary = RenderSummary {
            source_type: preparer.source_type(),
            image_filters: names(&self.image_chain, image.is_some()),
            mask_filters: names(&self.mask_chain, mask.is_some()),
            image,
            mask,
            image_lines: 0,
            mask_lines: 0,
            lines_read: 0,
        };
        let expected_image = summary.image.as_ref().map_or(0, |args| args.height);
        let expected_mask = summary.mask.as_ref().map_or(0, |args| args.height);

        let mut idle = 0;
        loop {
            let before = preparer.lines_read();
            preparer.get_line(provider)?;
            let mut progress = preparer.lines_read() > before;

            if summary.image.is_some() {
                progress |= self.image_chain.push(preparer.image_output())?;
                let emitted = drain(&mut self.image_chain, ImageRole::Image, sink)?;
                summary.image_lines += emitted;
                progress |= emitted > 0;
            }
            if summary.mask.is_some() {
                progress |= self.mask_chain.push(preparer.mask_output())?;
                let emitted = drain(&mut self.mask_chain, ImageRole::Mask, sink)?;
                summary.mask_lines += emitted;
                progress |= emitted > 0;
            }

            let complete = preparer.is_finished()
                && summary.image_lines >= expected_image
                && summary.mask_lines >= expected_mask
                && self.image_chain.is_drained()
                && self.mask_chain.is_drained();
            if complete {
                break;
            }
            if progress {
                idle = 0;
                continue;
            }
            idle += 1;
            if idle >= STALL_LIMIT {
                warn!(
                    lines_read = preparer.lines_read(),
                    image_lines = summary.image_lines,
                    mask_lines = summary.mask_lines,
                    "Pipeline made no progress"
                );
                return Err(RasterwerkError::Stalled {
                    lines_read: preparer.lines_read(),
                });
            }
        }
        summary.lines_read = preparer.lines_read();
        Ok(summary)
    }
}

fn names(chain: &ImageFilterChain, negotiated: bool) -> Vec<String> {
    if !negotiated {
        return Vec::new();
    }
    chain.active_filters().into_iter().map(String::from).collect()
}

fn drain(chain: &mut ImageFilterChain, role: ImageRole, sink: &mut dyn LineSink) -> Result<u32> {
    let mut emitted = 0;
    while let Some(line) = chain.pull() {
        sink.line(role, line)?;
        emitted += 1;
    }
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preparer::{MaskData, MaskDesc, MemoryProvider};
    use rasterwerk_core::error::classify_error;
    use rasterwerk_core::geometry::Affine;
    use rasterwerk_core::types::ErrorClass;

    fn bare_config() -> PipelineConfig {
        PipelineConfig {
            filters: vec![],
            interpolators: vec![],
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn unfiltered_rgb_passes_through() {
        let mut pipeline = ImagePipeline::new(bare_config()).expect("pipeline");
        let source = ImageSource::image(2, 2, 8, 3);
        let data: Vec<u8> = (0..12).collect();
        let mut provider = MemoryProvider::new(vec![data]).with_chunk(5);
        let mut sink = CollectedLines::default();
        let summary = pipeline
            .render(&source, &mut provider, None, &mut sink)
            .expect("render");
        assert_eq!(summary.source_type, SourceType::Interleaved);
        assert_eq!(summary.image_lines, 2);
        assert_eq!(summary.lines_read, 2);
        assert!(summary.image_filters.is_empty());
        assert_eq!(sink.image, vec![(0..6).collect::<Vec<u8>>(), (6..12).collect()]);
        assert!(sink.mask.is_empty());
    }

    #[test]
    fn unsupported_depth_asks_for_fallback() {
        let mut pipeline = ImagePipeline::new(bare_config()).expect("pipeline");
        let source = ImageSource::image(2, 2, 3, 3);
        let mut provider = MemoryProvider::new(vec![vec![]]);
        let err = pipeline
            .render(&source, &mut provider, None, &mut CollectedLines::default())
            .expect_err("3-bit samples");
        assert_eq!(classify_error(&err), ErrorClass::Fallback);
    }

    #[test]
    fn stencil_is_enlarged_when_interpolating() {
        let mut pipeline = ImagePipeline::new(PipelineConfig::default()).expect("pipeline");
        let source = ImageSource::stencil(8, 6, 1, true)
            .with_transform(Affine::scale(4.0))
            .interpolated(true);
        let mut provider = MemoryProvider::new(vec![vec![0xff; 6]]);
        let mut sink = CollectedLines::default();
        let summary = pipeline
            .render(&source, &mut provider, None, &mut sink)
            .expect("render");
        assert_eq!(summary.mask_filters, vec!["mask-scaler".to_string()]);
        assert_eq!(summary.mask_lines, 24);
        assert_eq!(sink.mask.len(), 24);
        assert!(sink.mask.iter().all(|line| line == &vec![0xff; 4]));
    }

    #[test]
    fn premature_end_resets_the_chains() {
        let mut pipeline = ImagePipeline::new(PipelineConfig::default()).expect("pipeline");
        let source = ImageSource::image(2, 4, 8, 1);
        let mut short = MemoryProvider::new(vec![vec![1, 2, 3]]);
        let err = pipeline
            .render(&source, &mut short, None, &mut CollectedLines::default())
            .expect_err("data ends after one line");
        assert_eq!(classify_error(&err), ErrorClass::AbortImage);
        assert!(pipeline.image_chain_mut().active_filters().is_empty());
        assert!(pipeline.mask_chain_mut().is_drained());

        let mut full = MemoryProvider::new(vec![vec![7; 8]]);
        let mut sink = CollectedLines::default();
        pipeline
            .render(&source, &mut full, None, &mut sink)
            .expect("second image renders");
        assert_eq!(sink.image, vec![vec![7, 7]; 4]);
    }

    #[test]
    fn separate_mask_lines_reach_the_sink() {
        let mut pipeline = ImagePipeline::new(bare_config()).expect("pipeline");
        let desc = MaskDesc {
            width: 4,
            height: 2,
            bpc: 1,
            polarity: true,
        };
        let source = ImageSource::image(2, 1, 8, 1).with_mask(MaskData::Separate(desc));
        let mut provider = MemoryProvider::new(vec![vec![10, 20], vec![0xa0, 0x50]]);
        let mut sink = CollectedLines::default();
        let summary = pipeline
            .render(&source, &mut provider, None, &mut sink)
            .expect("render");
        assert_eq!(summary.source_type, SourceType::SeparateMaskInterleaved);
        assert_eq!(sink.image, vec![vec![10, 20]]);
        assert_eq!(sink.mask, vec![vec![0xa0], vec![0x50]]);
    }

    #[test]
    fn sink_errors_abort_the_render() {
        let mut pipeline = ImagePipeline::new(bare_config()).expect("pipeline");
        let source = ImageSource::image(1, 2, 8, 1);
        let mut provider = MemoryProvider::new(vec![vec![1, 2]]);
        let mut failing =
            |_: ImageRole, _: &[u8]| -> Result<()> { Err(RasterwerkError::ImageError("full".into())) };
        let err = pipeline
            .render(&source, &mut provider, None, &mut failing)
            .expect_err("sink refuses lines");
        assert!(matches!(err, RasterwerkError::ImageError(_)));
    }
}
