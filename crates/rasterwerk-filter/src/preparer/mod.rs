// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data preparer — turns the raw byte streams of one image (and its mask)
// into normalised, interleaved scanlines, one line per `get_line` call.

pub mod indexed;
pub mod provider;
pub mod source;

use rasterwerk_core::config::PipelineConfig;
use rasterwerk_core::error::{RasterwerkError, Result};
use rasterwerk_core::geometry::{self, Affine};
use rasterwerk_core::types::{Bpc, ImageRole, packed_bytes};
use tracing::{debug, instrument, warn};

use crate::filter::{FilteredImageArgs, Geometry, SourceAttributes};
use crate::packer::{Packer, clear_padding};
use crate::transaction::Transaction;

pub use indexed::{ColorContext, PaletteContext};
use indexed::IndexedState;
pub use provider::{MemoryProvider, SampleProvider};
pub use source::{
    ImageSource, IndexedSpace, MaskData, MaskDesc, SourceType, classify, is_supported,
};

/// Depth raw samples of `bits` bits normalise to.
pub fn normalized_depth(bits: u8, preserve_16bit: bool) -> Bpc {
    if bits >= 12 && preserve_16bit {
        Bpc::Sixteen
    } else {
        Bpc::Eight
    }
}

// -- Data sources ---------------------------------------------------------------

/// Staging buffer for one raw line of one provider stream.
#[derive(Debug)]
struct RawInput {
    stream: usize,
    line: Transaction,
}

#[derive(Debug)]
enum Inputs {
    Owned(Vec<RawInput>),
    /// Reads through the image source's staging buffer. Only scanline
    /// interleaved masks, whose lines share the image's stream, are derived.
    Derived,
}

/// One raw input (image or mask) and its sizing.
#[derive(Debug)]
struct DataSource {
    width: u32,
    height: u32,
    /// Raw samples per line in each stream.
    samples: usize,
    /// Raw bytes per line in each stream.
    input_size: usize,
    /// Normalised bytes per line.
    expanded_size: usize,
    lines_read: u32,
    packer: Packer,
    /// Flip 1-bit output so that 1 means paint.
    invert: bool,
    inputs: Inputs,
}

impl DataSource {
    #[allow(clippy::too_many_arguments)]
    fn owned(
        width: u32,
        height: u32,
        raw_bits: u8,
        depth: Bpc,
        samples: usize,
        expanded_size: usize,
        streams: std::ops::Range<usize>,
        staging: usize,
    ) -> Result<Self> {
        let input_size = packed_bytes(samples, raw_bits);
        let inputs = streams
            .clone()
            .map(|stream| {
                Ok(RawInput {
                    stream,
                    line: Transaction::new(staging.max(input_size))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            width,
            height,
            samples,
            input_size,
            expanded_size,
            lines_read: 0,
            packer: Packer::new(raw_bits, depth, streams.len())?,
            invert: false,
            inputs: Inputs::Owned(inputs),
        })
    }

    /// A source whose raw lines arrive through another source's staging
    /// buffer. Allocates no input of its own.
    fn derived(
        width: u32,
        height: u32,
        raw_bits: u8,
        depth: Bpc,
        samples: usize,
        expanded_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            width,
            height,
            samples,
            input_size: packed_bytes(samples, raw_bits),
            expanded_size,
            lines_read: 0,
            packer: Packer::new(raw_bits, depth, 1)?,
            invert: false,
            inputs: Inputs::Derived,
        })
    }

    fn exhausted(&self) -> bool {
        self.lines_read >= self.height
    }

    fn premature_end(&self) -> RasterwerkError {
        warn!(
            lines_read = self.lines_read,
            height = self.height,
            "Image data ended before the declared height"
        );
        RasterwerkError::PrematureEnd {
            lines_read: self.lines_read,
            height: self.height,
        }
    }
}

/// Fill `input` with one raw line of `size` bytes. Returns `false` if the
/// stream ends first.
fn fill_raw(input: &mut RawInput, size: usize, provider: &mut dyn SampleProvider) -> Result<bool> {
    input.line.reset();
    while input.line.available() < size {
        let wanted = size - input.line.available();
        let chunk = provider.read(input.stream, wanted)?;
        if chunk.is_empty() {
            return Ok(false);
        }
        if chunk.len() > wanted {
            return Err(RasterwerkError::Provider(format!(
                "stream {} returned {} bytes when {wanted} were requested",
                input.stream,
                chunk.len()
            )));
        }
        input.line.write(chunk);
    }
    Ok(true)
}

/// Invert a packed 1-bit line, keeping the padding clear.
fn invert_bits(line: &mut [u8], count: usize) {
    for byte in line.iter_mut() {
        *byte = !*byte;
    }
    clear_padding(line, count);
}

// -- Cadence ------------------------------------------------------------------

/// Alternation between image and mask lines when both arrive separately:
/// `ratio` lines of the taller source, then one of the shorter.
#[derive(Debug, Clone, Copy)]
struct Cadence {
    major: ImageRole,
    ratio: u32,
    run: u32,
}

impl Cadence {
    fn new(image_height: u32, mask_height: u32) -> Self {
        let (major, ratio) = if mask_height > image_height {
            (ImageRole::Mask, mask_height / image_height)
        } else {
            (ImageRole::Image, image_height / mask_height)
        };
        Self {
            major,
            ratio: ratio.max(1),
            run: 0,
        }
    }

    fn next(&mut self, image_done: bool, mask_done: bool) -> Option<ImageRole> {
        match (image_done, mask_done) {
            (true, true) => None,
            (true, false) => Some(ImageRole::Mask),
            (false, true) => Some(ImageRole::Image),
            (false, false) if self.run < self.ratio => {
                self.run += 1;
                Some(self.major)
            }
            (false, false) => {
                self.run = 0;
                Some(match self.major {
                    ImageRole::Image => ImageRole::Mask,
                    ImageRole::Mask => ImageRole::Image,
                })
            }
        }
    }
}

// -- Preparer -----------------------------------------------------------------

/// Normalises one image or stand-alone mask.
///
/// Output lines land in [`image_output`](Self::image_output) and
/// [`mask_output`](Self::mask_output); drain them before asking for the next
/// line. Indexed images keep the colour context saved until the preparer is
/// dropped.
pub struct DataPreparer<'c> {
    source_type: SourceType,
    image: Option<DataSource>,
    mask: Option<DataSource>,
    image_out: Transaction,
    mask_out: Transaction,
    cadence: Option<Cadence>,
    sample_mask_invert: bool,
    indexed: Option<IndexedState<'c>>,
    image_args: Option<FilteredImageArgs>,
    mask_args: Option<FilteredImageArgs>,
}

impl<'c> DataPreparer<'c> {
    /// Classify `source` and allocate everything needed to normalise it.
    ///
    /// `color` is only used, and only required, for indexed images.
    #[instrument(skip_all, fields(width = source.width, height = source.height, bpc = source.bpc))]
    pub fn new(
        source: &ImageSource,
        config: &PipelineConfig,
        color: Option<&'c mut dyn ColorContext>,
    ) -> Result<Self> {
        let source_type =
            classify(source).map_err(|reason| RasterwerkError::UnsupportedSource(reason.into()))?;
        debug!(?source_type, "Image source classified");

        let indexed = match (&source.indexed, color) {
            (Some(space), Some(color)) => Some(IndexedState::new(color, space, source.bpc)?),
            (Some(_), None) => {
                return Err(RasterwerkError::ColorContext(
                    "indexed image without a colour context".into(),
                ));
            }
            (None, _) => None,
        };

        let width = source.width as usize;
        let colorants = source.colorants as usize;
        let depth = normalized_depth(source.bpc, config.preserve_16bit);
        let mask_desc = match source.mask {
            MaskData::Scanline(desc) | MaskData::Separate(desc) => Some(desc),
            _ => None,
        };

        let mut preparer = Self {
            source_type,
            image: None,
            mask: None,
            image_out: Transaction::empty(),
            mask_out: Transaction::empty(),
            cadence: None,
            sample_mask_invert: !source.polarity,
            indexed,
            image_args: None,
            mask_args: None,
        };

        if !source_type.has_image() {
            let mask_depth = if source.bpc == 1 { Bpc::One } else { depth };
            let expanded = mask_depth.line_bytes(width);
            let mut mask = DataSource::owned(
                source.width,
                source.height,
                source.bpc,
                mask_depth,
                width,
                expanded,
                0..1,
                0,
            )?;
            mask.invert = mask_depth == Bpc::One && !source.polarity;
            preparer.mask_out = Transaction::new(expanded)?;
            preparer.mask = Some(mask);
            let geometry = Geometry {
                width: source.width,
                height: source.height,
                colorants: 1,
                bpc: mask_depth,
            };
            let attrs = SourceAttributes {
                image: None,
                mask: Some(geometry),
                matte: source.matte.clone(),
            };
            preparer.mask_args = Some(build_args(
                ImageRole::Mask,
                geometry,
                source.bpc,
                source.interpolate,
                source.image_to_device,
                attrs,
            ));
            debug!(expanded, "Stand-alone mask prepared");
            return Ok(preparer);
        }

        // Image half.
        let sample_mask = matches!(
            source_type,
            SourceType::SampleMaskFirst | SourceType::SampleMaskLast
        );
        let planar = matches!(
            source_type,
            SourceType::Planar | SourceType::SeparateMaskPlanar
        );
        let (image_depth, out_colorants) = match &preparer.indexed {
            Some(state) => (Bpc::Eight, state.base()),
            None => (depth, colorants),
        };
        let raw_per_pixel = if planar {
            1
        } else if sample_mask {
            colorants + 1
        } else {
            colorants
        };
        let streams = if planar { 0..colorants } else { 0..1 };
        let mask_stream = streams.end;
        let expanded = image_depth.line_bytes(width * out_colorants);
        let scanline_staging = match source.mask {
            MaskData::Scanline(desc) => packed_bytes(desc.width as usize, 1),
            _ => 0,
        };
        let packer_depth = if preparer.indexed.is_some() { Bpc::Eight } else { depth };
        let image = DataSource::owned(
            source.width,
            source.height,
            source.bpc,
            packer_depth,
            width * raw_per_pixel,
            expanded,
            streams,
            scanline_staging,
        )?;
        let image_capacity = if sample_mask {
            image_depth.line_bytes(width * raw_per_pixel)
        } else {
            expanded
        };
        preparer.image_out = Transaction::new(image_capacity)?;
        debug!(
            input_size = image.input_size,
            expanded, image_capacity, "Image source sized"
        );
        preparer.image = Some(image);

        // Mask half.
        let mut mask_geometry = None;
        if sample_mask {
            preparer.mask_out = Transaction::new(Bpc::One.line_bytes(width))?;
            mask_geometry = Some(Geometry {
                width: source.width,
                height: source.height,
                colorants: 1,
                bpc: Bpc::One,
            });
        } else if let Some(desc) = mask_desc {
            let mask_depth = if desc.bpc == 1 {
                Bpc::One
            } else {
                normalized_depth(desc.bpc, config.preserve_16bit)
            };
            let mask_width = desc.width as usize;
            let expanded = mask_depth.line_bytes(mask_width);
            let mut mask = if source_type == SourceType::ScanlineMask {
                DataSource::derived(
                    desc.width,
                    desc.height,
                    desc.bpc,
                    mask_depth,
                    mask_width,
                    expanded,
                )?
            } else {
                DataSource::owned(
                    desc.width,
                    desc.height,
                    desc.bpc,
                    mask_depth,
                    mask_width,
                    expanded,
                    mask_stream..mask_stream + 1,
                    0,
                )?
            };
            mask.invert = mask_depth == Bpc::One && !desc.polarity;
            preparer.mask_out = Transaction::new(expanded)?;
            preparer.mask = Some(mask);
            if source_type.uses_cadence() {
                preparer.cadence = Some(Cadence::new(source.height, desc.height));
            }
            mask_geometry = Some(Geometry {
                width: desc.width,
                height: desc.height,
                colorants: 1,
                bpc: mask_depth,
            });
            debug!(
                mask_width,
                mask_height = desc.height,
                expanded,
                "Mask source sized"
            );
        }

        let image_geometry = Geometry {
            width: source.width,
            height: source.height,
            colorants: out_colorants as u32,
            bpc: image_depth,
        };
        let attrs = SourceAttributes {
            image: Some(image_geometry),
            mask: mask_geometry,
            matte: source.matte.clone(),
        };
        preparer.image_args = Some(build_args(
            ImageRole::Image,
            image_geometry,
            source.bpc,
            source.interpolate,
            source.image_to_device,
            attrs.clone(),
        ));
        if let Some(mask_geometry) = mask_geometry {
            let transform = geometry::mask_to_device(
                &source.image_to_device,
                (source.width, source.height),
                (mask_geometry.width, mask_geometry.height),
            );
            let original_bpc = mask_desc.map_or(source.bpc, |desc| desc.bpc);
            preparer.mask_args = Some(build_args(
                ImageRole::Mask,
                mask_geometry,
                original_bpc,
                source.interpolate,
                transform,
                attrs,
            ));
        }
        Ok(preparer)
    }

    // -- Accessors ------------------------------------------------------------

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    /// Arguments describing the normalised image lines, if there are any.
    pub fn image_args(&self) -> Option<&FilteredImageArgs> {
        self.image_args.as_ref()
    }

    /// Arguments describing the normalised mask lines, if there are any.
    pub fn mask_args(&self) -> Option<&FilteredImageArgs> {
        self.mask_args.as_ref()
    }

    pub fn image_output(&mut self) -> &mut Transaction {
        &mut self.image_out
    }

    pub fn mask_output(&mut self) -> &mut Transaction {
        &mut self.mask_out
    }

    /// Raw lines read so far, image and mask together.
    pub fn lines_read(&self) -> u32 {
        self.image.as_ref().map_or(0, |s| s.lines_read)
            + self.mask.as_ref().map_or(0, |s| s.lines_read)
    }

    /// Every line has been read and handed out.
    pub fn is_finished(&self) -> bool {
        self.image.as_ref().is_none_or(DataSource::exhausted)
            && self.mask.as_ref().is_none_or(DataSource::exhausted)
            && self.image_out.available() == 0
            && self.mask_out.available() == 0
    }

    // -- Line production ------------------------------------------------------

    /// Produce the next normalised line and return the bytes now waiting in
    /// the outputs. While earlier output is still undrained this returns its
    /// size without reading anything. `Ok(0)` is the end of the data.
    pub fn get_line(&mut self, provider: &mut dyn SampleProvider) -> Result<usize> {
        let pending = self.image_out.available() + self.mask_out.available();
        if pending > 0 {
            return Ok(pending);
        }
        self.image_out.reset();
        self.mask_out.reset();

        match self.source_type {
            SourceType::Mask | SourceType::ContoneMask => self.read_mask_line(provider),
            SourceType::Interleaved | SourceType::Planar => self.read_image_line(provider),
            SourceType::SampleMaskFirst | SourceType::SampleMaskLast => {
                self.read_sample_interleaved_line(provider)
            }
            SourceType::ScanlineMask
            | SourceType::SeparateMaskInterleaved
            | SourceType::SeparateMaskPlanar => {
                let image_done = self.image.as_ref().is_none_or(DataSource::exhausted);
                let mask_done = self.mask.as_ref().is_none_or(DataSource::exhausted);
                match self
                    .cadence
                    .as_mut()
                    .and_then(|cadence| cadence.next(image_done, mask_done))
                {
                    Some(ImageRole::Image) => self.read_image_line(provider),
                    Some(ImageRole::Mask) => self.read_mask_line(provider),
                    None => Ok(0),
                }
            }
        }
    }

    fn read_image_line(&mut self, provider: &mut dyn SampleProvider) -> Result<usize> {
        let Some(image) = self.image.as_mut() else {
            return Ok(0);
        };
        if image.exhausted() {
            return Ok(0);
        }
        let Inputs::Owned(inputs) = &mut image.inputs else {
            return Err(RasterwerkError::UnsupportedSource(
                "image source without its own stream".into(),
            ));
        };
        for input in inputs.iter_mut() {
            if !fill_raw(input, image.input_size, provider)? {
                return Err(image.premature_end());
            }
        }

        let out = self.image_out.spare_mut();
        let written = if let Some(indexed) = &self.indexed {
            indexed.lookup(inputs[0].line.unread(), out, image.width as usize)
        } else if inputs.len() > 1 {
            let container = image.packer.target().container().bytes();
            for (plane, input) in inputs.iter().enumerate() {
                image
                    .packer
                    .pack(input.line.unread(), &mut out[plane * container..], image.samples);
            }
            image.expanded_size
        } else {
            image.packer.pack(inputs[0].line.unread(), out, image.samples)
        };
        self.image_out.fake_write(written);
        image.lines_read += 1;
        Ok(written)
    }

    fn read_mask_line(&mut self, provider: &mut dyn SampleProvider) -> Result<usize> {
        let Some(mask) = self.mask.as_mut() else {
            return Ok(0);
        };
        if mask.exhausted() {
            return Ok(0);
        }
        let input = match &mut mask.inputs {
            Inputs::Owned(inputs) => inputs.first_mut(),
            Inputs::Derived => match self.image.as_mut() {
                Some(DataSource {
                    inputs: Inputs::Owned(inputs),
                    ..
                }) => inputs.first_mut(),
                _ => None,
            },
        }
        .ok_or_else(|| RasterwerkError::UnsupportedSource("mask source has no stream".into()))?;
        if !fill_raw(input, mask.input_size, provider)? {
            return Err(mask.premature_end());
        }

        let out = self.mask_out.spare_mut();
        let written = mask.packer.pack(input.line.unread(), out, mask.samples);
        self.mask_out.fake_write(written);
        if mask.invert {
            invert_bits(self.mask_out.written_mut(), mask.samples);
        }
        mask.lines_read += 1;
        Ok(written)
    }

    /// Image and mask samples share each pixel: normalise the whole line into
    /// the image output, pull the mask out, then close the gaps it leaves.
    fn read_sample_interleaved_line(&mut self, provider: &mut dyn SampleProvider) -> Result<usize> {
        let Some(image) = self.image.as_mut() else {
            return Ok(0);
        };
        if image.exhausted() {
            return Ok(0);
        }
        let Inputs::Owned(inputs) = &mut image.inputs else {
            return Err(RasterwerkError::UnsupportedSource(
                "image source without its own stream".into(),
            ));
        };
        let Some(input) = inputs.first_mut() else {
            return Err(RasterwerkError::UnsupportedSource(
                "image source without its own stream".into(),
            ));
        };
        if !fill_raw(input, image.input_size, provider)? {
            return Err(image.premature_end());
        }

        let width = image.width as usize;
        let per_pixel = image.samples / width;
        let colorants = per_pixel - 1;
        let depth = image.packer.target();
        let container = depth.container().bytes();
        let combined = self.image_out.spare_mut();
        image.packer.pack(input.line.unread(), combined, image.samples);

        let offset = if self.source_type == SourceType::SampleMaskFirst {
            0
        } else {
            colorants * container
        };
        let mask_out = self.mask_out.spare_mut();
        let mask_bytes = image
            .packer
            .mask_pack(&combined[offset..], mask_out, width, per_pixel);

        let skip = if offset == 0 { container } else { 0 };
        let pixel_bytes = colorants * container;
        for pixel in 0..width {
            let from = pixel * per_pixel * container + skip;
            combined.copy_within(from..from + pixel_bytes, pixel * pixel_bytes);
        }
        let image_bytes = width * pixel_bytes;
        self.image_out.fake_write(image_bytes);
        self.mask_out.fake_write(mask_bytes);
        if self.sample_mask_invert {
            invert_bits(self.mask_out.written_mut(), width);
        }
        image.lines_read += 1;
        Ok(image_bytes + mask_bytes)
    }
}

fn build_args(
    role: ImageRole,
    geometry: Geometry,
    original_bpc: u8,
    interpolate: bool,
    image_to_device: Affine,
    source: SourceAttributes,
) -> FilteredImageArgs {
    let (device_width, device_height) =
        geometry::device_extent(&image_to_device, geometry.width, geometry.height);
    FilteredImageArgs {
        width: geometry.width,
        height: geometry.height,
        device_width,
        device_height,
        colorants: geometry.colorants,
        original_bpc,
        bpc: geometry.bpc,
        role,
        interpolate,
        image_to_device,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    /// Read every line, returning (image lines, mask lines) in order.
    fn drain(
        preparer: &mut DataPreparer<'_>,
        provider: &mut dyn SampleProvider,
    ) -> Result<Vec<(ImageRole, Vec<u8>)>> {
        let mut lines = Vec::new();
        while preparer.get_line(provider)? > 0 {
            let image = preparer.image_output();
            if image.available() > 0 {
                let n = image.available();
                lines.push((ImageRole::Image, image.read(n).to_vec()));
            }
            let mask = preparer.mask_output();
            if mask.available() > 0 {
                let n = mask.available();
                lines.push((ImageRole::Mask, mask.read(n).to_vec()));
            }
        }
        Ok(lines)
    }

    #[test]
    fn stencil_polarity_inverts_bits() {
        let data = vec![0b1010_0000, 0b0110_0000];
        let mut normal = MemoryProvider::new(vec![data.clone()]);
        let mut inverted = MemoryProvider::new(vec![data]);
        let source = ImageSource::stencil(3, 2, 1, true);
        let mut a = DataPreparer::new(&source, &config(), None).expect("prepare");
        let mut b = DataPreparer::new(&ImageSource::stencil(3, 2, 1, false), &config(), None)
            .expect("prepare");
        let lines_a = drain(&mut a, &mut normal).expect("lines");
        let lines_b = drain(&mut b, &mut inverted).expect("lines");
        assert_eq!(lines_a[0].1, vec![0b1010_0000]);
        assert_eq!(lines_b[0].1, vec![0b0100_0000]);
        assert_eq!(lines_b[1].1, vec![0b1000_0000]);
        assert_eq!(a.mask_args().map(|args| args.bpc), Some(Bpc::One));
        assert!(a.image_args().is_none());
    }

    #[test]
    fn planar_streams_interleave() {
        let source = ImageSource::image(2, 1, 8, 3).planar();
        let mut provider =
            MemoryProvider::new(vec![vec![1, 2], vec![3, 4], vec![5, 6]]).with_chunk(1);
        let mut preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        assert_eq!(preparer.source_type(), SourceType::Planar);
        let lines = drain(&mut preparer, &mut provider).expect("lines");
        assert_eq!(lines, vec![(ImageRole::Image, vec![1, 3, 5, 2, 4, 6])]);
    }

    #[test]
    fn sample_last_mask_is_extracted_and_image_compacted() {
        let source = ImageSource::image(3, 1, 8, 2).with_mask(MaskData::SampleLast);
        let raw = vec![10, 11, 0, 20, 21, 255, 30, 31, 7];
        let mut provider = MemoryProvider::new(vec![raw]);
        let mut preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        let lines = drain(&mut preparer, &mut provider).expect("lines");
        assert_eq!(
            lines,
            vec![
                (ImageRole::Image, vec![10, 11, 20, 21, 30, 31]),
                (ImageRole::Mask, vec![0b0110_0000]),
            ]
        );
    }

    #[test]
    fn sample_first_mask_on_sixteen_bit_source() {
        let mut config = config();
        config.preserve_16bit = true;
        let source = ImageSource::image(1, 1, 16, 1).with_mask(MaskData::SampleFirst);
        let mut provider = MemoryProvider::new(vec![vec![0x00, 0x01, 0xab, 0xcd]]);
        let mut preparer = DataPreparer::new(&source, &config, None).expect("prepare");
        let lines = drain(&mut preparer, &mut provider).expect("lines");
        assert_eq!(lines[0].1, 0xabcdu16.to_ne_bytes().to_vec());
        assert_eq!(lines[1].1, vec![0b1000_0000]);
    }

    #[test]
    fn scanline_mask_follows_height_cadence() {
        let mask = MaskDesc {
            width: 8,
            height: 2,
            bpc: 1,
            polarity: true,
        };
        let source = ImageSource::image(2, 4, 8, 1).with_mask(MaskData::Scanline(mask));
        // Two image lines, one mask line, twice, all in stream 0.
        let raw = vec![1, 1, 2, 2, 0xf0, 3, 3, 4, 4, 0x0f];
        let mut provider = MemoryProvider::new(vec![raw]).with_chunk(3);
        let mut preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        let lines = drain(&mut preparer, &mut provider).expect("lines");
        let roles: Vec<_> = lines.iter().map(|(role, _)| *role).collect();
        use ImageRole::{Image, Mask};
        assert_eq!(roles, vec![Image, Image, Mask, Image, Image, Mask]);
        assert_eq!(lines[2].1, vec![0xf0]);
        assert_eq!(lines[4].1, vec![4, 4]);
        assert_eq!(preparer.lines_read(), 6);
        assert!(preparer.is_finished());
    }

    #[test]
    fn scanline_mask_shares_the_image_input() {
        let mask = MaskDesc {
            width: 8,
            height: 2,
            bpc: 1,
            polarity: true,
        };
        let source = ImageSource::image(2, 4, 8, 1).with_mask(MaskData::Scanline(mask));
        let preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        let mask = preparer.mask.as_ref().expect("mask source");
        assert!(matches!(mask.inputs, Inputs::Derived));
        assert_eq!(mask.input_size, 1);
        let Some(DataSource {
            inputs: Inputs::Owned(inputs),
            ..
        }) = &preparer.image
        else {
            panic!("image source owns its input");
        };
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].stream, 0);

        // Separate masks read their own stream.
        let mask = MaskDesc {
            width: 2,
            height: 4,
            bpc: 8,
            polarity: true,
        };
        let source = ImageSource::image(2, 4, 8, 1).with_mask(MaskData::Separate(mask));
        let preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        let Some(DataSource {
            inputs: Inputs::Owned(inputs),
            ..
        }) = &preparer.mask
        else {
            panic!("separate mask owns its input");
        };
        assert_eq!(inputs[0].stream, 1);
    }

    #[test]
    fn taller_separate_mask_leads_the_cadence() {
        let mask = MaskDesc {
            width: 1,
            height: 3,
            bpc: 8,
            polarity: false,
        };
        let source = ImageSource::image(1, 2, 8, 1).with_mask(MaskData::Separate(mask));
        let mut provider = MemoryProvider::new(vec![vec![7, 8], vec![1, 2, 3]]);
        let mut preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        let lines = drain(&mut preparer, &mut provider).expect("lines");
        use ImageRole::{Image, Mask};
        let expected = vec![
            (Mask, vec![1]),
            (Image, vec![7]),
            (Mask, vec![2]),
            (Image, vec![8]),
            (Mask, vec![3]),
        ];
        assert_eq!(lines, expected);
        let mask_args = preparer.mask_args().expect("mask args");
        assert_eq!((mask_args.width, mask_args.height), (1, 3));
        assert_eq!(mask_args.source.image.map(|g| g.colorants), Some(1));
    }

    #[test]
    fn pending_output_is_not_overwritten() {
        let source = ImageSource::image(2, 2, 8, 1);
        let mut provider = MemoryProvider::new(vec![vec![1, 2, 3, 4]]);
        let mut preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        assert_eq!(preparer.get_line(&mut provider).expect("line"), 2);
        assert_eq!(preparer.get_line(&mut provider).expect("line"), 2);
        assert_eq!(preparer.image_output().read(1), &[1]);
        assert_eq!(preparer.get_line(&mut provider).expect("line"), 1);
        assert_eq!(provider.remaining(0), 2);
    }

    #[test]
    fn short_stream_is_premature_end() {
        let source = ImageSource::image(2, 3, 8, 1);
        let mut provider = MemoryProvider::new(vec![vec![1, 2, 3]]);
        let mut preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        let err = drain(&mut preparer, &mut provider).expect_err("only 1.5 lines");
        assert!(matches!(
            err,
            RasterwerkError::PrematureEnd {
                lines_read: 1,
                height: 3
            }
        ));
    }

    #[test]
    fn provider_errors_propagate() {
        let source = ImageSource::image(2, 1, 8, 2).planar();
        let mut provider = MemoryProvider::new(vec![vec![1, 2]]);
        let mut preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        let err = preparer.get_line(&mut provider).expect_err("second plane missing");
        assert!(matches!(err, RasterwerkError::Provider(_)));
    }

    #[test]
    fn indexed_rgb8_line_is_expanded_once() {
        let mut palette = PaletteContext::new(3, vec![0, 0, 0, 10, 20, 30]);
        let source = ImageSource::image(3, 1, 8, 1).with_indexed(IndexedSpace {
            hival: 1,
            decode: None,
        });
        let mut provider = MemoryProvider::new(vec![vec![1, 0, 1]]);
        {
            let mut preparer =
                DataPreparer::new(&source, &config(), Some(&mut palette)).expect("prepare");
            assert_eq!(preparer.image_args().map(|a| a.colorants), Some(3));
            assert_eq!(preparer.get_line(&mut provider).expect("line"), 9);
            let out = preparer.image_output();
            assert_eq!(out.available(), 9);
            assert_eq!(out.read(9), &[10, 20, 30, 0, 0, 0, 10, 20, 30]);
        }
        assert_eq!((palette.saves(), palette.restores()), (1, 1));
    }

    #[test]
    fn indexed_without_context_is_rejected() {
        let source = ImageSource::image(1, 1, 8, 1).with_indexed(IndexedSpace {
            hival: 0,
            decode: None,
        });
        let err = DataPreparer::new(&source, &config(), None)
            .err()
            .expect("needs a colour context");
        assert!(matches!(err, RasterwerkError::ColorContext(_)));
    }

    #[test]
    fn twelve_bit_depth_follows_configuration() {
        let source = ImageSource::image(2, 1, 12, 1);
        let raw = vec![0xab, 0xcf, 0xff];
        let mut provider = MemoryProvider::new(vec![raw.clone()]);
        let mut preparer = DataPreparer::new(&source, &config(), None).expect("prepare");
        assert_eq!(preparer.get_line(&mut provider).expect("line"), 2);
        assert_eq!(preparer.image_output().read(2), &[0xab, 0xff]);

        let mut wide = config();
        wide.preserve_16bit = true;
        let mut provider = MemoryProvider::new(vec![raw]);
        let mut preparer = DataPreparer::new(&source, &wide, None).expect("prepare");
        assert_eq!(preparer.get_line(&mut provider).expect("line"), 4);
        assert_eq!(preparer.image_args().map(|a| a.bpc), Some(Bpc::Sixteen));
    }

    #[test]
    fn unsupported_sources_fail_construction() {
        let source = ImageSource::image(2, 2, 8, 3)
            .planar()
            .with_mask(MaskData::SampleFirst);
        assert!(!is_supported(&source));
        let err = DataPreparer::new(&source, &config(), None)
            .err()
            .expect("unsupported");
        assert!(matches!(err, RasterwerkError::UnsupportedSource(_)));
    }
}
