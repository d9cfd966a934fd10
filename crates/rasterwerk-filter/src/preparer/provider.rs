// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw sample providers. The page-description interpreter owns the real
// byte streams; the preparer only ever asks it for "up to N more bytes of
// stream S".

use rasterwerk_core::error::{RasterwerkError, Result};

/// Source of raw, undecoded sample bytes.
pub trait SampleProvider {
    /// Up to `max` bytes from `stream`. Fewer bytes than requested is normal;
    /// an empty slice means the stream has ended.
    fn read(&mut self, stream: usize, max: usize) -> Result<&[u8]>;
}

/// Streams held in memory, handed out at most `chunk` bytes at a time.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    streams: Vec<Vec<u8>>,
    positions: Vec<usize>,
    chunk: usize,
}

impl MemoryProvider {
    pub fn new(streams: Vec<Vec<u8>>) -> Self {
        let positions = vec![0; streams.len()];
        Self {
            streams,
            positions,
            chunk: usize::MAX,
        }
    }

    /// Deliver at most `chunk` bytes per read, to exercise the preparer's
    /// buffering.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Bytes not yet handed out from `stream`.
    pub fn remaining(&self, stream: usize) -> usize {
        match (self.streams.get(stream), self.positions.get(stream)) {
            (Some(data), Some(&position)) => data.len() - position,
            _ => 0,
        }
    }
}

impl SampleProvider for MemoryProvider {
    fn read(&mut self, stream: usize, max: usize) -> Result<&[u8]> {
        let data = self
            .streams
            .get(stream)
            .ok_or_else(|| RasterwerkError::Provider(format!("no data stream {stream}")))?;
        let start = self.positions[stream];
        let end = data.len().min(start + max.min(self.chunk));
        self.positions[stream] = end;
        Ok(&data[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_are_capped() {
        let mut provider = MemoryProvider::new(vec![vec![1, 2, 3, 4, 5]]).with_chunk(2);
        assert_eq!(provider.read(0, 10).expect("read"), &[1, 2]);
        assert_eq!(provider.read(0, 1).expect("read"), &[3]);
        assert_eq!(provider.remaining(0), 2);
        assert_eq!(provider.read(0, 10).expect("read"), &[4, 5]);
        assert!(provider.read(0, 10).expect("read").is_empty());
    }

    #[test]
    fn unknown_stream_is_a_provider_error() {
        let mut provider = MemoryProvider::new(vec![]);
        let err = provider.read(3, 1).expect_err("no such stream");
        assert!(matches!(err, RasterwerkError::Provider(_)));
    }
}
