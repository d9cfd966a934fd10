// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Buffered transactions — a byte buffer with independent read and write
// heads. Every scanline moving through the preparer and the filter chain
// travels inside one of these.

use rasterwerk_core::error::{RasterwerkError, Result};

/// Allocate a zero-filled buffer, reporting failure instead of aborting.
pub fn zeroed(len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| RasterwerkError::Allocation { bytes: len })?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// A byte buffer with a read head and a write head.
///
/// Bytes between the two heads are *available*. An owned transaction
/// allocates its buffer up front; an external one starts detached and only
/// becomes usable once a caller binds a buffer with
/// [`new_buffer`](Self::new_buffer).
///
/// Reading past the available bytes or writing past the capacity is a
/// caller bug and panics.
#[derive(Debug)]
pub struct Transaction {
    buffer: Option<Vec<u8>>,
    read: usize,
    write: usize,
    owned: bool,
}

impl Transaction {
    // -- Construction ---------------------------------------------------------

    /// Create a transaction owning a buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            buffer: Some(zeroed(capacity)?),
            read: 0,
            write: 0,
            owned: true,
        })
    }

    /// Create a zero-capacity transaction. Used to offer "no new data" to a
    /// filter.
    pub fn empty() -> Self {
        Self {
            buffer: Some(Vec::new()),
            read: 0,
            write: 0,
            owned: true,
        }
    }

    /// Create a detached transaction for caller-supplied buffers.
    pub fn external() -> Self {
        Self {
            buffer: None,
            read: 0,
            write: 0,
            owned: false,
        }
    }

    // -- Accessors ------------------------------------------------------------

    /// Whether a buffer is bound.
    pub fn is_valid(&self) -> bool {
        self.buffer.is_some()
    }

    /// Total bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    /// Bytes written but not yet read.
    pub fn available(&self) -> usize {
        self.write - self.read
    }

    /// Bytes that can still be written.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.write
    }

    /// Peek at the available bytes without moving the read head.
    pub fn unread(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => &buffer[self.read..self.write],
            None => &[],
        }
    }

    /// Everything written since the last reset, read or not.
    pub fn written(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => &buffer[..self.write],
            None => &[],
        }
    }

    /// Mutable view of everything written since the last reset.
    pub fn written_mut(&mut self) -> &mut [u8] {
        let write = self.write;
        &mut self.bound_mut()[..write]
    }

    /// The unwritten tail of the buffer. Fill it directly, then commit the
    /// bytes with [`fake_write`](Self::fake_write).
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let write = self.write;
        &mut self.bound_mut()[write..]
    }

    // -- Head movement --------------------------------------------------------

    /// Take the next `n` available bytes.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` bytes are available.
    pub fn read(&mut self, n: usize) -> &[u8] {
        assert!(
            n <= self.available(),
            "transaction read of {n} bytes with {} available",
            self.available()
        );
        let start = self.read;
        self.read += n;
        &self.bound()[start..start + n]
    }

    /// Copy `src` in at the write head.
    ///
    /// # Panics
    ///
    /// Panics if `src` does not fit in the remaining capacity.
    pub fn write(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.remaining(),
            "transaction write of {} bytes with {} remaining",
            src.len(),
            self.remaining()
        );
        let start = self.write;
        self.bound_mut()[start..start + src.len()].copy_from_slice(src);
        self.write += src.len();
    }

    /// Commit `n` bytes already deposited through [`spare_mut`](Self::spare_mut).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the remaining capacity.
    pub fn fake_write(&mut self, n: usize) {
        assert!(
            n <= self.remaining(),
            "transaction commit of {n} bytes with {} remaining",
            self.remaining()
        );
        self.write += n;
    }

    /// Rewind both heads.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Zero the whole buffer. The heads stay where they are.
    pub fn clear(&mut self) {
        if let Some(buffer) = &mut self.buffer {
            buffer.fill(0);
        }
    }

    // -- External buffers -----------------------------------------------------

    /// Bind a caller-owned buffer holding `available` bytes of data and return
    /// whichever buffer was bound before.
    ///
    /// # Panics
    ///
    /// Panics on an owned transaction, or if `available` exceeds the buffer.
    pub fn new_buffer(&mut self, buffer: Vec<u8>, available: usize) -> Option<Vec<u8>> {
        assert!(!self.owned, "new_buffer called on an owned transaction");
        assert!(
            available <= buffer.len(),
            "{available} bytes available in a {}-byte buffer",
            buffer.len()
        );
        self.read = 0;
        self.write = available;
        self.buffer.replace(buffer)
    }

    /// Hand the bound buffer back to its owner, leaving the transaction
    /// detached.
    ///
    /// # Panics
    ///
    /// Panics on an owned transaction.
    pub fn release(&mut self) -> Option<Vec<u8>> {
        assert!(!self.owned, "release called on an owned transaction");
        self.reset();
        self.buffer.take()
    }

    // A detached transaction behaves as a zero-capacity one.
    fn bound(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }

    fn bound_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}
