#![forbid(unsafe_code)]
//! Big-endian encoding helpers shared by the page codecs.

use crate::types::{Result, StrataError};

/// Growable big-endian writer used to serialize pages.
#[derive(Default, Debug)]
pub struct PageWriter {
    buf: Vec<u8>,
}

impl PageWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty writer with room for `cap` bytes.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    /// Appends a `u8`.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Appends a big-endian `u32`.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian `u64`.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends raw bytes without a length prefix.
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Appends a `u32` length prefix followed by the bytes.
    pub fn put_len_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| StrataError::Invalid("payload longer than u32::MAX"))?;
        self.put_u32(len);
        self.put_slice(bytes);
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true when nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read-only view of the encoded bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer and returns its buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked big-endian reader over encoded page bytes.
///
/// Every accessor fails with [`StrataError::Corruption`] instead of panicking
/// when the input is truncated.
#[derive(Debug)]
pub struct PageCursor<'a> {
    src: &'a [u8],
    off: usize,
}

impl<'a> PageCursor<'a> {
    /// Starts reading at offset zero.
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, off: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .off
            .checked_add(n)
            .ok_or(StrataError::Corruption("page offset overflow"))?;
        let out = self
            .src
            .get(self.off..end)
            .ok_or(StrataError::Corruption("page truncated"))?;
        self.off = end;
        Ok(out)
    }

    /// Reads a `u8`.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian `u32`.
    pub fn get_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(b))
    }

    /// Reads a big-endian `u64`.
    pub fn get_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(b))
    }

    /// Reads exactly `n` raw bytes.
    pub fn get_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Reads a `u32` length prefix and the bytes it announces.
    pub fn get_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.src.len().saturating_sub(self.off)
    }

    /// Fails unless every byte was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(StrataError::Corruption("trailing bytes after page body"));
        }
        Ok(())
    }
}
