//! Byte-buffer primitives backing the output image and the auxiliary
//! tables (string table, symbol table, relocation array).
//!
//! Grounded on the teacher's `link::Segment`, which is a bare
//! `Vec<u8>` with an `append<T: Pod>` helper; generalized here into two
//! use-modes: a growable [`Buffer`] for tables whose final size isn't
//! known up front, and a fixed-capacity [`Cursor`] for writing into the
//! single pre-sized output image, with boundary assertions that turn a
//! layout bug into an [`Error::LayoutMismatch`] instead of silent
//! corruption or a panic.

use bytemuck::Pod;

use crate::error::{Error, Result};

/// A growable little-endian byte buffer.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.data.try_reserve(additional).map_err(|_| Error::AllocationFailure {
            requested: additional,
        })
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn append_pod<T: Pod>(&mut self, val: &T) {
        self.append(bytemuck::bytes_of(val));
    }

    pub fn append_u8(&mut self, val: u8) {
        self.data.push(val);
    }

    pub fn append_u16(&mut self, val: u16) {
        self.append(&val.to_le_bytes());
    }

    pub fn append_u32(&mut self, val: u32) {
        self.append(&val.to_le_bytes());
    }

    pub fn append_u64(&mut self, val: u64) {
        self.append(&val.to_le_bytes());
    }

    pub fn append_zero(&mut self, n: usize) {
        self.data.resize(self.data.len() + n, 0);
    }

    /// Appends a NUL-terminated copy of `s` and returns the offset it
    /// was written at, for use as an `st_name`/`sh_name` value.
    pub fn append_cstring(&mut self, s: &[u8]) -> u32 {
        let offset = self.data.len();
        self.append(s);
        self.data.push(0);
        offset.try_into().expect("string table offset exceeds u32")
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// A fixed-capacity writer over the final output image.
///
/// `write_pos` tracks the cursor; callers that know the planned offset
/// of the next section call [`Cursor::expect`] first so a layout bug
/// surfaces as [`Error::LayoutMismatch`] rather than miswritten bytes.
pub struct Cursor {
    data: Vec<u8>,
    write_pos: usize,
}

impl Cursor {
    /// Allocates a zero-filled buffer of exactly `size` bytes.
    pub fn with_size(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| Error::AllocationFailure { requested: size })?;
        data.resize(size, 0);
        Ok(Self { data, write_pos: 0 })
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// Asserts the cursor is at `expected`, the offset the layout
    /// planner computed for whatever comes next.
    pub fn expect(&self, expected: usize) -> Result<()> {
        if self.write_pos != expected {
            return Err(Error::LayoutMismatch {
                expected,
                actual: self.write_pos,
            });
        }
        Ok(())
    }

    pub fn write(&mut self, bytes: &[u8]) {
        let end = self.write_pos + bytes.len();
        self.data[self.write_pos..end].copy_from_slice(bytes);
        self.write_pos = end;
    }

    pub fn write_pod<T: Pod>(&mut self, val: &T) {
        self.write(bytemuck::bytes_of(val));
    }

    /// Advances the cursor by `n` bytes without writing (the buffer is
    /// already zero-filled).
    pub fn zero(&mut self, n: usize) {
        self.write_pos += n;
    }

    /// Writes `bytes` at `offset`, without moving the cursor. Used for
    /// the rodata region, whose pieces land at patch-specified offsets
    /// rather than the running write position.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}
