use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Append-only encode target.
///
/// Owns a `BytesMut` that grows geometrically. Once an encode finishes the
/// content is frozen into [`Bytes`] and handed to the writer, so it is never
/// mutated while a write is in flight.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    inner: BytesMut,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Wraps a recycled backing store; any content is discarded.
    pub fn from_bytes_mut(mut inner: BytesMut) -> Self {
        inner.clear();
        Self { inner }
    }

    pub fn write_byte(&mut self, b: u8) {
        self.inner.put_u8(b);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Takes the written bytes, leaving the buffer empty but keeping any
    /// spare capacity for the next encode.
    pub fn split(&mut self) -> Bytes {
        self.inner.split().freeze()
    }

    pub fn freeze(self) -> Bytes {
        self.inner.freeze()
    }

    pub fn into_inner(self) -> BytesMut {
        self.inner
    }
}

impl fmt::Write for WriteBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}
