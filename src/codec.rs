//! Encode/decode boundary
//!
//! A [`Codec`] is chosen once per reactor and resolved statically: every
//! connection gets its own [`Decoder`] (which may hold partial state between
//! reads) and every writer thread gets an [`Encoder`]. Message types are
//! concrete per protocol, so handlers match on them exhaustively.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::Result;

/// Outcome of one internal decode step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeStep {
    /// State advanced; run the next step immediately.
    Continue,
    /// A whole message is ready.
    Finished,
    /// Not enough bytes; wait for the next read.
    Incomplete,
}

pub trait Decoder: Send + 'static {
    type Item: Send + 'static;

    /// Decodes at most one message from `buf`.
    ///
    /// `Ok(None)` means more input is needed. Bytes before `buf.read_index()`
    /// are considered consumed on return; the decoder keeps whatever partial
    /// state it needs to resume.
    fn decode(&mut self, buf: &mut ReadBuffer<'_>) -> Result<Option<Self::Item>>;
}

pub trait Encoder: Send + 'static {
    type Item: Send + 'static;

    fn encode(&mut self, buf: &mut WriteBuffer, item: &Self::Item) -> Result<()>;
}

/// Factory for the per-connection decoder and per-writer encoder.
pub trait Codec: Send + Sync + 'static {
    /// Messages read from the wire.
    type Inbound: Send + 'static;
    /// Messages written to the wire.
    type Outbound: Send + 'static;
    type Decoder: Decoder<Item = Self::Inbound>;
    type Encoder: Encoder<Item = Self::Outbound>;

    fn decoder(&self) -> Self::Decoder;
    fn encoder(&self) -> Self::Encoder;
}

/// Passes bytes through untouched. Useful for raw TCP services and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesCodec;

#[derive(Debug, Default)]
pub struct BytesDecoder;

#[derive(Debug, Default)]
pub struct BytesEncoder;

impl Decoder for BytesDecoder {
    type Item = bytes::Bytes;

    fn decode(&mut self, buf: &mut ReadBuffer<'_>) -> Result<Option<bytes::Bytes>> {
        if buf.available() == 0 {
            return Ok(None);
        }
        let n = buf.available();
        Ok(buf.read_bytes(n).map(bytes::Bytes::copy_from_slice))
    }
}

impl Encoder for BytesEncoder {
    type Item = bytes::Bytes;

    fn encode(&mut self, buf: &mut WriteBuffer, item: &bytes::Bytes) -> Result<()> {
        buf.write_bytes(item);
        Ok(())
    }
}

impl Codec for BytesCodec {
    type Inbound = bytes::Bytes;
    type Outbound = bytes::Bytes;
    type Decoder = BytesDecoder;
    type Encoder = BytesEncoder;

    fn decoder(&self) -> BytesDecoder {
        BytesDecoder
    }

    fn encoder(&self) -> BytesEncoder {
        BytesEncoder
    }
}
