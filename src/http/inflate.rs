//! `Content-Encoding` inflation
//!
//! `gzip` and `deflate` bodies are inflated when the `compression` feature is
//! on; `identity` passes through (`Ok(None)`). Any other encoding, or a
//! compressed body with the feature off, is a decode error. Inflated output is
//! capped at [`MAX_INFLATED_LEN`].

use crate::error::{Error, Result};
use bytes::Bytes;

/// Largest body a compressed payload may inflate to.
pub const MAX_INFLATED_LEN: usize = 64 << 20;

pub(crate) fn inflate(encoding: &str, body: &[u8]) -> Result<Option<Bytes>> {
    inflate_capped(encoding, body, MAX_INFLATED_LEN)
}

#[cfg(feature = "compression")]
fn inflate_capped(encoding: &str, body: &[u8], limit: usize) -> Result<Option<Bytes>> {
    use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
    use std::io::Read;

    // one byte past the limit tells an exact fit from an overflow
    let cap = limit as u64 + 1;
    let mut out = Vec::with_capacity(body.len().saturating_mul(2).min(limit));
    let res = match encoding {
        "identity" => return Ok(None),
        "gzip" | "x-gzip" => GzDecoder::new(body).take(cap).read_to_end(&mut out),
        // zlib-wrapped per RFC 9110, raw deflate from some servers
        "deflate" => match ZlibDecoder::new(body).take(cap).read_to_end(&mut out) {
            Ok(n) => Ok(n),
            Err(_) => {
                out.clear();
                DeflateDecoder::new(body).take(cap).read_to_end(&mut out)
            }
        },
        _ => return Err(Error::decode(format!("unsupported content-encoding {encoding:?}"))),
    };
    res.map_err(|e| Error::decode(format!("{encoding} body: {e}")))?;
    if out.len() > limit {
        return Err(Error::decode(format!("{encoding} body inflates past {limit} bytes")));
    }
    Ok(Some(Bytes::from(out)))
}

#[cfg(not(feature = "compression"))]
fn inflate_capped(encoding: &str, _body: &[u8], _limit: usize) -> Result<Option<Bytes>> {
    match encoding {
        "identity" => Ok(None),
        _ => Err(Error::decode(format!("unsupported content-encoding {encoding:?}"))),
    }
}
