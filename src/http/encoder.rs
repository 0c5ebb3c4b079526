//! HTTP/1.1 encoders
//!
//! Bodies are always written with a computed `Content-Length`; caller-supplied
//! framing headers are dropped.

use std::fmt::Write as _;

use super::{Headers, HttpRequest, HttpResponse};
use crate::buffer::WriteBuffer;
use crate::codec::Encoder;
use crate::error::{Error, Result};

fn is_framing(name: &str) -> bool {
    name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("Transfer-Encoding")
}

fn fmt_err(_: std::fmt::Error) -> Error {
    Error::Encode("formatting failed".to_string())
}

fn write_headers(buf: &mut WriteBuffer, headers: &Headers, body_len: Option<usize>) -> Result<()> {
    for (name, value) in headers.iter().filter(|(name, _)| !is_framing(name)) {
        if name.contains(['\r', '\n', ':']) || value.contains(['\r', '\n']) {
            return Err(Error::Encode(format!("header {name:?} contains a line break or colon")));
        }
        write!(buf, "{name}: {value}\r\n").map_err(fmt_err)?;
    }
    if let Some(len) = body_len {
        write!(buf, "Content-Length: {len}\r\n").map_err(fmt_err)?;
    }
    buf.write_bytes(b"\r\n");
    Ok(())
}

/// Writes `VERSION SP CODE SP REASON`, headers and body.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseEncoder;

impl Encoder for ResponseEncoder {
    type Item = HttpResponse;

    /// A response without a body is rejected.
    fn encode(&mut self, buf: &mut WriteBuffer, resp: &HttpResponse) -> Result<()> {
        let body = match &resp.body {
            Some(body) if !body.is_empty() => body,
            _ => return Err(Error::Encode(format!("response {} has no body", resp.status))),
        };
        write!(buf, "{} {} {}\r\n", resp.version, resp.status.code(), resp.status.reason()).map_err(fmt_err)?;
        write_headers(buf, &resp.headers, Some(body.len()))?;
        buf.write_bytes(body);
        Ok(())
    }
}

/// Writes `METHOD SP URI SP VERSION`, headers and the optional body.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestEncoder;

impl Encoder for RequestEncoder {
    type Item = HttpRequest;

    fn encode(&mut self, buf: &mut WriteBuffer, req: &HttpRequest) -> Result<()> {
        if req.uri.is_empty() || req.uri.contains([' ', '\r', '\n']) {
            return Err(Error::Encode(format!("invalid request uri {:?}", req.uri)));
        }
        let body = req.body.as_ref().filter(|b| !b.is_empty());
        write!(buf, "{} {} {}\r\n", req.method, req.uri, req.version).map_err(fmt_err)?;
        write_headers(buf, &req.headers, body.map(|b| b.len()))?;
        if let Some(body) = body {
            buf.write_bytes(body);
        }
        Ok(())
    }
}
