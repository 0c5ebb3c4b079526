//! Resumable HTTP/1.1 decoder
//!
//! Requests and responses share one state machine. The start line is three
//! tokens (`SP`, `SP`, `CRLF` terminated); the [`StartLine`] implementation
//! decides what they mean. Every step either consumes a whole token and
//! advances, or reports `Incomplete` without moving the cursor.

use bytes::{Bytes, BytesMut};
use log::trace;

use super::inflate::inflate;
use super::{Headers, HttpRequest, HttpResponse, Method, StatusCode};
use crate::buffer::ReadBuffer;
use crate::codec::{DecodeStep, Decoder};
use crate::error::{Error, Result};

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    /// First start-line token.
    Initial,
    /// Second start-line token.
    Uri,
    /// Rest of the start line.
    Version,
    Header,
    FixedBody(usize),
    ChunkLength,
    ChunkBody(usize),
    ChunkTrailer,
}

/// Interpretation of the three start-line tokens.
pub trait StartLine: Default + Send + 'static {
    type Message: Send + 'static;

    fn first(&mut self, token: &[u8]) -> Result<()>;
    fn second(&mut self, token: &[u8]) -> Result<()>;
    fn third(&mut self, token: &[u8]) -> Result<()>;
    fn finish(self, headers: Headers, body: Option<Bytes>) -> Result<Self::Message>;
}

fn utf8<'a>(token: &'a [u8], what: &str) -> Result<&'a str> {
    std::str::from_utf8(token).map_err(|_| Error::decode(format!("{what} is not valid utf-8")))
}

/// Strict unsigned integer: digits only, no sign, no whitespace.
fn parse_len(token: &str, radix: u32, what: &str) -> Result<usize> {
    let digits = !token.is_empty() && token.chars().all(|c| c.is_digit(radix));
    digits
        .then(|| usize::from_str_radix(token, radix).ok())
        .flatten()
        .ok_or_else(|| Error::decode(format!("bad {what} {token:?}")))
}

fn single_line(token: &[u8], what: &str) -> Result<()> {
    if token.iter().any(|&b| b == CR || b == LF) {
        return Err(Error::decode(format!("malformed {what}")));
    }
    Ok(())
}

/// `METHOD SP URI SP VERSION`
#[derive(Debug, Default)]
pub struct RequestLine {
    method: Option<Method>,
    uri: String,
    version: String,
}

impl StartLine for RequestLine {
    type Message = HttpRequest;

    fn first(&mut self, token: &[u8]) -> Result<()> {
        let method = Method::from_token(token).ok_or_else(|| {
            Error::decode(format!("unsupported method {:?}", String::from_utf8_lossy(token)))
        })?;
        self.method = Some(method);
        Ok(())
    }

    fn second(&mut self, token: &[u8]) -> Result<()> {
        if token.is_empty() {
            return Err(Error::decode("empty request uri"));
        }
        single_line(token, "request uri")?;
        self.uri = utf8(token, "request uri")?.to_string();
        Ok(())
    }

    fn third(&mut self, token: &[u8]) -> Result<()> {
        if token.is_empty() {
            return Err(Error::decode("empty http version"));
        }
        self.version = utf8(token, "http version")?.to_string();
        Ok(())
    }

    fn finish(self, headers: Headers, body: Option<Bytes>) -> Result<HttpRequest> {
        let method = self.method.ok_or_else(|| Error::decode("request line without method"))?;
        Ok(HttpRequest {
            method,
            uri: self.uri,
            version: self.version,
            headers,
            body,
        })
    }
}

/// `VERSION SP CODE SP REASON`. A reason phrase is required.
#[derive(Debug, Default)]
pub struct StatusLine {
    version: String,
    code: u16,
    reason: String,
}

impl StartLine for StatusLine {
    type Message = HttpResponse;

    fn first(&mut self, token: &[u8]) -> Result<()> {
        if token.is_empty() {
            return Err(Error::decode("empty http version"));
        }
        single_line(token, "http version")?;
        self.version = utf8(token, "http version")?.to_string();
        Ok(())
    }

    fn second(&mut self, token: &[u8]) -> Result<()> {
        let code = utf8(token, "status code")?
            .parse::<u16>()
            .ok()
            .filter(|c| (100..=999).contains(c) && token.len() == 3)
            .ok_or_else(|| Error::decode(format!("bad status code {:?}", String::from_utf8_lossy(token))))?;
        self.code = code;
        Ok(())
    }

    fn third(&mut self, token: &[u8]) -> Result<()> {
        if token.is_empty() {
            return Err(Error::decode("empty reason phrase"));
        }
        self.reason = utf8(token, "reason phrase")?.to_string();
        Ok(())
    }

    fn finish(self, headers: Headers, body: Option<Bytes>) -> Result<HttpResponse> {
        Ok(HttpResponse {
            version: self.version,
            status: StatusCode::new(self.code, self.reason),
            headers,
            body,
        })
    }
}

/// Decoder state persisted across reads of one connection.
#[derive(Debug)]
pub struct HttpDecoder<L: StartLine> {
    state: State,
    line: L,
    headers: Headers,
    body: Option<Bytes>,
    chunks: BytesMut,
}

pub type RequestDecoder = HttpDecoder<RequestLine>;
pub type ResponseDecoder = HttpDecoder<StatusLine>;

impl<L: StartLine> Default for HttpDecoder<L> {
    fn default() -> Self {
        Self {
            state: State::Initial,
            line: L::default(),
            headers: Headers::new(),
            body: None,
            chunks: BytesMut::new(),
        }
    }
}

impl<L: StartLine> HttpDecoder<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True between messages.
    pub fn is_idle(&self) -> bool {
        self.state == State::Initial
    }

    fn end_of_headers(&mut self) -> Result<DecodeStep> {
        if let Some(len) = self.headers.get("Content-Length") {
            let len = parse_len(len, 10, "content-length")?;
            if len == 0 {
                return Ok(DecodeStep::Finished);
            }
            self.state = State::FixedBody(len);
            return Ok(DecodeStep::Continue);
        }
        let chunked = self
            .headers
            .get("Transfer-Encoding")
            .is_some_and(|te| te.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")));
        if chunked {
            self.chunks.clear();
            self.state = State::ChunkLength;
            return Ok(DecodeStep::Continue);
        }
        Ok(DecodeStep::Finished)
    }

    fn set_body(&mut self, body: Bytes) -> Result<()> {
        let body = match self.headers.get("Content-Encoding") {
            Some(encoding) => {
                let encoding = encoding.trim().to_ascii_lowercase();
                match inflate(&encoding, &body)? {
                    Some(plain) => {
                        self.headers.remove("Content-Encoding");
                        if self.headers.contains("Content-Length") {
                            self.headers.set("Content-Length", plain.len().to_string());
                        }
                        plain
                    }
                    None => body,
                }
            }
            None => body,
        };
        self.body = Some(body);
        Ok(())
    }

    fn try_decode(&mut self, buf: &mut ReadBuffer<'_>) -> Result<DecodeStep> {
        match self.state {
            State::Initial => {
                let Some(token) = buf.read_until(SP) else { return Ok(DecodeStep::Incomplete) };
                self.line.first(token)?;
                self.state = State::Uri;
            }
            State::Uri => {
                let Some(token) = buf.read_until(SP) else { return Ok(DecodeStep::Incomplete) };
                self.line.second(token)?;
                self.state = State::Version;
            }
            State::Version => {
                let Some(token) = buf.read_until2(CR, LF) else { return Ok(DecodeStep::Incomplete) };
                self.line.third(token)?;
                self.state = State::Header;
            }
            State::Header => {
                let Some(line) = buf.read_until2(CR, LF) else { return Ok(DecodeStep::Incomplete) };
                if line.is_empty() {
                    return self.end_of_headers();
                }
                let at = memchr::memmem::find(line, b": ").ok_or_else(|| {
                    Error::decode(format!("malformed header {:?}", String::from_utf8_lossy(line)))
                })?;
                let key = utf8(&line[..at], "header name")?;
                let value = utf8(&line[at + 2..], "header value")?;
                self.headers.append(key, value);
            }
            State::FixedBody(len) => {
                let Some(body) = buf.read_bytes(len) else { return Ok(DecodeStep::Incomplete) };
                self.set_body(Bytes::copy_from_slice(body))?;
                return Ok(DecodeStep::Finished);
            }
            State::ChunkLength => {
                let Some(line) = buf.read_until2(CR, LF) else { return Ok(DecodeStep::Incomplete) };
                let size = line.split(|&b| b == b';').next().unwrap_or_default();
                let size = utf8(size, "chunk size")?.trim();
                let len = parse_len(size, 16, "chunk size")?;
                self.state = if len == 0 { State::ChunkTrailer } else { State::ChunkBody(len) };
            }
            State::ChunkBody(len) => {
                if buf.available() < len.saturating_add(2) {
                    return Ok(DecodeStep::Incomplete);
                }
                let Some(chunk) = buf.read_bytes(len) else { return Ok(DecodeStep::Incomplete) };
                self.chunks.extend_from_slice(chunk);
                if buf.read_bytes(2) != Some(&b"\r\n"[..]) {
                    return Err(Error::decode("chunk not terminated by CRLF"));
                }
                self.state = State::ChunkLength;
            }
            State::ChunkTrailer => {
                let Some(line) = buf.read_until2(CR, LF) else { return Ok(DecodeStep::Incomplete) };
                if !line.is_empty() {
                    return Err(Error::decode("chunked trailers are not supported"));
                }
                let body = self.chunks.split().freeze();
                self.set_body(body)?;
                return Ok(DecodeStep::Finished);
            }
        }
        Ok(DecodeStep::Continue)
    }
}

impl<L: StartLine> Decoder for HttpDecoder<L> {
    type Item = L::Message;

    fn decode(&mut self, buf: &mut ReadBuffer<'_>) -> Result<Option<L::Message>> {
        loop {
            match self.try_decode(buf) {
                Ok(DecodeStep::Continue) => continue,
                Ok(DecodeStep::Incomplete) => return Ok(None),
                Ok(DecodeStep::Finished) => {
                    let line = std::mem::take(&mut self.line);
                    let headers = std::mem::take(&mut self.headers);
                    let body = self.body.take();
                    self.state = State::Initial;
                    trace!("decoded http message, {} headers", headers.len());
                    return line.finish(headers, body).map(Some);
                }
                Err(e) => {
                    *self = Self::default();
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    fn decode_all(bytes: &[u8]) -> Result<Option<HttpRequest>> {
        RequestDecoder::new().decode(&mut ReadBuffer::new(bytes))
    }

    /// Feeds `bytes` in `size`-byte fragments the way the looper does:
    /// accumulate, decode, drop what the decoder consumed.
    fn decode_fragmented(bytes: &[u8], size: usize) -> Result<Vec<HttpRequest>> {
        let mut decoder = RequestDecoder::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut out = Vec::new();
        for piece in bytes.chunks(size) {
            pending.extend_from_slice(piece);
            loop {
                let mut buf = ReadBuffer::new(&pending);
                let item = decoder.decode(&mut buf)?;
                let consumed = buf.read_index();
                pending.drain(..consumed);
                match item {
                    Some(req) => out.push(req),
                    None => break,
                }
            }
        }
        Ok(out)
    }

    #[test]
    fn test_get_ping() {
        let req = decode_all(b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n").unwrap().unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.uri, "/ping");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.headers.get("host"), Some("x"));
        assert_eq!(req.body, None);
    }

    #[test]
    fn test_chunked_wikipedia() {
        let raw = b"POST /wiki HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let req = decode_all(raw).unwrap().unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"Wikipedia"[..]));

        for size in 1..raw.len() {
            let reqs = decode_fragmented(raw, size).unwrap();
            assert_eq!(reqs, vec![req.clone()], "fragment size {size}");
        }
    }

    #[test]
    fn test_chunk_extension_ignored() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3;name=v\r\nabc\r\n0\r\n\r\n";
        assert_eq!(decode_all(raw).unwrap().unwrap().body.as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_trailer_rejected() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\nX-Sum: 1\r\n\r\n";
        assert_eq!(decode_all(raw).unwrap_err().kind(), ErrorKind::ProtocolDecode);
    }

    #[test]
    fn test_bad_chunk_framing() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabcXY0\r\n\r\n";
        assert_eq!(decode_all(raw).unwrap_err().kind(), ErrorKind::ProtocolDecode);
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n";
        assert_eq!(decode_all(raw).unwrap_err().kind(), ErrorKind::ProtocolDecode);
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n+3\r\nabc\r\n0\r\n\r\n";
        assert_eq!(decode_all(raw).unwrap_err().kind(), ErrorKind::ProtocolDecode);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let err = decode_all(b"FOO / HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolDecode);
        // rejected as soon as the token is complete
        let err = decode_all(b"FOO ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolDecode);
    }

    #[test]
    fn test_malformed_lines() {
        for raw in [
            &b"GET  HTTP/1.1\r\n\r\n"[..],
            b"GET / HTTP/1.1\r\nHost:x\r\n\r\n",
            b"GET / HTTP/1.1\r\nContent-Length: ten\r\n\r\n",
            b"GET / HTTP/1.1\r\nContent-Length: -1\r\n\r\n",
            b"GET / HTTP/1.1\r\nContent-Length: +5\r\n\r\n+5sss",
            b"GET / \r\n\r\n",
            b"GET /a\r\nHost: b c\r\n\r\n",
        ] {
            assert_eq!(
                decode_all(raw).unwrap_err().kind(),
                ErrorKind::ProtocolDecode,
                "{:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_incomplete_does_not_consume() {
        let mut decoder = RequestDecoder::new();
        let raw = b"GET /ping HTTP/1.1\r\nHos";
        let mut buf = ReadBuffer::new(raw);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        // the partial header line stays unconsumed
        assert_eq!(buf.remaining(), b"Hos");
        assert!(!decoder.is_idle());
    }

    #[test]
    fn test_pipelined_requests() {
        let raw = b"GET /a HTTP/1.1\r\n\r\nPOST /b HTTP/1.1\r\nContent-Length: 2\r\n\r\nhiGET /c HTTP/1.1\r\n\r\n";
        let reqs = decode_fragmented(raw, raw.len()).unwrap();
        let uris: Vec<_> = reqs.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, ["/a", "/b", "/c"]);
        assert_eq!(reqs[1].body.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_decoder_resets_after_error() {
        let mut decoder = RequestDecoder::new();
        assert!(decoder.decode(&mut ReadBuffer::new(b"BAD / HTTP/1.1\r\n\r\n")).is_err());
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_response_decoding() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\nnope";
        let resp = ResponseDecoder::new().decode(&mut ReadBuffer::new(raw)).unwrap().unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.body.as_deref(), Some(&b"nope"[..]));

        for bad in [&b"HTTP/1.1 2x0 OK\r\n\r\n"[..], b" 200 OK\r\n\r\n", b"HTTP/1.1 200 \r\n\r\n"] {
            let err = ResponseDecoder::new().decode(&mut ReadBuffer::new(bad)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolDecode, "{:?}", String::from_utf8_lossy(bad));
        }
    }

    fn request_strategy() -> impl Strategy<Value = Vec<u8>> {
        (
            prop_oneof![Just("GET"), Just("POST"), Just("PUT"), Just("DELETE"), Just("PATCH"), Just("OPTIONS")],
            "/[a-z0-9/]{0,20}",
            proptest::collection::vec(("X-[A-Za-z]{1,8}", "[ -~]{0,16}"), 0..5),
            proptest::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(method, uri, headers, body)| {
                let mut raw = format!("{method} {uri} HTTP/1.1\r\n").into_bytes();
                for (k, v) in headers {
                    raw.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
                }
                raw.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
                raw.extend_from_slice(&body);
                raw
            })
    }

    proptest! {
        #[test]
        fn test_fragmented_equals_one_shot(raw in request_strategy(), size in 1usize..32) {
            let whole = decode_all(&raw).unwrap().unwrap();
            let pieces = decode_fragmented(&raw, size).unwrap();
            prop_assert_eq!(pieces, vec![whole]);
        }

        #[test]
        fn test_chunked_body_is_concatenation(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..40), 0..6),
            size in 1usize..16,
        ) {
            let mut raw = b"PUT /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
            for c in &chunks {
                raw.extend_from_slice(format!("{:x}\r\n", c.len()).as_bytes());
                raw.extend_from_slice(c);
                raw.extend_from_slice(b"\r\n");
            }
            raw.extend_from_slice(b"0\r\n\r\n");
            let expected: Vec<u8> = chunks.concat();

            let reqs = decode_fragmented(&raw, size).unwrap();
            prop_assert_eq!(reqs.len(), 1);
            prop_assert_eq!(reqs[0].body.as_deref(), Some(&expected[..]));
        }
    }
}
