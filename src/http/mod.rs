//! HTTP/1.1 framing
//!
//! Request line and status line, `Key: Value` headers, and bodies framed by
//! `Content-Length` or `Transfer-Encoding: chunked`. Chunked trailers are not
//! supported. Routing and content negotiation live above this layer.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

use crate::codec::Codec;

mod decoder;
mod encoder;
mod inflate;

pub use decoder::{HttpDecoder, RequestDecoder, RequestLine, ResponseDecoder, StartLine, StatusLine};
pub use encoder::{RequestEncoder, ResponseEncoder};
pub use inflate::MAX_INFLATED_LEN;

pub const HTTP_11: &str = "HTTP/1.1";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }

    /// Exact, case-sensitive match of a request-line token.
    pub fn from_token(token: &[u8]) -> Option<Method> {
        Some(match token {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"PATCH" => Method::Patch,
            b"OPTIONS" => Method::Options,
            _ => return None,
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status code with its reason phrase.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatusCode {
    code: u16,
    reason: Cow<'static, str>,
}

impl StatusCode {
    pub const OK: StatusCode = StatusCode::from_static(200, "OK");
    pub const CREATED: StatusCode = StatusCode::from_static(201, "Created");
    pub const NO_CONTENT: StatusCode = StatusCode::from_static(204, "No Content");
    pub const BAD_REQUEST: StatusCode = StatusCode::from_static(400, "Bad Request");
    pub const NOT_FOUND: StatusCode = StatusCode::from_static(404, "Not Found");
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode::from_static(500, "Internal Server Error");

    pub const fn from_static(code: u16, reason: &'static str) -> Self {
        Self {
            code,
            reason: Cow::Borrowed(reason),
        }
    }

    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Cow::Owned(reason.into()),
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Header list in arrival order with case-insensitive lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Appends; existing values for `name` are kept.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with one value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Order-insensitive comparison; names compare case-insensitively.
    pub fn same_entries(&self, other: &Headers) -> bool {
        let norm = |h: &Headers| {
            let mut v: Vec<(String, String)> = h
                .entries
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect();
            v.sort();
            v
        };
        norm(self) == norm(other)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: HTTP_11.to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: String,
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: HTTP_11.to_string(),
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Server side: decodes requests, encodes responses.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpServerCodec;

impl Codec for HttpServerCodec {
    type Inbound = HttpRequest;
    type Outbound = HttpResponse;
    type Decoder = RequestDecoder;
    type Encoder = ResponseEncoder;

    fn decoder(&self) -> RequestDecoder {
        RequestDecoder::new()
    }

    fn encoder(&self) -> ResponseEncoder {
        ResponseEncoder
    }
}

/// Client side: decodes responses, encodes requests.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpClientCodec;

impl Codec for HttpClientCodec {
    type Inbound = HttpResponse;
    type Outbound = HttpRequest;
    type Decoder = ResponseDecoder;
    type Encoder = RequestEncoder;

    fn decoder(&self) -> ResponseDecoder {
        ResponseDecoder::new()
    }

    fn encoder(&self) -> RequestEncoder {
        RequestEncoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_tokens() {
        for m in [Method::Get, Method::Post, Method::Put, Method::Delete, Method::Patch, Method::Options] {
            assert_eq!(Method::from_token(m.as_str().as_bytes()), Some(m));
        }
        assert_eq!(Method::from_token(b"FOO"), None);
        assert_eq!(Method::from_token(b"get"), None);
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut h = Headers::new();
        h.append("Content-Type", "text/plain");
        h.append("X-Trace", "1");
        h.append("x-trace", "2");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("X-TRACE"), Some("1"));

        h.set("X-Trace", "3");
        assert_eq!(h.len(), 2);
        assert_eq!(h.get("x-trace"), Some("3"));

        let mut other = Headers::new();
        other.append("x-trace", "3");
        other.append("content-type", "text/plain");
        assert!(h.same_entries(&other));
        assert_ne!(h, other);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StatusCode::NOT_FOUND.to_string(), "404 Not Found");
        assert_eq!(StatusCode::new(299, "Custom").code(), 299);
    }
}
