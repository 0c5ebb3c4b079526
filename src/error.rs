//! Error taxonomy for the reactor
//!
//! Every failure in the crate is an [`Error`] carrying a category tag
//! ([`ErrorKind`]) and a message. Native failures additionally carry the
//! platform error code (`errno` on unix, `WSAGetLastError` on Windows).

use std::fmt;
use std::io;

use thiserror::Error;

/// A foreign call that returned a failure status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeError {
    /// Name of the failing call, e.g. `"epoll_ctl"`.
    pub op: &'static str,
    /// Raw platform error code.
    pub code: i32,
}

impl NativeError {
    pub fn new(op: &'static str, code: i32) -> Self {
        Self { op, code }
    }

    /// Captures the calling thread's last platform error for `op`.
    pub fn last(op: &'static str) -> Self {
        Self::new(op, crate::raw::last_error_code())
    }

    /// True if the code means "try again later".
    pub fn is_would_block(&self) -> bool {
        crate::raw::is_would_block(self.code)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed with code {}: {}",
            self.op,
            self.code,
            io::Error::from_raw_os_error(self.code)
        )
    }
}

impl std::error::Error for NativeError {}

/// Category tag of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Native,
    ProtocolDecode,
    Encode,
    Config,
    UnsupportedPlatform,
    ChannelClosed,
    Io,
}

/// Errors returned by the reactor.
#[derive(Debug, Error)]
pub enum Error {
    /// A native call failed; fatal to the affected socket only.
    #[error("native: {0}")]
    Native(#[from] NativeError),
    /// Malformed wire data; the owning channel is closed.
    #[error("protocol decode: {0}")]
    Decode(String),
    /// An outbound message could not be serialized.
    #[error("encode: {0}")]
    Encode(String),
    /// Invalid configuration; aborts startup.
    #[error("config: {0}")]
    Config(String),
    /// No native binding exists for the current target.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(&'static str),
    /// The channel is closing or already closed.
    #[error("channel closed")]
    ChannelClosed,
    /// Failure outside the native layer, e.g. spawning a thread.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Native(_) => ErrorKind::Native,
            Error::Decode(_) => ErrorKind::ProtocolDecode,
            Error::Encode(_) => ErrorKind::Encode,
            Error::Config(_) => ErrorKind::Config,
            Error::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            Error::ChannelClosed => ErrorKind::ChannelClosed,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Platform error code for native failures.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            Error::Native(e) => Some(e.code),
            _ => None,
        }
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
