//! Opaque connection handle
//!
//! Unix descriptors are 32-bit; Windows `SOCKET` handles are pointer sized.
//! [`Socket`] hides the difference: the full value is only reachable through
//! [`Socket::raw`] inside the crate, and hashing/equality go through the
//! uniform 32-bit projection returned by [`Socket::key`].

use std::fmt;
use std::hash::{Hash, Hasher};

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        /// Platform handle type (`SOCKET`).
        pub(crate) type RawSocket = u64;
    } else {
        /// Platform handle type (file descriptor).
        pub(crate) type RawSocket = i32;
    }
}

#[derive(Clone, Copy)]
pub struct Socket(RawSocket);

impl Socket {
    pub(crate) fn from_raw(raw: RawSocket) -> Self {
        Socket(raw)
    }

    pub(crate) fn raw(self) -> RawSocket {
        self.0
    }

    /// Truncated 32-bit form of the handle.
    pub fn key(self) -> u32 {
        self.0 as u32
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Socket {}

impl Hash for Socket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Socket({})", self.0)
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
