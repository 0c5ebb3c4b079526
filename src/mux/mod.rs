//! Event-queue half of the native binding
//!
//! One [`Mux`] implementation is compiled per target:
//!
//! - **Linux/Android**: epoll, called directly through `libc`
//! - **macOS/iOS/BSD**: kqueue, called directly through `libc`
//! - **Windows**: an epoll-style interest set emulated on top of `WSAPoll`
//! - **Other unix, or any unix with the `mio-runtime` feature**: `mio::Poll`
//!
//! epoll, kqueue and `WSAPoll` are level-triggered; mio is edge-triggered, so
//! the looper always reads, writes and accepts until `WouldBlock`, which is
//! correct under either mode. Every back-end exposes the same surface:
//! register, reregister, deregister and a bounded `wait`. A `Mux` is owned by
//! exactly one looper thread; nothing here is synchronized.

use std::ops::BitOr;

/// Readiness a socket is registered for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const READ: Interest = Interest(0b01);
    pub const WRITE: Interest = Interest(0b10);
    pub const READ_WRITE: Interest = Interest(0b11);

    pub fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    pub fn add(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    /// `None` when nothing is left.
    pub fn remove(self, other: Interest) -> Option<Interest> {
        let bits = self.0 & !other.0;
        (bits != 0).then_some(Interest(bits))
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

/// Readiness reported by [`Mux::wait`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
    /// Error or hang-up on the socket.
    pub hangup: bool,
}

cfg_if::cfg_if! {
    if #[cfg(all(unix, feature = "mio-runtime"))] {
        mod mio;
        pub use self::mio::Mux;
    } else if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub use self::epoll::Mux;
    } else if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))] {
        mod kqueue;
        pub use self::kqueue::Mux;
    } else if #[cfg(windows)] {
        mod wsapoll;
        pub use self::wsapoll::Mux;
    } else if #[cfg(unix)] {
        compile_error!("this unix target has no native event queue; enable the `mio-runtime` feature");
    } else {
        mod unsupported;
        pub use self::unsupported::Mux;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_set_operations() {
        let rw = Interest::READ | Interest::WRITE;
        assert_eq!(rw, Interest::READ_WRITE);
        assert!(rw.is_readable() && rw.is_writable());
        assert_eq!(rw.remove(Interest::WRITE), Some(Interest::READ));
        assert_eq!(Interest::READ.remove(Interest::READ), None);
        assert!(!Interest::WRITE.is_readable());
    }
}
