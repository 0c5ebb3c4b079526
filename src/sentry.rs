//! Connection phases
//!
//! Every connection starts as a [`Sentry`], which owns the handshake. When the
//! handshake resolves the sentry signals [`Signal::Upgrade`] and the looper
//! consumes it through [`Sentry::into_protocol`]; the resulting [`Protocol`]
//! serves the connection until close. A sentry cannot be used after upgrade
//! because `into_protocol` takes it by value.
//!
//! Threading: a sentry is only ever touched by its looper thread. A protocol
//! is shared by the looper (reads) and one writer thread (writes, shutdown),
//! so its methods take `&self`; `close` is called exactly once by whichever
//! side releases the connection last.

use crate::error::{Error, NativeError, Result};
use crate::loc::Loc;
use crate::raw::{self, Transfer};
use crate::socket::Socket;

/// Outcome of a sentry event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Nothing to change.
    Idle,
    /// Handshake done; upgrade now.
    Upgrade,
    /// Register for readable events only.
    WantRead,
    /// Register for writable events only.
    WantWrite,
    /// Abandon the connection.
    Close,
}

/// Handshake phase of a connection.
pub trait Sentry: Send {
    fn socket(&self) -> Socket;

    /// Handshake bytes are available; `scratch` may be used as read space.
    fn on_readable(&mut self, scratch: &mut [u8]) -> Result<Signal>;

    fn on_writable(&mut self) -> Result<Signal>;

    fn into_protocol(self: Box<Self>) -> Box<dyn Protocol>;

    /// Only reached when the connection is abandoned before upgrade.
    fn close(self: Box<Self>);
}

/// Steady-state phase of a connection.
pub trait Protocol: Send + Sync {
    fn socket(&self) -> Socket;

    /// Looper thread only.
    fn on_readable(&self, buf: &mut [u8]) -> Result<Transfer>;

    /// Looper thread only. Write readiness is forwarded to the writer; a
    /// protocol that needs to react itself (e.g. renegotiation) can do so here.
    fn on_writable(&self) -> Result<Signal> {
        Ok(Signal::Idle)
    }

    /// Writer thread only.
    fn do_write(&self, data: &[u8]) -> Result<Transfer>;

    /// Writer thread only; called at most once.
    fn do_shutdown(&self) -> Result<()>;

    /// Called exactly once, by the last side to release the connection.
    fn do_close(&self) -> Result<()>;
}

/// Creates the initial sentry for accepted and connected sockets.
pub trait Provider: Send + Sync + 'static {
    fn create(&self, socket: Socket, loc: &Loc) -> Result<Box<dyn Sentry>>;

    /// Releases provider resources at reactor shutdown.
    fn close(&self) {}
}

/// Plain TCP: the handshake is the TCP connect itself.
///
/// The socket is first registered for write interest; the first writable
/// event checks `SO_ERROR` and upgrades when it is clear.
#[derive(Debug)]
pub struct TcpSentry {
    socket: Socket,
}

impl TcpSentry {
    pub fn new(socket: Socket) -> Self {
        Self { socket }
    }
}

impl Sentry for TcpSentry {
    fn socket(&self) -> Socket {
        self.socket
    }

    fn on_readable(&mut self, _scratch: &mut [u8]) -> Result<Signal> {
        Ok(Signal::WantWrite)
    }

    fn on_writable(&mut self) -> Result<Signal> {
        match raw::socket_error(self.socket)? {
            0 => Ok(Signal::Upgrade),
            code => Err(Error::Native(NativeError::new("connect", code))),
        }
    }

    fn into_protocol(self: Box<Self>) -> Box<dyn Protocol> {
        Box::new(TcpProtocol { socket: self.socket })
    }

    fn close(self: Box<Self>) {
        if let Err(e) = raw::close(self.socket) {
            log::debug!("closing sentry socket {}: {}", self.socket, e);
        }
    }
}

#[derive(Debug)]
pub struct TcpProtocol {
    socket: Socket,
}

impl Protocol for TcpProtocol {
    fn socket(&self) -> Socket {
        self.socket
    }

    fn on_readable(&self, buf: &mut [u8]) -> Result<Transfer> {
        Ok(raw::recv(self.socket, buf)?)
    }

    fn do_write(&self, data: &[u8]) -> Result<Transfer> {
        Ok(raw::send(self.socket, data)?)
    }

    fn do_shutdown(&self) -> Result<()> {
        Ok(raw::shutdown_write(self.socket)?)
    }

    fn do_close(&self) -> Result<()> {
        Ok(raw::close(self.socket)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProvider;

impl Provider for TcpProvider {
    fn create(&self, socket: Socket, _loc: &Loc) -> Result<Box<dyn Sentry>> {
        Ok(Box::new(TcpSentry::new(socket)))
    }
}
