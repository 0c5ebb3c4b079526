//! mio-based back-end
//!
//! Used on unix targets without a direct binding, or everywhere on unix when
//! the `mio-runtime` feature is enabled. Raw descriptors are registered
//! through [`SourceFd`], so the rest of the crate keeps owning its sockets.

use std::io;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll, Token};

use super::{Event, Interest};
use crate::error::NativeError;
use crate::raw::NativeResult;
use crate::socket::Socket;

#[derive(Debug)]
pub struct Mux {
    /// `None` once closed.
    poll: Option<Poll>,
    events: Events,
}

fn native(op: &'static str, err: io::Error) -> NativeError {
    NativeError::new(op, err.raw_os_error().unwrap_or(0))
}

fn closed(op: &'static str) -> NativeError {
    NativeError::new(op, libc::EBADF)
}

fn mio_interest(interest: Interest) -> mio::Interest {
    match (interest.is_readable(), interest.is_writable()) {
        (true, true) => mio::Interest::READABLE | mio::Interest::WRITABLE,
        (false, true) => mio::Interest::WRITABLE,
        _ => mio::Interest::READABLE,
    }
}

impl Mux {
    pub fn new(max_events: usize) -> NativeResult<Self> {
        Ok(Self {
            poll: Some(Poll::new().map_err(|e| native("poll_create", e))?),
            events: Events::with_capacity(max_events.max(1)),
        })
    }

    pub fn register(&mut self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        let poll = self.poll.as_ref().ok_or_else(|| closed("register"))?;
        let fd = socket.raw();
        poll.registry()
            .register(&mut SourceFd(&fd), Token(token), mio_interest(interest))
            .map_err(|e| native("register", e))
    }

    pub fn reregister(&mut self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        let poll = self.poll.as_ref().ok_or_else(|| closed("reregister"))?;
        let fd = socket.raw();
        poll.registry()
            .reregister(&mut SourceFd(&fd), Token(token), mio_interest(interest))
            .map_err(|e| native("reregister", e))
    }

    pub fn deregister(&mut self, socket: Socket) -> NativeResult<()> {
        let poll = self.poll.as_ref().ok_or_else(|| closed("deregister"))?;
        let fd = socket.raw();
        poll.registry()
            .deregister(&mut SourceFd(&fd))
            .map_err(|e| native("deregister", e))
    }

    /// mio is edge-triggered on most platforms; the looper drains every ready
    /// socket until it would block, which keeps the observable behavior level.
    pub fn wait(&mut self, events: &mut Vec<Event>, timeout: Duration) -> NativeResult<usize> {
        events.clear();
        let poll = self.poll.as_mut().ok_or_else(|| closed("poll"))?;
        match poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(native("poll", e)),
        }
        for ev in self.events.iter() {
            events.push(Event {
                token: ev.token().0,
                readable: ev.is_readable(),
                writable: ev.is_writable(),
                hangup: ev.is_error() || ev.is_read_closed() || ev.is_write_closed(),
            });
        }
        Ok(events.len())
    }

    /// Idempotent.
    pub fn close(&mut self) {
        self.poll = None;
    }
}
