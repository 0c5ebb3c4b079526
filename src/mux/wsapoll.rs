//! Windows back-end
//!
//! Keeps an epoll-style interest set in user space and hands the whole set to
//! `WSAPoll` on every wait. Registration changes take effect on the next wait.

use std::collections::HashMap;
use std::time::Duration;

use windows_sys::Win32::Networking::WinSock::{
    WSAPoll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM, POLLWRNORM, SOCKET, SOCKET_ERROR, WSAEINTR,
    WSAPOLLFD,
};

use super::{Event, Interest};
use crate::error::NativeError;
use crate::raw::NativeResult;
use crate::socket::Socket;

// WSAENOTSOCK
const NOT_REGISTERED: i32 = 10038;

pub struct Mux {
    fds: Vec<WSAPOLLFD>,
    tokens: Vec<usize>,
    index: HashMap<u32, usize>,
    max_events: usize,
    closed: bool,
}

fn flags(interest: Interest) -> i16 {
    let mut bits = 0;
    if interest.is_readable() {
        bits |= POLLRDNORM;
    }
    if interest.is_writable() {
        bits |= POLLWRNORM;
    }
    bits as i16
}

impl Mux {
    pub fn new(max_events: usize) -> NativeResult<Self> {
        // WinSock must be started before WSAPoll; creating and closing
        // a throwaway socket goes through the lazy startup path.
        let warmup = crate::raw::socket(crate::raw::Domain::Ipv4)?;
        let _ = crate::raw::close(warmup);
        Ok(Self {
            fds: Vec::new(),
            tokens: Vec::new(),
            index: HashMap::new(),
            max_events: max_events.max(1),
            closed: false,
        })
    }

    pub fn register(&mut self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        if self.index.contains_key(&socket.key()) {
            return self.reregister(socket, token, interest);
        }
        self.index.insert(socket.key(), self.fds.len());
        self.fds.push(WSAPOLLFD {
            fd: socket.raw() as SOCKET,
            events: flags(interest),
            revents: 0,
        });
        self.tokens.push(token);
        Ok(())
    }

    pub fn reregister(&mut self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        let slot = *self
            .index
            .get(&socket.key())
            .ok_or(NativeError::new("reregister", NOT_REGISTERED))?;
        self.fds[slot].events = flags(interest);
        self.tokens[slot] = token;
        Ok(())
    }

    pub fn deregister(&mut self, socket: Socket) -> NativeResult<()> {
        let slot = self
            .index
            .remove(&socket.key())
            .ok_or(NativeError::new("deregister", NOT_REGISTERED))?;
        self.fds.swap_remove(slot);
        self.tokens.swap_remove(slot);
        if let Some(moved) = self.fds.get(slot) {
            self.index.insert(moved.fd as u32, slot);
        }
        Ok(())
    }

    pub fn wait(&mut self, events: &mut Vec<Event>, timeout: Duration) -> NativeResult<usize> {
        events.clear();
        if self.fds.is_empty() {
            // WSAPoll rejects an empty set
            std::thread::sleep(timeout);
            return Ok(0);
        }
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let n = unsafe { WSAPoll(self.fds.as_mut_ptr(), self.fds.len() as u32, millis) };
        if n == SOCKET_ERROR {
            let err = NativeError::last("WSAPoll");
            return if err.code == WSAEINTR { Ok(0) } else { Err(err) };
        }
        let hangup_bits = (POLLERR | POLLHUP | POLLNVAL) as i16;
        for (fd, &token) in self.fds.iter().zip(&self.tokens) {
            if events.len() == self.max_events {
                break;
            }
            let bits = fd.revents;
            if bits == 0 {
                continue;
            }
            events.push(Event {
                token,
                readable: bits & POLLRDNORM as i16 != 0,
                writable: bits & POLLWRNORM as i16 != 0,
                hangup: bits & hangup_bits != 0,
            });
        }
        Ok(events.len())
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.fds.clear();
            self.tokens.clear();
            self.index.clear();
            self.closed = true;
        }
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        self.close();
    }
}
