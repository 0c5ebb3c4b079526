//! epoll back-end (Linux, Android)

use std::time::Duration;

use super::{Event, Interest};
use crate::error::NativeError;
use crate::raw::NativeResult;
use crate::socket::Socket;

#[derive(Debug)]
pub struct Mux {
    epfd: libc::c_int,
    buffer: Vec<libc::epoll_event>,
}

fn flags(interest: Interest) -> u32 {
    let mut bits = libc::EPOLLRDHUP as u32;
    if interest.is_readable() {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

impl Mux {
    pub fn new(max_events: usize) -> NativeResult<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(NativeError::last("epoll_create1"));
        }
        let empty = libc::epoll_event { events: 0, u64: 0 };
        Ok(Self {
            epfd,
            buffer: vec![empty; max_events.max(1)],
        })
    }

    fn ctl(&self, op: libc::c_int, socket: Socket, token: usize, interest: Option<Interest>) -> NativeResult<()> {
        let mut ev = libc::epoll_event {
            events: interest.map(flags).unwrap_or(0),
            u64: token as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, socket.raw(), &mut ev) };
        if rc < 0 {
            return Err(NativeError::last("epoll_ctl"));
        }
        Ok(())
    }

    pub fn register(&mut self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, socket, token, Some(interest))
    }

    pub fn reregister(&mut self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, socket, token, Some(interest))
    }

    pub fn deregister(&mut self, socket: Socket) -> NativeResult<()> {
        self.ctl(libc::EPOLL_CTL_DEL, socket, 0, None)
    }

    /// Waits up to `timeout`; `events` is cleared first. An interrupted wait
    /// reports zero events.
    pub fn wait(&mut self, events: &mut Vec<Event>, timeout: Duration) -> NativeResult<usize> {
        events.clear();
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.buffer.as_mut_ptr(),
                self.buffer.len() as libc::c_int,
                millis,
            )
        };
        if n < 0 {
            let err = NativeError::last("epoll_wait");
            return if err.code == libc::EINTR { Ok(0) } else { Err(err) };
        }
        for ev in &self.buffer[..n as usize] {
            let bits = ev.events;
            events.push(Event {
                token: ev.u64 as usize,
                readable: bits & (libc::EPOLLIN as u32) != 0,
                writable: bits & (libc::EPOLLOUT as u32) != 0,
                hangup: bits & ((libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) as u32) != 0,
            });
        }
        Ok(events.len())
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if self.epfd >= 0 {
            unsafe { libc::close(self.epfd) };
            self.epfd = -1;
        }
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        self.close();
    }
}
