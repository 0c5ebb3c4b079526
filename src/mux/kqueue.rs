//! kqueue back-end (macOS, iOS, BSD)
//!
//! kqueue tracks read and write readiness as separate filters, so a change of
//! interest is an add of the wanted filters plus a delete of the others.

use std::time::Duration;

use super::{Event, Interest};
use crate::error::NativeError;
use crate::raw::NativeResult;
use crate::socket::Socket;

#[derive(Debug)]
pub struct Mux {
    kq: libc::c_int,
    buffer: Vec<libc::kevent>,
}

// `udata` only ever carries a token, never a pointer.
unsafe impl Send for Mux {}

fn change(socket: Socket, filter: i64, flags: u32, token: usize) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = socket.raw() as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev.udata = token as _;
    ev
}

impl Mux {
    pub fn new(max_events: usize) -> NativeResult<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(NativeError::last("kqueue"));
        }
        unsafe { libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC) };
        Ok(Self {
            kq,
            buffer: vec![unsafe { std::mem::zeroed() }; max_events.max(1)],
        })
    }

    fn apply(&self, ev: libc::kevent, tolerate_missing: bool) -> NativeResult<()> {
        let rc = unsafe {
            libc::kevent(self.kq, &ev, 1, std::ptr::null_mut(), 0, std::ptr::null())
        };
        if rc < 0 {
            let err = NativeError::last("kevent");
            if !(tolerate_missing && err.code == libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn set(&self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        let read = libc::EVFILT_READ as i64;
        let write = libc::EVFILT_WRITE as i64;
        let add = (libc::EV_ADD | libc::EV_ENABLE) as u32;
        let delete = libc::EV_DELETE as u32;

        if interest.is_readable() {
            self.apply(change(socket, read, add, token), false)?;
        } else {
            self.apply(change(socket, read, delete, token), true)?;
        }
        if interest.is_writable() {
            self.apply(change(socket, write, add, token), false)?;
        } else {
            self.apply(change(socket, write, delete, token), true)?;
        }
        Ok(())
    }

    pub fn register(&mut self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        self.set(socket, token, interest)
    }

    pub fn reregister(&mut self, socket: Socket, token: usize, interest: Interest) -> NativeResult<()> {
        self.set(socket, token, interest)
    }

    pub fn deregister(&mut self, socket: Socket) -> NativeResult<()> {
        let delete = libc::EV_DELETE as u32;
        self.apply(change(socket, libc::EVFILT_READ as i64, delete, 0), true)?;
        self.apply(change(socket, libc::EVFILT_WRITE as i64, delete, 0), true)
    }

    /// Waits up to `timeout`; `events` is cleared first. Read and write
    /// readiness of one socket arrive as two separate events.
    pub fn wait(&mut self, events: &mut Vec<Event>, timeout: Duration) -> NativeResult<usize> {
        events.clear();
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as _,
        };
        let n = unsafe {
            libc::kevent(
                self.kq,
                std::ptr::null(),
                0,
                self.buffer.as_mut_ptr(),
                self.buffer.len() as _,
                &ts,
            )
        };
        if n < 0 {
            let err = NativeError::last("kevent");
            return if err.code == libc::EINTR { Ok(0) } else { Err(err) };
        }
        for ev in &self.buffer[..n as usize] {
            let filter = ev.filter as i64;
            let flags = ev.flags as u32;
            events.push(Event {
                token: ev.udata as usize,
                readable: filter == libc::EVFILT_READ as i64,
                writable: filter == libc::EVFILT_WRITE as i64,
                hangup: flags & ((libc::EV_EOF | libc::EV_ERROR) as u32) != 0,
            });
        }
        Ok(events.len())
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if self.kq >= 0 {
            unsafe { libc::close(self.kq) };
            self.kq = -1;
        }
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        self.close();
    }
}
