//! Placeholder for targets without any event queue.

use std::time::Duration;

use super::{Event, Interest};
use crate::error::NativeError;
use crate::raw::NativeResult;
use crate::socket::Socket;

#[derive(Debug)]
pub struct Mux;

fn unsupported(op: &'static str) -> NativeError {
    NativeError::new(op, -1)
}

impl Mux {
    pub fn new(_max_events: usize) -> NativeResult<Self> {
        Err(unsupported("mux_create"))
    }

    pub fn register(&mut self, _socket: Socket, _token: usize, _interest: Interest) -> NativeResult<()> {
        Err(unsupported("register"))
    }

    pub fn reregister(&mut self, _socket: Socket, _token: usize, _interest: Interest) -> NativeResult<()> {
        Err(unsupported("reregister"))
    }

    pub fn deregister(&mut self, _socket: Socket) -> NativeResult<()> {
        Err(unsupported("deregister"))
    }

    pub fn wait(&mut self, events: &mut Vec<Event>, _timeout: Duration) -> NativeResult<usize> {
        events.clear();
        Err(unsupported("wait"))
    }

    pub fn close(&mut self) {}
}
