//! Ordered handler dispatch
//!
//! Handlers run synchronously on the looper thread that owns the channel, in
//! registration order. A decoded message travels down the chain until a
//! handler consumes it.

use std::sync::Arc;

use log::trace;

use crate::channel::Channel;
use crate::codec::Codec;

/// Reactor-level notifications.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReactorEvent {
    /// A looper entered its event loop; carries the looper index.
    LooperStarted(usize),
    /// A looper left its event loop and released its channels.
    LooperStopped(usize),
}

pub trait Handler<C: Codec>: Send + Sync + 'static {
    /// The connection finished its handshake.
    fn on_connected(&self, _channel: &Arc<Channel<C>>) {}

    /// Return `Some` to pass the message to the next handler.
    fn on_recv(&self, _channel: &Arc<Channel<C>>, msg: C::Inbound) -> Option<C::Inbound> {
        Some(msg)
    }

    /// Fired once per connection, after the last `on_recv`.
    fn on_close(&self, _channel: &Arc<Channel<C>>) {}

    /// Queued bytes crossed a watermark.
    fn on_writability(&self, _channel: &Arc<Channel<C>>, _writable: bool) {}

    fn on_event(&self, _event: &ReactorEvent) {}
}

pub struct Pipeline<C: Codec> {
    handlers: Vec<Box<dyn Handler<C>>>,
}

impl<C: Codec> Default for Pipeline<C> {
    fn default() -> Self {
        Self { handlers: Vec::new() }
    }
}

impl<C: Codec> Pipeline<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handler: impl Handler<C>) {
        self.handlers.push(Box::new(handler));
    }

    pub fn add_boxed(&mut self, handler: Box<dyn Handler<C>>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn fire_connected(&self, channel: &Arc<Channel<C>>) {
        for h in &self.handlers {
            h.on_connected(channel);
        }
    }

    pub fn fire_recv(&self, channel: &Arc<Channel<C>>, msg: C::Inbound) {
        let mut msg = msg;
        for h in &self.handlers {
            match h.on_recv(channel, msg) {
                Some(next) => msg = next,
                None => return,
            }
        }
        trace!("message on channel {} reached the end of the pipeline", channel.id());
    }

    pub fn fire_close(&self, channel: &Arc<Channel<C>>) {
        for h in &self.handlers {
            h.on_close(channel);
        }
    }

    pub fn fire_writability(&self, channel: &Arc<Channel<C>>, writable: bool) {
        for h in &self.handlers {
            h.on_writability(channel, writable);
        }
    }

    pub fn fire_event(&self, event: ReactorEvent) {
        for h in &self.handlers {
            h.on_event(&event);
        }
    }
}
