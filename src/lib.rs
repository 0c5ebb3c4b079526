#![deny(unsafe_op_in_unsafe_fn)]

//! Non-blocking network reactor.
//!
//! Poller threads ([`looper`]) wait on the OS event queue ([`mux`]) and drive
//! every connection through its handshake ([`Sentry`]) into steady state
//! ([`Protocol`]). Inbound bytes are decoded by a [`Codec`] and dispatched to a
//! [`Pipeline`] of handlers; outbound messages are encoded and written by
//! separate writer threads ([`writer`]) under watermark backpressure.

pub mod affinity;
pub mod backpressure;
pub mod buffer;
pub mod buffer_pool;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod loc;
pub mod looper;
pub mod mux;
pub mod pipeline;
pub mod raw; // OS-level socket calls (unix/windows)
pub mod reactor;
pub mod sentry;
pub mod socket;
pub mod writer;

/// Convenience re-exports
pub use buffer::{ReadBuffer, SearchStrategy, WriteBuffer};
pub use channel::Channel;
pub use codec::{BytesCodec, Codec, DecodeStep, Decoder, Encoder};
pub use config::NetConfig;
pub use error::{Error, ErrorKind, NativeError, Result};
pub use loc::Loc;
pub use pipeline::{Handler, Pipeline, ReactorEvent};
pub use reactor::{Reactor, ReactorBuilder, ReactorHandle};
pub use sentry::{Protocol, Provider, Sentry, Signal, TcpProvider};
pub use socket::Socket;
