//! Poller threads
//!
//! A [`Looper`] owns one event queue, optionally the listening socket, and a
//! partition of the connections. Everything that touches its event queue runs
//! on its thread: other threads talk to it through [`LooperCommand`]s, which
//! are drained after every `wait`.
//!
//! Lifecycle:
//!
//! ```text
//! create -> socket -> bind -> listen -> ctl -> run -> release
//! Created            SocketBound  Listening   Running   Stopped
//! ```
//!
//! A looper without a listener (it only serves connections handed over by
//! its peers) goes straight from `Created` to `run`.

use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, trace, warn};
use slab::Slab;

use crate::buffer::ReadBuffer;
use crate::channel::{Channel, SharedCell};
use crate::codec::{Codec, Decoder};
use crate::config::{self, NetConfig};
use crate::error::{Error, Result};
use crate::loc::Loc;
use crate::mux::{Event, Interest, Mux};
use crate::pipeline::{Pipeline, ReactorEvent};
use crate::raw::{self, Accepted, Domain, Transfer};
use crate::sentry::{Protocol, Provider, Sentry, Signal};
use crate::socket::Socket;
use crate::writer::WriterTask;

/// Token of the listening socket; never a slab key.
pub const LISTENER_TOKEN: usize = usize::MAX;

/// How long the listener stays out of the event queue after `accept` fails.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Requests delivered to a looper from other threads.
///
/// Channel-scoped commands carry both the slab token and the channel id, so a
/// command that arrives after its slot was reused is ignored.
#[derive(Debug)]
pub enum LooperCommand {
    /// Take ownership of an accepted or connecting socket.
    Adopt { socket: Socket, loc: Loc },
    /// The writer hit would-block; add write interest.
    WantWrite { token: usize, id: u64 },
    /// Queued bytes crossed a watermark.
    Writability { token: usize, id: u64, writable: bool },
    /// The channel was claimed closed by another thread.
    Close { token: usize, id: u64 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LooperState {
    Created,
    SocketBound,
    Listening,
    Running,
    Stopped,
}

/// Everything the loopers of one reactor share.
pub struct LooperContext<C: Codec> {
    pub cfg: Arc<NetConfig>,
    pub codec: Arc<C>,
    pub provider: Arc<dyn Provider>,
    pub pipeline: Arc<Pipeline<C>>,
    /// Writer task queues; channel `id` is served by `writers[id % len]`.
    pub writers: Vec<Sender<WriterTask<C>>>,
    /// Command queues of every looper, indexed by looper.
    pub peers: Vec<Sender<LooperCommand>>,
    pub ids: Arc<AtomicU64>,
    pub stop: Arc<AtomicBool>,
}

impl<C: Codec> Clone for LooperContext<C> {
    fn clone(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            codec: self.codec.clone(),
            provider: self.provider.clone(),
            pipeline: self.pipeline.clone(),
            writers: self.writers.clone(),
            peers: self.peers.clone(),
            ids: self.ids.clone(),
            stop: self.stop.clone(),
        }
    }
}

impl<C: Codec> LooperContext<C> {
    fn writer_for(&self, id: u64) -> &Sender<WriterTask<C>> {
        &self.writers[(id % self.writers.len() as u64) as usize]
    }
}

/// Post-upgrade state of a connection.
struct Stream<C: Codec> {
    channel: Arc<Channel<C>>,
    protocol: Arc<dyn Protocol>,
    decoder: C::Decoder,
    inbound: BytesMut,
}

enum Phase<C: Codec> {
    Sentry(Box<dyn Sentry>),
    Protocol(Box<Stream<C>>),
    /// Transient, only while upgrading.
    Closed,
}

struct Connection<C: Codec> {
    id: u64,
    socket: Socket,
    loc: Loc,
    phase: Phase<C>,
}

pub struct Looper<C: Codec> {
    index: usize,
    state: LooperState,
    ctx: LooperContext<C>,
    inbox: Receiver<LooperCommand>,
    mux: Mux,
    listener: Option<Socket>,
    listener_registered: bool,
    /// Set while accepting is paused after an error.
    accept_resume: Option<Instant>,
    local_addr: Option<SocketAddr>,
    events: Vec<Event>,
    scratch: Vec<u8>,
    connections: Slab<Connection<C>>,
    next_peer: usize,
    released: bool,
}

impl<C: Codec> fmt::Debug for Looper<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("listener", &self.listener)
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl<C: Codec> Looper<C> {
    /// Allocates the event queue.
    pub fn create(index: usize, ctx: LooperContext<C>, inbox: Receiver<LooperCommand>) -> Result<Self> {
        let mux = Mux::new(ctx.cfg.max_events)?;
        let segment = ctx.cfg.segment_size;
        Ok(Self {
            index,
            state: LooperState::Created,
            ctx,
            inbox,
            mux,
            listener: None,
            listener_registered: false,
            accept_resume: None,
            local_addr: None,
            events: Vec::new(),
            scratch: vec![0u8; segment],
            connections: Slab::new(),
            next_peer: index,
            released: false,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> LooperState {
        self.state
    }

    /// Bound address of the listener, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn expect_state(&self, want: LooperState, step: &str) -> Result<()> {
        if self.state != want {
            return Err(Error::config(format!(
                "looper {}: {} requires state {:?}, found {:?}",
                self.index, step, want, self.state
            )));
        }
        Ok(())
    }

    /// Creates the listening socket.
    pub fn socket(&mut self) -> Result<()> {
        self.expect_state(LooperState::Created, "socket")?;
        if self.listener.is_some() {
            return Err(Error::config(format!("looper {}: listener already created", self.index)));
        }
        let addr = self.ctx.cfg.loc()?.to_socket_addr()?;
        let listener = raw::socket(Domain::of(&addr))?;
        if let Err(e) = config::apply_listener_options(listener, &self.ctx.cfg) {
            let _ = raw::close(listener);
            return Err(e);
        }
        self.listener = Some(listener);
        Ok(())
    }

    pub fn bind(&mut self) -> Result<()> {
        self.expect_state(LooperState::Created, "bind")?;
        let listener = self.require_listener("bind")?;
        let addr = self.ctx.cfg.loc()?.to_socket_addr()?;
        raw::bind(listener, &addr)?;
        self.local_addr = Some(raw::local_addr(listener)?);
        self.state = LooperState::SocketBound;
        Ok(())
    }

    pub fn listen(&mut self) -> Result<()> {
        self.expect_state(LooperState::SocketBound, "listen")?;
        let listener = self.require_listener("listen")?;
        raw::listen(listener, self.ctx.cfg.backlog)?;
        self.state = LooperState::Listening;
        info!(
            "looper {} listening on {}",
            self.index,
            self.local_addr.map(Loc::from).map(|l| l.to_string()).unwrap_or_default()
        );
        Ok(())
    }

    /// Registers the listener for readable events.
    pub fn ctl(&mut self) -> Result<()> {
        self.expect_state(LooperState::Listening, "ctl")?;
        let listener = self.require_listener("ctl")?;
        if !self.listener_registered {
            self.mux.register(listener, LISTENER_TOKEN, Interest::READ)?;
            self.listener_registered = true;
        }
        Ok(())
    }

    fn require_listener(&self, step: &str) -> Result<Socket> {
        self.listener
            .ok_or_else(|| Error::config(format!("looper {}: {} before socket", self.index, step)))
    }

    /// Runs the event loop until the stop flag is set, then releases
    /// everything the looper owns.
    pub fn run(&mut self) -> Result<()> {
        match self.state {
            LooperState::Listening if self.listener_registered => {}
            LooperState::Created if self.listener.is_none() => {}
            _ => {
                return Err(Error::config(format!(
                    "looper {}: run in state {:?}",
                    self.index, self.state
                )))
            }
        }
        self.state = LooperState::Running;
        self.ctx.pipeline.fire_event(ReactorEvent::LooperStarted(self.index));
        debug!("looper {} running", self.index);

        let timeout = Duration::from_millis(self.ctx.cfg.mux_timeout_ms);
        let mut result = Ok(());
        while !self.ctx.stop.load(Ordering::Acquire) {
            if let Err(e) = self.poll_once(timeout) {
                error!("looper {} failed: {}", self.index, e);
                result = Err(e);
                break;
            }
        }

        self.release();
        self.ctx.pipeline.fire_event(ReactorEvent::LooperStopped(self.index));
        debug!("looper {} stopped", self.index);
        result
    }

    /// One `wait`, its events, then the command queue.
    fn poll_once(&mut self, timeout: Duration) -> Result<()> {
        self.resume_accept(Instant::now());
        let mut events = mem::take(&mut self.events);
        let waited = self.mux.wait(&mut events, timeout);
        if waited.is_ok() {
            for ev in &events {
                self.dispatch(*ev);
            }
        }
        self.events = events;
        waited?;
        while let Ok(cmd) = self.inbox.try_recv() {
            self.command(cmd);
        }
        Ok(())
    }

    fn dispatch(&mut self, ev: Event) {
        if ev.token == LISTENER_TOKEN {
            self.accept_all();
            return;
        }
        match self.connections.get(ev.token).map(|c| &c.phase) {
            Some(Phase::Sentry(_)) => self.sentry_event(ev),
            Some(Phase::Protocol(_)) => self.protocol_event(ev),
            _ => trace!("looper {}: event for free token {}", self.index, ev.token),
        }
    }

    fn accept_all(&mut self) {
        let Some(listener) = self.listener else { return };
        loop {
            match raw::accept(listener) {
                Ok(Accepted::Socket(socket, addr)) => {
                    let loc = Loc::from(addr);
                    if let Err(e) = config::apply_socket_options(socket, &self.ctx.cfg) {
                        warn!("rejecting {}: {}", loc, e);
                        let _ = raw::close(socket);
                        continue;
                    }
                    debug!("looper {} accepted {}", self.index, loc);
                    self.hand_off(socket, loc);
                }
                Ok(Accepted::WouldBlock) => break,
                Err(e) => {
                    error!("looper {}: accept failed: {}", self.index, e);
                    self.pause_accept(Instant::now());
                    break;
                }
            }
        }
    }

    /// Takes the listener out of the event queue. A persistent failure such
    /// as EMFILE leaves the backlog readable, which would otherwise wake
    /// every `wait`.
    fn pause_accept(&mut self, now: Instant) {
        let Some(listener) = self.listener else { return };
        if self.listener_registered {
            if let Err(e) = self.mux.deregister(listener) {
                warn!("looper {}: pausing accept failed: {}", self.index, e);
                return;
            }
            self.listener_registered = false;
        }
        self.accept_resume = Some(now + ACCEPT_BACKOFF);
    }

    fn resume_accept(&mut self, now: Instant) {
        let (Some(listener), Some(at)) = (self.listener, self.accept_resume) else { return };
        if now < at {
            return;
        }
        match self.mux.register(listener, LISTENER_TOKEN, Interest::READ) {
            Ok(()) => {
                debug!("looper {}: accepting again", self.index);
                self.listener_registered = true;
                self.accept_resume = None;
            }
            Err(e) => {
                warn!("looper {}: resuming accept failed: {}", self.index, e);
                self.accept_resume = Some(now + ACCEPT_BACKOFF);
            }
        }
    }

    /// Round-robin over all loopers, this one included.
    fn hand_off(&mut self, socket: Socket, loc: Loc) {
        let target = self.next_peer % self.ctx.peers.len();
        self.next_peer = self.next_peer.wrapping_add(1);
        if target == self.index {
            self.adopt(socket, loc);
            return;
        }
        if let Err(e) = self.ctx.peers[target].send(LooperCommand::Adopt { socket, loc }) {
            // the peer already stopped
            if let LooperCommand::Adopt { socket, loc } = e.into_inner() {
                self.adopt(socket, loc);
            }
        }
    }

    fn adopt(&mut self, socket: Socket, loc: Loc) {
        let sentry = match self.ctx.provider.create(socket, &loc) {
            Ok(sentry) => sentry,
            Err(e) => {
                warn!("provider refused {}: {}", loc, e);
                let _ = raw::close(socket);
                return;
            }
        };
        let id = self.ctx.ids.fetch_add(1, Ordering::Relaxed);
        let entry = self.connections.vacant_entry();
        let token = entry.key();
        if let Err(e) = self.mux.register(socket, token, Interest::WRITE) {
            warn!("registering {} failed: {}", loc, e);
            sentry.close();
            return;
        }
        trace!("looper {}: {} is channel {} at token {}", self.index, loc, id, token);
        entry.insert(Connection {
            id,
            socket,
            loc,
            phase: Phase::Sentry(sentry),
        });
    }

    fn sentry_event(&mut self, ev: Event) {
        let token = ev.token;
        let Some(conn) = self.connections.get_mut(token) else { return };
        let Phase::Sentry(sentry) = &mut conn.phase else { return };
        let outcome = if ev.writable || ev.hangup {
            sentry.on_writable()
        } else if ev.readable {
            sentry.on_readable(&mut self.scratch)
        } else {
            Ok(Signal::Idle)
        };
        match outcome {
            Ok(Signal::Idle) => {}
            Ok(Signal::WantRead) => self.set_interest(token, Interest::READ),
            Ok(Signal::WantWrite) => self.set_interest(token, Interest::WRITE),
            Ok(Signal::Upgrade) => self.upgrade(token),
            Ok(Signal::Close) => self.teardown(token),
            Err(e) => {
                warn!("handshake with {} failed: {}", conn.loc, e);
                self.teardown(token);
            }
        }
    }

    fn set_interest(&mut self, token: usize, interest: Interest) {
        let Some(conn) = self.connections.get(token) else { return };
        if let Err(e) = self.mux.reregister(conn.socket, token, interest) {
            warn!("reregistering {} failed: {}", conn.loc, e);
            self.close_channel(token);
        }
    }

    /// Replaces the sentry with its protocol and binds the channel to a
    /// writer. The sentry is consumed here.
    fn upgrade(&mut self, token: usize) {
        let Some(conn) = self.connections.get_mut(token) else { return };
        let Phase::Sentry(sentry) = mem::replace(&mut conn.phase, Phase::Closed) else { return };
        let protocol: Arc<dyn Protocol> = Arc::from(sentry.into_protocol());
        let shared = Arc::new(SharedCell::new());
        let writer = self.ctx.writer_for(conn.id);
        let channel = Arc::new(Channel::new(
            conn.id,
            token,
            conn.loc.clone(),
            conn.socket,
            shared.clone(),
            writer.clone(),
            self.ctx.peers[self.index].clone(),
            Duration::from_millis(self.ctx.cfg.shutdown_timeout_ms),
        ));
        conn.phase = Phase::Protocol(Box::new(Stream {
            channel: channel.clone(),
            protocol: protocol.clone(),
            decoder: self.ctx.codec.decoder(),
            inbound: BytesMut::new(),
        }));
        debug!("channel {} with {} upgraded", conn.id, conn.loc);

        let bound = writer
            .send(WriterTask::Bind {
                id: conn.id,
                token,
                protocol,
                shared,
                looper: self.ctx.peers[self.index].clone(),
            })
            .is_ok();
        if !bound {
            error!("writer of channel {} is gone", conn.id);
            self.close_channel(token);
            return;
        }
        if let Err(e) = self.mux.reregister(conn.socket, token, Interest::READ) {
            warn!("reregistering {} failed: {}", conn.loc, e);
            self.close_channel(token);
            return;
        }
        self.ctx.pipeline.fire_connected(&channel);
    }

    fn protocol_event(&mut self, ev: Event) {
        let token = ev.token;
        if ev.writable {
            let Some(conn) = self.connections.get(token) else { return };
            let Phase::Protocol(stream) = &conn.phase else { return };
            let (id, socket) = (conn.id, conn.socket);
            let signal = stream.protocol.on_writable();
            if let Err(e) = self.mux.reregister(socket, token, Interest::READ) {
                warn!("reregistering channel {} failed: {}", id, e);
                self.close_channel(token);
                return;
            }
            match signal {
                Ok(Signal::Close) => {
                    self.close_channel(token);
                    return;
                }
                Err(e) => {
                    warn!("channel {} failed on writable: {}", id, e);
                    self.close_channel(token);
                    return;
                }
                Ok(_) => {
                    let _ = self.ctx.writer_for(id).send(WriterTask::Writable(id));
                }
            }
        }
        if ev.readable || ev.hangup {
            self.read_stream(token);
        }
    }

    /// Reads until would-block, decoding after every chunk.
    fn read_stream(&mut self, token: usize) {
        let Some(conn) = self.connections.get_mut(token) else { return };
        let Phase::Protocol(stream) = &mut conn.phase else { return };
        let pipeline = &self.ctx.pipeline;
        loop {
            match stream.protocol.on_readable(&mut self.scratch) {
                Ok(Transfer::Bytes(n)) => {
                    stream.inbound.extend_from_slice(&self.scratch[..n]);
                    if let Err(e) = decode_inbound(stream, pipeline) {
                        warn!("channel {} from {}: {}", conn.id, conn.loc, e);
                        break;
                    }
                    if stream.channel.is_closed() {
                        return;
                    }
                }
                Ok(Transfer::WouldBlock) => return,
                Ok(Transfer::Closed) => {
                    debug!("channel {}: {} closed the connection", conn.id, conn.loc);
                    break;
                }
                Err(e) => {
                    warn!("channel {} read from {} failed: {}", conn.id, conn.loc, e);
                    break;
                }
            }
        }
        self.close_channel(token);
    }

    fn command(&mut self, cmd: LooperCommand) {
        match cmd {
            LooperCommand::Adopt { socket, loc } => self.adopt(socket, loc),
            LooperCommand::WantWrite { token, id } => {
                if self.live(token, id).is_some() {
                    trace!("channel {} waits for writable", id);
                    self.set_interest(token, Interest::READ_WRITE);
                }
            }
            LooperCommand::Writability { token, id, writable } => {
                if let Some(Phase::Protocol(stream)) = self.live(token, id).map(|c| &c.phase) {
                    self.ctx.pipeline.fire_writability(&stream.channel, writable);
                }
            }
            LooperCommand::Close { token, id } => {
                if self.live(token, id).is_some() {
                    self.close_channel(token);
                }
            }
        }
    }

    /// The connection at `token`, if it still belongs to channel `id`.
    fn live(&self, token: usize, id: u64) -> Option<&Connection<C>> {
        self.connections.get(token).filter(|c| c.id == id)
    }

    /// Closes a connection detected dead on this thread. The writer is told
    /// only if this call claimed the close.
    fn close_channel(&mut self, token: usize) {
        let Some(conn) = self.connections.get(token) else { return };
        if let Phase::Protocol(stream) = &conn.phase {
            let shared = stream.channel.shared();
            if shared.claim_close() {
                let writer = self.ctx.writer_for(conn.id);
                if writer.send(WriterTask::Close(conn.id)).is_err() {
                    // nobody left to release the writer's hold
                    shared.release_and_close(&*stream.protocol);
                }
            }
        }
        self.teardown(token);
    }

    /// Removes the connection, fires `on_close` and drops this thread's hold
    /// on the socket.
    fn teardown(&mut self, token: usize) {
        if !self.connections.contains(token) {
            return;
        }
        let conn = self.connections.remove(token);
        if let Err(e) = self.mux.deregister(conn.socket) {
            trace!("deregistering {} failed: {}", conn.loc, e);
        }
        match conn.phase {
            Phase::Sentry(sentry) => {
                debug!("abandoning handshake with {}", conn.loc);
                sentry.close();
            }
            Phase::Protocol(stream) => {
                debug!("channel {} with {} closed", conn.id, conn.loc);
                self.ctx.pipeline.fire_close(&stream.channel);
                stream.channel.shared().release_and_close(&*stream.protocol);
            }
            Phase::Closed => {}
        }
    }

    /// Closes every connection, the listener and the event queue. Open
    /// channels go through a graceful shutdown on their writer, which gets
    /// `shutdown_timeout_ms` to flush what is queued. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        while let Ok(cmd) = self.inbox.try_recv() {
            if let LooperCommand::Adopt { socket, .. } = cmd {
                let _ = raw::close(socket);
            }
        }

        let tokens: Vec<usize> = self.connections.iter().map(|(token, _)| token).collect();
        // writers keep flushing queued bytes until this deadline
        let deadline = Instant::now() + Duration::from_millis(self.ctx.cfg.shutdown_timeout_ms);
        for token in tokens {
            if let Some(Phase::Protocol(stream)) = self.connections.get(token).map(|c| &c.phase) {
                let shared = stream.channel.shared();
                let id = stream.channel.id();
                if shared.claim_close() {
                    let writer = self.ctx.writer_for(id);
                    if writer.send(WriterTask::Shutdown(id, deadline)).is_err() {
                        shared.release_and_close(&*stream.protocol);
                    }
                }
            }
            self.teardown(token);
        }

        if let Some(listener) = self.listener.take() {
            if self.listener_registered {
                let _ = self.mux.deregister(listener);
                self.listener_registered = false;
            }
            if let Err(e) = raw::close(listener) {
                warn!("looper {}: closing listener failed: {}", self.index, e);
            }
        }
        self.mux.close();
        self.state = LooperState::Stopped;
    }
}

impl<C: Codec> Drop for Looper<C> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decodes every complete message in `inbound` and dispatches it. Stops early
/// once the channel is closed so nothing is delivered after a close.
fn decode_inbound<C: Codec>(stream: &mut Stream<C>, pipeline: &Pipeline<C>) -> Result<()> {
    while !stream.inbound.is_empty() && !stream.channel.is_closed() {
        let mut buf = ReadBuffer::new(&stream.inbound);
        let decoded = stream.decoder.decode(&mut buf)?;
        let consumed = buf.read_index();
        stream.inbound.advance(consumed);
        match decoded {
            Some(msg) => pipeline.fire_recv(&stream.channel, msg),
            None => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::codec::BytesCodec;
    use crate::error::ErrorKind;
    use crate::pipeline::Handler;
    use crate::sentry::TcpProvider;
    use crate::writer::Writer;
    use bytes::Bytes;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    fn free_port() -> u16 {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    struct Echo;

    impl Handler<BytesCodec> for Echo {
        fn on_recv(&self, channel: &Arc<Channel<BytesCodec>>, msg: Bytes) -> Option<Bytes> {
            channel.send(msg).unwrap();
            None
        }
    }

    fn context(cfg: NetConfig) -> (LooperContext<BytesCodec>, Receiver<LooperCommand>, Receiver<WriterTask<BytesCodec>>) {
        let (ltx, lrx) = crossbeam_channel::unbounded();
        let (wtx, wrx) = crossbeam_channel::unbounded();
        let mut pipeline = Pipeline::new();
        pipeline.add(Echo);
        let ctx = LooperContext {
            cfg: Arc::new(cfg),
            codec: Arc::new(BytesCodec),
            provider: Arc::new(TcpProvider),
            pipeline: Arc::new(pipeline),
            writers: vec![wtx],
            peers: vec![ltx],
            ids: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
        };
        (ctx, lrx, wrx)
    }

    #[test]
    fn test_steps_out_of_order_are_config_errors() {
        let (ctx, inbox, _w) = context(NetConfig { port: free_port(), ..Default::default() });
        let mut looper = Looper::create(0, ctx, inbox).unwrap();
        assert_eq!(looper.state(), LooperState::Created);
        assert_eq!(looper.bind().unwrap_err().kind(), ErrorKind::Config);
        assert_eq!(looper.listen().unwrap_err().kind(), ErrorKind::Config);
        assert_eq!(looper.ctl().unwrap_err().kind(), ErrorKind::Config);

        looper.socket().unwrap();
        assert_eq!(looper.socket().unwrap_err().kind(), ErrorKind::Config);
        // a listener that was never bound cannot run
        assert_eq!(looper.run().unwrap_err().kind(), ErrorKind::Config);
        looper.bind().unwrap();
        assert_eq!(looper.state(), LooperState::SocketBound);
        looper.listen().unwrap();
        assert_eq!(looper.state(), LooperState::Listening);
        assert!(looper.local_addr().is_some());

        looper.release();
        looper.release();
        assert_eq!(looper.state(), LooperState::Stopped);
        assert_eq!(looper.socket().unwrap_err().kind(), ErrorKind::Config);
    }

    #[cfg(unix)]
    #[test]
    fn test_echo_over_loopback() {
        let _ = env_logger::builder().is_test(true).try_init();
        let port = free_port();
        let (ctx, inbox, wrx) = context(NetConfig { port, ..Default::default() });
        let stop = ctx.stop.clone();
        let writer_stop = Arc::new(AtomicBool::new(false));
        let mut writer = Writer::new(0, ctx.cfg.clone(), &BytesCodec, BufferPool::default(), wrx, writer_stop.clone());
        let writer = thread::spawn(move || writer.run());

        let mut looper = Looper::create(0, ctx, inbox).unwrap();
        looper.socket().unwrap();
        looper.bind().unwrap();
        looper.listen().unwrap();
        looper.ctl().unwrap();
        let looper = thread::spawn(move || looper.run());

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(b"ping").unwrap();
        let mut got = [0u8; 4];
        client.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"ping");

        stop.store(true, Ordering::Release);
        looper.join().unwrap().unwrap();
        writer_stop.store(true, Ordering::Release);
        writer.join().unwrap();

        // the reactor side is gone: the client sees EOF
        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_accept_failure_pauses_listener() {
        let (ctx, inbox, _w) = context(NetConfig { port: free_port(), ..Default::default() });
        let mut looper = Looper::create(0, ctx, inbox).unwrap();
        looper.socket().unwrap();
        looper.bind().unwrap();
        // bound but not listening: accept fails with EINVAL every time
        let listener = looper.listener.unwrap();
        looper.mux.register(listener, LISTENER_TOKEN, Interest::READ).unwrap();
        looper.listener_registered = true;

        looper.accept_all();
        assert!(!looper.listener_registered);
        let resume = looper.accept_resume.unwrap();

        looper.resume_accept(resume - Duration::from_millis(1));
        assert!(!looper.listener_registered);
        looper.resume_accept(resume);
        assert!(looper.listener_registered);
        assert!(looper.accept_resume.is_none());
        looper.release();
    }
}
