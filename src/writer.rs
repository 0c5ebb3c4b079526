//! Writer threads
//!
//! Each writer owns the outbound side of a partition of channels: it encodes
//! messages, keeps the per-channel queue of frozen buffers, performs
//! `do_write`/`do_shutdown`, and applies backpressure. Writes of one channel
//! happen strictly in enqueue order. Blocking on a full socket never reaches
//! the looper: the writer asks the looper for write readiness and carries on
//! with other channels.
//!
//! A send may carry a [`WriteCallback`]. It runs on the writer thread, with
//! `Ok` once the last byte of the message reached the socket, or with an
//! error when the message is dropped because the channel closed first.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};

use crate::backpressure::Backpressure;
use crate::buffer_pool::BufferPool;
use crate::channel::SharedCell;
use crate::codec::{Codec, Encoder};
use crate::config::NetConfig;
use crate::error::{Error, Result};
use crate::looper::LooperCommand;
use crate::raw::Transfer;
use crate::sentry::Protocol;

/// Period of the throttle and shutdown-deadline tick.
pub const TICK: Duration = Duration::from_millis(10);

/// Completion of one send, run on the writer thread.
pub type WriteCallback = Box<dyn FnOnce(Result<()>) + Send>;

pub enum WriterTask<C: Codec> {
    /// Hands a freshly upgraded channel to its writer.
    Bind {
        id: u64,
        token: usize,
        protocol: Arc<dyn Protocol>,
        shared: Arc<SharedCell>,
        looper: Sender<LooperCommand>,
    },
    Send(u64, C::Outbound, Option<WriteCallback>),
    SendMany(u64, Vec<C::Outbound>, Option<WriteCallback>),
    /// The socket became writable after a would-block.
    Writable(u64),
    /// Graceful close; force close at the deadline.
    Shutdown(u64, Instant),
    /// The channel was claimed closed elsewhere; release it.
    Close(u64),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Shutdown {
    Open,
    /// Flush, then shut down the write half.
    Requested(Instant),
    /// Write half is down; waiting for the peer to close.
    Sent(Instant),
}

/// One encoded send waiting for the socket.
struct Frame {
    bytes: Bytes,
    done: Option<WriteCallback>,
}

struct Outbound {
    id: u64,
    token: usize,
    protocol: Arc<dyn Protocol>,
    shared: Arc<SharedCell>,
    looper: Sender<LooperCommand>,
    queue: VecDeque<Frame>,
    queued: usize,
    backpressure: Backpressure,
    awaiting_writable: bool,
    shutdown: Shutdown,
}

/// Why a flush stopped.
enum Flush {
    Drained,
    Pending,
    Failed,
}

impl Outbound {
    fn notify_looper(&self, cmd: LooperCommand) {
        if self.looper.send(cmd).is_err() {
            trace!("looper of channel {} is gone", self.id);
        }
    }

    fn flush(&mut self, now: Instant) -> Flush {
        let mut result = Flush::Drained;
        while let Some(front) = self.queue.front_mut() {
            let allowed = self.backpressure.allowance(front.bytes.len(), now);
            if allowed == 0 {
                result = Flush::Pending;
                break;
            }
            match self.protocol.do_write(&front.bytes[..allowed]) {
                Ok(Transfer::Bytes(n)) => {
                    self.backpressure.refund(allowed - n);
                    front.bytes.advance(n);
                    self.queued -= n;
                    if front.bytes.is_empty() {
                        if let Some(done) = self.queue.pop_front().and_then(|f| f.done) {
                            done(Ok(()));
                        }
                    }
                }
                Ok(Transfer::WouldBlock) => {
                    self.backpressure.refund(allowed);
                    if !self.awaiting_writable {
                        // a claimed channel is no longer polled; the tick retries
                        let want = LooperCommand::WantWrite { token: self.token, id: self.id };
                        self.awaiting_writable = !self.shared.is_closing() && self.looper.send(want).is_ok();
                    }
                    result = Flush::Pending;
                    break;
                }
                Ok(Transfer::Closed) => {
                    debug!("channel {} peer stopped reading", self.id);
                    return Flush::Failed;
                }
                Err(e) => {
                    warn!("write on channel {} failed: {}", self.id, e);
                    return Flush::Failed;
                }
            }
        }
        self.publish(now);
        result
    }

    /// Fails the callbacks of everything still queued.
    fn drop_queue(&mut self) {
        for frame in self.queue.drain(..) {
            if let Some(done) = frame.done {
                done(Err(Error::ChannelClosed));
            }
        }
        self.queued = 0;
        self.shared.set_queued(0);
    }

    /// Publishes the queue size and reports a writability flip.
    fn publish(&mut self, now: Instant) {
        if let Some(writable) = self.backpressure.update(self.queued, &self.shared, now) {
            self.notify_looper(LooperCommand::Writability {
                token: self.token,
                id: self.id,
                writable,
            });
        }
    }
}

pub struct Writer<C: Codec> {
    index: usize,
    cfg: Arc<NetConfig>,
    encoder: C::Encoder,
    pool: BufferPool,
    channels: HashMap<u64, Outbound>,
    tasks: Receiver<WriterTask<C>>,
    stop: Arc<AtomicBool>,
}

impl<C: Codec> Writer<C> {
    pub fn new(
        index: usize,
        cfg: Arc<NetConfig>,
        codec: &C,
        pool: BufferPool,
        tasks: Receiver<WriterTask<C>>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            index,
            cfg,
            encoder: codec.encoder(),
            pool,
            channels: HashMap::new(),
            tasks,
            stop,
        }
    }

    /// Runs until the stop flag is set, the task queue is drained and no
    /// graceful shutdown is still flushing. Flushing channels get until their
    /// deadline.
    pub fn run(&mut self) {
        debug!("writer {} started", self.index);
        let mut connected = true;
        loop {
            if connected {
                match self.tasks.recv_timeout(TICK) {
                    Ok(task) => {
                        self.handle(task);
                        while let Ok(task) = self.tasks.try_recv() {
                            self.handle(task);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => connected = false,
                }
            } else {
                thread::sleep(TICK);
            }
            self.tick(Instant::now());
            let stopping = !connected || self.stop.load(Ordering::Acquire);
            if stopping && self.tasks.is_empty() && !self.flushing() {
                break;
            }
        }
        self.release_all();
        debug!("writer {} stopped", self.index);
    }

    fn handle(&mut self, task: WriterTask<C>) {
        let now = Instant::now();
        match task {
            WriterTask::Bind { id, token, protocol, shared, looper } => {
                let backpressure = Backpressure::new(
                    self.cfg.high_watermark,
                    self.cfg.low_watermark,
                    self.cfg.throttle_rate,
                    now,
                );
                self.channels.insert(
                    id,
                    Outbound {
                        id,
                        token,
                        protocol,
                        shared,
                        looper,
                        queue: VecDeque::new(),
                        queued: 0,
                        backpressure,
                        awaiting_writable: false,
                        shutdown: Shutdown::Open,
                    },
                );
            }
            WriterTask::Send(id, msg, done) => self.enqueue(id, std::slice::from_ref(&msg), done, now),
            WriterTask::SendMany(id, msgs, done) => self.enqueue(id, &msgs, done, now),
            WriterTask::Writable(id) => {
                if let Some(out) = self.channels.get_mut(&id) {
                    out.awaiting_writable = false;
                }
                self.flush(id, now);
            }
            WriterTask::Shutdown(id, deadline) => {
                if let Some(out) = self.channels.get_mut(&id) {
                    if out.shutdown == Shutdown::Open {
                        out.shutdown = Shutdown::Requested(deadline);
                    }
                    if out.shared.is_closing() {
                        out.awaiting_writable = false;
                    }
                }
                self.flush(id, now);
            }
            WriterTask::Close(id) => {
                if let Some(mut out) = self.channels.remove(&id) {
                    // best effort: whatever the socket takes right now
                    if !out.queue.is_empty() && out.backpressure.is_writable() {
                        out.flush(now);
                    }
                    out.drop_queue();
                    out.shared.release_and_close(&*out.protocol);
                }
            }
        }
    }

    fn enqueue(&mut self, id: u64, msgs: &[C::Outbound], done: Option<WriteCallback>, now: Instant) {
        let Some(out) = self.channels.get_mut(&id) else {
            trace!("dropping message for released channel {}", id);
            if let Some(done) = done {
                done(Err(Error::ChannelClosed));
            }
            return;
        };
        if out.shared.is_closing() || out.shutdown != Shutdown::Open {
            if let Some(done) = done {
                done(Err(Error::ChannelClosed));
            }
            return;
        }
        let mut buf = self.pool.acquire();
        for msg in msgs {
            if let Err(e) = self.encoder.encode(&mut buf, msg) {
                warn!("encode on channel {} failed: {}", id, e);
                self.pool.release(buf);
                if let Some(done) = done {
                    done(Err(e));
                }
                self.force_close(id);
                return;
            }
        }
        let bytes = buf.split();
        self.pool.release(buf);
        if bytes.is_empty() {
            if let Some(done) = done {
                done(Ok(()));
            }
            return;
        }
        out.queued += bytes.len();
        out.queue.push_back(Frame { bytes, done });
        self.flush(id, now);
    }

    fn flush(&mut self, id: u64, now: Instant) {
        let Some(out) = self.channels.get_mut(&id) else { return };
        if out.awaiting_writable {
            out.publish(now);
            return;
        }
        match out.flush(now) {
            Flush::Failed => self.force_close(id),
            Flush::Pending => {}
            Flush::Drained => {
                if let Shutdown::Requested(deadline) = out.shutdown {
                    out.shutdown = Shutdown::Sent(deadline);
                    debug!("channel {} write half shut down", id);
                    if let Err(e) = out.protocol.do_shutdown() {
                        warn!("shutdown on channel {} failed: {}", id, e);
                        self.force_close(id);
                    }
                }
            }
        }
    }

    /// Claims the close if nobody has, tells the looper, and releases.
    fn force_close(&mut self, id: u64) {
        let Some(mut out) = self.channels.remove(&id) else { return };
        out.drop_queue();
        if out.shared.claim_close() {
            out.notify_looper(LooperCommand::Close {
                token: out.token,
                id,
            });
        }
        out.shared.release_and_close(&*out.protocol);
    }

    fn tick(&mut self, now: Instant) {
        let mut throttled = Vec::new();
        let mut expired = Vec::new();
        for (&id, out) in &self.channels {
            match out.shutdown {
                Shutdown::Requested(deadline) | Shutdown::Sent(deadline) if now >= deadline => {
                    expired.push(id);
                    continue;
                }
                _ => {}
            }
            if !out.queue.is_empty() && !out.awaiting_writable {
                throttled.push(id);
            }
        }
        for id in expired {
            debug!("channel {} shutdown timed out", id);
            self.force_close(id);
        }
        for id in throttled {
            self.flush(id, now);
        }
    }

    fn flushing(&self) -> bool {
        self.channels
            .values()
            .any(|out| matches!(out.shutdown, Shutdown::Requested(_)))
    }

    fn release_all(&mut self) {
        let ids: Vec<u64> = self.channels.keys().copied().collect();
        for id in ids {
            if let Some(out) = self.channels.get_mut(&id) {
                if !out.queue.is_empty() && out.backpressure.is_writable() {
                    out.flush(Instant::now());
                }
            }
            self.force_close(id);
        }
    }
}
