//! Application-facing connection handle
//!
//! A [`Channel`] is created by its looper when the connection upgrades and is
//! handed to handlers as `Arc<Channel<C>>`. It never touches the socket
//! itself: sends, shutdowns and closes are forwarded to the owning writer and
//! looper threads.
//!
//! The only state read and written by more than one thread lives in
//! [`SharedCell`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, warn};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::loc::Loc;
use crate::looper::LooperCommand;
use crate::sentry::Protocol;
use crate::socket::Socket;
use crate::writer::WriterTask;

/// Fields shared by the looper and writer of one connection.
///
/// `closing` is claimed once by compare-and-set; the winner starts the close
/// and notifies the other side. `holders` counts the two threads still using
/// the socket; whichever release brings it to zero runs `Protocol::do_close`.
#[derive(Debug)]
pub struct SharedCell {
    closing: AtomicBool,
    shutdown: AtomicBool,
    holders: AtomicU8,
    queued: AtomicUsize,
    writable: AtomicBool,
}

impl Default for SharedCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedCell {
    pub fn new() -> Self {
        Self {
            closing: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            holders: AtomicU8::new(2),
            queued: AtomicUsize::new(0),
            writable: AtomicBool::new(true),
        }
    }

    /// True for exactly one caller.
    pub fn claim_close(&self) -> bool {
        self.closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// True for exactly one caller.
    pub fn request_shutdown(&self) -> bool {
        !self.shutdown.swap(true, Ordering::AcqRel)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Drops one holder; true when the caller was the last.
    pub fn release(&self) -> bool {
        self.holders.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Releases one holder and closes the protocol if it was the last.
    pub fn release_and_close(&self, protocol: &dyn Protocol) {
        if self.release() {
            debug!("closing socket {}", protocol.socket());
            if let Err(e) = protocol.do_close() {
                warn!("close of socket {} failed: {}", protocol.socket(), e);
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub(crate) fn set_queued(&self, n: usize) {
        self.queued.store(n, Ordering::Release);
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    pub(crate) fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }
}

/// Handle to one upgraded connection.
pub struct Channel<C: Codec> {
    id: u64,
    token: usize,
    loc: Loc,
    socket: Socket,
    shared: Arc<SharedCell>,
    writer: Sender<WriterTask<C>>,
    looper: Sender<LooperCommand>,
    shutdown_timeout: Duration,
}

impl<C: Codec> Channel<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        token: usize,
        loc: Loc,
        socket: Socket,
        shared: Arc<SharedCell>,
        writer: Sender<WriterTask<C>>,
        looper: Sender<LooperCommand>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            id,
            token,
            loc,
            socket,
            shared,
            writer,
            looper,
            shutdown_timeout,
        }
    }

    /// Unique within a reactor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer location.
    pub fn loc(&self) -> &Loc {
        &self.loc
    }

    pub fn socket(&self) -> Socket {
        self.socket
    }

    pub(crate) fn token(&self) -> usize {
        self.token
    }

    pub(crate) fn shared(&self) -> &Arc<SharedCell> {
        &self.shared
    }

    fn check_open(&self) -> Result<()> {
        if self.shared.is_closing() || self.shared.is_shutdown() {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    /// Queues `msg` for encoding and writing on the channel's writer thread.
    pub fn send(&self, msg: C::Outbound) -> Result<()> {
        self.check_open()?;
        self.push(WriterTask::Send(self.id, msg, None))
    }

    /// Like [`send`](Self::send); `done` runs on the writer thread with `Ok`
    /// once the message is fully written, or with an error if it is dropped.
    /// When this returns an error `done` never runs.
    pub fn send_with<F>(&self, msg: C::Outbound, done: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.check_open()?;
        self.push(WriterTask::Send(self.id, msg, Some(Box::new(done))))
    }

    /// Encodes all messages into one buffer and writes them together.
    pub fn send_many(&self, msgs: Vec<C::Outbound>) -> Result<()> {
        self.check_open()?;
        if msgs.is_empty() {
            return Ok(());
        }
        self.push(WriterTask::SendMany(self.id, msgs, None))
    }

    /// [`send_many`](Self::send_many) with one completion for the batch.
    pub fn send_many_with<F>(&self, msgs: Vec<C::Outbound>, done: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.check_open()?;
        self.push(WriterTask::SendMany(self.id, msgs, Some(Box::new(done))))
    }

    fn push(&self, task: WriterTask<C>) -> Result<()> {
        self.writer.send(task).map_err(|_| Error::ChannelClosed)
    }

    /// Graceful close with the configured grace period.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_with(self.shutdown_timeout)
    }

    /// Flushes queued writes, shuts down the write half and waits for the
    /// peer to close. The channel is force closed after `timeout`.
    pub fn shutdown_with(&self, timeout: Duration) -> Result<()> {
        if self.shared.is_closing() {
            return Err(Error::ChannelClosed);
        }
        if !self.shared.request_shutdown() {
            return Ok(());
        }
        self.push(WriterTask::Shutdown(self.id, Instant::now() + timeout))
    }

    /// Force close; queued writes are discarded. Safe to call repeatedly.
    pub fn close(&self) {
        if self.shared.claim_close() {
            debug!("channel {} closed by application", self.id);
            let _ = self.writer.send(WriterTask::Close(self.id));
            let _ = self.looper.send(LooperCommand::Close {
                token: self.token,
                id: self.id,
            });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closing()
    }

    /// False while queued bytes sit above the high watermark.
    pub fn is_writable(&self) -> bool {
        self.shared.is_writable()
    }

    /// Encoded bytes not yet accepted by the socket.
    pub fn queued_bytes(&self) -> usize {
        self.shared.queued()
    }
}

impl<C: Codec> fmt::Debug for Channel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("loc", &self.loc)
            .field("socket", &self.socket)
            .field("closing", &self.shared.is_closing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BytesCodec;
    use crate::raw::Transfer;
    use std::sync::Barrier;

    #[derive(Default)]
    struct CountingProtocol {
        closes: AtomicUsize,
    }

    impl Protocol for CountingProtocol {
        fn socket(&self) -> Socket {
            Socket::from_raw(3)
        }

        fn on_readable(&self, _buf: &mut [u8]) -> Result<Transfer> {
            Ok(Transfer::WouldBlock)
        }

        fn do_write(&self, data: &[u8]) -> Result<Transfer> {
            Ok(Transfer::Bytes(data.len()))
        }

        fn do_shutdown(&self) -> Result<()> {
            Ok(())
        }

        fn do_close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_close_race_tears_down_once() {
        for _ in 0..500 {
            let shared = Arc::new(SharedCell::new());
            let protocol = Arc::new(CountingProtocol::default());
            let claims = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(2));

            let sides: Vec<_> = (0..2)
                .map(|_| {
                    let (shared, protocol, claims, barrier) =
                        (shared.clone(), protocol.clone(), claims.clone(), barrier.clone());
                    std::thread::spawn(move || {
                        barrier.wait();
                        if shared.claim_close() {
                            claims.fetch_add(1, Ordering::SeqCst);
                        }
                        shared.release_and_close(&*protocol);
                    })
                })
                .collect();
            for side in sides {
                side.join().unwrap();
            }

            assert_eq!(claims.load(Ordering::SeqCst), 1);
            assert_eq!(protocol.closes.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_channel_forwards_to_writer_and_looper() {
        let (wtx, wrx) = crossbeam_channel::unbounded();
        let (ltx, lrx) = crossbeam_channel::unbounded();
        let loc = Loc::new("127.0.0.1", 9000).unwrap();
        let ch: Channel<BytesCodec> = Channel::new(
            7,
            3,
            loc,
            Socket::from_raw(11),
            Arc::new(SharedCell::new()),
            wtx,
            ltx,
            Duration::from_secs(1),
        );

        ch.send(bytes::Bytes::from_static(b"a")).unwrap();
        ch.send_many(vec![]).unwrap();
        assert!(matches!(wrx.try_recv(), Ok(WriterTask::Send(7, _, None))));
        assert!(wrx.try_recv().is_err());

        ch.send_with(bytes::Bytes::from_static(b"b"), |_| {}).unwrap();
        ch.send_many_with(vec![], |_| {}).unwrap();
        assert!(matches!(wrx.try_recv(), Ok(WriterTask::Send(7, _, Some(_)))));
        assert!(matches!(wrx.try_recv(), Ok(WriterTask::SendMany(7, _, Some(_)))));

        ch.shutdown().unwrap();
        ch.shutdown().unwrap();
        assert!(matches!(wrx.try_recv(), Ok(WriterTask::Shutdown(7, _))));
        assert!(wrx.try_recv().is_err());
        assert!(matches!(ch.send(bytes::Bytes::new()), Err(Error::ChannelClosed)));
        assert!(matches!(ch.send_with(bytes::Bytes::new(), |_| {}), Err(Error::ChannelClosed)));

        ch.close();
        ch.close();
        assert!(ch.is_closed());
        assert!(matches!(wrx.try_recv(), Ok(WriterTask::Close(7))));
        assert!(matches!(lrx.try_recv(), Ok(LooperCommand::Close { token: 3, id: 7 })));
        assert!(lrx.try_recv().is_err());
    }
}
