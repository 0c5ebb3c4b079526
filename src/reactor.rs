//! Reactor composition root
//!
//! A reactor is an explicitly constructed pool of poller threads (one
//! [`Looper`] each) and writer threads (one [`Writer`] each) sharing a codec,
//! a provider and a handler pipeline. There is no global instance: the
//! process builds one with [`Reactor::builder`], keeps the returned
//! [`ReactorHandle`] and shuts it down when done.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenet_net::http::{HttpRequest, HttpResponse, HttpServerCodec, StatusCode};
//! use tenet_net::{Channel, Handler, Reactor};
//!
//! struct Pong;
//!
//! impl Handler<HttpServerCodec> for Pong {
//!     fn on_recv(&self, ch: &Arc<Channel<HttpServerCodec>>, req: HttpRequest) -> Option<HttpRequest> {
//!         let _ = ch.send(HttpResponse::new(StatusCode::OK).with_body("pong"));
//!         None
//!     }
//! }
//!
//! let reactor = Reactor::builder(HttpServerCodec)
//!     .bind("127.0.0.1:8080")?
//!     .poller_count(2)
//!     .handler(Pong)
//!     .start()?;
//! // ...
//! reactor.shutdown();
//! # Ok::<(), tenet_net::Error>(())
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use log::{debug, error, info};

use crate::affinity;
use crate::buffer_pool::BufferPool;
use crate::codec::Codec;
use crate::config::{self, NetConfig};
use crate::error::{Error, Result};
use crate::loc::Loc;
use crate::looper::{Looper, LooperCommand, LooperContext};
use crate::pipeline::{Handler, Pipeline};
use crate::raw::{self, Connecting, Domain};
use crate::sentry::{Provider, TcpProvider};
use crate::writer::Writer;

/// Entry point; see [`ReactorBuilder`].
#[derive(Debug)]
pub struct Reactor;

impl Reactor {
    pub fn builder<C: Codec>(codec: C) -> ReactorBuilder<C> {
        ReactorBuilder::new(codec)
    }
}

/// Builder for a reactor pool.
///
/// Configuration methods consume the builder and return it, so calls chain.
/// Nothing is allocated until [`start`](Self::start).
pub struct ReactorBuilder<C: Codec> {
    codec: C,
    config: NetConfig,
    provider: Arc<dyn Provider>,
    pipeline: Pipeline<C>,
    listen: bool,
}

impl<C: Codec> ReactorBuilder<C> {
    /// Default configuration, plain TCP, listening.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            config: NetConfig::default(),
            provider: Arc::new(TcpProvider),
            pipeline: Pipeline::new(),
            listen: true,
        }
    }

    /// Replaces the whole configuration. Later calls such as
    /// [`bind`](Self::bind) still override single fields.
    pub fn config(mut self, config: NetConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the listener address, e.g. `"127.0.0.1:8080"` or `"[::1]:8080"`.
    pub fn bind(mut self, addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::config(format!("invalid address {addr:?}: {e}")))?;
        self.config.ip = addr.ip().to_string();
        self.config.port = addr.port();
        Ok(self)
    }

    /// Supplies the initial [`Sentry`](crate::sentry::Sentry) of every
    /// connection. **Default**: [`TcpProvider`].
    pub fn provider(mut self, provider: impl Provider) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Appends a handler to the pipeline; handlers run in the order added.
    pub fn handler(mut self, handler: impl Handler<C>) -> Self {
        self.pipeline.add(handler);
        self
    }

    pub fn poller_count(mut self, n: usize) -> Self {
        self.config.poller_count = n;
        self
    }

    pub fn writer_count(mut self, n: usize) -> Self {
        self.config.writer_count = n;
        self
    }

    /// `false` builds a client-only reactor that serves connections opened
    /// with [`ReactorHandle::connect`].
    ///
    /// **Default**: `true`
    pub fn listen(mut self, listen: bool) -> Self {
        self.listen = listen;
        self
    }

    /// Validates the configuration, spawns writers then pollers, and returns
    /// once the listener (if any) accepts connections.
    pub fn start(self) -> Result<ReactorHandle> {
        if !cfg!(any(unix, windows)) {
            return Err(Error::UnsupportedPlatform(std::env::consts::OS));
        }
        self.config.validate()?;

        let cfg = Arc::new(self.config);
        let codec = Arc::new(self.codec);
        let mut handle = ReactorHandle {
            cfg: cfg.clone(),
            local: None,
            loopers: Vec::new(),
            looper_threads: Vec::new(),
            writer_threads: Vec::new(),
            looper_stop: Arc::new(AtomicBool::new(false)),
            writer_stop: Arc::new(AtomicBool::new(false)),
            provider: self.provider.clone(),
            next_looper: AtomicUsize::new(0),
            stopped: false,
        };

        let spawned = spawn_all(&mut handle, codec, self.provider, Arc::new(self.pipeline), self.listen);
        if let Err(e) = spawned {
            error!("reactor failed to start: {}", e);
            handle.stop();
            return Err(e);
        }
        info!(
            "reactor started: {} pollers, {} writers{}",
            cfg.poller_count,
            cfg.writer_count,
            handle.local.as_ref().map(|l| format!(", listening on {l}")).unwrap_or_default()
        );
        Ok(handle)
    }
}

fn spawn_all<C: Codec>(
    handle: &mut ReactorHandle,
    codec: Arc<C>,
    provider: Arc<dyn Provider>,
    pipeline: Arc<Pipeline<C>>,
    listen: bool,
) -> Result<()> {
    let cfg = handle.cfg.clone();
    let pool = BufferPool::new(cfg.writer_count * 4, cfg.segment_size);

    let mut writers = Vec::with_capacity(cfg.writer_count);
    for index in 0..cfg.writer_count {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut writer = Writer::new(index, cfg.clone(), &*codec, pool.clone(), rx, handle.writer_stop.clone());
        let thread = thread::Builder::new()
            .name(format!("tenet-writer-{index}"))
            .spawn(move || writer.run())?;
        handle.writer_threads.push(thread);
        writers.push(tx);
    }

    let (peers, inboxes): (Vec<_>, Vec<_>) = (0..cfg.poller_count)
        .map(|_| crossbeam_channel::unbounded::<LooperCommand>())
        .unzip();
    handle.loopers = peers.clone();
    let ctx = LooperContext {
        cfg: cfg.clone(),
        codec,
        provider,
        pipeline,
        writers,
        peers,
        ids: Arc::new(AtomicU64::new(0)),
        stop: handle.looper_stop.clone(),
    };

    for (index, inbox) in inboxes.into_iter().enumerate() {
        let mut looper = Looper::create(index, ctx.clone(), inbox)?;
        if index == 0 && listen {
            looper.socket()?;
            looper.bind()?;
            looper.listen()?;
            looper.ctl()?;
            handle.local = looper.local_addr().map(Loc::from);
        }
        let cpus = cfg.poller_cpus.clone();
        let thread = thread::Builder::new()
            .name(format!("tenet-poller-{index}"))
            .spawn(move || {
                affinity::pin_looper(index, &cpus);
                if let Err(e) = looper.run() {
                    error!("poller {} exited: {}", index, e);
                }
            })?;
        handle.looper_threads.push(thread);
    }
    Ok(())
}

/// Running reactor. Dropping it shuts the reactor down.
pub struct ReactorHandle {
    cfg: Arc<NetConfig>,
    local: Option<Loc>,
    loopers: Vec<Sender<LooperCommand>>,
    looper_threads: Vec<JoinHandle<()>>,
    writer_threads: Vec<JoinHandle<()>>,
    looper_stop: Arc<AtomicBool>,
    writer_stop: Arc<AtomicBool>,
    provider: Arc<dyn Provider>,
    next_looper: AtomicUsize,
    stopped: bool,
}

impl ReactorHandle {
    /// Address the listener is bound to; `None` for client-only reactors.
    pub fn local_loc(&self) -> Option<&Loc> {
        self.local.as_ref()
    }

    pub fn config(&self) -> &NetConfig {
        &self.cfg
    }

    /// Starts a non-blocking connect to `loc`. The connection goes through
    /// the provider's sentry like an accepted one; handlers see it in
    /// `on_connected` once the handshake completes, or never if it fails.
    pub fn connect(&self, loc: &Loc) -> Result<()> {
        if self.stopped {
            return Err(Error::ChannelClosed);
        }
        let addr = loc.to_socket_addr()?;
        let socket = raw::socket(Domain::of(&addr))?;
        let started = config::apply_socket_options(socket, &self.cfg)
            .and_then(|_| raw::connect(socket, &addr).map_err(Error::from));
        match started {
            Ok(Connecting::Done) => debug!("connected to {}", loc),
            Ok(Connecting::InProgress) => debug!("connecting to {}", loc),
            Err(e) => {
                let _ = raw::close(socket);
                return Err(e);
            }
        }
        let target = self.next_looper.fetch_add(1, Ordering::Relaxed) % self.loopers.len();
        let adopt = LooperCommand::Adopt { socket, loc: loc.clone() };
        if self.loopers[target].send(adopt).is_err() {
            let _ = raw::close(socket);
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    /// Stops pollers (closing their channels), then writers, then the
    /// provider. Blocks until every thread has exited.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.looper_stop.store(true, Ordering::Release);
        for thread in self.looper_threads.drain(..) {
            if thread.join().is_err() {
                error!("a poller thread panicked");
            }
        }
        self.writer_stop.store(true, Ordering::Release);
        for thread in self.writer_threads.drain(..) {
            if thread.join().is_err() {
                error!("a writer thread panicked");
            }
        }
        self.provider.close();
        info!("reactor stopped");
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
