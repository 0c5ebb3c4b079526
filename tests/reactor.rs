#![cfg(any(unix, windows))]

mod common;

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tenet_net::{BytesCodec, Channel, Handler, NetConfig, Reactor, ReactorEvent};

use common::{connect, free_port, init_logging};

/// Echoes every read back, tagged with the serving thread's name.
struct Echo {
    threads: Arc<Mutex<HashSet<String>>>,
    events: Sender<ReactorEvent>,
}

impl Handler<BytesCodec> for Echo {
    fn on_recv(&self, ch: &Arc<Channel<BytesCodec>>, msg: Bytes) -> Option<Bytes> {
        if let Some(name) = thread::current().name() {
            self.threads.lock().insert(name.to_string());
        }
        ch.send(msg).expect("channel open");
        None
    }

    fn on_event(&self, event: &ReactorEvent) {
        let _ = self.events.send(*event);
    }
}

#[test]
fn test_connections_spread_over_pollers() -> Result<()> {
    init_logging();
    let port = free_port();
    let threads = Arc::new(Mutex::new(HashSet::new()));
    let (events_tx, events) = crossbeam_channel::unbounded();
    let reactor = Reactor::builder(BytesCodec)
        .config(NetConfig { port, ..Default::default() })
        .poller_count(3)
        .writer_count(2)
        .handler(Echo { threads: threads.clone(), events: events_tx })
        .start()?;

    let clients: Vec<_> = (0..12)
        .map(|i| {
            thread::spawn(move || -> Result<()> {
                let mut client = connect(port)?;
                for round in 0..5 {
                    let msg = format!("client {i} round {round}");
                    client.write_all(msg.as_bytes())?;
                    let mut got = vec![0u8; msg.len()];
                    client.read_exact(&mut got)?;
                    assert_eq!(got, msg.as_bytes());
                }
                Ok(())
            })
        })
        .collect();
    for client in clients {
        client.join().expect("client thread")?;
    }

    assert_eq!(threads.lock().len(), 3, "served by {:?}", threads.lock());
    reactor.shutdown();

    let seen: Vec<_> = events.try_iter().collect();
    for i in 0..3 {
        assert!(seen.contains(&ReactorEvent::LooperStarted(i)));
        assert!(seen.contains(&ReactorEvent::LooperStopped(i)));
    }
    Ok(())
}

struct SayAndLeave {
    closed: Sender<u64>,
}

impl Handler<BytesCodec> for SayAndLeave {
    fn on_recv(&self, ch: &Arc<Channel<BytesCodec>>, msg: Bytes) -> Option<Bytes> {
        ch.send_many(vec![Bytes::from_static(b"bye "), msg]).expect("channel open");
        ch.shutdown().expect("first shutdown");
        assert!(ch.send(Bytes::from_static(b"late")).is_err());
        None
    }

    fn on_close(&self, ch: &Arc<Channel<BytesCodec>>) {
        let _ = self.closed.send(ch.id());
    }
}

#[test]
fn test_graceful_shutdown_flushes_then_closes() -> Result<()> {
    init_logging();
    let port = free_port();
    let (tx, closed) = crossbeam_channel::unbounded();
    let reactor = Reactor::builder(BytesCodec)
        .config(NetConfig { port, shutdown_timeout_ms: 200, ..Default::default() })
        .handler(SayAndLeave { closed: tx })
        .start()?;

    let mut client = connect(port)?;
    client.write_all(b"now")?;
    let mut got = Vec::new();
    client.read_to_end(&mut got)?;
    assert_eq!(got, b"bye now");

    // the peer keeps its end open; the grace period force closes
    let started = Instant::now();
    closed.recv_timeout(Duration::from_secs(5))?;
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(client);
    reactor.shutdown();
    Ok(())
}

struct Flood {
    payload: usize,
    writability: Sender<bool>,
}

impl Handler<BytesCodec> for Flood {
    fn on_connected(&self, ch: &Arc<Channel<BytesCodec>>) {
        let chunk = Bytes::from(vec![b'x'; 64 * 1024]);
        for _ in 0..self.payload / chunk.len() {
            ch.send(chunk.clone()).expect("channel open");
        }
    }

    fn on_writability(&self, _ch: &Arc<Channel<BytesCodec>>, writable: bool) {
        let _ = self.writability.send(writable);
    }
}

#[test]
fn test_slow_reader_toggles_writability() -> Result<()> {
    init_logging();
    let port = free_port();
    let payload = 8 << 20;
    let (tx, writability) = crossbeam_channel::unbounded();
    let reactor = Reactor::builder(BytesCodec)
        .config(NetConfig {
            port,
            high_watermark: 256 * 1024,
            low_watermark: 128 * 1024,
            throttle_rate: 64 << 20,
            send_buf: Some(64 * 1024),
            ..Default::default()
        })
        .handler(Flood { payload, writability: tx })
        .start()?;

    let mut client = connect(port)?;
    assert!(!writability.recv_timeout(Duration::from_secs(5))?);

    let mut total = 0;
    let mut buf = vec![0u8; 64 * 1024];
    while total < payload {
        let n = client.read(&mut buf)?;
        assert!(n > 0, "closed after {total} bytes");
        assert!(buf[..n].iter().all(|&b| b == b'x'));
        total += n;
    }
    assert_eq!(total, payload);
    assert!(writability.recv_timeout(Duration::from_secs(5))?);
    reactor.shutdown();
    Ok(())
}

#[test]
fn test_shutdown_flushes_queued_bytes() -> Result<()> {
    init_logging();
    let port = free_port();
    let payload = 2 << 20;
    let (tx, writability) = crossbeam_channel::unbounded();
    let reactor = Reactor::builder(BytesCodec)
        .config(NetConfig {
            port,
            high_watermark: 256 * 1024,
            low_watermark: 128 * 1024,
            throttle_rate: 64 << 20,
            send_buf: Some(64 * 1024),
            ..Default::default()
        })
        .handler(Flood { payload, writability: tx })
        .start()?;

    let mut client = connect(port)?;
    // everything is queued and the socket is full
    assert!(!writability.recv_timeout(Duration::from_secs(5))?);
    let stopping = thread::spawn(move || reactor.shutdown());

    let mut got = Vec::new();
    client.read_to_end(&mut got)?;
    stopping.join().expect("shutdown thread");
    assert_eq!(got.len(), payload);
    Ok(())
}

#[test]
fn test_shutdown_closes_open_connections() -> Result<()> {
    init_logging();
    let port = free_port();
    let (events_tx, _events) = crossbeam_channel::unbounded();
    let reactor = Reactor::builder(BytesCodec)
        .config(NetConfig { port, ..Default::default() })
        .handler(Echo { threads: Arc::default(), events: events_tx })
        .start()?;

    let mut client = connect(port)?;
    client.write_all(b"hi")?;
    let mut got = [0u8; 2];
    client.read_exact(&mut got)?;

    reactor.shutdown();
    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest)?, 0);

    // the port is free again
    let again = Reactor::builder(BytesCodec)
        .config(NetConfig { port, ..Default::default() })
        .start()?;
    again.shutdown();
    Ok(())
}
