#![cfg(any(unix, windows))]

mod common;

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use tenet_net::http::{HttpClientCodec, HttpRequest, HttpResponse, HttpServerCodec, Method, StatusCode};
use tenet_net::{Channel, Handler, Loc, NetConfig, Reactor, ReactorHandle};

use common::{connect, free_port, init_logging, read_response, request};

struct Service {
    closed: Sender<u64>,
}

impl Handler<HttpServerCodec> for Service {
    fn on_recv(&self, ch: &Arc<Channel<HttpServerCodec>>, req: HttpRequest) -> Option<HttpRequest> {
        let resp = match (req.method, req.uri.as_str()) {
            (Method::Get, "/ping") => HttpResponse::new(StatusCode::OK).with_body("pong"),
            (Method::Post, "/echo") => {
                let body = req.body.clone().unwrap_or_else(|| Bytes::from_static(b"<empty>"));
                HttpResponse::new(StatusCode::OK)
                    .with_header("Content-Type", "application/octet-stream")
                    .with_body(body)
            }
            _ => HttpResponse::new(StatusCode::NOT_FOUND).with_body("not found"),
        };
        ch.send(resp).expect("channel open");
        None
    }

    fn on_close(&self, ch: &Arc<Channel<HttpServerCodec>>) {
        let _ = self.closed.send(ch.id());
    }
}

fn server() -> Result<(ReactorHandle, u16, Receiver<u64>)> {
    init_logging();
    let port = free_port();
    let (tx, rx) = crossbeam_channel::unbounded();
    let reactor = Reactor::builder(HttpServerCodec)
        .config(NetConfig { port, ..NetConfig::low_latency() })
        .handler(Service { closed: tx })
        .start()?;
    Ok((reactor, port, rx))
}

#[test]
fn test_ping() -> Result<()> {
    let (reactor, port, _) = server()?;
    let mut client = connect(port)?;
    let (status, body) = request(&mut client, b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n")?;
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"pong");

    let (status, _) = request(&mut client, b"GET /missing HTTP/1.1\r\n\r\n")?;
    assert_eq!(status, "HTTP/1.1 404 Not Found");
    reactor.shutdown();
    Ok(())
}

#[test]
fn test_pipelined_requests_answer_in_order() -> Result<()> {
    let (reactor, port, _) = server()?;
    let mut client = connect(port)?;
    client.write_all(
        b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\noneGET /ping HTTP/1.1\r\n\r\nPOST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\ntwo",
    )?;
    assert_eq!(read_response(&mut client)?.1, b"one");
    assert_eq!(read_response(&mut client)?.1, b"pong");
    assert_eq!(read_response(&mut client)?.1, b"two");
    reactor.shutdown();
    Ok(())
}

#[test]
fn test_request_split_across_writes() -> Result<()> {
    let (reactor, port, _) = server()?;
    let mut client = connect(port)?;
    let raw = b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\nhello world";
    for piece in raw.chunks(7) {
        client.write_all(piece)?;
        client.flush()?;
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(read_response(&mut client)?.1, b"hello world");
    reactor.shutdown();
    Ok(())
}

#[test]
fn test_chunked_request_body() -> Result<()> {
    let (reactor, port, _) = server()?;
    let mut client = connect(port)?;
    let (status, body) = request(
        &mut client,
        b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
    )?;
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"Wikipedia");
    reactor.shutdown();
    Ok(())
}

#[test]
fn test_unknown_method_closes_without_response() -> Result<()> {
    let (reactor, port, closed) = server()?;
    let mut client = connect(port)?;
    client.write_all(b"FOO / HTTP/1.1\r\n\r\n")?;
    let mut rest = Vec::new();
    client.read_to_end(&mut rest)?;
    assert!(rest.is_empty(), "got {:?}", String::from_utf8_lossy(&rest));
    assert!(closed.recv_timeout(Duration::from_secs(5)).is_ok());
    reactor.shutdown();
    Ok(())
}

#[test]
fn test_trailer_is_rejected() -> Result<()> {
    let (reactor, port, closed) = server()?;
    let mut client = connect(port)?;
    client.write_all(b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\n0\r\nX-Trailer: 1\r\n\r\n")?;
    let mut rest = Vec::new();
    client.read_to_end(&mut rest)?;
    assert!(rest.is_empty());
    assert!(closed.recv_timeout(Duration::from_secs(5)).is_ok());
    reactor.shutdown();
    Ok(())
}

#[test]
fn test_peer_close_fires_on_close_once() -> Result<()> {
    let (reactor, port, closed) = server()?;
    let mut client = connect(port)?;
    request(&mut client, b"GET /ping HTTP/1.1\r\n\r\n")?;
    drop(client);
    let id = closed.recv_timeout(Duration::from_secs(5))?;
    assert!(closed.recv_timeout(Duration::from_millis(200)).is_err(), "channel {id} closed twice");
    reactor.shutdown();
    Ok(())
}

#[cfg(feature = "compression")]
#[test]
fn test_gzip_body_is_inflated() -> Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let (reactor, port, _) = server()?;
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(b"compressed payload")?;
    let packed = gz.finish()?;

    let mut raw = format!(
        "POST /echo HTTP/1.1\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        packed.len()
    )
    .into_bytes();
    raw.extend_from_slice(&packed);

    let mut client = connect(port)?;
    let (_, body) = request(&mut client, &raw)?;
    assert_eq!(body, b"compressed payload");
    reactor.shutdown();
    Ok(())
}

struct Client {
    responses: Sender<HttpResponse>,
}

impl Handler<HttpClientCodec> for Client {
    fn on_connected(&self, ch: &Arc<Channel<HttpClientCodec>>) {
        let ping = HttpRequest::new(Method::Get, "/ping").with_header("Host", "localhost");
        let echo = HttpRequest::new(Method::Post, "/echo").with_body("from client");
        ch.send_many(vec![ping, echo]).expect("channel open");
    }

    fn on_recv(&self, _ch: &Arc<Channel<HttpClientCodec>>, resp: HttpResponse) -> Option<HttpResponse> {
        let _ = self.responses.send(resp);
        None
    }
}

#[test]
fn test_client_reactor_round_trip() -> Result<()> {
    let (server, port, _) = server()?;
    let (tx, rx) = crossbeam_channel::unbounded();
    let client = Reactor::builder(HttpClientCodec)
        .listen(false)
        .handler(Client { responses: tx })
        .start()?;
    client.connect(&Loc::new("127.0.0.1", port)?)?;

    let first = rx.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(first.status.code(), 200);
    assert_eq!(first.body.as_deref(), Some(&b"pong"[..]));
    let second = rx.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(second.body.as_deref(), Some(&b"from client"[..]));
    assert_eq!(second.headers.get("content-type"), Some("application/octet-stream"));

    client.shutdown();
    server.shutdown();
    Ok(())
}

#[test]
fn test_connect_refused_never_connects() -> Result<()> {
    init_logging();
    let (tx, rx) = crossbeam_channel::unbounded();
    let client = Reactor::builder(HttpClientCodec)
        .listen(false)
        .handler(Client { responses: tx })
        .start()?;
    match client.connect(&Loc::new("127.0.0.1", free_port())?) {
        Ok(()) => assert!(rx.recv_timeout(Duration::from_millis(300)).is_err()),
        Err(e) => assert_eq!(e.kind(), tenet_net::ErrorKind::Native),
    }
    client.shutdown();
    Ok(())
}
