//! Native socket binding
//!
//! Thin, allocation-free mapping of the socket half of the native contract
//! onto the OS primitives. The event-queue half lives in [`crate::mux`].
//!
//! # Platform Support
//!
//! ## Unix Systems (Linux, macOS, BSD, Android)
//! - POSIX socket APIs through `libc`
//! - `MSG_NOSIGNAL` (Linux/BSD) or `SO_NOSIGPIPE` (Apple) so a dead peer never
//!   raises `SIGPIPE`
//!
//! ## Windows
//! - WinSock2 through `windows-sys`, with lazy `WSAStartup`
//! - `SOCKET` handles carried as 64-bit values inside [`Socket`]
//!
//! # Contract
//!
//! No call panics or unwinds across the boundary. Data transfer calls return a
//! [`Transfer`] that keeps "would block" distinct from end-of-stream, and every
//! other failure is a [`NativeError`] carrying the platform error code.

use std::net::SocketAddr;

use crate::error::NativeError;
use crate::socket::Socket;

/// IP protocol domain for sockets
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Domain {
    /// IPv4 protocol
    Ipv4,
    /// IPv6 protocol
    Ipv6,
}

impl Domain {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Domain::Ipv4,
            SocketAddr::V6(_) => Domain::Ipv6,
        }
    }
}

/// Outcome of a non-blocking `recv`/`send`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// This many bytes were moved (always > 0).
    Bytes(usize),
    /// The operation would block.
    WouldBlock,
    /// The peer closed its write half (recv returned 0).
    Closed,
}

/// Outcome of a non-blocking `accept`.
#[derive(Debug)]
pub enum Accepted {
    Socket(Socket, SocketAddr),
    WouldBlock,
}

/// Outcome of a non-blocking `connect`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Connecting {
    Done,
    InProgress,
}

pub type NativeResult<T> = Result<T, NativeError>;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

        /// Last `errno` of the calling thread.
        pub fn last_error_code() -> i32 {
            std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
        }

        pub fn is_would_block(code: i32) -> bool {
            code == libc::EAGAIN || code == libc::EWOULDBLOCK
        }

        fn check(op: &'static str, rc: libc::c_int) -> NativeResult<libc::c_int> {
            if rc < 0 { Err(NativeError::last(op)) } else { Ok(rc) }
        }

        fn to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let len = match addr {
                SocketAddr::V4(a) => {
                    let s = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
                    s.sin_family = libc::AF_INET as _;
                    s.sin_port = a.port().to_be();
                    s.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(a.ip().octets()) };
                    std::mem::size_of::<libc::sockaddr_in>()
                }
                SocketAddr::V6(a) => {
                    let s = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
                    s.sin6_family = libc::AF_INET6 as _;
                    s.sin6_port = a.port().to_be();
                    s.sin6_flowinfo = a.flowinfo();
                    s.sin6_scope_id = a.scope_id();
                    s.sin6_addr = libc::in6_addr { s6_addr: a.ip().octets() };
                    std::mem::size_of::<libc::sockaddr_in6>()
                }
            };
            (storage, len as libc::socklen_t)
        }

        fn from_sockaddr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
            match storage.ss_family as libc::c_int {
                libc::AF_INET => {
                    let s = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
                    let ip = Ipv4Addr::from(s.sin_addr.s_addr.to_ne_bytes());
                    Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(s.sin_port))))
                }
                libc::AF_INET6 => {
                    let s = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
                    let ip = Ipv6Addr::from(s.sin6_addr.s6_addr);
                    Some(SocketAddr::V6(SocketAddrV6::new(
                        ip,
                        u16::from_be(s.sin6_port),
                        s.sin6_flowinfo,
                        s.sin6_scope_id,
                    )))
                }
                _ => None,
            }
        }

        fn setsockopt_int(socket: Socket, level: libc::c_int, opt: libc::c_int, val: libc::c_int) -> NativeResult<()> {
            let rc = unsafe {
                libc::setsockopt(
                    socket.raw(),
                    level,
                    opt,
                    &val as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            check("setsockopt", rc).map(|_| ())
        }

        /// Create a TCP socket; the handle is close-on-exec and never raises SIGPIPE.
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
        pub fn socket(domain: Domain) -> NativeResult<Socket> {
            let d = match domain { Domain::Ipv4 => libc::AF_INET, Domain::Ipv6 => libc::AF_INET6 };
            let fd = check("socket", unsafe { libc::socket(d, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, libc::IPPROTO_TCP) })?;
            Ok(Socket::from_raw(fd))
        }

        /// Create a TCP socket; the handle is close-on-exec and never raises SIGPIPE.
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly")))]
        pub fn socket(domain: Domain) -> NativeResult<Socket> {
            let d = match domain { Domain::Ipv4 => libc::AF_INET, Domain::Ipv6 => libc::AF_INET6 };
            let fd = check("socket", unsafe { libc::socket(d, libc::SOCK_STREAM, libc::IPPROTO_TCP) })?;
            let socket = Socket::from_raw(fd);
            if let Err(e) = prepare_unflagged(socket) {
                let _ = close(socket);
                return Err(e);
            }
            Ok(socket)
        }

        // Targets without SOCK_CLOEXEC/accept4 set the flags after the fact.
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly")))]
        fn prepare_unflagged(socket: Socket) -> NativeResult<()> {
            check("fcntl", unsafe { libc::fcntl(socket.raw(), libc::F_SETFD, libc::FD_CLOEXEC) })?;
            #[cfg(any(target_os = "macos", target_os = "ios"))]
            setsockopt_int(socket, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;
            Ok(())
        }

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly")))]
        const SEND_FLAGS: libc::c_int = 0;

        /// Set socket non-blocking mode
        pub fn set_nonblocking(socket: Socket, on: bool) -> NativeResult<()> {
            let fd = socket.raw();
            let flags = check("fcntl", unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
            let next = if on { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
            check("fcntl", unsafe { libc::fcntl(fd, libc::F_SETFL, next) }).map(|_| ())
        }

        /// Allow rebinding a port still in TIME_WAIT
        pub fn set_reuse_addr(socket: Socket, on: bool) -> NativeResult<()> { setsockopt_int(socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, on as i32) }
        /// Enable TCP keep-alive probes
        pub fn set_keep_alive(socket: Socket, on: bool) -> NativeResult<()> { setsockopt_int(socket, libc::SOL_SOCKET, libc::SO_KEEPALIVE, on as i32) }
        /// Disable TCP Nagle algorithm for low latency
        pub fn set_tcp_nodelay(socket: Socket, on: bool) -> NativeResult<()> { setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_NODELAY, on as i32) }
        /// Set socket receive buffer size
        pub fn set_recv_buffer(socket: Socket, sz: i32) -> NativeResult<()> { setsockopt_int(socket, libc::SOL_SOCKET, libc::SO_RCVBUF, sz) }
        /// Set socket send buffer size
        pub fn set_send_buffer(socket: Socket, sz: i32) -> NativeResult<()> { setsockopt_int(socket, libc::SOL_SOCKET, libc::SO_SNDBUF, sz) }

        pub fn bind(socket: Socket, addr: &SocketAddr) -> NativeResult<()> {
            let (storage, len) = to_sockaddr(addr);
            let rc = unsafe { libc::bind(socket.raw(), &storage as *const _ as *const libc::sockaddr, len) };
            check("bind", rc).map(|_| ())
        }

        pub fn listen(socket: Socket, backlog: i32) -> NativeResult<()> {
            check("listen", unsafe { libc::listen(socket.raw(), backlog) }).map(|_| ())
        }

        /// Accept one pending connection; the returned socket is already non-blocking.
        pub fn accept(socket: Socket) -> NativeResult<Accepted> {
            loop {
                let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
                let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
                let ptr = &mut storage as *mut _ as *mut libc::sockaddr;
                #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
                let rc = unsafe { libc::accept4(socket.raw(), ptr, &mut len, libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC) };
                #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly")))]
                let rc = unsafe { libc::accept(socket.raw(), ptr, &mut len) };
                if rc < 0 {
                    let code = last_error_code();
                    if is_would_block(code) {
                        return Ok(Accepted::WouldBlock);
                    }
                    // interrupted, or the peer gave up while queued
                    if code == libc::EINTR || code == libc::ECONNABORTED {
                        continue;
                    }
                    return Err(NativeError::new("accept", code));
                }
                let accepted = Socket::from_raw(rc);
                #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly")))]
                if let Err(e) = set_nonblocking(accepted, true).and_then(|_| prepare_unflagged(accepted)) {
                    let _ = close(accepted);
                    return Err(e);
                }
                return match from_sockaddr(&storage) {
                    Some(addr) => Ok(Accepted::Socket(accepted, addr)),
                    None => {
                        let _ = close(accepted);
                        Err(NativeError::new("accept", libc::EAFNOSUPPORT))
                    }
                };
            }
        }

        /// Start a non-blocking connect.
        pub fn connect(socket: Socket, addr: &SocketAddr) -> NativeResult<Connecting> {
            let (storage, len) = to_sockaddr(addr);
            let rc = unsafe { libc::connect(socket.raw(), &storage as *const _ as *const libc::sockaddr, len) };
            if rc == 0 {
                return Ok(Connecting::Done);
            }
            let code = last_error_code();
            if code == libc::EINPROGRESS || code == libc::EINTR {
                Ok(Connecting::InProgress)
            } else {
                Err(NativeError::new("connect", code))
            }
        }

        pub fn recv(socket: Socket, buf: &mut [u8]) -> NativeResult<Transfer> {
            loop {
                let n = unsafe { libc::recv(socket.raw(), buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
                if n > 0 {
                    return Ok(Transfer::Bytes(n as usize));
                }
                if n == 0 {
                    return Ok(Transfer::Closed);
                }
                let code = last_error_code();
                if is_would_block(code) {
                    return Ok(Transfer::WouldBlock);
                }
                if code != libc::EINTR {
                    return Err(NativeError::new("recv", code));
                }
            }
        }

        pub fn send(socket: Socket, buf: &[u8]) -> NativeResult<Transfer> {
            loop {
                let n = unsafe { libc::send(socket.raw(), buf.as_ptr() as *const libc::c_void, buf.len(), SEND_FLAGS) };
                if n >= 0 {
                    return Ok(if n == 0 && !buf.is_empty() { Transfer::WouldBlock } else { Transfer::Bytes(n as usize) });
                }
                let code = last_error_code();
                if is_would_block(code) {
                    return Ok(Transfer::WouldBlock);
                }
                if code != libc::EINTR {
                    return Err(NativeError::new("send", code));
                }
            }
        }

        /// Half-close: no more bytes will be sent.
        pub fn shutdown_write(socket: Socket) -> NativeResult<()> {
            check("shutdown", unsafe { libc::shutdown(socket.raw(), libc::SHUT_WR) }).map(|_| ())
        }

        pub fn close(socket: Socket) -> NativeResult<()> {
            check("close", unsafe { libc::close(socket.raw()) }).map(|_| ())
        }

        /// Pending error on the socket (`SO_ERROR`), 0 when healthy.
        pub fn socket_error(socket: Socket) -> NativeResult<i32> {
            let mut val: libc::c_int = 0;
            let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
            let rc = unsafe {
                libc::getsockopt(socket.raw(), libc::SOL_SOCKET, libc::SO_ERROR, &mut val as *mut _ as *mut libc::c_void, &mut len)
            };
            check("getsockopt", rc).map(|_| val)
        }

        pub fn local_addr(socket: Socket) -> NativeResult<SocketAddr> {
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            let rc = unsafe { libc::getsockname(socket.raw(), &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
            check("getsockname", rc)?;
            from_sockaddr(&storage).ok_or(NativeError::new("getsockname", libc::EAFNOSUPPORT))
        }

    } else if #[cfg(windows)] {
        use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
        use std::sync::Once;
        use std::sync::atomic::{AtomicI32, Ordering};
        use windows_sys::Win32::Networking::WinSock::*;

        static START: Once = Once::new();
        static START_RC: AtomicI32 = AtomicI32::new(0);

        fn ensure_wsa() -> NativeResult<()> {
            START.call_once(|| unsafe {
                let mut data: WSADATA = std::mem::zeroed();
                START_RC.store(WSAStartup(0x202, &mut data), Ordering::Release); // MAKEWORD(2,2)
            });
            let rc = START_RC.load(Ordering::Acquire);
            if rc != 0 { Err(NativeError::new("WSAStartup", rc)) } else { Ok(()) }
        }

        /// Last `WSAGetLastError` of the calling thread.
        pub fn last_error_code() -> i32 {
            unsafe { WSAGetLastError() }
        }

        pub fn is_would_block(code: i32) -> bool {
            code == WSAEWOULDBLOCK
        }

        fn check(op: &'static str, rc: i32) -> NativeResult<i32> {
            if rc == SOCKET_ERROR { Err(NativeError::last(op)) } else { Ok(rc) }
        }

        fn handle(socket: Socket) -> SOCKET {
            socket.raw() as SOCKET
        }

        fn to_sockaddr(addr: &SocketAddr) -> (SOCKADDR_STORAGE, i32) {
            let mut storage: SOCKADDR_STORAGE = unsafe { std::mem::zeroed() };
            let len = match addr {
                SocketAddr::V4(a) => {
                    let s = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN) };
                    s.sin_family = AF_INET as _;
                    s.sin_port = a.port().to_be();
                    s.sin_addr = IN_ADDR { S_un: IN_ADDR_0 { S_addr: u32::from_ne_bytes(a.ip().octets()) } };
                    std::mem::size_of::<SOCKADDR_IN>()
                }
                SocketAddr::V6(a) => {
                    let s = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN6) };
                    s.sin6_family = AF_INET6 as _;
                    s.sin6_port = a.port().to_be();
                    s.sin6_flowinfo = a.flowinfo();
                    s.Anonymous.sin6_scope_id = a.scope_id();
                    s.sin6_addr = IN6_ADDR { u: IN6_ADDR_0 { Byte: a.ip().octets() } };
                    std::mem::size_of::<SOCKADDR_IN6>()
                }
            };
            (storage, len as i32)
        }

        fn from_sockaddr(storage: &SOCKADDR_STORAGE) -> Option<SocketAddr> {
            match storage.ss_family as u32 {
                f if f == AF_INET as u32 => {
                    let s = unsafe { &*(storage as *const _ as *const SOCKADDR_IN) };
                    let ip = Ipv4Addr::from(unsafe { s.sin_addr.S_un.S_addr }.to_ne_bytes());
                    Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(s.sin_port))))
                }
                f if f == AF_INET6 as u32 => {
                    let s = unsafe { &*(storage as *const _ as *const SOCKADDR_IN6) };
                    let ip = Ipv6Addr::from(unsafe { s.sin6_addr.u.Byte });
                    let scope = unsafe { s.Anonymous.sin6_scope_id };
                    Some(SocketAddr::V6(SocketAddrV6::new(ip, u16::from_be(s.sin6_port), s.sin6_flowinfo, scope)))
                }
                _ => None,
            }
        }

        fn setsockopt_int(socket: Socket, level: i32, opt: i32, val: i32) -> NativeResult<()> {
            let rc = unsafe {
                setsockopt(handle(socket), level, opt, &val as *const _ as *const u8, std::mem::size_of::<i32>() as i32)
            };
            check("setsockopt", rc).map(|_| ())
        }

        pub fn socket(domain: Domain) -> NativeResult<Socket> {
            ensure_wsa()?;
            let d = match domain { Domain::Ipv4 => AF_INET, Domain::Ipv6 => AF_INET6 } as i32;
            let s = unsafe { WSASocketW(d, SOCK_STREAM as i32, IPPROTO_TCP as i32, std::ptr::null_mut(), 0, WSA_FLAG_NO_HANDLE_INHERIT) };
            if s == INVALID_SOCKET {
                return Err(NativeError::last("WSASocketW"));
            }
            Ok(Socket::from_raw(s as u64))
        }

        pub fn set_nonblocking(socket: Socket, on: bool) -> NativeResult<()> {
            let mut nb: u32 = if on { 1 } else { 0 };
            check("ioctlsocket", unsafe { ioctlsocket(handle(socket), FIONBIO, &mut nb) }).map(|_| ())
        }

        pub fn set_reuse_addr(socket: Socket, on: bool) -> NativeResult<()> { setsockopt_int(socket, SOL_SOCKET as _, SO_REUSEADDR as _, on as i32) }
        pub fn set_keep_alive(socket: Socket, on: bool) -> NativeResult<()> { setsockopt_int(socket, SOL_SOCKET as _, SO_KEEPALIVE as _, on as i32) }
        pub fn set_tcp_nodelay(socket: Socket, on: bool) -> NativeResult<()> { setsockopt_int(socket, IPPROTO_TCP as _, TCP_NODELAY as _, on as i32) }
        pub fn set_recv_buffer(socket: Socket, sz: i32) -> NativeResult<()> { setsockopt_int(socket, SOL_SOCKET as _, SO_RCVBUF as _, sz) }
        pub fn set_send_buffer(socket: Socket, sz: i32) -> NativeResult<()> { setsockopt_int(socket, SOL_SOCKET as _, SO_SNDBUF as _, sz) }

        pub fn bind(socket: Socket, addr: &SocketAddr) -> NativeResult<()> {
            let (storage, len) = to_sockaddr(addr);
            check("bind", unsafe { bind(handle(socket), &storage as *const _ as *const SOCKADDR, len) }).map(|_| ())
        }

        pub fn listen(socket: Socket, backlog: i32) -> NativeResult<()> {
            check("listen", unsafe { listen(handle(socket), backlog) }).map(|_| ())
        }

        pub fn accept(socket: Socket) -> NativeResult<Accepted> {
            let mut storage: SOCKADDR_STORAGE = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<SOCKADDR_STORAGE>() as i32;
            let s = unsafe { accept(handle(socket), &mut storage as *mut _ as *mut SOCKADDR, &mut len) };
            if s == INVALID_SOCKET {
                let code = last_error_code();
                return if is_would_block(code) || code == WSAECONNRESET {
                    Ok(Accepted::WouldBlock)
                } else {
                    Err(NativeError::new("accept", code))
                };
            }
            let accepted = Socket::from_raw(s as u64);
            if let Err(e) = set_nonblocking(accepted, true) {
                let _ = close(accepted);
                return Err(e);
            }
            match from_sockaddr(&storage) {
                Some(addr) => Ok(Accepted::Socket(accepted, addr)),
                None => {
                    let _ = close(accepted);
                    Err(NativeError::new("accept", WSAEAFNOSUPPORT))
                }
            }
        }

        pub fn connect(socket: Socket, addr: &SocketAddr) -> NativeResult<Connecting> {
            let (storage, len) = to_sockaddr(addr);
            let rc = unsafe { connect(handle(socket), &storage as *const _ as *const SOCKADDR, len) };
            if rc == 0 {
                return Ok(Connecting::Done);
            }
            let code = last_error_code();
            if is_would_block(code) || code == WSAEINPROGRESS {
                Ok(Connecting::InProgress)
            } else {
                Err(NativeError::new("connect", code))
            }
        }

        pub fn recv(socket: Socket, buf: &mut [u8]) -> NativeResult<Transfer> {
            let len = buf.len().min(i32::MAX as usize) as i32;
            let n = unsafe { recv(handle(socket), buf.as_mut_ptr(), len, 0) };
            if n > 0 {
                Ok(Transfer::Bytes(n as usize))
            } else if n == 0 {
                Ok(Transfer::Closed)
            } else {
                let code = last_error_code();
                if is_would_block(code) { Ok(Transfer::WouldBlock) } else { Err(NativeError::new("recv", code)) }
            }
        }

        pub fn send(socket: Socket, buf: &[u8]) -> NativeResult<Transfer> {
            let len = buf.len().min(i32::MAX as usize) as i32;
            let n = unsafe { send(handle(socket), buf.as_ptr(), len, 0) };
            if n >= 0 {
                Ok(if n == 0 && !buf.is_empty() { Transfer::WouldBlock } else { Transfer::Bytes(n as usize) })
            } else {
                let code = last_error_code();
                if is_would_block(code) { Ok(Transfer::WouldBlock) } else { Err(NativeError::new("send", code)) }
            }
        }

        pub fn shutdown_write(socket: Socket) -> NativeResult<()> {
            check("shutdown", unsafe { shutdown(handle(socket), SD_SEND) }).map(|_| ())
        }

        pub fn close(socket: Socket) -> NativeResult<()> {
            check("closesocket", unsafe { closesocket(handle(socket)) }).map(|_| ())
        }

        pub fn socket_error(socket: Socket) -> NativeResult<i32> {
            let mut val: i32 = 0;
            let mut len = std::mem::size_of::<i32>() as i32;
            let rc = unsafe { getsockopt(handle(socket), SOL_SOCKET as _, SO_ERROR as _, &mut val as *mut _ as *mut u8, &mut len) };
            check("getsockopt", rc).map(|_| val)
        }

        pub fn local_addr(socket: Socket) -> NativeResult<SocketAddr> {
            let mut storage: SOCKADDR_STORAGE = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<SOCKADDR_STORAGE>() as i32;
            check("getsockname", unsafe { getsockname(handle(socket), &mut storage as *mut _ as *mut SOCKADDR, &mut len) })?;
            from_sockaddr(&storage).ok_or(NativeError::new("getsockname", WSAEAFNOSUPPORT))
        }
    } else {
        // No socket API on this target; every call fails and the reactor
        // refuses to start before reaching any of them.
        fn unsupported<T>(op: &'static str) -> NativeResult<T> { Err(NativeError::new(op, -1)) }

        pub fn last_error_code() -> i32 { 0 }
        pub fn is_would_block(_code: i32) -> bool { false }
        pub fn socket(_domain: Domain) -> NativeResult<Socket> { unsupported("socket") }
        pub fn set_nonblocking(_socket: Socket, _on: bool) -> NativeResult<()> { unsupported("set_nonblocking") }
        pub fn set_reuse_addr(_socket: Socket, _on: bool) -> NativeResult<()> { unsupported("setsockopt") }
        pub fn set_keep_alive(_socket: Socket, _on: bool) -> NativeResult<()> { unsupported("setsockopt") }
        pub fn set_tcp_nodelay(_socket: Socket, _on: bool) -> NativeResult<()> { unsupported("setsockopt") }
        pub fn set_recv_buffer(_socket: Socket, _sz: i32) -> NativeResult<()> { unsupported("setsockopt") }
        pub fn set_send_buffer(_socket: Socket, _sz: i32) -> NativeResult<()> { unsupported("setsockopt") }
        pub fn bind(_socket: Socket, _addr: &SocketAddr) -> NativeResult<()> { unsupported("bind") }
        pub fn listen(_socket: Socket, _backlog: i32) -> NativeResult<()> { unsupported("listen") }
        pub fn accept(_socket: Socket) -> NativeResult<Accepted> { unsupported("accept") }
        pub fn connect(_socket: Socket, _addr: &SocketAddr) -> NativeResult<Connecting> { unsupported("connect") }
        pub fn recv(_socket: Socket, _buf: &mut [u8]) -> NativeResult<Transfer> { unsupported("recv") }
        pub fn send(_socket: Socket, _buf: &[u8]) -> NativeResult<Transfer> { unsupported("send") }
        pub fn shutdown_write(_socket: Socket) -> NativeResult<()> { unsupported("shutdown") }
        pub fn close(_socket: Socket) -> NativeResult<()> { unsupported("close") }
        pub fn socket_error(_socket: Socket) -> NativeResult<i32> { unsupported("getsockopt") }
        pub fn local_addr(_socket: Socket) -> NativeResult<SocketAddr> { unsupported("getsockname") }
    }
}
