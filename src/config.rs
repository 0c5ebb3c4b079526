//! Reactor configuration and socket tuning
//!
//! [`NetConfig`] is loaded once, validated before any looper starts, and is
//! immutable afterwards. Every looper, writer and channel reads from the same
//! shared copy.
//!
//! # Categories
//!
//! ## Socket options
//! - `reuse_addr`, `keep_alive`, `tcp_nodelay`: applied to the listener and to
//!   every accepted or connected socket
//! - `recv_buf`/`send_buf`: kernel buffer sizes, `None` keeps the OS default
//!
//! ## Event loop
//! - `max_events`: events drained per `wait`
//! - `mux_timeout_ms`: upper bound of a single `wait`, so stop requests are
//!   observed promptly
//! - `segment_size`: size of the per-read scratch segment
//!
//! ## Backpressure
//! - `high_watermark`/`low_watermark`: queued-byte thresholds that toggle
//!   channel writability
//! - `throttle_rate`: bytes per second released to an unwritable channel
//!
//! # Examples
//!
//! ```rust
//! use tenet_net::NetConfig;
//!
//! let cfg = NetConfig {
//!     port: 8080,
//!     poller_count: 2,
//!     ..Default::default()
//! };
//! assert!(cfg.validate().is_ok());
//! ```

use crate::error::{Error, Result};
use crate::loc::Loc;
use crate::raw;
use crate::socket::Socket;

/// Configuration bundle shared by every part of a reactor.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetConfig {
    /// SO_REUSEADDR on the listener.
    ///
    /// **Default**: `true`
    pub reuse_addr: bool,

    /// SO_KEEPALIVE on accepted and connected sockets.
    ///
    /// **Default**: `false`
    pub keep_alive: bool,

    /// Disable Nagle's algorithm.
    ///
    /// **Default**: `true`
    pub tcp_nodelay: bool,

    /// Address the listener binds to.
    ///
    /// **Default**: `"127.0.0.1"`
    pub ip: String,

    /// Port the listener binds to.
    ///
    /// **Default**: `10705`
    pub port: u16,

    /// Listen backlog length.
    ///
    /// **Default**: `128`
    pub backlog: i32,

    /// Maximum events returned by one `wait`.
    ///
    /// **Default**: `16`
    pub max_events: usize,

    /// Bytes read from a socket per `recv` call.
    ///
    /// **Default**: `4096`
    pub segment_size: usize,

    /// Upper bound of one `wait` in milliseconds. Never infinite.
    ///
    /// **Default**: `25`
    pub mux_timeout_ms: u64,

    /// Number of looper threads.
    ///
    /// **Default**: `1`
    pub poller_count: usize,

    /// Number of writer threads.
    ///
    /// **Default**: `1`
    pub writer_count: usize,

    /// Queued bytes above which a channel becomes unwritable.
    ///
    /// **Default**: `16 MiB`
    pub high_watermark: usize,

    /// Queued bytes below which an unwritable channel recovers.
    ///
    /// **Default**: `8 MiB`
    pub low_watermark: usize,

    /// Bytes per second flushed to an unwritable channel.
    ///
    /// **Default**: `1 MiB`
    pub throttle_rate: usize,

    /// Grace period of a graceful shutdown before the channel is force closed.
    ///
    /// **Default**: `5000`
    pub shutdown_timeout_ms: u64,

    /// SO_RCVBUF; `None` keeps the OS default.
    pub recv_buf: Option<usize>,

    /// SO_SNDBUF; `None` keeps the OS default.
    pub send_buf: Option<usize>,

    /// CPU cores looper threads are pinned to, by looper index.
    /// Empty disables pinning.
    pub poller_cpus: Vec<usize>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            reuse_addr: true,
            keep_alive: false,
            tcp_nodelay: true,
            ip: "127.0.0.1".to_string(),
            port: 10705,
            backlog: 128,
            max_events: 16,
            segment_size: 4096,
            mux_timeout_ms: 25,
            poller_count: 1,
            writer_count: 1,
            high_watermark: 16 << 20,
            low_watermark: 8 << 20,
            throttle_rate: 1 << 20,
            shutdown_timeout_ms: 5000,
            recv_buf: None,
            send_buf: None,
            poller_cpus: Vec::new(),
        }
    }
}

impl NetConfig {
    /// Preset for request/response traffic.
    ///
    /// Short waits, more events per wait, small kernel buffers.
    pub fn low_latency() -> Self {
        Self {
            tcp_nodelay: true,
            max_events: 64,
            mux_timeout_ms: 5,
            recv_buf: Some(256 * 1024),
            send_buf: Some(256 * 1024),
            ..Default::default()
        }
    }

    /// Preset for bulk transfers.
    ///
    /// Nagle stays on, reads use larger segments and the kernel buffers grow
    /// to 16 MiB.
    pub fn high_throughput() -> Self {
        Self {
            tcp_nodelay: false,
            backlog: 1024,
            max_events: 256,
            segment_size: 64 * 1024,
            mux_timeout_ms: 50,
            recv_buf: Some(16 << 20),
            send_buf: Some(16 << 20),
            ..Default::default()
        }
    }

    /// Listener location.
    pub fn loc(&self) -> Result<Loc> {
        Loc::new(self.ip.clone(), self.port)
    }

    /// Rejects configurations a reactor cannot start with.
    pub fn validate(&self) -> Result<()> {
        self.loc()?;
        if self.backlog <= 0 {
            return Err(Error::config("backlog must be positive"));
        }
        let positive = [
            ("max_events", self.max_events),
            ("segment_size", self.segment_size),
            ("poller_count", self.poller_count),
            ("writer_count", self.writer_count),
            ("throttle_rate", self.throttle_rate),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::config(format!("{name} must be positive")));
            }
        }
        if self.mux_timeout_ms == 0 {
            return Err(Error::config("mux_timeout_ms must be positive"));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(Error::config(format!(
                "low_watermark ({}) must be below high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        Ok(())
    }
}

/// Applies the per-connection options of `cfg` to an accepted or connected
/// socket. The socket is switched to non-blocking mode first.
pub fn apply_socket_options(socket: Socket, cfg: &NetConfig) -> Result<()> {
    raw::set_nonblocking(socket, true)?;
    raw::set_tcp_nodelay(socket, cfg.tcp_nodelay)?;
    raw::set_keep_alive(socket, cfg.keep_alive)?;
    if let Some(sz) = cfg.recv_buf {
        raw::set_recv_buffer(socket, sz.min(i32::MAX as usize) as i32)?;
    }
    if let Some(sz) = cfg.send_buf {
        raw::set_send_buffer(socket, sz.min(i32::MAX as usize) as i32)?;
    }
    Ok(())
}

/// Applies the listener options of `cfg`.
pub fn apply_listener_options(socket: Socket, cfg: &NetConfig) -> Result<()> {
    raw::set_nonblocking(socket, true)?;
    raw::set_reuse_addr(socket, cfg.reuse_addr)?;
    if let Some(sz) = cfg.recv_buf {
        raw::set_recv_buffer(socket, sz.min(i32::MAX as usize) as i32)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_config() {
        let config = NetConfig::default();
        assert!(config.reuse_addr);
        assert!(!config.keep_alive);
        assert!(config.tcp_nodelay);
        assert_eq!(config.ip, "127.0.0.1");
        assert_eq!(config.port, 10705);
        assert_eq!(config.backlog, 128);
        assert_eq!(config.max_events, 16);
        assert_eq!(config.segment_size, 4096);
        assert_eq!(config.high_watermark, 16 * 1024 * 1024);
        assert_eq!(config.low_watermark, 8 * 1024 * 1024);
        assert_eq!(config.throttle_rate, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        let config = NetConfig::low_latency();
        assert_eq!(config.mux_timeout_ms, 5);
        assert!(config.validate().is_ok());

        let config = NetConfig::high_throughput();
        assert!(!config.tcp_nodelay);
        assert_eq!(config.recv_buf, Some(16 << 20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let bad = [
            NetConfig { ip: "not-an-ip".into(), ..Default::default() },
            NetConfig { port: 0, ..Default::default() },
            NetConfig { backlog: 0, ..Default::default() },
            NetConfig { backlog: -5, ..Default::default() },
            NetConfig { max_events: 0, ..Default::default() },
            NetConfig { segment_size: 0, ..Default::default() },
            NetConfig { poller_count: 0, ..Default::default() },
            NetConfig { writer_count: 0, ..Default::default() },
            NetConfig { mux_timeout_ms: 0, ..Default::default() },
            NetConfig { throttle_rate: 0, ..Default::default() },
            NetConfig { low_watermark: 16 << 20, ..Default::default() },
        ];
        for cfg in bad {
            assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Config, "{cfg:?}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_socket_options() {
        let s = raw::socket(raw::Domain::Ipv4).unwrap();
        let cfg = NetConfig { recv_buf: Some(64 * 1024), ..NetConfig::low_latency() };
        apply_socket_options(s, &cfg).unwrap();
        apply_listener_options(s, &cfg).unwrap();
        raw::close(s).unwrap();
    }
}
