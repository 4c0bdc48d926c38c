//! Transport binding traits
//!
//! The connection layer never talks to sockets directly. It is generic over
//! a [`Transport`], one concrete binding per build: the in-memory
//! [`SimTransport`](crate::sim::SimTransport) for tests, the tokio-backed
//! [`NetTransport`](crate::net::NetTransport) behind the `native` feature,
//! and the same driver over rustls behind `tls`. Selection happens at
//! compile time; nothing in the hot path branches on the transport kind.
//!
//! Event flow is inverted: a driver owns the IO loop and pushes socket
//! events into the layer through [`SocketEvents`].

use std::fmt;
use std::hash::Hash;

use crate::error::Result;

/// Stable identifier for one connection within its binding.
///
/// Plain value, cheap to copy, meaningless outside the binding that
/// issued it. IDs are not reused while a connection record is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u32);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Listen socket tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct ListenOptions {
    /// SO_REUSEPORT on unix targets
    pub reuse_port: bool,
    /// Accept queue depth
    pub backlog: u32,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            reuse_port: false,
            backlog: 1024,
        }
    }
}

/// Capability surface a binding exposes to the connection layer.
///
/// One instance services many sockets. Every per-socket call takes the
/// socket handle; calls on a socket whose record is gone must not panic
/// (`conn_ext_mut` returns `None`, `is_closed` returns true, writes
/// report zero).
pub trait Transport {
    /// Per-socket handle
    type Socket: Copy + Eq + Hash + fmt::Debug;
    /// Per-socket extension record, allocated by the binding at socket
    /// birth and released after the close event has run
    type Ext;
    /// Token returned by a successful `listen`
    type ListenHandle;

    /// Mutable access to the socket's extension record.
    ///
    /// `None` once the record has been released; callers treat that as
    /// "connection gone" and back out.
    fn conn_ext_mut(&mut self, socket: Self::Socket) -> Option<&mut Self::Ext>;

    /// Arm the idle timer to `seconds` from now; 0 disarms it.
    fn set_timeout(&mut self, socket: Self::Socket, seconds: u32);

    /// Whether the write side has been shut down
    fn is_shut_down(&self, socket: Self::Socket) -> bool;

    /// Whether the socket has been closed (record may still be awaiting
    /// its close event)
    fn is_closed(&self, socket: Self::Socket) -> bool;

    /// Force-close now: further IO is refused immediately, the close
    /// event is delivered after the current handler unwinds.
    fn close(&mut self, socket: Self::Socket);

    /// Begin batching writes for this socket
    fn cork(&mut self, socket: Self::Socket);

    /// Flush batched writes
    fn uncork(&mut self, socket: Self::Socket);

    /// Write bytes; returns how many were accepted.
    ///
    /// `more_coming` hints that another write follows immediately,
    /// `size_hint` the expected total remaining (both advisory).
    fn write(
        &mut self,
        socket: Self::Socket,
        data: &[u8],
        more_coming: bool,
        size_hint: usize,
    ) -> usize;

    /// Open a listen socket
    fn listen(&mut self, host: &str, port: u16, options: ListenOptions)
        -> Result<Self::ListenHandle>;
}

/// Socket events a driver feeds into the connection layer.
///
/// Per socket the driver guarantees: `on_open` first, then any
/// interleaving of `on_data`/`on_writable`, then at most one of
/// `on_end`/`on_timeout` before the final `on_close`. `on_close` is
/// delivered exactly once and the extension record stays alive until it
/// returns.
pub trait SocketEvents<T: Transport> {
    /// Socket came into existence (`is_client` = outbound connect)
    fn on_open(&mut self, socket: T::Socket, is_client: bool);

    /// Bytes arrived
    fn on_data(&mut self, socket: T::Socket, data: &[u8]);

    /// Socket drained and can accept more bytes
    fn on_writable(&mut self, socket: T::Socket);

    /// Peer half-closed (FIN)
    fn on_end(&mut self, socket: T::Socket);

    /// Idle timer fired
    fn on_timeout(&mut self, socket: T::Socket);

    /// Terminal event; record is released after this returns
    fn on_close(&mut self, socket: T::Socket);
}
