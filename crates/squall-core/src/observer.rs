//! Connection event hook
//!
//! The layer performs no logging or other IO side effects of its own;
//! anything noteworthy is reported as an [`Event`] to the observer the
//! context was built with. [`NoopObserver`] drops everything; the
//! `tracing` feature adds [`TracingObserver`] as a ready-made bridge.

use crate::parser::ParseError;
use crate::request::Method;

/// Structured connection events, borrowed where they are cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a, S> {
    Opened {
        socket: S,
        is_client: bool,
    },
    Closed {
        socket: S,
    },
    TimedOut {
        socket: S,
    },
    /// Peer half-closed; the connection is being dropped in response
    PeerClosed {
        socket: S,
    },
    /// Bytes arrived on a shut-down socket and were ignored
    DataAfterShutdown {
        socket: S,
        len: usize,
    },
    Dispatched {
        socket: S,
        method: Method,
        path: &'a str,
    },
    /// No pattern and no fallback matched
    RouteMissed {
        socket: S,
        method: Method,
        path: &'a str,
    },
    ParseFailed {
        socket: S,
        error: ParseError,
    },
    /// Socket was promised to another protocol layer
    Upgraded {
        socket: S,
    },
}

/// Receiver for connection events. Implementations must not block.
pub trait Observer<S> {
    fn event(&mut self, event: Event<'_, S>);
}

/// Default observer: every event is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<S> Observer<S> for NoopObserver {
    fn event(&mut self, _event: Event<'_, S>) {}
}

/// Forwards events into the `tracing` ecosystem.
#[cfg(feature = "tracing")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[cfg(feature = "tracing")]
impl<S: std::fmt::Debug> Observer<S> for TracingObserver {
    fn event(&mut self, event: Event<'_, S>) {
        match event {
            Event::Opened { socket, is_client } => {
                tracing::debug!(?socket, is_client, "connection opened")
            }
            Event::Closed { socket } => tracing::debug!(?socket, "connection closed"),
            Event::TimedOut { socket } => tracing::info!(?socket, "idle timeout, closing"),
            Event::PeerClosed { socket } => {
                tracing::debug!(?socket, "peer half-closed, dropping")
            }
            Event::DataAfterShutdown { socket, len } => {
                tracing::debug!(?socket, len, "ignored bytes on shut-down socket")
            }
            Event::Dispatched {
                socket,
                method,
                path,
            } => tracing::debug!(?socket, %method, path, "request dispatched"),
            Event::RouteMissed {
                socket,
                method,
                path,
            } => tracing::info!(?socket, %method, path, "no route"),
            Event::ParseFailed { socket, error } => {
                tracing::warn!(?socket, %error, "malformed request")
            }
            Event::Upgraded { socket } => {
                tracing::debug!(?socket, "socket handed to another protocol")
            }
        }
    }
}
