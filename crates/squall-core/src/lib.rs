//! squall-core: server-side HTTP/1.x connection layer
//!
//! An event-driven state machine between a byte transport and
//! application route handlers. The layer owns request parsing, route
//! dispatch, response write batching, idle reclamation and the
//! per-connection lifecycle; it never owns sockets. Transports plug in
//! through the [`Transport`] trait, one concrete binding per build.
//!
//! ## Features
//! - `native` - tokio current-thread driver over TCP
//! - `tls` - same driver over rustls
//! - `tracing` - observer forwarding lifecycle events to `tracing`

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod connection;
pub mod context;
pub mod error;
pub mod observer;
pub mod parser;
pub mod request;
pub mod response;
pub mod sim;
pub mod transport;

#[cfg(feature = "native")]
pub mod net;

// Re-exports
pub use connection::{ConnectionState, IDLE_TIMEOUT_SECS};
pub use context::{Handler, HttpContext};
pub use error::{Error, Result};
pub use observer::{Event, NoopObserver, Observer};
pub use parser::{Flow, MessageSink, ParseCursor, ParseError};
pub use request::{Header, Method, Request};
pub use response::{Responder, Response, ResponseBuilder, StatusCode, Writer};
pub use sim::SimTransport;
pub use transport::{ListenOptions, SocketEvents, SocketId, Transport};

#[cfg(feature = "tracing")]
pub use observer::TracingObserver;

#[cfg(feature = "native")]
pub use net::{NetListenHandle, NetTransport};

#[cfg(feature = "tls")]
pub use net::tls::{load_certs, load_private_key, TlsConfig};
