//! Error types for squall-core

use thiserror::Error;

/// Result type alias for squall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced through the public context API.
///
/// Connection-level failures (malformed requests, idle timeouts, peer
/// aborts) are not represented here; those close the offending connection
/// and are reported through the observer instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Listen socket could not be allocated or bound
    #[error("listen on {host}:{port} failed: {source}")]
    Listen {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// Duplicate route registration (first one stays in effect)
    #[error("route already registered: {method} {pattern}")]
    DuplicateRoute { method: String, pattern: String },

    /// IO error (native only)
    #[cfg(feature = "native")]
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate or key file could not be used
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(String),
}
