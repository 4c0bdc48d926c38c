//! Encrypted listener using rustls
//!
//! Same connection driver as the plaintext binding, monomorphized over
//! `tokio_rustls` server streams. Certificates and keys load from PEM
//! files; ALPN is pinned to `http/1.1` by default since that is the
//! only protocol the state machine speaks.

use std::cell::RefCell;
use std::fs::File;
use std::io::BufReader;
use std::net::TcpListener as StdTcpListener;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use super::{spawn_connection, NetListenHandle, NetTransport, SharedContext};
use crate::connection::ConnectionState;
use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::observer::Observer;
use crate::transport::SocketId;

/// TLS configuration
#[derive(Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
    /// ALPN protocols (default: ["http/1.1"])
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            alpn_protocols: vec![b"http/1.1".to_vec()],
        }
    }

    /// Build rustls ServerConfig
    pub fn build_server_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let certs = load_certs(&self.cert_path)?;
        let key = load_private_key(&self.key_path)?;

        let mut config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(e.to_string()))?;

        config.alpn_protocols = self.alpn_protocols.clone();

        Ok(Arc::new(config))
    }

    /// Build the acceptor the driver hands each incoming stream to
    pub fn build_acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(self.build_server_config()?))
    }
}

/// Load certificates from PEM file
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(Path::new(path))
        .map_err(|e| Error::Tls(format!("Failed to open cert file: {}", e)))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certs: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Tls("No certificates found in file".to_string()));
    }

    Ok(certs)
}

/// Load private key from PEM file
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(Path::new(path))
        .map_err(|e| Error::Tls(format!("Failed to open key file: {}", e)))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| Error::Tls(format!("Failed to parse key: {}", e)))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Some(rustls_pemfile::Item::Sec1Key(key)) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            None => break,
            _ => continue,
        }
    }

    Err(Error::Tls("No private key found in file".to_string()))
}

/// Accept, handshake and drive encrypted connections until the
/// listener fails. Blocks like [`super::run`].
pub fn run<O>(
    ctx: HttpContext<NetTransport<ConnectionState>, O>,
    handle: NetListenHandle,
    tls: &TlsConfig,
) -> Result<()>
where
    O: Observer<SocketId> + 'static,
{
    let acceptor = tls.build_acceptor()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let local = tokio::task::LocalSet::new();
    let ctx = Rc::new(RefCell::new(ctx));
    local.block_on(&runtime, accept_loop(ctx, handle.listener, acceptor))
}

async fn accept_loop<O>(
    ctx: SharedContext<O>,
    listener: StdTcpListener,
    acceptor: TlsAcceptor,
) -> Result<()>
where
    O: Observer<SocketId> + 'static,
{
    let listener = TcpListener::from_std(listener)?;
    loop {
        let (stream, _peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let acceptor = acceptor.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_local(async move {
            // A failed handshake never becomes a socket; there is
            // nothing for the state machine to clean up.
            if let Ok(stream) = acceptor.accept(stream).await {
                spawn_connection(&ctx, stream);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_config_creation() {
        let config = TlsConfig::new("cert.pem", "key.pem");
        assert_eq!(config.cert_path, "cert.pem");
        assert_eq!(config.key_path, "key.pem");
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_missing_cert_file_is_an_error() {
        let err = load_certs("/nonexistent/cert.pem").err();
        assert!(matches!(err, Some(Error::Tls(_))));
    }

    #[test]
    fn test_missing_key_file_is_an_error() {
        let err = load_private_key("/nonexistent/key.pem").err();
        assert!(matches!(err, Some(Error::Tls(_))));
    }
}
