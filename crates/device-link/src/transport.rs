//! Byte-stream transports a link can run over.
//!
//! A [`Transport`] knows how to open a bidirectional stream to a device port.
//! It does not know anything about connection state, observers or payloads;
//! the link owns the stream it returns and closes it by dropping it.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::LinkConfig;
use device_link_core::logging::targets;

/// Opens byte streams to a numbered device port.
///
/// Implementations must be cheap to share: one transport value serves every
/// connect attempt of a link.
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by [`open`](Self::open).
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a stream to `port`.
    ///
    /// Any error is reported to the link's observer as a failed connect.
    fn open(&self, port: u32) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP transport, for devices reachable through a local port forwarder.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    host: String,
    no_delay: bool,
}

impl TcpTransport {
    /// Create a TCP transport from link settings.
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            host: config.host.clone(),
            no_delay: config.no_delay,
        }
    }

    /// Get the host this transport connects to.
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(&LinkConfig::default())
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn open(&self, port: u32) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let host = self.host.clone();
        let no_delay = self.no_delay;

        async move {
            let port = u16::try_from(port).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("port {port} out of range"))
            })?;

            tracing::debug!(target: targets::TRANSPORT, %host, port, "opening TCP stream");
            let stream = TcpStream::connect((host.as_str(), port)).await?;

            if let Err(e) = stream.set_nodelay(no_delay) {
                tracing::warn!(target: targets::TRANSPORT, "Failed to set TCP_NODELAY: {}", e);
            }
            Ok(stream)
        }
    }
}
