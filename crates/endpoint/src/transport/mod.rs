//! Byte transports carrying an XMPP stream.
//!
//! Everything above this module talks to a [`Transport`]: plain TCP with
//! in-band STARTTLS ([`TcpTransport`]) or RFC 7395 WebSocket framing
//! ([`WebSocketTransport`]). [`AnyTransport`] picks one from the
//! configuration at connect time.

pub mod tcp;
pub mod tls;
pub mod websocket;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::XmppError;

pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

/// Direction of a chunk passed to a [`StreamLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the peer
    Inbound,
    /// Sent to the peer
    Outbound,
}

impl Direction {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Sink for the raw XML exchanged on a stream.
pub trait StreamLogger: Send + Sync {
    /// Called with every chunk read from or written to the transport.
    fn log(&self, direction: Direction, data: &[u8]);
}

/// [`StreamLogger`] writing chunks as TRACE events on the
/// `waddle_endpoint::wire` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStreamLogger;

impl StreamLogger for TracingStreamLogger {
    fn log(&self, direction: Direction, data: &[u8]) {
        trace!(
            target: "waddle_endpoint::wire",
            direction = direction.as_str(),
            data = %String::from_utf8_lossy(data),
        );
    }
}

/// Read side of a transport.
pub trait TransportRead: Send {
    /// Receive the next chunk. A closed peer yields [`XmppError::Closed`].
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, XmppError>> + Send;
}

/// Write side of a transport.
pub trait TransportWrite: Send {
    /// Write a chunk in full.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), XmppError>> + Send;

    /// Shut the connection down.
    fn close(&mut self) -> impl Future<Output = Result<(), XmppError>> + Send;
}

/// A connectable duplex byte stream.
///
/// Negotiation uses the transport whole; once the session is established it
/// is split so one reader task and any number of writers can share it.
pub trait Transport: TransportRead + TransportWrite + Sized + 'static {
    /// Read half after [`Transport::into_split`].
    type Reader: TransportRead + 'static;
    /// Write half after [`Transport::into_split`].
    type Writer: TransportWrite + 'static;

    /// Dial the peer, bounded by `config.connect_timeout`.
    fn connect(config: &TransportConfig) -> impl Future<Output = Result<Self, XmppError>> + Send;

    /// Whether this transport can be upgraded in-band with STARTTLS.
    fn does_start_tls(&self) -> bool;

    /// Run the TLS handshake, verifying `server_name` unless insecure.
    fn start_tls(self, server_name: &str) -> impl Future<Output = Result<Self, XmppError>> + Send;

    /// Whether bytes are currently protected by TLS.
    fn is_secure(&self) -> bool;

    /// Whether the stream uses RFC 7395 `<open/>`/`<close/>` framing.
    fn is_framed(&self) -> bool;

    /// Short label for metrics.
    fn kind(&self) -> &'static str;

    /// Split into independently owned halves.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// Connection parameters shared by all transports.
#[derive(Clone)]
pub struct TransportConfig {
    /// `host:port` for TCP
    pub address: String,
    /// `ws://` or `wss://` URL; selects the WebSocket transport when set
    pub websocket_url: Option<String>,
    /// Dial timeout
    pub connect_timeout: Duration,
    /// Skip certificate verification
    pub insecure: bool,
    /// Prebuilt TLS client configuration
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl TransportConfig {
    /// The configured TLS client config, or one built from the platform roots.
    pub fn tls_client_config(&self) -> Result<Arc<rustls::ClientConfig>, XmppError> {
        match &self.tls_config {
            Some(config) => Ok(config.clone()),
            None => tls::client_config(self.insecure),
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("address", &self.address)
            .field("websocket_url", &self.websocket_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("insecure", &self.insecure)
            .field("tls_config", &self.tls_config.is_some())
            .finish()
    }
}

/// TCP or WebSocket, chosen by [`TransportConfig::websocket_url`].
pub enum AnyTransport {
    /// Plain TCP with optional STARTTLS
    Tcp(TcpTransport),
    /// RFC 7395 WebSocket
    WebSocket(WebSocketTransport),
}

/// Read half of an [`AnyTransport`].
pub enum AnyReader {
    /// TCP
    Tcp(<TcpTransport as Transport>::Reader),
    /// WebSocket
    WebSocket(<WebSocketTransport as Transport>::Reader),
}

/// Write half of an [`AnyTransport`].
pub enum AnyWriter {
    /// TCP
    Tcp(<TcpTransport as Transport>::Writer),
    /// WebSocket
    WebSocket(<WebSocketTransport as Transport>::Writer),
}

impl TransportRead for AnyTransport {
    async fn recv(&mut self) -> Result<Vec<u8>, XmppError> {
        match self {
            Self::Tcp(t) => t.recv().await,
            Self::WebSocket(t) => t.recv().await,
        }
    }
}

impl TransportWrite for AnyTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), XmppError> {
        match self {
            Self::Tcp(t) => t.send(data).await,
            Self::WebSocket(t) => t.send(data).await,
        }
    }

    async fn close(&mut self) -> Result<(), XmppError> {
        match self {
            Self::Tcp(t) => t.close().await,
            Self::WebSocket(t) => t.close().await,
        }
    }
}

impl TransportRead for AnyReader {
    async fn recv(&mut self) -> Result<Vec<u8>, XmppError> {
        match self {
            Self::Tcp(r) => r.recv().await,
            Self::WebSocket(r) => r.recv().await,
        }
    }
}

impl TransportWrite for AnyWriter {
    async fn send(&mut self, data: &[u8]) -> Result<(), XmppError> {
        match self {
            Self::Tcp(w) => w.send(data).await,
            Self::WebSocket(w) => w.send(data).await,
        }
    }

    async fn close(&mut self) -> Result<(), XmppError> {
        match self {
            Self::Tcp(w) => w.close().await,
            Self::WebSocket(w) => w.close().await,
        }
    }
}

impl Transport for AnyTransport {
    type Reader = AnyReader;
    type Writer = AnyWriter;

    async fn connect(config: &TransportConfig) -> Result<Self, XmppError> {
        if config.websocket_url.is_some() {
            Ok(Self::WebSocket(WebSocketTransport::connect(config).await?))
        } else {
            Ok(Self::Tcp(TcpTransport::connect(config).await?))
        }
    }

    fn does_start_tls(&self) -> bool {
        match self {
            Self::Tcp(t) => t.does_start_tls(),
            Self::WebSocket(t) => t.does_start_tls(),
        }
    }

    async fn start_tls(self, server_name: &str) -> Result<Self, XmppError> {
        match self {
            Self::Tcp(t) => Ok(Self::Tcp(t.start_tls(server_name).await?)),
            Self::WebSocket(t) => Ok(Self::WebSocket(t.start_tls(server_name).await?)),
        }
    }

    fn is_secure(&self) -> bool {
        match self {
            Self::Tcp(t) => t.is_secure(),
            Self::WebSocket(t) => t.is_secure(),
        }
    }

    fn is_framed(&self) -> bool {
        match self {
            Self::Tcp(t) => t.is_framed(),
            Self::WebSocket(t) => t.is_framed(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(t) => t.kind(),
            Self::WebSocket(t) => t.kind(),
        }
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        match self {
            Self::Tcp(t) => {
                let (r, w) = t.into_split();
                (AnyReader::Tcp(r), AnyWriter::Tcp(w))
            }
            Self::WebSocket(t) => {
                let (r, w) = t.into_split();
                (AnyReader::WebSocket(r), AnyWriter::WebSocket(w))
            }
        }
    }
}
