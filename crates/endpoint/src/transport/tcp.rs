//! TCP transport with in-band STARTTLS.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::{tls, Transport, TransportConfig, TransportRead, TransportWrite};
use crate::XmppError;

const READ_BUFFER_SIZE: usize = 8192;

/// Object-safe duplex stream so plain and TLS sockets share one split type.
trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

enum Io {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// A TCP connection, upgraded to TLS after `<proceed/>`.
pub struct TcpTransport {
    io: Io,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    insecure: bool,
}

impl TcpTransport {
    fn stream(&mut self) -> &mut (dyn IoStream + 'static) {
        match &mut self.io {
            Io::Plain(stream) => stream as &mut (dyn IoStream + 'static),
            Io::Tls(stream) => stream.as_mut() as &mut (dyn IoStream + 'static),
        }
    }
}

async fn read_chunk<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<Vec<u8>, XmppError> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Err(XmppError::Closed);
    }
    buf.truncate(n);
    Ok(buf)
}

async fn write_chunk<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, data: &[u8]) -> Result<(), XmppError> {
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

impl TransportRead for TcpTransport {
    async fn recv(&mut self) -> Result<Vec<u8>, XmppError> {
        read_chunk(self.stream()).await
    }
}

impl TransportWrite for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), XmppError> {
        write_chunk(self.stream(), data).await
    }

    async fn close(&mut self) -> Result<(), XmppError> {
        self.stream().shutdown().await?;
        Ok(())
    }
}

/// Read half of a [`TcpTransport`].
pub struct TcpReader(ReadHalf<Box<dyn IoStream>>);

/// Write half of a [`TcpTransport`].
pub struct TcpWriter(WriteHalf<Box<dyn IoStream>>);

impl TransportRead for TcpReader {
    async fn recv(&mut self) -> Result<Vec<u8>, XmppError> {
        read_chunk(&mut self.0).await
    }
}

impl TransportWrite for TcpWriter {
    async fn send(&mut self, data: &[u8]) -> Result<(), XmppError> {
        write_chunk(&mut self.0, data).await
    }

    async fn close(&mut self) -> Result<(), XmppError> {
        self.0.shutdown().await?;
        Ok(())
    }
}

impl Transport for TcpTransport {
    type Reader = TcpReader;
    type Writer = TcpWriter;

    async fn connect(config: &TransportConfig) -> Result<Self, XmppError> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| XmppError::timeout(format!("connecting to {}", config.address)))?
            .map_err(|e| XmppError::transport(format!("connecting to {}: {e}", config.address)))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        debug!(address = %config.address, "TCP connection established");
        Ok(Self {
            io: Io::Plain(stream),
            tls_config: config.tls_config.clone(),
            insecure: config.insecure,
        })
    }

    fn does_start_tls(&self) -> bool {
        true
    }

    async fn start_tls(self, server_name: &str) -> Result<Self, XmppError> {
        let Io::Plain(stream) = self.io else {
            return Err(XmppError::negotiation("TLS is already active"));
        };
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| XmppError::security(format!("invalid server name '{server_name}': {e}")))?;
        let tls_config = match self.tls_config {
            Some(config) => config,
            None => tls::client_config(self.insecure)?,
        };
        let connector = TlsConnector::from(tls_config.clone());
        let tls = connector.connect(name, stream).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                XmppError::security(format!("TLS handshake with {server_name} failed: {e}"))
            } else {
                XmppError::transport(format!("TLS handshake with {server_name} failed: {e}"))
            }
        })?;
        debug!(server_name, "TLS established");
        Ok(Self {
            io: Io::Tls(Box::new(tls)),
            tls_config: Some(tls_config),
            insecure: self.insecure,
        })
    }

    fn is_secure(&self) -> bool {
        matches!(self.io, Io::Tls(_))
    }

    fn is_framed(&self) -> bool {
        false
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let boxed: Box<dyn IoStream> = match self.io {
            Io::Plain(stream) => Box::new(stream),
            Io::Tls(stream) => stream as Box<dyn IoStream>,
        };
        let (reader, writer) = tokio::io::split(boxed);
        (TcpReader(reader), TcpWriter(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn config(address: String) -> TransportConfig {
        TransportConfig {
            address,
            websocket_url: None,
            connect_timeout: Duration::from_secs(5),
            insecure: true,
            tls_config: None,
        }
    }

    #[tokio::test]
    async fn test_round_trip_and_split() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"world").await.unwrap();
        });

        let transport = TcpTransport::connect(&config(address)).await.unwrap();
        assert!(transport.does_start_tls());
        assert!(!transport.is_secure());
        let (mut reader, mut writer) = transport.into_split();
        writer.send(b"hello").await.unwrap();
        assert_eq!(reader.recv().await.unwrap(), b"world");
        server.await.unwrap();
        assert!(matches!(reader.recv().await, Err(XmppError::Closed)));
    }

    #[tokio::test]
    async fn test_refused_dial_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = TcpTransport::connect(&config(address)).await.err().unwrap();
        assert!(!err.is_permanent(), "{err}");
    }
}
