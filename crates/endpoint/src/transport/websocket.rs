//! RFC 7395 WebSocket transport.
//!
//! Each WebSocket text message carries one complete XML frame. The stream
//! is opened with `<open/>` instead of `<stream:stream>` and there is no
//! STARTTLS; security comes from the `wss://` scheme.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{Transport, TransportConfig, TransportRead, TransportWrite};
use crate::XmppError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket connection using the `xmpp` subprotocol.
pub struct WebSocketTransport {
    stream: WsStream,
    secure: bool,
}

/// Read half of a [`WebSocketTransport`].
pub struct WebSocketReader(SplitStream<WsStream>);

/// Write half of a [`WebSocketTransport`].
pub struct WebSocketWriter(SplitSink<WsStream, Message>);

async fn next_frame<S>(stream: &mut S) -> Result<Vec<u8>, XmppError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
            Some(Ok(Message::Binary(data))) => return Ok(data),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(XmppError::Closed),
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Err(XmppError::Closed),
            Some(Err(e)) => return Err(XmppError::transport(e.to_string())),
        }
    }
}

fn text_message(data: &[u8]) -> Result<Message, XmppError> {
    String::from_utf8(data.to_vec())
        .map(Message::Text)
        .map_err(|_| XmppError::xml_parse("outbound frame is not valid UTF-8"))
}

fn ws_error(e: WsError) -> XmppError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => XmppError::Closed,
        other => XmppError::transport(other.to_string()),
    }
}

impl TransportRead for WebSocketTransport {
    async fn recv(&mut self) -> Result<Vec<u8>, XmppError> {
        next_frame(&mut self.stream).await
    }
}

impl TransportWrite for WebSocketTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), XmppError> {
        self.stream.send(text_message(data)?).await.map_err(ws_error)
    }

    async fn close(&mut self) -> Result<(), XmppError> {
        self.stream.close(None).await.map_err(ws_error)
    }
}

impl TransportRead for WebSocketReader {
    async fn recv(&mut self) -> Result<Vec<u8>, XmppError> {
        next_frame(&mut self.0).await
    }
}

impl TransportWrite for WebSocketWriter {
    async fn send(&mut self, data: &[u8]) -> Result<(), XmppError> {
        self.0.send(text_message(data)?).await.map_err(ws_error)
    }

    async fn close(&mut self) -> Result<(), XmppError> {
        SinkExt::close(&mut self.0).await.map_err(ws_error)
    }
}

impl Transport for WebSocketTransport {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    async fn connect(config: &TransportConfig) -> Result<Self, XmppError> {
        let url = config
            .websocket_url
            .as_deref()
            .ok_or_else(|| XmppError::config("no WebSocket URL configured"))?;
        let mut request = url
            .into_client_request()
            .map_err(|e| XmppError::config(format!("invalid WebSocket URL '{url}': {e}")))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("xmpp"));

        let secure = request.uri().scheme_str() == Some("wss");
        let connector = if secure {
            Connector::Rustls(config.tls_client_config()?)
        } else {
            Connector::Plain
        };

        let (stream, _response) = timeout(
            config.connect_timeout,
            connect_async_tls_with_config(request, None, true, Some(connector)),
        )
        .await
        .map_err(|_| XmppError::timeout(format!("connecting to {url}")))?
        .map_err(|e| XmppError::transport(format!("connecting to {url}: {e}")))?;

        debug!(url, secure, "WebSocket connection established");
        Ok(Self { stream, secure })
    }

    fn does_start_tls(&self) -> bool {
        false
    }

    async fn start_tls(self, _server_name: &str) -> Result<Self, XmppError> {
        Err(XmppError::negotiation("STARTTLS is not available over WebSocket"))
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn is_framed(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "websocket"
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.stream.split();
        (WebSocketReader(stream), WebSocketWriter(sink))
    }
}
