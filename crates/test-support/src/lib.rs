//! Scripted mock XMPP server.
//!
//! [`MockServer`] listens on an ephemeral local port and runs an async script
//! for every accepted connection. Scripts drive a [`MockConnection`], which
//! speaks raw XML: it frames inbound elements itself and never depends on
//! the endpoint library under test.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use minidom::Element;
use quick_xml::events::Event;
use quick_xml::Reader;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Default timeout for a single read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Streams namespace.
pub const NS_STREAM: &str = "http://etherx.jabber.org/streams";
/// Client namespace.
pub const NS_CLIENT: &str = "jabber:client";
/// Component namespace.
pub const NS_COMPONENT: &str = "jabber:component:accept";
const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
const NS_SM: &str = "urn:xmpp:sm:3";

/// Stream feature snippets for [`MockConnection::send_features`].
pub mod features {
    /// SASL PLAIN as the only mechanism.
    pub const SASL_PLAIN: &str =
        "<mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>";
    /// STARTTLS offer.
    pub const STARTTLS: &str = "<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>";
    /// Resource binding.
    pub const BIND: &str = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>";
    /// Legacy session, required.
    pub const SESSION: &str = "<session xmlns='urn:ietf:params:xml:ns:xmpp-session'/>";
    /// XEP-0198 stream management.
    pub const SM: &str = "<sm xmlns='urn:xmpp:sm:3'/>";
}

/// Mock server errors.
#[derive(Debug, Error)]
pub enum MockError {
    /// Socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nothing arrived in time
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// The peer closed the connection
    #[error("Connection closed by peer")]
    Closed,

    /// Inbound data is not well-formed
    #[error("XML error: {0}")]
    Xml(String),

    /// The peer sent something else than the script expected
    #[error("Expected {expected}, got {got}")]
    Unexpected {
        /// What the script waited for
        expected: String,
        /// What arrived
        got: String,
    },
}

impl MockError {
    fn unexpected(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::Unexpected {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

/// Result of a mock script step.
pub type MockResult<T> = Result<T, MockError>;

/// Attributes of the stream header sent by the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOpen {
    /// `to` attribute
    pub to: Option<String>,
    /// Default namespace
    pub xmlns: Option<String>,
    /// `version` attribute
    pub version: Option<String>,
}

/// A unit read from the peer.
#[derive(Debug)]
pub enum MockFrame {
    /// `<stream:stream>` opening tag
    Open(StreamOpen),
    /// A top-level element
    Element(Element),
    /// `</stream:stream>`
    Close,
}

enum Raw {
    Open(StreamOpen),
    Element(usize, usize),
    Close,
}

fn scan(buffer: &[u8]) -> MockResult<Option<(Raw, usize)>> {
    let text_start = buffer.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(buffer.len());
    if buffer[text_start..].starts_with(b"</stream:stream>") {
        return Ok(Some((Raw::Close, text_start + b"</stream:stream>".len())));
    }

    let mut reader = Reader::from_reader(buffer);
    let mut depth = 0_u32;
    let mut start = 0_usize;
    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) if depth == 0 && e.name().local_name().as_ref() == b"stream" => {
                let mut open = StreamOpen::default();
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match attr.key.as_ref() {
                        b"to" => open.to = Some(value),
                        b"xmlns" => open.xmlns = Some(value),
                        b"version" => open.version = Some(value),
                        _ => {}
                    }
                }
                return Ok(Some((Raw::Open(open), reader.buffer_position() as usize)));
            }
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    start = pos;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) if depth == 0 => {
                let end = reader.buffer_position() as usize;
                return Ok(Some((Raw::Element(pos, end), end)));
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return Err(MockError::Xml("unbalanced closing tag".into()));
                }
                depth -= 1;
                if depth == 0 {
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((Raw::Element(start, end), end)));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(quick_xml::Error::Syntax(_)) => return Ok(None),
            Err(e) => return Err(MockError::Xml(e.to_string())),
        }
    }
}

fn render(element: &Element) -> String {
    let mut out = Vec::new();
    match element.write_to(&mut out) {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => format!("<{}/>", element.name()),
    }
}

/// One accepted connection, driven by a script.
pub struct MockConnection {
    stream: TcpStream,
    buffer: Vec<u8>,
    index: usize,
    default_ns: String,
    stream_id: String,
}

impl MockConnection {
    fn new(stream: TcpStream, index: usize) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            index,
            default_ns: NS_CLIENT.to_string(),
            stream_id: String::new(),
        }
    }

    /// Zero-based accept order of this connection.
    pub fn index(&self) -> usize {
        self.index
    }

    /// ID of the last stream header sent by the mock.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn parse_element(&self, text: &[u8]) -> MockResult<Element> {
        let text = std::str::from_utf8(text).map_err(|e| MockError::Xml(e.to_string()))?;
        let document = format!(
            "<stream:stream xmlns='{}' xmlns:stream='{NS_STREAM}'>{text}</stream:stream>",
            self.default_ns
        );
        let root: Element = document.parse().map_err(|e: minidom::Error| MockError::Xml(e.to_string()))?;
        root.children()
            .next()
            .cloned()
            .ok_or_else(|| MockError::Xml("empty element".into()))
    }

    /// Read the next frame.
    pub async fn next_frame(&mut self) -> MockResult<MockFrame> {
        loop {
            if let Some((raw, consumed)) = scan(&self.buffer)? {
                let frame = match raw {
                    Raw::Open(open) => MockFrame::Open(open),
                    Raw::Element(start, end) => MockFrame::Element(self.parse_element(&self.buffer[start..end])?),
                    Raw::Close => MockFrame::Close,
                };
                self.buffer.drain(..consumed);
                return Ok(frame);
            }

            let mut chunk = [0_u8; 8192];
            let n = timeout(DEFAULT_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .map_err(|_| MockError::Timeout("inbound data".into()))??;
            if n == 0 {
                return Err(MockError::Closed);
            }
            trace!(data = %String::from_utf8_lossy(&chunk[..n]), "mock <<");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read the next top-level element.
    pub async fn next_element(&mut self) -> MockResult<Element> {
        match self.next_frame().await? {
            MockFrame::Element(element) => Ok(element),
            MockFrame::Open(_) => Err(MockError::unexpected("an element", "a stream header")),
            MockFrame::Close => Err(MockError::unexpected("an element", "</stream:stream>")),
        }
    }

    /// Expect the next element to have local name `name`.
    pub async fn expect(&mut self, name: &str) -> MockResult<Element> {
        let element = self.next_element().await?;
        if element.name() != name {
            return Err(MockError::unexpected(format!("<{name}/>"), format!("<{}/>", element.name())));
        }
        Ok(element)
    }

    /// Expect a stream header from the peer.
    pub async fn expect_stream_open(&mut self) -> MockResult<StreamOpen> {
        match self.next_frame().await? {
            MockFrame::Open(open) => {
                if let Some(xmlns) = &open.xmlns {
                    self.default_ns = xmlns.clone();
                }
                Ok(open)
            }
            MockFrame::Element(element) => Err(MockError::unexpected("a stream header", element.name())),
            MockFrame::Close => Err(MockError::unexpected("a stream header", "</stream:stream>")),
        }
    }

    /// Expect the peer to close its stream.
    pub async fn expect_close(&mut self) -> MockResult<()> {
        match self.next_frame().await? {
            MockFrame::Close => Ok(()),
            MockFrame::Element(element) => Err(MockError::unexpected("</stream:stream>", element.name())),
            MockFrame::Open(_) => Err(MockError::unexpected("</stream:stream>", "a stream header")),
        }
    }

    /// Write raw XML.
    pub async fn send_raw(&mut self, xml: &str) -> MockResult<()> {
        trace!(data = %xml, "mock >>");
        self.stream.write_all(xml.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Answer a stream header with ours, carrying `id`.
    pub async fn send_stream_open(&mut self, from: &str, id: &str) -> MockResult<()> {
        self.stream_id = id.to_string();
        let header = format!(
            "<?xml version='1.0'?><stream:stream xmlns='{}' xmlns:stream='{NS_STREAM}' \
             from='{from}' id='{id}' version='1.0' xml:lang='en'>",
            self.default_ns
        );
        self.send_raw(&header).await
    }

    /// Send `<stream:features/>` wrapping the given snippets.
    pub async fn send_features(&mut self, features: &[&str]) -> MockResult<()> {
        let xml = format!("<stream:features>{}</stream:features>", features.concat());
        self.send_raw(&xml).await
    }

    /// Expect a stream header, answer it and send `features`.
    pub async fn open_stream(&mut self, from: &str, id: &str, features: &[&str]) -> MockResult<StreamOpen> {
        let open = self.expect_stream_open().await?;
        self.send_stream_open(from, id).await?;
        self.send_features(features).await?;
        Ok(open)
    }

    /// Expect SASL PLAIN and accept it. Returns the username and password.
    pub async fn accept_plain_auth(&mut self) -> MockResult<(String, String)> {
        let auth = self.expect("auth").await?;
        if auth.attr("mechanism") != Some("PLAIN") {
            return Err(MockError::unexpected("mechanism PLAIN", format!("{:?}", auth.attr("mechanism"))));
        }
        let decoded = BASE64_STANDARD
            .decode(auth.text().trim())
            .map_err(|e| MockError::Xml(e.to_string()))?;
        let decoded = String::from_utf8_lossy(&decoded).into_owned();
        let mut parts = decoded.split('\0').skip(1);
        let user = parts.next().unwrap_or_default().to_string();
        let password = parts.next().unwrap_or_default().to_string();
        self.send_raw(&format!("<success xmlns='{NS_SASL}'/>")).await?;
        debug!(user = %user, "mock accepted SASL PLAIN");
        Ok((user, password))
    }

    /// Expect SASL and fail it with `condition`.
    pub async fn reject_auth(&mut self, condition: &str) -> MockResult<()> {
        self.expect("auth").await?;
        self.send_raw(&format!("<failure xmlns='{NS_SASL}'><{condition}/></failure>")).await
    }

    /// Expect a bind request and bind `jid`. Returns the request.
    pub async fn answer_bind(&mut self, jid: &str) -> MockResult<Element> {
        let iq = self.expect("iq").await?;
        if !iq.has_child("bind", NS_BIND) {
            return Err(MockError::unexpected("a bind request", render(&iq)));
        }
        let id = iq.attr("id").unwrap_or_default().to_string();
        self.send_raw(&format!(
            "<iq type='result' id='{id}'><bind xmlns='{NS_BIND}'><jid>{jid}</jid></bind></iq>"
        ))
        .await?;
        Ok(iq)
    }

    /// Expect a session request and confirm it.
    pub async fn answer_session(&mut self) -> MockResult<Element> {
        let iq = self.expect("iq").await?;
        let id = iq.attr("id").unwrap_or_default().to_string();
        self.send_raw(&format!("<iq type='result' id='{id}'/>")).await?;
        Ok(iq)
    }

    /// Expect `<enable/>` and confirm it with a resumable `id`.
    pub async fn accept_sm_enable(&mut self, id: &str) -> MockResult<Element> {
        let enable = self.expect("enable").await?;
        self.send_raw(&format!("<enabled xmlns='{NS_SM}' id='{id}' resume='true'/>"))
            .await?;
        Ok(enable)
    }

    /// Expect `<resume/>`. Returns its `previd` and `h`.
    pub async fn expect_resume(&mut self) -> MockResult<(String, u32)> {
        let resume = self.expect("resume").await?;
        let previd = resume.attr("previd").unwrap_or_default().to_string();
        let h = resume
            .attr("h")
            .and_then(|h| h.parse().ok())
            .ok_or_else(|| MockError::unexpected("an h attribute", render(&resume)))?;
        Ok((previd, h))
    }

    /// Acknowledge `h` stanzas.
    pub async fn send_ack(&mut self, h: u32) -> MockResult<()> {
        self.send_raw(&format!("<a xmlns='{NS_SM}' h='{h}'/>")).await
    }

    /// Expect the XEP-0114 handshake for `secret` and accept it.
    pub async fn expect_handshake(&mut self, secret: &str) -> MockResult<()> {
        let handshake = self.expect("handshake").await?;
        let mut hasher = Sha1::new();
        hasher.update(self.stream_id.as_bytes());
        hasher.update(secret.as_bytes());
        let expected = hex::encode(hasher.finalize());
        if handshake.text() != expected {
            return Err(MockError::unexpected(expected, handshake.text()));
        }
        self.send_raw("<handshake/>").await
    }

    /// Close our stream and the socket.
    pub async fn close(mut self) -> MockResult<()> {
        self.send_raw("</stream:stream>").await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Drop the socket without closing the stream.
    pub fn drop_connection(self) {
        debug!(index = self.index, "mock dropping connection");
    }
}

/// Listens for connections and runs a script on each.
pub struct MockServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    outcomes: mpsc::UnboundedReceiver<MockResult<()>>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Start listening on an ephemeral port.
    pub async fn start<F, Fut>(script: F) -> MockResult<Self>
    where
        F: Fn(MockConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockResult<()>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        let (tx, outcomes) = mpsc::unbounded_channel();

        let counter = accepted.clone();
        let task = tokio::spawn(async move {
            let script = Arc::new(script);
            while let Ok((stream, peer)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                debug!(index, %peer, "mock accepted connection");
                let script = script.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = script(MockConnection::new(stream, index)).await;
                    let _ = tx.send(outcome);
                });
            }
        });

        Ok(Self {
            addr,
            accepted,
            outcomes,
            task,
        })
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `host:port` string for client configuration.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Outcome of the next script to finish.
    pub async fn next_outcome(&mut self) -> MockResult<()> {
        match timeout(DEFAULT_TIMEOUT, self.outcomes.recv()).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => Err(MockError::Closed),
            Err(_) => Err(MockError::Timeout("a script to finish".into())),
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_header_then_elements() {
        let data = b"<?xml version='1.0'?><stream:stream xmlns='jabber:client' to='localhost' version='1.0'>";
        let (raw, consumed) = scan(data).unwrap().unwrap();
        let Raw::Open(open) = raw else {
            panic!("expected a header");
        };
        assert_eq!(open.to.as_deref(), Some("localhost"));
        assert_eq!(open.xmlns.as_deref(), Some(NS_CLIENT));
        assert_eq!(consumed, data.len());

        let data = b" <iq type='get' id='1'><ping xmlns='urn:xmpp:ping'/></iq><r xmlns='urn:xmpp:sm:3'/>";
        let (raw, consumed) = scan(data).unwrap().unwrap();
        assert!(matches!(raw, Raw::Element(1, _)));
        assert!(data[consumed..].starts_with(b"<r "));
    }

    #[test]
    fn test_scan_waits_for_complete_element() {
        assert!(scan(b"<iq type='get'><ping xmlns='urn:xmpp:ping'/>").unwrap().is_none());
        assert!(scan(b"<iq ty").unwrap().is_none());
        assert!(matches!(scan(b"  </stream:stream>").unwrap(), Some((Raw::Close, 18))));
    }

    #[tokio::test]
    async fn test_mock_server_round_trip() {
        let mut server = MockServer::start(|mut conn| async move {
            let open = conn.open_stream("localhost", "S1", &[features::SASL_PLAIN]).await?;
            assert_eq!(open.to.as_deref(), Some("localhost"));
            let element = conn.expect("presence").await?;
            assert_eq!(element.ns(), NS_CLIENT);
            conn.close().await
        })
        .await
        .unwrap();

        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        stream
            .write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' to='localhost' version='1.0'>")
            .await
            .unwrap();
        stream.write_all(b"<presence/>").await.unwrap();

        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        let received = String::from_utf8(received).unwrap();
        assert!(received.contains("id='S1'"));
        assert!(received.contains("<mechanism>PLAIN</mechanism>"));
        assert!(received.ends_with("</stream:stream>"));

        server.next_outcome().await.unwrap();
        assert_eq!(server.accepted(), 1);
    }
}
