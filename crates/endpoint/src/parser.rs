//! Incremental XML framing and the packet pump for XMPP streams.
//!
//! XMPP uses a single long-lived XML document per session. The framer scans
//! the inbound byte buffer with quick-xml to find top-level element
//! boundaries; each complete element is then parsed into a minidom tree in
//! the namespace context of the stream header and decoded into a [`Packet`].

use std::sync::Arc;

use minidom::Element;
use quick_xml::errors::SyntaxError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, trace};

use crate::registry::{ScopedRegistry, TypeRegistry};
use crate::stanza::{self, Packet};
use crate::transport::{Direction, StreamLogger, TransportRead};
use crate::XmppError;

/// Namespace URIs used in XMPP
pub mod ns {
    /// XMPP client namespace
    pub const JABBER_CLIENT: &str = "jabber:client";
    /// XEP-0114 component namespace
    pub const COMPONENT_ACCEPT: &str = "jabber:component:accept";
    /// XMPP streams namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// RFC 7395 WebSocket framing namespace
    pub const FRAMING: &str = "urn:ietf:params:xml:ns:xmpp-framing";
    /// Stream error conditions namespace
    pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
    /// STARTTLS namespace
    pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
    /// SASL namespace
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    /// Resource binding namespace
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    /// Session namespace (RFC 3921)
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    /// Stanza error namespace
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    /// Stream Management namespace (XEP-0198)
    pub const SM: &str = "urn:xmpp:sm:3";
    /// Service discovery info (XEP-0030)
    pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
    /// Service discovery items (XEP-0030)
    pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
    /// Roster namespace (RFC 6121)
    pub const ROSTER: &str = "jabber:iq:roster";
    /// Publish-Subscribe (XEP-0060)
    pub const PUBSUB: &str = "http://jabber.org/protocol/pubsub";
    /// Publish-Subscribe owner use cases (XEP-0060)
    pub const PUBSUB_OWNER: &str = "http://jabber.org/protocol/pubsub#owner";
    /// Publish-Subscribe event notifications (XEP-0060)
    pub const PUBSUB_EVENT: &str = "http://jabber.org/protocol/pubsub#event";
    /// Multi-User Chat (XEP-0045)
    pub const MUC: &str = "http://jabber.org/protocol/muc";
    /// Multi-User Chat user namespace (XEP-0045)
    pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
    /// Delayed delivery (XEP-0203)
    pub const DELAY: &str = "urn:xmpp:delay";
    /// Stanza forwarding (XEP-0297)
    pub const FORWARD: &str = "urn:xmpp:forward:0";
    /// Chat markers (XEP-0333)
    pub const CHAT_MARKERS: &str = "urn:xmpp:chat-markers:0";
    /// Chat state notifications (XEP-0085)
    pub const CHAT_STATES: &str = "http://jabber.org/protocol/chatstates";
    /// Message processing hints (XEP-0334)
    pub const HINTS: &str = "urn:xmpp:hints";
    /// Message delivery receipts (XEP-0184)
    pub const RECEIPTS: &str = "urn:xmpp:receipts";
    /// Out of band data, message form (XEP-0066)
    pub const OOB_X: &str = "jabber:x:oob";
    /// Out of band data, IQ form (XEP-0066)
    pub const OOB_IQ: &str = "jabber:iq:oob";
    /// XHTML-IM wrapper (XEP-0071)
    pub const XHTML_IM: &str = "http://jabber.org/protocol/xhtml-im";
    /// XHTML body namespace (XEP-0071)
    pub const XHTML: &str = "http://www.w3.org/1999/xhtml";
    /// Unique and stable stanza IDs (XEP-0359)
    pub const SID: &str = "urn:xmpp:sid:0";
    /// Message archive management (XEP-0313)
    pub const MAM: &str = "urn:xmpp:mam:2";
    /// Result set management (XEP-0059)
    pub const RSM: &str = "http://jabber.org/protocol/rsm";
    /// Ad-hoc commands (XEP-0050)
    pub const COMMANDS: &str = "http://jabber.org/protocol/commands";
    /// Data forms (XEP-0004)
    pub const DATA_FORMS: &str = "jabber:x:data";
    /// HTTP request verification (XEP-0070)
    pub const HTTP_AUTH: &str = "http://jabber.org/protocol/http-auth";
    /// IoT control (XEP-0325)
    pub const IOT_CONTROL: &str = "urn:xmpp:iot:control";
    /// Software version (XEP-0092)
    pub const VERSION: &str = "jabber:iq:version";
    /// XMPP ping (XEP-0199)
    pub const PING: &str = "urn:xmpp:ping";
}

/// Default cap on buffered inbound XML.
pub const DEFAULT_MAX_STANZA_SIZE: usize = 1024 * 1024;

/// Parsed stream header information.
///
/// Covers both `<stream:stream>` and the RFC 7395 `<open/>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHeader {
    /// The 'to' attribute (target domain)
    pub to: Option<String>,
    /// The 'from' attribute (source domain)
    pub from: Option<String>,
    /// The 'id' attribute (stream ID, set by server)
    pub id: Option<String>,
    /// The 'version' attribute (should be "1.0")
    pub version: Option<String>,
    /// The 'xml:lang' attribute
    pub lang: Option<String>,
    /// Whether this came from WebSocket framing (`<open/>`)
    pub framed: bool,
}

impl StreamHeader {
    fn from_start(start: &BytesStart<'_>, framed: bool) -> Self {
        let mut header = StreamHeader {
            framed,
            ..Default::default()
        };
        for attr in start.attributes().flatten() {
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            match attr.key.as_ref() {
                b"to" => header.to = Some(value),
                b"from" => header.from = Some(value),
                b"id" => header.id = Some(value),
                b"version" => header.version = Some(value),
                b"xml:lang" => header.lang = Some(value),
                _ => {}
            }
        }
        header
    }

    /// Validate the stream header per RFC 6120.
    pub fn validate(&self) -> Result<(), XmppError> {
        if let Some(ref version) = self.version {
            if version != "1.0" {
                return Err(XmppError::negotiation(format!(
                    "Unsupported XMPP version: {}",
                    version
                )));
            }
        }
        Ok(())
    }
}

/// A unit extracted from the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A stream header (`<stream:stream>` or `<open/>`)
    StreamOpen(StreamHeader),
    /// A complete top-level element
    Element(Element),
    /// `</stream:stream>` or `<close/>`
    StreamClose,
}

/// Raw boundary found by [`extract_frame`].
#[derive(Debug, PartialEq)]
enum RawFrame {
    Open {
        header: StreamHeader,
        /// Opening tag without any XML declaration before it
        tag: String,
        /// Qualified name of the stream element
        qname: String,
    },
    Element(String),
    Close,
}

#[derive(PartialEq)]
enum ScanState {
    Idle,
    InElement,
}

fn is_framing(start: &BytesStart<'_>) -> bool {
    start
        .attributes()
        .flatten()
        .any(|a| a.key.as_ref() == b"xmlns" && a.value.as_ref() == ns::FRAMING.as_bytes())
}

fn utf8(bytes: &[u8]) -> Result<String, XmppError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| XmppError::xml_parse("stream is not valid UTF-8"))
}

/// Find the next complete frame at the start of `buffer`.
///
/// Returns the frame and the number of bytes it consumed, or `None` when more
/// data is needed.
fn extract_frame(buffer: &[u8]) -> Result<Option<(RawFrame, usize)>, XmppError> {
    let mut reader = Reader::from_reader(buffer);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;

    let mut depth: u32 = 0;
    let mut state = ScanState::Idle;
    let mut element_start: usize = 0;

    loop {
        let pos = reader.buffer_position() as usize;

        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::PI(_)) | Ok(Event::Comment(_)) | Ok(Event::DocType(_)) => {
                continue;
            }
            Ok(Event::Start(e)) => {
                if state == ScanState::Idle && e.name().local_name().as_ref() == b"stream" {
                    let end = reader.buffer_position() as usize;
                    let qname = utf8(e.name().as_ref())?;
                    let frame = RawFrame::Open {
                        header: StreamHeader::from_start(&e, false),
                        tag: utf8(&buffer[pos..end])?,
                        qname,
                    };
                    return Ok(Some((frame, end)));
                }

                depth += 1;
                if state == ScanState::Idle && depth == 1 {
                    state = ScanState::InElement;
                    element_start = pos;
                }
            }
            Ok(Event::Empty(e)) => {
                if state == ScanState::Idle && depth == 0 {
                    let end = reader.buffer_position() as usize;
                    let local = e.name().local_name();
                    if local.as_ref() == b"open" && is_framing(&e) {
                        let frame = RawFrame::Open {
                            header: StreamHeader::from_start(&e, true),
                            tag: String::new(),
                            qname: String::new(),
                        };
                        return Ok(Some((frame, end)));
                    }
                    if local.as_ref() == b"close" && is_framing(&e) {
                        return Ok(Some((RawFrame::Close, end)));
                    }
                    return Ok(Some((RawFrame::Element(utf8(&buffer[pos..end])?), end)));
                }
            }
            Ok(Event::Text(_)) | Ok(Event::CData(_)) => {}
            Ok(Event::End(e)) => {
                if depth == 0 {
                    if e.name().local_name().as_ref() == b"stream" {
                        return Ok(Some((RawFrame::Close, reader.buffer_position() as usize)));
                    }
                    return Err(XmppError::xml_parse(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }

                depth -= 1;
                if state == ScanState::InElement && depth == 0 {
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((RawFrame::Element(utf8(&buffer[element_start..end])?), end)));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            // `<!` followed by anything but a comment, CDATA or DOCTYPE can
            // never become valid with more input.
            Err(quick_xml::Error::Syntax(SyntaxError::InvalidBangMarkup)) => {
                return Err(XmppError::xml_parse(SyntaxError::InvalidBangMarkup.to_string()));
            }
            // Partial markup at the end of the buffer; wait for the next read.
            Err(quick_xml::Error::Syntax(_)) => return Ok(None),
            Err(e) => return Err(XmppError::xml_parse(e.to_string())),
        }
    }
}

/// Incremental framer for one XMPP stream.
///
/// Accumulates inbound bytes and yields [`Frame`]s. Elements are parsed in
/// the namespace context of the most recent stream header so prefixed
/// elements such as `<stream:features>` resolve correctly.
#[derive(Debug)]
pub struct XmlFramer {
    buffer: Vec<u8>,
    max_size: usize,
    default_ns: &'static str,
    /// Opening tag and closing tag used to wrap each element for parsing
    context: Option<(String, String)>,
}

impl XmlFramer {
    /// Create a framer for a stream whose default namespace is `default_ns`.
    pub fn new(default_ns: &'static str, max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(8192),
            max_size,
            default_ns,
            context: None,
        }
    }

    /// Feed data into the framer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet framed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Forget the stream context, as required after a stream restart.
    pub fn reset(&mut self) {
        self.context = None;
    }

    /// Drop all buffered bytes and the stream context.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.context = None;
    }

    /// Try to extract the next frame from the buffered data.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, XmppError> {
        let Some((raw, consumed)) = extract_frame(&self.buffer)? else {
            if self.buffer.len() > self.max_size {
                return Err(XmppError::stream(
                    crate::error::stream_errors::POLICY_VIOLATION,
                    Some(format!("inbound element exceeds {} bytes", self.max_size)),
                ));
            }
            return Ok(None);
        };
        self.buffer.drain(..consumed);

        let frame = match raw {
            RawFrame::Open { header, tag, qname } => {
                self.context = (!tag.is_empty()).then(|| (tag, format!("</{qname}>")));
                Frame::StreamOpen(header)
            }
            RawFrame::Element(text) => Frame::Element(self.parse_element(&text)?),
            RawFrame::Close => Frame::StreamClose,
        };
        Ok(Some(frame))
    }

    fn parse_element(&self, text: &str) -> Result<Element, XmppError> {
        let document = match &self.context {
            Some((open, close)) => format!("{open}{text}{close}"),
            None => format!(
                "<stream:stream xmlns='{}' xmlns:stream='{}'>{text}</stream:stream>",
                self.default_ns,
                ns::STREAM
            ),
        };

        let root: Element = document
            .parse()
            .map_err(|e: minidom::Error| XmppError::xml_parse(e.to_string()))?;
        root.children()
            .next()
            .cloned()
            .ok_or_else(|| XmppError::xml_parse("empty element"))
    }
}

/// Serialize an element to a string.
pub fn element_to_string(element: &Element) -> Result<String, XmppError> {
    let mut output = Vec::new();
    element
        .write_to(&mut output)
        .map_err(|e| XmppError::xml_parse(e.to_string()))?;
    String::from_utf8(output).map_err(|e| XmppError::xml_parse(e.to_string()))
}

/// The packet pump: reads from a transport and yields frames and packets.
pub struct StreamParser {
    framer: XmlFramer,
    registry: Option<Arc<TypeRegistry>>,
    logger: Option<Arc<dyn StreamLogger>>,
}

impl StreamParser {
    /// Create a parser for a stream in the given default namespace.
    pub fn new(default_ns: &'static str, max_size: usize) -> Self {
        Self {
            framer: XmlFramer::new(default_ns, max_size),
            registry: None,
            logger: None,
        }
    }

    /// Stack a session-scoped registry on top of the process-wide one.
    pub fn with_registry(mut self, registry: Option<Arc<TypeRegistry>>) -> Self {
        self.registry = registry;
        self
    }

    /// Mirror every inbound chunk to a stream logger.
    pub fn with_logger(mut self, logger: Option<Arc<dyn StreamLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// Forget the stream context before a stream restart.
    pub fn reset(&mut self) {
        self.framer.reset();
    }

    /// Drop buffered data, e.g. after a TLS upgrade.
    pub fn clear(&mut self) {
        self.framer.clear();
    }

    /// Read the next frame, pulling data from the transport as needed.
    pub async fn next_frame<R: TransportRead + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<Frame, XmppError> {
        loop {
            if let Some(frame) = self.framer.next_frame()? {
                return Ok(frame);
            }
            let data = reader.recv().await?;
            if let Some(logger) = &self.logger {
                logger.log(Direction::Inbound, &data);
            }
            trace!(bytes = data.len(), "xmpp.stream.recv");
            self.framer.feed(&data);
        }
    }

    /// Read the next complete element. A stream close or header here is a
    /// negotiation error.
    pub async fn next_element<R: TransportRead + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<Element, XmppError> {
        match self.next_frame(reader).await? {
            Frame::Element(element) => Ok(element),
            Frame::StreamClose => Err(XmppError::Closed),
            Frame::StreamOpen(_) => Err(XmppError::negotiation("unexpected stream header")),
        }
    }

    /// Expect a stream header and return its stream ID.
    ///
    /// Accepts `<stream:stream>` and the WebSocket `<open/>`. A stream error
    /// sent instead of a header is surfaced as [`XmppError::Stream`].
    pub async fn init_stream<R: TransportRead + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<StreamHeader, XmppError> {
        match self.next_frame(reader).await? {
            Frame::StreamOpen(header) => {
                header.validate()?;
                debug!(stream_id = ?header.id, framed = header.framed, "Stream opened by peer");
                Ok(header)
            }
            Frame::Element(element) => match self.decode(&element)? {
                Packet::StreamError(err) => Err(err.into_error()),
                other => Err(XmppError::negotiation(format!(
                    "expected stream header, got {}",
                    other.name()
                ))),
            },
            Frame::StreamClose => Err(XmppError::Closed),
        }
    }

    /// Read and decode the next packet.
    pub async fn next_packet<R: TransportRead + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<Packet, XmppError> {
        match self.next_frame(reader).await? {
            Frame::Element(element) => self.decode(&element),
            Frame::StreamClose => Ok(Packet::StreamClose),
            Frame::StreamOpen(_) => Err(XmppError::negotiation("unexpected stream header")),
        }
    }

    /// Decode an element using the scoped registry stack.
    pub fn decode(&self, element: &Element) -> Result<Packet, XmppError> {
        let registry = ScopedRegistry::new(self.registry.as_deref());
        stanza::decode_packet(element, &registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer() -> XmlFramer {
        XmlFramer::new(ns::JABBER_CLIENT, DEFAULT_MAX_STANZA_SIZE)
    }

    const HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
        xmlns:stream='http://etherx.jabber.org/streams' id='abc123' from='localhost' \
        version='1.0' xml:lang='en'>";

    #[test]
    fn test_stream_header_extraction() {
        let mut framer = framer();
        framer.feed(HEADER.as_bytes());
        let frame = framer.next_frame().unwrap().unwrap();
        let Frame::StreamOpen(header) = frame else {
            panic!("expected header, got {frame:?}");
        };
        assert_eq!(header.id.as_deref(), Some("abc123"));
        assert_eq!(header.from.as_deref(), Some("localhost"));
        assert_eq!(header.lang.as_deref(), Some("en"));
        assert!(!header.framed);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_prefixed_features_resolve_in_stream_context() {
        let mut framer = framer();
        framer.feed(HEADER.as_bytes());
        framer.feed(b"<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>");
        assert!(matches!(framer.next_frame().unwrap(), Some(Frame::StreamOpen(_))));
        let Some(Frame::Element(features)) = framer.next_frame().unwrap() else {
            panic!("expected features element");
        };
        assert_eq!(features.name(), "features");
        assert_eq!(features.ns(), ns::STREAM);
        assert!(features.has_child("bind", ns::BIND));
    }

    #[test]
    fn test_partial_element_waits_for_more_data() {
        let mut framer = framer();
        framer.feed(HEADER.as_bytes());
        framer.next_frame().unwrap();

        framer.feed(b"<message to='a@b'><body>hel");
        assert!(framer.next_frame().unwrap().is_none());
        framer.feed(b"lo</body></mess");
        assert!(framer.next_frame().unwrap().is_none());
        framer.feed(b"age>");

        let Some(Frame::Element(message)) = framer.next_frame().unwrap() else {
            panic!("expected message");
        };
        assert_eq!(message.ns(), ns::JABBER_CLIENT);
        assert_eq!(message.get_child("body", ns::JABBER_CLIENT).unwrap().text(), "hello");
    }

    #[test]
    fn test_multiple_elements_in_one_read() {
        let mut framer = framer();
        framer.feed(HEADER.as_bytes());
        framer.feed(b"<r xmlns='urn:xmpp:sm:3'/> <presence/><iq type='get' id='1'><ping xmlns='urn:xmpp:ping'/></iq>");
        framer.next_frame().unwrap();

        let names: Vec<String> = std::iter::from_fn(|| match framer.next_frame().unwrap() {
            Some(Frame::Element(e)) => Some(e.name().to_string()),
            _ => None,
        })
        .collect();
        assert_eq!(names, vec!["r", "presence", "iq"]);
    }

    #[test]
    fn test_stream_close() {
        let mut framer = framer();
        framer.feed(HEADER.as_bytes());
        framer.next_frame().unwrap();
        framer.feed(b"\n</stream:stream>");
        assert_eq!(framer.next_frame().unwrap(), Some(Frame::StreamClose));
    }

    #[test]
    fn test_websocket_open_and_close() {
        let mut framer = framer();
        framer.feed(b"<open xmlns='urn:ietf:params:xml:ns:xmpp-framing' from='example.com' id='ws-1' version='1.0'/>");
        let Some(Frame::StreamOpen(header)) = framer.next_frame().unwrap() else {
            panic!("expected open");
        };
        assert!(header.framed);
        assert_eq!(header.id.as_deref(), Some("ws-1"));

        framer.feed(b"<features xmlns='http://etherx.jabber.org/streams'/>");
        let Some(Frame::Element(features)) = framer.next_frame().unwrap() else {
            panic!("expected features");
        };
        assert_eq!(features.ns(), ns::STREAM);

        framer.feed(b"<close xmlns='urn:ietf:params:xml:ns:xmpp-framing'/>");
        assert_eq!(framer.next_frame().unwrap(), Some(Frame::StreamClose));
    }

    #[test]
    fn test_oversized_buffer_is_rejected() {
        let mut framer = XmlFramer::new(ns::JABBER_CLIENT, 64);
        framer.feed(HEADER.as_bytes());
        framer.next_frame().unwrap();
        framer.feed(format!("<message><body>{}", "x".repeat(128)).as_bytes());
        let err = framer.next_frame().unwrap_err();
        assert_eq!(err.stream_condition(), Some("policy-violation"));
    }

    #[test]
    fn test_stray_end_tag_is_an_error() {
        let mut framer = framer();
        framer.feed(HEADER.as_bytes());
        framer.next_frame().unwrap();
        framer.feed(b"</message>");
        assert!(matches!(framer.next_frame(), Err(XmppError::XmlParse(_))));
    }

    #[test]
    fn test_invalid_markup_fails_immediately() {
        let mut framer = framer();
        framer.feed(HEADER.as_bytes());
        framer.next_frame().unwrap();
        framer.feed(b"<!bogus>");
        assert!(matches!(framer.next_frame(), Err(XmppError::XmlParse(_))));
    }

    #[test]
    fn test_unclosed_comment_waits_for_more() {
        let mut framer = framer();
        framer.feed(HEADER.as_bytes());
        framer.next_frame().unwrap();
        framer.feed(b"<!-- still");
        assert!(framer.next_frame().unwrap().is_none());
        framer.feed(b" going --><presence/>");
        assert!(matches!(framer.next_frame().unwrap(), Some(Frame::Element(_))));
    }

    #[test]
    fn test_header_validation() {
        let header = StreamHeader {
            version: Some("0.9".into()),
            ..Default::default()
        };
        assert!(header.validate().is_err());
        assert!(StreamHeader::default().validate().is_ok());
    }
}
