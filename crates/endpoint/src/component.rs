//! XEP-0114 external component.
//!
//! A component opens a `jabber:component:accept` stream, proves knowledge
//! of the shared secret with the handshake digest and then exchanges stanzas
//! like a client, without SASL, TLS or stream management. Disco queries
//! addressed to the component domain are answered from its options.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{duration_secs, with_default_port};
use crate::connection::{
    emit, run_keepalive, run_reader, Connection, ErrorHandler, EventSlot, Interceptor, PendingIq, PendingMap,
    ReaderContext,
};
use crate::jid::Jid;
use crate::metrics;
use crate::parser::{element_to_string, ns, StreamParser, DEFAULT_MAX_STANZA_SIZE};
use crate::registry::TypeRegistry;
use crate::router::{Router, Sender};
use crate::session::{set_state, Event, SessionState};
use crate::stanza::ext::disco::{DiscoInfo, DiscoItems, Identity};
use crate::stanza::stream::{stream_open, STREAM_CLOSE};
use crate::stanza::{Handshake, Iq, IqType, Packet};
use crate::stream_manager::StreamClient;
use crate::transport::tcp::TcpWriter;
use crate::transport::{Direction, StreamLogger, TcpTransport, Transport, TransportConfig, TransportWrite};
use crate::{lock, XmppError};

/// Default port of the component listener on most servers.
pub const DEFAULT_COMPONENT_PORT: u16 = 5347;

/// Hex-encoded SHA-1 of the stream ID followed by the shared secret.
pub fn handshake_digest(stream_id: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Component connection options.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ComponentOptions {
    /// `host:port` of the server's component listener
    pub address: String,
    /// Domain the component serves, e.g. `service.example.com`
    pub domain: String,
    /// Secret shared with the server
    pub secret: String,
    /// Disco identity name
    pub name: String,
    /// Disco identity category
    pub category: String,
    /// Disco identity type
    #[serde(rename = "type")]
    pub identity_type: String,
    /// Extra features advertised in disco#info
    pub features: Vec<String>,
    /// Bound on dialing plus the handshake, in seconds
    #[serde(deserialize_with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Interval of whitespace keepalives, in seconds; zero disables
    #[serde(deserialize_with = "duration_secs")]
    pub keepalive_interval: Duration,
    /// Consecutive transient failures the supervisor tolerates; zero is unlimited
    pub max_reconnect_attempts: u32,
    /// Cap on a single buffered inbound element
    pub max_stanza_size: usize,
    /// Sink for raw stream traffic
    #[serde(skip)]
    pub stream_logger: Option<Arc<dyn StreamLogger>>,
    /// Component-scoped extensions stacked on the process-wide registry
    #[serde(skip)]
    pub registry: Option<Arc<TypeRegistry>>,
}

impl Default for ComponentOptions {
    fn default() -> Self {
        Self {
            address: String::new(),
            domain: String::new(),
            secret: String::new(),
            name: String::new(),
            category: "gateway".to_string(),
            identity_type: "service".to_string(),
            features: Vec::new(),
            connect_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            max_stanza_size: DEFAULT_MAX_STANZA_SIZE,
            stream_logger: None,
            registry: None,
        }
    }
}

impl std::fmt::Debug for ComponentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentOptions")
            .field("address", &self.address)
            .field("domain", &self.domain)
            .field("secret", &"<redacted>")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("identity_type", &self.identity_type)
            .field("features", &self.features)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl ComponentOptions {
    /// Options for `domain` authenticating with `secret` at `address`.
    pub fn new(address: impl Into<String>, domain: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            domain: domain.into(),
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// Check the options and fill in derived defaults. Returns the domain JID.
    pub fn validate(&mut self) -> Result<Jid, XmppError> {
        let jid = Jid::parse(&self.domain)?;
        if !jid.is_bare() || jid.local().is_some() {
            return Err(XmppError::config(format!("'{}' is not a bare domain", self.domain)));
        }
        if self.secret.is_empty() {
            return Err(XmppError::config("a component secret is required"));
        }
        if self.address.is_empty() {
            self.address = jid.domain().to_string();
        }
        self.address = with_default_port(&self.address, DEFAULT_COMPONENT_PORT);
        Ok(jid)
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            address: self.address.clone(),
            websocket_url: None,
            connect_timeout: self.connect_timeout,
            insecure: true,
            tls_config: None,
        }
    }
}

/// Answers disco#info and disco#items queries addressed to the component
/// domain itself; everything else goes to the router.
fn disco_responder(domain: Jid, options: &ComponentOptions) -> Interceptor {
    let name = (!options.name.is_empty()).then(|| options.name.clone());
    let identity = Identity::new(options.category.clone(), options.identity_type.clone(), name);
    let mut features = vec![ns::DISCO_INFO.to_string(), ns::DISCO_ITEMS.to_string()];
    for feature in &options.features {
        if !features.contains(feature) {
            features.push(feature.clone());
        }
    }

    Arc::new(move |packet: &Packet| {
        let Packet::Iq(iq) = packet else {
            return None;
        };
        if iq.iq_type != IqType::Get {
            return None;
        }
        if iq.attrs.to.as_ref().is_some_and(|to| *to != domain) {
            return None;
        }
        if let Some(query) = iq.payload_as::<DiscoInfo>() {
            let info = DiscoInfo {
                node: query.node.clone(),
                identities: vec![identity.clone()],
                features: features.clone(),
                forms: Vec::new(),
            };
            return Some(Packet::Iq(iq.make_result_with(info)));
        }
        if let Some(query) = iq.payload_as::<DiscoItems>() {
            let items = DiscoItems {
                node: query.node.clone(),
                items: Vec::new(),
            };
            return Some(Packet::Iq(iq.make_result_with(items)));
        }
        None
    })
}

struct Handshaker<'a> {
    transport: &'a mut TcpTransport,
    parser: &'a mut StreamParser,
    options: &'a ComponentOptions,
}

impl Handshaker<'_> {
    async fn write_str(&mut self, data: &str) -> Result<(), XmppError> {
        if let Some(logger) = &self.options.stream_logger {
            logger.log(Direction::Outbound, data.as_bytes());
        }
        self.transport.send(data.as_bytes()).await
    }

    /// Open the stream and authenticate. Returns the stream ID.
    #[instrument(skip(self), fields(domain = %self.options.domain), name = "xmpp.component.handshake")]
    async fn run(&mut self) -> Result<String, XmppError> {
        let header = stream_open(&self.options.domain, ns::COMPONENT_ACCEPT, "en");
        self.write_str(&header).await?;

        let header = self.parser.init_stream(&mut *self.transport).await?;
        let stream_id = header
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| XmppError::negotiation("server stream header carries no id"))?;

        let handshake = Handshake {
            value: Some(handshake_digest(&stream_id, &self.options.secret)),
        };
        let xml = element_to_string(&handshake.to_element())?;
        self.write_str(&xml).await?;

        match self.parser.next_packet(&mut *self.transport).await? {
            Packet::Handshake(_) => {
                debug!(stream_id = %stream_id, "Component handshake accepted");
                Ok(stream_id)
            }
            Packet::StreamError(err) => Err(err.into_error()),
            Packet::StreamClose => Err(XmppError::auth_failed("stream closed during handshake")),
            other => Err(XmppError::negotiation(format!(
                "expected <handshake/>, got {}",
                other.name()
            ))),
        }
    }
}

struct ComponentInner {
    options: ComponentOptions,
    jid: Jid,
    router: Arc<Router>,
    error_handler: Option<ErrorHandler>,
    pending: PendingMap,
    events: EventSlot,
    state: Mutex<SessionState>,
    connection: Mutex<Option<Arc<Connection<TcpWriter>>>>,
    connect_lock: tokio::sync::Mutex<()>,
}

/// An external component session.
#[derive(Clone)]
pub struct Component {
    inner: Arc<ComponentInner>,
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("domain", &self.inner.jid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Component {
    /// Validate `options` and build a disconnected component.
    pub fn new(
        mut options: ComponentOptions,
        router: Router,
        error_handler: Option<ErrorHandler>,
    ) -> Result<Self, XmppError> {
        let jid = options.validate()?;
        Ok(Self {
            inner: Arc::new(ComponentInner {
                options,
                jid,
                router: Arc::new(router),
                error_handler,
                pending: Arc::new(Default::default()),
                events: Arc::new(Mutex::new(None)),
                state: Mutex::new(SessionState::New),
                connection: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// The validated options.
    pub fn options(&self) -> &ComponentOptions {
        &self.inner.options
    }

    /// Domain JID of the component.
    pub fn jid(&self) -> &Jid {
        &self.inner.jid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        let state = *lock(&self.inner.state);
        if state == SessionState::Running && self.connection().is_none() {
            return SessionState::Disconnected;
        }
        state
    }

    /// Whether the handshake succeeded and the stream is open.
    pub fn is_connected(&self) -> bool {
        self.connection().is_some()
    }

    /// Attach or detach (`None`) the event handler.
    pub fn set_event_handler(&self, handler: Option<mpsc::UnboundedSender<Event>>) {
        *lock(&self.inner.events) = handler;
    }

    fn connection(&self) -> Option<Arc<Connection<TcpWriter>>> {
        lock(&self.inner.connection).clone().filter(|conn| !conn.is_closed())
    }

    fn require_connection(&self) -> Result<Arc<Connection<TcpWriter>>, XmppError> {
        self.connection().ok_or(XmppError::NotConnected)
    }

    /// Connect and perform the handshake. One attempt, no retries.
    #[instrument(skip(self), fields(domain = %self.inner.jid), name = "xmpp.component.connect")]
    pub async fn connect(&self) -> Result<(), XmppError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.connection().is_some() {
            return Ok(());
        }
        let inner = &self.inner;
        let options = &inner.options;
        set_state(&inner.state, SessionState::Connecting);

        let dial_started = Instant::now();
        let dialed = TcpTransport::connect(&options.transport_config()).await;
        metrics::record_connect_duration(elapsed_ms(dial_started), "tcp", dialed.is_ok());
        let mut transport = match dialed {
            Ok(transport) => transport,
            Err(e) => {
                warn!(error = %e, address = %options.address, "Component connection failed");
                set_state(&inner.state, SessionState::Disconnected);
                return Err(e);
            }
        };
        set_state(&inner.state, SessionState::Connected);
        emit(&inner.events, Event::Connected);

        let mut parser = StreamParser::new(ns::COMPONENT_ACCEPT, options.max_stanza_size)
            .with_registry(options.registry.clone())
            .with_logger(options.stream_logger.clone());
        let login_started = Instant::now();
        let mut handshaker = Handshaker {
            transport: &mut transport,
            parser: &mut parser,
            options,
        };
        let result = match timeout(options.connect_timeout, handshaker.run()).await {
            Ok(result) => result,
            Err(_) => Err(XmppError::timeout("component handshake")),
        };
        metrics::record_login_duration(elapsed_ms(login_started), "component", result.is_ok());
        let stream_id = match result {
            Ok(stream_id) => stream_id,
            Err(e) => {
                warn!(error = %e, permanent = e.is_permanent(), "Component handshake failed");
                set_state(&inner.state, SessionState::Disconnected);
                return Err(e);
            }
        };

        let (reader, writer) = transport.into_split();
        let conn = Arc::new(Connection::new(
            writer,
            ns::COMPONENT_ACCEPT,
            None,
            options.stream_logger.clone(),
            STREAM_CLOSE.to_string(),
        ));
        *lock(&inner.connection) = Some(conn.clone());
        set_state(&inner.state, SessionState::SessionEstablished);
        info!(stream_id = %stream_id, "Component session established");
        emit(&inner.events, Event::SessionEstablished);

        let reader_ctx = ReaderContext {
            router: inner.router.clone(),
            sender: conn.clone(),
            pending: inner.pending.clone(),
            events: inner.events.clone(),
            error_handler: inner.error_handler.clone(),
            interceptor: Some(disco_responder(inner.jid.clone(), options)),
            local: Some(inner.jid.clone()),
        };
        tokio::spawn(run_reader(conn.clone(), reader, parser, reader_ctx));
        if !options.keepalive_interval.is_zero() {
            tokio::spawn(run_keepalive(conn, options.keepalive_interval));
        }
        set_state(&inner.state, SessionState::Running);
        Ok(())
    }

    /// Close the stream and the transport.
    pub async fn disconnect(&self) -> Result<(), XmppError> {
        let conn = lock(&self.inner.connection).take();
        let result = match conn {
            Some(conn) => {
                set_state(&self.inner.state, SessionState::Disconnecting);
                conn.close().await
            }
            None => Ok(()),
        };
        set_state(&self.inner.state, SessionState::Disconnected);
        result
    }

    /// Send a packet.
    pub async fn send(&self, packet: impl Into<Packet>) -> Result<(), XmppError> {
        self.require_connection()?.send_packet(&packet.into()).await
    }

    /// Send preformatted XML.
    pub async fn send_raw(&self, xml: &str) -> Result<(), XmppError> {
        self.require_connection()?.send_raw_xml(xml).await
    }

    /// Send an IQ request and register for its reply.
    pub async fn send_iq(&self, iq: Iq) -> Result<PendingIq, XmppError> {
        self.require_connection()?.send_iq(&self.inner.pending, iq).await
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[async_trait]
impl Sender for Component {
    async fn send(&self, packet: Packet) -> Result<(), XmppError> {
        Component::send(self, packet).await
    }

    async fn send_raw(&self, xml: &str) -> Result<(), XmppError> {
        Component::send_raw(self, xml).await
    }
}

#[async_trait]
impl StreamClient for Component {
    async fn connect(&self) -> Result<(), XmppError> {
        Component::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), XmppError> {
        Component::disconnect(self).await
    }

    fn set_event_handler(&self, handler: Option<mpsc::UnboundedSender<Event>>) {
        Component::set_event_handler(self, handler)
    }

    fn max_reconnect_attempts(&self) -> u32 {
        self.inner.options.max_reconnect_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza::decode;

    #[test]
    fn test_handshake_digest() {
        assert_eq!(
            handshake_digest("1263952298440005243", "mypass"),
            "c77e2ef0109fbbc5161e83b51629cd1353495332"
        );
    }

    #[test]
    fn test_options_defaults() {
        let mut options = ComponentOptions::new("", "service.localhost", "mypass");
        let jid = options.validate().unwrap();
        assert_eq!(jid.domain(), "service.localhost");
        assert_eq!(options.address, "service.localhost:5347");
        assert!(format!("{options:?}").contains("<redacted>"));
    }

    #[test]
    fn test_options_reject_user_jid() {
        let mut options = ComponentOptions::new("localhost:8888", "user@service.localhost", "mypass");
        assert!(matches!(options.validate(), Err(XmppError::Config(_))));
        let mut options = ComponentOptions::new("localhost:8888", "service.localhost", "");
        assert!(matches!(options.validate(), Err(XmppError::Config(_))));
    }

    fn responder() -> Interceptor {
        let options = ComponentOptions {
            name: "Gateway".into(),
            features: vec!["urn:xmpp:ping".into()],
            ..ComponentOptions::new("localhost:8888", "service.localhost", "mypass")
        };
        disco_responder("service.localhost".parse().unwrap(), &options)
    }

    fn iq(xml: &str) -> Packet {
        decode(&xml.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_disco_info_answer() {
        let reply = responder()(&iq(
            "<iq xmlns='jabber:component:accept' type='get' id='d1' from='user@localhost/r' to='service.localhost'>\
             <query xmlns='http://jabber.org/protocol/disco#info' node='n1'/></iq>",
        ))
        .unwrap();
        let Packet::Iq(reply) = reply else {
            panic!("expected an IQ reply");
        };
        assert_eq!(reply.iq_type, IqType::Result);
        assert_eq!(reply.id(), "d1");
        assert_eq!(reply.attrs.to, Some("user@localhost/r".parse().unwrap()));
        let info = reply.payload_as::<DiscoInfo>().unwrap();
        assert_eq!(info.node.as_deref(), Some("n1"));
        assert_eq!(info.identities[0].category, "gateway");
        assert_eq!(info.identities[0].name.as_deref(), Some("Gateway"));
        assert!(info.has_feature(ns::DISCO_INFO));
        assert!(info.has_feature("urn:xmpp:ping"));
    }

    #[test]
    fn test_disco_items_answer_is_empty() {
        let reply = responder()(&iq(
            "<iq xmlns='jabber:component:accept' type='get' id='d2' to='service.localhost'>\
             <query xmlns='http://jabber.org/protocol/disco#items'/></iq>",
        ))
        .unwrap();
        let Packet::Iq(reply) = reply else {
            panic!("expected an IQ reply");
        };
        assert!(reply.payload_as::<DiscoItems>().unwrap().items.is_empty());
    }

    #[test]
    fn test_other_packets_pass_through() {
        let responder = responder();
        assert!(responder(&iq(
            "<iq xmlns='jabber:component:accept' type='get' id='d3' to='user@service.localhost'>\
             <query xmlns='http://jabber.org/protocol/disco#info'/></iq>",
        ))
        .is_none());
        assert!(responder(&iq(
            "<iq xmlns='jabber:component:accept' type='get' id='p1' to='service.localhost'>\
             <ping xmlns='urn:xmpp:ping'/></iq>",
        ))
        .is_none());
        assert!(responder(&iq("<message xmlns='jabber:component:accept'><body>x</body></message>")).is_none());
    }
}
