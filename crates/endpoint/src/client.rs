//! XMPP client.
//!
//! A [`Client`] owns the configuration and the state that outlives a single
//! connection: the stream management counters and queue, pending IQs and the
//! event handler. [`Client::connect`] performs exactly one connection
//! attempt; retries belong to the [`StreamManager`](crate::StreamManager).

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::connection::{
    emit, run_keepalive, run_reader, Connection, ErrorHandler, EventSlot, PendingIq, PendingMap, ReaderContext,
};
use crate::jid::Jid;
use crate::metrics;
use crate::parser::ns;
use crate::router::{Router, Sender};
use crate::session::{self, set_state, Event, SessionContext, SessionState};
use crate::stanza::stream::{framed_close, STREAM_CLOSE};
use crate::stanza::{Iq, Packet};
use crate::stream_management::StreamManagement;
use crate::stream_manager::StreamClient;
use crate::transport::{AnyTransport, Transport};
use crate::{lock, XmppError};

/// Snapshot of the stream management engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmStatus {
    /// Counting is active on the current stream
    pub enabled: bool,
    /// Resumption ID of the managed stream
    pub resume_id: Option<String>,
    /// Stanzas received
    pub inbound: u32,
    /// Stanzas sent
    pub outbound: u32,
    /// Stanzas awaiting acknowledgement
    pub unacked: usize,
}

struct ClientInner<T: Transport> {
    config: Config,
    jid: Jid,
    router: Arc<Router>,
    error_handler: Option<ErrorHandler>,
    sm: Arc<Mutex<StreamManagement>>,
    pending: PendingMap,
    events: EventSlot,
    state: Mutex<SessionState>,
    bound_jid: Mutex<Option<Jid>>,
    connection: Mutex<Option<Arc<Connection<T::Writer>>>>,
    connect_lock: tokio::sync::Mutex<()>,
    _transport: PhantomData<fn() -> T>,
}

/// An XMPP client session over transport `T`.
pub struct Client<T: Transport = AnyTransport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("jid", &self.inner.jid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Client<T> {
    /// Validate `config` and build a disconnected client.
    pub fn new(mut config: Config, router: Router, error_handler: Option<ErrorHandler>) -> Result<Self, XmppError> {
        let jid = config.validate()?;
        let sm = StreamManagement::new(config.sm_max_unacked);
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                jid,
                router: Arc::new(router),
                error_handler,
                sm: Arc::new(Mutex::new(sm)),
                pending: Arc::new(Default::default()),
                events: Arc::new(Mutex::new(None)),
                state: Mutex::new(SessionState::New),
                bound_jid: Mutex::new(None),
                connection: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                _transport: PhantomData,
            }),
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Account JID from the configuration.
    pub fn jid(&self) -> &Jid {
        &self.inner.jid
    }

    /// Full JID assigned at bind, once a session has been established.
    pub fn bound_jid(&self) -> Option<Jid> {
        lock(&self.inner.bound_jid).clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        let state = *lock(&self.inner.state);
        if state == SessionState::Running && self.connection().is_none() {
            return SessionState::Disconnected;
        }
        state
    }

    /// Whether a session is established and its stream is open.
    pub fn is_connected(&self) -> bool {
        self.connection().is_some()
    }

    /// Snapshot of the stream management state.
    pub fn stream_management(&self) -> SmStatus {
        let sm = lock(&self.inner.sm);
        SmStatus {
            enabled: sm.is_enabled(),
            resume_id: sm.resume_id().map(str::to_string),
            inbound: sm.inbound(),
            outbound: sm.outbound(),
            unacked: sm.unacked_len(),
        }
    }

    /// Attach or detach (`None`) the event handler.
    pub fn set_event_handler(&self, handler: Option<mpsc::UnboundedSender<Event>>) {
        *lock(&self.inner.events) = handler;
    }

    fn connection(&self) -> Option<Arc<Connection<T::Writer>>> {
        lock(&self.inner.connection).clone().filter(|conn| !conn.is_closed())
    }

    fn require_connection(&self) -> Result<Arc<Connection<T::Writer>>, XmppError> {
        self.connection().ok_or(XmppError::NotConnected)
    }

    fn fail(&self, error: XmppError) -> XmppError {
        set_state(&self.inner.state, SessionState::Disconnected);
        lock(&self.inner.sm).suspend();
        error
    }

    /// Connect and negotiate a session. One attempt, no retries.
    ///
    /// Emits [`Event::Connected`] once the transport is up and
    /// [`Event::SessionEstablished`] once stanzas can flow. Returns
    /// immediately if a session is already running.
    #[instrument(skip(self), fields(jid = %self.inner.jid), name = "xmpp.client.connect")]
    pub async fn connect(&self) -> Result<(), XmppError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.connection().is_some() {
            return Ok(());
        }
        let inner = &self.inner;
        let config = &inner.config;
        set_state(&inner.state, SessionState::Connecting);

        let dial_started = Instant::now();
        let transport = match T::connect(&config.transport_config()).await {
            Ok(transport) => {
                metrics::record_connect_duration(elapsed_ms(dial_started), transport.kind(), true);
                transport
            }
            Err(e) => {
                let kind = if config.websocket_url.is_some() { "websocket" } else { "tcp" };
                metrics::record_connect_duration(elapsed_ms(dial_started), kind, false);
                warn!(error = %e, address = %config.address, "Connection failed");
                return Err(self.fail(e));
            }
        };
        let framed = transport.is_framed();
        emit(&inner.events, Event::Connected);

        let login_started = Instant::now();
        let ctx = SessionContext {
            config,
            jid: &inner.jid,
            sm: &inner.sm,
            state: &inner.state,
            previous_jid: self.bound_jid(),
        };
        let result = match timeout(config.connect_timeout, session::negotiate(transport, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(XmppError::timeout("stream negotiation")),
        };
        metrics::record_login_duration(elapsed_ms(login_started), "client", result.is_ok());
        let negotiated = match result {
            Ok(negotiated) => negotiated,
            Err(e) => {
                warn!(error = %e, permanent = e.is_permanent(), "Session negotiation failed");
                return Err(self.fail(e));
            }
        };

        let (reader, writer) = negotiated.transport.into_split();
        let closing = if framed { framed_close() } else { STREAM_CLOSE.to_string() };
        let conn = Arc::new(Connection::new(
            writer,
            ns::JABBER_CLIENT,
            Some(inner.sm.clone()),
            config.stream_logger.clone(),
            closing,
        ));
        if let Err(e) = conn.resend(&negotiated.resend).await {
            return Err(self.fail(e));
        }

        *lock(&inner.bound_jid) = Some(negotiated.bound_jid.clone());
        *lock(&inner.connection) = Some(conn.clone());
        info!(
            bound_jid = %negotiated.bound_jid,
            stream_id = ?negotiated.stream_id,
            resumed = negotiated.resumed,
            "Session established"
        );
        emit(&inner.events, Event::SessionEstablished);

        let reader_ctx = ReaderContext {
            router: inner.router.clone(),
            sender: conn.clone(),
            pending: inner.pending.clone(),
            events: inner.events.clone(),
            error_handler: inner.error_handler.clone(),
            interceptor: None,
            local: Some(negotiated.bound_jid.clone()),
        };
        tokio::spawn(run_reader(conn.clone(), reader, negotiated.parser, reader_ctx));
        if !config.keepalive_interval.is_zero() {
            tokio::spawn(run_keepalive(conn, config.keepalive_interval));
        }
        set_state(&inner.state, SessionState::Running);
        Ok(())
    }

    /// Close the stream and the transport.
    ///
    /// A closed stream cannot be resumed, so stream management state is
    /// discarded.
    pub async fn disconnect(&self) -> Result<(), XmppError> {
        let conn = lock(&self.inner.connection).take();
        let result = match conn {
            Some(conn) => {
                set_state(&self.inner.state, SessionState::Disconnecting);
                conn.close().await
            }
            None => Ok(()),
        };
        lock(&self.inner.sm).reset();
        set_state(&self.inner.state, SessionState::Disconnected);
        debug!("Client disconnected");
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
    ///
    /// An ID is assigned when the request has none.
    pub async fn send_iq(&self, iq: Iq) -> Result<PendingIq, XmppError> {
        self.require_connection()?.send_iq(&self.inner.pending, iq).await
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[async_trait]
impl<T: Transport> Sender for Client<T> {
    async fn send(&self, packet: Packet) -> Result<(), XmppError> {
        Client::send(self, packet).await
    }

    async fn send_raw(&self, xml: &str) -> Result<(), XmppError> {
        Client::send_raw(self, xml).await
    }
}

#[async_trait]
impl<T: Transport> StreamClient for Client<T> {
    async fn connect(&self) -> Result<(), XmppError> {
        Client::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), XmppError> {
        Client::disconnect(self).await
    }

    fn set_event_handler(&self, handler: Option<mpsc::UnboundedSender<Event>>) {
        Client::set_event_handler(self, handler)
    }

    fn max_reconnect_attempts(&self) -> u32 {
        self.inner.config.max_reconnect_attempts
    }
}
