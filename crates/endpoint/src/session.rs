//! Client stream negotiation.
//!
//! Drives a fresh transport from the stream header through STARTTLS, SASL
//! PLAIN, resumption or resource binding, the legacy session and XEP-0198
//! enablement. Each step is its own span so a failed login shows where it
//! stopped.

use std::fmt;
use std::sync::Mutex;

use minidom::Element;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::jid::Jid;
use crate::parser::{element_to_string, ns, StreamParser};
use crate::stanza::ext::bind::{Bind, SessionRequest};
use crate::stanza::stream::{framed_open, sasl_auth, sasl_plain, starttls, stream_open};
use crate::stanza::{Iq, IqType, Packet, StreamFeatures};
use crate::stream_management::StreamManagement;
use crate::transport::{Direction, Transport, TransportWrite};
use crate::{lock, XmppError};

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not connected yet
    #[default]
    New,
    /// Dialing the transport
    Connecting,
    /// Transport up, stream opened
    Connected,
    /// TLS negotiated
    Secured,
    /// SASL succeeded
    Authenticated,
    /// Resource bound
    Bound,
    /// Session established (bound or resumed)
    SessionEstablished,
    /// Reader task running
    Running,
    /// Local close in progress
    Disconnecting,
    /// Transport closed
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Notifications delivered to the registered event handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The transport is connected
    Connected,
    /// Negotiation finished; stanzas can flow
    SessionEstablished,
    /// The session ended. `reason` is `None` for a local disconnect.
    Disconnected {
        /// Why the session ended
        reason: Option<String>,
        /// Whether reconnecting can succeed
        permanent: bool,
    },
    /// The peer sent `<stream:error/>`
    StreamError {
        /// Defined condition, e.g. `conflict`
        condition: String,
        /// Optional description
        text: Option<String>,
    },
}

pub(crate) fn set_state(cell: &Mutex<SessionState>, state: SessionState) {
    let mut current = lock(cell);
    if *current != state {
        debug!(from = %*current, to = %state, "Session state changed");
        *current = state;
    }
}

/// Borrowed inputs of one negotiation.
pub(crate) struct SessionContext<'a> {
    pub config: &'a Config,
    pub jid: &'a Jid,
    pub sm: &'a Mutex<StreamManagement>,
    pub state: &'a Mutex<SessionState>,
    /// JID bound by the previous connection, reused when resuming
    pub previous_jid: Option<Jid>,
}

/// Outcome of a successful negotiation.
pub(crate) struct Negotiated<T> {
    pub transport: T,
    pub parser: StreamParser,
    pub bound_jid: Jid,
    pub stream_id: Option<String>,
    pub resumed: bool,
    /// Unacknowledged stanzas to write before any new traffic
    pub resend: Vec<String>,
}

struct Negotiation<'a, T: Transport> {
    transport: T,
    parser: StreamParser,
    ctx: SessionContext<'a>,
    features: StreamFeatures,
    stream_id: Option<String>,
}

/// Run the client negotiation on a connected transport.
pub(crate) async fn negotiate<T: Transport>(
    transport: T,
    ctx: SessionContext<'_>,
) -> Result<Negotiated<T>, XmppError> {
    let parser = StreamParser::new(ns::JABBER_CLIENT, ctx.config.max_stanza_size)
        .with_registry(ctx.config.registry.clone())
        .with_logger(ctx.config.stream_logger.clone());
    let mut session = Negotiation {
        transport,
        parser,
        ctx,
        features: StreamFeatures::default(),
        stream_id: None,
    };

    session.open_stream().await?;
    set_state(session.ctx.state, SessionState::Connected);

    if session.transport.does_start_tls() && !session.transport.is_secure() && session.features.does_starttls() {
        session = session.starttls().await?;
        set_state(session.ctx.state, SessionState::Secured);
    }
    if !session.transport.is_secure() && !session.ctx.config.insecure {
        return Err(XmppError::security(
            "server does not offer TLS and insecure connections are not allowed",
        ));
    }

    session.authenticate().await?;
    set_state(session.ctx.state, SessionState::Authenticated);
    session.open_stream().await?;

    if session.features.stream_management {
        if let Some(resend) = session.resume().await? {
            let bound_jid = match session.ctx.previous_jid.clone() {
                Some(jid) => jid,
                None => session.ctx.jid.clone(),
            };
            set_state(session.ctx.state, SessionState::SessionEstablished);
            return Ok(session.finish(bound_jid, true, resend));
        }
    } else if lock(session.ctx.sm).resume_id().is_some() {
        debug!("Server no longer offers stream management, dropping resumable state");
        lock(session.ctx.sm).reset();
    }

    let bound_jid = session.bind().await?;
    set_state(session.ctx.state, SessionState::Bound);

    if session.features.session_required() {
        session.establish_session().await?;
    }
    set_state(session.ctx.state, SessionState::SessionEstablished);

    if session.ctx.config.stream_management_enable && session.features.stream_management {
        session.enable_stream_management().await?;
    }

    Ok(session.finish(bound_jid, false, Vec::new()))
}

impl<'a, T: Transport> Negotiation<'a, T> {
    fn finish(self, bound_jid: Jid, resumed: bool, resend: Vec<String>) -> Negotiated<T> {
        Negotiated {
            transport: self.transport,
            parser: self.parser,
            bound_jid,
            stream_id: self.stream_id,
            resumed,
            resend,
        }
    }

    async fn write_str(&mut self, data: &str) -> Result<(), XmppError> {
        if let Some(logger) = &self.ctx.config.stream_logger {
            logger.log(Direction::Outbound, data.as_bytes());
        }
        self.transport.send(data.as_bytes()).await
    }

    async fn write_element(&mut self, element: &Element) -> Result<(), XmppError> {
        let xml = element_to_string(element)?;
        self.write_str(&xml).await
    }

    /// Next packet, turning stream errors and closes into errors.
    async fn next_packet(&mut self) -> Result<Packet, XmppError> {
        match self.parser.next_packet(&mut self.transport).await? {
            Packet::StreamError(err) => Err(err.into_error()),
            Packet::StreamClose => Err(XmppError::Closed),
            packet => Ok(packet),
        }
    }

    /// Wait for the result or error with the given ID.
    async fn await_iq(&mut self, id: &str) -> Result<Iq, XmppError> {
        loop {
            match self.next_packet().await? {
                Packet::Iq(iq) if iq.id() == id && !iq.iq_type.is_request() => return Ok(iq),
                other => debug!(packet = other.name(), "Ignoring packet during negotiation"),
            }
        }
    }

    #[instrument(skip(self), name = "xmpp.session.open_stream")]
    async fn open_stream(&mut self) -> Result<(), XmppError> {
        let domain = self.ctx.jid.domain();
        let lang = self.ctx.config.lang.as_str();
        let header = if self.transport.is_framed() {
            framed_open(domain, lang)
        } else {
            stream_open(domain, ns::JABBER_CLIENT, lang)
        };
        self.parser.reset();
        self.write_str(&header).await?;

        let header = self.parser.init_stream(&mut self.transport).await?;
        self.stream_id = header.id;

        self.features = match self.next_packet().await? {
            Packet::StreamFeatures(features) => features,
            other => {
                return Err(XmppError::negotiation(format!(
                    "expected stream features, got {}",
                    other.name()
                )))
            }
        };
        debug!(
            stream_id = ?self.stream_id,
            starttls = self.features.does_starttls(),
            mechanisms = ?self.features.mechanisms,
            sm = self.features.stream_management,
            "Received stream features"
        );
        Ok(())
    }

    #[instrument(skip(self), name = "xmpp.session.starttls")]
    async fn starttls(mut self) -> Result<Self, XmppError> {
        self.write_element(&starttls()).await?;
        let reply = self.parser.next_element(&mut self.transport).await?;
        if reply.is("failure", ns::TLS) {
            return Err(XmppError::security("server refused STARTTLS"));
        }
        if !reply.is("proceed", ns::TLS) {
            return Err(XmppError::negotiation(format!(
                "expected <proceed/>, got <{}/>",
                reply.name()
            )));
        }

        let server_name = self.ctx.jid.domain().to_string();
        self.transport = self.transport.start_tls(&server_name).await?;
        self.parser.clear();
        self.open_stream().await?;
        Ok(self)
    }

    #[instrument(skip(self), name = "xmpp.session.authenticate")]
    async fn authenticate(&mut self) -> Result<(), XmppError> {
        if !self.features.supports_mechanism("PLAIN") {
            return Err(XmppError::negotiation(format!(
                "server does not offer SASL PLAIN (offered: {:?})",
                self.features.mechanisms
            )));
        }
        let user = self.ctx.jid.local().unwrap_or_default();
        let response = sasl_plain(user, self.ctx.config.credential.secret());
        self.write_element(&sasl_auth("PLAIN", &response)).await?;

        match self.next_packet().await? {
            Packet::SaslSuccess(_) => {
                debug!(user, "SASL PLAIN succeeded");
                Ok(())
            }
            Packet::SaslFailure(failure) => Err(XmppError::auth_failed(match failure.text {
                Some(text) => format!("{}: {text}", failure.condition),
                None => failure.condition,
            })),
            other => Err(XmppError::negotiation(format!(
                "expected SASL outcome, got {}",
                other.name()
            ))),
        }
    }

    /// Try to resume the previous stream. `None` means binding is needed.
    #[instrument(skip(self), name = "xmpp.session.resume")]
    async fn resume(&mut self) -> Result<Option<Vec<String>>, XmppError> {
        let Some(request) = lock(self.ctx.sm).resume_request() else {
            return Ok(None);
        };
        self.write_element(&request.to_element()).await?;

        match self.next_packet().await? {
            Packet::SmResumed(resumed) => lock(self.ctx.sm).on_resumed(&resumed).map(Some),
            Packet::SmFailed(failed) => {
                debug!(condition = ?failed.condition, "Stream resumption failed, binding a new session");
                lock(self.ctx.sm).reset();
                Ok(None)
            }
            other => Err(XmppError::negotiation(format!(
                "expected <resumed/> or <failed/>, got {}",
                other.name()
            ))),
        }
    }

    #[instrument(skip(self), name = "xmpp.session.bind")]
    async fn bind(&mut self) -> Result<Jid, XmppError> {
        if !self.features.bind {
            return Err(XmppError::negotiation("server does not offer resource binding"));
        }
        let request = Iq::set(None, Bind::request(self.ctx.config.resource.clone()));
        let id = request.id().to_string();
        self.write_element(&request.to_element(ns::JABBER_CLIENT)).await?;

        let reply = self.await_iq(&id).await?;
        if reply.iq_type == IqType::Error {
            let condition = reply
                .error
                .map(|e| e.condition.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(XmppError::negotiation(format!("resource binding failed: {condition}")));
        }
        let jid = reply
            .payload_as::<Bind>()
            .and_then(|bind| bind.jid.clone())
            .ok_or_else(|| XmppError::negotiation("bind result carries no JID"))?;
        debug!(jid = %jid, "Resource bound");
        Ok(jid)
    }

    #[instrument(skip(self), name = "xmpp.session.session")]
    async fn establish_session(&mut self) -> Result<(), XmppError> {
        let request = Iq::set(None, SessionRequest);
        let id = request.id().to_string();
        self.write_element(&request.to_element(ns::JABBER_CLIENT)).await?;

        let reply = self.await_iq(&id).await?;
        if reply.iq_type == IqType::Error {
            return Err(XmppError::negotiation("session establishment refused"));
        }
        Ok(())
    }

    #[instrument(skip(self), name = "xmpp.session.enable_sm")]
    async fn enable_stream_management(&mut self) -> Result<(), XmppError> {
        let request = lock(self.ctx.sm).enable_request(self.ctx.config.stream_management_resume);
        self.write_element(&request.to_element()).await?;

        match self.next_packet().await? {
            Packet::SmEnabled(enabled) => {
                lock(self.ctx.sm).on_enabled(&enabled);
                Ok(())
            }
            Packet::SmFailed(failed) => {
                warn!(condition = ?failed.condition, "Server refused stream management");
                lock(self.ctx.sm).reset();
                Ok(())
            }
            other => Err(XmppError::negotiation(format!(
                "expected <enabled/> or <failed/>, got {}",
                other.name()
            ))),
        }
    }
}
