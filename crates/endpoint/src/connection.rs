//! Runtime of an established stream, shared by clients and components.
//!
//! After negotiation the transport is split. The write half sits behind an
//! async mutex so every sender is serialized; the read half is owned by a
//! single reader task which counts inbound stanzas, answers `<r/>`,
//! resolves pending IQs and feeds the router.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use minidom::Element;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::stream_errors;
use crate::jid::Jid;
use crate::metrics;
use crate::parser::{element_to_string, Frame, StreamParser};
use crate::router::{Router, Sender};
use crate::session::Event;
use crate::stanza::{new_id, Iq, IqType, Packet, SmRequest};
use crate::stream_management::StreamManagement;
use crate::transport::{Direction, StreamLogger, TransportRead, TransportWrite};
use crate::{lock, XmppError};

/// Callback for errors that have no caller to return to.
pub type ErrorHandler = Arc<dyn Fn(&XmppError) + Send + Sync>;

/// A request registered by `send_iq`.
#[derive(Debug)]
pub(crate) struct PendingReply {
    /// Addressee of the request; only it may answer
    to: Option<Jid>,
    reply: oneshot::Sender<Iq>,
}

/// Replies registered by `send_iq`, keyed by stanza ID.
pub(crate) type PendingMap = Arc<DashMap<String, PendingReply>>;

/// Where events go; `None` while no handler is attached.
pub(crate) type EventSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>;

/// Answers a packet before it reaches the router.
pub(crate) type Interceptor = Arc<dyn Fn(&Packet) -> Option<Packet> + Send + Sync>;

pub(crate) fn emit(slot: &EventSlot, event: Event) {
    if let Some(tx) = lock(slot).as_ref() {
        if tx.send(event).is_err() {
            debug!("Event handler dropped its receiver");
        }
    }
}

/// Whether raw XML starts with a stanza element.
fn is_raw_stanza(xml: &str) -> bool {
    let xml = xml.trim_start();
    ["<iq", "<message", "<presence"].iter().any(|prefix| {
        xml.strip_prefix(prefix)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_whitespace() || c == '>' || c == '/')
    })
}

/// Whether an IQ reply from `from` may answer a request addressed to `to`.
///
/// Follows RFC 6120 section 10.1.4: a request without `to` is handled by
/// the user's own account, which answers from its bare JID, its domain or
/// with no `from` at all. `local` is our own address.
fn is_expected_responder(to: Option<&Jid>, from: Option<&Jid>, local: Option<&Jid>) -> bool {
    let own_account = |jid: &Jid| {
        local.is_some_and(|local| {
            jid.is_bare() && (jid.bare_eq(local) || (jid.local().is_none() && jid.domain() == local.domain()))
        })
    };
    match (to, from) {
        (Some(to), Some(from)) => to == from,
        (Some(to), None) => own_account(to),
        (None, None) => true,
        (None, Some(from)) => own_account(from),
    }
}

/// A reply to an IQ sent with `send_iq`.
///
/// Dropping it deregisters the request; a late reply then goes to the router.
/// Replies are matched by ID and must come from the entity the request was
/// addressed to.
#[derive(Debug)]
pub struct PendingIq {
    id: String,
    rx: oneshot::Receiver<Iq>,
    pending: PendingMap,
}

impl PendingIq {
    /// Stanza ID of the request.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the reply.
    ///
    /// An `error` reply is returned as [`XmppError::Stanza`]. Fails with
    /// [`XmppError::Cancelled`] when `cancel` fires, [`XmppError::Timeout`]
    /// after `deadline` and [`XmppError::Closed`] when the session ends first.
    pub async fn wait(mut self, cancel: &CancellationToken, deadline: Duration) -> Result<Iq, XmppError> {
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(XmppError::Cancelled),
            _ = tokio::time::sleep(deadline) => {
                return Err(XmppError::timeout(format!("no reply to IQ '{}'", self.id)))
            }
            reply = &mut self.rx => reply.map_err(|_| XmppError::Closed)?,
        };
        if reply.iq_type == IqType::Error {
            return Err(match reply.error {
                Some(error) => error.into_error(),
                None => XmppError::bad_request(Some("error reply without <error/>".to_string())),
            });
        }
        Ok(reply)
    }
}

impl Drop for PendingIq {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Write side of an established stream.
pub(crate) struct Connection<W: TransportWrite> {
    writer: tokio::sync::Mutex<W>,
    stanza_ns: &'static str,
    sm: Option<Arc<Mutex<StreamManagement>>>,
    logger: Option<Arc<dyn StreamLogger>>,
    /// `</stream:stream>` or the framed `<close/>`
    closing: String,
    closed: CancellationToken,
}

impl<W: TransportWrite + 'static> Connection<W> {
    pub(crate) fn new(
        writer: W,
        stanza_ns: &'static str,
        sm: Option<Arc<Mutex<StreamManagement>>>,
        logger: Option<Arc<dyn StreamLogger>>,
        closing: String,
    ) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            stanza_ns,
            sm,
            logger,
            closing,
            closed: CancellationToken::new(),
        }
    }

    /// Cancelled once the stream is gone.
    pub(crate) fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Write `xml`, tracking it for acknowledgement when it is a stanza.
    async fn write(&self, xml: &str, stanza: bool, kind: &str) -> Result<(), XmppError> {
        if self.is_closed() {
            return Err(XmppError::NotConnected);
        }
        let mut writer = self.writer.lock().await;
        if stanza {
            if let Some(sm) = &self.sm {
                let mut sm = lock(sm);
                sm.track_outbound(xml.to_string())?;
                if sm.is_enabled() {
                    metrics::record_sm_unacked(sm.unacked_len());
                }
            }
        }
        self.write_locked(&mut writer, xml).await?;
        if stanza {
            metrics::record_stanza(kind, Direction::Outbound.as_str());
        }
        Ok(())
    }

    async fn write_locked(&self, writer: &mut W, xml: &str) -> Result<(), XmppError> {
        if let Some(logger) = &self.logger {
            logger.log(Direction::Outbound, xml.as_bytes());
        }
        writer.send(xml.as_bytes()).await
    }

    /// Serialize and send a packet.
    pub(crate) async fn send_packet(&self, packet: &Packet) -> Result<(), XmppError> {
        let element = packet
            .to_element(self.stanza_ns)
            .ok_or_else(|| XmppError::negotiation("a stream close is not a packet; disconnect instead"))?;
        let xml = element_to_string(&element)?;
        self.write(&xml, packet.is_stanza(), packet.name()).await
    }

    /// Send an IQ get or set and register for its reply before it is written.
    pub(crate) async fn send_iq(&self, pending: &PendingMap, mut iq: Iq) -> Result<PendingIq, XmppError> {
        if !iq.iq_type.is_request() {
            return Err(XmppError::bad_request(Some(format!(
                "send_iq expects a get or set, not {}",
                iq.iq_type
            ))));
        }
        if iq.attrs.id.as_deref().map_or(true, str::is_empty) {
            iq.attrs.id = Some(new_id());
        }
        let id = iq.id().to_string();
        let (tx, rx) = oneshot::channel();
        pending.insert(
            id.clone(),
            PendingReply {
                to: iq.attrs.to.clone(),
                reply: tx,
            },
        );
        let waiter = PendingIq {
            id,
            rx,
            pending: pending.clone(),
        };
        self.send_packet(&Packet::Iq(iq)).await?;
        Ok(waiter)
    }

    /// Send preformatted XML. Stanzas are recognized by their leading tag.
    pub(crate) async fn send_raw_xml(&self, xml: &str) -> Result<(), XmppError> {
        let stanza = is_raw_stanza(xml);
        self.write(xml, stanza, "raw").await
    }

    async fn send_nonza(&self, element: &Element) -> Result<(), XmppError> {
        let xml = element_to_string(element)?;
        self.write(&xml, false, "nonza").await
    }

    /// Write stanzas left unacknowledged by the previous stream.
    ///
    /// They keep their sequence numbers, so they bypass tracking.
    pub(crate) async fn resend(&self, stanzas: &[String]) -> Result<(), XmppError> {
        let mut writer = self.writer.lock().await;
        for xml in stanzas {
            self.write_locked(&mut writer, xml).await?;
        }
        if !stanzas.is_empty() {
            info!(count = stanzas.len(), "Resent unacknowledged stanzas");
        }
        Ok(())
    }

    /// Send the closing element and shut the transport down.
    pub(crate) async fn close(&self) -> Result<(), XmppError> {
        if self.is_closed() {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = self.write_locked(&mut writer, &self.closing).await {
            debug!(error = %e, "Failed to send stream close");
        }
        self.closed.cancel();
        writer.close().await
    }
}

#[async_trait]
impl<W: TransportWrite + 'static> Sender for Connection<W> {
    async fn send(&self, packet: Packet) -> Result<(), XmppError> {
        self.send_packet(&packet).await
    }

    async fn send_raw(&self, xml: &str) -> Result<(), XmppError> {
        self.send_raw_xml(xml).await
    }
}

/// Everything the reader task needs besides the stream itself.
pub(crate) struct ReaderContext {
    pub router: Arc<Router>,
    pub sender: Arc<dyn Sender>,
    pub pending: PendingMap,
    pub events: EventSlot,
    pub error_handler: Option<ErrorHandler>,
    pub interceptor: Option<Interceptor>,
    /// Our own address: the bound JID of a client, the domain of a component
    pub local: Option<Jid>,
}

impl ReaderContext {
    fn report(&self, error: &XmppError) {
        match &self.error_handler {
            Some(handler) => handler(error),
            None => warn!(error = %error, "Unhandled stream error"),
        }
    }
}

/// How the read loop ended.
enum Exit {
    /// Closed locally
    Local,
    /// Lost the stream
    Remote { reason: String, permanent: bool },
}

/// Pump inbound frames until the stream ends, then report the disconnect.
pub(crate) async fn run_reader<R, W>(
    conn: Arc<Connection<W>>,
    mut reader: R,
    mut parser: StreamParser,
    ctx: ReaderContext,
) where
    R: TransportRead,
    W: TransportWrite + 'static,
{
    let exit = loop {
        let frame = tokio::select! {
            biased;
            _ = conn.closed.cancelled() => break Exit::Local,
            frame = parser.next_frame(&mut reader) => frame,
        };

        let element = match frame {
            Ok(Frame::Element(element)) => element,
            Ok(Frame::StreamClose) => {
                break Exit::Remote {
                    reason: "stream closed by peer".to_string(),
                    permanent: false,
                }
            }
            Ok(Frame::StreamOpen(_)) => {
                warn!("Ignoring unexpected stream header");
                continue;
            }
            Err(XmppError::Closed) => {
                break Exit::Remote {
                    reason: "connection closed".to_string(),
                    permanent: false,
                }
            }
            Err(e) => {
                ctx.report(&e);
                break Exit::Remote {
                    reason: e.to_string(),
                    permanent: false,
                };
            }
        };

        let is_stanza = matches!(element.name(), "iq" | "message" | "presence") && element.ns() == conn.stanza_ns;
        if is_stanza {
            if let Some(sm) = &conn.sm {
                lock(sm).mark_inbound();
            }
            metrics::record_stanza(element.name(), Direction::Inbound.as_str());
        }

        let packet = match parser.decode(&element) {
            Ok(packet) => packet,
            Err(e) => {
                ctx.report(&e);
                continue;
            }
        };

        match packet {
            Packet::SmRequest(_) => {
                let answer = conn.sm.as_ref().map(|sm| lock(sm).answer());
                if let Some(answer) = answer {
                    if let Err(e) = conn.send_nonza(&answer.to_element()).await {
                        debug!(error = %e, "Failed to answer ack request");
                    }
                }
            }
            Packet::SmAnswer(answer) => {
                if let Some(sm) = &conn.sm {
                    let mut sm = lock(sm);
                    let dropped = sm.acknowledge(answer.h);
                    debug!(h = answer.h, dropped, remaining = sm.unacked_len(), "Stanzas acknowledged");
                    metrics::record_sm_unacked(sm.unacked_len());
                }
            }
            Packet::StreamError(err) => {
                warn!(condition = %err.condition, text = ?err.text, "Received stream error");
                let permanent = err.condition == stream_errors::CONFLICT;
                emit(
                    &ctx.events,
                    Event::StreamError {
                        condition: err.condition.clone(),
                        text: err.text.clone(),
                    },
                );
                break Exit::Remote {
                    reason: err.condition,
                    permanent,
                };
            }
            Packet::Iq(iq) if !iq.iq_type.is_request() && ctx.pending.contains_key(iq.id()) => {
                let answered = ctx.pending.remove_if(iq.id(), |_, pending| {
                    is_expected_responder(pending.to.as_ref(), iq.attrs.from.as_ref(), ctx.local.as_ref())
                });
                match answered {
                    Some((_, pending)) => {
                        // The waiter may have given up already.
                        let _ = pending.reply.send(iq);
                    }
                    None => warn!(
                        id = iq.id(),
                        from = ?iq.attrs.from,
                        "Ignoring IQ reply from an entity the request was not sent to"
                    ),
                }
            }
            packet if packet.is_stanza() => {
                if let Some(reply) = ctx.interceptor.as_ref().and_then(|intercept| intercept(&packet)) {
                    if let Err(e) = conn.send_packet(&reply).await {
                        ctx.report(&e);
                    }
                    continue;
                }
                ctx.router.dispatch(ctx.sender.clone(), packet).await;
            }
            other => debug!(packet = other.name(), "Ignoring unexpected packet on established stream"),
        }
    };

    conn.closed.cancel();
    ctx.pending.clear();
    if let Some(sm) = &conn.sm {
        lock(sm).suspend();
    }

    let event = match exit {
        Exit::Local => {
            debug!("Reader stopped");
            Event::Disconnected {
                reason: None,
                permanent: false,
            }
        }
        Exit::Remote { reason, permanent } => {
            info!(reason = %reason, permanent, "Disconnected");
            Event::Disconnected {
                reason: Some(reason),
                permanent,
            }
        }
    };
    emit(&ctx.events, event);
}

/// Periodically send `<r/>` when stream management is active, otherwise a
/// whitespace keepalive.
pub(crate) async fn run_keepalive<W: TransportWrite + 'static>(conn: Arc<Connection<W>>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = conn.closed.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let sm_active = conn.sm.as_ref().is_some_and(|sm| lock(sm).is_enabled());
        let result = if sm_active {
            conn.send_nonza(&SmRequest.to_element()).await
        } else {
            conn.write(" ", false, "keepalive").await
        };
        if let Err(e) = result {
            debug!(error = %e, "Keepalive failed");
            return;
        }
    }
}
