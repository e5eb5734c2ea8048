//! Dispatch of received packets to user handlers.
//!
//! Routes are checked in insertion order and the first match wins. IQ
//! requests nobody handles get a `feature-not-implemented` error reply so
//! the peer is never left waiting.
//!
//! Handlers run inline on the session's reader task. While a handler runs
//! nothing else is read from the stream, so a handler that needs the reply
//! to an IQ it sends must wait for it from a spawned task:
//!
//! ```ignore
//! router.handle_fn("message", move |_sender, packet| {
//!     let client = client.clone();
//!     async move {
//!         tokio::spawn(async move {
//!             let pending = client.send_iq(request).await?;
//!             pending.wait(&cancel, timeout).await
//!         });
//!     }
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::stanza::{IqType, Packet};
use crate::XmppError;

/// Outbound side of a session, handed to every handler.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Serialize and send a packet.
    async fn send(&self, packet: Packet) -> Result<(), XmppError>;

    /// Send preformatted XML.
    async fn send_raw(&self, xml: &str) -> Result<(), XmppError>;
}

/// Receives routed packets.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one packet. Runs on the session's reader task, so packets of a
    /// session are seen in receive order.
    ///
    /// The stream is not read until this returns. Awaiting
    /// [`PendingIq::wait`](crate::PendingIq::wait) here stalls until its
    /// deadline because the reply can never arrive; spawn a task instead.
    async fn handle(&self, sender: Arc<dyn Sender>, packet: Packet);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arc<dyn Sender>, Packet) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, sender: Arc<dyn Sender>, packet: Packet) {
        (self)(sender, packet).await
    }
}

type Matcher = Arc<dyn Fn(&Packet) -> bool + Send + Sync>;

/// A packet filter plus the handler it feeds.
///
/// The handler runs on the reader task; see [`Handler::handle`].
#[derive(Clone, Default)]
pub struct Route {
    name: Option<String>,
    iq_namespaces: Vec<String>,
    matcher: Option<Matcher>,
    handler: Option<Arc<dyn Handler>>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("iq_namespaces", &self.iq_namespaces)
            .field("matcher", &self.matcher.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl Route {
    /// A route matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only packets with this [`Packet::name`], e.g. `message`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Only IQs whose payload namespace is one of `namespaces`.
    pub fn iq_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.iq_namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Only packets accepted by `matcher`.
    pub fn matcher(mut self, matcher: impl Fn(&Packet) -> bool + Send + Sync + 'static) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /// Handler for matching packets.
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Handler for matching packets, as a closure.
    pub fn handler_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<dyn Sender>, Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handler(f)
    }

    /// Whether this route accepts `packet`. Routes without a handler never match.
    pub fn matches(&self, packet: &Packet) -> bool {
        if self.handler.is_none() {
            return false;
        }
        if let Some(ref name) = self.name {
            if packet.name() != name {
                return false;
            }
        }
        if !self.iq_namespaces.is_empty() {
            let Packet::Iq(iq) = packet else {
                return false;
            };
            let Some(namespace) = iq.payload_namespace() else {
                return false;
            };
            if !self.iq_namespaces.iter().any(|ns| ns == namespace) {
                return false;
            }
        }
        self.matcher.as_ref().map_or(true, |matcher| matcher(packet))
    }
}

/// Ordered set of routes.
#[derive(Debug, Default, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route.
    pub fn route(&mut self, route: Route) -> &mut Self {
        self.routes.push(route);
        self
    }

    /// Route packets named `name` to `handler`.
    pub fn handle(&mut self, name: &str, handler: impl Handler + 'static) -> &mut Self {
        self.route(Route::new().name(name).handler(handler))
    }

    /// Route packets named `name` to a closure.
    pub fn handle_fn<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Arc<dyn Sender>, Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(name, f)
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Deliver `packet` to the first matching route.
    ///
    /// Returns whether a route handled it. Unhandled IQ get/set requests are
    /// answered with `feature-not-implemented`.
    pub async fn dispatch(&self, sender: Arc<dyn Sender>, packet: Packet) -> bool {
        if let Some(handler) = self
            .routes
            .iter()
            .find(|route| route.matches(&packet))
            .and_then(|route| route.handler.clone())
        {
            handler.handle(sender, packet).await;
            return true;
        }

        match packet {
            Packet::Iq(iq) if iq.iq_type.is_request() => {
                debug!(id = iq.id(), namespace = ?iq.payload_namespace(), "No route for IQ, replying feature-not-implemented");
                if let Err(e) = sender.send(Packet::Iq(iq.make_feature_not_implemented())).await {
                    warn!(error = %e, "Failed to send feature-not-implemented reply");
                }
            }
            Packet::Iq(iq) if iq.iq_type == IqType::Error || iq.iq_type == IqType::Result => {
                debug!(id = iq.id(), "Dropping unsolicited IQ response");
            }
            other => debug!(packet = other.name(), "No route for packet"),
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::parser::ns;
    use crate::stanza;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Packet>>,
    }

    #[async_trait]
    impl Sender for RecordingSender {
        async fn send(&self, packet: Packet) -> Result<(), XmppError> {
            self.sent.lock().unwrap().push(packet);
            Ok(())
        }

        async fn send_raw(&self, _xml: &str) -> Result<(), XmppError> {
            Ok(())
        }
    }

    fn packet(xml: &str) -> Packet {
        stanza::decode(&xml.parse().unwrap()).unwrap()
    }

    fn counting_router(name: &str, counter: Arc<AtomicUsize>) -> Router {
        let mut router = Router::new();
        router.handle_fn(name, move |_sender, _packet| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        router
    }

    #[tokio::test]
    async fn test_message_route_invoked_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = counting_router("message", counter.clone());
        let sender = Arc::new(RecordingSender::default());

        let handled = router
            .dispatch(sender.clone(), packet("<message xmlns='jabber:client'><body>hi</body></message>"))
            .await;
        assert!(handled);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let handled = router
            .dispatch(
                sender.clone(),
                packet("<iq xmlns='jabber:client' type='get' id='q1' from='a@b/c'><foo xmlns='urn:unknown'/></iq>"),
            )
            .await;
        assert!(!handled);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let reply = sent[0].to_element(ns::JABBER_CLIENT).unwrap();
        assert_eq!(reply.attr("type"), Some("error"));
        assert_eq!(reply.attr("id"), Some("q1"));
        assert!(reply
            .get_child("error", ns::JABBER_CLIENT)
            .unwrap()
            .has_child("feature-not-implemented", ns::STANZAS));
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut router = counting_router("presence", first.clone());
        router.route(Route::new().handler_fn({
            let second = second.clone();
            move |_sender, _packet| {
                let second = second.clone();
                async move {
                    second.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));

        let sender = Arc::new(RecordingSender::default());
        router.dispatch(sender.clone(), packet("<presence xmlns='jabber:client'/>")).await;
        router.dispatch(sender, packet("<message xmlns='jabber:client'/>")).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_iq_namespace_filter() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router.route(Route::new().name("iq").iq_namespaces([ns::PING]).handler_fn({
            let counter = counter.clone();
            move |sender: Arc<dyn Sender>, packet| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if let Packet::Iq(iq) = packet {
                        sender.send(Packet::Iq(iq.make_result())).await.unwrap();
                    }
                }
            }
        }));

        let sender = Arc::new(RecordingSender::default());
        let ping = packet("<iq xmlns='jabber:client' type='get' id='p1'><ping xmlns='urn:xmpp:ping'/></iq>");
        let version = packet("<iq xmlns='jabber:client' type='get' id='v1'><query xmlns='jabber:iq:version'/></iq>");
        assert!(router.dispatch(sender.clone(), ping).await);
        assert!(!router.dispatch(sender.clone(), version).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let sent = sender.sent.lock().unwrap();
        let types: Vec<_> = sent
            .iter()
            .map(|p| match p {
                Packet::Iq(iq) => iq.iq_type,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(types, vec![IqType::Result, IqType::Error]);
    }

    #[tokio::test]
    async fn test_custom_matcher() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router.route(
            Route::new()
                .matcher(|packet| matches!(packet, Packet::Message(m) if m.body.as_deref() == Some("ping")))
                .handler_fn({
                    let counter = counter.clone();
                    move |_sender, _packet| {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }),
        );
        let sender = Arc::new(RecordingSender::default());
        router
            .dispatch(sender.clone(), packet("<message xmlns='jabber:client'><body>ping</body></message>"))
            .await;
        router
            .dispatch(sender, packet("<message xmlns='jabber:client'><body>pong</body></message>"))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsolicited_result_is_not_answered() {
        let router = Router::new();
        let sender = Arc::new(RecordingSender::default());
        router
            .dispatch(sender.clone(), packet("<iq xmlns='jabber:client' type='result' id='r1'/>"))
            .await;
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
