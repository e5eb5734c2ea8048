//! Reconnecting supervisor.
//!
//! [`StreamManager::run`] keeps a [`StreamClient`] connected: transient
//! failures are retried after a [`Backoff`] delay, permanent ones end the
//! loop, and a `conflict` stream error (another session took over the
//! resource) stops reconnection.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::Backoff;
use crate::error::stream_errors;
use crate::metrics;
use crate::session::Event;
use crate::XmppError;

/// A session the supervisor can drive, implemented by
/// [`Client`](crate::Client) and [`Component`](crate::Component).
#[async_trait]
pub trait StreamClient: Clone + Send + Sync + 'static {
    /// Make one connection attempt.
    async fn connect(&self) -> Result<(), XmppError>;

    /// Close the session.
    async fn disconnect(&self) -> Result<(), XmppError>;

    /// Attach or detach the event handler.
    fn set_event_handler(&self, handler: Option<mpsc::UnboundedSender<Event>>);

    /// Consecutive transient failures tolerated; zero is unlimited.
    fn max_reconnect_attempts(&self) -> u32 {
        0
    }
}

/// Called after every successful connection, e.g. to send initial presence.
pub type PostConnect<C> = Arc<dyn Fn(C) -> BoxFuture<'static, ()> + Send + Sync>;

/// Stops a running [`StreamManager`] from another task.
#[derive(Clone)]
pub struct StopHandle<C: StreamClient> {
    client: C,
    stop: CancellationToken,
}

impl<C: StreamClient> StopHandle<C> {
    /// Detach the event handler so the drop is not retried, then close the
    /// session. [`StreamManager::run`] returns `Ok(())`.
    pub async fn stop(&self) -> Result<(), XmppError> {
        self.stop.cancel();
        self.client.set_event_handler(None);
        self.client.disconnect().await
    }
}

/// How an established session ended.
enum Outcome {
    Stopped,
    Lost { reason: String },
    Fatal(XmppError),
}

/// Keeps a session alive across transport failures.
pub struct StreamManager<C: StreamClient> {
    client: C,
    post_connect: Option<PostConnect<C>>,
    backoff: Backoff,
    stop: CancellationToken,
}

impl<C: StreamClient> StreamManager<C> {
    /// Supervise `client` with the default backoff.
    pub fn new(client: C, post_connect: Option<PostConnect<C>>) -> Self {
        Self {
            client,
            post_connect,
            backoff: Backoff::default(),
            stop: CancellationToken::new(),
        }
    }

    /// Replace the backoff parameters.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The supervised session.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// A handle that stops [`StreamManager::run`] from another task.
    pub fn stop_handle(&self) -> StopHandle<C> {
        StopHandle {
            client: self.client.clone(),
            stop: self.stop.clone(),
        }
    }

    /// Stop supervising and close the session.
    pub async fn stop(&self) -> Result<(), XmppError> {
        self.stop_handle().stop().await
    }

    /// Connect and keep reconnecting until stopped or a permanent error.
    ///
    /// Returns `Ok(())` after [`StopHandle::stop`] or a local disconnect.
    #[instrument(skip(self), name = "xmpp.stream_manager.run")]
    pub async fn run(&mut self) -> Result<(), XmppError> {
        let (tx, mut events) = mpsc::unbounded_channel();
        self.client.set_event_handler(Some(tx));
        let result = self.supervise(&mut events).await;
        self.client.set_event_handler(None);
        result
    }

    async fn supervise(&mut self, events: &mut mpsc::UnboundedReceiver<Event>) -> Result<(), XmppError> {
        let max_attempts = self.client.max_reconnect_attempts();
        let mut failures = 0_u32;

        loop {
            let attempt = tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                attempt = self.client.connect() => attempt,
            };

            match attempt {
                Ok(()) => {
                    failures = 0;
                    self.backoff.reset();
                    if let Some(post_connect) = &self.post_connect {
                        post_connect(self.client.clone()).await;
                    }
                    match self.wait_for_disconnect(events).await {
                        Outcome::Stopped => return Ok(()),
                        Outcome::Fatal(error) => {
                            metrics::record_reconnect_attempt(true);
                            warn!(error = %error, "Session ended permanently, not reconnecting");
                            return Err(error);
                        }
                        Outcome::Lost { reason } => {
                            info!(reason = %reason, "Session lost, reconnecting");
                        }
                    }
                }
                Err(error) if error.is_permanent() => {
                    metrics::record_reconnect_attempt(true);
                    warn!(error = %error, "Permanent connection failure");
                    return Err(error);
                }
                Err(error) => {
                    failures = failures.saturating_add(1);
                    if max_attempts != 0 && failures > max_attempts {
                        warn!(error = %error, failures, "Giving up after repeated connection failures");
                        return Err(error);
                    }
                    debug!(error = %error, failures, "Transient connection failure");
                }
            }

            metrics::record_reconnect_attempt(false);
            let delay = self.backoff.next_delay();
            info!(attempt = self.backoff.attempt(), delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn wait_for_disconnect(&self, events: &mut mpsc::UnboundedReceiver<Event>) -> Outcome {
        let mut stream_error: Option<(String, Option<String>)> = None;
        loop {
            let event = tokio::select! {
                _ = self.stop.cancelled() => return Outcome::Stopped,
                event = events.recv() => event,
            };
            match event {
                Some(Event::StreamError { condition, text }) => stream_error = Some((condition, text)),
                Some(Event::Disconnected { reason: None, .. }) | None => return Outcome::Stopped,
                Some(Event::Disconnected {
                    reason: Some(reason),
                    permanent,
                }) => {
                    let conflict = stream_error
                        .as_ref()
                        .is_some_and(|(condition, _)| condition == stream_errors::CONFLICT);
                    if permanent || conflict {
                        return Outcome::Fatal(match stream_error {
                            Some((condition, text)) => XmppError::stream(condition, text),
                            None => XmppError::negotiation(reason),
                        });
                    }
                    return Outcome::Lost { reason };
                }
                Some(Event::Connected | Event::SessionEstablished) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;

    enum Step {
        Fail(XmppError),
        /// Connect and stay up
        Stay,
        /// Connect, then lose the transport
        Drop,
        /// Connect, then receive `<conflict/>`
        Conflict,
    }

    #[derive(Default)]
    struct ScriptState {
        steps: Mutex<VecDeque<Step>>,
        handler: Mutex<Option<mpsc::UnboundedSender<Event>>>,
        connects: AtomicU32,
        disconnects: AtomicU32,
        max_attempts: u32,
    }

    #[derive(Clone, Default)]
    struct ScriptedClient(Arc<ScriptState>);

    impl ScriptedClient {
        fn new(steps: Vec<Step>, max_attempts: u32) -> Self {
            Self(Arc::new(ScriptState {
                steps: Mutex::new(steps.into()),
                max_attempts,
                ..Default::default()
            }))
        }

        fn emit(&self, event: Event) {
            if let Some(tx) = self.0.handler.lock().unwrap().as_ref() {
                tx.send(event).unwrap();
            }
        }

        fn connects(&self) -> u32 {
            self.0.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamClient for ScriptedClient {
        async fn connect(&self) -> Result<(), XmppError> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            let step = self.0.steps.lock().unwrap().pop_front();
            match step.unwrap_or_else(|| Step::Fail(XmppError::transport("connection refused"))) {
                Step::Fail(error) => return Err(error),
                Step::Stay => {}
                Step::Drop => self.emit(Event::Disconnected {
                    reason: Some("connection closed".into()),
                    permanent: false,
                }),
                Step::Conflict => {
                    self.emit(Event::StreamError {
                        condition: "conflict".into(),
                        text: Some("Replaced by new connection".into()),
                    });
                    self.emit(Event::Disconnected {
                        reason: Some("conflict".into()),
                        permanent: true,
                    });
                }
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), XmppError> {
            self.0.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_event_handler(&self, handler: Option<mpsc::UnboundedSender<Event>>) {
            *self.0.handler.lock().unwrap() = handler;
        }

        fn max_reconnect_attempts(&self) -> u32 {
            self.0.max_attempts
        }
    }

    fn counting_post_connect(counter: Arc<AtomicU32>) -> PostConnect<ScriptedClient> {
        Arc::new(move |_client| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_until_conflict() {
        let client = ScriptedClient::new(
            vec![
                Step::Fail(XmppError::transport("connection refused")),
                Step::Fail(XmppError::timeout("stream negotiation")),
                Step::Drop,
                Step::Conflict,
            ],
            0,
        );
        let post_connects = Arc::new(AtomicU32::new(0));
        let mut manager = StreamManager::new(client.clone(), Some(counting_post_connect(post_connects.clone())));

        let error = manager.run().await.unwrap_err();
        assert_eq!(error.stream_condition(), Some("conflict"));
        assert_eq!(client.connects(), 4);
        assert_eq!(post_connects.load(Ordering::SeqCst), 2);
        assert!(client.0.handler.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let client = ScriptedClient::new(vec![Step::Fail(XmppError::auth_failed("not-authorized"))], 0);
        let mut manager = StreamManager::new(client.clone(), None);

        assert!(matches!(manager.run().await, Err(XmppError::AuthFailed(_))));
        assert_eq!(client.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let client = ScriptedClient::new(Vec::new(), 2);
        let mut manager = StreamManager::new(client.clone(), None);

        assert!(matches!(manager.run().await, Err(XmppError::Transport(_))));
        assert_eq!(client.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_success() {
        let client = ScriptedClient::new(
            vec![
                Step::Fail(XmppError::transport("refused")),
                Step::Fail(XmppError::transport("refused")),
                Step::Drop,
                Step::Fail(XmppError::auth_failed("not-authorized")),
            ],
            0,
        );
        let mut manager = StreamManager::new(client.clone(), None)
            .with_backoff(Backoff::new(Duration::from_millis(20), 2, Duration::from_secs(180)));

        assert!(manager.run().await.is_err());
        // One delay after the drop, counted from a fresh backoff.
        assert_eq!(manager.backoff.attempt(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_detaches_then_disconnects() {
        let client = ScriptedClient::new(vec![Step::Stay], 0);
        let (connected_tx, connected_rx) = tokio::sync::oneshot::channel();
        let connected_tx = Arc::new(Mutex::new(Some(connected_tx)));
        let post_connect: PostConnect<ScriptedClient> = Arc::new(move |_client| {
            let connected_tx = connected_tx.clone();
            async move {
                if let Some(tx) = connected_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            }
            .boxed()
        });
        let mut manager = StreamManager::new(client.clone(), Some(post_connect));
        let handle = manager.stop_handle();

        let run = tokio::spawn(async move { manager.run().await });
        connected_rx.await.unwrap();
        handle.stop().await.unwrap();

        assert!(run.await.unwrap().is_ok());
        assert_eq!(client.connects(), 1);
        assert_eq!(client.0.disconnects.load(Ordering::SeqCst), 1);
        assert!(client.0.handler.lock().unwrap().is_none());
    }
}
