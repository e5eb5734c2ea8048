//! Supervised sessions against the scripted mock server.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use waddle_endpoint::{Backoff, Client, Presence, PostConnect, Router, StreamManager, XmppError};
use waddle_test_support::{features, MockConnection, MockResult, MockServer};

use common::{client_config, init_tracing, DEFAULT_TIMEOUT};

async fn login(conn: &mut MockConnection) -> MockResult<()> {
    conn.open_stream("localhost", "s1", &[features::SASL_PLAIN]).await?;
    conn.accept_plain_auth().await?;
    conn.open_stream("localhost", "s2", &[features::BIND]).await?;
    conn.answer_bind("test@localhost/test").await?;
    Ok(())
}

/// Sends initial presence and counts connections.
fn announce(connected: mpsc::UnboundedSender<usize>) -> PostConnect<Client> {
    let count = Arc::new(AtomicUsize::new(0));
    Arc::new(move |client: Client| {
        let count = count.clone();
        let connected = connected.clone();
        async move {
            if client.send(Presence::available()).await.is_ok() {
                let _ = connected.send(count.fetch_add(1, Ordering::SeqCst) + 1);
            }
        }
        .boxed()
    })
}

fn fast_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(5), 2, Duration::from_millis(50))
}

#[tokio::test]
async fn reconnects_after_drop_and_stops_on_conflict() {
    init_tracing();
    let mut server = MockServer::start(|mut conn| async move {
        login(&mut conn).await?;
        conn.expect("presence").await?;
        if conn.index() == 0 {
            conn.drop_connection();
            return Ok(());
        }
        conn.send_raw("<stream:error><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>")
            .await?;
        conn.close().await
    })
    .await
    .unwrap();

    let client = Client::new(client_config(server.address()), Router::new(), None).unwrap();
    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let mut manager = StreamManager::new(client, Some(announce(connected_tx))).with_backoff(fast_backoff());

    let error = tokio::time::timeout(DEFAULT_TIMEOUT, manager.run())
        .await
        .expect("supervisor did not give up")
        .unwrap_err();
    assert!(
        matches!(&error, XmppError::Stream { condition, .. } if condition == "conflict"),
        "{error}"
    );

    server.next_outcome().await.unwrap();
    server.next_outcome().await.unwrap();
    assert_eq!(server.accepted(), 2);
    assert_eq!(connected.recv().await, Some(1));
    assert_eq!(connected.recv().await, Some(2));
}

#[tokio::test]
async fn stop_handle_closes_the_session() {
    init_tracing();
    let mut server = MockServer::start(|mut conn| async move {
        login(&mut conn).await?;
        conn.expect("presence").await?;
        conn.expect_close().await
    })
    .await
    .unwrap();

    let client = Client::new(client_config(server.address()), Router::new(), None).unwrap();
    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let mut manager = StreamManager::new(client, Some(announce(connected_tx))).with_backoff(fast_backoff());
    let stop = manager.stop_handle();

    let running = tokio::spawn(async move { manager.run().await });
    let first = tokio::time::timeout(DEFAULT_TIMEOUT, connected.recv()).await.unwrap();
    assert_eq!(first, Some(1));

    stop.stop().await.unwrap();
    let result = tokio::time::timeout(DEFAULT_TIMEOUT, running).await.unwrap().unwrap();
    assert!(result.is_ok());
    server.next_outcome().await.unwrap();
    assert_eq!(server.accepted(), 1);
}
