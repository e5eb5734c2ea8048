//! Shared helpers for endpoint integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;
use waddle_endpoint::{Config, Event};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Client options for the mock server: `test@localhost` / `test`, plaintext
/// allowed, no keepalives.
pub fn client_config(address: String) -> Config {
    Config {
        address,
        insecure: true,
        connect_timeout: DEFAULT_TIMEOUT,
        keepalive_interval: Duration::ZERO,
        ..Config::new("test@localhost", "test")
    }
}

/// Same as [`client_config`] with resumable stream management.
pub fn sm_client_config(address: String) -> Config {
    Config {
        stream_management_enable: true,
        stream_management_resume: true,
        ..client_config(address)
    }
}

/// Next event, failing the test after [`DEFAULT_TIMEOUT`].
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(DEFAULT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until the session reports a disconnect.
pub async fn wait_for_disconnect(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    loop {
        let event = next_event(events).await;
        if matches!(event, Event::Disconnected { .. }) {
            return event;
        }
    }
}
