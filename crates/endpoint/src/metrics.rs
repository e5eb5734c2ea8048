//! Endpoint metrics.
//!
//! Instruments come from the global OpenTelemetry meter provider, which the
//! host application installs. Without a provider every recording is a no-op.

use std::sync::OnceLock;

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("waddle-endpoint"))
}

// ============================================================================
// Histograms (Latency)
// ============================================================================

/// Time from dialing to an open transport.
pub fn connect_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("xmpp.client.connect.duration")
        .with_description("Time to establish the transport connection")
        .with_unit("ms")
        .build()
}

/// Time from an open transport to an established session.
pub fn login_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("xmpp.client.login.duration")
        .with_description("Time to negotiate the stream and authenticate")
        .with_unit("ms")
        .build()
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for stanzas sent and received.
pub fn stanzas_processed() -> Counter<u64> {
    meter()
        .u64_counter("xmpp.stanzas.processed")
        .with_description("Total XMPP stanzas processed")
        .with_unit("stanza")
        .build()
}

/// Counter for reconnection attempts made by the stream manager.
pub fn reconnect_attempts() -> Counter<u64> {
    meter()
        .u64_counter("xmpp.reconnect.attempts")
        .with_description("Total reconnection attempts")
        .with_unit("attempt")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for stanzas awaiting a stream management acknowledgement.
pub fn sm_unacked() -> Gauge<i64> {
    meter()
        .i64_gauge("xmpp.sm.unacked")
        .with_description("Stanzas awaiting XEP-0198 acknowledgement")
        .with_unit("stanza")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record transport connect latency.
pub fn record_connect_duration(ms: f64, transport: &str, success: bool) {
    connect_duration().record(
        ms,
        &[
            KeyValue::new("transport", transport.to_string()),
            KeyValue::new("result", if success { "success" } else { "failure" }),
        ],
    );
}

/// Record negotiation latency.
pub fn record_login_duration(ms: f64, role: &str, success: bool) {
    login_duration().record(
        ms,
        &[
            KeyValue::new("role", role.to_string()),
            KeyValue::new("result", if success { "success" } else { "failure" }),
        ],
    );
}

/// Record a stanza being processed.
pub fn record_stanza(stanza_type: &str, direction: &str) {
    stanzas_processed().add(
        1,
        &[
            KeyValue::new("type", stanza_type.to_string()),
            KeyValue::new("direction", direction.to_string()),
        ],
    );
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt(permanent_failure: bool) {
    reconnect_attempts().add(1, &[KeyValue::new("permanent", permanent_failure)]);
}

/// Record the unacked queue depth.
pub fn record_sm_unacked(depth: usize) {
    sm_unacked().record(depth as i64, &[]);
}
