//! # waddle-endpoint
//!
//! XMPP endpoint library for Waddle Social.
//!
//! This crate connects to an XMPP server either as a client (RFC 6120/6121)
//! or as an external component (XEP-0114), and keeps the session alive with
//! a reconnecting supervisor.
//!
//! ## Architecture
//!
//! - **Transports**: TCP with STARTTLS, or WebSocket framing (RFC 7395)
//! - **Parser**: incremental XML framer yielding typed [`Packet`]s
//! - **Registry**: `(kind, namespace, name)` to extension decoder map,
//!   process-wide with optional per-session overrides
//! - **Session**: STARTTLS, SASL PLAIN, bind, session, XEP-0198 enable/resume
//! - **Router**: first matching route handles an inbound stanza
//! - **Stream manager**: reconnects with capped exponential backoff
//!
//! ## XEP Support
//!
//! - XEP-0030 (Service Discovery)
//! - XEP-0045 (Multi-User Chat, join and leave)
//! - XEP-0114 (Jabber Component Protocol)
//! - XEP-0198 (Stream Management)
//! - Payload codecs for roster, pubsub, MAM, forwarding, receipts, markers
//!   and the other extensions listed in [`stanza::ext`]

pub mod backoff;
pub mod client;
pub mod component;
pub mod config;
pub mod jid;
pub mod metrics;
pub mod parser;
pub mod registry;
pub mod router;
pub mod session;
pub mod stanza;
pub mod stream_management;
pub mod stream_manager;
pub mod transport;

mod connection;
mod error;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use backoff::Backoff;
pub use client::{Client, SmStatus};
pub use component::{handshake_digest, Component, ComponentOptions};
pub use config::{Config, Credential};
pub use connection::{ErrorHandler, PendingIq};
pub use error::{stream_errors, StanzaErrorCondition, StanzaErrorType, XmppError};
pub use jid::{Jid, JidError};
pub use parser::{ns, StreamHeader};
pub use registry::{PacketKind, QName, TypeRegistry};
pub use router::{Handler, Route, Router, Sender};
pub use session::{Event, SessionState};
pub use stanza::{Iq, IqType, Message, MessageType, Packet, Presence, PresenceType};
pub use stream_manager::{PostConnect, StopHandle, StreamClient, StreamManager};
pub use transport::{AnyTransport, Direction, StreamLogger, TcpTransport, TracingStreamLogger, WebSocketTransport};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
