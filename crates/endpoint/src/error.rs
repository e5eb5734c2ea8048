//! Error types for XMPP endpoints.

use std::str::FromStr;

use thiserror::Error;

use crate::jid::JidError;

/// XMPP endpoint errors.
///
/// Every error is either permanent (the supervisor gives up) or transient
/// (the supervisor backs off and reconnects), see [`XmppError::is_permanent`].
#[derive(Debug, Error)]
pub enum XmppError {
    /// IO error (network, socket)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration or handshake error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Network-level failure such as a refused dial or a reset connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// A deadline expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// XML parsing error
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Unexpected element or missing feature during stream negotiation
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// TLS required but unavailable, or certificate verification failed
    #[error("Security error: {0}")]
    Security(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Stream error received from the peer
    #[error("Stream error: {condition}")]
    Stream {
        /// Defined condition, e.g. `conflict`
        condition: String,
        /// Optional human readable text
        text: Option<String>,
    },

    /// Stanza error (an `<error/>` child on a reply)
    #[error("Stanza error: {condition}")]
    Stanza {
        /// Error condition
        condition: StanzaErrorCondition,
        /// Error type
        error_type: StanzaErrorType,
        /// Optional text description
        text: Option<String>,
    },

    /// The unacked stanza queue is full
    #[error("Unacked queue is full ({0} stanzas awaiting acknowledgement)")]
    Backpressure(usize),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Malformed JID
    #[error("Invalid JID: {0}")]
    Jid(#[from] JidError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No established session
    #[error("Not connected")]
    NotConnected,

    /// The peer closed the stream or the transport
    #[error("Connection closed")]
    Closed,
}

impl XmppError {
    /// Create a new transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new XML parse error.
    pub fn xml_parse(msg: impl Into<String>) -> Self {
        Self::XmlParse(msg.into())
    }

    /// Create a new negotiation error.
    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::Negotiation(msg.into())
    }

    /// Create a new security error.
    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    /// Create a new authentication error.
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed(msg.into())
    }

    /// Create a new stream error.
    pub fn stream(condition: impl Into<String>, text: Option<String>) -> Self {
        Self::Stream {
            condition: condition.into(),
            text,
        }
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a stanza error for 'feature-not-implemented'.
    pub fn feature_not_implemented(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::FeatureNotImplemented,
            error_type: StanzaErrorType::Cancel,
            text,
        }
    }

    /// Create a stanza error for 'bad-request'.
    pub fn bad_request(text: Option<String>) -> Self {
        Self::Stanza {
            condition: StanzaErrorCondition::BadRequest,
            error_type: StanzaErrorType::Modify,
            text,
        }
    }

    /// Whether retrying the connection cannot succeed.
    ///
    /// Authentication failures, missing TLS, stream errors and decode errors
    /// during negotiation are permanent. Dial errors, timeouts and unexpected
    /// closes are transient.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Tls(_)
            | Self::XmlParse(_)
            | Self::Negotiation(_)
            | Self::Security(_)
            | Self::AuthFailed(_)
            | Self::Stream { .. }
            | Self::Jid(_)
            | Self::Config(_) => true,
            Self::Io(_)
            | Self::Transport(_)
            | Self::Timeout(_)
            | Self::NotConnected
            | Self::Closed
            | Self::Stanza { .. }
            | Self::Backpressure(_)
            | Self::Cancelled => false,
        }
    }

    /// Stream error condition, if this is a stream error.
    pub fn stream_condition(&self) -> Option<&str> {
        match self {
            Self::Stream { condition, .. } => Some(condition),
            _ => None,
        }
    }
}

/// XMPP stanza error conditions (RFC 6120 Section 8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    /// Bad request (malformed XML, etc.)
    BadRequest,
    /// Conflict (e.g., resource already bound)
    Conflict,
    /// Feature not implemented
    FeatureNotImplemented,
    /// Forbidden (permission denied)
    Forbidden,
    /// Gone (entity no longer available)
    Gone,
    /// Internal server error
    InternalServerError,
    /// Item not found
    ItemNotFound,
    /// JID malformed
    JidMalformed,
    /// Not acceptable
    NotAcceptable,
    /// Not allowed
    NotAllowed,
    /// Not authorized
    NotAuthorized,
    /// Policy violation
    PolicyViolation,
    /// Recipient unavailable
    RecipientUnavailable,
    /// Redirect
    Redirect,
    /// Registration required
    RegistrationRequired,
    /// Remote server not found
    RemoteServerNotFound,
    /// Remote server timeout
    RemoteServerTimeout,
    /// Resource constraint
    ResourceConstraint,
    /// Service unavailable
    ServiceUnavailable,
    /// Subscription required
    SubscriptionRequired,
    /// Undefined condition
    UndefinedCondition,
    /// Unexpected request
    UnexpectedRequest,
}

impl StanzaErrorCondition {
    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::Forbidden => "forbidden",
            Self::Gone => "gone",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::JidMalformed => "jid-malformed",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAllowed => "not-allowed",
            Self::NotAuthorized => "not-authorized",
            Self::PolicyViolation => "policy-violation",
            Self::RecipientUnavailable => "recipient-unavailable",
            Self::Redirect => "redirect",
            Self::RegistrationRequired => "registration-required",
            Self::RemoteServerNotFound => "remote-server-not-found",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::ResourceConstraint => "resource-constraint",
            Self::ServiceUnavailable => "service-unavailable",
            Self::SubscriptionRequired => "subscription-required",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnexpectedRequest => "unexpected-request",
        }
    }
}

impl FromStr for StanzaErrorCondition {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bad-request" => Self::BadRequest,
            "conflict" => Self::Conflict,
            "feature-not-implemented" => Self::FeatureNotImplemented,
            "forbidden" => Self::Forbidden,
            "gone" => Self::Gone,
            "internal-server-error" => Self::InternalServerError,
            "item-not-found" => Self::ItemNotFound,
            "jid-malformed" => Self::JidMalformed,
            "not-acceptable" => Self::NotAcceptable,
            "not-allowed" => Self::NotAllowed,
            "not-authorized" => Self::NotAuthorized,
            "policy-violation" => Self::PolicyViolation,
            "recipient-unavailable" => Self::RecipientUnavailable,
            "redirect" => Self::Redirect,
            "registration-required" => Self::RegistrationRequired,
            "remote-server-not-found" => Self::RemoteServerNotFound,
            "remote-server-timeout" => Self::RemoteServerTimeout,
            "resource-constraint" => Self::ResourceConstraint,
            "service-unavailable" => Self::ServiceUnavailable,
            "subscription-required" => Self::SubscriptionRequired,
            "undefined-condition" => Self::UndefinedCondition,
            "unexpected-request" => Self::UnexpectedRequest,
            other => {
                return Err(XmppError::xml_parse(format!(
                    "unknown stanza error condition: {other}"
                )))
            }
        })
    }
}

impl std::fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// XMPP stanza error types (RFC 6120 Section 8.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after providing credentials
    Auth,
    /// Do not retry (unrecoverable error)
    Cancel,
    /// Proceed (the condition was only a warning)
    Continue,
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    /// Get the type attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Continue => "continue",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }
}

impl FromStr for StanzaErrorType {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(Self::Auth),
            "cancel" => Ok(Self::Cancel),
            "continue" => Ok(Self::Continue),
            "modify" => Ok(Self::Modify),
            "wait" => Ok(Self::Wait),
            other => Err(XmppError::xml_parse(format!(
                "unknown stanza error type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Common stream error conditions.
pub mod stream_errors {
    /// Stream error: bad format
    pub const BAD_FORMAT: &str = "bad-format";
    /// Stream error: conflict (another session took over the resource)
    pub const CONFLICT: &str = "conflict";
    /// Stream error: connection timeout
    pub const CONNECTION_TIMEOUT: &str = "connection-timeout";
    /// Stream error: host gone
    pub const HOST_GONE: &str = "host-gone";
    /// Stream error: host unknown
    pub const HOST_UNKNOWN: &str = "host-unknown";
    /// Stream error: internal server error
    pub const INTERNAL_SERVER_ERROR: &str = "internal-server-error";
    /// Stream error: invalid namespace
    pub const INVALID_NAMESPACE: &str = "invalid-namespace";
    /// Stream error: not authorized
    pub const NOT_AUTHORIZED: &str = "not-authorized";
    /// Stream error: not well-formed
    pub const NOT_WELL_FORMED: &str = "not-well-formed";
    /// Stream error: policy violation
    pub const POLICY_VIOLATION: &str = "policy-violation";
    /// Stream error: reset
    pub const RESET: &str = "reset";
    /// Stream error: see other host
    pub const SEE_OTHER_HOST: &str = "see-other-host";
    /// Stream error: system shutdown
    pub const SYSTEM_SHUTDOWN: &str = "system-shutdown";
    /// Stream error: undefined condition
    pub const UNDEFINED_CONDITION: &str = "undefined-condition";
    /// Stream error: unsupported version
    pub const UNSUPPORTED_VERSION: &str = "unsupported-version";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stanza_error_conditions() {
        assert_eq!(StanzaErrorCondition::BadRequest.as_str(), "bad-request");
        assert_eq!(StanzaErrorCondition::NotAuthorized.as_str(), "not-authorized");
        assert_eq!(
            "item-not-found".parse::<StanzaErrorCondition>().unwrap(),
            StanzaErrorCondition::ItemNotFound
        );
        assert!("nonsense".parse::<StanzaErrorCondition>().is_err());
    }

    #[test]
    fn test_stanza_error_types() {
        assert_eq!("wait".parse::<StanzaErrorType>().unwrap(), StanzaErrorType::Wait);
        assert_eq!(StanzaErrorType::Continue.to_string(), "continue");
    }

    #[test]
    fn test_permanent_failures() {
        assert!(XmppError::auth_failed("not-authorized").is_permanent());
        assert!(XmppError::security("TLS required").is_permanent());
        assert!(XmppError::stream(stream_errors::HOST_UNKNOWN, None).is_permanent());
        assert!(XmppError::negotiation("unexpected element").is_permanent());
    }

    #[test]
    fn test_transient_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(!XmppError::from(io).is_permanent());
        assert!(!XmppError::timeout("read").is_permanent());
        assert!(!XmppError::Closed.is_permanent());
        assert!(!XmppError::transport("reset").is_permanent());
    }

    #[test]
    fn test_stream_condition() {
        let err = XmppError::stream(stream_errors::CONFLICT, Some("replaced".into()));
        assert_eq!(err.stream_condition(), Some("conflict"));
        assert_eq!(XmppError::Cancelled.stream_condition(), None);
    }
}
