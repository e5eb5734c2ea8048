//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::jid::Jid;
use crate::parser::DEFAULT_MAX_STANZA_SIZE;
use crate::registry::TypeRegistry;
use crate::transport::{StreamLogger, TransportConfig};
use crate::XmppError;

/// Default client port (RFC 6120 Section 3.2).
pub const DEFAULT_PORT: u16 = 5222;

/// Client credential. Both variants are sent with SASL PLAIN.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    /// Account password
    Password(String),
    /// OAuth bearer token accepted by the server in place of a password
    OauthToken(String),
}

impl Credential {
    /// The secret sent as the SASL PLAIN password.
    pub fn secret(&self) -> &str {
        match self {
            Self::Password(secret) | Self::OauthToken(secret) => secret,
        }
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::Password(String::new())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::OauthToken(_) => f.write_str("OauthToken(<redacted>)"),
        }
    }
}

pub(crate) fn duration_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Client connection options.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` to dial; defaults to the JID domain on port 5222
    pub address: String,
    /// `ws://` or `wss://` URL; when set the WebSocket transport is used
    pub websocket_url: Option<String>,
    /// Account JID, e.g. `user@example.com`
    pub jid: String,
    /// Password or OAuth token
    pub credential: Credential,
    /// Resource to request at bind. Defaults to the resource of `jid`; the
    /// server picks one when neither is set
    pub resource: Option<String>,
    /// `xml:lang` of the stream
    pub lang: String,
    /// Bound on dialing plus the whole negotiation, in seconds
    #[serde(deserialize_with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Allow plaintext streams and skip certificate verification
    pub insecure: bool,
    /// Negotiate XEP-0198 after binding
    pub stream_management_enable: bool,
    /// Request resumption support when enabling XEP-0198
    pub stream_management_resume: bool,
    /// Cap on stanzas awaiting acknowledgement
    pub sm_max_unacked: usize,
    /// Interval of `<r/>` or whitespace keepalives, in seconds; zero disables
    #[serde(deserialize_with = "duration_secs")]
    pub keepalive_interval: Duration,
    /// Consecutive transient failures the supervisor tolerates; zero is unlimited
    pub max_reconnect_attempts: u32,
    /// Cap on a single buffered inbound element
    pub max_stanza_size: usize,
    /// Prebuilt TLS client configuration
    #[serde(skip)]
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    /// Sink for raw stream traffic
    #[serde(skip)]
    pub stream_logger: Option<Arc<dyn StreamLogger>>,
    /// Session-scoped extensions stacked on the process-wide registry
    #[serde(skip)]
    pub registry: Option<Arc<TypeRegistry>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::new(),
            websocket_url: None,
            jid: String::new(),
            credential: Credential::default(),
            resource: None,
            lang: "en".to_string(),
            connect_timeout: Duration::from_secs(15),
            insecure: false,
            stream_management_enable: false,
            stream_management_resume: false,
            sm_max_unacked: 1000,
            keepalive_interval: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            max_stanza_size: DEFAULT_MAX_STANZA_SIZE,
            tls_config: None,
            stream_logger: None,
            registry: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("address", &self.address)
            .field("websocket_url", &self.websocket_url)
            .field("jid", &self.jid)
            .field("credential", &self.credential)
            .field("resource", &self.resource)
            .field("lang", &self.lang)
            .field("connect_timeout", &self.connect_timeout)
            .field("insecure", &self.insecure)
            .field("stream_management_enable", &self.stream_management_enable)
            .field("stream_management_resume", &self.stream_management_resume)
            .field("sm_max_unacked", &self.sm_max_unacked)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("max_stanza_size", &self.max_stanza_size)
            .finish_non_exhaustive()
    }
}

/// Append the default port unless `address` already ends in `:<digits>`.
pub(crate) fn with_default_port(address: &str, port: u16) -> String {
    let has_port = match address.rsplit_once(':') {
        // A bare IPv6 literal has colons but no port.
        Some((host, port)) => {
            !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    };
    if has_port {
        address.to_string()
    } else {
        format!("{address}:{port}")
    }
}

impl Config {
    /// A config for `jid` authenticating with `password`.
    pub fn new(jid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            credential: Credential::Password(password.into()),
            ..Default::default()
        }
    }

    /// Check the options and fill in derived defaults. Returns the parsed JID.
    pub fn validate(&mut self) -> Result<Jid, XmppError> {
        let jid = Jid::parse(&self.jid)?;
        if jid.local().is_none() {
            return Err(XmppError::config(format!("'{jid}' has no local part")));
        }
        if self.credential.secret().is_empty() {
            return Err(XmppError::config("a password or OAuth token is required"));
        }
        if self.address.is_empty() {
            self.address = jid.domain().to_string();
        }
        self.address = with_default_port(&self.address, DEFAULT_PORT);
        if self.resource.is_none() {
            self.resource = jid.resource().map(str::to_string);
        }
        if let Some(url) = &self.websocket_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(XmppError::config(format!("'{url}' is not a ws:// or wss:// URL")));
            }
        }
        if self.sm_max_unacked == 0 {
            return Err(XmppError::config("sm_max_unacked must be at least 1"));
        }
        if self.lang.is_empty() {
            self.lang = "en".to_string();
        }
        Ok(jid)
    }

    pub(crate) fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            address: self.address.clone(),
            websocket_url: self.websocket_url.clone(),
            connect_timeout: self.connect_timeout,
            insecure: self.insecure,
            tls_config: self.tls_config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_defaults_to_jid_domain() {
        let mut config = Config::new("test@localhost", "test");
        let jid = config.validate().unwrap();
        assert_eq!(jid.domain(), "localhost");
        assert_eq!(config.address, "localhost:5222");
    }

    #[test]
    fn test_resource_comes_from_jid() {
        let mut config = Config::new("test@localhost/phone", "test");
        config.validate().unwrap();
        assert_eq!(config.resource.as_deref(), Some("phone"));

        let mut config = Config {
            resource: Some("laptop".into()),
            ..Config::new("test@localhost/phone", "test")
        };
        config.validate().unwrap();
        assert_eq!(config.resource.as_deref(), Some("laptop"));

        let mut config = Config::new("test@localhost", "test");
        config.validate().unwrap();
        assert!(config.resource.is_none());
    }

    #[test]
    fn test_explicit_port_is_kept() {
        let mut config = Config {
            address: "xmpp.example.com:5223".into(),
            ..Config::new("a@example.com", "pw")
        };
        config.validate().unwrap();
        assert_eq!(config.address, "xmpp.example.com:5223");
    }

    #[test]
    fn test_default_port_handles_ipv6() {
        assert_eq!(with_default_port("[::1]", 5222), "[::1]:5222");
        assert_eq!(with_default_port("[::1]:5300", 5222), "[::1]:5300");
        assert_eq!(with_default_port("::1", 5222), "::1:5222");
    }

    #[test]
    fn test_missing_credential_is_rejected() {
        let mut config = Config::new("a@example.com", "");
        assert!(matches!(config.validate(), Err(XmppError::Config(_))));
    }

    #[test]
    fn test_invalid_jid_is_rejected() {
        let mut config = Config::new("@example.com", "pw");
        assert!(matches!(config.validate(), Err(XmppError::Jid(_))));
    }

    #[test]
    fn test_debug_redacts_credential() {
        let config = Config::new("a@example.com", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"jid": "a@example.com", "credential": {"oauth_token": "tok"}, "connect_timeout": 5, "insecure": true}"#,
        )
        .unwrap();
        assert_eq!(config.credential, Credential::OauthToken("tok".into()));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.lang, "en");
        assert_eq!(config.sm_max_unacked, 1000);
        assert!(config.insecure);
    }
}
