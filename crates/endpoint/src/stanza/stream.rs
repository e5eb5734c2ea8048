//! Stream-level elements: headers, features, errors, STARTTLS, SASL and
//! the XEP-0114 handshake.

use base64::prelude::*;
use minidom::Element;

use super::{check_element, FromElement};
use crate::parser::ns;
use crate::XmppError;

/// Build the opening `<stream:stream>` tag (left unclosed).
pub fn stream_open(to: &str, stanza_ns: &str, lang: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' xmlns='{}' xmlns:stream='{}' version='1.0' xml:lang='{}'>",
        escape_attr(to),
        stanza_ns,
        ns::STREAM,
        escape_attr(lang)
    )
}

/// Build the RFC 7395 `<open/>` element.
pub fn framed_open(to: &str, lang: &str) -> String {
    format!(
        "<open xmlns='{}' to='{}' version='1.0' xml:lang='{}'/>",
        ns::FRAMING,
        escape_attr(to),
        escape_attr(lang)
    )
}

/// Closing tag for a classic stream.
pub const STREAM_CLOSE: &str = "</stream:stream>";

/// Build the RFC 7395 `<close/>` element.
pub fn framed_close() -> String {
    format!("<close xmlns='{}'/>", ns::FRAMING)
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// `<starttls/>` feature advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTlsFeature {
    /// Server marked TLS as required
    pub required: bool,
}

/// RFC 3921 `<session/>` feature advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFeature {
    /// Server marked session establishment as optional
    pub optional: bool,
}

/// `<stream:features/>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFeatures {
    /// STARTTLS, if offered
    pub starttls: Option<StartTlsFeature>,
    /// SASL mechanisms offered
    pub mechanisms: Vec<String>,
    /// Resource binding offered
    pub bind: bool,
    /// Legacy session establishment offered
    pub session: Option<SessionFeature>,
    /// XEP-0198 stream management offered
    pub stream_management: bool,
    /// Every other advertised feature, verbatim
    pub others: Vec<Element>,
}

impl StreamFeatures {
    /// Whether STARTTLS is offered.
    pub fn does_starttls(&self) -> bool {
        self.starttls.is_some()
    }

    /// Whether `mechanism` is offered.
    pub fn supports_mechanism(&self, mechanism: &str) -> bool {
        self.mechanisms.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    /// Whether an RFC 3921 session must be established.
    pub fn session_required(&self) -> bool {
        self.session.is_some_and(|s| !s.optional)
    }

    /// Serialize.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("features", ns::STREAM);
        if let Some(starttls) = self.starttls {
            let mut tls = Element::builder("starttls", ns::TLS);
            if starttls.required {
                tls = tls.append(Element::builder("required", ns::TLS));
            }
            builder = builder.append(tls);
        }
        if !self.mechanisms.is_empty() {
            builder = builder.append(
                Element::builder("mechanisms", ns::SASL).append_all(
                    self.mechanisms
                        .iter()
                        .map(|m| Element::builder("mechanism", ns::SASL).append(m.clone()).build()),
                ),
            );
        }
        if self.bind {
            builder = builder.append(Element::builder("bind", ns::BIND));
        }
        if let Some(session) = self.session {
            let mut element = Element::builder("session", ns::SESSION);
            if session.optional {
                element = element.append(Element::builder("optional", ns::SESSION));
            }
            builder = builder.append(element);
        }
        if self.stream_management {
            builder = builder.append(Element::builder("sm", ns::SM));
        }
        builder.append_all(self.others.iter().cloned()).build()
    }
}

impl FromElement for StreamFeatures {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "features", ns::STREAM)?;
        let mut features = StreamFeatures::default();
        for child in element.children() {
            match (child.ns().as_str(), child.name()) {
                (ns::TLS, "starttls") => {
                    features.starttls = Some(StartTlsFeature {
                        required: child.has_child("required", ns::TLS),
                    })
                }
                (ns::SASL, "mechanisms") => {
                    features.mechanisms = child
                        .children()
                        .filter(|m| m.is("mechanism", ns::SASL))
                        .map(|m| m.text().trim().to_string())
                        .collect()
                }
                (ns::BIND, "bind") => features.bind = true,
                (ns::SESSION, "session") => {
                    features.session = Some(SessionFeature {
                        optional: child.has_child("optional", ns::SESSION),
                    })
                }
                (ns::SM, "sm") => features.stream_management = true,
                _ => features.others.push(child.clone()),
            }
        }
        Ok(features)
    }
}

/// `<stream:error/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    /// Defined condition, e.g. `conflict`
    pub condition: String,
    /// Optional description
    pub text: Option<String>,
}

impl StreamError {
    /// Convert into the crate error type.
    pub fn into_error(self) -> XmppError {
        XmppError::stream(self.condition, self.text)
    }

    /// Serialize.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("error", ns::STREAM)
            .append(Element::builder(self.condition.as_str(), ns::STREAMS));
        if let Some(ref text) = self.text {
            builder = builder.append(Element::builder("text", ns::STREAMS).append(text.clone()));
        }
        builder.build()
    }
}

impl FromElement for StreamError {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        let mut condition = crate::error::stream_errors::UNDEFINED_CONDITION.to_string();
        let mut text = None;
        for child in element.children().filter(|c| c.ns() == ns::STREAMS) {
            if child.name() == "text" {
                text = Some(child.text());
            } else {
                condition = child.name().to_string();
            }
        }
        Ok(Self { condition, text })
    }
}

/// SASL `<success/>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaslSuccess {
    /// Additional data with success, base64 decoded
    pub data: Option<Vec<u8>>,
}

impl SaslSuccess {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("success", ns::SASL);
        if let Some(ref data) = self.data {
            builder = builder.append(BASE64_STANDARD.encode(data));
        }
        builder.build()
    }
}

impl FromElement for SaslSuccess {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        let text = element.text();
        let text = text.trim();
        let data = match text {
            "" | "=" => None,
            encoded => Some(
                BASE64_STANDARD
                    .decode(encoded)
                    .map_err(|e| XmppError::xml_parse(format!("invalid SASL success data: {e}")))?,
            ),
        };
        Ok(Self { data })
    }
}

/// SASL `<failure/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslFailure {
    /// Defined condition, e.g. `not-authorized`
    pub condition: String,
    /// Optional description
    pub text: Option<String>,
}

impl SaslFailure {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        let mut builder =
            Element::builder("failure", ns::SASL).append(Element::builder(self.condition.as_str(), ns::SASL));
        if let Some(ref text) = self.text {
            builder = builder.append(Element::builder("text", ns::SASL).append(text.clone()));
        }
        builder.build()
    }
}

impl FromElement for SaslFailure {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        let mut condition = "not-authorized".to_string();
        let mut text = None;
        for child in element.children().filter(|c| c.ns() == ns::SASL) {
            if child.name() == "text" {
                text = Some(child.text());
            } else {
                condition = child.name().to_string();
            }
        }
        Ok(Self { condition, text })
    }
}

/// SASL PLAIN initial response: `base64("\0" + user + "\0" + password)`.
pub fn sasl_plain(user: &str, password: &str) -> String {
    BASE64_STANDARD.encode(format!("\0{user}\0{password}"))
}

/// `<auth mechanism='PLAIN'>` element.
pub fn sasl_auth(mechanism: &str, initial_response: &str) -> Element {
    Element::builder("auth", ns::SASL)
        .attr("mechanism", mechanism)
        .append(initial_response.to_string())
        .build()
}

/// `<starttls/>` request.
pub fn starttls() -> Element {
    Element::builder("starttls", ns::TLS).build()
}

/// XEP-0114 `<handshake/>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Hex digest sent by the component; empty in the server's reply
    pub value: Option<String>,
}

impl Handshake {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("handshake", ns::COMPONENT_ACCEPT);
        if let Some(ref value) = self.value {
            builder = builder.append(value.clone());
        }
        builder.build()
    }
}

impl FromElement for Handshake {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        let text = element.text();
        Ok(Self {
            value: (!text.is_empty()).then_some(text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_features() {
        let element: Element = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
            <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>\
            <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>SCRAM-SHA-1</mechanism><mechanism>PLAIN</mechanism></mechanisms>\
            <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
            <session xmlns='urn:ietf:params:xml:ns:xmpp-session'><optional/></session>\
            <sm xmlns='urn:xmpp:sm:3'/>\
            <ver xmlns='urn:xmpp:features:rosterver'/>\
            </stream:features>"
            .parse()
            .unwrap();
        let features = StreamFeatures::from_element(&element).unwrap();
        assert_eq!(features.starttls, Some(StartTlsFeature { required: true }));
        assert!(features.supports_mechanism("plain"));
        assert!(!features.supports_mechanism("EXTERNAL"));
        assert!(features.bind);
        assert!(!features.session_required());
        assert!(features.stream_management);
        assert_eq!(features.others.len(), 1);

        let reparsed = StreamFeatures::from_element(&features.to_element()).unwrap();
        assert_eq!(reparsed, features);
    }

    #[test]
    fn test_session_required_without_optional() {
        let features = StreamFeatures {
            session: Some(SessionFeature { optional: false }),
            ..Default::default()
        };
        assert!(features.session_required());
        assert!(!StreamFeatures::default().session_required());
    }

    #[test]
    fn test_stream_error() {
        let element: Element = "<stream:error xmlns:stream='http://etherx.jabber.org/streams'>\
            <conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>\
            <text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>Replaced by new connection</text>\
            </stream:error>"
            .parse()
            .unwrap();
        let err = StreamError::from_element(&element).unwrap();
        assert_eq!(err.condition, "conflict");
        assert_eq!(err.text.as_deref(), Some("Replaced by new connection"));
        assert_eq!(err.into_error().stream_condition(), Some("conflict"));
    }

    #[test]
    fn test_sasl_plain_encoding() {
        assert_eq!(sasl_plain("test", "test"), BASE64_STANDARD.encode("\0test\0test"));
        let auth = sasl_auth("PLAIN", &sasl_plain("user", "pass"));
        assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
        assert_eq!(BASE64_STANDARD.decode(auth.text()).unwrap(), b"\0user\0pass");
    }

    #[test]
    fn test_sasl_failure_condition() {
        let element: Element = "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>"
            .parse()
            .unwrap();
        let failure = SaslFailure::from_element(&element).unwrap();
        assert_eq!(failure.condition, "not-authorized");
    }

    #[test]
    fn test_sasl_success_data() {
        let element: Element = "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>dj1yZWFsbHk=</success>"
            .parse()
            .unwrap();
        let success = SaslSuccess::from_element(&element).unwrap();
        assert_eq!(success.data.as_deref(), Some(b"v=really".as_slice()));
    }

    #[test]
    fn test_stream_open_header() {
        let open = stream_open("example.com", ns::JABBER_CLIENT, "en");
        assert!(open.starts_with("<?xml version='1.0'?><stream:stream to='example.com'"));
        assert!(open.contains("xmlns='jabber:client'"));
        assert!(open.ends_with('>'));
        assert!(!open.ends_with("/>"));
        assert!(framed_open("example.com", "en").ends_with("/>"));
    }

    #[test]
    fn test_handshake() {
        let element: Element = "<handshake xmlns='jabber:component:accept'/>".parse().unwrap();
        assert_eq!(Handshake::from_element(&element).unwrap().value, None);
        let digest = Handshake {
            value: Some("abc".into()),
        };
        assert_eq!(digest.to_element().text(), "abc");
    }
}
