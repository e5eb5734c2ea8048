//! Typed XMPP packets and the XML codec.
//!
//! Top-level packets form the closed [`Packet`] union. Payloads and
//! extensions are an open set: anything implementing [`Extension`] and
//! registered in the [`TypeRegistry`](crate::registry::TypeRegistry) is
//! decoded into its concrete type, everything else round-trips as a
//! [`Node`].

pub mod error;
pub mod ext;
pub mod iq;
pub mod message;
pub mod node;
pub mod presence;
pub mod sm;
pub mod stream;

use std::any::Any;
use std::fmt;
use std::str::FromStr;

use minidom::{Element, ElementBuilder};

use crate::jid::Jid;
use crate::parser::ns;
use crate::registry::ScopedRegistry;
use crate::XmppError;

pub use error::StanzaError;
pub use iq::{Iq, IqType};
pub use message::{Message, MessageType};
pub use node::Node;
pub use presence::{Presence, PresenceType, Show};
pub use sm::{SmAnswer, SmEnable, SmEnabled, SmFailed, SmRequest, SmResume, SmResumed};
pub use stream::{Handshake, SaslFailure, SaslSuccess, StreamError, StreamFeatures};

/// A typed payload or extension element.
pub trait Extension: fmt::Debug + Send + Sync + 'static {
    /// Namespace of the element this extension serializes to.
    fn namespace(&self) -> &str;

    /// Serialize to an element.
    fn to_element(&self) -> Element;
}

/// Decoding counterpart of [`Extension`].
pub trait FromElement: Sized {
    /// Decode from an element already matched by name and namespace.
    fn from_element(element: &Element) -> Result<Self, XmppError>;
}

/// Object-safe extension handle supporting cloning and downcasting.
pub trait AnyExtension: Extension {
    /// Clone into a new box.
    fn clone_box(&self) -> Box<dyn AnyExtension>;

    /// Access the concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Extension + Clone> AnyExtension for T {
    fn clone_box(&self) -> Box<dyn AnyExtension> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyExtension {
    /// Downcast to a concrete extension type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Whether this extension is of type `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl Clone for Box<dyn AnyExtension> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Attributes shared by all stanzas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
    /// Stanza ID
    pub id: Option<String>,
    /// Sender
    pub from: Option<Jid>,
    /// Recipient
    pub to: Option<Jid>,
    /// `xml:lang`
    pub lang: Option<String>,
}

impl Attrs {
    /// Attributes addressed to `to` with a fresh random ID.
    pub fn to(to: Jid) -> Self {
        Self {
            id: Some(new_id()),
            to: Some(to),
            ..Default::default()
        }
    }

    pub(crate) fn parse(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            id: element.attr("id").map(str::to_string),
            from: element.attr("from").map(Jid::parse).transpose()?,
            to: element.attr("to").map(Jid::parse).transpose()?,
            lang: element.attr("xml:lang").map(str::to_string),
        })
    }

    pub(crate) fn apply(&self, builder: ElementBuilder) -> ElementBuilder {
        builder
            .attr("id", self.id.clone())
            .attr("from", self.from.as_ref().map(Jid::to_string))
            .attr("to", self.to.as_ref().map(Jid::to_string))
            .attr("xml:lang", self.lang.clone())
    }
}

/// Generate a random stanza ID.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Every top-level element an endpoint can receive.
#[derive(Debug, Clone)]
pub enum Packet {
    /// `<iq/>`
    Iq(Iq),
    /// `<message/>`
    Message(Message),
    /// `<presence/>`
    Presence(Presence),
    /// `<stream:error/>`
    StreamError(StreamError),
    /// `<stream:features/>`
    StreamFeatures(StreamFeatures),
    /// SASL `<success/>`
    SaslSuccess(SaslSuccess),
    /// SASL `<failure/>`
    SaslFailure(SaslFailure),
    /// XEP-0114 `<handshake/>`
    Handshake(Handshake),
    /// XEP-0198 `<enabled/>`
    SmEnabled(SmEnabled),
    /// XEP-0198 `<resumed/>`
    SmResumed(SmResumed),
    /// XEP-0198 `<failed/>`
    SmFailed(SmFailed),
    /// XEP-0198 `<r/>`
    SmRequest(SmRequest),
    /// XEP-0198 `<a/>`
    SmAnswer(SmAnswer),
    /// `</stream:stream>` or WebSocket `<close/>`
    StreamClose,
}

impl Packet {
    /// Name used for routing. Stanzas use their element name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Iq(_) => "iq",
            Self::Message(_) => "message",
            Self::Presence(_) => "presence",
            Self::StreamError(_) => "stream:error",
            Self::StreamFeatures(_) => "stream:features",
            Self::SaslSuccess(_) => "sasl:success",
            Self::SaslFailure(_) => "sasl:failure",
            Self::Handshake(_) => "handshake",
            Self::SmEnabled(_) => "sm:enabled",
            Self::SmResumed(_) => "sm:resumed",
            Self::SmFailed(_) => "sm:failed",
            Self::SmRequest(_) => "sm:r",
            Self::SmAnswer(_) => "sm:a",
            Self::StreamClose => "stream:close",
        }
    }

    /// Whether this is a stanza counted by stream management.
    pub fn is_stanza(&self) -> bool {
        matches!(self, Self::Iq(_) | Self::Message(_) | Self::Presence(_))
    }

    /// Common attributes, for stanzas.
    pub fn attrs(&self) -> Option<&Attrs> {
        match self {
            Self::Iq(iq) => Some(&iq.attrs),
            Self::Message(message) => Some(&message.attrs),
            Self::Presence(presence) => Some(&presence.attrs),
            _ => None,
        }
    }

    /// Serialize, placing stanzas in `stanza_ns`.
    ///
    /// Returns `None` for [`Packet::StreamClose`], which is not an element.
    pub fn to_element(&self, stanza_ns: &str) -> Option<Element> {
        Some(match self {
            Self::Iq(iq) => iq.to_element(stanza_ns),
            Self::Message(message) => message.to_element(stanza_ns),
            Self::Presence(presence) => presence.to_element(stanza_ns),
            Self::StreamError(err) => err.to_element(),
            Self::StreamFeatures(features) => features.to_element(),
            Self::SaslSuccess(success) => success.to_element(),
            Self::SaslFailure(failure) => failure.to_element(),
            Self::Handshake(handshake) => handshake.to_element(),
            Self::SmEnabled(enabled) => enabled.to_element(),
            Self::SmResumed(resumed) => resumed.to_element(),
            Self::SmFailed(failed) => failed.to_element(),
            Self::SmRequest(request) => request.to_element(),
            Self::SmAnswer(answer) => answer.to_element(),
            Self::StreamClose => return None,
        })
    }
}

impl From<Iq> for Packet {
    fn from(iq: Iq) -> Self {
        Self::Iq(iq)
    }
}

impl From<Message> for Packet {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<Presence> for Packet {
    fn from(presence: Presence) -> Self {
        Self::Presence(presence)
    }
}

/// Decode a top-level element, dispatching by namespace.
pub fn decode_packet(element: &Element, registry: &ScopedRegistry<'_>) -> Result<Packet, XmppError> {
    let namespace = element.ns();
    let packet = match (namespace.as_str(), element.name()) {
        (ns::STREAM, "features") => Packet::StreamFeatures(StreamFeatures::from_element(element)?),
        (ns::STREAM, "error") => Packet::StreamError(StreamError::from_element(element)?),
        (ns::FRAMING, "close") => Packet::StreamClose,
        (ns::SASL, "success") => Packet::SaslSuccess(SaslSuccess::from_element(element)?),
        (ns::SASL, "failure") => Packet::SaslFailure(SaslFailure::from_element(element)?),
        (ns::SM, "enabled") => Packet::SmEnabled(SmEnabled::from_element(element)?),
        (ns::SM, "resumed") => Packet::SmResumed(SmResumed::from_element(element)?),
        (ns::SM, "failed") => Packet::SmFailed(SmFailed::from_element(element)?),
        (ns::SM, "r") => Packet::SmRequest(SmRequest),
        (ns::SM, "a") => Packet::SmAnswer(SmAnswer::from_element(element)?),
        (ns::JABBER_CLIENT | ns::COMPONENT_ACCEPT, "iq") => Packet::Iq(Iq::decode(element, registry)?),
        (ns::JABBER_CLIENT | ns::COMPONENT_ACCEPT, "message") => {
            Packet::Message(Message::decode(element, registry)?)
        }
        (ns::JABBER_CLIENT | ns::COMPONENT_ACCEPT, "presence") => {
            Packet::Presence(Presence::decode(element, registry)?)
        }
        (ns::COMPONENT_ACCEPT, "handshake") => Packet::Handshake(Handshake::from_element(element)?),
        (other_ns, name) => {
            return Err(XmppError::xml_parse(format!(
                "unexpected element {{{other_ns}}}{name}"
            )))
        }
    };
    Ok(packet)
}

/// Decode with only the process-wide registry.
pub fn decode(element: &Element) -> Result<Packet, XmppError> {
    decode_packet(element, &ScopedRegistry::global_only())
}

// Helpers shared by the stanza and extension codecs.

/// Text of the first child `name` in `namespace`.
pub(crate) fn child_text(element: &Element, name: &str, namespace: &str) -> Option<String> {
    element.get_child(name, namespace).map(Element::text)
}

/// Parse an optional attribute.
pub(crate) fn parse_attr<T: FromStr>(element: &Element, name: &str) -> Result<Option<T>, XmppError> {
    element
        .attr(name)
        .map(|value| {
            value.parse::<T>().map_err(|_| {
                XmppError::xml_parse(format!(
                    "invalid '{name}' attribute on <{}/>: {value}",
                    element.name()
                ))
            })
        })
        .transpose()
}

/// A required attribute.
pub(crate) fn require_attr(element: &Element, name: &str) -> Result<String, XmppError> {
    element
        .attr(name)
        .map(str::to_string)
        .ok_or_else(|| XmppError::xml_parse(format!("<{}/> missing '{name}' attribute", element.name())))
}

/// Fail unless `element` is `{namespace}name`.
pub(crate) fn check_element(element: &Element, name: &str, namespace: &str) -> Result<(), XmppError> {
    if element.is(name, namespace) {
        Ok(())
    } else {
        Err(XmppError::xml_parse(format!(
            "expected {{{namespace}}}{name}, got {{{}}}{}",
            element.ns(),
            element.name()
        )))
    }
}

/// `<name xmlns=namespace>text</name>`.
pub(crate) fn text_element(name: &str, namespace: &str, text: impl Into<String>) -> Element {
    Element::builder(name, namespace).append(text.into()).build()
}

/// XML boolean (`true`/`1`).
pub(crate) fn parse_bool(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Element {
        xml.parse().unwrap()
    }

    #[test]
    fn test_dispatch_by_namespace() {
        let cases = [
            ("<features xmlns='http://etherx.jabber.org/streams'/>", "stream:features"),
            ("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>", "sasl:success"),
            ("<r xmlns='urn:xmpp:sm:3'/>", "sm:r"),
            ("<a xmlns='urn:xmpp:sm:3' h='4'/>", "sm:a"),
            ("<message xmlns='jabber:client'/>", "message"),
            ("<presence xmlns='jabber:component:accept'/>", "presence"),
            ("<handshake xmlns='jabber:component:accept'/>", "handshake"),
            ("<close xmlns='urn:ietf:params:xml:ns:xmpp-framing'/>", "stream:close"),
        ];
        for (xml, name) in cases {
            assert_eq!(decode(&parse(xml)).unwrap().name(), name, "{xml}");
        }
    }

    #[test]
    fn test_unknown_top_level_element_is_an_error() {
        assert!(decode(&parse("<foo xmlns='urn:example'/>")).is_err());
        // Handshake is only valid on component streams.
        assert!(decode(&parse("<handshake xmlns='jabber:client'/>")).is_err());
    }

    #[test]
    fn test_is_stanza() {
        assert!(decode(&parse("<iq xmlns='jabber:client' type='get' id='1'/>")).unwrap().is_stanza());
        assert!(!decode(&parse("<r xmlns='urn:xmpp:sm:3'/>")).unwrap().is_stanza());
    }

    #[test]
    fn test_invalid_jid_attribute_fails_decode() {
        let err = decode(&parse("<message xmlns='jabber:client' from='@bad'/>")).unwrap_err();
        assert!(matches!(err, XmppError::Jid(_)));
    }

    #[test]
    fn test_attrs_round_trip() {
        let attrs = Attrs {
            id: Some("abc".into()),
            from: Some("a@b/c".parse().unwrap()),
            to: Some("d@e".parse().unwrap()),
            lang: None,
        };
        let element = attrs.apply(Element::builder("message", ns::JABBER_CLIENT)).build();
        assert_eq!(element.attr("id"), Some("abc"));
        assert_eq!(element.attr("from"), Some("a@b/c"));
        assert!(element.attr("xml:lang").is_none());
        assert_eq!(Attrs::parse(&element).unwrap(), attrs);
    }
}
