//! Extension type registry.
//!
//! Maps `(packet kind, namespace, local name)` to a decoder producing a typed
//! extension. The process-wide registry is populated with the built-in
//! payloads on first use; applications add their own with
//! [`TypeRegistry::map_extension`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use minidom::Element;
use tracing::debug;

use crate::parser::ns;
use crate::stanza::ext;
use crate::stanza::{AnyExtension, Extension, FromElement, Node};
use crate::XmppError;

/// Local name matching any element of a registered namespace.
pub const WILDCARD: &str = "*";

/// The stanza kinds extensions can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// `<presence/>` extensions
    Presence,
    /// `<message/>` extensions
    Message,
    /// `<iq/>` payloads
    Iq,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence => write!(f, "presence"),
            Self::Message => write!(f, "message"),
            Self::Iq => write!(f, "iq"),
        }
    }
}

/// An XML qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace URI
    pub namespace: String,
    /// Local element name, or [`WILDCARD`]
    pub local: String,
}

impl QName {
    /// Create a qualified name.
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }
}

/// Decoder producing a fresh extension instance from an element.
pub type ExtensionDecoder = fn(&Element) -> Result<Box<dyn AnyExtension>, XmppError>;

fn decode_as<T>(element: &Element) -> Result<Box<dyn AnyExtension>, XmppError>
where
    T: Extension + FromElement + Clone,
{
    Ok(Box::new(T::from_element(element)?))
}

type NamespaceMap = HashMap<String, ExtensionDecoder>;

/// Thread-safe mapping from qualified names to extension decoders.
#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<(PacketKind, String), NamespaceMap>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .entries
            .read()
            .map(|entries| entries.values().map(HashMap::len).sum::<usize>())
            .unwrap_or_default();
        f.debug_struct("TypeRegistry").field("entries", &count).finish()
    }
}

impl TypeRegistry {
    /// An empty registry, typically used as a session-scoped override.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in extension.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        register_defaults(&registry);
        registry
    }

    /// Record `T` as the type decoded for `qname` within `kind` stanzas.
    ///
    /// A `qname.local` of [`WILDCARD`] matches any local name in the namespace
    /// that has no entry of its own.
    pub fn map_extension<T>(&self, kind: PacketKind, qname: QName)
    where
        T: Extension + FromElement + Clone,
    {
        self.map_decoder(kind, qname, decode_as::<T>);
    }

    /// Record a raw decoder for `qname` within `kind` stanzas.
    pub fn map_decoder(&self, kind: PacketKind, qname: QName, decoder: ExtensionDecoder) {
        debug!(%kind, namespace = %qname.namespace, local = %qname.local, "Registering extension");
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .entry((kind, qname.namespace))
            .or_default()
            .insert(qname.local, decoder);
    }

    /// Look up the decoder for `(kind, namespace, local)`.
    ///
    /// Falls back to the namespace's wildcard entry when the local name is
    /// unknown.
    pub fn get_extension(&self, kind: PacketKind, namespace: &str, local: &str) -> Option<ExtensionDecoder> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let locals = entries.get(&(kind, namespace.to_string()))?;
        locals.get(local).or_else(|| locals.get(WILDCARD)).copied()
    }
}

static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();

/// The process-wide registry, initialized with the built-in extensions.
pub fn global() -> &'static TypeRegistry {
    GLOBAL.get_or_init(TypeRegistry::with_defaults)
}

/// Lookup chain consulting an optional session registry before the global one.
#[derive(Debug, Clone, Copy)]
pub struct ScopedRegistry<'a> {
    local: Option<&'a TypeRegistry>,
}

impl<'a> ScopedRegistry<'a> {
    /// Create a chain with an optional local override.
    pub fn new(local: Option<&'a TypeRegistry>) -> Self {
        Self { local }
    }

    /// The global registry alone.
    pub fn global_only() -> Self {
        Self { local: None }
    }

    /// Decode `element` as an extension of a `kind` stanza.
    ///
    /// Returns `None` when no type is registered for the element.
    pub fn decode(&self, kind: PacketKind, element: &Element) -> Option<Result<Box<dyn AnyExtension>, XmppError>> {
        let namespace = element.ns();
        let decoder = self
            .local
            .and_then(|r| r.get_extension(kind, &namespace, element.name()))
            .or_else(|| global().get_extension(kind, &namespace, element.name()))?;
        Some(decoder(element))
    }

    /// Decode `element` into its registered type, keeping it as a raw
    /// [`Node`] when nothing is registered or the registered decoder rejects it.
    ///
    /// A malformed extension never costs the stanza carrying it.
    pub fn resolve(&self, kind: PacketKind, element: &Element) -> Box<dyn AnyExtension> {
        match self.decode(kind, element) {
            Some(Ok(extension)) => extension,
            Some(Err(e)) => {
                debug!(
                    element = element.name(),
                    namespace = %element.ns(),
                    error = %e,
                    "Keeping undecodable extension as a raw node"
                );
                Box::new(Node::new(element.clone()))
            }
            None => Box::new(Node::new(element.clone())),
        }
    }
}

fn register_defaults(registry: &TypeRegistry) {
    use PacketKind::{Iq, Message, Presence};

    // Session negotiation payloads
    registry.map_extension::<ext::bind::Bind>(Iq, QName::new(ns::BIND, "bind"));
    registry.map_extension::<ext::bind::SessionRequest>(Iq, QName::new(ns::SESSION, "session"));

    // Service discovery and entity information
    registry.map_extension::<ext::disco::DiscoInfo>(Iq, QName::new(ns::DISCO_INFO, "query"));
    registry.map_extension::<ext::disco::DiscoItems>(Iq, QName::new(ns::DISCO_ITEMS, "query"));
    registry.map_extension::<ext::version::SoftwareVersion>(Iq, QName::new(ns::VERSION, "query"));
    registry.map_extension::<ext::ping::Ping>(Iq, QName::new(ns::PING, "ping"));
    registry.map_extension::<ext::roster::Roster>(Iq, QName::new(ns::ROSTER, "query"));

    // Publish-Subscribe
    registry.map_extension::<ext::pubsub::PubSub>(Iq, QName::new(ns::PUBSUB, "pubsub"));
    registry.map_extension::<ext::pubsub::PubSubOwner>(Iq, QName::new(ns::PUBSUB_OWNER, "pubsub"));
    registry.map_extension::<ext::pubsub::PubSubEvent>(Message, QName::new(ns::PUBSUB_EVENT, "event"));

    // Archives, commands and forms
    registry.map_extension::<ext::mam::MamQuery>(Iq, QName::new(ns::MAM, "query"));
    registry.map_extension::<ext::mam::MamFin>(Iq, QName::new(ns::MAM, "fin"));
    registry.map_extension::<ext::mam::MamResult>(Message, QName::new(ns::MAM, "result"));
    registry.map_extension::<ext::commands::Command>(Iq, QName::new(ns::COMMANDS, "command"));
    registry.map_extension::<ext::data_form::DataForm>(Message, QName::new(ns::DATA_FORMS, "x"));

    // Out of band data
    registry.map_extension::<ext::oob::OobQuery>(Iq, QName::new(ns::OOB_IQ, "query"));
    registry.map_extension::<ext::oob::Oob>(Message, QName::new(ns::OOB_X, "x"));

    // HTTP request verification and IoT control
    registry.map_extension::<ext::httpauth::HttpAuthConfirm>(Iq, QName::new(ns::HTTP_AUTH, "confirm"));
    registry.map_extension::<ext::httpauth::HttpAuthConfirm>(Message, QName::new(ns::HTTP_AUTH, "confirm"));
    registry.map_extension::<ext::iot::ControlSet>(Iq, QName::new(ns::IOT_CONTROL, "set"));
    registry.map_extension::<ext::iot::ControlSetResponse>(Iq, QName::new(ns::IOT_CONTROL, "setResponse"));

    // Message extensions
    registry.map_extension::<ext::delay::Delay>(Message, QName::new(ns::DELAY, "delay"));
    registry.map_extension::<ext::forward::Forwarded>(Message, QName::new(ns::FORWARD, "forwarded"));
    registry.map_extension::<ext::markers::ChatMarker>(Message, QName::new(ns::CHAT_MARKERS, WILDCARD));
    registry.map_extension::<ext::chat_states::ChatState>(Message, QName::new(ns::CHAT_STATES, WILDCARD));
    registry.map_extension::<ext::hints::Hint>(Message, QName::new(ns::HINTS, WILDCARD));
    registry.map_extension::<ext::receipts::ReceiptRequest>(Message, QName::new(ns::RECEIPTS, "request"));
    registry.map_extension::<ext::receipts::ReceiptReceived>(Message, QName::new(ns::RECEIPTS, "received"));
    registry.map_extension::<ext::xhtml::XhtmlIm>(Message, QName::new(ns::XHTML_IM, "html"));
    registry.map_extension::<ext::stanza_id::StanzaId>(Message, QName::new(ns::SID, "stanza-id"));
    registry.map_extension::<ext::stanza_id::OriginId>(Message, QName::new(ns::SID, "origin-id"));

    // Presence extensions
    registry.map_extension::<ext::muc::MucJoin>(Presence, QName::new(ns::MUC, "x"));
    registry.map_extension::<ext::muc::MucUser>(Presence, QName::new(ns::MUC_USER, "x"));
    registry.map_extension::<ext::muc::MucUser>(Message, QName::new(ns::MUC_USER, "x"));
    registry.map_extension::<ext::delay::Delay>(Presence, QName::new(ns::DELAY, "delay"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza::ext::chat_states::ChatState;
    use crate::stanza::ext::ping::Ping;

    #[derive(Debug, Clone, PartialEq)]
    struct Weather {
        city: String,
    }

    impl Extension for Weather {
        fn namespace(&self) -> &str {
            "urn:example:weather"
        }

        fn to_element(&self) -> Element {
            Element::builder("weather", "urn:example:weather")
                .attr("city", self.city.as_str())
                .build()
        }
    }

    impl FromElement for Weather {
        fn from_element(element: &Element) -> Result<Self, XmppError> {
            Ok(Self {
                city: element.attr("city").unwrap_or_default().to_string(),
            })
        }
    }

    #[test]
    fn test_defaults_registered() {
        let registry = TypeRegistry::with_defaults();
        assert!(registry.get_extension(PacketKind::Iq, ns::PING, "ping").is_some());
        assert!(registry.get_extension(PacketKind::Iq, ns::DISCO_INFO, "query").is_some());
        assert!(registry.get_extension(PacketKind::Message, ns::PING, "ping").is_none());
    }

    #[test]
    fn test_wildcard_matches_unknown_local() {
        let registry = TypeRegistry::with_defaults();
        let element = Element::builder("composing", ns::CHAT_STATES).build();
        let decoder = registry
            .get_extension(PacketKind::Message, ns::CHAT_STATES, "composing")
            .unwrap();
        let ext = decoder(&element).unwrap();
        assert_eq!(ext.downcast_ref::<ChatState>(), Some(&ChatState::Composing));
    }

    #[test]
    fn test_exact_entry_wins_over_wildcard() {
        let registry = TypeRegistry::new();
        registry.map_extension::<Weather>(PacketKind::Message, QName::new("urn:example:weather", WILDCARD));
        registry.map_extension::<Ping>(PacketKind::Message, QName::new("urn:example:weather", "ping"));

        let element = Element::builder("ping", "urn:example:weather").build();
        let decoder = registry
            .get_extension(PacketKind::Message, "urn:example:weather", "ping")
            .unwrap();
        assert!(decoder(&element).unwrap().downcast_ref::<Ping>().is_some());
    }

    #[test]
    fn test_custom_extension_decodes_to_registered_type() {
        let registry = TypeRegistry::new();
        registry.map_extension::<Weather>(PacketKind::Message, QName::new("urn:example:weather", "weather"));

        let element = Element::builder("weather", "urn:example:weather")
            .attr("city", "Paris")
            .build();
        let scoped = ScopedRegistry::new(Some(&registry));
        let decoded = scoped.decode(PacketKind::Message, &element).unwrap().unwrap();
        assert_eq!(
            decoded.downcast_ref::<Weather>(),
            Some(&Weather { city: "Paris".into() })
        );
    }

    #[test]
    fn test_scoped_registry_falls_back_to_global() {
        let local = TypeRegistry::new();
        let scoped = ScopedRegistry::new(Some(&local));
        let element = Element::builder("ping", ns::PING).build();
        let decoded = scoped.decode(PacketKind::Iq, &element).unwrap().unwrap();
        assert!(decoded.downcast_ref::<Ping>().is_some());

        let unknown = Element::builder("thing", "urn:example:unknown").build();
        assert!(scoped.decode(PacketKind::Iq, &unknown).is_none());
    }
}
