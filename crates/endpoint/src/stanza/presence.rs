//! `<presence/>` stanzas.

use std::fmt;
use std::str::FromStr;

use minidom::Element;

use super::{AnyExtension, Attrs, StanzaError};
use crate::jid::Jid;
use crate::registry::{PacketKind, ScopedRegistry};
use crate::XmppError;

/// Presence type. An absent `type` attribute means available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceType {
    /// Available (no `type` attribute)
    #[default]
    Available,
    /// Error reply
    Error,
    /// Request for current presence
    Probe,
    /// Subscription request
    Subscribe,
    /// Subscription approved
    Subscribed,
    /// No longer available
    Unavailable,
    /// Unsubscribe request
    Unsubscribe,
    /// Subscription revoked
    Unsubscribed,
}

impl PresenceType {
    /// The `type` attribute value; `None` for available.
    pub fn as_attr(&self) -> Option<&'static str> {
        match self {
            Self::Available => None,
            Self::Error => Some("error"),
            Self::Probe => Some("probe"),
            Self::Subscribe => Some("subscribe"),
            Self::Subscribed => Some("subscribed"),
            Self::Unavailable => Some("unavailable"),
            Self::Unsubscribe => Some("unsubscribe"),
            Self::Unsubscribed => Some("unsubscribed"),
        }
    }
}

impl FromStr for PresenceType {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::Available),
            "error" => Ok(Self::Error),
            "probe" => Ok(Self::Probe),
            "subscribe" => Ok(Self::Subscribe),
            "subscribed" => Ok(Self::Subscribed),
            "unavailable" => Ok(Self::Unavailable),
            "unsubscribe" => Ok(Self::Unsubscribe),
            "unsubscribed" => Ok(Self::Unsubscribed),
            other => Err(XmppError::xml_parse(format!("invalid presence type: {other}"))),
        }
    }
}

/// Availability sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Show {
    /// Temporarily away
    Away,
    /// Free to chat
    Chat,
    /// Do not disturb
    Dnd,
    /// Extended away
    Xa,
}

impl Show {
    /// Element text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Away => "away",
            Self::Chat => "chat",
            Self::Dnd => "dnd",
            Self::Xa => "xa",
        }
    }
}

impl FromStr for Show {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "away" => Ok(Self::Away),
            "chat" => Ok(Self::Chat),
            "dnd" => Ok(Self::Dnd),
            "xa" => Ok(Self::Xa),
            other => Err(XmppError::xml_parse(format!("invalid show value: {other}"))),
        }
    }
}

impl fmt::Display for Show {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presence stanza.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    /// Common attributes
    pub attrs: Attrs,
    /// Presence type
    pub presence_type: PresenceType,
    /// Availability sub-state
    pub show: Option<Show>,
    /// Human readable status
    pub status: Option<String>,
    /// Resource priority (-128..=127)
    pub priority: Option<i8>,
    /// Extensions in document order
    pub extensions: Vec<Box<dyn AnyExtension>>,
    /// Error, for `type='error'`
    pub error: Option<StanzaError>,
}

impl Presence {
    /// Broadcast availability.
    pub fn available() -> Self {
        Self::default()
    }

    /// Broadcast unavailability.
    pub fn unavailable() -> Self {
        Self {
            presence_type: PresenceType::Unavailable,
            ..Default::default()
        }
    }

    /// A directed presence of the given type.
    pub fn directed(to: Jid, presence_type: PresenceType) -> Self {
        Self {
            attrs: Attrs {
                to: Some(to),
                ..Default::default()
            },
            presence_type,
            ..Default::default()
        }
    }

    /// A subscription request.
    pub fn subscribe(to: Jid) -> Self {
        Self::directed(to, PresenceType::Subscribe)
    }

    /// Append an extension.
    pub fn with_extension(mut self, extension: impl AnyExtension) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// The first extension of type `T`.
    pub fn extension<T: 'static>(&self) -> Option<&T> {
        self.extensions.iter().find_map(|e| e.downcast_ref::<T>())
    }

    /// Decode a `<presence/>`, resolving extensions through the registry.
    pub fn decode(element: &Element, registry: &ScopedRegistry<'_>) -> Result<Self, XmppError> {
        let stanza_ns = element.ns();
        let mut presence = Presence {
            attrs: Attrs::parse(element)?,
            presence_type: element.attr("type").unwrap_or_default().parse()?,
            ..Default::default()
        };

        for child in element.children() {
            if child.ns() == stanza_ns {
                match child.name() {
                    "show" => presence.show = Some(child.text().parse()?),
                    "status" if presence.status.is_none() => presence.status = Some(child.text()),
                    "priority" => {
                        presence.priority = Some(child.text().trim().parse().map_err(|_| {
                            XmppError::xml_parse(format!("invalid priority: {}", child.text()))
                        })?)
                    }
                    "error" => presence.error = Some(StanzaError::from_element(child)?),
                    _ => {}
                }
                continue;
            }
            let extension = registry.resolve(PacketKind::Presence, child);
            presence.extensions.push(extension);
        }

        Ok(presence)
    }

    /// Serialize in the stanza namespace `stanza_ns`.
    pub fn to_element(&self, stanza_ns: &str) -> Element {
        let mut builder = self
            .attrs
            .apply(Element::builder("presence", stanza_ns))
            .attr("type", self.presence_type.as_attr());
        if let Some(show) = self.show {
            builder = builder.append(Element::builder("show", stanza_ns).append(show.as_str()));
        }
        if let Some(ref status) = self.status {
            builder = builder.append(Element::builder("status", stanza_ns).append(status.clone()));
        }
        if let Some(priority) = self.priority {
            builder = builder.append(Element::builder("priority", stanza_ns).append(priority.to_string()));
        }
        for extension in &self.extensions {
            builder = builder.append(extension.to_element());
        }
        if let Some(ref error) = self.error {
            builder = builder.append(error.to_element(stanza_ns));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ns;
    use crate::stanza::ext::muc::MucUser;

    fn decode(xml: &str) -> Result<Presence, XmppError> {
        Presence::decode(&xml.parse().unwrap(), &ScopedRegistry::global_only())
    }

    #[test]
    fn test_available_presence() {
        let presence = decode(
            "<presence xmlns='jabber:client' from='a@b/c'><show>dnd</show><status>busy</status><priority>5</priority></presence>",
        )
        .unwrap();
        assert_eq!(presence.presence_type, PresenceType::Available);
        assert_eq!(presence.show, Some(Show::Dnd));
        assert_eq!(presence.status.as_deref(), Some("busy"));
        assert_eq!(presence.priority, Some(5));
    }

    #[test]
    fn test_presence_types() {
        for (attr, expected) in [
            ("unavailable", PresenceType::Unavailable),
            ("subscribe", PresenceType::Subscribe),
            ("probe", PresenceType::Probe),
        ] {
            let presence = decode(&format!("<presence xmlns='jabber:client' type='{attr}'/>")).unwrap();
            assert_eq!(presence.presence_type, expected);
        }
        assert!(decode("<presence xmlns='jabber:client' type='bogus'/>").is_err());
    }

    #[test]
    fn test_invalid_priority_is_rejected() {
        assert!(decode("<presence xmlns='jabber:client'><priority>999</priority></presence>").is_err());
    }

    #[test]
    fn test_muc_user_extension() {
        let presence = decode(
            "<presence xmlns='jabber:client' from='room@muc.example.com/nick'>\
             <x xmlns='http://jabber.org/protocol/muc#user'><item affiliation='member' role='participant'/>\
             <status code='110'/></x></presence>",
        )
        .unwrap();
        let user = presence.extension::<MucUser>().unwrap();
        assert_eq!(user.statuses, vec![110]);
        assert_eq!(user.items[0].role.as_deref(), Some("participant"));
    }

    #[test]
    fn test_serialization_omits_available_type() {
        let element = Presence::available().to_element(ns::JABBER_CLIENT);
        assert!(element.attr("type").is_none());
        let element = Presence::unavailable().to_element(ns::JABBER_CLIENT);
        assert_eq!(element.attr("type"), Some("unavailable"));
    }
}
