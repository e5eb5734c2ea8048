//! XEP-0333: Chat Markers.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{require_attr, Extension, FromElement};
use crate::XmppError;

/// A chat marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMarker {
    /// The sender wants markers for this message
    Markable,
    /// Message `id` was delivered
    Received { id: String },
    /// Message `id` was displayed
    Displayed { id: String },
    /// Message `id` was acknowledged by the user
    Acknowledged { id: String },
}

impl ChatMarker {
    fn name(&self) -> &'static str {
        match self {
            Self::Markable => "markable",
            Self::Received { .. } => "received",
            Self::Displayed { .. } => "displayed",
            Self::Acknowledged { .. } => "acknowledged",
        }
    }

    /// Referenced message ID, for everything but `markable`.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Markable => None,
            Self::Received { id } | Self::Displayed { id } | Self::Acknowledged { id } => Some(id),
        }
    }
}

impl Extension for ChatMarker {
    fn namespace(&self) -> &str {
        ns::CHAT_MARKERS
    }

    fn to_element(&self) -> Element {
        Element::builder(self.name(), ns::CHAT_MARKERS)
            .attr("id", self.id())
            .build()
    }
}

impl FromElement for ChatMarker {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        match element.name() {
            "markable" => Ok(Self::Markable),
            "received" => Ok(Self::Received {
                id: require_attr(element, "id")?,
            }),
            "displayed" => Ok(Self::Displayed {
                id: require_attr(element, "id")?,
            }),
            "acknowledged" => Ok(Self::Acknowledged {
                id: require_attr(element, "id")?,
            }),
            other => Err(XmppError::xml_parse(format!("unknown chat marker: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers() {
        let element: Element = "<displayed xmlns='urn:xmpp:chat-markers:0' id='m-1'/>".parse().unwrap();
        let marker = ChatMarker::from_element(&element).unwrap();
        assert_eq!(marker, ChatMarker::Displayed { id: "m-1".into() });
        assert_eq!(marker.to_element().attr("id"), Some("m-1"));

        let element: Element = "<received xmlns='urn:xmpp:chat-markers:0'/>".parse().unwrap();
        assert!(ChatMarker::from_element(&element).is_err());
    }
}
