//! XEP-0359: Unique and Stable Stanza IDs.

use minidom::Element;

use crate::jid::Jid;
use crate::parser::ns;
use crate::stanza::{require_attr, Extension, FromElement};
use crate::XmppError;

/// `<stanza-id/>`, assigned by the entity named in `by`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaId {
    /// The assigned ID
    pub id: String,
    /// Assigning entity
    pub by: Jid,
}

impl Extension for StanzaId {
    fn namespace(&self) -> &str {
        ns::SID
    }

    fn to_element(&self) -> Element {
        Element::builder("stanza-id", ns::SID)
            .attr("id", self.id.as_str())
            .attr("by", self.by.to_string())
            .build()
    }
}

impl FromElement for StanzaId {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            id: require_attr(element, "id")?,
            by: Jid::parse(&require_attr(element, "by")?)?,
        })
    }
}

/// `<origin-id/>`, assigned by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginId {
    /// The sender's ID
    pub id: String,
}

impl Extension for OriginId {
    fn namespace(&self) -> &str {
        ns::SID
    }

    fn to_element(&self) -> Element {
        Element::builder("origin-id", ns::SID).attr("id", self.id.as_str()).build()
    }
}

impl FromElement for OriginId {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            id: require_attr(element, "id")?,
        })
    }
}
