//! XEP-0085: Chat State Notifications.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{Extension, FromElement};
use crate::XmppError;

/// A chat state. Every state is its own element in the chat states namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    /// Actively participating
    Active,
    /// Composing a message
    Composing,
    /// Stopped composing
    Paused,
    /// Not actively participating
    Inactive,
    /// Left the conversation
    Gone,
}

impl ChatState {
    /// Element name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Composing => "composing",
            Self::Paused => "paused",
            Self::Inactive => "inactive",
            Self::Gone => "gone",
        }
    }
}

impl Extension for ChatState {
    fn namespace(&self) -> &str {
        ns::CHAT_STATES
    }

    fn to_element(&self) -> Element {
        Element::builder(self.as_str(), ns::CHAT_STATES).build()
    }
}

impl FromElement for ChatState {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        match element.name() {
            "active" => Ok(Self::Active),
            "composing" => Ok(Self::Composing),
            "paused" => Ok(Self::Paused),
            "inactive" => Ok(Self::Inactive),
            "gone" => Ok(Self::Gone),
            other => Err(XmppError::xml_parse(format!("unknown chat state: {other}"))),
        }
    }
}
