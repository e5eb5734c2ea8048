//! XEP-0198 Stream Management nonzas.

use minidom::Element;

use super::{parse_attr, parse_bool, require_attr, FromElement};
use crate::parser::ns;
use crate::XmppError;

fn required_h(element: &Element) -> Result<u32, XmppError> {
    parse_attr(element, "h")?.ok_or_else(|| XmppError::xml_parse(format!("<{}/> missing 'h'", element.name())))
}

/// `<enable/>`, sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmEnable {
    /// Request resumption support
    pub resume: bool,
    /// Preferred maximum resumption time in seconds
    pub max: Option<u32>,
}

impl SmEnable {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        Element::builder("enable", ns::SM)
            .attr("resume", self.resume.then_some("true"))
            .attr("max", self.max.map(|m| m.to_string()))
            .build()
    }
}

/// `<enabled/>`, the server's confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmEnabled {
    /// Resumption ID
    pub id: Option<String>,
    /// Whether the stream can be resumed
    pub resume: bool,
    /// Maximum resumption time in seconds
    pub max: Option<u32>,
    /// Preferred reconnection address
    pub location: Option<String>,
}

impl SmEnabled {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        Element::builder("enabled", ns::SM)
            .attr("id", self.id.clone())
            .attr("resume", self.resume.then_some("true"))
            .attr("max", self.max.map(|m| m.to_string()))
            .attr("location", self.location.clone())
            .build()
    }
}

impl FromElement for SmEnabled {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            id: element.attr("id").map(str::to_string),
            resume: parse_bool(element.attr("resume")),
            max: parse_attr(element, "max")?,
            location: element.attr("location").map(str::to_string),
        })
    }
}

/// `<resume/>`, sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmResume {
    /// Inbound stanzas handled before the drop
    pub h: u32,
    /// Resumption ID from `<enabled/>`
    pub previd: String,
}

impl SmResume {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        Element::builder("resume", ns::SM)
            .attr("h", self.h.to_string())
            .attr("previd", self.previd.as_str())
            .build()
    }
}

/// `<resumed/>`, the server's confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmResumed {
    /// Outbound stanzas the server handled
    pub h: u32,
    /// Echo of the resumption ID
    pub previd: String,
}

impl SmResumed {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        Element::builder("resumed", ns::SM)
            .attr("h", self.h.to_string())
            .attr("previd", self.previd.as_str())
            .build()
    }
}

impl FromElement for SmResumed {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            h: required_h(element)?,
            previd: require_attr(element, "previd")?,
        })
    }
}

/// `<failed/>`, returned when enabling or resuming fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmFailed {
    /// Outbound stanzas the server handled, if known
    pub h: Option<u32>,
    /// Stanza error condition, if given
    pub condition: Option<String>,
}

impl SmFailed {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("failed", ns::SM).attr("h", self.h.map(|h| h.to_string()));
        if let Some(ref condition) = self.condition {
            builder = builder.append(Element::builder(condition.as_str(), ns::STANZAS));
        }
        builder.build()
    }
}

impl FromElement for SmFailed {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            h: parse_attr(element, "h")?,
            condition: element
                .children()
                .find(|c| c.ns() == ns::STANZAS)
                .map(|c| c.name().to_string()),
        })
    }
}

/// `<r/>`, an acknowledgement request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmRequest;

impl SmRequest {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        Element::builder("r", ns::SM).build()
    }
}

/// `<a/>`, an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmAnswer {
    /// Count of handled stanzas
    pub h: u32,
}

impl SmAnswer {
    /// Serialize.
    pub fn to_element(&self) -> Element {
        Element::builder("a", ns::SM).attr("h", self.h.to_string()).build()
    }
}

impl FromElement for SmAnswer {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self { h: required_h(element)? })
    }
}
