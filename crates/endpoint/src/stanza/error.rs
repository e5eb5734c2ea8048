//! The `<error/>` child of stanzas (RFC 6120 Section 8.3).

use minidom::Element;

use crate::error::{StanzaErrorCondition, StanzaErrorType};
use crate::parser::ns;
use crate::XmppError;

/// A stanza-level error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaError {
    /// Error type
    pub error_type: StanzaErrorType,
    /// Defined condition
    pub condition: StanzaErrorCondition,
    /// Optional description
    pub text: Option<String>,
    /// Entity that generated the error
    pub by: Option<String>,
}

impl StanzaError {
    /// An error with no text.
    pub fn new(error_type: StanzaErrorType, condition: StanzaErrorCondition) -> Self {
        Self {
            error_type,
            condition,
            text: None,
            by: None,
        }
    }

    /// Attach a description.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Decode an `<error/>` element. Unknown conditions map to
    /// `undefined-condition`.
    pub fn from_element(element: &Element) -> Result<Self, XmppError> {
        let error_type = element
            .attr("type")
            .ok_or_else(|| XmppError::xml_parse("<error/> missing 'type' attribute"))?
            .parse()?;

        let mut condition = StanzaErrorCondition::UndefinedCondition;
        let mut text = None;
        for child in element.children().filter(|c| c.ns() == ns::STANZAS) {
            if child.name() == "text" {
                text = Some(child.text());
            } else if let Ok(parsed) = child.name().parse() {
                condition = parsed;
            }
        }

        Ok(Self {
            error_type,
            condition,
            text,
            by: element.attr("by").map(str::to_string),
        })
    }

    /// Serialize in the stanza namespace `stanza_ns`.
    pub fn to_element(&self, stanza_ns: &str) -> Element {
        let mut builder = Element::builder("error", stanza_ns)
            .attr("type", self.error_type.as_str())
            .attr("by", self.by.clone())
            .append(Element::builder(self.condition.as_str(), ns::STANZAS));
        if let Some(ref text) = self.text {
            builder = builder.append(
                Element::builder("text", ns::STANZAS)
                    .attr("xml:lang", "en")
                    .append(text.clone()),
            );
        }
        builder.build()
    }

    /// Convert into the crate error carried back to `send_iq` callers.
    pub fn into_error(self) -> XmppError {
        XmppError::Stanza {
            condition: self.condition,
            error_type: self.error_type,
            text: self.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_element() {
        let err = StanzaError::new(StanzaErrorType::Cancel, StanzaErrorCondition::FeatureNotImplemented)
            .with_text("not here");
        let element = err.to_element(ns::JABBER_CLIENT);
        assert_eq!(element.attr("type"), Some("cancel"));
        assert!(element.has_child("feature-not-implemented", ns::STANZAS));
        assert_eq!(element.get_child("text", ns::STANZAS).unwrap().text(), "not here");
        assert_eq!(StanzaError::from_element(&element).unwrap(), err);
    }

    #[test]
    fn test_unknown_condition_is_undefined() {
        let element: Element = "<error xmlns='jabber:client' type='wait'>\
            <made-up xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>"
            .parse()
            .unwrap();
        let err = StanzaError::from_element(&element).unwrap();
        assert_eq!(err.condition, StanzaErrorCondition::UndefinedCondition);
        assert_eq!(err.error_type, StanzaErrorType::Wait);
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let element: Element = "<error xmlns='jabber:client'/>".parse().unwrap();
        assert!(StanzaError::from_element(&element).is_err());
    }
}
