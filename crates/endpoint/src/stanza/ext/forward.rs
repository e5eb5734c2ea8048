//! XEP-0297: Stanza Forwarding.

use minidom::Element;

use super::delay::Delay;
use crate::parser::ns;
use crate::stanza::{self, check_element, Extension, FromElement, Packet};
use crate::XmppError;

/// `<forwarded/>`, wrapping a copy of another stanza.
///
/// The inner stanza is decoded with the process-wide registry.
#[derive(Debug, Clone)]
pub struct Forwarded {
    /// When the original stanza was sent
    pub delay: Option<Delay>,
    /// The forwarded stanza
    pub stanza: Option<Box<Packet>>,
}

impl Extension for Forwarded {
    fn namespace(&self) -> &str {
        ns::FORWARD
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("forwarded", ns::FORWARD);
        if let Some(ref delay) = self.delay {
            builder = builder.append(delay.to_element());
        }
        if let Some(element) = self.stanza.as_ref().and_then(|p| p.to_element(ns::JABBER_CLIENT)) {
            builder = builder.append(element);
        }
        builder.build()
    }
}

impl FromElement for Forwarded {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "forwarded", ns::FORWARD)?;
        let mut forwarded = Forwarded {
            delay: None,
            stanza: None,
        };
        for child in element.children() {
            if child.is("delay", ns::DELAY) {
                forwarded.delay = Some(Delay::from_element(child)?);
            } else if forwarded.stanza.is_none() {
                let packet = stanza::decode(child)?;
                if !packet.is_stanza() {
                    return Err(XmppError::xml_parse(format!(
                        "forwarded element is not a stanza: {}",
                        child.name()
                    )));
                }
                forwarded.stanza = Some(Box::new(packet));
            }
        }
        Ok(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_message() {
        let element: Element = "<forwarded xmlns='urn:xmpp:forward:0'>\
            <delay xmlns='urn:xmpp:delay' stamp='2010-07-10T23:08:25Z'/>\
            <message xmlns='jabber:client' from='romeo@montague.lit/orchard' type='chat'><body>Hi</body></message>\
            </forwarded>"
            .parse()
            .unwrap();
        let forwarded = Forwarded::from_element(&element).unwrap();
        assert!(forwarded.delay.is_some());
        match forwarded.stanza.as_deref() {
            Some(Packet::Message(message)) => assert_eq!(message.body.as_deref(), Some("Hi")),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_forwarded_non_stanza_rejected() {
        let element: Element = "<forwarded xmlns='urn:xmpp:forward:0'><r xmlns='urn:xmpp:sm:3'/></forwarded>"
            .parse()
            .unwrap();
        assert!(Forwarded::from_element(&element).is_err());
    }
}
