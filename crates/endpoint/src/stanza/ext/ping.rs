//! XEP-0199: XMPP Ping.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{check_element, Extension, FromElement};
use crate::XmppError;

/// `<ping/>` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping;

impl Extension for Ping {
    fn namespace(&self) -> &str {
        ns::PING
    }

    fn to_element(&self) -> Element {
        Element::builder("ping", ns::PING).build()
    }
}

impl FromElement for Ping {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "ping", ns::PING)?;
        Ok(Ping)
    }
}
