//! Resource binding (RFC 6120 Section 7) and legacy session establishment
//! (RFC 3921 Section 3).

use minidom::Element;

use crate::jid::Jid;
use crate::parser::ns;
use crate::stanza::{check_element, child_text, text_element, Extension, FromElement};
use crate::XmppError;

/// `<bind/>` request or result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bind {
    /// Requested resource
    pub resource: Option<String>,
    /// Full JID assigned by the server
    pub jid: Option<Jid>,
}

impl Bind {
    /// A bind request, letting the server pick the resource when `None`.
    pub fn request(resource: Option<String>) -> Self {
        Self { resource, jid: None }
    }
}

impl Extension for Bind {
    fn namespace(&self) -> &str {
        ns::BIND
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("bind", ns::BIND);
        if let Some(ref resource) = self.resource {
            builder = builder.append(text_element("resource", ns::BIND, resource.clone()));
        }
        if let Some(ref jid) = self.jid {
            builder = builder.append(text_element("jid", ns::BIND, jid.to_string()));
        }
        builder.build()
    }
}

impl FromElement for Bind {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "bind", ns::BIND)?;
        Ok(Self {
            resource: child_text(element, "resource", ns::BIND),
            jid: child_text(element, "jid", ns::BIND)
                .map(|jid| Jid::parse(jid.trim()))
                .transpose()?,
        })
    }
}

/// `<session/>` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionRequest;

impl Extension for SessionRequest {
    fn namespace(&self) -> &str {
        ns::SESSION
    }

    fn to_element(&self) -> Element {
        Element::builder("session", ns::SESSION).build()
    }
}

impl FromElement for SessionRequest {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "session", ns::SESSION)?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_result() {
        let element: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>test@localhost/test</jid></bind>"
            .parse()
            .unwrap();
        let bind = Bind::from_element(&element).unwrap();
        assert_eq!(bind.jid.unwrap().to_string(), "test@localhost/test");
    }

    #[test]
    fn test_bind_request() {
        let element = Bind::request(Some("desk".into())).to_element();
        assert_eq!(element.get_child("resource", ns::BIND).unwrap().text(), "desk");
        assert!(Bind::request(None).to_element().children().next().is_none());
    }
}
