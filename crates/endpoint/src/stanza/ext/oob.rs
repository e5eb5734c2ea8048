//! XEP-0066: Out of Band Data.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{child_text, text_element, Extension, FromElement};
use crate::XmppError;

fn required_url(element: &Element, namespace: &str) -> Result<String, XmppError> {
    child_text(element, "url", namespace)
        .map(|url| url.trim().to_string())
        .ok_or_else(|| XmppError::xml_parse("out-of-band data without <url/>"))
}

/// `jabber:x:oob`, a URL attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oob {
    /// Location of the data
    pub url: String,
    /// Description
    pub desc: Option<String>,
}

impl Extension for Oob {
    fn namespace(&self) -> &str {
        ns::OOB_X
    }

    fn to_element(&self) -> Element {
        Element::builder("x", ns::OOB_X)
            .append(text_element("url", ns::OOB_X, self.url.clone()))
            .append_all(self.desc.clone().map(|d| text_element("desc", ns::OOB_X, d)))
            .build()
    }
}

impl FromElement for Oob {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            url: required_url(element, ns::OOB_X)?,
            desc: child_text(element, "desc", ns::OOB_X),
        })
    }
}

/// `jabber:iq:oob`, a transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OobQuery {
    /// Location of the data
    pub url: String,
    /// Description
    pub desc: Option<String>,
    /// Session ID
    pub sid: Option<String>,
}

impl Extension for OobQuery {
    fn namespace(&self) -> &str {
        ns::OOB_IQ
    }

    fn to_element(&self) -> Element {
        Element::builder("query", ns::OOB_IQ)
            .attr("sid", self.sid.clone())
            .append(text_element("url", ns::OOB_IQ, self.url.clone()))
            .append_all(self.desc.clone().map(|d| text_element("desc", ns::OOB_IQ, d)))
            .build()
    }
}

impl FromElement for OobQuery {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            url: required_url(element, ns::OOB_IQ)?,
            desc: child_text(element, "desc", ns::OOB_IQ),
            sid: element.attr("sid").map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oob_requires_url() {
        let element: Element = "<x xmlns='jabber:x:oob'><url> http://example.com/a.png </url></x>"
            .parse()
            .unwrap();
        assert_eq!(Oob::from_element(&element).unwrap().url, "http://example.com/a.png");

        let element: Element = "<x xmlns='jabber:x:oob'><desc>nothing</desc></x>".parse().unwrap();
        assert!(Oob::from_element(&element).is_err());
    }
}
