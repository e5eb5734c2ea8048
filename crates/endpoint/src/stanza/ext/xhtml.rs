//! XEP-0071: XHTML-IM.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{Extension, FromElement};
use crate::XmppError;

/// `<html/>` wrapper holding one XHTML `<body/>` per language.
#[derive(Debug, Clone, PartialEq)]
pub struct XhtmlIm {
    /// XHTML bodies, kept as raw elements
    pub bodies: Vec<Element>,
}

impl XhtmlIm {
    /// The body for `lang`, or the one without a language tag.
    pub fn body(&self, lang: Option<&str>) -> Option<&Element> {
        self.bodies.iter().find(|b| b.attr("xml:lang") == lang)
    }
}

impl Extension for XhtmlIm {
    fn namespace(&self) -> &str {
        ns::XHTML_IM
    }

    fn to_element(&self) -> Element {
        Element::builder("html", ns::XHTML_IM)
            .append_all(self.bodies.iter().cloned())
            .build()
    }
}

impl FromElement for XhtmlIm {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            bodies: element
                .children()
                .filter(|c| c.is("body", ns::XHTML))
                .cloned()
                .collect(),
        })
    }
}
