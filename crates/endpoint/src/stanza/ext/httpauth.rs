//! XEP-0070: Verifying HTTP Requests via XMPP.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{require_attr, Extension, FromElement};
use crate::XmppError;

/// `<confirm/>`, asking the user to approve an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpAuthConfirm {
    /// Transaction identifier
    pub id: String,
    /// HTTP method of the request
    pub method: String,
    /// Requested URL
    pub url: String,
}

impl Extension for HttpAuthConfirm {
    fn namespace(&self) -> &str {
        ns::HTTP_AUTH
    }

    fn to_element(&self) -> Element {
        Element::builder("confirm", ns::HTTP_AUTH)
            .attr("id", self.id.as_str())
            .attr("method", self.method.as_str())
            .attr("url", self.url.as_str())
            .build()
    }
}

impl FromElement for HttpAuthConfirm {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            id: require_attr(element, "id")?,
            method: require_attr(element, "method")?,
            url: require_attr(element, "url")?,
        })
    }
}
