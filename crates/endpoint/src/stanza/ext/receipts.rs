//! XEP-0184: Message Delivery Receipts.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{Extension, FromElement};
use crate::XmppError;

/// `<request/>`, asking the recipient for a receipt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiptRequest;

impl Extension for ReceiptRequest {
    fn namespace(&self) -> &str {
        ns::RECEIPTS
    }

    fn to_element(&self) -> Element {
        Element::builder("request", ns::RECEIPTS).build()
    }
}

impl FromElement for ReceiptRequest {
    fn from_element(_element: &Element) -> Result<Self, XmppError> {
        Ok(Self)
    }
}

/// `<received/>`, acknowledging message `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptReceived {
    /// ID of the acknowledged message. Older clients omit it.
    pub id: Option<String>,
}

impl Extension for ReceiptReceived {
    fn namespace(&self) -> &str {
        ns::RECEIPTS
    }

    fn to_element(&self) -> Element {
        Element::builder("received", ns::RECEIPTS)
            .attr("id", self.id.clone())
            .build()
    }
}

impl FromElement for ReceiptReceived {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            id: element.attr("id").map(str::to_string),
        })
    }
}
