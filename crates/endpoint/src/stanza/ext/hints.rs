//! XEP-0334: Message Processing Hints.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{Extension, FromElement};
use crate::XmppError;

/// A processing hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    /// Do not permanently store
    NoPermanentStore,
    /// Do not store at all
    NoStore,
    /// Do not copy to other resources
    NoCopy,
    /// Store even if normally not stored
    Store,
}

impl Hint {
    /// Element name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPermanentStore => "no-permanent-store",
            Self::NoStore => "no-store",
            Self::NoCopy => "no-copy",
            Self::Store => "store",
        }
    }
}

impl Extension for Hint {
    fn namespace(&self) -> &str {
        ns::HINTS
    }

    fn to_element(&self) -> Element {
        Element::builder(self.as_str(), ns::HINTS).build()
    }
}

impl FromElement for Hint {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        match element.name() {
            "no-permanent-store" => Ok(Self::NoPermanentStore),
            "no-store" => Ok(Self::NoStore),
            "no-copy" => Ok(Self::NoCopy),
            "store" => Ok(Self::Store),
            other => Err(XmppError::xml_parse(format!("unknown hint: {other}"))),
        }
    }
}
