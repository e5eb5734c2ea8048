//! Opaque fallback for payloads with no registered type.

use minidom::Element;

use super::{Extension, FromElement};
use crate::XmppError;

/// A raw element preserved verbatim (namespace, attributes, children).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    namespace: String,
    element: Element,
}

impl Node {
    /// Wrap an element.
    pub fn new(element: Element) -> Self {
        Self {
            namespace: element.ns(),
            element,
        }
    }

    /// The wrapped element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Local name of the wrapped element.
    pub fn name(&self) -> &str {
        self.element.name()
    }
}

impl Extension for Node {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn to_element(&self) -> Element {
        self.element.clone()
    }
}

impl FromElement for Node {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self::new(element.clone()))
    }
}
