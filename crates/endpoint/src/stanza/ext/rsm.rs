//! XEP-0059: Result Set Management.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{check_element, child_text, parse_attr, text_element, Extension, FromElement};
use crate::XmppError;

/// `<set/>`, used both to request a page and to describe the returned one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rsm {
    /// Maximum items to return
    pub max: Option<u32>,
    /// Page ending before this item; `Some("")` requests the last page
    pub before: Option<String>,
    /// Page starting after this item
    pub after: Option<String>,
    /// Index of the first requested item
    pub index: Option<u32>,
    /// First item of the returned page
    pub first: Option<String>,
    /// Index of `first` in the full set
    pub first_index: Option<u32>,
    /// Last item of the returned page
    pub last: Option<String>,
    /// Size of the full set
    pub count: Option<u32>,
}

impl Rsm {
    /// Request at most `max` items.
    pub fn max(max: u32) -> Self {
        Self {
            max: Some(max),
            ..Default::default()
        }
    }

    /// Request the page after `id`.
    pub fn after(max: u32, id: impl Into<String>) -> Self {
        Self {
            max: Some(max),
            after: Some(id.into()),
            ..Default::default()
        }
    }
}

fn parse_number(element: &Element, name: &str) -> Result<Option<u32>, XmppError> {
    child_text(element, name, ns::RSM)
        .map(|text| {
            text.trim()
                .parse()
                .map_err(|_| XmppError::xml_parse(format!("invalid RSM <{name}/>: {text}")))
        })
        .transpose()
}

impl Extension for Rsm {
    fn namespace(&self) -> &str {
        ns::RSM
    }

    fn to_element(&self) -> Element {
        let text = |name: &str, value: Option<String>| value.map(|v| text_element(name, ns::RSM, v));
        let mut builder = Element::builder("set", ns::RSM)
            .append_all(text("max", self.max.map(|m| m.to_string())))
            .append_all(text("before", self.before.clone()))
            .append_all(text("after", self.after.clone()))
            .append_all(text("index", self.index.map(|i| i.to_string())));
        if let Some(ref first) = self.first {
            builder = builder.append(
                Element::builder("first", ns::RSM)
                    .attr("index", self.first_index.map(|i| i.to_string()))
                    .append(first.clone()),
            );
        }
        builder
            .append_all(text("last", self.last.clone()))
            .append_all(text("count", self.count.map(|c| c.to_string())))
            .build()
    }
}

impl FromElement for Rsm {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "set", ns::RSM)?;
        let first = element.get_child("first", ns::RSM);
        Ok(Self {
            max: parse_number(element, "max")?,
            before: child_text(element, "before", ns::RSM),
            after: child_text(element, "after", ns::RSM),
            index: parse_number(element, "index")?,
            first: first.map(Element::text),
            first_index: first.map(|f| parse_attr(f, "index")).transpose()?.flatten(),
            last: child_text(element, "last", ns::RSM),
            count: parse_number(element, "count")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_page() {
        let element: Element = "<set xmlns='http://jabber.org/protocol/rsm'>\
            <first index='0'>28482-98726-73623</first><last>09af3-cc343-b409f</last><count>800</count></set>"
            .parse()
            .unwrap();
        let rsm = Rsm::from_element(&element).unwrap();
        assert_eq!(rsm.first.as_deref(), Some("28482-98726-73623"));
        assert_eq!(rsm.first_index, Some(0));
        assert_eq!(rsm.count, Some(800));
        assert!(rsm.max.is_none());
    }

    #[test]
    fn test_request_serialization() {
        let element = Rsm::after(10, "abc").to_element();
        assert_eq!(element.get_child("max", ns::RSM).unwrap().text(), "10");
        assert_eq!(element.get_child("after", ns::RSM).unwrap().text(), "abc");
        assert!(element.get_child("before", ns::RSM).is_none());
    }
}
