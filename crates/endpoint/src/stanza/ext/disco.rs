//! XEP-0030: Service Discovery.

use minidom::Element;

use super::data_form::DataForm;
use crate::jid::Jid;
use crate::parser::ns;
use crate::stanza::{check_element, require_attr, Extension, FromElement};
use crate::XmppError;

/// An identity of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Category, e.g. `gateway`
    pub category: String,
    /// Type within the category
    pub identity_type: String,
    /// Human readable name
    pub name: Option<String>,
    /// `xml:lang` of the name
    pub lang: Option<String>,
}

impl Identity {
    /// An identity without language tag.
    pub fn new(category: impl Into<String>, identity_type: impl Into<String>, name: Option<String>) -> Self {
        Self {
            category: category.into(),
            identity_type: identity_type.into(),
            name,
            lang: None,
        }
    }
}

/// `disco#info` query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoInfo {
    /// Node queried
    pub node: Option<String>,
    /// Identities
    pub identities: Vec<Identity>,
    /// Supported feature namespaces
    pub features: Vec<String>,
    /// Extended information (XEP-0128)
    pub forms: Vec<DataForm>,
}

impl DiscoInfo {
    /// Whether `feature` is advertised.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

impl Extension for DiscoInfo {
    fn namespace(&self) -> &str {
        ns::DISCO_INFO
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("query", ns::DISCO_INFO).attr("node", self.node.clone());
        for identity in &self.identities {
            builder = builder.append(
                Element::builder("identity", ns::DISCO_INFO)
                    .attr("category", identity.category.as_str())
                    .attr("type", identity.identity_type.as_str())
                    .attr("name", identity.name.clone())
                    .attr("xml:lang", identity.lang.clone()),
            );
        }
        for feature in &self.features {
            builder = builder.append(Element::builder("feature", ns::DISCO_INFO).attr("var", feature.as_str()));
        }
        builder.append_all(self.forms.iter().map(DataForm::to_element)).build()
    }
}

impl FromElement for DiscoInfo {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "query", ns::DISCO_INFO)?;
        let mut info = DiscoInfo {
            node: element.attr("node").map(str::to_string),
            ..Default::default()
        };
        for child in element.children() {
            if child.is("identity", ns::DISCO_INFO) {
                info.identities.push(Identity {
                    category: require_attr(child, "category")?,
                    identity_type: require_attr(child, "type")?,
                    name: child.attr("name").map(str::to_string),
                    lang: child.attr("xml:lang").map(str::to_string),
                });
            } else if child.is("feature", ns::DISCO_INFO) {
                info.features.push(require_attr(child, "var")?);
            } else if child.is("x", ns::DATA_FORMS) {
                info.forms.push(DataForm::from_element(child)?);
            }
        }
        Ok(info)
    }
}

/// An item of a `disco#items` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoItem {
    /// Item address
    pub jid: Jid,
    /// Node at the address
    pub node: Option<String>,
    /// Human readable name
    pub name: Option<String>,
}

/// `disco#items` query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoItems {
    /// Node queried
    pub node: Option<String>,
    /// Items
    pub items: Vec<DiscoItem>,
}

impl Extension for DiscoItems {
    fn namespace(&self) -> &str {
        ns::DISCO_ITEMS
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("query", ns::DISCO_ITEMS).attr("node", self.node.clone());
        for item in &self.items {
            builder = builder.append(
                Element::builder("item", ns::DISCO_ITEMS)
                    .attr("jid", item.jid.to_string())
                    .attr("node", item.node.clone())
                    .attr("name", item.name.clone()),
            );
        }
        builder.build()
    }
}

impl FromElement for DiscoItems {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "query", ns::DISCO_ITEMS)?;
        let items = element
            .children()
            .filter(|c| c.is("item", ns::DISCO_ITEMS))
            .map(|item| {
                Ok(DiscoItem {
                    jid: Jid::parse(&require_attr(item, "jid")?)?,
                    node: item.attr("node").map(str::to_string),
                    name: item.attr("name").map(str::to_string),
                })
            })
            .collect::<Result<Vec<_>, XmppError>>()?;
        Ok(Self {
            node: element.attr("node").map(str::to_string),
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_result() {
        let element: Element = "<query xmlns='http://jabber.org/protocol/disco#info'>\
            <identity category='conference' type='text' name='Chatrooms'/>\
            <feature var='http://jabber.org/protocol/muc'/>\
            <feature var='urn:xmpp:ping'/>\
            </query>"
            .parse()
            .unwrap();
        let info = DiscoInfo::from_element(&element).unwrap();
        assert_eq!(info.identities[0].category, "conference");
        assert_eq!(info.identities[0].name.as_deref(), Some("Chatrooms"));
        assert!(info.has_feature(ns::PING));
        assert!(!info.has_feature(ns::MAM));
    }

    #[test]
    fn test_identity_requires_category() {
        let element: Element = "<query xmlns='http://jabber.org/protocol/disco#info'><identity type='text'/></query>"
            .parse()
            .unwrap();
        assert!(DiscoInfo::from_element(&element).is_err());
    }

    #[test]
    fn test_items() {
        let element: Element = "<query xmlns='http://jabber.org/protocol/disco#items'>\
            <item jid='room@muc.example.com' name='Room'/><item jid='pubsub.example.com' node='news'/></query>"
            .parse()
            .unwrap();
        let items = DiscoItems::from_element(&element).unwrap();
        assert_eq!(items.items.len(), 2);
        assert_eq!(items.items[1].node.as_deref(), Some("news"));
    }
}
