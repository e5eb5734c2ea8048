//! RFC 6121 roster management.

use std::str::FromStr;

use minidom::Element;

use crate::jid::Jid;
use crate::parser::ns;
use crate::stanza::{check_element, require_attr, text_element, Extension, FromElement};
use crate::XmppError;

/// Subscription state of a roster item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subscription {
    /// No subscription
    #[default]
    None,
    /// User subscribes to the contact
    To,
    /// Contact subscribes to the user
    From,
    /// Mutual subscription
    Both,
    /// Item removal request
    Remove,
}

impl Subscription {
    /// Attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::To => "to",
            Self::From => "from",
            Self::Both => "both",
            Self::Remove => "remove",
        }
    }
}

impl FromStr for Subscription {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "to" => Ok(Self::To),
            "from" => Ok(Self::From),
            "both" => Ok(Self::Both),
            "remove" => Ok(Self::Remove),
            other => Err(XmppError::xml_parse(format!("invalid subscription: {other}"))),
        }
    }
}

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterItem {
    /// Contact address
    pub jid: Jid,
    /// Display name
    pub name: Option<String>,
    /// Subscription state
    pub subscription: Subscription,
    /// Pending outbound request (`subscribe`)
    pub ask: Option<String>,
    /// Groups
    pub groups: Vec<String>,
}

impl RosterItem {
    /// An item with no subscription.
    pub fn new(jid: Jid) -> Self {
        Self {
            jid,
            name: None,
            subscription: Subscription::None,
            ask: None,
            groups: Vec::new(),
        }
    }
}

/// `jabber:iq:roster` query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    /// Roster version
    pub ver: Option<String>,
    /// Items
    pub items: Vec<RosterItem>,
}

impl Extension for Roster {
    fn namespace(&self) -> &str {
        ns::ROSTER
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("query", ns::ROSTER).attr("ver", self.ver.clone());
        for item in &self.items {
            let subscription = (item.subscription != Subscription::None).then_some(item.subscription.as_str());
            builder = builder.append(
                Element::builder("item", ns::ROSTER)
                    .attr("jid", item.jid.to_string())
                    .attr("name", item.name.clone())
                    .attr("subscription", subscription)
                    .attr("ask", item.ask.clone())
                    .append_all(item.groups.iter().map(|g| text_element("group", ns::ROSTER, g.clone()))),
            );
        }
        builder.build()
    }
}

impl FromElement for Roster {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "query", ns::ROSTER)?;
        let items = element
            .children()
            .filter(|c| c.is("item", ns::ROSTER))
            .map(|item| {
                Ok(RosterItem {
                    jid: Jid::parse(&require_attr(item, "jid")?)?,
                    name: item.attr("name").map(str::to_string),
                    subscription: item.attr("subscription").unwrap_or("none").parse()?,
                    ask: item.attr("ask").map(str::to_string),
                    groups: item
                        .children()
                        .filter(|g| g.is("group", ns::ROSTER))
                        .map(Element::text)
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, XmppError>>()?;
        Ok(Self {
            ver: element.attr("ver").map(str::to_string),
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_push() {
        let element: Element = "<query xmlns='jabber:iq:roster' ver='ver14'>\
            <item jid='nurse@example.com' name='Nurse' subscription='both'><group>Servants</group></item>\
            <item jid='romeo@example.net' ask='subscribe'/>\
            </query>"
            .parse()
            .unwrap();
        let roster = Roster::from_element(&element).unwrap();
        assert_eq!(roster.ver.as_deref(), Some("ver14"));
        assert_eq!(roster.items[0].subscription, Subscription::Both);
        assert_eq!(roster.items[0].groups, vec!["Servants".to_string()]);
        assert_eq!(roster.items[1].subscription, Subscription::None);
        assert_eq!(roster.items[1].ask.as_deref(), Some("subscribe"));
    }

    #[test]
    fn test_remove_item_serialization() {
        let mut item = RosterItem::new("nurse@example.com".parse().unwrap());
        item.subscription = Subscription::Remove;
        let roster = Roster {
            ver: None,
            items: vec![item],
        };
        let element = roster.to_element();
        let item = element.get_child("item", ns::ROSTER).unwrap();
        assert_eq!(item.attr("subscription"), Some("remove"));
    }
}
