//! XEP-0060: Publish-Subscribe.
//!
//! Only the first child of `<pubsub/>` selects the action. Children the
//! codec does not model are kept as [`PubSub::Other`] so they still
//! round-trip.

use minidom::Element;

use super::data_form::DataForm;
use crate::jid::Jid;
use crate::parser::ns;
use crate::stanza::{check_element, parse_attr, parse_bool, require_attr, Extension, FromElement};
use crate::XmppError;

/// A published item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    /// Item ID
    pub id: Option<String>,
    /// Publisher, when the service exposes it
    pub publisher: Option<Jid>,
    /// Item payload
    pub payload: Option<Element>,
}

impl Item {
    /// An item carrying `payload`.
    pub fn new(id: Option<String>, payload: Element) -> Self {
        Self {
            id,
            publisher: None,
            payload: Some(payload),
        }
    }

    fn to_element(&self, namespace: &str) -> Element {
        Element::builder("item", namespace)
            .attr("id", self.id.clone())
            .attr("publisher", self.publisher.as_ref().map(Jid::to_string))
            .append_all(self.payload.clone())
            .build()
    }

    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            id: element.attr("id").map(str::to_string),
            publisher: element.attr("publisher").map(Jid::parse).transpose()?,
            payload: element.children().next().cloned(),
        })
    }
}

fn items_of(element: &Element, namespace: &str) -> Result<Vec<Item>, XmppError> {
    element
        .children()
        .filter(|c| c.is("item", namespace))
        .map(Item::from_element)
        .collect()
}

fn optional_form(element: &Element) -> Result<Option<DataForm>, XmppError> {
    element
        .get_child("x", ns::DATA_FORMS)
        .map(DataForm::from_element)
        .transpose()
}

/// `<pubsub xmlns='http://jabber.org/protocol/pubsub'/>`.
#[derive(Debug, Clone, PartialEq)]
pub enum PubSub {
    /// Create a node; `None` requests an instant node
    Create { node: Option<String>, configure: Option<DataForm> },
    /// Publish items
    Publish {
        node: String,
        items: Vec<Item>,
        options: Option<DataForm>,
    },
    /// Retract items by ID
    Retract { node: String, notify: bool, ids: Vec<String> },
    /// Subscribe `jid`
    Subscribe { node: Option<String>, jid: Jid },
    /// Unsubscribe `jid`
    Unsubscribe {
        node: Option<String>,
        jid: Jid,
        sub_id: Option<String>,
    },
    /// Request or return items
    Items {
        node: String,
        max_items: Option<u32>,
        items: Vec<Item>,
    },
    /// Subscription state in a result
    Subscription {
        node: Option<String>,
        jid: Jid,
        sub_id: Option<String>,
        state: Option<String>,
    },
    /// Anything else
    Other(Element),
}

impl PubSub {
    /// Publish a single item to `node`.
    pub fn publish(node: impl Into<String>, item: Item) -> Self {
        Self::Publish {
            node: node.into(),
            items: vec![item],
            options: None,
        }
    }

    /// Fetch the items of `node`.
    pub fn items(node: impl Into<String>, max_items: Option<u32>) -> Self {
        Self::Items {
            node: node.into(),
            max_items,
            items: Vec::new(),
        }
    }

    fn child_element(&self) -> Vec<Element> {
        const NS: &str = ns::PUBSUB;
        match self {
            Self::Create { node, configure } => {
                let mut out = vec![Element::builder("create", NS).attr("node", node.clone()).build()];
                if let Some(form) = configure {
                    out.push(Element::builder("configure", NS).append(form.to_element()).build());
                }
                out
            }
            Self::Publish { node, items, options } => {
                let mut out = vec![Element::builder("publish", NS)
                    .attr("node", node.as_str())
                    .append_all(items.iter().map(|i| i.to_element(NS)))
                    .build()];
                if let Some(form) = options {
                    out.push(Element::builder("publish-options", NS).append(form.to_element()).build());
                }
                out
            }
            Self::Retract { node, notify, ids } => vec![Element::builder("retract", NS)
                .attr("node", node.as_str())
                .attr("notify", notify.then_some("true"))
                .append_all(ids.iter().map(|id| Element::builder("item", NS).attr("id", id.as_str()).build()))
                .build()],
            Self::Subscribe { node, jid } => vec![Element::builder("subscribe", NS)
                .attr("node", node.clone())
                .attr("jid", jid.to_string())
                .build()],
            Self::Unsubscribe { node, jid, sub_id } => vec![Element::builder("unsubscribe", NS)
                .attr("node", node.clone())
                .attr("jid", jid.to_string())
                .attr("subid", sub_id.clone())
                .build()],
            Self::Items { node, max_items, items } => vec![Element::builder("items", NS)
                .attr("node", node.as_str())
                .attr("max_items", max_items.map(|m| m.to_string()))
                .append_all(items.iter().map(|i| i.to_element(NS)))
                .build()],
            Self::Subscription {
                node,
                jid,
                sub_id,
                state,
            } => vec![Element::builder("subscription", NS)
                .attr("node", node.clone())
                .attr("jid", jid.to_string())
                .attr("subid", sub_id.clone())
                .attr("subscription", state.clone())
                .build()],
            Self::Other(element) => vec![element.clone()],
        }
    }
}

impl Extension for PubSub {
    fn namespace(&self) -> &str {
        ns::PUBSUB
    }

    fn to_element(&self) -> Element {
        Element::builder("pubsub", ns::PUBSUB)
            .append_all(self.child_element())
            .build()
    }
}

impl FromElement for PubSub {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "pubsub", ns::PUBSUB)?;
        let child = element
            .children()
            .next()
            .ok_or_else(|| XmppError::xml_parse("empty <pubsub/>"))?;
        if child.ns() != ns::PUBSUB {
            return Ok(Self::Other(child.clone()));
        }
        let node = child.attr("node").map(str::to_string);
        let with_options = |name: &str| -> Result<Option<DataForm>, XmppError> {
            element
                .get_child(name, ns::PUBSUB)
                .map(optional_form)
                .transpose()
                .map(Option::flatten)
        };
        Ok(match child.name() {
            "create" => Self::Create {
                node,
                configure: with_options("configure")?,
            },
            "publish" => Self::Publish {
                node: require_attr(child, "node")?,
                items: items_of(child, ns::PUBSUB)?,
                options: with_options("publish-options")?,
            },
            "retract" => Self::Retract {
                node: require_attr(child, "node")?,
                notify: parse_bool(child.attr("notify")),
                ids: child
                    .children()
                    .filter(|c| c.is("item", ns::PUBSUB))
                    .map(|c| require_attr(c, "id"))
                    .collect::<Result<_, _>>()?,
            },
            "subscribe" => Self::Subscribe {
                node,
                jid: Jid::parse(&require_attr(child, "jid")?)?,
            },
            "unsubscribe" => Self::Unsubscribe {
                node,
                jid: Jid::parse(&require_attr(child, "jid")?)?,
                sub_id: child.attr("subid").map(str::to_string),
            },
            "items" => Self::Items {
                node: require_attr(child, "node")?,
                max_items: parse_attr(child, "max_items")?,
                items: items_of(child, ns::PUBSUB)?,
            },
            "subscription" => Self::Subscription {
                node,
                jid: Jid::parse(&require_attr(child, "jid")?)?,
                sub_id: child.attr("subid").map(str::to_string),
                state: child.attr("subscription").map(str::to_string),
            },
            _ => Self::Other(child.clone()),
        })
    }
}

/// `<pubsub xmlns='http://jabber.org/protocol/pubsub#owner'/>`.
#[derive(Debug, Clone, PartialEq)]
pub enum PubSubOwner {
    /// Delete a node
    Delete { node: String },
    /// Purge all items of a node
    Purge { node: String },
    /// Fetch or submit the node configuration
    Configure { node: Option<String>, form: Option<DataForm> },
    /// Anything else
    Other(Element),
}

impl Extension for PubSubOwner {
    fn namespace(&self) -> &str {
        ns::PUBSUB_OWNER
    }

    fn to_element(&self) -> Element {
        const NS: &str = ns::PUBSUB_OWNER;
        let child = match self {
            Self::Delete { node } => Element::builder("delete", NS).attr("node", node.as_str()).build(),
            Self::Purge { node } => Element::builder("purge", NS).attr("node", node.as_str()).build(),
            Self::Configure { node, form } => Element::builder("configure", NS)
                .attr("node", node.clone())
                .append_all(form.as_ref().map(DataForm::to_element))
                .build(),
            Self::Other(element) => element.clone(),
        };
        Element::builder("pubsub", NS).append(child).build()
    }
}

impl FromElement for PubSubOwner {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "pubsub", ns::PUBSUB_OWNER)?;
        let child = element
            .children()
            .next()
            .ok_or_else(|| XmppError::xml_parse("empty <pubsub/>"))?;
        if child.ns() != ns::PUBSUB_OWNER {
            return Ok(Self::Other(child.clone()));
        }
        Ok(match child.name() {
            "delete" => Self::Delete {
                node: require_attr(child, "node")?,
            },
            "purge" => Self::Purge {
                node: require_attr(child, "node")?,
            },
            "configure" => Self::Configure {
                node: child.attr("node").map(str::to_string),
                form: optional_form(child)?,
            },
            _ => Self::Other(child.clone()),
        })
    }
}

/// `<event/>` notification delivered in a `<message/>`.
#[derive(Debug, Clone, PartialEq)]
pub enum PubSubEvent {
    /// Published and retracted items
    Items {
        node: String,
        items: Vec<Item>,
        retracted: Vec<String>,
    },
    /// Node deleted
    Delete { node: String },
    /// Node purged
    Purge { node: String },
    /// Configuration changed
    Configuration { node: Option<String>, form: Option<DataForm> },
    /// Anything else
    Other(Element),
}

impl Extension for PubSubEvent {
    fn namespace(&self) -> &str {
        ns::PUBSUB_EVENT
    }

    fn to_element(&self) -> Element {
        const NS: &str = ns::PUBSUB_EVENT;
        let child = match self {
            Self::Items { node, items, retracted } => Element::builder("items", NS)
                .attr("node", node.as_str())
                .append_all(items.iter().map(|i| i.to_element(NS)))
                .append_all(
                    retracted
                        .iter()
                        .map(|id| Element::builder("retract", NS).attr("id", id.as_str()).build()),
                )
                .build(),
            Self::Delete { node } => Element::builder("delete", NS).attr("node", node.as_str()).build(),
            Self::Purge { node } => Element::builder("purge", NS).attr("node", node.as_str()).build(),
            Self::Configuration { node, form } => Element::builder("configuration", NS)
                .attr("node", node.clone())
                .append_all(form.as_ref().map(DataForm::to_element))
                .build(),
            Self::Other(element) => element.clone(),
        };
        Element::builder("event", NS).append(child).build()
    }
}

impl FromElement for PubSubEvent {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "event", ns::PUBSUB_EVENT)?;
        let child = element
            .children()
            .next()
            .ok_or_else(|| XmppError::xml_parse("empty pubsub <event/>"))?;
        if child.ns() != ns::PUBSUB_EVENT {
            return Ok(Self::Other(child.clone()));
        }
        Ok(match child.name() {
            "items" => Self::Items {
                node: require_attr(child, "node")?,
                items: items_of(child, ns::PUBSUB_EVENT)?,
                retracted: child
                    .children()
                    .filter(|c| c.is("retract", ns::PUBSUB_EVENT))
                    .map(|c| require_attr(c, "id"))
                    .collect::<Result<_, _>>()?,
            },
            "delete" => Self::Delete {
                node: require_attr(child, "node")?,
            },
            "purge" => Self::Purge {
                node: require_attr(child, "node")?,
            },
            "configuration" => Self::Configuration {
                node: child.attr("node").map(str::to_string),
                form: optional_form(child)?,
            },
            _ => Self::Other(child.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_items() {
        let element: Element = "<event xmlns='http://jabber.org/protocol/pubsub#event'>\
            <items node='princely_musings'>\
            <item id='ae890ac52d0df67ed7cfdf51b644e901'><entry xmlns='http://www.w3.org/2005/Atom'><title>Soliloquy</title></entry></item>\
            <retract id='old'/></items></event>"
            .parse()
            .unwrap();
        match PubSubEvent::from_element(&element).unwrap() {
            PubSubEvent::Items { node, items, retracted } => {
                assert_eq!(node, "princely_musings");
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].payload.as_ref().unwrap().name(), "entry");
                assert_eq!(retracted, vec!["old".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_publish_request() {
        let payload = Element::builder("entry", "http://www.w3.org/2005/Atom").build();
        let element = PubSub::publish("princely_musings", Item::new(Some("1".into()), payload)).to_element();
        let publish = element.get_child("publish", ns::PUBSUB).unwrap();
        assert_eq!(publish.attr("node"), Some("princely_musings"));
        let item = publish.get_child("item", ns::PUBSUB).unwrap();
        assert!(item.has_child("entry", "http://www.w3.org/2005/Atom"));
    }

    #[test]
    fn test_items_result_round_trip() {
        let element: Element = "<pubsub xmlns='http://jabber.org/protocol/pubsub'>\
            <items node='n' max_items='2'><item id='a'/><item id='b'/></items></pubsub>"
            .parse()
            .unwrap();
        let parsed = PubSub::from_element(&element).unwrap();
        assert_eq!(PubSub::from_element(&parsed.to_element()).unwrap(), parsed);
    }

    #[test]
    fn test_owner_delete() {
        let element: Element = "<pubsub xmlns='http://jabber.org/protocol/pubsub#owner'><delete node='n'/></pubsub>"
            .parse()
            .unwrap();
        assert_eq!(
            PubSubOwner::from_element(&element).unwrap(),
            PubSubOwner::Delete { node: "n".into() }
        );
    }
}
