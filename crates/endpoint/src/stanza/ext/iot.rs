//! XEP-0325: Internet of Things - Control.

use std::str::FromStr;

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{check_element, require_attr, Extension, FromElement};
use crate::XmppError;

/// Data type of a control parameter; also its element name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Boolean,
    Color,
    Date,
    DateTime,
    Double,
    Duration,
    Int,
    Long,
    String,
    Time,
}

impl ParameterKind {
    /// Element name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Color => "color",
            Self::Date => "date",
            Self::DateTime => "dateTime",
            Self::Double => "double",
            Self::Duration => "duration",
            Self::Int => "int",
            Self::Long => "long",
            Self::String => "string",
            Self::Time => "time",
        }
    }
}

impl FromStr for ParameterKind {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(Self::Boolean),
            "color" => Ok(Self::Color),
            "date" => Ok(Self::Date),
            "dateTime" => Ok(Self::DateTime),
            "double" => Ok(Self::Double),
            "duration" => Ok(Self::Duration),
            "int" => Ok(Self::Int),
            "long" => Ok(Self::Long),
            "string" => Ok(Self::String),
            "time" => Ok(Self::Time),
            other => Err(XmppError::xml_parse(format!("unknown control parameter type: {other}"))),
        }
    }
}

/// A single control parameter. Values are kept in their lexical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlParameter {
    /// Data type
    pub kind: ParameterKind,
    /// Parameter name
    pub name: String,
    /// Value
    pub value: String,
}

/// A node behind a concentrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub node_id: String,
    pub source_id: Option<String>,
    pub cache_type: Option<String>,
}

impl NodeRef {
    fn to_element(&self) -> Element {
        Element::builder("node", ns::IOT_CONTROL)
            .attr("nodeId", self.node_id.as_str())
            .attr("sourceId", self.source_id.clone())
            .attr("cacheType", self.cache_type.clone())
            .build()
    }

    fn from_element(element: &Element) -> Result<Self, XmppError> {
        Ok(Self {
            node_id: require_attr(element, "nodeId")?,
            source_id: element.attr("sourceId").map(str::to_string),
            cache_type: element.attr("cacheType").map(str::to_string),
        })
    }
}

/// `<set/>`, writing control parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlSet {
    /// Target nodes; empty addresses the device itself
    pub nodes: Vec<NodeRef>,
    /// Parameters to write
    pub parameters: Vec<ControlParameter>,
}

impl ControlSet {
    /// Value of parameter `name`.
    pub fn parameter(&self, name: &str) -> Option<&ControlParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl Extension for ControlSet {
    fn namespace(&self) -> &str {
        ns::IOT_CONTROL
    }

    fn to_element(&self) -> Element {
        Element::builder("set", ns::IOT_CONTROL)
            .append_all(self.nodes.iter().map(NodeRef::to_element))
            .append_all(self.parameters.iter().map(|p| {
                Element::builder(p.kind.as_str(), ns::IOT_CONTROL)
                    .attr("name", p.name.as_str())
                    .attr("value", p.value.as_str())
                    .build()
            }))
            .build()
    }
}

impl FromElement for ControlSet {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "set", ns::IOT_CONTROL)?;
        let mut set = ControlSet::default();
        for child in element.children().filter(|c| c.ns() == ns::IOT_CONTROL) {
            if child.name() == "node" {
                set.nodes.push(NodeRef::from_element(child)?);
                continue;
            }
            set.parameters.push(ControlParameter {
                kind: child.name().parse()?,
                name: require_attr(child, "name")?,
                value: require_attr(child, "value")?,
            });
        }
        Ok(set)
    }
}

/// `<setResponse/>`. Lists nodes and parameters that could not be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlSetResponse {
    /// Nodes the error applies to
    pub nodes: Vec<NodeRef>,
    /// Names of rejected parameters
    pub parameters: Vec<String>,
}

impl Extension for ControlSetResponse {
    fn namespace(&self) -> &str {
        ns::IOT_CONTROL
    }

    fn to_element(&self) -> Element {
        Element::builder("setResponse", ns::IOT_CONTROL)
            .append_all(self.nodes.iter().map(NodeRef::to_element))
            .append_all(self.parameters.iter().map(|name| {
                Element::builder("parameter", ns::IOT_CONTROL)
                    .attr("name", name.as_str())
                    .build()
            }))
            .build()
    }
}

impl FromElement for ControlSetResponse {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "setResponse", ns::IOT_CONTROL)?;
        let mut response = ControlSetResponse::default();
        for child in element.children() {
            if child.is("node", ns::IOT_CONTROL) {
                response.nodes.push(NodeRef::from_element(child)?);
            } else if child.is("parameter", ns::IOT_CONTROL) {
                response.parameters.push(require_attr(child, "name")?);
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let element: Element = "<set xmlns='urn:xmpp:iot:control'>\
            <node nodeId='DigitalOutput1'/>\
            <boolean name='Output' value='true'/><int name='Level' value='42'/></set>"
            .parse()
            .unwrap();
        let set = ControlSet::from_element(&element).unwrap();
        assert_eq!(set.nodes[0].node_id, "DigitalOutput1");
        assert_eq!(set.parameters.len(), 2);
        let level = set.parameter("Level").unwrap();
        assert_eq!(level.kind, ParameterKind::Int);
        assert_eq!(level.value, "42");
    }

    #[test]
    fn test_unknown_parameter_type() {
        let element: Element = "<set xmlns='urn:xmpp:iot:control'><blob name='x' value='y'/></set>"
            .parse()
            .unwrap();
        assert!(ControlSet::from_element(&element).is_err());
    }
}
