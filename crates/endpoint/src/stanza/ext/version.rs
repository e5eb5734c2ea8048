//! XEP-0092: Software Version.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{check_element, child_text, text_element, Extension, FromElement};
use crate::XmppError;

/// `jabber:iq:version` query. Empty in requests, filled in results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftwareVersion {
    /// Software name
    pub name: Option<String>,
    /// Software version
    pub version: Option<String>,
    /// Operating system
    pub os: Option<String>,
}

impl Extension for SoftwareVersion {
    fn namespace(&self) -> &str {
        ns::VERSION
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("query", ns::VERSION);
        for (name, value) in [("name", &self.name), ("version", &self.version), ("os", &self.os)] {
            if let Some(value) = value {
                builder = builder.append(text_element(name, ns::VERSION, value.clone()));
            }
        }
        builder.build()
    }
}

impl FromElement for SoftwareVersion {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "query", ns::VERSION)?;
        Ok(Self {
            name: child_text(element, "name", ns::VERSION),
            version: child_text(element, "version", ns::VERSION),
            os: child_text(element, "os", ns::VERSION),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_result() {
        let version = SoftwareVersion {
            name: Some("waddle".into()),
            version: Some("0.1.0".into()),
            os: None,
        };
        let parsed = SoftwareVersion::from_element(&version.to_element()).unwrap();
        assert_eq!(parsed, version);
    }
}
