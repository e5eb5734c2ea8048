//! XEP-0203: Delayed Delivery.

use chrono::{DateTime, SecondsFormat, Utc};
use minidom::Element;

use crate::jid::Jid;
use crate::parser::ns;
use crate::stanza::{require_attr, Extension, FromElement};
use crate::XmppError;

/// `<delay/>`, marking a stanza as delivered late.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delay {
    /// Entity that delayed the stanza
    pub from: Option<Jid>,
    /// Original send time
    pub stamp: DateTime<Utc>,
    /// Free-form reason
    pub reason: Option<String>,
}

impl Delay {
    /// A delay stamped at `stamp`.
    pub fn new(stamp: DateTime<Utc>) -> Self {
        Self {
            from: None,
            stamp,
            reason: None,
        }
    }
}

impl Extension for Delay {
    fn namespace(&self) -> &str {
        ns::DELAY
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("delay", ns::DELAY)
            .attr("from", self.from.as_ref().map(Jid::to_string))
            .attr("stamp", self.stamp.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        if let Some(ref reason) = self.reason {
            builder = builder.append(reason.clone());
        }
        builder.build()
    }
}

impl FromElement for Delay {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        let stamp = require_attr(element, "stamp")?;
        let stamp = DateTime::parse_from_rfc3339(&stamp)
            .map_err(|e| XmppError::xml_parse(format!("invalid delay stamp {stamp}: {e}")))?
            .with_timezone(&Utc);
        let reason = element.text();
        Ok(Self {
            from: element.attr("from").map(Jid::parse).transpose()?,
            stamp,
            reason: (!reason.is_empty()).then_some(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_delay() {
        let element: Element =
            "<delay xmlns='urn:xmpp:delay' from='capulet.com' stamp='2002-09-10T23:08:25Z'>Offline Storage</delay>"
                .parse()
                .unwrap();
        let delay = Delay::from_element(&element).unwrap();
        assert_eq!(delay.stamp, Utc.with_ymd_and_hms(2002, 9, 10, 23, 8, 25).unwrap());
        assert_eq!(delay.reason.as_deref(), Some("Offline Storage"));
        assert_eq!(delay.from.unwrap().to_string(), "capulet.com");
    }

    #[test]
    fn test_stamp_with_offset_is_normalized() {
        let element: Element = "<delay xmlns='urn:xmpp:delay' stamp='2002-09-10T23:08:25+02:00'/>"
            .parse()
            .unwrap();
        let delay = Delay::from_element(&element).unwrap();
        assert_eq!(delay.stamp, Utc.with_ymd_and_hms(2002, 9, 10, 21, 8, 25).unwrap());
        assert_eq!(delay.to_element().attr("stamp"), Some("2002-09-10T21:08:25Z"));
    }

    #[test]
    fn test_bad_stamp() {
        let element: Element = "<delay xmlns='urn:xmpp:delay' stamp='yesterday'/>".parse().unwrap();
        assert!(Delay::from_element(&element).is_err());
    }
}
