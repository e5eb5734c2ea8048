//! XEP-0313: Message Archive Management.

use minidom::Element;

use super::data_form::DataForm;
use super::forward::Forwarded;
use super::rsm::Rsm;
use crate::parser::ns;
use crate::stanza::{check_element, parse_bool, require_attr, Extension, FromElement};
use crate::XmppError;

/// Archive query, sent in an IQ `set`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MamQuery {
    /// Correlates results with the query
    pub query_id: Option<String>,
    /// PubSub node to query instead of the user archive
    pub node: Option<String>,
    /// Filter form
    pub form: Option<DataForm>,
    /// Paging
    pub rsm: Option<Rsm>,
}

impl Extension for MamQuery {
    fn namespace(&self) -> &str {
        ns::MAM
    }

    fn to_element(&self) -> Element {
        Element::builder("query", ns::MAM)
            .attr("queryid", self.query_id.clone())
            .attr("node", self.node.clone())
            .append_all(self.form.as_ref().map(DataForm::to_element))
            .append_all(self.rsm.as_ref().map(Rsm::to_element))
            .build()
    }
}

impl FromElement for MamQuery {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "query", ns::MAM)?;
        Ok(Self {
            query_id: element.attr("queryid").map(str::to_string),
            node: element.attr("node").map(str::to_string),
            form: element
                .get_child("x", ns::DATA_FORMS)
                .map(DataForm::from_element)
                .transpose()?,
            rsm: element.get_child("set", ns::RSM).map(Rsm::from_element).transpose()?,
        })
    }
}

/// `<result/>`, one archived message delivered inside a `<message/>`.
#[derive(Debug, Clone)]
pub struct MamResult {
    /// ID of the originating query
    pub query_id: Option<String>,
    /// Archive ID of this message
    pub id: String,
    /// The archived stanza
    pub forwarded: Forwarded,
}

impl Extension for MamResult {
    fn namespace(&self) -> &str {
        ns::MAM
    }

    fn to_element(&self) -> Element {
        Element::builder("result", ns::MAM)
            .attr("queryid", self.query_id.clone())
            .attr("id", self.id.as_str())
            .append(self.forwarded.to_element())
            .build()
    }
}

impl FromElement for MamResult {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "result", ns::MAM)?;
        let forwarded = element
            .get_child("forwarded", ns::FORWARD)
            .ok_or_else(|| XmppError::xml_parse("MAM result without <forwarded/>"))?;
        Ok(Self {
            query_id: element.attr("queryid").map(str::to_string),
            id: require_attr(element, "id")?,
            forwarded: Forwarded::from_element(forwarded)?,
        })
    }
}

/// `<fin/>`, closing a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MamFin {
    /// The last page was delivered
    pub complete: bool,
    /// Results are stable
    pub stable: bool,
    /// Paging information for the delivered page
    pub rsm: Option<Rsm>,
}

impl Extension for MamFin {
    fn namespace(&self) -> &str {
        ns::MAM
    }

    fn to_element(&self) -> Element {
        Element::builder("fin", ns::MAM)
            .attr("complete", self.complete.then_some("true"))
            .attr("stable", (!self.stable).then_some("false"))
            .append_all(self.rsm.as_ref().map(Rsm::to_element))
            .build()
    }
}

impl FromElement for MamFin {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "fin", ns::MAM)?;
        Ok(Self {
            complete: parse_bool(element.attr("complete")),
            stable: element.attr("stable").map_or(true, |s| parse_bool(Some(s))),
            rsm: element.get_child("set", ns::RSM).map(Rsm::from_element).transpose()?,
        })
    }
}
