//! `<iq/>` stanzas.

use std::fmt;
use std::str::FromStr;

use minidom::Element;
use tracing::debug;

use super::{new_id, AnyExtension, Attrs, StanzaError};
use crate::error::{StanzaErrorCondition, StanzaErrorType};
use crate::jid::Jid;
use crate::registry::{PacketKind, ScopedRegistry};
use crate::XmppError;

/// IQ type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    /// Request for information
    Get,
    /// Request to change state
    Set,
    /// Successful response
    Result,
    /// Error response
    Error,
}

impl IqType {
    /// The `type` attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Result => "result",
            Self::Error => "error",
        }
    }

    /// Whether this type is a request that requires a response.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Get | Self::Set)
    }
}

impl FromStr for IqType {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(Self::Get),
            "set" => Ok(Self::Set),
            "result" => Ok(Self::Result),
            "error" => Ok(Self::Error),
            other => Err(XmppError::xml_parse(format!("invalid iq type: {other}"))),
        }
    }
}

impl fmt::Display for IqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An info/query stanza carrying at most one payload.
#[derive(Debug, Clone)]
pub struct Iq {
    /// Common attributes
    pub attrs: Attrs,
    /// IQ type
    pub iq_type: IqType,
    /// The single payload element
    pub payload: Option<Box<dyn AnyExtension>>,
    /// Error, for `type='error'`
    pub error: Option<StanzaError>,
}

impl Iq {
    /// A request of the given type with a fresh ID.
    pub fn new(iq_type: IqType, to: Option<Jid>, payload: impl AnyExtension) -> Self {
        Self {
            attrs: Attrs {
                id: Some(new_id()),
                to,
                ..Default::default()
            },
            iq_type,
            payload: Some(Box::new(payload)),
            error: None,
        }
    }

    /// A `get` request.
    pub fn get(to: Option<Jid>, payload: impl AnyExtension) -> Self {
        Self::new(IqType::Get, to, payload)
    }

    /// A `set` request.
    pub fn set(to: Option<Jid>, payload: impl AnyExtension) -> Self {
        Self::new(IqType::Set, to, payload)
    }

    /// The stanza ID, or an empty string.
    pub fn id(&self) -> &str {
        self.attrs.id.as_deref().unwrap_or_default()
    }

    /// Namespace of the payload, if any.
    pub fn payload_namespace(&self) -> Option<&str> {
        self.payload.as_deref().map(|p| p.namespace())
    }

    /// The payload as a concrete type.
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    /// An empty `result` addressed back to the sender.
    pub fn make_result(&self) -> Iq {
        Iq {
            attrs: Attrs {
                id: self.attrs.id.clone(),
                from: self.attrs.to.clone(),
                to: self.attrs.from.clone(),
                lang: None,
            },
            iq_type: IqType::Result,
            payload: None,
            error: None,
        }
    }

    /// A `result` carrying `payload`.
    pub fn make_result_with(&self, payload: impl AnyExtension) -> Iq {
        let mut iq = self.make_result();
        iq.payload = Some(Box::new(payload));
        iq
    }

    /// An `error` reply to this request. The request payload is echoed back.
    pub fn make_error(&self, error: StanzaError) -> Iq {
        Iq {
            attrs: Attrs {
                id: self.attrs.id.clone(),
                from: self.attrs.to.clone(),
                to: self.attrs.from.clone(),
                lang: None,
            },
            iq_type: IqType::Error,
            payload: self.payload.clone(),
            error: Some(error),
        }
    }

    /// The standard reply for requests nobody handles.
    pub fn make_feature_not_implemented(&self) -> Iq {
        self.make_error(StanzaError::new(
            StanzaErrorType::Cancel,
            StanzaErrorCondition::FeatureNotImplemented,
        ))
    }

    /// Decode an `<iq/>`, resolving the payload through the registry.
    pub fn decode(element: &Element, registry: &ScopedRegistry<'_>) -> Result<Self, XmppError> {
        let attrs = Attrs::parse(element)?;
        let iq_type: IqType = element
            .attr("type")
            .ok_or_else(|| XmppError::xml_parse("<iq/> missing 'type' attribute"))?
            .parse()?;
        let stanza_ns = element.ns();

        let mut payload: Option<Box<dyn AnyExtension>> = None;
        let mut error = None;
        for child in element.children() {
            if child.name() == "error" && child.ns() == stanza_ns {
                error = Some(StanzaError::from_element(child)?);
                continue;
            }
            if payload.is_some() {
                debug!(element = child.name(), "Ignoring extra IQ payload");
                continue;
            }
            payload = Some(registry.resolve(PacketKind::Iq, child));
        }

        Ok(Self {
            attrs,
            iq_type,
            payload,
            error,
        })
    }

    /// Serialize in the stanza namespace `stanza_ns`.
    pub fn to_element(&self, stanza_ns: &str) -> Element {
        let mut builder = self
            .attrs
            .apply(Element::builder("iq", stanza_ns))
            .attr("type", self.iq_type.as_str());
        if let Some(ref payload) = self.payload {
            builder = builder.append(payload.to_element());
        }
        if let Some(ref error) = self.error {
            builder = builder.append(error.to_element(stanza_ns));
        }
        builder.build()
    }
}
