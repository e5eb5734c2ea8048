//! `<message/>` stanzas.

use std::fmt;
use std::str::FromStr;

use minidom::Element;

use super::{new_id, AnyExtension, Attrs, StanzaError};
use crate::jid::Jid;
use crate::registry::{PacketKind, ScopedRegistry};
use crate::XmppError;

/// Message type (RFC 6121 Section 5.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    /// One-to-one chat
    Chat,
    /// Error reply
    Error,
    /// Multi-user chat
    Groupchat,
    /// Alert or notification
    Headline,
    /// Standalone message (default)
    #[default]
    Normal,
}

impl MessageType {
    /// The `type` attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Error => "error",
            Self::Groupchat => "groupchat",
            Self::Headline => "headline",
            Self::Normal => "normal",
        }
    }
}

impl FromStr for MessageType {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "error" => Ok(Self::Error),
            "groupchat" => Ok(Self::Groupchat),
            "headline" => Ok(Self::Headline),
            "normal" | "" => Ok(Self::Normal),
            other => Err(XmppError::xml_parse(format!("invalid message type: {other}"))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message stanza.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Common attributes
    pub attrs: Attrs,
    /// Message type
    pub message_type: MessageType,
    /// Subject
    pub subject: Option<String>,
    /// Body
    pub body: Option<String>,
    /// Conversation thread
    pub thread: Option<String>,
    /// Extensions in document order
    pub extensions: Vec<Box<dyn AnyExtension>>,
    /// Error, for `type='error'`
    pub error: Option<StanzaError>,
}

impl Message {
    /// A `chat` message with a body and a fresh ID.
    pub fn chat(to: Jid, body: impl Into<String>) -> Self {
        Self {
            attrs: Attrs::to(to),
            message_type: MessageType::Chat,
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// A `groupchat` message with a body and a fresh ID.
    pub fn groupchat(room: Jid, body: impl Into<String>) -> Self {
        Self {
            attrs: Attrs::to(room),
            message_type: MessageType::Groupchat,
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// A message without body, e.g. carrying only extensions.
    pub fn new(to: Option<Jid>) -> Self {
        Self {
            attrs: Attrs {
                id: Some(new_id()),
                to,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Append an extension.
    pub fn with_extension(mut self, extension: impl AnyExtension) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// The first extension of type `T`.
    pub fn extension<T: 'static>(&self) -> Option<&T> {
        self.extensions.iter().find_map(|e| e.downcast_ref::<T>())
    }

    /// Decode a `<message/>`, resolving extensions through the registry.
    pub fn decode(element: &Element, registry: &ScopedRegistry<'_>) -> Result<Self, XmppError> {
        let stanza_ns = element.ns();
        let mut message = Message {
            attrs: Attrs::parse(element)?,
            message_type: element.attr("type").unwrap_or_default().parse()?,
            ..Default::default()
        };

        for child in element.children() {
            if child.ns() == stanza_ns {
                match child.name() {
                    "body" if message.body.is_none() => message.body = Some(child.text()),
                    "subject" if message.subject.is_none() => message.subject = Some(child.text()),
                    "thread" => message.thread = Some(child.text()),
                    "error" => message.error = Some(StanzaError::from_element(child)?),
                    _ => {}
                }
                continue;
            }
            let extension = registry.resolve(PacketKind::Message, child);
            message.extensions.push(extension);
        }

        Ok(message)
    }

    /// Serialize in the stanza namespace `stanza_ns`.
    pub fn to_element(&self, stanza_ns: &str) -> Element {
        let mut builder = self.attrs.apply(Element::builder("message", stanza_ns));
        if self.message_type != MessageType::Normal {
            builder = builder.attr("type", self.message_type.as_str());
        }
        if let Some(ref subject) = self.subject {
            builder = builder.append(Element::builder("subject", stanza_ns).append(subject.clone()));
        }
        if let Some(ref body) = self.body {
            builder = builder.append(Element::builder("body", stanza_ns).append(body.clone()));
        }
        if let Some(ref thread) = self.thread {
            builder = builder.append(Element::builder("thread", stanza_ns).append(thread.clone()));
        }
        for extension in &self.extensions {
            builder = builder.append(extension.to_element());
        }
        if let Some(ref error) = self.error {
            builder = builder.append(error.to_element(stanza_ns));
        }
        builder.build()
    }
}
