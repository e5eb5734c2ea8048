//! XEP-0045: Multi-User Chat.

use chrono::{DateTime, SecondsFormat, Utc};
use minidom::Element;

use crate::jid::{Jid, JidError};
use crate::parser::ns;
use crate::stanza::{child_text, parse_attr, text_element, Extension, FromElement, Presence, PresenceType};
use crate::XmppError;

/// History to request when joining.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    pub max_chars: Option<u32>,
    pub max_stanzas: Option<u32>,
    pub seconds: Option<u32>,
    pub since: Option<DateTime<Utc>>,
}

impl History {
    fn to_element(&self) -> Element {
        Element::builder("history", ns::MUC)
            .attr("maxchars", self.max_chars.map(|v| v.to_string()))
            .attr("maxstanzas", self.max_stanzas.map(|v| v.to_string()))
            .attr("seconds", self.seconds.map(|v| v.to_string()))
            .attr("since", self.since.map(|s| s.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            .build()
    }
}

/// `<x xmlns='http://jabber.org/protocol/muc'/>`, sent when joining a room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MucJoin {
    /// Room password
    pub password: Option<String>,
    /// History request
    pub history: Option<History>,
}

impl Extension for MucJoin {
    fn namespace(&self) -> &str {
        ns::MUC
    }

    fn to_element(&self) -> Element {
        Element::builder("x", ns::MUC)
            .append_all(self.history.as_ref().map(History::to_element))
            .append_all(self.password.clone().map(|p| text_element("password", ns::MUC, p)))
            .build()
    }
}

impl FromElement for MucJoin {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        let history = element
            .get_child("history", ns::MUC)
            .map(|h| -> Result<History, XmppError> {
                Ok(History {
                    max_chars: parse_attr(h, "maxchars")?,
                    max_stanzas: parse_attr(h, "maxstanzas")?,
                    seconds: parse_attr(h, "seconds")?,
                    since: h
                        .attr("since")
                        .map(|s| {
                            DateTime::parse_from_rfc3339(s)
                                .map(|d| d.with_timezone(&Utc))
                                .map_err(|e| XmppError::xml_parse(format!("invalid history since: {e}")))
                        })
                        .transpose()?,
                })
            })
            .transpose()?;
        Ok(Self {
            password: child_text(element, "password", ns::MUC),
            history,
        })
    }
}

/// An occupant `<item/>` in a `muc#user` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MucItem {
    /// Long-lived affiliation (owner, admin, member, outcast, none)
    pub affiliation: Option<String>,
    /// Session role (moderator, participant, visitor, none)
    pub role: Option<String>,
    /// Real JID, in non-anonymous rooms
    pub jid: Option<Jid>,
    /// Occupant nickname
    pub nick: Option<String>,
    /// Reason for a change
    pub reason: Option<String>,
}

/// `<x xmlns='http://jabber.org/protocol/muc#user'/>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MucUser {
    /// Occupant items
    pub items: Vec<MucItem>,
    /// Status codes, e.g. 110 for self-presence
    pub statuses: Vec<u16>,
}

impl MucUser {
    /// Whether status `code` is present.
    pub fn has_status(&self, code: u16) -> bool {
        self.statuses.contains(&code)
    }

    /// Whether this is the user's own presence in the room.
    pub fn is_self_presence(&self) -> bool {
        self.has_status(110)
    }
}

impl Extension for MucUser {
    fn namespace(&self) -> &str {
        ns::MUC_USER
    }

    fn to_element(&self) -> Element {
        Element::builder("x", ns::MUC_USER)
            .append_all(self.items.iter().map(|item| {
                Element::builder("item", ns::MUC_USER)
                    .attr("affiliation", item.affiliation.clone())
                    .attr("role", item.role.clone())
                    .attr("jid", item.jid.as_ref().map(Jid::to_string))
                    .attr("nick", item.nick.clone())
                    .append_all(item.reason.clone().map(|r| text_element("reason", ns::MUC_USER, r)))
                    .build()
            }))
            .append_all(self.statuses.iter().map(|code| {
                Element::builder("status", ns::MUC_USER)
                    .attr("code", code.to_string())
                    .build()
            }))
            .build()
    }
}

impl FromElement for MucUser {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        let mut user = MucUser::default();
        for child in element.children() {
            if child.is("item", ns::MUC_USER) {
                user.items.push(MucItem {
                    affiliation: child.attr("affiliation").map(str::to_string),
                    role: child.attr("role").map(str::to_string),
                    jid: child.attr("jid").map(Jid::parse).transpose()?,
                    nick: child.attr("nick").map(str::to_string),
                    reason: child_text(child, "reason", ns::MUC_USER),
                });
            } else if child.is("status", ns::MUC_USER) {
                if let Some(code) = parse_attr(child, "code")? {
                    user.statuses.push(code);
                }
            }
        }
        Ok(user)
    }
}

fn occupant(room: &Jid, nick: &str) -> Result<Jid, XmppError> {
    if nick.is_empty() {
        return Err(JidError::EmptyResource.into());
    }
    Ok(room.bare().with_resource(nick)?)
}

/// Presence joining `room` as `nick`.
pub fn join_presence(room: &Jid, nick: &str, join: MucJoin) -> Result<Presence, XmppError> {
    let occupant = occupant(room, nick)?;
    Ok(Presence::directed(occupant, PresenceType::Available).with_extension(join))
}

/// Presence leaving `room`.
pub fn leave_presence(room: &Jid, nick: &str, status: Option<String>) -> Result<Presence, XmppError> {
    let occupant = occupant(room, nick)?;
    let mut presence = Presence::directed(occupant, PresenceType::Unavailable);
    presence.status = status;
    Ok(presence)
}
