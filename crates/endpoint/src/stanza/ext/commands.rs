//! XEP-0050: Ad-Hoc Commands.

use std::str::FromStr;

use minidom::Element;

use super::data_form::DataForm;
use crate::parser::ns;
use crate::stanza::{check_element, require_attr, Extension, FromElement};
use crate::XmppError;

/// Requested or allowed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// Run or continue
    Execute,
    /// Cancel
    Cancel,
    /// Previous stage
    Prev,
    /// Next stage
    Next,
    /// Finish
    Complete,
}

impl CommandAction {
    /// Attribute value and element name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Cancel => "cancel",
            Self::Prev => "prev",
            Self::Next => "next",
            Self::Complete => "complete",
        }
    }
}

impl FromStr for CommandAction {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execute" => Ok(Self::Execute),
            "cancel" => Ok(Self::Cancel),
            "prev" => Ok(Self::Prev),
            "next" => Ok(Self::Next),
            "complete" => Ok(Self::Complete),
            other => Err(XmppError::xml_parse(format!("invalid command action: {other}"))),
        }
    }
}

/// Execution status reported by the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Running, more stages follow
    Executing,
    /// Finished
    Completed,
    /// Canceled
    Canceled,
}

impl CommandStatus {
    /// Attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

impl FromStr for CommandStatus {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "canceled" => Ok(Self::Canceled),
            other => Err(XmppError::xml_parse(format!("invalid command status: {other}"))),
        }
    }
}

/// A `<note/>` shown to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// `info`, `warn` or `error`
    pub note_type: String,
    /// Note text
    pub text: String,
}

/// `<command/>` request or response.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Command node
    pub node: String,
    /// Session for multi-stage commands
    pub session_id: Option<String>,
    /// Requested action
    pub action: Option<CommandAction>,
    /// Execution status
    pub status: Option<CommandStatus>,
    /// Actions allowed in the next stage
    pub actions: Vec<CommandAction>,
    /// Default of `actions`
    pub execute: Option<CommandAction>,
    /// Notes
    pub notes: Vec<Note>,
    /// Payload form
    pub form: Option<DataForm>,
}

impl Command {
    /// Execute `node`.
    pub fn execute(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            session_id: None,
            action: Some(CommandAction::Execute),
            status: None,
            actions: Vec::new(),
            execute: None,
            notes: Vec::new(),
            form: None,
        }
    }
}

impl Extension for Command {
    fn namespace(&self) -> &str {
        ns::COMMANDS
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("command", ns::COMMANDS)
            .attr("node", self.node.as_str())
            .attr("sessionid", self.session_id.clone())
            .attr("action", self.action.map(|a| a.as_str()))
            .attr("status", self.status.map(|s| s.as_str()));
        if !self.actions.is_empty() || self.execute.is_some() {
            builder = builder.append(
                Element::builder("actions", ns::COMMANDS)
                    .attr("execute", self.execute.map(|a| a.as_str()))
                    .append_all(self.actions.iter().map(|a| Element::builder(a.as_str(), ns::COMMANDS).build())),
            );
        }
        for note in &self.notes {
            builder = builder.append(
                Element::builder("note", ns::COMMANDS)
                    .attr("type", note.note_type.as_str())
                    .append(note.text.clone()),
            );
        }
        builder.append_all(self.form.as_ref().map(DataForm::to_element)).build()
    }
}

impl FromElement for Command {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "command", ns::COMMANDS)?;
        let mut command = Command {
            node: require_attr(element, "node")?,
            session_id: element.attr("sessionid").map(str::to_string),
            action: element.attr("action").map(str::parse::<CommandAction>).transpose()?,
            status: element.attr("status").map(str::parse::<CommandStatus>).transpose()?,
            actions: Vec::new(),
            execute: None,
            notes: Vec::new(),
            form: None,
        };
        for child in element.children() {
            if child.is("actions", ns::COMMANDS) {
                command.execute = child.attr("execute").map(str::parse::<CommandAction>).transpose()?;
                command.actions = child
                    .children()
                    .map(|a| a.name().parse::<CommandAction>())
                    .collect::<Result<Vec<_>, _>>()?;
            } else if child.is("note", ns::COMMANDS) {
                command.notes.push(Note {
                    note_type: child.attr("type").unwrap_or("info").to_string(),
                    text: child.text(),
                });
            } else if child.is("x", ns::DATA_FORMS) {
                command.form = Some(DataForm::from_element(child)?);
            }
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executing_response() {
        let element: Element = "<command xmlns='http://jabber.org/protocol/commands' sessionid='config:20020923T213616Z-700' \
            node='config' status='executing'>\
            <actions execute='next'><next/></actions>\
            <x xmlns='jabber:x:data' type='form'><title>Configure Service</title></x></command>"
            .parse()
            .unwrap();
        let command = Command::from_element(&element).unwrap();
        assert_eq!(command.status, Some(CommandStatus::Executing));
        assert_eq!(command.execute, Some(CommandAction::Next));
        assert_eq!(command.actions, vec![CommandAction::Next]);
        assert_eq!(command.form.unwrap().title.as_deref(), Some("Configure Service"));
    }

    #[test]
    fn test_execute_request() {
        let element = Command::execute("list").to_element();
        assert_eq!(element.attr("action"), Some("execute"));
        assert!(element.get_child("actions", ns::COMMANDS).is_none());
    }
}
