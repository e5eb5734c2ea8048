//! XEP-0004: Data Forms.

use std::str::FromStr;

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{check_element, child_text, parse_bool, text_element, Extension, FromElement};
use crate::XmppError;

/// Form type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormType {
    /// Form to fill out
    #[default]
    Form,
    /// Submitted form
    Submit,
    /// Form was cancelled
    Cancel,
    /// Result data
    Result,
}

impl FormType {
    /// The `type` attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Submit => "submit",
            Self::Cancel => "cancel",
            Self::Result => "result",
        }
    }
}

impl FromStr for FormType {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "form" => Ok(Self::Form),
            "submit" => Ok(Self::Submit),
            "cancel" => Ok(Self::Cancel),
            "result" => Ok(Self::Result),
            other => Err(XmppError::xml_parse(format!("invalid data form type: {other}"))),
        }
    }
}

/// A selectable option of a list field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOption {
    /// Display label
    pub label: Option<String>,
    /// Option value
    pub value: String,
}

/// A form field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    /// Field variable name
    pub var: Option<String>,
    /// Field type, e.g. `text-single` or `hidden`
    pub field_type: Option<String>,
    /// Display label
    pub label: Option<String>,
    /// Description
    pub desc: Option<String>,
    /// Whether a value is required
    pub required: bool,
    /// Values
    pub values: Vec<String>,
    /// Options for list fields
    pub options: Vec<FieldOption>,
}

impl Field {
    /// A field with a single value.
    pub fn new(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            var: Some(var.into()),
            values: vec![value.into()],
            ..Default::default()
        }
    }

    /// The hidden `FORM_TYPE` field.
    pub fn form_type(value: impl Into<String>) -> Self {
        Self {
            field_type: Some("hidden".to_string()),
            ..Self::new("FORM_TYPE", value)
        }
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("field", ns::DATA_FORMS)
            .attr("var", self.var.clone())
            .attr("type", self.field_type.clone())
            .attr("label", self.label.clone());
        if let Some(ref desc) = self.desc {
            builder = builder.append(text_element("desc", ns::DATA_FORMS, desc.clone()));
        }
        if self.required {
            builder = builder.append(Element::builder("required", ns::DATA_FORMS));
        }
        for value in &self.values {
            builder = builder.append(text_element("value", ns::DATA_FORMS, value.clone()));
        }
        for option in &self.options {
            builder = builder.append(
                Element::builder("option", ns::DATA_FORMS)
                    .attr("label", option.label.clone())
                    .append(text_element("value", ns::DATA_FORMS, option.value.clone())),
            );
        }
        builder.build()
    }

    fn from_element(element: &Element) -> Self {
        Self {
            var: element.attr("var").map(str::to_string),
            field_type: element.attr("type").map(str::to_string),
            label: element.attr("label").map(str::to_string),
            desc: child_text(element, "desc", ns::DATA_FORMS),
            required: element.has_child("required", ns::DATA_FORMS),
            values: element
                .children()
                .filter(|c| c.is("value", ns::DATA_FORMS))
                .map(Element::text)
                .collect(),
            options: element
                .children()
                .filter(|c| c.is("option", ns::DATA_FORMS))
                .map(|option| FieldOption {
                    label: option.attr("label").map(str::to_string),
                    value: child_text(option, "value", ns::DATA_FORMS).unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// A data form (`<x xmlns='jabber:x:data'/>`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataForm {
    /// Form type
    pub form_type: FormType,
    /// Title
    pub title: Option<String>,
    /// Instructions, one per element
    pub instructions: Vec<String>,
    /// Fields in document order
    pub fields: Vec<Field>,
    /// Column definitions of a multi-item result
    pub reported: Vec<Field>,
    /// Rows of a multi-item result
    pub items: Vec<Vec<Field>>,
}

impl DataForm {
    /// A form of the given type with the given fields.
    pub fn new(form_type: FormType, fields: Vec<Field>) -> Self {
        Self {
            form_type,
            fields,
            ..Default::default()
        }
    }

    /// Value of the hidden `FORM_TYPE` field.
    pub fn form_namespace(&self) -> Option<&str> {
        self.field_value("FORM_TYPE")
    }

    /// First value of the field named `var`.
    pub fn field_value(&self, var: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.var.as_deref() == Some(var))
            .and_then(|f| f.values.first())
            .map(String::as_str)
    }

    /// Whether the boolean field `var` is true.
    pub fn field_bool(&self, var: &str) -> bool {
        parse_bool(self.field_value(var))
    }
}

impl Extension for DataForm {
    fn namespace(&self) -> &str {
        ns::DATA_FORMS
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("x", ns::DATA_FORMS).attr("type", self.form_type.as_str());
        if let Some(ref title) = self.title {
            builder = builder.append(text_element("title", ns::DATA_FORMS, title.clone()));
        }
        for instructions in &self.instructions {
            builder = builder.append(text_element("instructions", ns::DATA_FORMS, instructions.clone()));
        }
        builder = builder.append_all(self.fields.iter().map(Field::to_element));
        if !self.reported.is_empty() {
            builder = builder.append(
                Element::builder("reported", ns::DATA_FORMS).append_all(self.reported.iter().map(Field::to_element)),
            );
        }
        for item in &self.items {
            builder = builder
                .append(Element::builder("item", ns::DATA_FORMS).append_all(item.iter().map(Field::to_element)));
        }
        builder.build()
    }
}

impl FromElement for DataForm {
    fn from_element(element: &Element) -> Result<Self, XmppError> {
        check_element(element, "x", ns::DATA_FORMS)?;
        let fields_of = |parent: &Element| -> Vec<Field> {
            parent
                .children()
                .filter(|c| c.is("field", ns::DATA_FORMS))
                .map(Field::from_element)
                .collect()
        };

        Ok(Self {
            form_type: element.attr("type").unwrap_or("form").parse()?,
            title: child_text(element, "title", ns::DATA_FORMS),
            instructions: element
                .children()
                .filter(|c| c.is("instructions", ns::DATA_FORMS))
                .map(Element::text)
                .collect(),
            fields: fields_of(element),
            reported: element
                .get_child("reported", ns::DATA_FORMS)
                .map(fields_of)
                .unwrap_or_default(),
            items: element
                .children()
                .filter(|c| c.is("item", ns::DATA_FORMS))
                .map(fields_of)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_form() {
        let element: Element = "<x xmlns='jabber:x:data' type='submit'>\
            <field var='FORM_TYPE' type='hidden'><value>urn:xmpp:mam:2</value></field>\
            <field var='with'><value>juliet@capulet.lit</value></field>\
            <field var='flag' type='boolean'><value>1</value></field>\
            </x>"
            .parse()
            .unwrap();
        let form = DataForm::from_element(&element).unwrap();
        assert_eq!(form.form_type, FormType::Submit);
        assert_eq!(form.form_namespace(), Some("urn:xmpp:mam:2"));
        assert_eq!(form.field_value("with"), Some("juliet@capulet.lit"));
        assert!(form.field_bool("flag"));
        assert_eq!(form.field_value("missing"), None);
    }

    #[test]
    fn test_reported_and_items() {
        let element: Element = "<x xmlns='jabber:x:data' type='result'>\
            <reported><field var='name'/></reported>\
            <item><field var='name'><value>one</value></field></item>\
            <item><field var='name'><value>two</value></field></item>\
            </x>"
            .parse()
            .unwrap();
        let form = DataForm::from_element(&element).unwrap();
        assert_eq!(form.reported.len(), 1);
        assert_eq!(form.items.len(), 2);
        assert_eq!(form.items[1][0].values, vec!["two".to_string()]);
    }

    #[test]
    fn test_list_options_serialize() {
        let field = Field {
            var: Some("color".into()),
            field_type: Some("list-single".into()),
            options: vec![FieldOption {
                label: Some("Red".into()),
                value: "red".into(),
            }],
            required: true,
            ..Default::default()
        };
        let form = DataForm::new(FormType::Form, vec![field.clone()]);
        let parsed = DataForm::from_element(&form.to_element()).unwrap();
        assert_eq!(parsed.fields, vec![field]);
    }
}
