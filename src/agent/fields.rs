//! Form fields a method asks its caller for.
//!
//! A [`FieldSchema`] is built once, when the method is declared, and then
//! checks every incoming form before dispatch. Values are never coerced:
//! `"3"` is not an integer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "CharField")]
    Char,
    #[serde(rename = "IntegerField")]
    Integer,
    #[serde(rename = "FloatField")]
    Float,
    #[serde(rename = "BooleanField")]
    Boolean,
    #[serde(rename = "ChoiceField")]
    Choice,
    #[serde(rename = "MultipleChoiceField")]
    MultipleChoice,
    #[serde(rename = "JSONField")]
    Json,
}

impl FieldType {
    fn expected(&self) -> &'static str {
        match self {
            FieldType::Char => "a string",
            FieldType::Integer => "an integer",
            FieldType::Float => "a number",
            FieldType::Boolean => "a boolean",
            FieldType::Choice => "one of the declared choices",
            FieldType::MultipleChoice => "a list of declared choices",
            FieldType::Json => "any JSON value",
        }
    }

    fn has_choices(&self) -> bool {
        matches!(self, FieldType::Choice | FieldType::MultipleChoice)
    }
}

/// JSON kind name used in error messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `[value, label]` pairs for choice fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            description: None,
            choices: Vec::new(),
            widget: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_choices<V, L>(mut self, choices: impl IntoIterator<Item = (V, L)>) -> Self
    where
        V: Into<String>,
        L: Into<String>,
    {
        self.choices = choices.into_iter().map(|(v, l)| (v.into(), l.into())).collect();
        self
    }

    pub fn with_widget(mut self, widget: impl Into<String>) -> Self {
        self.widget = Some(widget.into());
        self
    }

    fn is_choice(&self, value: &Value) -> bool {
        value
            .as_str()
            .is_some_and(|s| self.choices.iter().any(|(v, _)| v == s))
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.field_type {
            FieldType::Char => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Choice => self.is_choice(value),
            FieldType::MultipleChoice => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| self.is_choice(v))),
            FieldType::Json => true,
        }
    }
}

/// Validated field list of one method.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldSchema {
    fields: Vec<FieldDefinition>,
}

impl FieldSchema {
    /// Reject empty names, duplicates, and choice fields without choices.
    pub fn build(fields: Vec<FieldDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(ControlError::Validation("Field name must not be empty".into()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ControlError::Validation(format!(
                    "Field {} is declared more than once",
                    field.name
                )));
            }
            if field.field_type.has_choices() && field.choices.is_empty() {
                return Err(ControlError::Validation(format!(
                    "Field {} is a choice field without choices",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    pub fn definitions(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check `input` against the schema and return the typed record: every
    /// declared field present, unset optional fields as `null`, undeclared
    /// keys dropped.
    pub fn validate(&self, input: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut record = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            match input.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(ControlError::Validation(format!(
                        "Field {} is required",
                        field.name
                    )));
                }
                None | Some(Value::Null) => {
                    record.insert(field.name.clone(), Value::Null);
                }
                Some(value) if !field.accepts(value) => {
                    return Err(ControlError::Validation(format!(
                        "Field {} expects {}, got {}",
                        field.name,
                        field.field_type.expected(),
                        json_kind(value)
                    )));
                }
                Some(value) => {
                    record.insert(field.name.clone(), value.clone());
                }
            }
        }
        for key in input.keys().filter(|k| !record.contains_key(*k)) {
            debug!(field = %key, "dropping undeclared form field");
        }
        Ok(record)
    }
}
