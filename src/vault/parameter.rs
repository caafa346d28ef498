//! Typed agent parameters and the remote update path.
//!
//! Values only change through [`ParametersSetup::update_values`], which
//! validates the whole batch before touching anything: a batch naming an
//! unknown parameter leaves every value as it was.

use std::collections::HashSet;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, error};

use super::environment::EnvironmentOverlay;
use crate::error::{ControlError, Result};

const MASK: &str = "********";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_environment: bool,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "default_is_secret")]
    pub is_secret: bool,
    #[serde(default)]
    pub is_required: bool,
}

fn default_is_secret() -> bool {
    true
}

impl Parameter {
    /// A secret, optional, non-environment parameter without a value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_environment: false,
            value: None,
            is_secret: true,
            is_required: false,
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn environment(mut self) -> Self {
        self.is_environment = true;
        self
    }

    pub fn public(mut self) -> Self {
        self.is_secret = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    /// Store a value, exporting it when `export` is set.
    pub fn set_value(&mut self, value: String, export: bool, env: &dyn EnvironmentOverlay) {
        if export {
            env.set(&self.name, &value);
        }
        self.value = Some(value);
    }

    pub fn registration_info(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "is_environment": self.is_environment,
            "is_secret": self.is_secret,
            "is_required": self.is_required,
        })
    }
}

// Secret values never leave the process in clear text.
impl Serialize for Parameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let value = match (&self.value, self.is_secret) {
            (Some(_), true) => Some(MASK),
            (Some(v), false) => Some(v.as_str()),
            (None, _) => None,
        };
        let mut s = serializer.serialize_struct("Parameter", 6)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("description", &self.description)?;
        s.serialize_field("is_environment", &self.is_environment)?;
        s.serialize_field("value", &value)?;
        s.serialize_field("is_secret", &self.is_secret)?;
        s.serialize_field("is_required", &self.is_required)?;
        s.end()
    }
}

/// One entry of a remote parameter update. Parsed leniently so that a
/// malformed entry is reported by name rather than as a JSON error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParameterRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub is_environment: Option<bool>,
}

impl ParameterRecord {
    fn value_string(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// The parameters an agent declares, in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParametersSetup {
    definitions: Vec<Parameter>,
}

impl ParametersSetup {
    pub fn from_list(definitions: Vec<Parameter>) -> Result<Self> {
        let mut seen = HashSet::new();
        for definition in &definitions {
            if definition.name.trim().is_empty() {
                return Err(ControlError::Validation("Parameter name must not be empty".into()));
            }
            if !seen.insert(definition.name.as_str()) {
                return Err(ControlError::Validation(format!(
                    "Parameter {} is defined more than once",
                    definition.name
                )));
            }
        }
        Ok(Self { definitions })
    }

    pub fn definitions(&self) -> &[Parameter] {
        &self.definitions
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.definitions.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|p| p.value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Names of required parameters that still have no value.
    pub fn missing_required(&self) -> Vec<&str> {
        self.definitions
            .iter()
            .filter(|p| p.is_required && p.value.is_none())
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn registration_info(&self) -> Value {
        Value::Array(self.definitions.iter().map(Parameter::registration_info).collect())
    }

    /// Apply a batch of records. Every record must name a declared parameter
    /// and carry a value; otherwise nothing is applied.
    pub fn update_values(
        &mut self,
        records: &[ParameterRecord],
        env: &dyn EnvironmentOverlay,
    ) -> Result<usize> {
        let mut resolved = Vec::with_capacity(records.len());
        for record in records {
            let Some(name) = record.name.as_deref() else {
                error!("parameter record without a name");
                return Err(ControlError::Validation("Parameter record has no name".into()));
            };
            let Some(position) = self.definitions.iter().position(|p| p.name == name) else {
                error!(parameter = name, "parameter not found in definitions");
                return Err(ControlError::Validation(format!(
                    "Parameter {name} not found in definitions"
                )));
            };
            let Some(value) = record.value_string() else {
                return Err(ControlError::Validation(format!("Parameter {name} has no value")));
            };
            let export = record
                .is_environment
                .unwrap_or(self.definitions[position].is_environment);
            resolved.push((position, value, export));
        }

        for (position, value, export) in resolved {
            self.definitions[position].set_value(value, export, env);
        }
        debug!(count = records.len(), "parameters updated");
        Ok(records.len())
    }

    /// Parse a decrypted JSON list of records and apply it.
    pub fn update_from_json(&mut self, json: &str, env: &dyn EnvironmentOverlay) -> Result<usize> {
        let records: Vec<ParameterRecord> = serde_json::from_str(json).map_err(|e| {
            ControlError::Validation(format!("Parameter update is not a list of records: {e}"))
        })?;
        self.update_values(&records, env)
    }
}
