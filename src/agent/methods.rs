use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::fields::{FieldDefinition, FieldSchema};
use crate::error::{ControlError, Result};

/// Longest accepted custom method key.
pub const MAX_CUSTOM_KEY_LEN: usize = 50;

const SLUG_PATTERN: &str = r"^[a-z0-9]+(?:-[a-z0-9]+)*$";

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SLUG_PATTERN).expect("slug pattern is valid"));

/// Check one custom method key against the length bound and the slug grammar.
pub fn validate_custom_key(key: &str) -> Result<()> {
    if key.len() > MAX_CUSTOM_KEY_LEN {
        return Err(ControlError::Validation(format!(
            "Custom method key '{key}' is {} characters long, the maximum is {MAX_CUSTOM_KEY_LEN}",
            key.len()
        )));
    }
    if !SLUG_RE.is_match(key) {
        return Err(ControlError::Validation(format!(
            "Custom method key '{key}' must match {SLUG_PATTERN} (lowercase letters, digits, single inner hyphens)"
        )));
    }
    Ok(())
}

/// Declaration of one callable agent method.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMethod {
    pub name: String,
    /// Key of the callable in the agent's method table.
    pub method: String,
    pub params: Map<String, Value>,
    pub fields: FieldSchema,
    pub description: Option<String>,
    pub is_async: bool,
}

impl AgentMethod {
    pub fn new(name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            params: Map::new(),
            fields: FieldSchema::default(),
            description: None,
            is_async: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldDefinition>) -> Result<Self> {
        self.fields = FieldSchema::build(fields)?;
        Ok(self)
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn fields_definitions(&self) -> Value {
        serde_json::to_value(&self.fields).unwrap_or(Value::Array(Vec::new()))
    }

    pub fn registration_info(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "method": self.method,
            "params": self.params,
            "fields": self.fields_definitions(),
            "description": self.description,
            "is_async": self.is_async,
        })
    }
}

/// The methods an agent exposes. The three job methods are mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMethods {
    pub job_start: AgentMethod,
    pub job_stop: AgentMethod,
    pub job_status: AgentMethod,
    pub chat: Option<AgentMethod>,
    custom: BTreeMap<String, AgentMethod>,
}

impl AgentMethods {
    pub fn new(job_start: AgentMethod, job_stop: AgentMethod, job_status: AgentMethod) -> Self {
        Self {
            job_start,
            job_stop,
            job_status,
            chat: None,
            custom: BTreeMap::new(),
        }
    }

    pub fn with_chat(mut self, chat: AgentMethod) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Add custom methods. Every key is checked; the error lists all
    /// offending keys, the first one first.
    pub fn with_custom<K: Into<String>>(
        mut self,
        custom: impl IntoIterator<Item = (K, AgentMethod)>,
    ) -> Result<Self> {
        let mut violations = Vec::new();
        for (key, method) in custom {
            let key = key.into();
            match validate_custom_key(&key) {
                Ok(()) => {
                    self.custom.insert(key, method);
                }
                Err(ControlError::Validation(msg)) => violations.push(msg),
                Err(other) => return Err(other),
            }
        }
        if !violations.is_empty() {
            return Err(ControlError::Validation(violations.join("; ")));
        }
        Ok(self)
    }

    pub fn custom(&self, key: &str) -> Option<&AgentMethod> {
        self.custom.get(key)
    }

    pub fn custom_names(&self) -> impl Iterator<Item = &str> {
        self.custom.keys().map(String::as_str)
    }

    /// Every declared method, mandatory ones first.
    pub fn all(&self) -> impl Iterator<Item = &AgentMethod> {
        [&self.job_start, &self.job_stop, &self.job_status]
            .into_iter()
            .chain(self.chat.as_ref())
            .chain(self.custom.values())
    }

    pub fn registration_info(&self) -> Value {
        let custom: Map<String, Value> = self
            .custom
            .iter()
            .map(|(k, m)| (k.clone(), m.registration_info()))
            .collect();
        serde_json::json!({
            "job_start": self.job_start.registration_info(),
            "job_stop": self.job_stop.registration_info(),
            "job_status": self.job_status.registration_info(),
            "chat": self.chat.as_ref().map(AgentMethod::registration_info),
            "custom": custom,
        })
    }
}
