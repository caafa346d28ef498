//! Agents: named sets of methods plus the parameters they run with.

mod dispatch;
mod fields;
mod methods;

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::{Account, AgentLookup};
use crate::error::{ControlError, Result};
use crate::state_machine::JobResponse;
use crate::vault::{ParametersSetup, Vault};

pub use dispatch::{Dispatcher, MethodArgs, MethodFn, MethodTable};
pub use fields::{FieldDefinition, FieldSchema, FieldType};
pub use methods::{AgentMethod, AgentMethods, MAX_CUSTOM_KEY_LEN, validate_custom_key};

static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug separator pattern is valid"));

/// Stable id of an agent, derived from its name.
pub fn agent_id(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()).to_string()
}

/// Lowercase, with every run of other characters turned into one hyphen.
pub fn slugify(name: &str) -> String {
    NON_SLUG
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub id: String,
    pub author: Option<String>,
    pub developer: Option<String>,
    pub maintainer: Option<String>,
    pub editor: Option<String>,
    pub version: String,
    pub description: String,
    pub tags: Vec<String>,
    methods: AgentMethods,
    table: MethodTable,
    pub parameters_setup: Option<ParametersSetup>,
    pub server_agent_id: Option<String>,
    pub server_agent_status: Option<String>,
    pub server_agent_onboarding_status: Option<String>,
    pub server_encrypted_parameters: Option<String>,
}

/// Builder for [`Agent`]; `build` validates the id and the method table.
#[derive(Debug, Clone)]
pub struct AgentBuilder {
    name: String,
    id: Option<String>,
    author: Option<String>,
    developer: Option<String>,
    maintainer: Option<String>,
    editor: Option<String>,
    version: String,
    description: String,
    tags: Vec<String>,
    methods: AgentMethods,
    table: MethodTable,
    parameters_setup: Option<ParametersSetup>,
}

impl AgentBuilder {
    /// Must equal [`agent_id`] of the name.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn developer(mut self, developer: impl Into<String>) -> Self {
        self.developer = Some(developer.into());
        self
    }

    pub fn maintainer(mut self, maintainer: impl Into<String>) -> Self {
        self.maintainer = Some(maintainer.into());
        self
    }

    pub fn editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = Some(editor.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn table(mut self, table: MethodTable) -> Self {
        self.table = table;
        self
    }

    pub fn parameters(mut self, setup: ParametersSetup) -> Self {
        self.parameters_setup = Some(setup);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let expected = agent_id(&self.name);
        let id = match self.id {
            Some(id) if id != expected => {
                return Err(ControlError::Validation(format!(
                    "Agent ID does not match: {id} is not the id of {}",
                    self.name
                )));
            }
            _ => expected,
        };
        if self.name.trim().is_empty() {
            return Err(ControlError::Validation("Agent name must not be empty".into()));
        }
        for descriptor in self.methods.all() {
            if !self.table.contains(&descriptor.method) {
                warn!(
                    agent = %self.name,
                    method = %descriptor.method,
                    "declared method has no registered callable"
                );
            }
        }
        Ok(Agent {
            name: self.name,
            id,
            author: self.author,
            developer: self.developer,
            maintainer: self.maintainer,
            editor: self.editor,
            version: self.version,
            description: self.description,
            tags: self.tags,
            methods: self.methods,
            table: self.table,
            parameters_setup: self.parameters_setup,
            server_agent_id: None,
            server_agent_status: None,
            server_agent_onboarding_status: None,
            server_encrypted_parameters: None,
        })
    }
}

impl Agent {
    pub fn builder(name: impl Into<String>, methods: AgentMethods) -> AgentBuilder {
        AgentBuilder {
            name: name.into(),
            id: None,
            author: None,
            developer: None,
            maintainer: None,
            editor: None,
            version: "0.1.0".into(),
            description: String::new(),
            tags: Vec::new(),
            methods,
            table: MethodTable::new(),
            parameters_setup: None,
        }
    }

    pub fn methods(&self) -> &AgentMethods {
        &self.methods
    }

    pub fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(&self.table)
    }

    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    pub fn path(&self) -> String {
        format!("/agents/{}", self.slug())
    }

    /// The declaration `start` runs: `job_start` or a named custom method.
    pub fn start_method(&self, method_name: &str) -> Result<&AgentMethod> {
        if method_name == "job_start" {
            return Ok(&self.methods.job_start);
        }
        self.methods.custom(method_name).ok_or_else(|| {
            ControlError::Validation(format!(
                "Method {method_name} not found for agent {}",
                self.name
            ))
        })
    }

    pub fn job_stop(&self, params: &Map<String, Value>) -> Result<JobResponse> {
        let descriptor = &self.methods.job_stop;
        let args = MethodArgs::from_params(&descriptor.params).merge(params);
        self.dispatcher().invoke(descriptor, &args)
    }

    pub fn job_status(&self, params: &Map<String, Value>) -> Result<JobResponse> {
        let descriptor = &self.methods.job_status;
        let args = MethodArgs::from_params(&descriptor.params).merge(params);
        self.dispatcher().invoke(descriptor, &args)
    }

    pub fn chat(&self, context: &str, message: &str) -> Result<JobResponse> {
        let Some(descriptor) = &self.methods.chat else {
            return Err(ControlError::Value("Chat method not configured".into()));
        };
        let args = MethodArgs::from_params(&descriptor.params)
            .with("context", Value::String(context.into()))
            .with("message", Value::String(message.into()));
        self.dispatcher().invoke(descriptor, &args)
    }

    /// Call a custom method directly, outside any job.
    pub fn custom(&self, key: &str, params: &Map<String, Value>) -> Result<JobResponse> {
        let Some(descriptor) = self.methods.custom(key) else {
            return Err(ControlError::Value(format!("Method {key} not found")));
        };
        let args = MethodArgs::from_params(&descriptor.params).merge(params);
        self.dispatcher().invoke(descriptor, &args)
    }

    pub fn registration_info(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "id": self.id,
            "author": self.author,
            "developer": self.developer,
            "maintainer": self.maintainer,
            "editor": self.editor,
            "version": self.version,
            "description": self.description,
            "api_path": self.path(),
            "slug": self.slug(),
            "tags": self.tags,
            "methods": self.methods.registration_info(),
            "parameters_setup": self.parameters_setup.as_ref().map(ParametersSetup::registration_info),
            "server_agent_id": self.server_agent_id,
            "server_agent_status": self.server_agent_status,
            "server_agent_onboarding_status": self.server_agent_onboarding_status,
            "server_encrypted_parameters": self.server_encrypted_parameters,
        })
    }

    /// Refresh server-side identity and parameters from the account.
    ///
    /// The agent is looked up by its server id once known, by slug before
    /// that. Parameters are only applied once onboarding is `configured`.
    pub async fn update_from_server(&mut self, account: &dyn Account, vault: &Vault) -> Result<()> {
        let lookup = match &self.server_agent_id {
            Some(id) => AgentLookup::Id(id.clone()),
            None => AgentLookup::Slug(self.slug()),
        };
        let record = account.get_agent_by(&lookup).await?;

        if let Some(known) = &self.server_agent_id
            && *known != record.id
        {
            return Err(ControlError::Validation(format!(
                "Agent ID mismatch: {known} != {}",
                record.id
            )));
        }

        self.server_agent_id = Some(record.id.clone());
        self.server_agent_status = record.status.clone();
        self.server_agent_onboarding_status = record.onboarding_status.clone();
        info!(agent = %self.name, server_agent_id = %record.id, "agent synced with account");

        if !record.is_configured() {
            debug!(agent = %self.name, "agent not onboarded, skipping parameters");
            return Ok(());
        }
        match (&record.parameters_encrypted, self.parameters_setup.as_mut()) {
            (Some(encrypted), Some(setup)) => {
                vault.apply_remote_update(setup, encrypted)?;
                self.server_encrypted_parameters = Some(encrypted.clone());
            }
            _ => debug!(agent = %self.name, "no encrypted parameters to apply"),
        }
        Ok(())
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
