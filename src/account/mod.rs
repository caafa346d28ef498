//! The remote account: an event sink plus agent-record lookup.
//!
//! Everything outside this module talks to the account through the
//! [`Account`] trait. Sending is fire-and-forget from the caller's point of
//! view: lifecycle code logs failed sends and carries on.

mod client;
mod error;
mod event;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state_machine::{Case, CaseNodeUpdate};

pub use client::HttpAccount;
pub use error::AccountError;
pub use event::{Event, EventType};

/// How to find an agent record on the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentLookup {
    Id(String),
    Slug(String),
}

impl fmt::Display for AgentLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentLookup::Id(id) => write!(f, "id={id}"),
            AgentLookup::Slug(slug) => write!(f, "slug={slug}"),
        }
    }
}

/// Agent record as stored by the account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub onboarding_status: Option<String>,
    /// Encrypted JSON list of parameter records.
    #[serde(default)]
    pub parameters_encrypted: Option<String>,
}

impl AgentRecord {
    pub fn is_configured(&self) -> bool {
        self.onboarding_status.as_deref() == Some("configured")
    }
}

#[async_trait]
pub trait Account: Send + Sync {
    fn workspace_id(&self) -> &str;

    async fn send_event(&self, sender: &str, event: &Event) -> Result<(), AccountError>;

    async fn get_agent_by(&self, lookup: &AgentLookup) -> Result<AgentRecord, AccountError>;

    async fn send_start_case(&self, case: &Case) -> Result<(), AccountError> {
        let event = Event::case_start(case)?;
        self.send_event(&case.uri(), &event).await
    }

    async fn send_update_case(&self, case: &Case, update: &CaseNodeUpdate) -> Result<(), AccountError> {
        let event = Event::case_update(case, update)?;
        self.send_event(&case.uri(), &event).await
    }
}
