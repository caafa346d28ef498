use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::debug;

use super::error::AccountError;
use super::event::Event;
use super::{Account, AgentLookup, AgentRecord};
use crate::config::AccountSettings;

const EVENTS_PATH: &str = "/api/v1/ctrl-events/";

/// Account reached over HTTP with an `Api-Key` authorization header.
pub struct HttpAccount {
    api_url: String,
    api_key: String,
    workspace_id: String,
    client: Client,
}

impl HttpAccount {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Result<Self, AccountError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        let api_url: String = api_url.into();
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            workspace_id: workspace_id.into(),
            client,
        })
    }

    pub fn from_settings(settings: &AccountSettings) -> Result<Self, AccountError> {
        if settings.api_key.is_empty() {
            return Err(AccountError::Unavailable("account api_key is empty".into()));
        }
        Self::new(&settings.api_url, &settings.api_key, &settings.workspace_id)
    }

    pub fn events_url(&self) -> String {
        format!("{}{EVENTS_PATH}", self.api_url)
    }

    pub fn agent_url(&self, lookup: &AgentLookup) -> String {
        match lookup {
            AgentLookup::Id(id) => format!("{}/api/v1/agents/{id}/", self.api_url),
            AgentLookup::Slug(slug) => format!("{}/api/v1/agents/by-slug/{slug}/", self.api_url),
        }
    }

    fn authorization(&self) -> String {
        format!("Api-Key {}", self.api_key)
    }

    async fn check(response: Response) -> Result<Response, AccountError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AccountError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Account for HttpAccount {
    fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    async fn send_event(&self, sender: &str, event: &Event) -> Result<(), AccountError> {
        debug!(sender, event_type = %event.event_type, "sending event");
        let response = self
            .client
            .post(self.events_url())
            .header("Authorization", self.authorization())
            .header("accept", "application/json")
            .json(&event.payload(&self.workspace_id))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get_agent_by(&self, lookup: &AgentLookup) -> Result<AgentRecord, AccountError> {
        debug!(%lookup, "fetching agent record");
        let response = self
            .client
            .get(self.agent_url(lookup))
            .header("Authorization", self.authorization())
            .header("accept", "application/json")
            .send()
            .await?;
        let record = Self::check(response).await?.json::<AgentRecord>().await?;
        Ok(record)
    }
}
