//! The hosting server: owns the keypair, the agents and the account handle.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::account::{Account, Event, HttpAccount};
use crate::agent::Agent;
use crate::config::ServerConfig;
use crate::error::{ControlError, Result};
use crate::job_service::{JobFinishedHook, SendJobFinishedEvent};
use crate::vault::{EnvironmentOverlay, ProcessEnvironment, ServerKeys, Vault};

pub const API_VERSION: &str = "v1";

pub struct Server {
    config: ServerConfig,
    id: String,
    vault: Vault,
    public_key_pem: String,
    account: Option<Arc<dyn Account>>,
    agents: Vec<Agent>,
    job_finished: Arc<dyn JobFinishedHook>,
}

pub struct ServerBuilder {
    config: ServerConfig,
    keys: Option<ServerKeys>,
    env: Option<Arc<dyn EnvironmentOverlay>>,
    account: Option<Arc<dyn Account>>,
    agents: Vec<Agent>,
    job_finished: Option<Arc<dyn JobFinishedHook>>,
}

impl ServerBuilder {
    pub fn keys(mut self, keys: ServerKeys) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn env(mut self, env: Arc<dyn EnvironmentOverlay>) -> Self {
        self.env = Some(env);
        self
    }

    /// Use this account instead of the one described by the configuration.
    pub fn account(mut self, account: Arc<dyn Account>) -> Self {
        self.account = Some(account);
        self
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn job_finished_hook(mut self, hook: Arc<dyn JobFinishedHook>) -> Self {
        self.job_finished = Some(hook);
        self
    }

    pub fn build(self) -> Result<Server> {
        self.config.validate()?;

        for (i, agent) in self.agents.iter().enumerate() {
            if self.agents[..i].iter().any(|a| a.name == agent.name) {
                return Err(ControlError::Validation(format!(
                    "Agent {} is registered more than once",
                    agent.name
                )));
            }
        }

        let keys = match (self.keys, &self.config.private_key_path) {
            (Some(keys), _) => keys,
            (None, Some(path)) => ServerKeys::load(path)?,
            (None, None) => {
                info!("no private key configured, generating a new one");
                ServerKeys::generate()?
            }
        };
        let public_key_pem = keys.public_key_pem()?;
        let env = self.env.unwrap_or_else(|| Arc::new(ProcessEnvironment));

        let account = match (self.account, &self.config.account) {
            (Some(account), _) => Some(account),
            (None, Some(settings)) => Some(Arc::new(HttpAccount::from_settings(settings)?) as Arc<dyn Account>),
            (None, None) => None,
        };

        let id = self.config.server_id.clone().unwrap_or_else(|| {
            Uuid::new_v5(&Uuid::NAMESPACE_URL, self.config.public_url().as_bytes()).to_string()
        });

        Ok(Server {
            config: self.config,
            id,
            vault: Vault::new(keys, env),
            public_key_pem,
            account,
            agents: self.agents,
            job_finished: self
                .job_finished
                .unwrap_or_else(|| Arc::new(SendJobFinishedEvent)),
        })
    }
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            keys: None,
            env: None,
            account: None,
            agents: Vec::new(),
            job_finished: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn account(&self) -> Option<&Arc<dyn Account>> {
        self.account.as_ref()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent_by_name(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn agent_by_name_mut(&mut self, name: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.name == name)
    }

    pub fn job_finished_hook(&self) -> &dyn JobFinishedHook {
        self.job_finished.as_ref()
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.vault.encrypt(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        self.vault.decrypt(ciphertext)
    }

    pub fn uri(&self) -> String {
        format!("server:{}", self.id)
    }

    pub fn url(&self) -> String {
        self.config.url()
    }

    pub fn registration_info(&self) -> Value {
        let url = self.url();
        serde_json::json!({
            "url": url,
            "uri": self.uri(),
            "api_version": API_VERSION,
            "environment": self.config.environment,
            "public_key": self.public_key_pem,
            "agents": self.agents.iter().map(Agent::registration_info).collect::<Vec<_>>(),
        })
    }

    /// Announce the server to the account, then refresh every agent from
    /// its account record. Without an account this only warns.
    pub async fn register(&mut self) -> Result<()> {
        let Some(account) = self.account.clone() else {
            warn!("no account configured, skipping server registration");
            return Ok(());
        };
        let event = Event::server_register(self);
        account.send_event(&self.uri(), &event).await?;
        info!(uri = %self.uri(), "server registered");

        for agent in &mut self.agents {
            agent.update_from_server(account.as_ref(), &self.vault).await?;
            info!(agent = %agent.name, "agent updated from account");
        }
        Ok(())
    }
}

#[cfg(test)]
impl Server {
    pub(crate) fn test_builder() -> ServerBuilder {
        Server::builder(ServerConfig::default())
            .keys(crate::vault::test_keys())
            .env(Arc::new(crate::vault::MemoryEnvironment::new()))
    }

    pub(crate) fn for_tests(account: Option<Arc<dyn Account>>, agents: Vec<Agent>) -> Server {
        let mut builder = Server::test_builder();
        if let Some(account) = account {
            builder = builder.account(account);
        }
        for agent in agents {
            builder = builder.agent(agent);
        }
        builder.build().unwrap()
    }
}
