//! Server configuration loaded from `agent-control.toml`.
//!
//! Missing keys fall back to defaults. `AGENT_CONTROL_*` environment
//! variables take precedence over the file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ControlError, Result};

pub const CONFIG_FILE: &str = "agent-control.toml";

/// Connection to the remote account.
#[derive(Clone, Deserialize, PartialEq)]
pub struct AccountSettings {
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    pub workspace_id: String,
}

impl fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &mask(&self.api_key))
            .field("workspace_id", &self.workspace_id)
            .finish()
    }
}

/// `********` for a set secret, empty otherwise.
pub fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "********" }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    /// Host advertised to the account when `host` is a bind address.
    #[serde(default)]
    pub registration_host: Option<String>,

    /// Stable server identifier; derived from the public URL when unset.
    #[serde(default)]
    pub server_id: Option<String>,

    /// PEM private key. A fresh key is generated when unset.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    #[serde(default)]
    pub account: Option<AccountSettings>,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_environment() -> String {
    "dev".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            registration_host: None,
            server_id: None,
            private_key_path: None,
            account: None,
        }
    }
}

impl ServerConfig {
    /// Load `agent-control.toml` from the working directory, then apply the
    /// process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(Path::new(CONFIG_FILE), |name| std::env::var(name).ok())
    }

    /// Load from `path` (defaults when it does not exist), overriding with
    /// values returned by `env`.
    pub fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ServerConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| env(name).filter(|v| !v.is_empty());

        if let Some(host) = var("AGENT_CONTROL_HOST") {
            self.host = host;
        }
        if let Some(port) = var("AGENT_CONTROL_PORT") {
            self.port = port
                .parse()
                .map_err(|_| ControlError::Config(format!("AGENT_CONTROL_PORT is not a port: {port}")))?;
        }
        if let Some(environment) = var("AGENT_CONTROL_ENVIRONMENT") {
            self.environment = environment;
        }
        if let Some(path) = var("AGENT_CONTROL_PRIVATE_KEY") {
            self.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(key) = var("AGENT_CONTROL_API_KEY")
            && let Some(account) = self.account.as_mut()
        {
            account.api_key = key;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheme.contains("://") {
            return Err(ControlError::Config(format!(
                "Scheme should not include '://': {}",
                self.scheme
            )));
        }
        if self.host.contains("://") {
            return Err(ControlError::Config(format!(
                "Host should not include '://': {}",
                self.host
            )));
        }
        Ok(())
    }

    /// URL the account uses to reach this server.
    pub fn url(&self) -> String {
        let host = self.registration_host.as_deref().unwrap_or(&self.host);
        format!("{}://{}:{}", self.scheme, host, self.port)
    }

    /// URL of the listening socket.
    pub fn public_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn default_config_values() {
        let config = ServerConfig::default();
        assert_eq!(config.scheme, "http");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.environment, "dev");
        assert!(config.account.is_none());
        assert_eq!(config.url(), "http://0.0.0.0:8000");
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            port = 9000
            registration_host = "host.docker.internal"

            [account]
            api_url = "https://account.example.com"
            workspace_id = "ws-1"
        "#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.url(), "http://host.docker.internal:9000");
        assert_eq!(config.public_url(), "http://0.0.0.0:9000");
        let account = config.account.unwrap();
        assert_eq!(account.workspace_id, "ws-1");
        assert!(account.api_key.is_empty());
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_with(&dir.path().join(CONFIG_FILE), no_env).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
            host = "127.0.0.1"
            [account]
            api_url = "https://account.example.com"
            api_key = "from-file"
            workspace_id = "ws-1"
            "#,
        )
        .unwrap();

        let vars: HashMap<&str, &str> = [
            ("AGENT_CONTROL_HOST", "10.0.0.5"),
            ("AGENT_CONTROL_PORT", "8443"),
            ("AGENT_CONTROL_ENVIRONMENT", ""),
            ("AGENT_CONTROL_API_KEY", "from-env"),
        ]
        .into_iter()
        .collect();
        let config =
            ServerConfig::load_with(&path, |name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 8443);
        assert_eq!(config.environment, "dev");
        assert_eq!(config.account.unwrap().api_key, "from-env");
    }

    #[test]
    fn bad_port_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::load_with(&dir.path().join(CONFIG_FILE), |name| {
            (name == "AGENT_CONTROL_PORT").then(|| "eighty".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
    }

    #[test]
    fn scheme_and_host_reject_separators() {
        let config = ServerConfig {
            scheme: "https://".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = ServerConfig {
            host: "http://localhost".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(matches!(
            ServerConfig::load_with(&path, no_env),
            Err(ControlError::Toml(_))
        ));
    }

    #[test]
    fn account_debug_masks_key() {
        let settings = AccountSettings {
            api_url: "u".into(),
            api_key: "sk-secret".into(),
            workspace_id: "w".into(),
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("********"));
    }
}
