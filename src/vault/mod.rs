//! Encryption gateway for values pushed by the account.
//!
//! The account encrypts with the server's public key; only the server can
//! read the values. Decrypted payloads are never logged.

mod environment;
mod keys;
mod parameter;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ControlError, Result};

pub use environment::{EnvironmentOverlay, MemoryEnvironment, ProcessEnvironment};
pub use keys::{KEY_BITS, ServerKeys};
pub use parameter::{Parameter, ParameterRecord, ParametersSetup};

#[cfg(test)]
pub(crate) use keys::test_keys;

/// Server keys plus the environment that exported parameters are written to.
#[derive(Clone)]
pub struct Vault {
    keys: ServerKeys,
    env: Arc<dyn EnvironmentOverlay>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("keys", &self.keys).finish_non_exhaustive()
    }
}

impl Vault {
    pub fn new(keys: ServerKeys, env: Arc<dyn EnvironmentOverlay>) -> Self {
        Self { keys, env }
    }

    /// Vault writing exported parameters to the process environment.
    pub fn with_process_env(keys: ServerKeys) -> Self {
        Self::new(keys, Arc::new(ProcessEnvironment))
    }

    pub fn keys(&self) -> &ServerKeys {
        &self.keys
    }

    pub fn env(&self) -> &dyn EnvironmentOverlay {
        self.env.as_ref()
    }

    pub fn public_key_pem(&self) -> Result<String> {
        self.keys.public_key_pem()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.keys.encrypt(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        self.keys.decrypt(ciphertext)
    }

    /// Decrypt `[{name, value, is_environment}]` and apply it to `setup`.
    pub fn apply_remote_update(&self, setup: &mut ParametersSetup, encrypted: &str) -> Result<usize> {
        let json = self.keys.decrypt(encrypted)?;
        let applied = setup.update_from_json(&json, self.env.as_ref())?;
        debug!(count = applied, "remote parameter update applied");
        Ok(applied)
    }

    /// Decrypt a JSON object of agent parameters attached to a job request.
    pub fn decrypt_object(&self, encrypted: &str) -> Result<Map<String, Value>> {
        let json = self.keys.decrypt(encrypted)?;
        match serde_json::from_str::<Value>(&json)? {
            Value::Object(map) => {
                debug!(count = map.len(), "agent parameters decrypted");
                Ok(map)
            }
            _ => Err(ControlError::Validation(
                "Decrypted agent parameters are not a JSON object".into(),
            )),
        }
    }
}
