use thiserror::Error;

use crate::account::AccountError;
use crate::state_machine::{EntityEvent, EntityStatus};

pub type Result<T, E = ControlError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Malformed construction input: bad agent id, invalid custom method key,
    /// unknown parameter name in a remote update, invalid form input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unresolvable method reference or a result that is not a job response.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// The dispatched method body itself failed.
    #[error("Method `{method}` failed: {source}")]
    Execution {
        method: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid transition: event {event} is not allowed from status {from}")]
    Transition {
        from: EntityStatus,
        event: EntityEvent,
    },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Raised by `chat` when the agent exposes no chat method.
    #[error("Invalid value: {0}")]
    Value(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ControlError {
    /// Short classification used in recorded failures and boundary mappings.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::Validation(_) => "ValidationError",
            ControlError::Dispatch(_) => "DispatchError",
            ControlError::Execution { .. } => "ExecutionError",
            ControlError::Transition { .. } => "TransitionError",
            ControlError::NotImplemented(_) => "NotImplemented",
            ControlError::Value(_) => "ValueError",
            ControlError::Crypto(_) => "CryptoError",
            ControlError::Account(_) => "AccountError",
            ControlError::Config(_) => "ConfigError",
            ControlError::Io(_) => "IoError",
            ControlError::Json(_) => "JsonError",
            ControlError::Toml(_) => "TomlError",
        }
    }
}
