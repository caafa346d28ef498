//! Errors raised while talking to the remote account.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    /// The account answered with a non-success HTTP status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// DNS, refused connection, timeout.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The account channel is configured but cannot be used.
    #[error("account unavailable: {0}")]
    Unavailable(String),
}
