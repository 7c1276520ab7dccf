use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("registry returned status {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("token exchange failed: {0}")]
    Auth(String),

    #[error("invalid registry response: {0}")]
    Decode(String),
}
