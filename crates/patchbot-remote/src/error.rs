//! Collector client errors.

use patchbot_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("collector returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Request(err.to_string())
        }
    }
}

impl From<ClientError> for patchbot_core::Error {
    fn from(err: ClientError) -> Self {
        use patchbot_core::Error;
        match err {
            ClientError::Request(_) | ClientError::Api { .. } | ClientError::Parse(_) => {
                Error::Network(err.to_string())
            }
            ClientError::NotFound(what) => Error::NotFound(what),
            ClientError::InvalidUrl(e) => Error::Configuration(e.to_string()),
            ClientError::Io(e) => Error::Io(e),
        }
    }
}

impl From<ClientError> for StoreError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Api { status, message } if (400..500).contains(&status) => {
                StoreError::Rejected(format!("{status}: {message}"))
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
