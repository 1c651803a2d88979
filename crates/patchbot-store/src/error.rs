//! Report store errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("report rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for patchbot_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) | StoreError::Rejected(msg) => {
                patchbot_core::Error::Network(msg)
            }
            StoreError::Serialization(e) => patchbot_core::Error::Internal(e.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
