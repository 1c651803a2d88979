//! Error types for patchbot.

use thiserror::Error;

use crate::skip::Cooldown;

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("skipped: {reason}")]
    Skip { reason: String, cooldown: Cooldown },

    #[error("merge conflict: {0}")]
    MergeConflict(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failure is treated by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Collector or upstream could not be reached. Retried later, never blamed on the ticket.
    TransientInfrastructure,
    /// The staged change may not be tested in place.
    UnsafeChange,
    /// Merge conflict, build failure, test failure.
    TicketDefect,
    /// The worker itself is misconfigured.
    ConfigurationFault,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Network(_) | Error::Timeout(_) => ErrorClass::TransientInfrastructure,
            Error::Skip { .. } => ErrorClass::UnsafeChange,
            Error::Configuration(_) => ErrorClass::ConfigurationFault,
            Error::MergeConflict(_)
            | Error::CommandFailed(_)
            | Error::InvalidInput(_)
            | Error::NotFound(_)
            | Error::Cancelled
            | Error::Internal(_)
            | Error::Io(_) => ErrorClass::TicketDefect,
        }
    }

    pub fn skip(reason: impl Into<String>, cooldown: Cooldown) -> Self {
        Error::Skip {
            reason: reason.into(),
            cooldown,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
