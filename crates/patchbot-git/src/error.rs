//! Git error types.

use patchbot_core::Cooldown;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("merge conflict: {details}")]
    MergeConflict { details: String },

    /// The ticket's branch could not be fetched.
    #[error("failed to fetch {refspec}: {details}")]
    FetchFailed { refspec: String, details: String },

    /// The canonical baseline could not be fetched.
    #[error("upstream {repo} unreachable: {details}")]
    UpstreamUnreachable { repo: String, details: String },

    #[error("unsafe change touching {}", paths.join(", "))]
    UnsafeChange { paths: Vec<String>, cooldown: Cooldown },

    #[error("only {available:.1} GiB free, {required:.1} GiB required")]
    InsufficientSpace { available: f64, required: f64 },

    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("unexpected git output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GitError> for patchbot_core::Error {
    fn from(err: GitError) -> Self {
        use patchbot_core::Error;
        match err {
            GitError::MergeConflict { details } => Error::MergeConflict(details),
            GitError::UpstreamUnreachable { .. } => Error::Network(err.to_string()),
            GitError::UnsafeChange { ref paths, cooldown } => Error::skip(
                format!("unsafe change touching {}", paths.join(", ")),
                cooldown,
            ),
            GitError::InsufficientSpace { .. } | GitError::NotARepository(_) => {
                Error::Configuration(err.to_string())
            }
            GitError::Parse(msg) => Error::Internal(msg),
            GitError::Io(e) => Error::Io(e),
            GitError::CommandFailed { .. } | GitError::FetchFailed { .. } => {
                Error::CommandFailed(err.to_string())
            }
        }
    }
}

pub type GitResult<T> = std::result::Result<T, GitError>;
