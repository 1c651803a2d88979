//! Git staging for the patchbot worker.
//!
//! This crate provides:
//! - An async `git` command runner with pinned commit identity
//! - The `StagingPipeline`, which owns the four staging branches
//! - The safety classifier deciding whether a change may be built in place
//! - Isolated clones for changes that may not

pub mod command;
pub mod error;
pub mod pipeline;
pub mod safety;
pub mod space;

pub use command::Git;
pub use error::{GitError, GitResult};
pub use pipeline::{CLONE_PREFIX, StagingPipeline};
pub use safety::{SafetyVerdict, classify};
