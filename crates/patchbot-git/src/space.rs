//! Free disk space guard.

use nix::sys::statvfs::statvfs;
use std::path::Path;

use crate::{GitError, GitResult};

const GIB: f64 = (1u64 << 30) as f64;

/// Space available to unprivileged users on the filesystem holding `path`, in GiB.
pub fn free_gib(path: &Path) -> GitResult<f64> {
    let stats = statvfs(path).map_err(|e| GitError::Io(std::io::Error::from(e)))?;
    let free = stats.blocks_available() as u64 * stats.fragment_size() as u64;
    Ok(free as f64 / GIB)
}

/// Fail unless at least `required` GiB are free under `path`.
pub fn ensure_free_space(path: &Path, required: f64) -> GitResult<()> {
    let available = free_gib(path)?;
    if available < required {
        return Err(GitError::InsufficientSpace {
            available,
            required,
        });
    }
    Ok(())
}
