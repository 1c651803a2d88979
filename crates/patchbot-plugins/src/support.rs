//! Helpers shared by the built-in plugins.

use patchbot_core::executor::JobSpec;
use patchbot_core::plugin::PluginContext;
use patchbot_core::{Error, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Run `command` in the workspace and return its stdout.
pub(crate) async fn capture(ctx: &PluginContext<'_>, name: &str, command: &str) -> Result<String> {
    let result = ctx
        .executor
        .run(JobSpec::new(name, command, ctx.workspace))
        .await?;
    if result.succeeded() {
        Ok(result.stdout)
    } else {
        Err(Error::CommandFailed(format!(
            "{command}: {:?}: {}",
            result.status,
            result.stderr.trim()
        )))
    }
}

/// Run `command` in the workspace with its output appended to the ticket log.
pub(crate) async fn run_logged(ctx: &PluginContext<'_>, name: &str, command: &str) -> Result<()> {
    let result = ctx
        .executor
        .run(JobSpec::new(name, command, ctx.workspace).with_log_file(ctx.log))
        .await?;
    if result.succeeded() {
        Ok(())
    } else {
        Err(Error::CommandFailed(format!("{command}: {:?}", result.status)))
    }
}

/// Append `text` to a ticket log, ending it with a newline.
pub async fn append_log(log: &Path, text: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .await?;
    file.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        file.write_all(b"\n").await?;
    }
    Ok(())
}
