//! Builds the HTML documentation.

use async_trait::async_trait;
use patchbot_core::plugin::{Plugin, PluginContext, PluginResult};
use patchbot_core::Result;

use crate::support::run_logged;

/// `make doc`. Tests only pass on a tree whose documentation builds, so this
/// plugin always runs outside plugin-only mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocBuild;

#[async_trait]
impl Plugin for DocBuild {
    fn name(&self) -> &'static str {
        "docbuild"
    }

    async fn run(&self, ctx: &PluginContext<'_>) -> Result<Option<PluginResult>> {
        run_logged(ctx, self.name(), &format!("{} doc", ctx.make)).await?;
        Ok(None)
    }
}
