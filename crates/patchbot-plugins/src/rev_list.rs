//! Summarises how the ticket branch relates to the baseline.

use async_trait::async_trait;
use patchbot_core::plugin::{Plugin, PluginContext, PluginResult};
use patchbot_core::{Error, Result};

use crate::support::{append_log, capture, run_logged};

/// Logs the commits only in the ticket, only in the baseline, and the
/// ticket's own history since its last version tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRevList;

async fn count(ctx: &PluginContext<'_>, range: &str) -> Result<u64> {
    let out = capture(ctx, "git_rev_list", &format!("git rev-list --count {range}")).await?;
    out.trim()
        .parse()
        .map_err(|_| Error::Internal(format!("rev-list count {:?}", out.trim())))
}

#[async_trait]
impl Plugin for GitRevList {
    fn name(&self) -> &'static str {
        "git_rev_list"
    }

    async fn run(&self, ctx: &PluginContext<'_>) -> Result<Option<PluginResult>> {
        if ctx.ticket.is_baseline() {
            return Ok(None);
        }
        let base = &ctx.branches.base;
        let upstream = &ctx.branches.ticket_upstream;

        let only_in_base = count(ctx, &format!("{upstream}..{base}")).await?;
        let only_in_ticket = count(ctx, &format!("{base}..{upstream}")).await?;
        append_log(
            ctx.log,
            &format!("only in ticket ({only_in_ticket})\nonly in base ({only_in_base})"),
        )
        .await?;

        let described = capture(
            ctx,
            self.name(),
            &format!("git describe --tags --match '[0-9].[0-9]*' {upstream}"),
        )
        .await?;
        let tag = described.trim().split('-').next().unwrap_or_default();
        let range = format!("{tag}..{upstream}");
        for command in ["git diff --stat", "git log --oneline", "git log"] {
            run_logged(ctx, self.name(), &format!("{command} {range}")).await?;
        }
        Ok(None)
    }
}
