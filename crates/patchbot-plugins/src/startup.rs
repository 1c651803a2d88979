//! Counts the Python modules imported when Sage starts.

use async_trait::async_trait;
use patchbot_core::plugin::{Plugin, PluginContext, PluginResult};
use patchbot_core::Result;
use serde_json::{Value, json};
use std::collections::BTreeSet;

use crate::support::{append_log, capture, run_logged};

/// Compares the startup module list against the one recorded for the baseline.
/// Fails when the ticket makes Sage import new modules at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartupModules;

fn parse_modules(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn baseline_modules(baseline: &Value) -> BTreeSet<String> {
    baseline
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Plugin for StartupModules {
    fn name(&self) -> &'static str {
        "startup_modules"
    }

    async fn run(&self, ctx: &PluginContext<'_>) -> Result<Option<PluginResult>> {
        let sage = ctx.sage.display();
        // The first start may differ, e.g. by compiling caches.
        run_logged(ctx, self.name(), &format!("{sage} -c ''")).await?;

        let list = format!(
            r#"{sage} -c "print('\n'.join(sorted(u for u, v in sys.modules.items() if v)))""#
        );
        let modules = parse_modules(&capture(ctx, self.name(), &list).await?);
        append_log(ctx.log, &format!("Total count: {}", modules.len())).await?;

        let (passed, data) = match ctx.baseline {
            None => (true, json!({})),
            Some(baseline) => {
                let before = baseline_modules(baseline);
                let now: BTreeSet<String> = modules.iter().cloned().collect();
                let new: Vec<&String> = now.difference(&before).collect();
                let removed: Vec<&String> = before.difference(&now).collect();

                if !new.is_empty() {
                    let listing: Vec<&str> = new.iter().map(|s| s.as_str()).collect();
                    append_log(ctx.log, &format!("New:\n    {}", listing.join("\n    "))).await?;
                }
                if !removed.is_empty() {
                    let listing: Vec<&str> = removed.iter().map(|s| s.as_str()).collect();
                    append_log(ctx.log, &format!("Removed:\n    {}", listing.join("\n    "))).await?;
                }
                (new.is_empty(), json!({ "new": new, "removed": removed }))
            }
        };
        append_log(ctx.log, &modules.join("\n")).await?;

        Ok(Some(PluginResult::new(passed, Some(data)).with_baseline(json!(modules))))
    }
}
