//! Checks that every commit of a ticket carries a message.

use async_trait::async_trait;
use patchbot_core::plugin::{Plugin, PluginContext, PluginResult};
use patchbot_core::{Error, Result};

use crate::support::append_log;

/// Inspects the patch files produced by `git format-patch`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitMessages;

/// Lines of a patch file before its first `diff` line, or `None` when it has none.
fn patch_header(patch: &str) -> Option<Vec<&str>> {
    let mut header = Vec::new();
    for line in patch.lines() {
        if line.starts_with("diff ") {
            return Some(header);
        }
        header.push(line);
    }
    None
}

#[async_trait]
impl Plugin for CommitMessages {
    fn name(&self) -> &'static str {
        "commit_messages"
    }

    async fn run(&self, ctx: &PluginContext<'_>) -> Result<Option<PluginResult>> {
        for path in ctx.patches {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            append_log(ctx.log, &format!("Looking at {file_name}")).await?;

            let contents = tokio::fs::read_to_string(path).await?;
            match patch_header(&contents) {
                Some(header) => append_log(ctx.log, &header.join("\n")).await?,
                None => {
                    let start: Vec<&str> = contents.lines().take(10).collect();
                    append_log(ctx.log, &start.join("\n")).await?;
                    return Err(Error::InvalidInput(format!("Not a valid patch file: {file_name}")));
                }
            }
        }
        append_log(ctx.log, "All patches good.").await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::tests::{Harness, ScriptedExecutor};

    const PATCH: &str = "From abc Mon Sep 17 00:00:00 2001\n\
From: J Doe <jdoe@example.org>\n\
Subject: [PATCH] Speed up frobnication\n\
\n\
---\n\
diff --git a/src/sage/frob.py b/src/sage/frob.py\n\
+x = 1\n";

    #[test]
    fn test_patch_header() {
        let header = patch_header(PATCH).unwrap();
        assert_eq!(header.len(), 5);
        assert!(header[2].starts_with("Subject:"));
        assert!(patch_header("no diff here\n").is_none());
    }

    #[tokio::test]
    async fn test_valid_patches() {
        let harness = Harness::new(ScriptedExecutor::new());
        let patch = harness.dir.path().join("0001-Speed-up.patch");
        std::fs::write(&patch, PATCH).unwrap();

        let patches = vec![patch];
        let result = CommitMessages.run(&harness.ctx(&patches, None)).await.unwrap();
        assert!(result.is_none());
        let log = harness.log_text();
        assert!(log.contains("Looking at 0001-Speed-up.patch"));
        assert!(log.contains("All patches good."));
    }

    #[tokio::test]
    async fn test_invalid_patch() {
        let harness = Harness::new(ScriptedExecutor::new());
        let patch = harness.dir.path().join("0001-broken.patch");
        std::fs::write(&patch, "garbage\n").unwrap();

        let patches = vec![patch];
        let err = CommitMessages
            .run(&harness.ctx(&patches, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("0001-broken.patch")));
    }

    #[tokio::test]
    async fn test_no_patches_passes() {
        let harness = Harness::new(ScriptedExecutor::new());
        assert!(CommitMessages.run(&harness.ctx(&[], None)).await.unwrap().is_none());
    }
}
