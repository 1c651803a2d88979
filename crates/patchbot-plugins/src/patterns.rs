//! Checks for patterns that new code should not introduce.
//!
//! Only lines added by the ticket (`base..ticket_merged`) are inspected.

use async_trait::async_trait;
use patchbot_core::plugin::{Plugin, PluginContext, PluginResult};
use patchbot_core::{Error, Result};
use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::support::{append_log, capture};

/// Fails when any added line matches one of its patterns.
#[derive(Debug, Clone)]
pub struct PatternCheck {
    name: &'static str,
    patterns: &'static [&'static str],
    message: &'static str,
}

impl PatternCheck {
    pub const fn new(name: &'static str, patterns: &'static [&'static str], message: &'static str) -> Self {
        Self {
            name,
            patterns,
            message,
        }
    }

    pub const fn trailing_whitespace() -> Self {
        Self::new("trailing_whitespace", &[r"\s+$"], "Trailing whitespace")
    }

    pub const fn triple_colon() -> Self {
        Self::new("triple_colon", &[r":\s*::"], "Triple colon (:::)")
    }

    pub const fn doctest_continuation() -> Self {
        Self::new(
            "doctest_continuation",
            &[r"^\s*\.\.\.\s"],
            "Old-style doctest continuation",
        )
    }

    pub const fn foreign_latex() -> Self {
        Self::new(
            "foreign_latex",
            &[
                r"\\choose",
                r"\\over[^l]",
                r"\\atop",
                r"\\above",
                r"\\overwithdelims",
                r"\\atopwithdelims",
                r"\\abovewithdelims",
            ],
            "Foreign commands in LaTeX",
        )
    }

    pub const fn trac_links() -> Self {
        Self::new("trac_links", &[r"[^:]trac:`[0-9]"], "Bad trac link")
    }

    fn compile(&self) -> Result<Vec<Regex>> {
        self.patterns
            .iter()
            .map(|p| added_line_regex(p).map_err(|e| Error::Internal(format!("{}: {e}", self.name))))
            .collect()
    }
}

/// Anchor a pattern to the added lines of a unified diff.
fn added_line_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    match pattern.strip_prefix('^') {
        Some(rest) => Regex::new(&format!(r"^\+{rest}")),
        None => Regex::new(&format!(r"^\+.*{pattern}")),
    }
}

/// Matching added lines, with the file and hunk headers they appeared under.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Offences {
    pub(crate) count: usize,
    pub(crate) excerpt: Vec<String>,
}

pub(crate) fn scan_diff(diff: &str, patterns: &[Regex]) -> Offences {
    let mut offences = Offences::default();
    for bad in patterns {
        let mut file: Option<&str> = None;
        let mut hunk: Option<&str> = None;
        for line in diff.lines() {
            if line.starts_with("---") || line == "+" {
                continue;
            }
            if let Some(path) = line.strip_prefix("+++") {
                file = Some(path.trim());
            } else if line.starts_with("@@ ") {
                hunk = Some(line);
            } else if bad.is_match(line) {
                if let Some(path) = file.take() {
                    offences.excerpt.push(format!("inside file: {path}"));
                }
                if let Some(header) = hunk.take() {
                    offences.excerpt.push(header.to_string());
                }
                offences.excerpt.push(line.to_string());
                offences.count += 1;
            }
        }
    }
    offences
}

#[async_trait]
impl Plugin for PatternCheck {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, ctx: &PluginContext<'_>) -> Result<Option<PluginResult>> {
        let patterns = self.compile()?;
        let diff = capture(ctx, self.name, &format!("git diff {}", ctx.branches.merged_range())).await?;

        let offences = scan_diff(&diff, &patterns);
        let summary = format!("{} inserted on {} non-empty lines", self.message, offences.count);
        debug!(plugin = self.name, count = offences.count, "Scanned diff");

        let mut text = offences.excerpt.join("\n");
        text.push('\n');
        text.push_str(&summary);
        append_log(ctx.log, &text).await?;

        Ok(Some(PluginResult {
            passed: offences.count == 0,
            data: (offences.count > 0).then(|| json!({ "count": offences.count })),
            baseline: None,
        }))
    }
}
