//! Variable interpolation for configured commands.
//!
//! Supports variables like:
//! - `${make}` - Make invocation, including the job count
//! - `${sage}` - Path to the `sage` launcher
//! - `${root}` - Root of the checkout the command runs in
//! - `${parallelism}` - Parallelism hint
//! - `${ticket.id}` - Ticket under test
//! - `${env.VAR_NAME}` - Environment variable

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variables available to a command line.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub make: String,
    pub sage: String,
    pub root: String,
    pub parallelism: usize,
    pub ticket_id: String,
    pub env: HashMap<String, String>,
}

static VAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(make|sage|root|parallelism|ticket\.id|env\.[A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

impl CommandContext {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "make" => Some(self.make.clone()),
            "sage" => Some(self.sage.clone()),
            "root" => Some(self.root.clone()),
            "parallelism" => Some(self.parallelism.to_string()),
            "ticket.id" => Some(self.ticket_id.clone()),
            _ => name
                .strip_prefix("env.")
                .and_then(|var| self.env.get(var).cloned()),
        }
    }

    /// Substitute every known variable. Anything else, including shell
    /// `$VAR` syntax and unset `${env.X}`, is left as written.
    pub fn interpolate(&self, command: &str) -> String {
        VAR_REGEX
            .replace_all(command, |caps: &regex::Captures| {
                self.lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

#[derive(Debug, Default)]
pub struct CommandContextBuilder {
    ctx: CommandContext,
}

impl CommandContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_make(mut self, make: impl Into<String>) -> Self {
        self.ctx.make = make.into();
        self
    }

    pub fn with_sage(mut self, sage: impl Into<String>) -> Self {
        self.ctx.sage = sage.into();
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.ctx.root = root.into();
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.ctx.parallelism = parallelism;
        self
    }

    pub fn with_ticket(mut self, id: impl ToString) -> Self {
        self.ctx.ticket_id = id.to_string();
        self
    }

    /// Expose the worker's own environment as `${env.X}`.
    pub fn with_process_env(mut self) -> Self {
        self.ctx.env.extend(std::env::vars());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> CommandContext {
        self.ctx
    }
}
