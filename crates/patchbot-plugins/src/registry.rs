//! Static plugin registry.

use patchbot_core::plugin::Plugin;
use patchbot_core::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::{CommitMessages, DocBuild, GitRevList, PatternCheck, StartupModules};

/// Every built-in plugin, in the order they run.
pub const CANONICAL_ORDER: [&str; 9] = [
    "commit_messages",
    "trailing_whitespace",
    "triple_colon",
    "doctest_continuation",
    "foreign_latex",
    "trac_links",
    "startup_modules",
    "docbuild",
    "git_rev_list",
];

/// Plugins run when the configuration does not say otherwise.
pub const DEFAULT_PLUGINS: [&str; 8] = [
    "commit_messages",
    "doctest_continuation",
    "triple_colon",
    "foreign_latex",
    "trac_links",
    "startup_modules",
    "docbuild",
    "git_rev_list",
];

/// Plugins known to this worker, keyed by name.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn builtin() -> Self {
        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(CommitMessages),
            Arc::new(PatternCheck::trailing_whitespace()),
            Arc::new(PatternCheck::triple_colon()),
            Arc::new(PatternCheck::doctest_continuation()),
            Arc::new(PatternCheck::foreign_latex()),
            Arc::new(PatternCheck::trac_links()),
            Arc::new(StartupModules),
            Arc::new(DocBuild),
            Arc::new(GitRevList),
        ];
        Self { plugins }
    }

    /// A registry of exactly `plugins`.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    fn known(&self, name: &str) -> Result<&'static str> {
        // `plugins.trac_links` is accepted for `trac_links`.
        let short = name.rsplit('.').next().unwrap_or(name);
        self.plugins
            .iter()
            .map(|p| p.name())
            .find(|n| *n == short)
            .ok_or_else(|| Error::Configuration(format!("unknown plugin: {name}")))
    }

    /// The plugins to run: the defaults plus `enabled`, minus `disabled`,
    /// in registry order. `docbuild` is always included unless `plugin_only`.
    pub fn select(&self, enabled: &[String], disabled: &[String], plugin_only: bool) -> Result<Vec<Arc<dyn Plugin>>> {
        let mut chosen: BTreeSet<&'static str> = DEFAULT_PLUGINS.into_iter().collect();
        for name in enabled {
            chosen.insert(self.known(name)?);
        }
        for name in disabled {
            chosen.remove(self.known(name)?);
        }
        if !plugin_only {
            chosen.insert("docbuild");
        }

        let selected: Vec<Arc<dyn Plugin>> = self
            .plugins
            .iter()
            .filter(|p| chosen.contains(p.name()))
            .cloned()
            .collect();
        debug!(plugins = ?selected.iter().map(|p| p.name()).collect::<Vec<_>>(), "Selected plugins");
        Ok(selected)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
