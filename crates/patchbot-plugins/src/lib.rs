//! Built-in plugins for the patchbot worker.
//!
//! Plugins are looked up by name in a static [`PluginRegistry`]; the
//! configuration only selects which of them run.

pub mod commits;
pub mod docbuild;
pub mod patterns;
pub mod registry;
pub mod rev_list;
pub mod startup;
mod support;

pub use commits::CommitMessages;
pub use docbuild::DocBuild;
pub use patterns::PatternCheck;
pub use registry::{CANONICAL_ORDER, DEFAULT_PLUGINS, PluginRegistry};
pub use rev_list::GitRevList;
pub use startup::StartupModules;
pub use support::append_log;

pub use patchbot_core::plugin::{Plugin, PluginContext, PluginResult};
