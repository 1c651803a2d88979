//! KDL configuration parsing for the patchbot worker.
//!
//! This crate handles parsing of:
//! - The worker configuration file (patchbot.kdl)
//! - Command-line overrides
//! - Time-of-day windows
//! - Command interpolation

pub mod error;
pub mod variables;
pub mod window;
pub mod worker;

pub use error::{ConfigError, ConfigResult};
pub use variables::{CommandContext, CommandContextBuilder};
pub use window::TimeWindow;
pub use worker::{
    BonusTable, Commands, ConfigOverrides, ConfigSource, PluginSelection, WorkerConfig,
    parse_worker_config,
};
