//! CLI command implementations.

pub mod list;
pub mod run;

use anyhow::{Context, Result};
use patchbot_config::ConfigSource;
use patchbot_executor::LocalExecutor;
use patchbot_git::StagingPipeline;
use patchbot_plugins::PluginRegistry;
use patchbot_remote::{PatchbotClient, RemoteReportStore, RemoteTicketSource};
use patchbot_scheduler::Worker;
use std::sync::Arc;
use tokio::sync::watch;

/// A worker talking to the configured collector and testing in `sage-root`.
pub(crate) fn build_worker(source: ConfigSource, cancel: watch::Receiver<bool>) -> Result<Worker> {
    let config = source.load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let client = Arc::new(
        PatchbotClient::new(&config.server)
            .with_context(|| format!("Invalid server URL: {}", config.server))?,
    );
    Ok(Worker::new(
        Arc::new(RemoteTicketSource::new(client.clone())),
        Arc::new(RemoteReportStore::new(client)),
        Arc::new(StagingPipeline::new(&config.sage_root)),
        Arc::new(LocalExecutor::new()),
        source,
        cancel,
    ))
}

pub fn show_config(source: &ConfigSource) -> Result<()> {
    let config = source.load().context("Failed to load configuration")?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub fn validate(source: &ConfigSource) -> Result<()> {
    let checked = source
        .load()
        .map_err(anyhow::Error::from)
        .and_then(|config| {
            config.validate()?;
            PluginRegistry::builtin().select(
                &config.plugins.enabled,
                &config.plugins.disabled,
                config.plugin_only,
            )?;
            Ok(())
        });
    match checked {
        Ok(()) => {
            println!("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
