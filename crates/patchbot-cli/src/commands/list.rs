//! Rating table command.

use anyhow::Result;
use patchbot_config::ConfigSource;
use patchbot_scheduler::summary_line;
use tokio::sync::watch;

use super::build_worker;

pub async fn list(source: ConfigSource) -> Result<()> {
    let (_stop, cancel) = watch::channel(false);
    let mut worker = build_worker(source, cancel)?;
    let (config, _) = worker.load_config()?;

    let ranked = worker.rank(&config).await?;
    if ranked.is_empty() {
        println!("No candidate tickets");
    }
    for (rating, ticket) in &ranked {
        println!("{}", summary_line(ticket, rating));
    }
    Ok(())
}
