//! The worker loop command.

use anyhow::Result;
use patchbot_config::ConfigSource;
use patchbot_core::TicketId;
use patchbot_scheduler::RunOptions;
use tokio::sync::watch;
use tracing::{info, warn};

use super::build_worker;

/// Test tickets until the list or count is exhausted, or Ctrl-C.
pub async fn run(source: ConfigSource, tickets: Vec<u64>, count: Option<usize>) -> Result<()> {
    let (stop, cancel) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, stopping after the current step");
                let _ = stop.send(true);
            }
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
        }
    });

    let mut worker = build_worker(source, cancel)?;
    let options = RunOptions {
        tickets: tickets.into_iter().map(TicketId::new).collect(),
        count,
    };
    let records = worker.run(options).await?;

    println!("\n--- Summary ---");
    for record in &records {
        let status = record
            .status
            .map_or_else(|| record.state.to_string(), |s| s.to_string());
        println!("  #{:<6} {}", record.ticket.get(), status);
    }

    let skip = worker.skip_list();
    if !skip.is_empty() {
        println!("\n--- Skipped for now ({}) ---", skip.len());
        for (ticket, until) in skip.iter() {
            match until {
                Some(until) => println!("  #{:<6} until {}", ticket.get(), until.format("%Y-%m-%d %H:%M:%S")),
                None => println!("  #{:<6} indefinitely", ticket.get()),
            }
        }
    }
    Ok(())
}
