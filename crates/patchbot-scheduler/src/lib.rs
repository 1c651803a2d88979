//! Scheduling for the patchbot worker.
//!
//! This crate handles:
//! - Rating candidate tickets against their report history
//! - Running one ticket through apply, build, plugins and tests
//! - Building the reports sent to the collector
//! - The worker loop tying ticket selection, runs and reporting together

pub mod rating;
pub mod report;
pub mod run;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use rating::{Rating, RatingContext, RatingEngine, Rejection, summary_line};
pub use report::ReportBuilder;
pub use run::{RunObserver, RunOutcome, RunState, RunStateMachine};
pub use worker::{RunOptions, RunRecord, Worker};
