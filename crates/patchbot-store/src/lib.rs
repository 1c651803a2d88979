//! Report history for the patchbot worker.
//!
//! Provides the `ReportStore` trait, the filtering rules that decide which
//! reports are comparable to a ticket's current state, and an in-memory
//! implementation.

pub mod error;
pub mod memory;
pub mod query;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryReportStore;
pub use query::{ReportQuery, current_reports, is_stale_pending, prune_pending};
pub use store::{PruneStats, ReportStore};
