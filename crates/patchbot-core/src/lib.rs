//! Core domain types and traits for the patchbot worker.
//!
//! This crate contains:
//! - Ticket and report records as exchanged with the collector
//! - Machine identities and baseline version ordering
//! - The skip list used to cool down tickets
//! - Capability traits for ticket sources, staging, process execution and plugins
//! - The error taxonomy shared by every other crate

pub mod error;
pub mod executor;
pub mod id;
pub mod machine;
pub mod plugin;
pub mod report;
pub mod skip;
pub mod source;
pub mod staging;
pub mod ticket;
pub mod version;

pub use error::{Error, ErrorClass, Result};
pub use id::{RunId, TicketId};
pub use machine::MachineIdentity;
pub use report::{GitSnapshot, PendingPhase, PluginOutcome, Report, ReportStatus};
pub use skip::{Cooldown, SkipList};
pub use ticket::{Dependency, Ticket, TicketFingerprint, TicketStatus};
pub use version::BaseVersion;
