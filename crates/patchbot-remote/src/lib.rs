//! Client for the patchbot collector.
//!
//! The collector serves the open tickets with their reports, the list of
//! trusted authors, and accepts report submissions as multipart uploads
//! with a bzip2-compressed log.

pub mod client;
pub mod error;
pub mod source;
pub mod store;

pub use client::{PatchbotClient, compress_log};
pub use error::{ClientError, ClientResult};
pub use source::RemoteTicketSource;
pub use store::RemoteReportStore;
