//! ORDO Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Ranks, proposal identifiers, microsecond timestamps and the clocks
//! that produce them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{ProposalId, Rank};
pub use time::{Clock, ManualClock, SharedClock, SystemClock, Timestamp};
