//! ORDO Proposals
//!
//! The unit of work that every rank must apply in the same order, the
//! total order over proposals, and the fixed-width envelope used when a
//! proposal crosses the voting backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod order;
pub mod proposal;

pub use envelope::{EnvelopeError, HEADER_LEN, WireDecode, WireEncode};
pub use order::{OrderKey, position_of_oldest};
pub use proposal::{OpTag, Proposal, ProposalState};
