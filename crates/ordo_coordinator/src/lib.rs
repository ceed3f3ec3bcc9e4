//! ORDO Coordinator
//!
//! Drives proposals through a pluggable voting backend, ages them in a
//! time-windowed ledger, and executes them in one global order.
//! Single-threaded and cooperative: all progress happens inside the
//! caller's polling loops.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod execution;
pub mod judge;
pub mod ledger;
pub mod voting;

pub use config::{CoordinatorConfig, Mode, PollStrategy};
pub use coordinator::{Coordinator, CoordinatorError, SubmitOutcome};
pub use execution::{Executed, ExecutionError, ExecutionManager, Executor, ExecutorError};
pub use judge::{Judge, StalenessJudge, Verdict};
pub use ledger::LedgerManager;
pub use voting::{VoteStatus, VotingBackend, VotingError, VotingManager};
