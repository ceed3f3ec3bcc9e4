//! ORDO Simulation
//!
//! Runs several ranks of the ordering pipeline in one process: a seeded
//! message bus with per-link jitter, a unanimous-vote backend on top of
//! it, and an in-memory namespace executor. Jitter is reproducible from a
//! seed; thread interleaving and wall-clock timestamps are not.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod bus;
pub mod harness;
pub mod namespace;
pub mod seed;

pub use backend::{BusBackend, delivery_hops};
pub use bus::{Endpoint, Jitter, Message};
pub use harness::{RankReport, SimConfig, SimCoordinator, SimError, SimHarness, SimReport, workload};
pub use namespace::{LogEntry, Namespace, NamespaceExecutor, NamespaceOp, ObjectHandle, ObjectKind};
pub use seed::{SeedSource, SimSeed};
