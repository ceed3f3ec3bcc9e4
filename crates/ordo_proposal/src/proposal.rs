//! Proposal types.
//!
//! A proposal is one namespace mutation pending agreement and execution.
//! Its creation timestamp is stamped once at construction and never moves.

use crate::order::OrderKey;
use bytes::Bytes;
use ordo_core::{Clock, CoreError, CoreResult, ProposalId, Timestamp};
use serde::{Deserialize, Serialize};

/// Operation tag - identifies the kind of mutation, opaque to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpTag(i32);

impl OpTag {
    /// Create from raw value
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for OpTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Proposal lifecycle state
///
/// Discriminants are the wire ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ProposalState {
    /// Submitted for voting, outcome unknown
    InProgress = 0,
    /// Voted yes (or broadcast), not executed yet
    Approved = 1,
    /// Voted no
    Denied = 2,
    /// Queued for execution
    ReadyExecute = 3,
    /// Executor has run it
    Executed = 4,
    /// Just created, not submitted
    Default = 5,
}

impl ProposalState {
    /// Wire ordinal
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        self as u32
    }

    /// Parse a wire ordinal
    #[must_use]
    pub const fn from_ordinal(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::InProgress),
            1 => Some(Self::Approved),
            2 => Some(Self::Denied),
            3 => Some(Self::ReadyExecute),
            4 => Some(Self::Executed),
            5 => Some(Self::Default),
            _ => None,
        }
    }

    /// Position along the lifecycle; Approved and Denied share a step
    const fn rank(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::InProgress => 1,
            Self::Approved | Self::Denied => 2,
            Self::ReadyExecute => 3,
            Self::Executed => 4,
        }
    }

    /// Whether voting has finished for this proposal
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Default | Self::InProgress)
    }

    /// Whether `next` is reachable from `self` without going backwards.
    ///
    /// Re-asserting the current state is allowed. Denied is terminal, and
    /// only approved proposals may be queued for execution.
    #[must_use]
    pub const fn can_advance_to(self, next: ProposalState) -> bool {
        if self as u32 == next as u32 {
            return true;
        }
        match (self, next) {
            (Self::Denied, _) => false,
            (_, Self::Denied) => self.rank() < 2,
            (Self::Default | Self::InProgress, Self::ReadyExecute | Self::Executed) => false,
            _ => self.rank() < next.rank(),
        }
    }
}

impl std::fmt::Display for ProposalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
            Self::ReadyExecute => "READY_EXECUTE",
            Self::Executed => "EXECUTED",
            Self::Default => "DEFAULT",
        };
        f.write_str(name)
    }
}

/// A namespace mutation travelling through voting, ledger and execution
///
/// The proposal carries no result slot. Whatever the executor produces for
/// a local proposal comes back as `Executed::handle` in the coordinator
/// crate, and `Coordinator::submit` returns it to the originating caller
/// as `SubmitOutcome::Committed { result }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    id: ProposalId,
    state: ProposalState,
    created_at: Timestamp,
    is_local: bool,
    op_tag: OpTag,
    payload: Bytes,
}

impl Proposal {
    /// Create a proposal stamped with the clock's current time
    pub fn new(id: ProposalId, op_tag: OpTag, payload: impl Into<Bytes>, clock: &dyn Clock) -> Self {
        Self::with_timestamp(id, op_tag, payload, clock.now())
    }

    /// Create a proposal with an explicit creation timestamp
    pub fn with_timestamp(
        id: ProposalId,
        op_tag: OpTag,
        payload: impl Into<Bytes>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            state: ProposalState::Default,
            created_at,
            is_local: false,
            op_tag,
            payload: payload.into(),
        }
    }

    /// Rebuild a proposal from decoded envelope fields
    pub(crate) fn from_parts(
        id: ProposalId,
        state: ProposalState,
        created_at: Timestamp,
        is_local: bool,
        op_tag: OpTag,
        payload: Bytes,
    ) -> Self {
        Self {
            id,
            state,
            created_at,
            is_local,
            op_tag,
            payload,
        }
    }

    /// Proposal id
    #[must_use]
    pub fn id(&self) -> ProposalId {
        self.id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ProposalState {
        self.state
    }

    /// Creation timestamp
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Whether this rank originated the proposal and runs it as its own
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Operation tag
    #[must_use]
    pub fn op_tag(&self) -> OpTag {
        self.op_tag
    }

    /// Opaque payload
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Key of this proposal in the total order
    #[must_use]
    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.created_at, self.id)
    }

    /// Age at `now`, zero for proposals stamped in the future
    #[must_use]
    pub fn age_at(&self, now: Timestamp) -> u64 {
        now.micros_since(self.created_at)
    }

    /// Move forward along the lifecycle
    ///
    /// # Errors
    ///
    /// Returns error on a backward or disallowed transition
    pub fn advance(&mut self, next: ProposalState) -> CoreResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Mark as this rank's own proposal about to run locally
    pub fn mark_local(&mut self) {
        self.is_local = true;
    }
}
