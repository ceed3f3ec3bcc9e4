//! Voting manager over a pluggable voting backend.
//!
//! The backend decides and disseminates outcomes however it likes; the
//! manager exposes the same handful of non-blocking operations for every
//! backend and keeps the proposal lifecycle in step with them.

use bytes::Bytes;
use ordo_core::{ProposalId, Rank};
use ordo_proposal::{EnvelopeError, Proposal, ProposalState, WireDecode, WireEncode};
use serde::{Deserialize, Serialize};

/// Resolution state reported by a backend for this rank's proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteStatus {
    /// Votes still outstanding
    InProgress,
    /// Everybody voted yes
    Approved,
    /// At least one rank voted no
    Denied,
    /// Backend has no record of the proposal
    Unknown,
}

impl VoteStatus {
    /// Lifecycle state corresponding to this status
    #[must_use]
    pub const fn as_state(self) -> ProposalState {
        match self {
            Self::InProgress => ProposalState::InProgress,
            Self::Approved => ProposalState::Approved,
            Self::Denied => ProposalState::Denied,
            Self::Unknown => ProposalState::Default,
        }
    }
}

/// Voting errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VotingError {
    /// Transport failure inside the backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend surfaced bytes that are not a proposal envelope
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] EnvelopeError),

    /// A previous proposal of this rank is still being voted on
    #[error("Proposal {0} still outstanding")]
    Busy(ProposalId),

    /// Backend already shut down
    #[error("Voting backend finalized")]
    Finalized,
}

/// Pluggable voting capability
///
/// Construction of an implementation plays the role of `init`: it takes the
/// judge, the application state the judge needs, and backend-specific
/// configuration. Every method is non-blocking.
pub trait VotingBackend {
    /// Advance internal network and agreement state by one step
    ///
    /// # Errors
    ///
    /// Returns error on transport failure
    fn make_progress(&mut self) -> Result<(), VotingError>;

    /// Start agreement on this rank's proposal
    ///
    /// # Errors
    ///
    /// Returns error if the proposal cannot be disseminated
    fn submit_for_voting(&mut self, id: ProposalId, envelope: Bytes) -> Result<(), VotingError>;

    /// Disseminate this rank's proposal without agreement
    ///
    /// # Errors
    ///
    /// Returns error if the proposal cannot be disseminated
    fn submit_broadcast(&mut self, id: ProposalId, envelope: Bytes) -> Result<(), VotingError>;

    /// Resolution state of this rank's proposal
    ///
    /// # Errors
    ///
    /// Returns error on transport failure
    fn check_state(&mut self, id: ProposalId) -> Result<VoteStatus, VotingError>;

    /// Pop the next newly approved proposal from another rank
    ///
    /// # Errors
    ///
    /// Returns error on transport failure
    fn checkout_approved(&mut self) -> Result<Option<Bytes>, VotingError>;

    /// Release bookkeeping for this rank's resolved proposal
    ///
    /// # Errors
    ///
    /// Returns error on transport failure
    fn remove_my_proposal(&mut self) -> Result<(), VotingError>;

    /// Shut the backend down
    ///
    /// # Errors
    ///
    /// Returns error if shutdown fails
    fn finalize(&mut self) -> Result<(), VotingError>;
}

/// Uniform front for a voting backend
pub struct VotingManager<B> {
    rank: Rank,
    backend: B,
}

impl<B: VotingBackend> VotingManager<B> {
    /// Wrap an initialized backend
    #[must_use]
    pub fn new(rank: Rank, backend: B) -> Self {
        Self { rank, backend }
    }

    /// Mark the proposal in progress and hand it to the backend
    ///
    /// # Errors
    ///
    /// Returns error if the proposal is past voting or the backend fails
    pub fn submit_for_voting(&mut self, proposal: &mut Proposal) -> Result<(), VotingError> {
        advance_or_busy(proposal, ProposalState::InProgress)?;
        tracing::debug!(rank = %self.rank, id = %proposal.id(), "submitting for voting");
        self.backend.submit_for_voting(proposal.id(), proposal.encode())
    }

    /// Mark the proposal approved and broadcast it
    ///
    /// # Errors
    ///
    /// Returns error if the proposal is past approval or the backend fails
    pub fn submit_broadcast(&mut self, proposal: &mut Proposal) -> Result<(), VotingError> {
        advance_or_busy(proposal, ProposalState::Approved)?;
        tracing::debug!(rank = %self.rank, id = %proposal.id(), "broadcasting");
        self.backend.submit_broadcast(proposal.id(), proposal.encode())
    }

    /// Drive one progress step, then report the proposal's resolution
    ///
    /// # Errors
    ///
    /// Returns error on backend failure
    pub fn check_my_proposal_state(&mut self, id: ProposalId) -> Result<VoteStatus, VotingError> {
        self.backend.make_progress()?;
        self.backend.check_state(id)
    }

    /// Pop the next approved proposal surfaced by the backend
    ///
    /// # Errors
    ///
    /// Returns error on backend failure or a malformed envelope
    pub fn checkout_approved(&mut self) -> Result<Option<Proposal>, VotingError> {
        let Some(envelope) = self.backend.checkout_approved()? else {
            return Ok(None);
        };
        let proposal = Proposal::decode(&envelope)?;
        tracing::debug!(
            rank = %self.rank,
            id = %proposal.id(),
            created_at = proposal.created_at().as_micros(),
            "checked out approved proposal"
        );
        Ok(Some(proposal))
    }

    /// Release backend bookkeeping for the resolved local proposal
    ///
    /// # Errors
    ///
    /// Returns error on backend failure
    pub fn remove_my_proposal(&mut self) -> Result<(), VotingError> {
        self.backend.remove_my_proposal()
    }

    /// Advance the backend by one step
    ///
    /// # Errors
    ///
    /// Returns error on backend failure
    pub fn make_progress(&mut self) -> Result<(), VotingError> {
        self.backend.make_progress()
    }

    /// Shut down the backend
    ///
    /// # Errors
    ///
    /// Returns error if shutdown fails
    pub fn finalize(&mut self) -> Result<(), VotingError> {
        tracing::debug!(rank = %self.rank, "finalizing voting backend");
        self.backend.finalize()
    }

    /// Borrow the backend
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutably borrow the backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

fn advance_or_busy(proposal: &mut Proposal, next: ProposalState) -> Result<(), VotingError> {
    if proposal.state() != ProposalState::Default {
        return Err(VotingError::Busy(proposal.id()));
    }
    proposal
        .advance(next)
        .map_err(|_| VotingError::Busy(proposal.id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_core::Timestamp;
    use ordo_proposal::OpTag;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct RecordingBackend {
        progress_calls: usize,
        submitted: Vec<(ProposalId, Bytes)>,
        broadcast: Vec<(ProposalId, Bytes)>,
        approved: VecDeque<Bytes>,
        status: Option<VoteStatus>,
        removed: usize,
    }

    impl VotingBackend for RecordingBackend {
        fn make_progress(&mut self) -> Result<(), VotingError> {
            self.progress_calls += 1;
            Ok(())
        }

        fn submit_for_voting(&mut self, id: ProposalId, envelope: Bytes) -> Result<(), VotingError> {
            self.submitted.push((id, envelope));
            Ok(())
        }

        fn submit_broadcast(&mut self, id: ProposalId, envelope: Bytes) -> Result<(), VotingError> {
            self.broadcast.push((id, envelope));
            Ok(())
        }

        fn check_state(&mut self, _id: ProposalId) -> Result<VoteStatus, VotingError> {
            Ok(self.status.unwrap_or(VoteStatus::Unknown))
        }

        fn checkout_approved(&mut self) -> Result<Option<Bytes>, VotingError> {
            Ok(self.approved.pop_front())
        }

        fn remove_my_proposal(&mut self) -> Result<(), VotingError> {
            self.removed += 1;
            Ok(())
        }

        fn finalize(&mut self) -> Result<(), VotingError> {
            Ok(())
        }
    }

    fn proposal() -> Proposal {
        Proposal::with_timestamp(
            ProposalId::from_raw(4),
            OpTag::new(1),
            b"x".to_vec(),
            Timestamp::from_micros(10),
        )
    }

    #[test]
    fn test_submit_marks_in_progress() {
        let mut vm = VotingManager::new(Rank::new(0), RecordingBackend::default());
        let mut p = proposal();
        vm.submit_for_voting(&mut p).unwrap();

        assert_eq!(p.state(), ProposalState::InProgress);
        let (id, envelope) = &vm.backend().submitted[0];
        assert_eq!(*id, p.id());
        assert_eq!(Proposal::decode(envelope).unwrap().state(), ProposalState::InProgress);
    }

    #[test]
    fn test_broadcast_marks_approved() {
        let mut vm = VotingManager::new(Rank::new(0), RecordingBackend::default());
        let mut p = proposal();
        vm.submit_broadcast(&mut p).unwrap();
        assert_eq!(p.state(), ProposalState::Approved);
        assert_eq!(vm.backend().broadcast.len(), 1);
    }

    #[test]
    fn test_resubmit_is_busy() {
        let mut vm = VotingManager::new(Rank::new(0), RecordingBackend::default());
        let mut p = proposal();
        vm.submit_for_voting(&mut p).unwrap();
        assert_eq!(vm.submit_for_voting(&mut p), Err(VotingError::Busy(p.id())));
    }

    #[test]
    fn test_check_state_drives_progress() {
        let mut vm = VotingManager::new(Rank::new(0), RecordingBackend::default());
        vm.backend_mut().status = Some(VoteStatus::Approved);
        let status = vm.check_my_proposal_state(ProposalId::from_raw(4)).unwrap();
        assert_eq!(status, VoteStatus::Approved);
        assert_eq!(vm.backend().progress_calls, 1);
    }

    #[test]
    fn test_checkout_decodes() {
        let mut vm = VotingManager::new(Rank::new(0), RecordingBackend::default());
        let p = proposal();
        vm.backend_mut().approved.push_back(p.encode());

        assert_eq!(vm.checkout_approved().unwrap(), Some(p));
        assert_eq!(vm.checkout_approved().unwrap(), None);
    }

    #[test]
    fn test_checkout_malformed() {
        let mut vm = VotingManager::new(Rank::new(0), RecordingBackend::default());
        vm.backend_mut().approved.push_back(Bytes::from_static(b"bad"));
        assert!(matches!(vm.checkout_approved(), Err(VotingError::Malformed(_))));
    }

    #[test]
    fn test_status_state_mapping() {
        assert_eq!(VoteStatus::InProgress.as_state(), ProposalState::InProgress);
        assert_eq!(VoteStatus::Denied.as_state(), ProposalState::Denied);
        assert_eq!(VoteStatus::Unknown.as_state(), ProposalState::Default);
    }
}
