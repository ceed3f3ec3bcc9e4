//! Per-rank coordinator.
//!
//! Owns the voting, ledger and execution managers for one open namespace
//! and drives a single proposal at a time through them. [`Coordinator::submit`]
//! blocks the calling thread until the proposal is executed or denied;
//! every wait is a polling loop that pauses on the configured
//! [`PollStrategy`](crate::PollStrategy) between iterations.
//!
//! A backend that never resolves a submitted proposal makes `submit` wait
//! forever. In voted mode the ledger drain also waits for every absorbed
//! proposal to age out, so constant traffic from other ranks delays return.

use crate::config::{CoordinatorConfig, Mode};
use crate::execution::{Executed, ExecutionError, ExecutionManager, Executor, ExecutorError};
use crate::ledger::LedgerManager;
use crate::voting::{VoteStatus, VotingBackend, VotingError, VotingManager};
use ordo_core::{CoreError, ProposalId, Rank, SharedClock};
use ordo_proposal::{OrderKey, Proposal, ProposalState};
use serde::{Deserialize, Serialize};

/// Coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    Config(CoreError),

    /// Voting backend failure, propagated without retry
    #[error(transparent)]
    Voting(#[from] VotingError),

    /// Executor failure
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Backend does not know this rank's proposal
    #[error("Voting backend has no record of proposal {0}")]
    UnknownProposal(ProposalId),

    /// Internal invariant broken; the current operation is aborted
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitOutcome<H> {
    /// Agreed on and executed locally
    Committed {
        /// Executor handle for the proposal
        result: Option<H>,
    },
    /// Voted down by at least one rank
    Denied,
}

impl<H> SubmitOutcome<H> {
    /// Whether the proposal was executed
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// Executor handle, if committed with one
    pub fn into_result(self) -> Option<H> {
        match self {
            Self::Committed { result } => result,
            Self::Denied => None,
        }
    }
}

/// Proposal ordering coordinator for one rank
pub struct Coordinator<B, E> {
    config: CoordinatorConfig,
    clock: SharedClock,
    voting: VotingManager<B>,
    ledger: LedgerManager,
    execution: ExecutionManager<E>,
}

impl<B: VotingBackend, E: Executor> Coordinator<B, E> {
    /// Create a coordinator over an initialized backend
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(
        config: CoordinatorConfig,
        backend: B,
        executor: E,
        clock: SharedClock,
    ) -> Result<Self, CoordinatorError> {
        config.validate().map_err(CoordinatorError::Config)?;
        let rank = config.rank;

        tracing::info!(
            rank = %rank,
            mode = %config.mode,
            world_size = config.world_size,
            time_window_us = config.time_window_us,
            "coordinator open"
        );

        Ok(Self {
            voting: VotingManager::new(rank, backend),
            ledger: LedgerManager::new(rank),
            execution: ExecutionManager::new(rank, executor),
            config,
            clock,
        })
    }

    /// Submit a proposal in the configured mode and wait for its fate
    ///
    /// # Errors
    ///
    /// Returns error on backend, executor or invariant failure. Denial is
    /// reported as [`SubmitOutcome::Denied`].
    pub fn submit(&mut self, proposal: Proposal) -> Result<SubmitOutcome<E::Handle>, CoordinatorError> {
        match self.config.mode {
            Mode::Voted => self.submit_voted(proposal),
            Mode::Broadcast => self.submit_broadcast(proposal),
        }
    }

    /// Vote on the proposal, age it, then execute everything that aged
    ///
    /// # Errors
    ///
    /// Returns error on backend, executor or invariant failure
    pub fn submit_voted(
        &mut self,
        mut proposal: Proposal,
    ) -> Result<SubmitOutcome<E::Handle>, CoordinatorError> {
        let id = proposal.id();
        self.voting.submit_for_voting(&mut proposal)?;

        let status = self.wait_for_resolution(id)?;
        if status == VoteStatus::Denied {
            self.advance(&mut proposal, ProposalState::Denied)?;
            self.voting.remove_my_proposal()?;
            tracing::warn!(
                rank = %self.rank(),
                id = %id,
                created_at = proposal.created_at().as_micros(),
                "proposal denied"
            );
            return Ok(SubmitOutcome::Denied);
        }

        self.advance(&mut proposal, ProposalState::Approved)?;
        proposal.mark_local();
        let key = proposal.order_key();
        self.ledger.add(proposal);

        self.wait_for_window(key)?;
        self.drain_ledger()?;
        let executed = self.execute_all()?;
        let result = self.take_local_result(key, executed)?;

        let status = self.voting.check_my_proposal_state(id)?;
        if status != VoteStatus::Approved {
            return Err(self.invariant(format!(
                "proposal {} executed but backend now reports {:?}",
                id, status
            )));
        }
        self.voting.remove_my_proposal()?;

        tracing::debug!(rank = %self.rank(), id = %id, "proposal committed");
        Ok(SubmitOutcome::Committed { result })
    }

    /// Broadcast the proposal and execute the round once every rank's
    /// proposal has arrived
    ///
    /// # Errors
    ///
    /// Returns error on backend, executor or invariant failure
    pub fn submit_broadcast(
        &mut self,
        mut proposal: Proposal,
    ) -> Result<SubmitOutcome<E::Handle>, CoordinatorError> {
        self.voting.submit_broadcast(&mut proposal)?;
        proposal.mark_local();
        let key = proposal.order_key();
        self.ledger.add(proposal);

        while self.ledger.distinct_ids() < self.config.world_size {
            self.config.poll.pause();
            self.voting.make_progress()?;
            self.absorb_approved()?;
        }

        let round = self.ledger.take_round();
        if round.len() != self.config.world_size {
            tracing::warn!(
                rank = %self.rank(),
                round = round.len(),
                world_size = self.config.world_size,
                "broadcast round overshoots world size"
            );
        }
        for entry in round {
            self.queue_for_execution(entry)?;
        }
        let executed = self.execute_all()?;
        let result = self.take_local_result(key, executed)?;

        tracing::info!(
            rank = %self.rank(),
            id = %key.id,
            carried_over = self.ledger.count(),
            "broadcast round complete"
        );
        Ok(SubmitOutcome::Committed { result })
    }

    /// One non-blocking periodic progress step
    ///
    /// Voted mode moves every aged ledger entry to execution and runs it.
    /// Broadcast mode only absorbs arrivals; rounds execute inside
    /// [`submit_broadcast`](Self::submit_broadcast).
    ///
    /// Returns the number of proposals executed.
    ///
    /// # Errors
    ///
    /// Returns error on backend, executor or invariant failure
    pub fn make_progress(&mut self) -> Result<usize, CoordinatorError> {
        match self.config.mode {
            Mode::Voted => {
                self.drain_pass()?;
                Ok(self.execute_all()?.len())
            }
            Mode::Broadcast => {
                self.voting.make_progress()?;
                self.absorb_approved()?;
                Ok(0)
            }
        }
    }

    /// Finalize the backend and hand back the executor
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails to finalize
    pub fn close(mut self) -> Result<E, CoordinatorError> {
        if !self.ledger.is_empty() || !self.execution.is_empty() {
            tracing::warn!(
                rank = %self.rank(),
                ledger = self.ledger.count(),
                pending = self.execution.len(),
                "closing with unexecuted proposals"
            );
        }
        self.voting.finalize()?;
        tracing::info!(rank = %self.rank(), "coordinator closed");
        Ok(self.execution.into_executor())
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Proposals waiting in the ledger
    #[must_use]
    pub fn ledger_len(&self) -> usize {
        self.ledger.count()
    }

    /// Proposals queued for execution
    #[must_use]
    pub fn pending_execution(&self) -> usize {
        self.execution.len()
    }

    /// Borrow the executor
    #[must_use]
    pub fn executor(&self) -> &E {
        self.execution.executor()
    }

    /// Mutably borrow the executor
    pub fn executor_mut(&mut self) -> &mut E {
        self.execution.executor_mut()
    }

    fn rank(&self) -> Rank {
        self.config.rank
    }

    fn wait_for_resolution(&mut self, id: ProposalId) -> Result<VoteStatus, CoordinatorError> {
        loop {
            let status = self.voting.check_my_proposal_state(id)?;
            self.absorb_approved()?;
            match status {
                VoteStatus::InProgress => self.config.poll.pause(),
                VoteStatus::Approved | VoteStatus::Denied => return Ok(status),
                VoteStatus::Unknown => {
                    tracing::error!(rank = %self.rank(), id = %id, "backend lost proposal");
                    return Err(CoordinatorError::UnknownProposal(id));
                }
            }
        }
    }

    fn wait_for_window(&mut self, key: OrderKey) -> Result<(), CoordinatorError> {
        let window = self.config.time_window_us;
        while self.clock.now().micros_since(key.created_at) < window {
            self.voting.make_progress()?;
            self.absorb_approved()?;
            self.config.poll.pause();
        }
        Ok(())
    }

    /// Move checked-out proposals into the ledger
    fn absorb_approved(&mut self) -> Result<usize, CoordinatorError> {
        let mut absorbed = 0;
        while let Some(mut proposal) = self.voting.checkout_approved()? {
            self.advance(&mut proposal, ProposalState::Approved)?;
            self.ledger.add(proposal);
            absorbed += 1;
        }
        Ok(absorbed)
    }

    /// Progress, absorb, then move every aged entry to execution
    fn drain_pass(&mut self) -> Result<usize, CoordinatorError> {
        self.voting.make_progress()?;
        self.absorb_approved()?;

        let window = self.config.time_window_us;
        let now = self.clock.now();
        let mut moved = 0;
        while self.ledger.oldest().is_some_and(|p| p.age_at(now) >= window) {
            let Some(proposal) = self.ledger.pop_oldest() else {
                break;
            };
            self.queue_for_execution(proposal)?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Repeat drain passes until the ledger is empty
    fn drain_ledger(&mut self) -> Result<(), CoordinatorError> {
        loop {
            self.drain_pass()?;
            if self.ledger.is_empty() {
                return Ok(());
            }
            self.config.poll.pause();
        }
    }

    fn queue_for_execution(&mut self, proposal: Proposal) -> Result<(), CoordinatorError> {
        let id = proposal.id();
        self.execution
            .add(proposal)
            .map_err(|err| self.invariant(format!("cannot queue {}: {}", id, err)))
    }

    fn execute_all(&mut self) -> Result<Vec<Executed<E::Handle>>, CoordinatorError> {
        self.execution.execute_all().map_err(|err| match err {
            ExecutionError::Executor(err) => CoordinatorError::Executor(err),
            ExecutionError::Lifecycle(err) => self.invariant(format!("cannot mark executed: {}", err)),
        })
    }

    fn take_local_result(
        &self,
        key: OrderKey,
        executed: Vec<Executed<E::Handle>>,
    ) -> Result<Option<E::Handle>, CoordinatorError> {
        executed
            .into_iter()
            .find(|record| record.is_local && record.key == key)
            .map(|record| record.handle)
            .ok_or_else(|| self.invariant(format!("local proposal {} was not executed", key)))
    }

    fn advance(&self, proposal: &mut Proposal, next: ProposalState) -> Result<(), CoordinatorError> {
        proposal
            .advance(next)
            .map_err(|err| self.invariant(format!("proposal {}: {}", proposal.id(), err)))
    }

    fn invariant(&self, message: String) -> CoordinatorError {
        tracing::error!(rank = %self.rank(), %message, "invariant violated");
        CoordinatorError::Invariant(message)
    }
}
