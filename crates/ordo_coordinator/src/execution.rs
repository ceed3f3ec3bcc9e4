//! Execution queue.
//!
//! Proposals that have aged out of the ledger (or completed a broadcast
//! round) run through the application's executor in the same total order
//! on every rank.

use ordo_core::{CoreError, CoreResult, Rank};
use ordo_proposal::{OpTag, OrderKey, Proposal, ProposalState, position_of_oldest};
use serde::{Deserialize, Serialize};

/// Executor errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Operation tag the executor does not implement
    #[error("Unknown operation tag: {0}")]
    UnknownOp(OpTag),

    /// Payload does not decode as the tagged operation
    #[error("Invalid payload for {tag}: {reason}")]
    InvalidPayload {
        /// Operation tag
        tag: OpTag,
        /// Decode failure
        reason: String,
    },

    /// The mutation itself failed
    #[error("Execution failed: {0}")]
    Failed(String),
}

/// Execution queue errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// The executor failed the proposal
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// A queued proposal could not be marked executed
    #[error("Lifecycle: {0}")]
    Lifecycle(#[from] CoreError),
}

/// Application callback that performs the mutation a proposal carries
///
/// Invoked synchronously, exactly once per proposal, in the agreed order.
pub trait Executor {
    /// Handle handed back to the originating rank
    type Handle;

    /// Apply the proposal
    ///
    /// Returns a handle only for local proposals.
    ///
    /// # Errors
    ///
    /// Returns error if the operation is unknown or fails
    fn execute(&mut self, proposal: &Proposal) -> Result<Option<Self::Handle>, ExecutorError>;
}

/// Record of one executed proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executed<H> {
    /// Position in the total order
    pub key: OrderKey,
    /// Operation tag
    pub op_tag: OpTag,
    /// Whether this rank originated it
    pub is_local: bool,
    /// Executor result for local proposals
    pub handle: Option<H>,
}

/// Execution manager
pub struct ExecutionManager<E> {
    rank: Rank,
    queue: Vec<Proposal>,
    executor: E,
}

impl<E: Executor> ExecutionManager<E> {
    /// Create a new execution manager
    #[must_use]
    pub fn new(rank: Rank, executor: E) -> Self {
        Self {
            rank,
            queue: Vec::new(),
            executor,
        }
    }

    /// Queue an approved proposal
    ///
    /// # Errors
    ///
    /// Returns error if the proposal was never approved
    pub fn add(&mut self, mut proposal: Proposal) -> CoreResult<()> {
        proposal.advance(ProposalState::ReadyExecute)?;
        tracing::debug!(
            rank = %self.rank,
            id = %proposal.id(),
            created_at = proposal.created_at().as_micros(),
            "ready to execute"
        );
        self.queue.push(proposal);
        Ok(())
    }

    /// Run the minimum queued proposal, `None` if the queue is empty
    ///
    /// The proposal leaves the queue whether or not the executor succeeds.
    ///
    /// # Errors
    ///
    /// Returns the executor's error, or a lifecycle error if the proposal
    /// was not ready to execute
    pub fn execute_one(&mut self) -> Result<Option<Executed<E::Handle>>, ExecutionError> {
        let Some(index) = position_of_oldest(&self.queue) else {
            return Ok(None);
        };
        let mut proposal = self.queue.swap_remove(index);

        let handle = self.executor.execute(&proposal).inspect_err(|err| {
            tracing::error!(
                rank = %self.rank,
                id = %proposal.id(),
                op = %proposal.op_tag(),
                error = %err,
                "executor failed"
            );
        })?;
        proposal.advance(ProposalState::Executed)?;

        tracing::debug!(
            rank = %self.rank,
            id = %proposal.id(),
            created_at = proposal.created_at().as_micros(),
            op = %proposal.op_tag(),
            local = proposal.is_local(),
            "executed"
        );

        Ok(Some(Executed {
            key: proposal.order_key(),
            op_tag: proposal.op_tag(),
            is_local: proposal.is_local(),
            handle,
        }))
    }

    /// Run every queued proposal in order
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error
    pub fn execute_all(&mut self) -> Result<Vec<Executed<E::Handle>>, ExecutionError> {
        let mut executed = Vec::with_capacity(self.queue.len());
        while let Some(record) = self.execute_one()? {
            executed.push(record);
        }
        Ok(executed)
    }

    /// Number of queued proposals
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Borrow the executor
    #[must_use]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Mutably borrow the executor
    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Consume the manager, returning the executor
    pub fn into_executor(self) -> E {
        self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_core::{ProposalId, Timestamp};

    #[derive(Default)]
    struct LogExecutor {
        log: Vec<i32>,
        fail_on: Option<i32>,
    }

    impl Executor for LogExecutor {
        type Handle = usize;

        fn execute(&mut self, proposal: &Proposal) -> Result<Option<usize>, ExecutorError> {
            if self.fail_on == Some(proposal.id().as_i32()) {
                return Err(ExecutorError::Failed("boom".to_string()));
            }
            self.log.push(proposal.id().as_i32());
            Ok(proposal.is_local().then_some(self.log.len()))
        }
    }

    fn approved(id: i32, micros: u64) -> Proposal {
        let mut p = Proposal::with_timestamp(
            ProposalId::from_raw(id),
            OpTag::new(0),
            Vec::new(),
            Timestamp::from_micros(micros),
        );
        p.advance(ProposalState::Approved).unwrap();
        p
    }

    #[test]
    fn test_execute_all_in_total_order() {
        let mut em = ExecutionManager::new(Rank::new(0), LogExecutor::default());
        em.add(approved(2, 10)).unwrap();
        em.add(approved(0, 20)).unwrap();
        em.add(approved(1, 10)).unwrap();

        let executed = em.execute_all().unwrap();
        assert_eq!(executed.len(), 3);
        assert_eq!(em.executor().log, vec![1, 2, 0]);
        assert!(em.is_empty());
    }

    #[test]
    fn test_handle_only_for_local() {
        let mut em = ExecutionManager::new(Rank::new(0), LogExecutor::default());
        let mut mine = approved(0, 5);
        mine.mark_local();
        em.add(mine).unwrap();
        em.add(approved(1, 1)).unwrap();

        let executed = em.execute_all().unwrap();
        assert_eq!(executed[0].handle, None);
        assert!(executed[1].is_local);
        assert_eq!(executed[1].handle, Some(2));
    }

    #[test]
    fn test_execute_one_empty() {
        let mut em = ExecutionManager::new(Rank::new(0), LogExecutor::default());
        assert_eq!(em.execute_one().unwrap(), None);
    }

    #[test]
    fn test_add_requires_approval() {
        let mut em = ExecutionManager::new(Rank::new(0), LogExecutor::default());
        let fresh = Proposal::with_timestamp(
            ProposalId::from_raw(0),
            OpTag::new(0),
            Vec::new(),
            Timestamp::zero(),
        );
        assert!(em.add(fresh).is_err());
        assert_eq!(em.len(), 0);
    }

    #[test]
    fn test_failure_stops_drain() {
        let executor = LogExecutor {
            fail_on: Some(1),
            ..Default::default()
        };
        let mut em = ExecutionManager::new(Rank::new(0), executor);
        em.add(approved(0, 1)).unwrap();
        em.add(approved(1, 2)).unwrap();
        em.add(approved(2, 3)).unwrap();

        let err = em.execute_all().unwrap_err();
        assert_eq!(err, ExecutionError::Executor(ExecutorError::Failed("boom".to_string())));
        assert_eq!(em.executor().log, vec![0]);
        assert_eq!(em.len(), 1);
    }

    #[test]
    fn test_unready_proposal_is_a_lifecycle_error() {
        let mut em = ExecutionManager::new(Rank::new(0), LogExecutor::default());
        em.queue.push(Proposal::with_timestamp(
            ProposalId::from_raw(4),
            OpTag::new(0),
            Vec::new(),
            Timestamp::zero(),
        ));

        let err = em.execute_one().unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Lifecycle(CoreError::InvalidTransition { .. })
        ));
        assert!(em.is_empty());
    }
}
