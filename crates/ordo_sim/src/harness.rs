//! Multi-rank simulation harness.
//!
//! Runs every rank on its own OS thread over the in-process bus. Each rank
//! submits its workload one proposal at a time, then takes part in the
//! collective close, and reports what it executed.

use crate::backend::{BusBackend, delivery_hops};
use crate::bus::{self, Endpoint, Jitter};
use crate::namespace::{LogEntry, NamespaceExecutor, NamespaceOp, ObjectHandle};
use crate::seed::SimSeed;
use ordo_coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorError, Mode, PollStrategy, StalenessJudge,
    SubmitOutcome,
};
use ordo_core::{CoreError, CoreResult, ProposalId, Rank, SharedClock, SystemClock};
use serde::{Deserialize, Serialize};

/// Coordinator type every simulated rank runs
pub type SimCoordinator = Coordinator<BusBackend<StalenessJudge>, NamespaceExecutor>;

/// Simulation errors
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Invalid configuration or payload encoding
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A rank's coordinator failed
    #[error("{rank}: {source}")]
    Rank {
        /// Failing rank
        rank: Rank,
        /// Coordinator error
        #[source]
        source: CoordinatorError,
    },

    /// A rank thread panicked
    #[error("{0} panicked")]
    Panicked(Rank),
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of ranks
    pub ranks: usize,
    /// Submission mode
    pub mode: Mode,
    /// Time window in microseconds
    pub time_window_us: u64,
    /// Operations each rank submits before closing
    pub ops_per_rank: usize,
    /// Seed for link jitter
    pub seed: SimSeed,
    /// Link jitter
    pub jitter: Jitter,
    /// Polling suspension point
    pub poll: PollStrategy,
}

impl SimConfig {
    /// Create a new simulation config
    #[must_use]
    pub fn new(ranks: usize) -> Self {
        Self {
            ranks,
            mode: Mode::Voted,
            time_window_us: 50_000,
            ops_per_rank: 4,
            seed: SimSeed::default(),
            jitter: Jitter::none(),
            poll: PollStrategy::Yield,
        }
    }

    /// Set submission mode
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set time window
    #[must_use]
    pub fn with_time_window(mut self, micros: u64) -> Self {
        self.time_window_us = micros;
        self
    }

    /// Set workload size
    #[must_use]
    pub fn with_ops(mut self, ops_per_rank: usize) -> Self {
        self.ops_per_rank = ops_per_rank;
        self
    }

    /// Set seed
    #[must_use]
    pub fn with_seed(mut self, seed: SimSeed) -> Self {
        self.seed = seed;
        self
    }

    /// Set link jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set polling strategy
    #[must_use]
    pub fn with_poll(mut self, poll: PollStrategy) -> Self {
        self.poll = poll;
        self
    }

    /// Coordinator config for one rank
    #[must_use]
    pub fn coordinator_config(&self, rank: Rank) -> CoordinatorConfig {
        CoordinatorConfig::new(rank, self.ranks)
            .with_mode(self.mode)
            .with_time_window(self.time_window_us)
            .with_poll(self.poll)
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns error if there are no ranks, or if a proposal can spend the
    /// whole window on the bus before every peer has seen it. That takes
    /// three jittered hops in voted mode and one in broadcast mode.
    pub fn validate(&self) -> CoreResult<()> {
        self.coordinator_config(Rank::new(0)).validate()?;
        let hops = delivery_hops(self.mode);
        if self.jitter.max_us.saturating_mul(hops) >= self.time_window_us {
            return Err(CoreError::InvalidConfig {
                field: "jitter".to_string(),
                reason: format!(
                    "{} hops of up to {}us jitter must stay below the {}us window",
                    hops, self.jitter.max_us, self.time_window_us
                ),
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON config
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the values are invalid
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// What one rank did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankReport {
    /// Rank
    pub rank: Rank,
    /// Executed operations in execution order
    pub executed: Vec<LogEntry>,
    /// Own proposals committed
    pub committed: usize,
    /// Own proposals denied
    pub denied: usize,
    /// Close proposals resubmitted after a denial
    pub close_retries: usize,
}

/// Simulation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimReport {
    /// Configuration that produced the run
    pub config: SimConfig,
    /// Per-rank reports in rank order
    pub ranks: Vec<RankReport>,
}

impl SimReport {
    /// Whether every rank executed the same sequence
    #[must_use]
    pub fn converged(&self) -> bool {
        self.ranks
            .windows(2)
            .all(|pair| pair[0].executed == pair[1].executed)
    }

    /// Execution order of the first rank
    #[must_use]
    pub fn reference_order(&self) -> &[LogEntry] {
        self.ranks
            .first()
            .map(|r| r.executed.as_slice())
            .unwrap_or_default()
    }

    /// Whether every rank's order ascends by (timestamp, id)
    #[must_use]
    pub fn totally_ordered(&self) -> bool {
        self.ranks.iter().all(|report| {
            report
                .executed
                .windows(2)
                .all(|pair| (pair[0].created_at, pair[0].id) <= (pair[1].created_at, pair[1].id))
        })
    }
}

/// Simulation harness
pub struct SimHarness {
    config: SimConfig,
    clock: SharedClock,
}

impl SimHarness {
    /// Create a harness on the wall clock
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self {
            config,
            clock: SystemClock::shared(),
        })
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Run every rank to completion
    ///
    /// # Errors
    ///
    /// Returns the first rank failure
    pub fn run(&self) -> Result<SimReport, SimError> {
        tracing::info!(
            ranks = self.config.ranks,
            mode = %self.config.mode,
            window_us = self.config.time_window_us,
            ops = self.config.ops_per_rank,
            seed = self.config.seed.seed,
            "simulation start"
        );

        let endpoints = bus::connect(
            self.config.ranks,
            self.clock.clone(),
            &self.config.seed,
            self.config.jitter,
        );
        let results: Vec<Result<RankReport, SimError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|endpoint| {
                    let rank = endpoint.rank();
                    let handle = scope.spawn(move || self.run_rank(endpoint));
                    (rank, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(rank, handle)| handle.join().unwrap_or(Err(SimError::Panicked(rank))))
                .collect()
        });

        let ranks = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        let report = SimReport {
            config: self.config.clone(),
            ranks,
        };
        tracing::info!(
            converged = report.converged(),
            executed = report.reference_order().len(),
            "simulation done"
        );
        Ok(report)
    }

    /// Build one rank's coordinator over a bus endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the coordinator config is invalid
    pub fn open_rank(&self, endpoint: Endpoint) -> Result<SimCoordinator, CoordinatorError> {
        let rank = endpoint.rank();
        let judge = StalenessJudge::new(rank, self.config.time_window_us, self.clock.clone());
        Coordinator::new(
            self.config.coordinator_config(rank),
            BusBackend::new(endpoint, judge),
            NamespaceExecutor::new(rank),
            self.clock.clone(),
        )
    }

    fn run_rank(&self, endpoint: Endpoint) -> Result<RankReport, SimError> {
        let rank = endpoint.rank();
        let fail = |source| SimError::Rank { rank, source };
        let mut coordinator = self.open_rank(endpoint).map_err(fail)?;

        let mut committed = 0;
        let mut denied = 0;
        for op in workload(rank, self.config.ops_per_rank) {
            match self.submit(&mut coordinator, op)? {
                SubmitOutcome::Committed { .. } => committed += 1,
                SubmitOutcome::Denied => denied += 1,
            }
        }

        let mut close_retries = 0;
        while !self.submit(&mut coordinator, NamespaceOp::Close)?.is_committed() {
            close_retries += 1;
        }
        while coordinator.executor().closes() < self.config.ranks {
            coordinator.make_progress().map_err(fail)?;
            self.config.poll.pause();
        }

        let executor = coordinator.close().map_err(fail)?;
        Ok(RankReport {
            rank,
            executed: executor.log().to_vec(),
            committed,
            denied,
            close_retries,
        })
    }

    fn submit(
        &self,
        coordinator: &mut SimCoordinator,
        op: NamespaceOp,
    ) -> Result<SubmitOutcome<ObjectHandle>, SimError> {
        let rank = coordinator.config().rank;
        let proposal = op.into_proposal(ProposalId::from_rank(rank), self.clock.as_ref())?;
        coordinator
            .submit(proposal)
            .map_err(|source| SimError::Rank { rank, source })
    }
}

/// Operations rank `rank` submits, all under its own group
#[must_use]
pub fn workload(rank: Rank, ops: usize) -> Vec<NamespaceOp> {
    let root = format!("/r{}", rank.as_u32());
    let mut plan = Vec::with_capacity(ops);
    if ops == 0 {
        return plan;
    }
    plan.push(NamespaceOp::CreateGroup { path: root.clone() });

    let mut k = 0;
    while plan.len() < ops {
        let dataset = format!("{}/d{}", root, k);
        let steps = [
            NamespaceOp::CreateDataset {
                path: dataset.clone(),
                dims: vec![16],
            },
            NamespaceOp::CreateAttribute {
                path: dataset.clone(),
                name: "origin".to_string(),
            },
            NamespaceOp::WriteAttribute {
                path: dataset.clone(),
                name: "origin".to_string(),
                value: rank.as_u32().to_le_bytes().to_vec(),
            },
            NamespaceOp::ExtendDataset {
                path: dataset,
                dims: vec![32],
            },
        ];
        plan.extend(steps.into_iter().take(ops - plan.len()));
        k += 1;
    }
    plan
}
