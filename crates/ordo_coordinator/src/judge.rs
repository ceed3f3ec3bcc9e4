//! Local vote on remote proposals.
//!
//! The voting backend asks the judge once per proposal received from
//! another rank. Proposals too old to still be reordered safely are
//! rejected.

use ordo_core::{Rank, SharedClock};
use ordo_proposal::{Proposal, WireDecode};
use serde::{Deserialize, Serialize};

/// Local vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Vote yes
    Accept,
    /// Vote no
    Reject,
}

impl Verdict {
    /// Whether this is a yes vote
    #[must_use]
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Application predicate deciding the local vote on a remote proposal
pub trait Judge: Send {
    /// Judge an envelope received from another rank
    fn judge(&self, envelope: &[u8]) -> Verdict;
}

/// Rejects proposals older than the time window
pub struct StalenessJudge {
    rank: Rank,
    time_window_us: u64,
    clock: SharedClock,
}

impl StalenessJudge {
    /// Create a judge for `rank` with the rank's configured window
    #[must_use]
    pub fn new(rank: Rank, time_window_us: u64, clock: SharedClock) -> Self {
        Self {
            rank,
            time_window_us,
            clock,
        }
    }
}

impl Judge for StalenessJudge {
    fn judge(&self, envelope: &[u8]) -> Verdict {
        let proposal = match Proposal::decode(envelope) {
            Ok(proposal) => proposal,
            Err(err) => {
                tracing::warn!(rank = %self.rank, error = %err, "rejecting undecodable proposal");
                return Verdict::Reject;
            }
        };

        let age = proposal.age_at(self.clock.now());
        if age > self.time_window_us {
            tracing::warn!(
                rank = %self.rank,
                id = %proposal.id(),
                created_at = proposal.created_at().as_micros(),
                age,
                "proposal too old, voting no"
            );
            return Verdict::Reject;
        }

        Verdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_core::{ManualClock, ProposalId, Timestamp};
    use ordo_proposal::{OpTag, WireEncode};
    use proptest::prelude::*;

    fn judge_at(now: u64, window: u64) -> StalenessJudge {
        let clock = ManualClock::new(Timestamp::from_micros(now));
        StalenessJudge::new(Rank::new(0), window, clock.shared())
    }

    fn envelope(created_at: u64, payload: Vec<u8>) -> Vec<u8> {
        Proposal::with_timestamp(
            ProposalId::from_raw(1),
            OpTag::new(0),
            payload,
            Timestamp::from_micros(created_at),
        )
        .encode()
        .to_vec()
    }

    #[test]
    fn test_fresh_accepted() {
        let judge = judge_at(10_000, 1_000);
        assert_eq!(judge.judge(&envelope(9_500, Vec::new())), Verdict::Accept);
    }

    #[test]
    fn test_exactly_window_old_accepted() {
        let judge = judge_at(10_000, 1_000);
        assert_eq!(judge.judge(&envelope(9_000, Vec::new())), Verdict::Accept);
    }

    #[test]
    fn test_stale_rejected() {
        let judge = judge_at(10_000, 1_000);
        assert_eq!(judge.judge(&envelope(8_000, Vec::new())), Verdict::Reject);
    }

    #[test]
    fn test_future_timestamp_accepted() {
        let judge = judge_at(10_000, 1_000);
        assert_eq!(judge.judge(&envelope(10_500, Vec::new())), Verdict::Accept);
    }

    #[test]
    fn test_garbage_rejected() {
        let judge = judge_at(10_000, 1_000);
        assert_eq!(judge.judge(&[1, 2, 3]), Verdict::Reject);
    }

    proptest! {
        #[test]
        fn prop_stale_always_rejected(
            window in 1u64..1_000_000,
            excess in 1u64..1_000_000,
            payload in proptest::collection::vec(any::<u8>(), 0..256)
        ) {
            let now = 10_000_000u64;
            let judge = judge_at(now, window);
            let created_at = now - window - excess;
            prop_assert_eq!(judge.judge(&envelope(created_at, payload)), Verdict::Reject);
        }
    }
}
