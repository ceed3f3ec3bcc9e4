//! Total order over proposals.
//!
//! Every rank compares proposals by creation timestamp, then by id, so
//! independently built local orders converge to one global order.

use crate::proposal::Proposal;
use ordo_core::{ProposalId, Timestamp};
use serde::{Deserialize, Serialize};

/// Sort key: creation timestamp ascending, then id ascending
///
/// Field order matters, the derived `Ord` compares `created_at` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey {
    /// Creation timestamp
    pub created_at: Timestamp,
    /// Tie-breaker, smaller wins
    pub id: ProposalId,
}

impl OrderKey {
    /// Create a key
    #[must_use]
    pub const fn new(created_at: Timestamp, id: ProposalId) -> Self {
        Self { created_at, id }
    }
}

impl std::fmt::Display for OrderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.created_at.as_micros(), self.id)
    }
}

/// Index of the minimum proposal by [`OrderKey`], `None` if empty.
///
/// Linear scan; callers keep these collections to one time window.
#[must_use]
pub fn position_of_oldest(proposals: &[Proposal]) -> Option<usize> {
    proposals
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| p.order_key())
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::OpTag;
    use proptest::prelude::*;

    fn at(id: i32, micros: u64) -> Proposal {
        Proposal::with_timestamp(
            ProposalId::from_raw(id),
            OpTag::new(0),
            Vec::new(),
            Timestamp::from_micros(micros),
        )
    }

    #[test]
    fn test_timestamp_dominates() {
        let a = OrderKey::new(Timestamp::from_micros(1), ProposalId::from_raw(9));
        let b = OrderKey::new(Timestamp::from_micros(2), ProposalId::from_raw(0));
        assert!(a < b);
    }

    #[test]
    fn test_smaller_id_wins_tie() {
        let a = OrderKey::new(Timestamp::from_micros(5), ProposalId::from_raw(1));
        let b = OrderKey::new(Timestamp::from_micros(5), ProposalId::from_raw(2));
        assert!(a < b);
    }

    #[test]
    fn test_oldest_empty() {
        assert_eq!(position_of_oldest(&[]), None);
    }

    #[test]
    fn test_oldest_picks_min() {
        let items = vec![at(3, 30), at(1, 10), at(2, 10), at(0, 20)];
        assert_eq!(position_of_oldest(&items), Some(1));
    }

    #[test]
    fn test_oldest_independent_of_arrival_order() {
        let forward = vec![at(0, 0), at(1, 10)];
        let backward = vec![at(1, 10), at(0, 0)];
        let a = &forward[position_of_oldest(&forward).unwrap()];
        let b = &backward[position_of_oldest(&backward).unwrap()];
        assert_eq!(a.id(), b.id());
    }

    proptest! {
        #[test]
        fn prop_order_is_total(t1: u64, i1: i32, t2: u64, i2: i32) {
            let a = OrderKey::new(Timestamp::from_micros(t1), ProposalId::from_raw(i1));
            let b = OrderKey::new(Timestamp::from_micros(t2), ProposalId::from_raw(i2));
            let lt = a < b;
            let gt = a > b;
            let eq = a == b;
            prop_assert_eq!(1, lt as u8 + gt as u8 + eq as u8);
            prop_assert_eq!(eq, t1 == t2 && i1 == i2);
        }

        #[test]
        fn prop_oldest_matches_sorted_head(
            entries in proptest::collection::vec((0u64..50, -5i32..5), 1..20)
        ) {
            let mut items: Vec<Proposal> = entries.iter().map(|(t, i)| at(*i, *t)).collect();
            let picked = items[position_of_oldest(&items).unwrap()].order_key();
            items.sort_by_key(Proposal::order_key);
            prop_assert_eq!(picked, items[0].order_key());
        }
    }
}
