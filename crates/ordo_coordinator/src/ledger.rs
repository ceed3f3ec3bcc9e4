//! Ledger of approved proposals waiting out the time window.
//!
//! Holds this rank's own approved proposal and every approved proposal
//! checked out from other ranks until they are old enough to execute.
//! The collection stays small (one window of in-flight proposals), so
//! minimum selection is a plain scan.

use indexmap::IndexMap;
use ordo_core::{ProposalId, Rank};
use ordo_proposal::{OrderKey, Proposal, position_of_oldest};

/// Ledger manager
pub struct LedgerManager {
    rank: Rank,
    entries: Vec<Proposal>,
}

impl LedgerManager {
    /// Create an empty ledger
    #[must_use]
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            entries: Vec::new(),
        }
    }

    /// Insert a proposal
    pub fn add(&mut self, proposal: Proposal) {
        tracing::debug!(
            rank = %self.rank,
            id = %proposal.id(),
            created_at = proposal.created_at().as_micros(),
            local = proposal.is_local(),
            count = self.entries.len() + 1,
            "ledger add"
        );
        self.entries.push(proposal);
    }

    /// Remove the proposal with this order key
    pub fn remove(&mut self, key: &OrderKey) -> Option<Proposal> {
        let index = self.entries.iter().position(|p| p.order_key() == *key)?;
        Some(self.entries.swap_remove(index))
    }

    /// Number of proposals held
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The minimum proposal by (timestamp, id)
    #[must_use]
    pub fn oldest(&self) -> Option<&Proposal> {
        position_of_oldest(&self.entries).map(|index| &self.entries[index])
    }

    /// Remove and return the minimum proposal
    pub fn pop_oldest(&mut self) -> Option<Proposal> {
        let index = position_of_oldest(&self.entries)?;
        Some(self.entries.swap_remove(index))
    }

    /// Number of distinct proposal ids held
    #[must_use]
    pub fn distinct_ids(&self) -> usize {
        self.oldest_per_id().len()
    }

    /// Remove the oldest proposal of every distinct id, in total order.
    ///
    /// With one outstanding proposal per rank per round this is one round;
    /// entries of a later round from a faster rank stay behind.
    pub fn take_round(&mut self) -> Vec<Proposal> {
        let keys: Vec<OrderKey> = self.oldest_per_id().into_values().collect();
        let mut round: Vec<Proposal> = keys.iter().filter_map(|key| self.remove(key)).collect();
        round.sort_by_key(Proposal::order_key);
        round
    }

    fn oldest_per_id(&self) -> IndexMap<ProposalId, OrderKey> {
        let mut oldest: IndexMap<ProposalId, OrderKey> = IndexMap::new();
        for proposal in &self.entries {
            let key = proposal.order_key();
            oldest
                .entry(proposal.id())
                .and_modify(|current| {
                    if key < *current {
                        *current = key;
                    }
                })
                .or_insert(key);
        }
        oldest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_core::Timestamp;
    use ordo_proposal::OpTag;

    fn at(id: i32, micros: u64) -> Proposal {
        Proposal::with_timestamp(
            ProposalId::from_raw(id),
            OpTag::new(0),
            Vec::new(),
            Timestamp::from_micros(micros),
        )
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = LedgerManager::new(Rank::new(0));
        assert_eq!(ledger.count(), 0);
        assert!(ledger.oldest().is_none());
    }

    #[test]
    fn test_add_remove() {
        let mut ledger = LedgerManager::new(Rank::new(0));
        let p = at(1, 10);
        let key = p.order_key();
        ledger.add(p);
        assert_eq!(ledger.count(), 1);

        let removed = ledger.remove(&key).unwrap();
        assert_eq!(removed.order_key(), key);
        assert!(ledger.is_empty());
        assert!(ledger.remove(&key).is_none());
    }

    #[test]
    fn test_oldest_by_timestamp() {
        let mut ledger = LedgerManager::new(Rank::new(0));
        ledger.add(at(0, 30));
        ledger.add(at(1, 10));
        ledger.add(at(2, 20));
        assert_eq!(ledger.oldest().unwrap().id(), ProposalId::from_raw(1));
    }

    #[test]
    fn test_oldest_tie_break_smaller_id() {
        let mut ledger = LedgerManager::new(Rank::new(0));
        ledger.add(at(5, 10));
        ledger.add(at(2, 10));
        ledger.add(at(9, 10));
        assert_eq!(ledger.oldest().unwrap().id(), ProposalId::from_raw(2));
    }

    #[test]
    fn test_pop_oldest_drains_in_order() {
        let mut ledger = LedgerManager::new(Rank::new(0));
        ledger.add(at(1, 10));
        ledger.add(at(0, 0));
        ledger.add(at(2, 10));

        let order: Vec<i32> = std::iter::from_fn(|| ledger.pop_oldest())
            .map(|p| p.id().as_i32())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_take_round_leaves_later_rounds() {
        let mut ledger = LedgerManager::new(Rank::new(0));
        ledger.add(at(0, 100));
        ledger.add(at(1, 50));
        ledger.add(at(1, 200)); // rank 1 already in its next round
        assert_eq!(ledger.count(), 3);
        assert_eq!(ledger.distinct_ids(), 2);

        let round = ledger.take_round();
        let keys: Vec<(i32, u64)> = round
            .iter()
            .map(|p| (p.id().as_i32(), p.created_at().as_micros()))
            .collect();
        assert_eq!(keys, vec![(1, 50), (0, 100)]);
        assert_eq!(ledger.count(), 1);
        assert_eq!(ledger.oldest().unwrap().created_at().as_micros(), 200);
    }
}
