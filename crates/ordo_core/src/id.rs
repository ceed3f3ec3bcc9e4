//! Identifiers for ORDO participants and proposals.
//!
//! Both are plain integers because they travel inside the fixed-width
//! proposal envelope.

use serde::{Deserialize, Serialize};

/// Rank identifier - one peer participating in the shared namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rank(u32);

impl Rank {
    /// Create a rank from its index in the group
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get raw index
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Get index as usize, for slot lookups
    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Iterate over all ranks of a group of `world_size` peers
    pub fn all(world_size: usize) -> impl Iterator<Item = Rank> {
        (0..world_size as u32).map(Rank)
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rank_{}", self.0)
    }
}

impl From<u32> for Rank {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Proposal identifier
///
/// Signed 32-bit on the wire. Smaller ids win timestamp ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalId(i32);

impl ProposalId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: i32) -> Self {
        Self(value)
    }

    /// Derive the id from the originating rank.
    ///
    /// Distinct only while every rank has at most one outstanding proposal.
    #[must_use]
    pub const fn from_rank(rank: Rank) -> Self {
        Self(rank.0 as i32)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl From<i32> for ProposalId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_display() {
        assert_eq!(Rank::new(3).to_string(), "rank_3");
    }

    #[test]
    fn test_rank_all() {
        let ranks: Vec<Rank> = Rank::all(3).collect();
        assert_eq!(ranks, vec![Rank::new(0), Rank::new(1), Rank::new(2)]);
    }

    #[test]
    fn test_proposal_id_from_rank() {
        let id = ProposalId::from_rank(Rank::new(5));
        assert_eq!(id.as_i32(), 5);
        assert_eq!(id.to_string(), "p5");
    }

    #[test]
    fn test_proposal_id_ord() {
        assert!(ProposalId::from_raw(-1) < ProposalId::from_raw(0));
        assert!(ProposalId::from_raw(0) < ProposalId::from_raw(1));
    }

    #[test]
    fn test_id_serde_roundtrip() {
        let id = ProposalId::from_raw(42);
        let json = serde_json::to_string(&id).unwrap();
        let back: ProposalId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
