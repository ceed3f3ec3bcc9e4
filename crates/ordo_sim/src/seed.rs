//! Seed management for reproducible simulations.

use ordo_core::Rank;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::hash::Hasher;
use std::str::FromStr;

/// Source of simulation seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedSource {
    /// From a literal value
    Literal(u64),
    /// From a string (hashed)
    FromString(String),
    /// Non-deterministic, taken from the wall clock
    Random,
}

impl SeedSource {
    /// Generate a seed value
    #[must_use]
    pub fn to_seed(&self) -> u64 {
        match self {
            SeedSource::Literal(seed) => *seed,
            SeedSource::FromString(s) => {
                let mut hasher = fnv::FnvHasher::default();
                hasher.write(s.as_bytes());
                hasher.finish()
            }
            SeedSource::Random => ordo_core::Timestamp::now().as_micros(),
        }
    }
}

/// Simulation seed for reproducibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSeed {
    /// Base seed value
    pub seed: u64,
    /// Source of the seed
    pub source: SeedSource,
}

impl SimSeed {
    /// Create a new simulation seed
    #[must_use]
    pub fn new(source: SeedSource) -> Self {
        Self {
            seed: source.to_seed(),
            source,
        }
    }

    /// Create a seed from a literal value
    #[must_use]
    pub fn from_literal(seed: u64) -> Self {
        Self::new(SeedSource::Literal(seed))
    }

    /// Create a seed from a string
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::new(SeedSource::FromString(s.into()))
    }

    /// Derive a seed for a specific context
    #[must_use]
    pub fn derive(&self, context: &str) -> Self {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write_u64(self.seed);
        hasher.write(context.as_bytes());
        Self::from_literal(hasher.finish())
    }

    /// Derive the seed of one rank's link jitter
    #[must_use]
    pub fn for_rank(&self, rank: Rank) -> Self {
        self.derive(&rank.to_string())
    }

    /// Create RNG from seed
    #[must_use]
    pub fn into_rng(self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }

}

/// Parses `random`, a decimal literal, or any other string (hashed)
impl FromStr for SimSeed {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "random" => Self::new(SeedSource::Random),
            _ => match s.parse::<u64>() {
                Ok(seed) => Self::from_literal(seed),
                Err(_) => Self::from_string(s),
            },
        })
    }
}

impl Default for SimSeed {
    fn default() -> Self {
        Self::from_literal(42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seed_source_literal() {
        assert_eq!(SeedSource::Literal(123).to_seed(), 123);
    }

    #[test]
    fn test_seed_source_from_string_reproducible() {
        let a = SeedSource::FromString("ordo".to_string());
        let b = SeedSource::FromString("ordo".to_string());
        let c = SeedSource::FromString("other".to_string());
        assert_eq!(a.to_seed(), b.to_seed());
        assert_ne!(a.to_seed(), c.to_seed());
    }

    #[test]
    fn test_sim_seed_derive() {
        let base = SimSeed::from_literal(42);
        let derived1 = base.derive("context1");
        let derived2 = base.derive("context2");

        assert_ne!(derived1.seed, derived2.seed);
        assert_eq!(derived1.seed, base.derive("context1").seed);
        assert_ne!(derived1.seed, base.seed);
    }

    #[test]
    fn test_rank_seeds_differ() {
        let base = SimSeed::default();
        assert_ne!(base.for_rank(Rank::new(0)).seed, base.for_rank(Rank::new(1)).seed);
    }

    #[test]
    fn test_sim_seed_rng() {
        let mut rng1 = SimSeed::from_literal(42).into_rng();
        let mut rng2 = SimSeed::from_literal(42).into_rng();

        let val1: u64 = rng1.r#gen();
        let val2: u64 = rng2.r#gen();
        assert_eq!(val1, val2);
    }

    #[test]
    fn test_parse_seed() {
        let literal: SimSeed = "7".parse().unwrap();
        assert_eq!(literal, SimSeed::from_literal(7));

        let named: SimSeed = "nightly".parse().unwrap();
        assert_eq!(named.source, SeedSource::FromString("nightly".to_string()));
        assert_eq!(named.seed, SimSeed::from_string("nightly").seed);

        let random: SimSeed = "random".parse().unwrap();
        assert_eq!(random.source, SeedSource::Random);
    }

    #[test]
    fn test_sim_seed_default() {
        assert_eq!(SimSeed::default().seed, 42);
    }
}
