//! Coordinator configuration.

use ordo_core::{CoreError, CoreResult, Rank};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Submission mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Per-operation vote, then age in the ledger for one time window
    Voted,
    /// Unconditional broadcast, execute once every rank's proposal is in
    Broadcast,
}

impl Mode {
    /// Numeric mode code (1 = voted, 2 = broadcast)
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Voted => 1,
            Self::Broadcast => 2,
        }
    }
}

impl TryFrom<u32> for Mode {
    type Error = CoreError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Voted),
            2 => Ok(Self::Broadcast),
            other => Err(CoreError::InvalidConfig {
                field: "mode".to_string(),
                reason: format!("unknown mode code {}", other),
            }),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voted => f.write_str("voted"),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voted" | "1" => Ok(Self::Voted),
            "broadcast" | "2" => Ok(Self::Broadcast),
            other => Err(CoreError::InvalidConfig {
                field: "mode".to_string(),
                reason: format!("unknown mode {:?}", other),
            }),
        }
    }
}

/// Suspension point run once per iteration of every polling loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PollStrategy {
    /// Busy-spin
    Spin,
    /// Yield the thread to the OS scheduler
    #[default]
    Yield,
    /// Sleep between polls
    Sleep {
        /// Sleep length in microseconds
        micros: u64,
    },
}

impl PollStrategy {
    /// Suspend the calling thread according to the strategy
    pub fn pause(&self) {
        match self {
            Self::Spin => std::hint::spin_loop(),
            Self::Yield => std::thread::yield_now(),
            Self::Sleep { micros } => std::thread::sleep(Duration::from_micros(*micros)),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Rank owning this coordinator, carried into every log line
    pub rank: Rank,
    /// Submission mode
    pub mode: Mode,
    /// Number of ranks sharing the namespace
    pub world_size: usize,
    /// Time window in microseconds
    pub time_window_us: u64,
    /// Polling suspension point
    #[serde(default)]
    pub poll: PollStrategy,
}

impl CoordinatorConfig {
    /// Default time window in microseconds
    pub const DEFAULT_TIME_WINDOW_US: u64 = 2_000;

    /// Create a new coordinator config
    #[must_use]
    pub fn new(rank: Rank, world_size: usize) -> Self {
        Self {
            rank,
            mode: Mode::Voted,
            world_size,
            time_window_us: Self::DEFAULT_TIME_WINDOW_US,
            poll: PollStrategy::default(),
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

    /// Set polling strategy
    #[must_use]
    pub fn with_poll(mut self, poll: PollStrategy) -> Self {
        self.poll = poll;
        self
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns error if world size or window is zero, or rank is out of range
    pub fn validate(&self) -> CoreResult<()> {
        if self.world_size == 0 {
            return Err(CoreError::InvalidConfig {
                field: "world_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.time_window_us == 0 {
            return Err(CoreError::InvalidConfig {
                field: "time_window_us".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.rank.as_usize() >= self.world_size {
            return Err(CoreError::InvalidConfig {
                field: "rank".to_string(),
                reason: format!("{} outside world of {}", self.rank, self.world_size),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = CoordinatorConfig::new(Rank::new(0), 4);
        assert_eq!(config.mode, Mode::Voted);
        assert_eq!(config.world_size, 4);
        assert_eq!(config.time_window_us, CoordinatorConfig::DEFAULT_TIME_WINDOW_US);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = CoordinatorConfig::new(Rank::new(1), 2)
            .with_mode(Mode::Broadcast)
            .with_time_window(1_000)
            .with_poll(PollStrategy::Spin);
        assert_eq!(config.mode, Mode::Broadcast);
        assert_eq!(config.time_window_us, 1_000);
        assert_eq!(config.poll, PollStrategy::Spin);
    }

    #[test]
    fn test_validate_rejects_empty_world() {
        let config = CoordinatorConfig::new(Rank::new(0), 0);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { field, .. }) if field == "world_size"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = CoordinatorConfig::new(Rank::new(0), 1).with_time_window(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_rank_out_of_range() {
        let config = CoordinatorConfig::new(Rank::new(2), 2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_codes() {
        assert_eq!(Mode::try_from(1).unwrap(), Mode::Voted);
        assert_eq!(Mode::try_from(2).unwrap(), Mode::Broadcast);
        assert!(Mode::try_from(0).is_err());
        assert_eq!(Mode::Broadcast.code(), 2);
        assert_eq!("voted".parse::<Mode>().unwrap(), Mode::Voted);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "rank": 1,
            "mode": "broadcast",
            "world_size": 3,
            "time_window_us": 1000,
            "poll": { "kind": "sleep", "micros": 50 }
        }"#;
        let config = CoordinatorConfig::from_json(json).unwrap();
        assert_eq!(config.rank, Rank::new(1));
        assert_eq!(config.mode, Mode::Broadcast);
        assert_eq!(config.poll, PollStrategy::Sleep { micros: 50 });
    }

    #[test]
    fn test_from_json_default_poll() {
        let json = r#"{"rank": 0, "mode": "voted", "world_size": 1, "time_window_us": 10}"#;
        let config = CoordinatorConfig::from_json(json).unwrap();
        assert_eq!(config.poll, PollStrategy::Yield);
    }

    #[test]
    fn test_from_json_invalid_values() {
        let json = r#"{"rank": 0, "mode": "voted", "world_size": 0, "time_window_us": 10}"#;
        assert!(CoordinatorConfig::from_json(json).is_err());
    }
}
