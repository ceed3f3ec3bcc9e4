//! Time types for ORDO.
//!
//! Proposal timestamps are microseconds since an arbitrary epoch. Every
//! rank reads time through a [`Clock`] so that tests can drive time by hand.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Microsecond timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Microseconds per second
    pub const MICROS_PER_SEC: u64 = 1_000_000;

    /// The epoch
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from raw microseconds
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Get raw microseconds
    #[must_use]
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get current wall-clock timestamp
    #[allow(clippy::missing_panics_doc)]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards");
        Self(duration.as_micros() as u64)
    }

    /// Microseconds elapsed since `earlier`, zero if `earlier` is in the future
    #[must_use]
    pub const fn micros_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Timestamp `micros` earlier, saturating at the epoch
    #[must_use]
    pub const fn saturating_sub_micros(&self, micros: u64) -> Self {
        Self(self.0.saturating_sub(micros))
    }

    /// Timestamp `micros` later
    #[must_use]
    pub const fn saturating_add_micros(&self, micros: u64) -> Self {
        Self(self.0.saturating_add(micros))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:06}s",
            self.0 / Self::MICROS_PER_SEC,
            self.0 % Self::MICROS_PER_SEC
        )
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current time in microseconds
    fn now(&self) -> Timestamp;
}

/// Clock shared between the components of one rank
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Wrap a system clock for sharing
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Hand-driven clock.
///
/// Clones share the same time. With a non-zero auto-advance step every
/// read moves time forward, which lets polling loops make progress in
/// single-threaded tests without sleeping.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    step: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start.as_micros())),
            step: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance time by `step` microseconds on every read
    #[must_use]
    pub fn with_auto_advance(self, step: u64) -> Self {
        self.step.store(step, Ordering::SeqCst);
        self
    }

    /// Move time forward
    pub fn advance(&self, micros: u64) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, to: Timestamp) {
        self.now.store(to.as_micros(), Ordering::SeqCst);
    }

    /// Read without advancing
    #[must_use]
    pub fn peek(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }

    /// Wrap a clone for sharing
    #[must_use]
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let step = self.step.load(Ordering::SeqCst);
        Timestamp(self.now.fetch_add(step, Ordering::SeqCst))
    }
}
