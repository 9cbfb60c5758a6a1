//! Identity generation and clocks
//!
//! Both are injected into the store so tests can make IDs and timestamps
//! deterministic.

use chrono::{DateTime, Duration, Utc};
use chronicle_core::PlatformId;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of candidate identities
pub trait IdGenerator: Send + Sync {
    /// Produce a candidate ID. Callers retry on collision.
    fn id(&self) -> PlatformId;
}

/// Uniformly random non-zero IDs
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn id(&self) -> PlatformId {
        PlatformId::new(rand::thread_rng().gen_range(1..=u64::MAX))
    }
}

/// IDs counting up from a starting value
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Start at `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn id(&self) -> PlatformId {
        PlatformId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Always the same ID; used to exercise collision handling
#[derive(Debug, Clone, Copy)]
pub struct FixedIdGenerator(pub PlatformId);

impl IdGenerator for FixedIdGenerator {
    fn id(&self) -> PlatformId {
        self.0
    }
}

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
