//! Per-reply latency counters.
//!
//! Eight duration buckets, each split between success and failure. Counters are plain
//! atomics; only the "speed since the previous snapshot" bookkeeping takes a lock.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;

/// Upper bounds (exclusive, milliseconds) of the first seven buckets. The eighth
/// bucket holds everything slower.
pub const BUCKET_LIMITS_MS: [u64; 7] = [5, 20, 50, 100, 200, 500, 1000];

pub const BUCKETS: usize = BUCKET_LIMITS_MS.len() + 1;

/// Index of the bucket a duration falls into.
pub fn bucket_of(elapsed: Duration) -> usize {
    let ms = elapsed.as_millis();
    BUCKET_LIMITS_MS
        .iter()
        .position(|limit| ms < *limit as u128)
        .unwrap_or(BUCKETS - 1)
}

struct SpeedMark {
    at: Instant,
    total: u64,
}

/// Latency counters of one reply.
pub struct ReplyStats {
    success: [AtomicU64; BUCKETS],
    failure: [AtomicU64; BUCKETS],
    mark: Mutex<SpeedMark>,
}

/// A point-in-time copy of [`ReplyStats`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub success: [u64; BUCKETS],
    pub failure: [u64; BUCKETS],
    /// Calls per second since the previous snapshot.
    pub speed: f64,
}

impl StatsSnapshot {
    pub fn successes(&self) -> u64 {
        self.success.iter().sum()
    }

    pub fn failures(&self) -> u64 {
        self.failure.iter().sum()
    }

    pub fn total(&self) -> u64 {
        self.successes() + self.failures()
    }
}

impl ReplyStats {
    pub fn new() -> Self {
        Self {
            success: Default::default(),
            failure: Default::default(),
            mark: Mutex::new(SpeedMark { at: Instant::now(), total: 0 }),
        }
    }

    pub fn record(&self, success: bool, elapsed: Duration) {
        let counters = if success { &self.success } else { &self.failure };
        counters[bucket_of(elapsed)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counters: &[AtomicU64; BUCKETS]| {
            let mut out = [0u64; BUCKETS];
            for (o, c) in out.iter_mut().zip(counters) {
                *o = c.load(Ordering::Relaxed);
            }
            out
        };
        let mut snapshot = StatsSnapshot {
            success: load(&self.success),
            failure: load(&self.failure),
            speed: 0.0,
        };

        let total = snapshot.total();
        let mut mark = self.mark.lock();
        let secs = mark.at.elapsed().as_secs_f64();
        if secs > 0.0 {
            snapshot.speed = total.saturating_sub(mark.total) as f64 / secs;
        }
        mark.at = Instant::now();
        mark.total = total;
        snapshot
    }
}

impl Default for ReplyStats {
    fn default() -> Self {
        Self::new()
    }
}
