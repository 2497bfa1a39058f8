//! # Free-list Pool
//!
//! A thread-safe free-list used for frames and streams.
//!
//! `get` pops an idle value or creates a new one. `put` pushes it back. In debug builds
//! the pool also remembers which values it handed out, so returning a value that did not
//! come from this pool (or returning the same value twice) panics at the `put` site.
//! Release builds keep only the lock-free queue.

use crossbeam_queue::SegQueue;

#[cfg(debug_assertions)]
use dashmap::DashSet;

/// A process-wide free-list of `T`.
pub struct Pool<T> {
    free: SegQueue<T>,
    create: fn() -> T,
    /// Stable identity of a pooled value (an address it owns).
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    identify: fn(&T) -> usize,
    #[cfg(debug_assertions)]
    in_flight: DashSet<usize>,
}

impl<T> Pool<T> {
    /// Creates an empty pool. `identify` must return a value unique to each live `T`.
    pub fn new(create: fn() -> T, identify: fn(&T) -> usize) -> Self {
        Self {
            free: SegQueue::new(),
            create,
            identify,
            #[cfg(debug_assertions)]
            in_flight: DashSet::new(),
        }
    }

    /// Takes an idle value, creating one if the free-list is empty.
    pub fn get(&self) -> T {
        let value = self.free.pop().unwrap_or_else(self.create);
        #[cfg(debug_assertions)]
        self.in_flight.insert((self.identify)(&value));
        value
    }

    /// Returns a value to the free-list.
    ///
    /// # Panics
    /// In debug builds, if `value` is not currently checked out of this pool.
    pub fn put(&self, value: T) {
        #[cfg(debug_assertions)]
        {
            let id = (self.identify)(&value);
            if self.in_flight.remove(&id).is_none() {
                panic!("pool: put of a value ({:#x}) that was not taken from this pool", id);
            }
        }
        self.free.push(value);
    }

    /// Number of idle values waiting in the free-list.
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Number of values currently checked out. Always zero in release builds.
    pub fn in_flight(&self) -> usize {
        #[cfg(debug_assertions)]
        {
            self.in_flight.len()
        }
        #[cfg(not(debug_assertions))]
        {
            0
        }
    }
}
