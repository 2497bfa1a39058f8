//! Processor configuration.

use std::time::Duration;

use crate::Error;
use crate::Result;

/// Default number of free-list shards.
pub const DEFAULT_SHARD_COUNT: usize = 1024;

/// Tunables fixed when a [`crate::Processor`] is created.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Attach backtraces to panic responses.
    pub debug: bool,
    /// Requested worker count. Rounded up to a multiple of `shard_count`.
    pub num_threads: usize,
    /// Number of independent idle-worker queues.
    pub shard_count: usize,
    /// Deepest service node below the root.
    pub max_node_depth: usize,
    /// Deepest call chain a request may carry.
    pub max_call_depth: u64,
    /// How long `stop` waits for busy workers.
    pub close_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            debug: false,
            num_threads: DEFAULT_SHARD_COUNT,
            shard_count: DEFAULT_SHARD_COUNT,
            max_node_depth: 128,
            max_call_depth: 16,
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl ProcessorConfig {
    /// Checks every field. Failures are Kernel errors.
    pub fn validate(&self) -> Result<()> {
        if self.max_node_depth == 0 {
            return Err(Error::kernel("max_node_depth must be positive"));
        }
        if self.max_call_depth == 0 {
            return Err(Error::kernel("max_call_depth must be positive"));
        }
        if self.shard_count == 0 {
            return Err(Error::kernel("shard_count must be positive"));
        }
        if self.num_threads == 0 {
            return Err(Error::kernel("num_threads must be positive"));
        }
        Ok(())
    }

    /// Worker count after rounding up to a multiple of the shard count.
    pub fn worker_count(&self) -> usize {
        self.num_threads.div_ceil(self.shard_count) * self.shard_count
    }
}
