//! # Dispatch Pool
//!
//! A fixed set of workers behind a sharded free-list.
//!
//! Two counters pick the shards: `read_pos` for taking an idle worker, `write_pos` for
//! returning one. Both only grow, so takes and returns spread round-robin over every
//! shard and no single queue lock is hot.
//!
//! ## Invariants
//! - A worker is in at most one shard queue, and only while it is idle.
//! - Once the shard array is detached, `put_stream` fails fast and returned workers are
//!   dropped instead of queued.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;
use parking_lot::RwLock;
use streampack::Stream;
use tracing::info;
use tracing::warn;

use crate::Error;
use crate::Result;
use crate::worker::Engine;
use crate::worker::Worker;

struct ShardQueue {
    idle: VecDeque<Arc<Worker>>,
    closed: bool,
}

enum Take {
    Worker(Arc<Worker>),
    Empty,
    Closed,
}

struct Shard {
    queue: Mutex<ShardQueue>,
    ready: Condvar,
}

impl Shard {
    fn new() -> Self {
        Self {
            queue: Mutex::new(ShardQueue { idle: VecDeque::new(), closed: false }),
            ready: Condvar::new(),
        }
    }

    /// Blocks until a worker is idle here. `None` once the shard is closed.
    fn take(&self) -> Option<Arc<Worker>> {
        let mut queue = self.queue.lock();
        loop {
            if queue.closed {
                return None;
            }
            if let Some(worker) = queue.idle.pop_front() {
                return Some(worker);
            }
            self.ready.wait(&mut queue);
        }
    }

    /// Like `take`, without waiting.
    fn try_take(&self) -> Take {
        let mut queue = self.queue.lock();
        if queue.closed {
            return Take::Closed;
        }
        match queue.idle.pop_front() {
            Some(worker) => Take::Worker(worker),
            None => Take::Empty,
        }
    }

    fn put(&self, worker: Arc<Worker>) {
        let mut queue = self.queue.lock();
        if queue.closed {
            return;
        }
        queue.idle.push_back(worker);
        self.ready.notify_one();
    }

    fn close(&self) {
        let mut queue = self.queue.lock();
        queue.closed = true;
        queue.idle.clear();
        self.ready.notify_all();
    }
}

/// The free-list shards shared by the dispatcher and every worker thread.
pub(crate) struct Shards {
    shards: Box<[Shard]>,
    read_pos: AtomicU64,
    write_pos: AtomicU64,
}

impl Shards {
    fn new(count: usize) -> Self {
        Self {
            shards: (0..count).map(|_| Shard::new()).collect(),
            read_pos: AtomicU64::new(0),
            write_pos: AtomicU64::new(0),
        }
    }

    fn index(&self, pos: &AtomicU64) -> usize {
        (pos.fetch_add(1, Ordering::Relaxed) % self.shards.len() as u64) as usize
    }

    fn take(&self) -> Option<Arc<Worker>> {
        self.shards[self.index(&self.read_pos)].take()
    }

    fn try_take(&self) -> Take {
        self.shards[self.index(&self.read_pos)].try_take()
    }

    /// Returns an idle worker to the next shard in turn.
    pub fn give_back(&self, worker: Arc<Worker>) {
        self.shards[self.index(&self.write_pos)].put(worker);
    }

    fn close(&self) {
        for shard in self.shards.iter() {
            shard.close();
        }
    }
}

pub(crate) struct DispatchPool {
    shards: RwLock<Option<Arc<Shards>>>,
    workers: Vec<Arc<Worker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    close_timeout: Duration,
}

impl DispatchPool {
    /// Spawns every worker and queues it as idle.
    pub fn start(engine: Arc<Engine>) -> Result<Self> {
        let config = &engine.config;
        let shard_count = config.shard_count;
        let worker_count = config.worker_count();
        let close_timeout = config.close_timeout;

        let shards = Arc::new(Shards::new(shard_count));
        let mut workers = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            match Worker::spawn(id, engine.clone(), shards.clone()) {
                Ok((worker, handle)) => {
                    shards.shards[id % shard_count].put(worker.clone());
                    workers.push(worker);
                    handles.push(handle);
                }
                Err(err) => {
                    shards.close();
                    for worker in &workers {
                        worker.close();
                    }
                    return Err(err);
                }
            }
        }
        info!(workers = worker_count, shards = shard_count, "dispatch pool started");

        Ok(Self {
            shards: RwLock::new(Some(shards)),
            workers,
            handles: Mutex::new(handles),
            close_timeout,
        })
    }

    /// Hands `stream` to the next idle worker, waiting for one if needed.
    ///
    /// Returns false, and releases the stream, once the pool is stopped.
    pub fn put_stream(&self, stream: Stream) -> bool {
        let Some(shards) = self.shards.read().clone() else {
            stream.release();
            return false;
        };
        match shards.take() {
            Some(worker) => worker.send(stream),
            None => {
                stream.release();
                false
            }
        }
    }

    /// Detaches the shards, closes every worker and waits up to the close timeout.
    ///
    /// # Errors
    /// Kernel error if the pool was already stopped, or naming every reply that kept a
    /// worker busy past the deadline.
    pub fn stop(&self) -> Result<()> {
        let Some(shards) = self.shards.write().take() else {
            return Err(Error::kernel("rpc-server: dispatch pool has already been stopped"));
        };
        shards.close();
        for worker in &self.workers {
            worker.close();
        }

        let deadline = Instant::now() + self.close_timeout;
        let mut laggards: BTreeMap<String, usize> = BTreeMap::new();
        for worker in &self.workers {
            if !worker.wait_done(deadline) {
                let path = worker.running().unwrap_or_else(|| "<idle>".to_string());
                *laggards.entry(path).or_default() += 1;
            }
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        if laggards.is_empty() {
            info!("dispatch pool stopped");
            return Ok(());
        }
        let lines: Vec<String> = laggards
            .iter()
            .map(|(path, n)| format!("{} ({} routines)", path, n))
            .collect();
        warn!(unfinished = lines.len(), "dispatch pool stop timed out");
        Err(Error::kernel(format!(
            "rpc-server: stop timeout, unfinished replies:\n{}",
            lines.join("\n")
        )))
    }

    /// Hands `stream` over only if the next shard has an idle worker right now.
    ///
    /// `Err` gives the stream back when the caller would have had to wait.
    pub fn try_put_stream(&self, stream: Stream) -> std::result::Result<bool, Stream> {
        let Some(shards) = self.shards.read().clone() else {
            stream.release();
            return Ok(false);
        };
        match shards.try_take() {
            Take::Worker(worker) => Ok(worker.send(stream)),
            Take::Empty => Err(stream),
            Take::Closed => {
                stream.release();
                Ok(false)
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}
