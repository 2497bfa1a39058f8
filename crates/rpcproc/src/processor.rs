//! # Processor
//!
//! The facade an embedder talks to.
//!
//! ```text
//! new -> mount* -> start -> put_stream* -> stop
//! ```
//!
//! Mounting is only allowed before `start`; from then on the reply table is frozen and
//! shared read-only with every worker.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use streampack::Stream;
use tracing::info;
use tracing::warn;

use crate::Error;
use crate::ProcessorConfig;
use crate::ReplyCache;
use crate::Result;
use crate::Service;
use crate::StatsSnapshot;
use crate::cache;
use crate::panic_bus;
use crate::pool::DispatchPool;
use crate::reply::Reply;
use crate::service::Registry;
use crate::worker::Engine;

/// Receives every response stream, on the worker thread that produced it.
///
/// The callback owns the stream and should release it when done.
pub type ResultCallback = Arc<dyn Fn(Stream) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

pub struct Processor {
    config: ProcessorConfig,
    cache: Option<ReplyCache>,
    on_result: ResultCallback,
    registry: RwLock<Registry>,
    lifecycle: Mutex<Lifecycle>,
    pool: RwLock<Option<Arc<DispatchPool>>>,
}

impl Processor {
    /// Creates an idle processor.
    ///
    /// # Errors
    /// Kernel error if `config` does not validate.
    pub fn new(config: ProcessorConfig, cache: Option<ReplyCache>, on_result: ResultCallback) -> Result<Self> {
        config.validate().map_err(panic_bus::report)?;
        Ok(Self {
            config,
            cache,
            on_result,
            registry: RwLock::new(Registry::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
            pool: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Mounts `service` and its subtree under `parent_path`.
    pub fn mount(&self, parent_path: &str, service: Service) -> Result<()> {
        let lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Idle {
            return Err(panic_bus::report(Error::kernel(format!(
                "rpc-server: mount {}.{} after the processor has started",
                parent_path,
                service.name()
            ))));
        }
        self.registry
            .write()
            .mount(parent_path, &service, self.config.max_node_depth, self.cache.as_ref())?;
        info!(parent = parent_path, service = service.name(), "service mounted");
        Ok(())
    }

    /// Freezes the reply table and starts the workers.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Idle {
            return Err(panic_bus::report(Error::kernel("rpc-server: processor has already been started")));
        }
        let engine = Arc::new(Engine {
            config: self.config.clone(),
            replies: self.registry.read().replies().clone(),
            on_result: self.on_result.clone(),
        });
        let pool = DispatchPool::start(engine).map_err(panic_bus::report)?;
        info!(workers = pool.worker_count(), replies = self.reply_count(), "processor started");
        *self.pool.write() = Some(Arc::new(pool));
        *lifecycle = Lifecycle::Running;
        Ok(())
    }

    /// Queues one request. Returns false, and releases the stream, unless running.
    pub fn put_stream(&self, stream: Stream) -> bool {
        let Some(pool) = self.pool.read().clone() else {
            stream.release();
            return false;
        };
        pool.put_stream(stream)
    }

    /// [`Processor::put_stream`] for async callers.
    ///
    /// Waiting for an idle worker happens on tokio's blocking pool, so the calling
    /// executor thread keeps running other tasks meanwhile.
    pub async fn put_stream_async(self: &Arc<Self>, stream: Stream) -> bool {
        let Some(pool) = self.pool.read().clone() else {
            stream.release();
            return false;
        };
        let stream = match pool.try_put_stream(stream) {
            Ok(sent) => return sent,
            Err(stream) => stream,
        };
        match tokio::task::spawn_blocking(move || pool.put_stream(stream)).await {
            Ok(sent) => sent,
            Err(err) => {
                warn!(error = %err, "stream hand-off task failed");
                false
            }
        }
    }

    /// Stops every worker, waiting up to the close timeout for busy ones.
    ///
    /// # Errors
    /// Kernel error if the processor is not running, or if some replies did not finish
    /// in time.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running => {}
            Lifecycle::Idle => return Err(panic_bus::report(Error::kernel("rpc-server: processor is not started"))),
            Lifecycle::Stopped => {
                return Err(panic_bus::report(Error::kernel("rpc-server: processor has already been stopped")));
            }
        }
        *lifecycle = Lifecycle::Stopped;
        let Some(pool) = self.pool.write().take() else {
            return Err(panic_bus::report(Error::kernel("rpc-server: dispatch pool is missing")));
        };
        drop(lifecycle);

        pool.stop().map_err(panic_bus::report)?;
        info!("processor stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    /// Writes the fast-path source for every mounted kind-string to `output_path`.
    pub fn build_cache(&self, pkg_name: &str, output_path: impl AsRef<Path>) -> Result<()> {
        let kinds: Vec<String> = self
            .registry
            .read()
            .replies()
            .values()
            .map(|r| r.kind_string.clone())
            .collect();
        let source = cache::render(pkg_name, &kinds);
        let path = output_path.as_ref();
        std::fs::write(path, source)
            .map_err(|e| Error::runtime(format!("rpc-server: build_cache {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "reply cache written");
        Ok(())
    }

    /// The mounted reply at `path`.
    pub fn reply(&self, path: &str) -> Option<Arc<Reply>> {
        self.registry.read().replies().get(path).cloned()
    }

    /// Latency snapshot of one reply.
    pub fn reply_stats(&self, path: &str) -> Option<StatsSnapshot> {
        self.reply(path).map(|r| r.stats.snapshot())
    }

    /// Every mounted reply path, sorted.
    pub fn reply_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.registry.read().replies().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn reply_count(&self) -> usize {
        self.registry.read().replies().len()
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        if *self.lifecycle.get_mut() == Lifecycle::Running {
            warn!("processor dropped while running, stopping it");
            let _ = self.stop();
        }
    }
}
