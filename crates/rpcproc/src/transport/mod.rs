//! # Transport Contract
//!
//! What a transport has to offer so streams can reach a [`Processor`].
//!
//! ## Philosophy
//!
//! - **Stream-Oriented**: A message is one complete stream buffer, header included.
//!   The processor never sees network framing.
//! - **Three States**: A connection is Running, then Closing, then Closed. Every
//!   transition is a compare-and-swap under a mutex, so exactly one closer wins.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use streampack::Stream;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::Error;
use crate::Processor;
use crate::ResultCallback;
use crate::Result;

pub mod channel;

pub use channel::ChannelAdapter;
pub use channel::ChannelConn;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Running,
    Closing,
    Closed,
}

/// A [`ConnStatus`] guarded by a mutex.
#[derive(Debug)]
pub struct StatusCell {
    status: Mutex<ConnStatus>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self { status: Mutex::new(ConnStatus::Running) }
    }

    pub fn get(&self) -> ConnStatus {
        *self.status.lock()
    }

    /// Moves from `from` to `to`. False if the current state is not `from`.
    pub fn compare_and_swap(&self, from: ConnStatus, to: ConnStatus) -> bool {
        let mut status = self.status.lock();
        if *status != from {
            return false;
        }
        *status = to;
        true
    }

    pub fn set(&self, to: ConnStatus) {
        *self.status.lock() = to;
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection tunables.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// How long `close` waits for the peer's acknowledgement.
    pub close_timeout: Duration,
    /// Largest stream buffer accepted by `read_stream` in `serve_conn`.
    pub read_limit: usize,
    /// Read timeout used by `serve_conn`.
    pub read_timeout: Duration,
    /// Write timeout used by `serve_conn`.
    pub write_timeout: Duration,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(20),
            read_limit: 16 * 1024 * 1024,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// One bidirectional stream connection.
#[async_trait::async_trait]
pub trait Conn: Send + Sync + 'static {
    /// Waits for the next stream from the peer.
    ///
    /// # Errors
    /// Transport error on timeout, on a buffer over `size_limit`, or once the
    /// connection is closed. Protocol error if the buffer is not a stream.
    async fn read_stream(&self, timeout: Duration, size_limit: usize) -> Result<Stream>;

    /// Sends `stream` to the peer. The stream is released either way.
    async fn write_stream(&self, stream: Stream, timeout: Duration) -> Result<()>;

    /// Asks the peer to close and waits for its acknowledgement.
    async fn close(&self) -> Result<()>;

    fn status(&self) -> ConnStatus;
}

pub type OnConn = Arc<dyn Fn(Arc<dyn Conn>) + Send + Sync>;
pub type OnError = Arc<dyn Fn(Error) + Send + Sync>;

/// A source of connections.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Accepts connections until closed, handing each one to `on_conn`.
    async fn open(&self, on_conn: OnConn, on_error: OnError);

    /// Stops accepting and closes every live connection.
    async fn close(&self, on_error: OnError);
}

/// Routes response streams back to the connection their request came from.
///
/// Every connection served through the router gets its own session id, stamped into
/// the header of each request it sends; the processor copies it into the response.
pub struct Router {
    routes: DashMap<u64, mpsc::UnboundedSender<Stream>>,
    next_session: AtomicU64,
}

impl Router {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { routes: DashMap::new(), next_session: AtomicU64::new(1) })
    }

    /// The result callback to hand to [`Processor::new`].
    pub fn on_result(self: &Arc<Self>) -> ResultCallback {
        let router = Arc::downgrade(self);
        Arc::new(move |stream: Stream| {
            let session = stream.session_id();
            let Some(router) = router.upgrade() else {
                stream.release();
                return;
            };
            let Some(route) = router.routes.get(&session).map(|r| r.clone()) else {
                debug!(session, "response for a closed session dropped");
                stream.release();
                return;
            };
            if let Err(e) = route.send(stream) {
                e.0.release();
            }
        })
    }

    /// Number of connections currently served.
    pub fn sessions(&self) -> usize {
        self.routes.len()
    }

    /// Pumps requests from `conn` into `processor` and responses back, until the
    /// connection ends.
    ///
    /// Returns `Ok` when the peer closed the connection, the read error otherwise.
    pub async fn serve_conn(&self, processor: &Arc<Processor>, conn: Arc<dyn Conn>, config: &ConnConfig) -> Result<()> {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Stream>();
        self.routes.insert(session, tx);
        debug!(session, "connection served");

        let writer_conn = conn.clone();
        let write_timeout = config.write_timeout;
        let writer = tokio::spawn(async move {
            while let Some(stream) = rx.recv().await {
                if let Err(err) = writer_conn.write_stream(stream, write_timeout).await {
                    warn!(session, error = %err, "response write failed");
                    break;
                }
            }
            while let Ok(stream) = rx.try_recv() {
                stream.release();
            }
        });

        let result = loop {
            match conn.read_stream(config.read_timeout, config.read_limit).await {
                Ok(mut stream) => {
                    stream.set_session_id(session);
                    if !processor.put_stream_async(stream).await {
                        break Err(Error::transport("rpc-server: processor is not running"));
                    }
                }
                Err(_) if conn.status() == ConnStatus::Closed => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        self.routes.remove(&session);
        let _ = writer.await;
        debug!(session, "connection finished");
        result
    }
}
