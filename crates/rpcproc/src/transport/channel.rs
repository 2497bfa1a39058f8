//! In-memory transport over tokio channels.
//!
//! Used by tests and by embedders that run client and processor in one process.
//! Streams cross the channel as complete byte buffers, exactly as they would cross a
//! socket.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use streampack::Stream;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;

use crate::Error;
use crate::Result;
use crate::transport::Adapter;
use crate::transport::Conn;
use crate::transport::ConnConfig;
use crate::transport::ConnStatus;
use crate::transport::OnConn;
use crate::transport::OnError;
use crate::transport::StatusCell;

const CHANNEL_DEPTH: usize = 64;

/// What travels between the two ends of a [`ChannelConn`].
#[derive(Debug)]
enum Wire {
    Data(Vec<u8>),
    Close,
    CloseAck,
}

/// One end of an in-memory connection.
pub struct ChannelConn {
    tx: mpsc::Sender<Wire>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Wire>>,
    status: StatusCell,
    acked: Notify,
    config: ConnConfig,
}

impl ChannelConn {
    /// Creates two connected ends.
    pub fn pair(config: ConnConfig) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_DEPTH);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_DEPTH);
        let a = Self::new(tx_a, rx_b, config.clone());
        let b = Self::new(tx_b, rx_a, config);
        (a, b)
    }

    fn new(tx: mpsc::Sender<Wire>, rx: mpsc::Receiver<Wire>, config: ConnConfig) -> Self {
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            status: StatusCell::new(),
            acked: Notify::new(),
            config,
        }
    }

    fn closed_error() -> Error {
        Error::transport("rpc-conn: connection is closed")
    }

    /// Handles a control message seen while reading. Returns the error the read ends
    /// with.
    async fn on_control(&self, wire: Wire) -> Error {
        match wire {
            Wire::Close => {
                let _ = self.tx.send(Wire::CloseAck).await;
                self.status.set(ConnStatus::Closed);
                debug!("channel conn closed by peer");
            }
            Wire::CloseAck => {
                self.status.set(ConnStatus::Closed);
                self.acked.notify_one();
            }
            Wire::Data(_) => {}
        }
        Self::closed_error()
    }
}

#[async_trait::async_trait]
impl Conn for ChannelConn {
    async fn read_stream(&self, timeout: Duration, size_limit: usize) -> Result<Stream> {
        if self.status.get() != ConnStatus::Running {
            return Err(Self::closed_error());
        }
        let mut rx = self.rx.lock().await;
        let wire = match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => return Err(Error::transport("rpc-conn: read timeout")),
            Ok(None) => {
                self.status.set(ConnStatus::Closed);
                return Err(Self::closed_error());
            }
            Ok(Some(wire)) => wire,
        };
        drop(rx);
        match wire {
            Wire::Data(bytes) if bytes.len() > size_limit => Err(Error::transport(format!(
                "rpc-conn: stream size({}) is over limit({})",
                bytes.len(),
                size_limit
            ))),
            Wire::Data(bytes) => Ok(Stream::from_bytes(&bytes)?),
            control => Err(self.on_control(control).await),
        }
    }

    async fn write_stream(&self, stream: Stream, timeout: Duration) -> Result<()> {
        let bytes = stream.to_bytes();
        stream.release();
        if self.status.get() != ConnStatus::Running {
            return Err(Self::closed_error());
        }
        match tokio::time::timeout(timeout, self.tx.send(Wire::Data(bytes))).await {
            Err(_) => Err(Error::transport("rpc-conn: write timeout")),
            Ok(Err(_)) => {
                self.status.set(ConnStatus::Closed);
                Err(Self::closed_error())
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.status.compare_and_swap(ConnStatus::Running, ConnStatus::Closing) {
            return Err(Self::closed_error());
        }
        if self.tx.send(Wire::Close).await.is_err() {
            self.status.set(ConnStatus::Closed);
            return Ok(());
        }

        let wait_ack = async {
            tokio::select! {
                _ = self.acked.notified() => {}
                _ = async {
                    let mut rx = self.rx.lock().await;
                    while let Some(wire) = rx.recv().await {
                        match wire {
                            Wire::CloseAck | Wire::Close => break,
                            Wire::Data(_) => {}
                        }
                    }
                } => {}
            }
        };
        let acked = tokio::time::timeout(self.config.close_timeout, wait_ack).await;
        self.status.set(ConnStatus::Closed);
        match acked {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::runtime(format!(
                "rpc-conn: close was not acknowledged within {:?}",
                self.config.close_timeout
            ))),
        }
    }

    fn status(&self) -> ConnStatus {
        self.status.get()
    }
}

/// Hands out in-memory connections to whoever calls [`ChannelAdapter::connect`].
pub struct ChannelAdapter {
    connector: mpsc::Sender<ChannelConn>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<ChannelConn>>,
    live: Mutex<Vec<Weak<ChannelConn>>>,
    status: StatusCell,
    shutdown: Notify,
    config: ConnConfig,
}

impl ChannelAdapter {
    pub fn new(config: ConnConfig) -> Self {
        let (connector, incoming) = mpsc::channel(CHANNEL_DEPTH);
        Self {
            connector,
            incoming: tokio::sync::Mutex::new(incoming),
            live: Mutex::new(Vec::new()),
            status: StatusCell::new(),
            shutdown: Notify::new(),
            config,
        }
    }

    /// Opens a connection. The server end goes to the adapter's `on_conn`.
    pub async fn connect(&self) -> Result<ChannelConn> {
        if self.status.get() != ConnStatus::Running {
            return Err(Error::transport("rpc-adapter: adapter is closed"));
        }
        let (client, server) = ChannelConn::pair(self.config.clone());
        self.connector
            .send(server)
            .await
            .map_err(|_| Error::transport("rpc-adapter: adapter is closed"))?;
        Ok(client)
    }
}

#[async_trait::async_trait]
impl Adapter for ChannelAdapter {
    async fn open(&self, on_conn: OnConn, on_error: OnError) {
        let mut incoming = self.incoming.lock().await;
        info!("channel adapter open");
        loop {
            tokio::select! {
                conn = incoming.recv() => {
                    let Some(conn) = conn else { break };
                    let conn = Arc::new(conn);
                    self.live.lock().push(Arc::downgrade(&conn));
                    let conn: Arc<dyn Conn> = conn;
                    on_conn(conn);
                }
                _ = self.shutdown.notified() => break,
            }
        }
        if self.status.get() == ConnStatus::Running {
            on_error(Error::runtime("rpc-adapter: connection source ended unexpectedly"));
        }
        info!("channel adapter closed");
    }

    async fn close(&self, on_error: OnError) {
        if !self.status.compare_and_swap(ConnStatus::Running, ConnStatus::Closing) {
            on_error(Error::runtime("rpc-adapter: adapter is not running"));
            return;
        }
        self.shutdown.notify_one();
        let live: Vec<Arc<ChannelConn>> = self.live.lock().drain(..).filter_map(|w| w.upgrade()).collect();
        for conn in live {
            if conn.status() != ConnStatus::Running {
                continue;
            }
            if let Err(err) = conn.close().await {
                on_error(err);
            }
        }
        self.status.set(ConnStatus::Closed);
    }
}
