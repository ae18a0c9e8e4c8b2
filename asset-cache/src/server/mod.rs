//! Asset cache server.
//!
//! The peer that [`CacheClient`](crate::client::CacheClient) talks to. Each
//! accepted socket is driven by a [`Connection`] and answered by its own task,
//! one request at a time in arrival order. Values live in a size-bounded
//! [`CacheStorage`].
//!
//! ```text
//!                  ┌──────────────┐
//!   TcpListener ──►│ accept loop  │──► Connection::accept ──► connection task
//!                  └──────┬───────┘                               │
//!                         │ CancellationToken                     ▼
//!                         ▼                                 CacheStorage (moka)
//!                    shutdown()                             ServerStats
//! ```

mod handler;
mod stats;
mod storage;

pub use stats::{ServerStats, StatsSnapshot};
pub use storage::CacheStorage;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ChannelEvent, Connection, ConnectionConfig, ConnectionHandle};

// =============================================================================
// Configuration
// =============================================================================

/// Default listening port.
pub const DEFAULT_PORT: u16 = 44234;

/// Default storage budget (2 GB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks a free port.
    pub bind: SocketAddr,

    /// Storage budget in bytes.
    pub max_size_bytes: u64,

    /// Optional time-to-live for stored values.
    pub ttl: Option<Duration>,

    /// Settings for accepted connections.
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            ttl: None,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the listening address.
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Set the storage budget.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Set the value time-to-live.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the connection settings.
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}

/// Errors starting a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Other socket failure.
    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
}

// =============================================================================
// Server
// =============================================================================

/// A running cache server.
///
/// Dropping the server stops accepting; [`shutdown`](Self::shutdown) also
/// waits for open connections to close.
pub struct CacheServer {
    local_addr: SocketAddr,
    storage: Arc<CacheStorage>,
    stats: Arc<ServerStats>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CacheServer {
    /// Binds the listening socket and starts the accept loop.
    pub async fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let storage = Arc::new(CacheStorage::new(config.max_size_bytes, config.ttl));
        let stats = Arc::new(ServerStats::default());
        let shutdown = CancellationToken::new();

        info!(
            address = %local_addr,
            max_size = config.max_size_bytes,
            ttl_secs = config.ttl.map(|t| t.as_secs()),
            "Cache server listening"
        );

        let task = tokio::spawn(accept_loop(
            listener,
            config.connection,
            Arc::clone(&storage),
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        Ok(Self {
            local_addr,
            storage,
            stats,
            shutdown,
            task: Some(task),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The value store.
    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats
            .snapshot(self.storage.entry_count(), self.storage.size_bytes())
    }

    /// Stops accepting, closes every connection and waits for them to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.storage.run_pending_tasks().await;
        info!(stats = %self.stats(), "Cache server stopped");
    }
}

impl Drop for CacheServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ConnectionConfig,
    storage: Arc<CacheStorage>,
    stats: Arc<ServerStats>,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    stats.connection_opened();
                    let (events_tx, events_rx) = mpsc::unbounded_channel();
                    let connection = Connection::accept(stream, peer, &config, events_tx);
                    info!(connection = %connection.id(), peer = %peer, "Client connected");
                    connections.spawn(serve_connection(
                        connection,
                        events_rx,
                        Arc::clone(&storage),
                        Arc::clone(&stats),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
        }
    }

    debug!(open = connections.len(), "Closing client connections");
    while connections.join_next().await.is_some() {}
}

/// Answers requests on one connection until it closes.
async fn serve_connection(
    connection: ConnectionHandle,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    storage: Arc<CacheStorage>,
    stats: Arc<ServerStats>,
    shutdown: CancellationToken,
) {
    let mut closing = false;

    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown.cancelled(), if !closing => {
                closing = true;
                connection.close();
                continue;
            }

            event = events.recv() => event,
        };

        match event {
            Some(ChannelEvent::Opened { .. }) => {}
            Some(ChannelEvent::PacketReceived { message, .. }) => {
                if let Some(reply) = handler::answer(message, &storage, &stats).await {
                    if let Err(e) = connection.send(&reply) {
                        debug!(connection = %connection.id(), error = %e, "Dropping reply");
                    }
                }
            }
            Some(ChannelEvent::Closed { reason, .. }) => {
                info!(connection = %connection.id(), reason = %reason, "Client disconnected");
                break;
            }
            None => break,
        }
    }

    stats.connection_closed();
}
