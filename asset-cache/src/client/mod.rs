//! Asset cache client.
//!
//! The [`CacheClient`] is the component build tools talk to. It resolves the
//! server address, owns one [`Connection`](crate::connection::Connection),
//! tracks in-flight requests and broadcasts every outcome to all registered
//! [`ClientListener`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          CacheClient                             │
//! │                                                                  │
//! │  add_to_cache ──┐                                                │
//! │  request_from ──┼──► PendingTable ──► outbox / ConnectionHandle  │
//! │  warming_up ────┘    (coalescing)                                │
//! │                                                                  │
//! │  event loop task:                                                │
//! │    AddressResolver ──► Resolved ──► Connection::open             │
//! │    ChannelEvent    ──► match pending ──► notifications           │
//! │    tick            ──► timeouts, idle close                      │
//! │                                                                  │
//! │  notifications ──► ListenerSet snapshot ──► ClientListener(s)    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──► Resolving ──resolved──► Connecting ──opened──► Connected
//!      ▲                          │                       │                     │
//!      └──── resolve failed ──────┴──── connect failed ───┴── closed / idle ────┘
//! ```
//!
//! `connect()` re-enters `Resolving` from any state. Every accepted operation
//! gets exactly one completion: a response, a timeout or a disconnect.
//! Operations are accepted while `Resolving` and `Connecting`; they wait in
//! an outbox and go out in order once the connection opens.
//!
//! # Example
//!
//! ```ignore
//! use asset_cache::client::{CacheClient, ClientConfig, ClientListener};
//!
//! let client = CacheClient::new(ClientConfig::default())?;
//! client.add_listener(Arc::new(MyListener));
//! client.connect("cache.local", 44234);
//! client.request_from_cache(key);
//! ```

mod config;
mod event_loop;
mod handle;
mod listener;
mod pending;

pub use config::{ClientConfig, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TIMEOUT_CHECK_INTERVAL_MS};
pub use handle::CacheClient;
pub use listener::{ClientListener, FetchStatus};

use std::fmt;

use thiserror::Error;

/// Connection state reported to listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// No connection and no resolution in progress.
    Disconnected,
    /// Resolving the server address.
    Resolving,
    /// Address resolved; TCP connect in progress.
    Connecting,
    /// Connected to the server.
    Connected,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Errors from constructing a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// `CacheClient::new` was called outside a Tokio runtime.
    #[error("cache client requires a Tokio runtime")]
    NoRuntime,
}
