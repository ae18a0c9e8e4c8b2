//! TCP connections carrying framed protocol messages.
//!
//! A [`Connection`] owns one socket inside a spawned Tokio task and talks to
//! its owner through two channels:
//!
//! ```text
//!            ConnectionHandle::send()                ChannelEvent
//!   owner ───────────────────────────┐     ┌──────────────────────────► owner
//!                                    ▼     │
//!                        ┌─────────────────┴───────────┐
//!                        │ connection task             │
//!                        │                             │
//!                        │  send queue ──► writer ──►  │── socket
//!                        │  FramedRead<WireCodec> ◄──  │
//!                        └─────────────────────────────┘
//! ```
//!
//! # State Machine
//!
//! ```text
//! Connecting ──connect ok──► Open ──close()──► Closing ──flushed──► Closed
//!     │                        │
//!     └──────── error ─────────┴──────────────────────────────────► Closed
//! ```
//!
//! Every connection emits exactly one [`ChannelEvent::Closed`], preceded by
//! [`ChannelEvent::Opened`] only if the socket was actually established.
//! Events carry the [`ConnectionId`] so owners that replace a connection can
//! ignore stragglers from the old one.

mod session;
mod state;

pub use session::{Connection, ConnectionHandle};
pub use state::ConnectionState;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{CodecError, Message, DEFAULT_MAX_FRAME_SIZE};

/// Default timeout for establishing a TCP connection (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default time allowed to flush queued frames on close (2 seconds).
pub const DEFAULT_CLOSE_FLUSH_TIMEOUT_SECS: u64 = 2;

/// Errors returned by [`ConnectionHandle::send`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection is closing or closed.
    #[error("not connected")]
    NotConnected,

    /// The message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Process-unique connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric id.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a connection reached `Closed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner called `close()`.
    LocalClose,
    /// The peer closed the stream.
    PeerClosed,
    /// The TCP connect failed or timed out.
    ConnectFailed(String),
    /// A socket error occurred mid-session.
    Io(String),
    /// The peer sent bytes that are not a valid frame.
    CorruptFrame(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalClose => write!(f, "closed locally"),
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::CorruptFrame(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

/// Notifications from a connection to its owner.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The socket is established and the send queue is draining.
    Opened { id: ConnectionId },

    /// A complete message arrived.
    PacketReceived { id: ConnectionId, message: Message },

    /// The connection is closed. Always the final event.
    Closed { id: ConnectionId, reason: CloseReason },
}

impl ChannelEvent {
    /// The connection that produced this event.
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Opened { id } | Self::PacketReceived { id, .. } | Self::Closed { id, .. } => *id,
        }
    }
}

/// Connection tuning.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Timeout for the TCP connect.
    pub connect_timeout: Duration,

    /// Time allowed to flush queued frames when closing.
    pub close_flush_timeout: Duration,

    /// Largest accepted frame body in bytes.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            close_flush_timeout: Duration::from_secs(DEFAULT_CLOSE_FLUSH_TIMEOUT_SECS),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the close flush timeout.
    pub fn with_close_flush_timeout(mut self, timeout: Duration) -> Self {
        self.close_flush_timeout = timeout;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}
