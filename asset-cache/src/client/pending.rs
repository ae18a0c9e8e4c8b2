//! In-flight request bookkeeping.
//!
//! At most one request per (operation, key) is on the wire at a time. A
//! duplicate issued while the first is outstanding joins it as an extra
//! waiter; when the response arrives every waiter gets its own completion.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::key::CacheKey;
use crate::protocol::Message;
use crate::value::CacheValue;

/// The kind of client operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum OperationKind {
    Add,
    Get,
    Warm,
}

impl OperationKind {
    /// The operation a request or response message belongs to.
    pub(crate) fn of(message: &Message) -> Self {
        match message {
            Message::AddRequest { .. } | Message::AddResponse { .. } => Self::Add,
            Message::GetRequest { .. } | Message::GetResponse { .. } => Self::Get,
            Message::WarmRequest { .. } | Message::WarmResponse { .. } => Self::Warm,
        }
    }

    /// Builds the request message for this operation.
    pub(crate) fn request(self, key: CacheKey, value: Option<CacheValue>) -> Message {
        match self {
            Self::Add => Message::AddRequest {
                key,
                value: value.unwrap_or_default(),
            },
            Self::Get => Message::GetRequest { key },
            Self::Warm => Message::WarmRequest { key },
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Get => "get",
            Self::Warm => "warm",
        };
        f.write_str(s)
    }
}

/// One outstanding request.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub kind: OperationKind,
    pub key: CacheKey,
    /// Payload of an add, kept for diagnostics.
    pub value: Option<CacheValue>,
    pub created_at: Instant,
    /// Number of accepted calls waiting on this request (at least 1).
    pub waiters: usize,
}

/// Result of registering an operation.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Registration {
    /// A new request; the caller must put it on the wire.
    New,
    /// Joined an outstanding request; nothing to send.
    Coalesced { waiters: usize },
}

/// Outstanding requests keyed by (operation, key).
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    requests: HashMap<(OperationKind, CacheKey), PendingRequest>,
}

impl PendingTable {
    pub(crate) fn register(
        &mut self,
        kind: OperationKind,
        key: CacheKey,
        value: Option<CacheValue>,
        now: Instant,
    ) -> Registration {
        if let Some(existing) = self.requests.get_mut(&(kind, key)) {
            existing.waiters += 1;
            return Registration::Coalesced {
                waiters: existing.waiters,
            };
        }

        self.requests.insert(
            (kind, key),
            PendingRequest {
                kind,
                key,
                value,
                created_at: now,
                waiters: 1,
            },
        );
        Registration::New
    }

    /// Removes and returns the request a response belongs to.
    pub(crate) fn complete(
        &mut self,
        kind: OperationKind,
        key: &CacheKey,
    ) -> Option<PendingRequest> {
        self.requests.remove(&(kind, *key))
    }

    /// Removes and returns every request older than `timeout`.
    pub(crate) fn take_expired(&mut self, now: Instant, timeout: Duration) -> Vec<PendingRequest> {
        let expired: Vec<_> = self
            .requests
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.created_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.requests.remove(&id))
            .collect()
    }

    /// Removes and returns every request.
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.requests.drain().map(|(_, r)| r).collect()
    }

    pub(crate) fn contains(&self, kind: OperationKind, key: &CacheKey) -> bool {
        self.requests.contains_key(&(kind, *key))
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
