//! Listener interface and the broadcast set behind it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::ClientState;
use crate::key::CacheKey;
use crate::value::CacheValue;

/// Outcome accompanying every `on_received_from_cache` callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStatus {
    /// The server returned a value (which may legitimately be empty).
    Found,
    /// The server answered that the key is not cached.
    NotFound,
    /// No answer: the connection closed or the request timed out.
    Failed,
}

impl FetchStatus {
    /// Returns `true` for [`FetchStatus::Found`].
    pub fn is_found(self) -> bool {
        self == Self::Found
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Found => "found",
            Self::NotFound => "not found",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Observer of cache client events.
///
/// Every registered listener sees every event, whoever issued the
/// operation. Callbacks run on the client's event loop task, one at a time,
/// and must not block. All methods default to no-ops.
pub trait ClientListener: Send + Sync {
    /// The connection state changed.
    fn on_state_changed(&self, _state: ClientState) {}

    /// An add completed. `added` is `false` if the server refused the value
    /// or no answer arrived.
    fn on_added_to_cache(&self, _key: &CacheKey, _added: bool) {}

    /// A fetch completed. `value` is empty unless `status` is `Found`.
    fn on_received_from_cache(&self, _key: &CacheKey, _status: FetchStatus, _value: CacheValue) {}

    /// A warm-up hint completed. Only called when the client is configured
    /// with `notify_warm_up`.
    fn on_warmed_up(&self, _key: &CacheKey, _success: bool) {}
}

/// Registered listeners.
///
/// Dispatch iterates a snapshot, so listeners may register or unregister
/// (themselves or others) from inside a callback.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ClientListener>>>,
}

impl ListenerSet {
    /// Adds a listener. Adding the same listener twice has no effect.
    pub(crate) fn add(&self, listener: Arc<dyn ClientListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Removes a listener; returns `true` if it was registered.
    pub(crate) fn remove(&self, listener: &Arc<dyn ClientListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn ClientListener>> {
        self.listeners.read().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

// Compare data pointers only; vtable pointers for the same type may differ
// between codegen units.
fn same_listener(a: &Arc<dyn ClientListener>, b: &Arc<dyn ClientListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
