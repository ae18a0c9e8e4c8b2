//! The public client handle and the state it shares with its event loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ClientConfig;
use super::event_loop::EventLoop;
use super::listener::{ClientListener, FetchStatus, ListenerSet};
use super::pending::{OperationKind, PendingRequest, PendingTable, Registration};
use super::{ClientError, ClientState};
use crate::connection::{ChannelEvent, ConnectionHandle};
use crate::key::CacheKey;
use crate::protocol::{Message, WireCodec};
use crate::resolver::{AddressResolver, ResolveError};
use crate::value::CacheValue;

// =============================================================================
// Loop plumbing
// =============================================================================

/// A listener callback waiting to be delivered on the loop task.
#[derive(Debug)]
pub(crate) enum Notification {
    StateChanged(ClientState),
    Added {
        key: CacheKey,
        added: bool,
    },
    Received {
        key: CacheKey,
        status: FetchStatus,
        value: CacheValue,
    },
    Warmed {
        key: CacheKey,
        success: bool,
    },
}

/// Work posted to the loop by the handle and by the resolver task.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    /// Resolution for connect attempt `session` finished.
    Resolved {
        session: u64,
        result: Result<SocketAddr, ResolveError>,
    },
    /// Notifications produced outside the loop.
    Notify(Vec<Notification>),
}

/// Mutable client state, guarded by one lock.
pub(crate) struct Inner {
    pub state: ClientState,
    /// Incremented by every `connect()`; stale resolutions are ignored.
    pub session: u64,
    pub connection: Option<ConnectionHandle>,
    /// Requests accepted before the connection opened, sent once it does.
    pub outbox: Vec<Message>,
    pub pending: PendingTable,
    pub last_activity: Instant,
    pub resolve_task: Option<JoinHandle<()>>,
    pub shut_down: bool,
}

impl Inner {
    /// Drops the connection and the resolution, failing all pending work.
    ///
    /// Returns the notifications to deliver; the state change is included
    /// only when the state actually changed.
    pub(crate) fn teardown(&mut self, notify_warm_up: bool) -> Vec<Notification> {
        if let Some(task) = self.resolve_task.take() {
            task.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.outbox.clear();

        let mut notes = Vec::new();
        for request in self.pending.drain() {
            fail_request(request, "disconnected", notify_warm_up, &mut notes);
        }
        if self.state != ClientState::Disconnected {
            self.state = ClientState::Disconnected;
            notes.push(Notification::StateChanged(ClientState::Disconnected));
        }
        notes
    }
}

/// Appends one failure completion per waiter of `request`.
pub(crate) fn fail_request(
    request: PendingRequest,
    cause: &str,
    notify_warm_up: bool,
    notes: &mut Vec<Notification>,
) {
    warn!(
        operation = %request.kind,
        key = %request.key,
        waiters = request.waiters,
        bytes = request.value.as_ref().map_or(0, CacheValue::size),
        age_ms = request.created_at.elapsed().as_millis() as u64,
        cause,
        "Cache request failed"
    );
    let key = request.key;
    for _ in 0..request.waiters {
        match request.kind {
            OperationKind::Add => notes.push(Notification::Added { key, added: false }),
            OperationKind::Get => notes.push(Notification::Received {
                key,
                status: FetchStatus::Failed,
                value: CacheValue::new(),
            }),
            OperationKind::Warm if notify_warm_up => {
                notes.push(Notification::Warmed {
                    key,
                    success: false,
                })
            }
            OperationKind::Warm => {}
        }
    }
}

/// State shared by the handle and the loop task.
pub(crate) struct Shared {
    pub inner: Mutex<Inner>,
    pub listeners: ListenerSet,
    pub config: ClientConfig,
    pub resolver: AddressResolver,
    pub codec: WireCodec,
    pub loop_tx: mpsc::UnboundedSender<LoopEvent>,
    pub channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    pub runtime: Handle,
}

impl Shared {
    /// Queues notifications for delivery on the loop task.
    pub(crate) fn post(&self, notes: Vec<Notification>) {
        if !notes.is_empty() {
            let _ = self.loop_tx.send(LoopEvent::Notify(notes));
        }
    }

    /// Delivers notifications to a fresh listener snapshot each.
    pub(crate) fn dispatch(&self, notes: Vec<Notification>) {
        for note in notes {
            for listener in self.listeners.snapshot() {
                match &note {
                    Notification::StateChanged(state) => listener.on_state_changed(*state),
                    Notification::Added { key, added } => listener.on_added_to_cache(key, *added),
                    Notification::Received { key, status, value } => {
                        listener.on_received_from_cache(key, *status, value.clone())
                    }
                    Notification::Warmed { key, success } => listener.on_warmed_up(key, *success),
                }
            }
        }
    }
}

// =============================================================================
// CacheClient
// =============================================================================

/// Client for a remote asset cache server.
///
/// All methods return immediately. Outcomes are delivered to every
/// registered [`ClientListener`] from the client's event loop task.
/// Dropping the client stops the loop and fails outstanding work.
pub struct CacheClient {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CacheClient {
    /// Creates a disconnected client and spawns its event loop on the
    /// current Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let resolver = AddressResolver::new(config.resolve.clone());
        Self::with_resolver(config, resolver)
    }

    /// Creates a client that resolves server addresses with `resolver`.
    pub fn with_resolver(
        config: ClientConfig,
        resolver: AddressResolver,
    ) -> Result<Self, ClientError> {
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ClientState::Disconnected,
                session: 0,
                connection: None,
                outbox: Vec::new(),
                pending: PendingTable::default(),
                last_activity: Instant::now(),
                resolve_task: None,
                shut_down: false,
            }),
            listeners: ListenerSet::default(),
            resolver,
            codec: WireCodec::new(config.connection.max_frame_size),
            config,
            loop_tx,
            channel_tx,
            runtime: runtime.clone(),
        });

        let shutdown = CancellationToken::new();
        let event_loop = EventLoop::new(Arc::clone(&shared), loop_rx, channel_rx);
        let task = runtime.spawn(event_loop.run(shutdown.clone()));

        Ok(Self {
            shared,
            shutdown,
            task: Some(task),
        })
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    /// Registers a listener. Registering the same listener twice has no effect.
    pub fn add_listener(&self, listener: Arc<dyn ClientListener>) {
        self.shared.listeners.add(listener);
    }

    /// Unregisters a listener; returns `true` if it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ClientListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    // -------------------------------------------------------------------------
    // Connection management
    // -------------------------------------------------------------------------

    /// Starts connecting to `host:port`.
    ///
    /// Returns `false` only for invalid input (empty host, port 0) or a shut
    /// down client. Any existing connection is dropped first and its pending
    /// work fails. Progress is reported through `on_state_changed`.
    pub fn connect(&self, host: &str, port: u16) -> bool {
        let host = host.trim();
        if host.is_empty() || port == 0 {
            debug!(host, port, "Rejecting connect to invalid address");
            return false;
        }

        let mut inner = self.shared.inner.lock();
        if inner.shut_down {
            return false;
        }

        let mut notes = Vec::new();
        if let Some(task) = inner.resolve_task.take() {
            task.abort();
        }
        if let Some(connection) = inner.connection.take() {
            debug!(connection = %connection.id(), "Replacing existing connection");
            connection.close();
        }
        inner.outbox.clear();
        for request in inner.pending.drain() {
            fail_request(request, "reconnecting", self.shared.config.notify_warm_up, &mut notes);
        }

        inner.session += 1;
        inner.state = ClientState::Resolving;
        notes.push(Notification::StateChanged(ClientState::Resolving));
        // queued ahead of the resolution result, which shares the channel
        self.shared.post(notes);

        let session = inner.session;
        let resolver = self.shared.resolver.clone();
        let loop_tx = self.shared.loop_tx.clone();
        let host_owned = host.to_string();
        inner.resolve_task = Some(self.shared.runtime.spawn(async move {
            let result = resolver.resolve(&host_owned, port).await;
            let _ = loop_tx.send(LoopEvent::Resolved { session, result });
        }));

        info!(host, port, "Connecting to cache server");
        true
    }

    /// Closes the connection and fails all pending operations.
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        let notes = inner.teardown(self.shared.config.notify_warm_up);
        if !notes.is_empty() {
            info!("Disconnected from cache server");
        }
        self.shared.post(notes);
    }

    /// Returns `true` while connected to the server.
    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        self.shared.inner.lock().state
    }

    /// Number of distinct requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    // -------------------------------------------------------------------------
    // Cache operations
    // -------------------------------------------------------------------------

    /// Stores `value` under `key` on the server.
    ///
    /// Returns `true` if accepted; completion arrives via `on_added_to_cache`.
    pub fn add_to_cache(&self, key: CacheKey, value: &CacheValue) -> bool {
        self.submit(OperationKind::Add, key, Some(value))
    }

    /// Fetches the value stored under `key`.
    ///
    /// Returns `true` if accepted; completion arrives via
    /// `on_received_from_cache`.
    pub fn request_from_cache(&self, key: CacheKey) -> bool {
        self.submit(OperationKind::Get, key, None)
    }

    /// Hints the server to keep `key` warm.
    ///
    /// Returns `true` if accepted. The outcome is logged and reaches
    /// listeners only when `notify_warm_up` is configured.
    pub fn warming_up(&self, key: CacheKey) -> bool {
        self.submit(OperationKind::Warm, key, None)
    }

    fn submit(&self, kind: OperationKind, key: CacheKey, value: Option<&CacheValue>) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.shut_down || inner.state == ClientState::Disconnected {
            debug!(operation = %kind, key = %key, "Rejecting operation while disconnected");
            return false;
        }

        let now = Instant::now();
        if let Registration::Coalesced { waiters } =
            inner.pending.register(kind, key, value.cloned(), now)
        {
            debug!(operation = %kind, key = %key, waiters, "Coalesced with pending request");
            return true;
        }

        let message = kind.request(key, value.cloned());
        // held in the outbox until the connection opens
        let connected = inner.state == ClientState::Connected;
        let result = match inner.connection.as_ref().filter(|_| connected) {
            Some(connection) => connection.send(&message).map_err(|e| e.to_string()),
            None => match self.shared.codec.encode(&message) {
                Ok(_) => {
                    inner.outbox.push(message);
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            },
        };

        match result {
            Ok(()) => {
                inner.last_activity = now;
                debug!(operation = %kind, key = %key, state = %inner.state, "Request accepted");
                true
            }
            Err(e) => {
                inner.pending.complete(kind, &key);
                warn!(operation = %kind, key = %key, error = %e, "Failed to send request");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Stops the event loop after failing pending work and notifying
    /// listeners, then waits for it to exit.
    pub async fn shutdown(mut self) {
        self.shared.inner.lock().shut_down = true;
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CacheClient {
    fn drop(&mut self) {
        self.shared.inner.lock().shut_down = true;
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("CacheClient")
            .field("state", &inner.state)
            .field("pending", &inner.pending.len())
            .field("listeners", &self.shared.listeners.len())
            .finish()
    }
}
