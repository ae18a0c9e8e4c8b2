//! The client's event loop task.
//!
//! All state transitions driven by the network (resolution results,
//! connection events, responses, timeouts) happen here, and every listener
//! callback for one client is delivered from this task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::handle::{fail_request, Inner, LoopEvent, Notification, Shared};
use super::listener::FetchStatus;
use super::pending::OperationKind;
use super::ClientState;
use crate::connection::{ChannelEvent, CloseReason, Connection, ConnectionHandle};
use crate::protocol::Message;
use crate::resolver::ResolveError;

pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    loop_rx: mpsc::UnboundedReceiver<LoopEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl EventLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        loop_rx: mpsc::UnboundedReceiver<LoopEvent>,
        channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            shared,
            loop_rx,
            channel_rx,
        }
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// `Shared` owns both senders, so neither receiver ever yields `None`
    /// while the loop is alive.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        let period = self
            .shared
            .config
            .timeout_check_interval
            .max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("Cache client event loop started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(event) = self.loop_rx.recv() => self.handle_loop_event(event),

                Some(event) = self.channel_rx.recv() => self.handle_channel_event(event),

                _ = ticker.tick() => self.handle_tick(Instant::now()),
            }
        }

        // Deliver what the handle posted before shutdown, then fail the rest.
        while let Ok(event) = self.loop_rx.try_recv() {
            if let LoopEvent::Notify(notes) = event {
                self.shared.dispatch(notes);
            }
        }
        let notes = {
            let mut inner = self.shared.inner.lock();
            inner.shut_down = true;
            inner.teardown(self.shared.config.notify_warm_up)
        };
        self.shared.dispatch(notes);

        debug!("Cache client event loop stopped");
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    fn handle_loop_event(&self, event: LoopEvent) {
        match event {
            LoopEvent::Notify(notes) => self.shared.dispatch(notes),
            LoopEvent::Resolved { session, result } => {
                let notes = self.on_resolved(session, result);
                self.shared.dispatch(notes);
            }
        }
    }

    fn on_resolved(
        &self,
        session: u64,
        result: Result<SocketAddr, ResolveError>,
    ) -> Vec<Notification> {
        let mut inner = self.shared.inner.lock();
        if inner.session != session || inner.state != ClientState::Resolving {
            debug!(session, "Ignoring stale address resolution");
            return Vec::new();
        }
        inner.resolve_task = None;

        let addr = match result {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "Failed to resolve cache server address");
                return inner.teardown(self.shared.config.notify_warm_up);
            }
        };

        info!(address = %addr, "Cache server address resolved");
        let connection = Connection::open(
            addr,
            &self.shared.config.connection,
            self.shared.channel_tx.clone(),
        );
        inner.state = ClientState::Connecting;
        inner.connection = Some(connection);
        vec![Notification::StateChanged(ClientState::Connecting)]
    }

    fn handle_channel_event(&self, event: ChannelEvent) {
        let notes = {
            let mut inner = self.shared.inner.lock();
            let current = inner.connection.as_ref().map(ConnectionHandle::id);
            if current != Some(event.id()) {
                trace!(connection = %event.id(), "Ignoring event from replaced connection");
                return;
            }

            match event {
                ChannelEvent::Opened { id } => {
                    if inner.state == ClientState::Connecting {
                        info!(connection = %id, "Connected to cache server");
                        inner.state = ClientState::Connected;
                        inner.last_activity = Instant::now();
                        let mut notes = vec![Notification::StateChanged(ClientState::Connected)];
                        self.flush_outbox(&mut inner, &mut notes);
                        notes
                    } else {
                        Vec::new()
                    }
                }
                ChannelEvent::PacketReceived { message, .. } => {
                    inner.last_activity = Instant::now();
                    self.on_message(&mut inner, message)
                }
                ChannelEvent::Closed { id, reason } => {
                    inner.connection = None;
                    match reason {
                        CloseReason::LocalClose => {
                            info!(connection = %id, "Cache server connection closed")
                        }
                        reason => {
                            warn!(
                                connection = %id,
                                reason = %reason,
                                "Cache server connection lost"
                            )
                        }
                    }
                    inner.teardown(self.shared.config.notify_warm_up)
                }
            }
        };
        self.shared.dispatch(notes);
    }

    /// Sends requests accepted before the connection opened, in order.
    fn flush_outbox(&self, inner: &mut Inner, notes: &mut Vec<Notification>) {
        let outbox = std::mem::take(&mut inner.outbox);
        if outbox.is_empty() {
            return;
        }
        debug!(count = outbox.len(), "Flushing requests queued before connect");
        let Some(connection) = inner.connection.clone() else {
            return;
        };
        for message in outbox {
            if let Err(e) = connection.send(&message) {
                let kind = OperationKind::of(&message);
                if let Some(request) = inner.pending.complete(kind, message.key()) {
                    let notify_warm_up = self.shared.config.notify_warm_up;
                    fail_request(request, &e.to_string(), notify_warm_up, notes);
                }
            }
        }
    }

    /// Matches a response against the pending table and fans it out.
    fn on_message(&self, inner: &mut Inner, message: Message) -> Vec<Notification> {
        let kind = match &message {
            Message::AddResponse { .. }
            | Message::GetResponse { .. }
            | Message::WarmResponse { .. } => {
                OperationKind::of(&message)
            }
            other => {
                debug!(
                    message_type = %other.message_type(),
                    key = %other.key(),
                    "Ignoring request sent by server"
                );
                return Vec::new();
            }
        };
        let key = *message.key();

        let Some(request) = inner.pending.complete(kind, &key) else {
            debug!(operation = %kind, key = %key, "Discarding unmatched response");
            return Vec::new();
        };
        let waiters = request.waiters;
        let mut notes = Vec::with_capacity(waiters);

        match message {
            Message::AddResponse { added, .. } => {
                debug!(key = %key, added, waiters, "Add completed");
                notes.extend((0..waiters).map(|_| Notification::Added { key, added }));
            }
            Message::GetResponse { value, .. } => {
                let status = if value.is_some() {
                    FetchStatus::Found
                } else {
                    FetchStatus::NotFound
                };
                let value = value.unwrap_or_default();
                debug!(
                    key = %key,
                    status = %status,
                    blobs = value.len(),
                    bytes = value.size(),
                    waiters,
                    "Fetch completed"
                );
                for _ in 0..waiters {
                    notes.push(Notification::Received {
                        key,
                        status,
                        value: value.clone(),
                    });
                }
            }
            Message::WarmResponse { success, .. } => {
                debug!(key = %key, success, "Warm-up completed");
                if self.shared.config.notify_warm_up {
                    notes.extend((0..waiters).map(|_| Notification::Warmed { key, success }));
                }
            }
            _ => {}
        }
        notes
    }

    fn handle_tick(&self, now: Instant) {
        let config = &self.shared.config;
        let notes = {
            let mut inner = self.shared.inner.lock();
            let mut notes = Vec::new();

            for request in inner.pending.take_expired(now, config.request_timeout) {
                fail_request(request, "timed out", config.notify_warm_up, &mut notes);
            }
            if !notes.is_empty() {
                // keep expired requests off the wire if still resolving
                let Inner {
                    outbox, pending, ..
                } = &mut *inner;
                outbox.retain(|m| pending.contains(OperationKind::of(m), m.key()));
            }

            if let Some(idle) = config.idle_timeout {
                if inner.state == ClientState::Connected
                    && inner.pending.is_empty()
                    && now.saturating_duration_since(inner.last_activity) >= idle
                {
                    info!(idle_secs = idle.as_secs(), "Closing idle cache server connection");
                    notes.extend(inner.teardown(config.notify_warm_up));
                }
            }
            notes
        };
        self.shared.dispatch(notes);
    }
}
