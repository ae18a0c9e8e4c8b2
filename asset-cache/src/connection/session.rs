//! The per-connection task and the handle used to drive it.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::state::{AtomicState, ConnectionState};
use super::{ChannelEvent, CloseReason, ConnectionConfig, ConnectionError, ConnectionId};
use crate::protocol::{CodecError, Message, WireCodec};

/// Owner-side handle to a connection task.
///
/// Cloning the handle is cheap; all clones refer to the same connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    state: Arc<AtomicState>,
    queue: mpsc::UnboundedSender<Bytes>,
    close: CancellationToken,
    codec: WireCodec,
}

impl ConnectionHandle {
    /// The connection id carried by its events.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Returns `true` once the socket is established and not closing.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Encodes `message` and appends it to the send queue.
    ///
    /// Messages sent while still connecting are held until the socket opens.
    /// The queue drains in FIFO order as the socket becomes writable.
    pub fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        if !self.state().accepts_sends() {
            return Err(ConnectionError::NotConnected);
        }
        let frame = self.codec.encode(message)?;
        trace!(
            connection = %self.id,
            message_type = %message.message_type(),
            key = %message.key(),
            bytes = frame.len(),
            "Queued frame"
        );
        self.queue
            .send(frame)
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Requests an orderly close.
    ///
    /// Returns immediately; queued frames are flushed best-effort and the
    /// owner receives [`ChannelEvent::Closed`] when the socket is gone.
    pub fn close(&self) {
        if self.state.begin_close() {
            debug!(connection = %self.id, peer = %self.peer, "Closing connection");
        }
        self.close.cancel();
    }
}

/// Connection constructors.
pub struct Connection;

impl Connection {
    /// Starts connecting to `addr` in a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        addr: SocketAddr,
        config: &ConnectionConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ConnectionHandle {
        let (handle, task) = Self::prepare(addr, ConnectionState::Connecting, config, events);
        tokio::spawn(task.run_outgoing());
        handle
    }

    /// Adopts an accepted socket; the connection starts `Open`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        config: &ConnectionConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ConnectionHandle {
        let (handle, task) = Self::prepare(peer, ConnectionState::Open, config, events);
        tokio::spawn(task.run_accepted(stream));
        handle
    }

    fn prepare(
        peer: SocketAddr,
        initial: ConnectionState,
        config: &ConnectionConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> (ConnectionHandle, ConnectionTask) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicState::new(initial));
        let close = CancellationToken::new();
        let codec = WireCodec::new(config.max_frame_size);
        let id = ConnectionId::next();

        let handle = ConnectionHandle {
            id,
            peer,
            state: Arc::clone(&state),
            queue: queue_tx,
            close: close.clone(),
            codec: codec.clone(),
        };
        let task = ConnectionTask {
            id,
            peer,
            state,
            queue: queue_rx,
            close,
            codec,
            config: config.clone(),
            events,
        };
        (handle, task)
    }
}

/// State owned by the spawned connection task.
struct ConnectionTask {
    id: ConnectionId,
    peer: SocketAddr,
    state: Arc<AtomicState>,
    queue: mpsc::UnboundedReceiver<Bytes>,
    close: CancellationToken,
    codec: WireCodec,
    config: ConnectionConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ConnectionTask {
    async fn run_outgoing(self) {
        debug!(connection = %self.id, peer = %self.peer, "Connecting");

        let connect =
            tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(self.peer));
        let stream = tokio::select! {
            biased;

            _ = self.close.cancelled() => {
                self.finish(CloseReason::LocalClose);
                return;
            }

            result = connect => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    self.finish(CloseReason::ConnectFailed(e.to_string()));
                    return;
                }
                Err(_) => {
                    let reason = format!(
                        "timed out after {}ms",
                        self.config.connect_timeout.as_millis()
                    );
                    self.finish(CloseReason::ConnectFailed(reason));
                    return;
                }
            },
        };

        // close() may have raced the connect; only announce a live socket.
        if self.state.transition(ConnectionState::Connecting, ConnectionState::Open) {
            debug!(connection = %self.id, peer = %self.peer, "Connection opened");
            let _ = self.events.send(ChannelEvent::Opened { id: self.id });
        }
        self.run_session(stream).await;
    }

    async fn run_accepted(self, stream: TcpStream) {
        debug!(connection = %self.id, peer = %self.peer, "Connection accepted");
        let _ = self.events.send(ChannelEvent::Opened { id: self.id });
        self.run_session(stream).await;
    }

    async fn run_session(mut self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(connection = %self.id, error = %e, "Failed to set TCP_NODELAY");
        }
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, self.codec.clone());

        let id = self.id;
        let events = &self.events;
        let read_loop = async {
            loop {
                match reader.next().await {
                    Some(Ok(message)) => {
                        trace!(
                            connection = %id,
                            message_type = %message.message_type(),
                            key = %message.key(),
                            "Received frame"
                        );
                        let _ = events.send(ChannelEvent::PacketReceived { id, message });
                    }
                    Some(Err(CodecError::Io(e))) => return CloseReason::Io(e.to_string()),
                    Some(Err(e)) => return CloseReason::CorruptFrame(e.to_string()),
                    None => return CloseReason::PeerClosed,
                }
            }
        };

        let write_loop = write_frames(
            &mut write_half,
            &mut self.queue,
            &self.close,
            &self.state,
            &self.config,
        );

        let reason = tokio::select! {
            reason = read_loop => reason,
            reason = write_loop => reason,
        };

        if let CloseReason::CorruptFrame(ref msg) = reason {
            warn!(
                connection = %self.id,
                peer = %self.peer,
                error = %msg,
                "Dropping connection after corrupt frame"
            );
        }
        self.finish(reason);
    }

    fn finish(&self, reason: CloseReason) {
        self.state.store(ConnectionState::Closed);
        debug!(connection = %self.id, peer = %self.peer, reason = %reason, "Connection closed");
        let _ = self.events.send(ChannelEvent::Closed {
            id: self.id,
            reason,
        });
    }
}

/// Drains the send queue until close is requested or the socket fails.
async fn write_frames(
    writer: &mut OwnedWriteHalf,
    queue: &mut mpsc::UnboundedReceiver<Bytes>,
    close: &CancellationToken,
    state: &AtomicState,
    config: &ConnectionConfig,
) -> CloseReason {
    loop {
        tokio::select! {
            biased;

            _ = close.cancelled() => break,

            frame = queue.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = writer.write_all(&frame).await {
                        return CloseReason::Io(e.to_string());
                    }
                }
                // every handle dropped: nobody left to talk for
                None => break,
            },
        }
    }

    state.begin_close();
    let flush = async {
        while let Ok(frame) = queue.try_recv() {
            writer.write_all(&frame).await?;
        }
        writer.shutdown().await
    };
    match tokio::time::timeout(config.close_flush_timeout, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Flush on close failed"),
        Err(_) => debug!("Flush on close timed out"),
    }
    CloseReason::LocalClose
}
