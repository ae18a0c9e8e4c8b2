//! Integration tests for the cache client against real and scripted servers.
//!
//! The scripted peers speak the wire protocol directly over TCP so tests can
//! control exactly what the client sees: delayed replies, silence, dropped
//! sockets and unsolicited responses.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use asset_cache::protocol::{Message, WireCodec};
use asset_cache::{
    CacheClient, CacheKey, CacheServer, CacheValue, ClientConfig, ClientListener, ClientState,
    FetchStatus, ServerConfig,
};

// =============================================================================
// Test Helpers
// =============================================================================

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq)]
enum Event {
    State(ClientState),
    Added(CacheKey, bool),
    Received(CacheKey, FetchStatus, CacheValue),
    Warmed(CacheKey, bool),
}

struct Recorder(mpsc::UnboundedSender<Event>);

impl ClientListener for Recorder {
    fn on_state_changed(&self, state: ClientState) {
        let _ = self.0.send(Event::State(state));
    }

    fn on_added_to_cache(&self, key: &CacheKey, added: bool) {
        let _ = self.0.send(Event::Added(*key, added));
    }

    fn on_received_from_cache(&self, key: &CacheKey, status: FetchStatus, value: CacheValue) {
        let _ = self.0.send(Event::Received(*key, status, value));
    }

    fn on_warmed_up(&self, key: &CacheKey, success: bool) {
        let _ = self.0.send(Event::Warmed(*key, success));
    }
}

type Events = mpsc::UnboundedReceiver<Event>;

async fn next_event(events: &mut Events) -> Event {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for listener event")
        .expect("listener channel closed")
}

async fn expect_silence(events: &mut Events, window: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(window, events.recv()).await {
        panic!("unexpected listener event: {:?}", event);
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn start_server() -> CacheServer {
    CacheServer::start(ServerConfig::default().with_bind(loopback()))
        .await
        .expect("server should start")
}

/// Creates a client with a recording listener and waits until connected.
async fn connected_client(addr: SocketAddr, config: ClientConfig) -> (CacheClient, Events) {
    let client = CacheClient::new(config).unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    client.add_listener(Arc::new(Recorder(tx)));

    assert!(client.connect("127.0.0.1", addr.port()));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Resolving));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Connecting));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Connected));
    assert!(client.is_connected());

    (client, events)
}

/// One accepted socket on a scripted server.
struct Peer {
    reader: FramedRead<OwnedReadHalf, WireCodec>,
    writer: OwnedWriteHalf,
    codec: WireCodec,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: FramedRead::new(read_half, WireCodec::default()),
            writer,
            codec: WireCodec::default(),
        }
    }

    /// Next message from the client, or `None` after `window` of silence.
    async fn recv_within(&mut self, window: Duration) -> Option<Message> {
        match tokio::time::timeout(window, self.reader.next()).await {
            Ok(Some(Ok(message))) => Some(message),
            Ok(Some(Err(e))) => panic!("client sent a corrupt frame: {}", e),
            Ok(None) | Err(_) => None,
        }
    }

    async fn recv(&mut self) -> Message {
        self.recv_within(EVENT_TIMEOUT)
            .await
            .expect("expected a message from the client")
    }

    async fn send(&mut self, message: &Message) {
        let frame = self.codec.encode(message).unwrap();
        self.writer.write_all(&frame).await.unwrap();
    }
}

/// Issues a GET from inside the `Connecting` callback, before the loop can
/// see the connection open, and reports whether it was accepted.
struct RequestOnConnecting {
    client: OnceLock<Weak<CacheClient>>,
    key: CacheKey,
    accepted: mpsc::UnboundedSender<(ClientState, bool)>,
}

impl ClientListener for RequestOnConnecting {
    fn on_state_changed(&self, state: ClientState) {
        if state != ClientState::Connecting {
            return;
        }
        if let Some(client) = self.client.get().and_then(Weak::upgrade) {
            let observed = client.state();
            let _ = self
                .accepted
                .send((observed, client.request_from_cache(self.key)));
        }
    }

    fn on_added_to_cache(&self, _key: &CacheKey, _added: bool) {}

    fn on_received_from_cache(&self, _key: &CacheKey, _status: FetchStatus, _value: CacheValue) {}

    fn on_warmed_up(&self, _key: &CacheKey, _success: bool) {}
}

/// A client whose second listener requests `key` while connecting.
fn client_requesting_on_connecting(
    key: CacheKey,
) -> (
    Arc<CacheClient>,
    Events,
    mpsc::UnboundedReceiver<(ClientState, bool)>,
) {
    let client = Arc::new(CacheClient::new(ClientConfig::default()).unwrap());
    let (tx, events) = mpsc::unbounded_channel();
    client.add_listener(Arc::new(Recorder(tx)));

    let (accepted_tx, accepted) = mpsc::unbounded_channel();
    let requester = RequestOnConnecting {
        client: OnceLock::new(),
        key,
        accepted: accepted_tx,
    };
    let _ = requester.client.set(Arc::downgrade(&client));
    client.add_listener(Arc::new(requester));

    (client, events, accepted)
}

async fn scripted_server() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind(loopback()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

// =============================================================================
// Live server
// =============================================================================

#[tokio::test]
async fn test_added_value_is_fetched_by_second_client() {
    let server = start_server().await;
    let key = CacheKey::digest(["textures/grass.png", "bc7"]);
    let blob: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let value = CacheValue::new().with_file("tex.bin", blob.clone());

    let (writer, mut writer_events) =
        connected_client(server.local_addr(), ClientConfig::default()).await;
    assert!(writer.add_to_cache(key, &value));
    assert_eq!(next_event(&mut writer_events).await, Event::Added(key, true));

    let (reader, mut reader_events) =
        connected_client(server.local_addr(), ClientConfig::default()).await;
    assert!(reader.request_from_cache(key));
    match next_event(&mut reader_events).await {
        Event::Received(k, FetchStatus::Found, fetched) => {
            assert_eq!(k, key);
            assert_eq!(fetched.len(), 1);
            assert_eq!(fetched.get("tex.bin").map(|b| b.to_vec()), Some(blob));
            assert_eq!(fetched.size(), 4096);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // one client's fetch produces no events on another client's listeners
    expect_silence(&mut writer_events, Duration::from_millis(100)).await;

    let stats = server.stats();
    assert_eq!(stats.adds, 1);
    assert_eq!(stats.hits, 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_not_found_is_distinct_from_empty_value() {
    let server = start_server().await;
    let (client, mut events) =
        connected_client(server.local_addr(), ClientConfig::default()).await;

    let absent = CacheKey::digest(["absent"]);
    assert!(client.request_from_cache(absent));
    assert_eq!(
        next_event(&mut events).await,
        Event::Received(absent, FetchStatus::NotFound, CacheValue::new())
    );

    let empty = CacheKey::digest(["empty"]);
    assert!(client.add_to_cache(empty, &CacheValue::new()));
    assert_eq!(next_event(&mut events).await, Event::Added(empty, true));

    assert!(client.request_from_cache(empty));
    match next_event(&mut events).await {
        Event::Received(k, status, value) => {
            assert_eq!(k, empty);
            assert_eq!(status, FetchStatus::Found);
            assert!(value.is_empty());
        }
        other => panic!("unexpected event: {:?}", other),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn test_warm_up_is_silent_by_default() {
    let server = start_server().await;
    let (client, mut events) =
        connected_client(server.local_addr(), ClientConfig::default()).await;

    assert!(client.warming_up(CacheKey::digest(["w"])));
    expect_silence(&mut events, Duration::from_millis(200)).await;
    assert_eq!(client.pending_count(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_warm_up_notifications_when_enabled() {
    let server = start_server().await;
    let config = ClientConfig::default().with_notify_warm_up(true);
    let (client, mut events) = connected_client(server.local_addr(), config).await;
    let key = CacheKey::digest(["warm"]);

    assert!(client.warming_up(key));
    assert_eq!(next_event(&mut events).await, Event::Warmed(key, false));

    assert!(client.add_to_cache(key, &CacheValue::new().with_file("a", vec![1, 2])));
    assert_eq!(next_event(&mut events).await, Event::Added(key, true));

    assert!(client.warming_up(key));
    assert_eq!(next_event(&mut events).await, Event::Warmed(key, true));
    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_add_is_refused() {
    let server = CacheServer::start(
        ServerConfig::default()
            .with_bind(loopback())
            .with_max_size(1024),
    )
    .await
    .unwrap();
    let (client, mut events) =
        connected_client(server.local_addr(), ClientConfig::default()).await;
    let key = CacheKey::digest(["big"]);

    assert!(client.add_to_cache(key, &CacheValue::new().with_file("big", vec![0u8; 2048])));
    assert_eq!(next_event(&mut events).await, Event::Added(key, false));
    server.shutdown().await;
}

#[tokio::test]
async fn test_server_shutdown_disconnects_client() {
    let server = start_server().await;
    let (client, mut events) =
        connected_client(server.local_addr(), ClientConfig::default()).await;

    server.shutdown().await;
    assert_eq!(
        next_event(&mut events).await,
        Event::State(ClientState::Disconnected)
    );
    assert!(!client.is_connected());
    assert!(!client.request_from_cache(CacheKey::digest(["late"])));
}

#[tokio::test]
async fn test_connection_refused_reports_disconnected() {
    let (listener, addr) = scripted_server().await;
    drop(listener);

    let client = CacheClient::new(ClientConfig::default()).unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    client.add_listener(Arc::new(Recorder(tx)));

    assert!(client.connect("127.0.0.1", addr.port()));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Resolving));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Connecting));
    assert_eq!(
        next_event(&mut events).await,
        Event::State(ClientState::Disconnected)
    );
}

// =============================================================================
// Scripted peers
// =============================================================================

#[tokio::test]
async fn test_duplicate_adds_are_coalesced() {
    let (listener, addr) = scripted_server().await;
    let key = CacheKey::digest(["coalesce"]);
    let value = CacheValue::new().with_file("mesh.bin", vec![9u8; 128]);

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let mut adds = 0;
        while let Some(message) = peer.recv_within(Duration::from_millis(300)).await {
            assert!(matches!(message, Message::AddRequest { .. }));
            adds += 1;
        }
        peer.send(&Message::AddResponse { key, added: true }).await;
        // keep the socket open until the client has read the reply
        tokio::time::sleep(Duration::from_millis(500)).await;
        adds
    });

    let (client, mut events) = connected_client(addr, ClientConfig::default()).await;
    assert!(client.add_to_cache(key, &value));
    assert!(client.add_to_cache(key, &value));
    assert_eq!(client.pending_count(), 1);

    assert_eq!(next_event(&mut events).await, Event::Added(key, true));
    assert_eq!(next_event(&mut events).await, Event::Added(key, true));
    assert_eq!(client.pending_count(), 0);

    assert_eq!(server.await.unwrap(), 1, "exactly one ADD_REQUEST on the wire");
}

#[tokio::test]
async fn test_peer_close_fails_every_pending_operation() {
    let (listener, addr) = scripted_server().await;
    let (drop_tx, drop_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        for _ in 0..3 {
            peer.recv().await;
        }
        let _ = drop_rx.await;
        drop(peer);
    });

    let (client, mut events) = connected_client(addr, ClientConfig::default()).await;
    let k1 = CacheKey::digest(["one"]);
    let k2 = CacheKey::digest(["two"]);
    let k3 = CacheKey::digest(["three"]);
    assert!(client.add_to_cache(k1, &CacheValue::new().with_file("a", vec![1])));
    assert!(client.request_from_cache(k2));
    assert!(client.request_from_cache(k3));
    assert_eq!(client.pending_count(), 3);

    let _ = drop_tx.send(());

    let mut failures = Vec::new();
    for _ in 0..3 {
        failures.push(next_event(&mut events).await);
    }
    assert!(failures.contains(&Event::Added(k1, false)));
    assert!(failures.contains(&Event::Received(k2, FetchStatus::Failed, CacheValue::new())));
    assert!(failures.contains(&Event::Received(k3, FetchStatus::Failed, CacheValue::new())));
    assert_eq!(
        next_event(&mut events).await,
        Event::State(ClientState::Disconnected)
    );
    assert_eq!(client.pending_count(), 0);
    expect_silence(&mut events, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_disconnect_fails_pending_operations() {
    let (listener, addr) = scripted_server().await;
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        while peer.recv_within(EVENT_TIMEOUT).await.is_some() {}
    });

    let (client, mut events) = connected_client(addr, ClientConfig::default()).await;
    let key = CacheKey::digest(["pending"]);
    assert!(client.request_from_cache(key));
    assert!(client.request_from_cache(key));

    client.disconnect();
    assert_eq!(client.state(), ClientState::Disconnected);

    for _ in 0..2 {
        assert_eq!(
            next_event(&mut events).await,
            Event::Received(key, FetchStatus::Failed, CacheValue::new())
        );
    }
    assert_eq!(
        next_event(&mut events).await,
        Event::State(ClientState::Disconnected)
    );
    assert!(!client.add_to_cache(key, &CacheValue::new()));
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let (listener, addr) = scripted_server().await;
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        while peer.recv_within(EVENT_TIMEOUT).await.is_some() {}
    });

    let config = ClientConfig::default()
        .with_request_timeout(Duration::from_millis(300))
        .with_timeout_check_interval(Duration::from_millis(50));
    let (client, mut events) = connected_client(addr, config).await;
    let key = CacheKey::digest(["slow"]);

    assert!(client.request_from_cache(key));
    assert_eq!(
        next_event(&mut events).await,
        Event::Received(key, FetchStatus::Failed, CacheValue::new())
    );
    assert_eq!(client.pending_count(), 0);
    // a timeout does not tear down the connection
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_unmatched_response_is_discarded() {
    let (listener, addr) = scripted_server().await;
    let stray = CacheKey::digest(["stray"]);
    let wanted = CacheKey::digest(["wanted"]);

    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.send(&Message::GetResponse {
            key: stray,
            value: Some(CacheValue::new().with_file("x", vec![1])),
        })
        .await;
        peer.send(&Message::AddResponse {
            key: stray,
            added: true,
        })
        .await;

        let request = peer.recv().await;
        assert_eq!(request, Message::GetRequest { key: wanted });
        peer.send(&Message::GetResponse {
            key: wanted,
            value: None,
        })
        .await;
        while peer.recv_within(EVENT_TIMEOUT).await.is_some() {}
    });

    let (client, mut events) = connected_client(addr, ClientConfig::default()).await;
    // let the stray responses arrive before anything is pending
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(client.request_from_cache(wanted));
    assert_eq!(
        next_event(&mut events).await,
        Event::Received(wanted, FetchStatus::NotFound, CacheValue::new())
    );
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_corrupt_frame_drops_connection() {
    let (listener, addr) = scripted_server().await;
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.recv().await;
        // length 1, unknown type tag
        peer.writer.write_all(&[0, 0, 0, 1, 0x7F]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let (client, mut events) = connected_client(addr, ClientConfig::default()).await;
    let key = CacheKey::digest(["victim"]);
    assert!(client.add_to_cache(key, &CacheValue::new()));

    assert_eq!(next_event(&mut events).await, Event::Added(key, false));
    assert_eq!(
        next_event(&mut events).await,
        Event::State(ClientState::Disconnected)
    );
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let (listener, addr) = scripted_server().await;
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        while peer.recv_within(EVENT_TIMEOUT).await.is_some() {}
    });

    let config = ClientConfig::default()
        .with_idle_timeout(Some(Duration::from_millis(200)))
        .with_timeout_check_interval(Duration::from_millis(50));
    let (client, mut events) = connected_client(addr, config).await;

    assert_eq!(
        next_event(&mut events).await,
        Event::State(ClientState::Disconnected)
    );
    assert_eq!(client.state(), ClientState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_replaces_connection() {
    let server = start_server().await;
    let (listener, silent_addr) = scripted_server().await;
    tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        while peer.recv_within(EVENT_TIMEOUT).await.is_some() {}
    });

    let (client, mut events) = connected_client(silent_addr, ClientConfig::default()).await;
    let key = CacheKey::digest(["moved"]);
    assert!(client.request_from_cache(key));

    // switching servers fails work queued on the old one
    assert!(client.connect("127.0.0.1", server.local_addr().port()));
    assert_eq!(
        next_event(&mut events).await,
        Event::Received(key, FetchStatus::Failed, CacheValue::new())
    );
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Resolving));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Connecting));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Connected));

    assert!(client.request_from_cache(key));
    assert_eq!(
        next_event(&mut events).await,
        Event::Received(key, FetchStatus::NotFound, CacheValue::new())
    );
    server.shutdown().await;
}

#[tokio::test]
async fn test_operations_queued_while_resolving_are_sent() {
    let server = start_server().await;
    let client = CacheClient::new(ClientConfig::default()).unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    client.add_listener(Arc::new(Recorder(tx)));

    let key = CacheKey::digest(["early"]);
    assert!(client.connect("localhost", server.local_addr().port()));
    assert!(client.add_to_cache(key, &CacheValue::new().with_file("f", vec![4, 2])));

    let mut added = None;
    while added.is_none() {
        if let Event::Added(k, ok) = next_event(&mut events).await {
            assert_eq!(k, key);
            added = Some(ok);
        }
    }
    assert_eq!(added, Some(true));
    server.shutdown().await;
}

#[tokio::test]
async fn test_request_while_connecting_is_sent_once_open() {
    let (listener, addr) = scripted_server().await;
    let key = CacheKey::digest(["connecting"]);

    let peer = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        assert_eq!(peer.recv().await, Message::GetRequest { key });
        peer.send(&Message::GetResponse { key, value: None }).await;
        while peer.recv_within(EVENT_TIMEOUT).await.is_some() {}
    });

    let (client, mut events, mut accepted) = client_requesting_on_connecting(key);
    assert!(client.connect("127.0.0.1", addr.port()));

    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Resolving));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Connecting));
    assert_eq!(accepted.recv().await, Some((ClientState::Connecting, true)));

    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Connected));
    assert_eq!(
        next_event(&mut events).await,
        Event::Received(key, FetchStatus::NotFound, CacheValue::new())
    );

    client.disconnect();
    assert_eq!(
        next_event(&mut events).await,
        Event::State(ClientState::Disconnected)
    );
    peer.await.unwrap();
}

#[tokio::test]
async fn test_request_while_connecting_fails_when_connect_fails() {
    let (listener, addr) = scripted_server().await;
    drop(listener);
    let key = CacheKey::digest(["refused"]);

    let (client, mut events, mut accepted) = client_requesting_on_connecting(key);
    assert!(client.connect("127.0.0.1", addr.port()));

    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Resolving));
    assert_eq!(next_event(&mut events).await, Event::State(ClientState::Connecting));
    assert_eq!(accepted.recv().await, Some((ClientState::Connecting, true)));

    assert_eq!(
        next_event(&mut events).await,
        Event::Received(key, FetchStatus::Failed, CacheValue::new())
    );
    assert_eq!(
        next_event(&mut events).await,
        Event::State(ClientState::Disconnected)
    );
    assert_eq!(client.pending_count(), 0);
}
