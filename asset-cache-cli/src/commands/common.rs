//! Shared plumbing for commands that talk to a cache server.
//!
//! The library reports outcomes through listener callbacks; commands here
//! run one operation at a time, so the listener simply forwards every
//! callback into a channel the command awaits.

use std::sync::Arc;

use asset_cache::config::ConfigFile;
use asset_cache::{CacheClient, CacheKey, CacheValue, ClientListener, ClientState, FetchStatus};
use tokio::sync::mpsc;

use crate::error::CliError;

/// Server endpoint after applying command-line overrides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Config file values, overridden by `--host`/`--port`.
    pub fn resolve(config: &ConfigFile, host: Option<String>, port: Option<u16>) -> Self {
        Self {
            host: host.unwrap_or_else(|| config.client.host.clone()),
            port: port.unwrap_or(config.client.port),
        }
    }
}

/// A listener callback, forwarded to the waiting command.
#[derive(Debug)]
pub enum ClientEvent {
    State(ClientState),
    Added(CacheKey, bool),
    Received(CacheKey, FetchStatus, CacheValue),
    Warmed(CacheKey, bool),
}

struct ForwardingListener(mpsc::UnboundedSender<ClientEvent>);

impl ClientListener for ForwardingListener {
    fn on_state_changed(&self, state: ClientState) {
        let _ = self.0.send(ClientEvent::State(state));
    }

    fn on_added_to_cache(&self, key: &CacheKey, added: bool) {
        let _ = self.0.send(ClientEvent::Added(*key, added));
    }

    fn on_received_from_cache(&self, key: &CacheKey, status: FetchStatus, value: CacheValue) {
        let _ = self.0.send(ClientEvent::Received(*key, status, value));
    }

    fn on_warmed_up(&self, key: &CacheKey, success: bool) {
        let _ = self.0.send(ClientEvent::Warmed(*key, success));
    }
}

/// A connected client plus the stream of its listener events.
pub struct Session {
    pub client: CacheClient,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Session {
    /// Connects to `endpoint` and waits until the connection is up.
    pub async fn connect(config: &ConfigFile, endpoint: &Endpoint) -> Result<Self, CliError> {
        let client = CacheClient::new(config.client_config())?;
        let (tx, events) = mpsc::unbounded_channel();
        client.add_listener(Arc::new(ForwardingListener(tx)));

        let failed = || CliError::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
        };
        if !client.connect(&endpoint.host, endpoint.port) {
            return Err(failed());
        }

        let mut session = Self { client, events };
        loop {
            match session.next().await {
                Some(ClientEvent::State(ClientState::Connected)) => return Ok(session),
                Some(ClientEvent::State(ClientState::Disconnected)) | None => return Err(failed()),
                Some(_) => {}
            }
        }
    }

    /// Next listener event; `None` once the client has stopped.
    pub async fn next(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Waits for the first event `select` accepts.
    ///
    /// Fails if the connection drops first.
    pub async fn wait_for<T>(
        &mut self,
        mut select: impl FnMut(ClientEvent) -> Option<T>,
    ) -> Result<T, CliError> {
        while let Some(event) = self.next().await {
            if let ClientEvent::State(ClientState::Disconnected) = event {
                return Err(CliError::Operation("connection to cache server lost".into()));
            }
            if let Some(found) = select(event) {
                return Ok(found);
            }
        }
        Err(CliError::Operation("cache client stopped".into()))
    }

    /// Stops the client.
    pub async fn close(self) {
        self.client.shutdown().await;
    }
}

/// Parses a hex cache key argument.
pub fn parse_key(input: &str) -> Result<CacheKey, CliError> {
    input
        .parse()
        .map_err(|e| CliError::InvalidKey(format!("'{}': {}", input, e)))
}
