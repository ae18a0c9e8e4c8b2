//! Client configuration.

use std::time::Duration;

use crate::connection::ConnectionConfig;
use crate::resolver::BackoffPolicy;

/// Default per-request timeout (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default interval between timeout and idle checks (250ms).
pub const DEFAULT_TIMEOUT_CHECK_INTERVAL_MS: u64 = 250;

/// Configuration for a [`CacheClient`](super::CacheClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Requests without a response after this long complete as failures.
    pub request_timeout: Duration,

    /// How often pending requests are checked for timeout.
    pub timeout_check_interval: Duration,

    /// Close an idle connection (no traffic, nothing pending) after this long.
    /// `None` keeps connections open until the owner disconnects.
    pub idle_timeout: Option<Duration>,

    /// Deliver warm-up outcomes to listeners via `on_warmed_up`.
    pub notify_warm_up: bool,

    /// Retry schedule for resolving the server address.
    pub resolve: BackoffPolicy,

    /// Socket-level settings.
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            timeout_check_interval: Duration::from_millis(DEFAULT_TIMEOUT_CHECK_INTERVAL_MS),
            idle_timeout: None,
            notify_warm_up: false,
            resolve: BackoffPolicy::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the timeout check interval.
    pub fn with_timeout_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval = interval;
        self
    }

    /// Set the idle connection timeout.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable or disable warm-up notifications.
    pub fn with_notify_warm_up(mut self, notify: bool) -> Self {
        self.notify_warm_up = notify;
        self
    }

    /// Set the resolution retry policy.
    pub fn with_resolve_policy(mut self, policy: BackoffPolicy) -> Self {
        self.resolve = policy;
        self
    }

    /// Set the connection settings.
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}
