//! Asynchronous address resolution with bounded retry.
//!
//! The [`AddressResolver`] turns a configured `host:port` into a connectable
//! [`SocketAddr`]. Name lookups run on Tokio's blocking pool, so resolution
//! never blocks the task that requested it. Transient lookup failures (DNS
//! not yet reachable after boot, flaky resolvers on build agents) are retried
//! with capped exponential backoff; once the attempt ceiling is reached the
//! resolver reports a single terminal failure.
//!
//! # Example
//!
//! ```ignore
//! use asset_cache::resolver::{AddressResolver, BackoffPolicy};
//!
//! let resolver = AddressResolver::new(BackoffPolicy::default());
//! let addr = resolver.resolve("cache.build.local", 44234).await?;
//! ```

mod backoff;

pub use backoff::{
    BackoffPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_SECS,
    DEFAULT_RESOLVE_ATTEMPTS,
};

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

/// Boxed future type for dyn-compatible async lookups.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by [`AddressResolver::resolve`].
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The host string is empty.
    #[error("empty host name")]
    EmptyHost,

    /// Every attempt failed.
    #[error("failed to resolve {host} after {attempts} attempts: {reason}")]
    Exhausted {
        host: String,
        attempts: u32,
        reason: String,
    },
}

/// Name lookup backend.
///
/// The production implementation is [`SystemLookup`]; tests substitute
/// scripted lookups to exercise retry behaviour without DNS.
pub trait HostLookup: Send + Sync {
    /// Looks up all addresses for `host`, paired with `port`.
    fn lookup(&self, host: &str, port: u16) -> BoxFuture<'_, io::Result<Vec<SocketAddr>>>;
}

/// Lookup through the operating system resolver.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    fn lookup(&self, host: &str, port: u16) -> BoxFuture<'_, io::Result<Vec<SocketAddr>>> {
        let host = host.to_string();
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
            Ok(addrs.collect())
        })
    }
}

/// Resolves cache server endpoints with retry.
#[derive(Clone)]
pub struct AddressResolver {
    lookup: Arc<dyn HostLookup>,
    policy: BackoffPolicy,
}

impl AddressResolver {
    /// Creates a resolver backed by the system resolver.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_lookup(policy, Arc::new(SystemLookup))
    }

    /// Creates a resolver with a custom lookup backend.
    pub fn with_lookup(policy: BackoffPolicy, lookup: Arc<dyn HostLookup>) -> Self {
        Self { lookup, policy }
    }

    /// The retry policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Resolves `host:port` to one address.
    ///
    /// IP literals resolve immediately. Host names are looked up until an
    /// attempt yields at least one address or the policy's attempt ceiling is
    /// reached. IPv4 results are preferred, matching typical build-farm
    /// cache servers.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ResolveError::EmptyHost);
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let max_attempts = self.policy.max_attempts().max(1);
        let mut attempt = 1;
        loop {
            let reason = match self.lookup.lookup(host, port).await {
                Ok(addrs) => match pick_address(&addrs) {
                    Some(addr) => {
                        debug!(host, %addr, attempt, "Resolved cache server address");
                        return Ok(addr);
                    }
                    None => "no addresses returned".to_string(),
                },
                Err(e) => e.to_string(),
            };

            match self.policy.delay_for_attempt(attempt) {
                Some(delay) if attempt < max_attempts => {
                    warn!(
                        host,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Address resolution failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    warn!(host, attempts = attempt, reason = %reason, "Address resolution gave up");
                    return Err(ResolveError::Exhausted {
                        host: host.to_string(),
                        attempts: attempt,
                        reason,
                    });
                }
            }
        }
    }
}

fn pick_address(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
