//! Asset Cache - content-addressable network cache for build artifacts
//!
//! Build agents share derived artifacts (compressed textures, compiled
//! shaders, converted meshes) through a cache server instead of recomputing
//! them. This library provides both ends of that exchange:
//!
//! - [`client::CacheClient`]: asynchronous add/request/warm-up operations with
//!   request coalescing, timeouts and listener broadcast
//! - [`server::CacheServer`]: the size-bounded in-memory peer
//!
//! plus the pieces they are built from: [`key::CacheKey`], [`value::CacheValue`],
//! the framed [`protocol`], TCP [`connection`]s and the retrying
//! [`resolver`].
//!
//! The cache is an optimization, never a correctness dependency: every
//! failure surfaces as a miss that the caller answers by building the
//! artifact itself.

pub mod client;
pub mod config;
pub mod connection;
pub mod key;
pub mod logging;
pub mod protocol;
pub mod resolver;
pub mod server;
pub mod value;

pub use client::{CacheClient, ClientConfig, ClientListener, ClientState, FetchStatus};
pub use key::CacheKey;
pub use server::{CacheServer, ServerConfig};
pub use value::CacheValue;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
