//! CLI error type.

use std::io;

use asset_cache::client::ClientError;
use asset_cache::config::ConfigError;
use asset_cache::logging::LoggingError;
use asset_cache::server::ServerError;
use asset_cache::value::ValueError;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("could not connect to {host}:{port}")]
    Connect { host: String, port: u16 },

    #[error("{0}")]
    Operation(String),

    #[error("key {0} is not in the cache")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
