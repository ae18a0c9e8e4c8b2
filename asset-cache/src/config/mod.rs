//! Configuration file support.
//!
//! Settings live in an INI file at `<config_dir>/asset-cache/config.ini`:
//!
//! ```ini
//! [client]
//! host = cache.build.local
//! port = 44234
//! request_timeout = 30
//! idle_timeout = 300
//!
//! [server]
//! bind = 0.0.0.0
//! max_size = 4G
//!
//! [logging]
//! level = info
//! ```
//!
//! [`ConfigKey`] gives typed, validated access to single keys for the CLI's
//! `config get/set` commands; [`ConfigFile`] converts the whole file into
//! component configs.

mod file;
mod keys;
mod size;

pub use file::{ClientSettings, ConfigFile, LoggingSettings, ServerSettings};
pub use keys::ConfigKey;
pub use size::{format_size, parse_size, to_size_string};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Directory name under the platform config directory.
pub const CONFIG_DIR_NAME: &str = "asset-cache";

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors reading, writing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Location of the configuration file.
///
/// Falls back to the current directory when the platform has no config dir.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}
