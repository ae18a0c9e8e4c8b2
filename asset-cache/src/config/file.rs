//! The persistent configuration file.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use super::keys::ConfigKey;
use super::{config_file_path, ConfigError};
use crate::client::{ClientConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::connection::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT_SECS};
use crate::logging::{LoggingConfig, DEFAULT_LOG_LEVEL};
use crate::resolver::{BackoffPolicy, DEFAULT_RESOLVE_ATTEMPTS};
use crate::server::{ServerConfig, DEFAULT_MAX_SIZE_BYTES, DEFAULT_PORT};

/// `[client]` section.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub resolve_attempts: u32,
    pub idle_timeout: Option<Duration>,
    pub notify_warm_up: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            resolve_attempts: DEFAULT_RESOLVE_ATTEMPTS,
            idle_timeout: None,
            notify_warm_up: false,
        }
    }
}

/// `[server]` section.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerSettings {
    pub bind: IpAddr,
    pub port: u16,
    pub max_size: u64,
    pub ttl: Option<Duration>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_size: DEFAULT_MAX_SIZE_BYTES,
            ttl: None,
        }
    }
}

/// `[logging]` section.
#[derive(Clone, Debug, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    /// Write daily log files here in addition to stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

/// Settings loaded from `config.ini`.
///
/// Missing files and missing keys fall back to defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigFile {
    pub client: ClientSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Loads the file at the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Loads `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if !path.exists() {
            return Ok(config);
        }

        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        for key in ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|section| section.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Saves to the default location, creating its directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Saves to `path`, creating parent directories. Unset keys are omitted.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        ini.write_to_file(path).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    // =========================================================================
    // Component configs
    // =========================================================================

    /// Client settings as a [`ClientConfig`].
    pub fn client_config(&self) -> ClientConfig {
        let client = &self.client;
        ClientConfig::default()
            .with_request_timeout(client.request_timeout)
            .with_idle_timeout(client.idle_timeout)
            .with_notify_warm_up(client.notify_warm_up)
            .with_resolve_policy(BackoffPolicy::new(client.resolve_attempts))
            .with_connection(
                ConnectionConfig::default().with_connect_timeout(client.connect_timeout),
            )
    }

    /// Server settings as a [`ServerConfig`].
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_bind(SocketAddr::new(self.server.bind, self.server.port))
            .with_max_size(self.server.max_size)
            .with_ttl(self.server.ttl)
    }

    /// Logging settings as a [`LoggingConfig`].
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_level(self.logging.level.clone())
            .with_directory(self.logging.directory.clone())
    }
}
