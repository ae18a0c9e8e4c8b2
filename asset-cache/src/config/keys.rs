//! Typed access to individual configuration keys.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::file::ConfigFile;
use super::size::{parse_size, to_size_string};
use super::ConfigError;

/// Log levels accepted by `logging.level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A `section.key` name in the configuration file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigKey {
    ClientHost,
    ClientPort,
    ClientRequestTimeout,
    ClientConnectTimeout,
    ClientResolveAttempts,
    ClientIdleTimeout,
    ClientNotifyWarmUp,
    ServerBind,
    ServerPort,
    ServerMaxSize,
    ServerTtl,
    LoggingLevel,
    LoggingDirectory,
}

impl ConfigKey {
    /// Every key, grouped by section in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            Self::ClientHost,
            Self::ClientPort,
            Self::ClientRequestTimeout,
            Self::ClientConnectTimeout,
            Self::ClientResolveAttempts,
            Self::ClientIdleTimeout,
            Self::ClientNotifyWarmUp,
            Self::ServerBind,
            Self::ServerPort,
            Self::ServerMaxSize,
            Self::ServerTtl,
            Self::LoggingLevel,
            Self::LoggingDirectory,
        ]
    }

    /// Full name, e.g. `client.host`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientHost => "client.host",
            Self::ClientPort => "client.port",
            Self::ClientRequestTimeout => "client.request_timeout",
            Self::ClientConnectTimeout => "client.connect_timeout",
            Self::ClientResolveAttempts => "client.resolve_attempts",
            Self::ClientIdleTimeout => "client.idle_timeout",
            Self::ClientNotifyWarmUp => "client.notify_warm_up",
            Self::ServerBind => "server.bind",
            Self::ServerPort => "server.port",
            Self::ServerMaxSize => "server.max_size",
            Self::ServerTtl => "server.ttl",
            Self::LoggingLevel => "logging.level",
            Self::LoggingDirectory => "logging.directory",
        }
    }

    /// Section part of the name.
    pub fn section(&self) -> &'static str {
        self.split().0
    }

    /// Key part of the name.
    pub fn key_name(&self) -> &'static str {
        self.split().1
    }

    fn split(&self) -> (&'static str, &'static str) {
        let name = self.name();
        name.split_once('.').unwrap_or((name, ""))
    }

    /// Current value as written in the file; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        let client = &config.client;
        let server = &config.server;
        match self {
            Self::ClientHost => client.host.clone(),
            Self::ClientPort => client.port.to_string(),
            Self::ClientRequestTimeout => client.request_timeout.as_secs().to_string(),
            Self::ClientConnectTimeout => client.connect_timeout.as_secs().to_string(),
            Self::ClientResolveAttempts => client.resolve_attempts.to_string(),
            Self::ClientIdleTimeout => optional_secs(client.idle_timeout),
            Self::ClientNotifyWarmUp => client.notify_warm_up.to_string(),
            Self::ServerBind => server.bind.to_string(),
            Self::ServerPort => server.port.to_string(),
            Self::ServerMaxSize => to_size_string(server.max_size),
            Self::ServerTtl => optional_secs(server.ttl),
            Self::LoggingLevel => config.logging.level.clone(),
            Self::LoggingDirectory => config
                .logging
                .directory
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Validates `value` and stores it.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: self.name().to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::ClientHost => {
                if value.is_empty() {
                    return Err(invalid("host must not be empty"));
                }
                config.client.host = value.to_string();
            }
            Self::ClientPort => {
                config.client.port =
                    parse_port(value).ok_or_else(|| invalid("expected a port 1-65535"))?;
            }
            Self::ClientRequestTimeout => {
                config.client.request_timeout = parse_secs(value)
                    .ok_or_else(|| invalid("expected a positive number of seconds"))?;
            }
            Self::ClientConnectTimeout => {
                config.client.connect_timeout = parse_secs(value)
                    .ok_or_else(|| invalid("expected a positive number of seconds"))?;
            }
            Self::ClientResolveAttempts => {
                config.client.resolve_attempts = value
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid("expected a positive integer"))?;
            }
            Self::ClientIdleTimeout => {
                config.client.idle_timeout = parse_optional_secs(value)
                    .ok_or_else(|| invalid("expected seconds, or 0 to disable"))?;
            }
            Self::ClientNotifyWarmUp => {
                config.client.notify_warm_up =
                    parse_bool(value).ok_or_else(|| invalid("expected true or false"))?;
            }
            Self::ServerBind => {
                config.server.bind =
                    IpAddr::from_str(value).map_err(|_| invalid("expected an IP address"))?;
            }
            Self::ServerPort => {
                // 0 lets the OS pick a port
                config.server.port = value
                    .parse::<u16>()
                    .map_err(|_| invalid("expected a port 0-65535"))?;
            }
            Self::ServerMaxSize => {
                config.server.max_size = parse_size(value)
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid("expected a size such as 512M or 4G"))?;
            }
            Self::ServerTtl => {
                config.server.ttl = parse_optional_secs(value)
                    .ok_or_else(|| invalid("expected seconds, or 0 to disable"))?;
            }
            Self::LoggingLevel => {
                let level = value.to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(invalid("expected trace, debug, info, warn or error"));
                }
                config.logging.level = level;
            }
            Self::LoggingDirectory => {
                config.logging.directory = (!value.is_empty()).then(|| PathBuf::from(value));
            }
        }
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_port(value: &str) -> Option<u16> {
    value.parse::<u16>().ok().filter(|p| *p != 0)
}

fn parse_secs(value: &str) -> Option<Duration> {
    value
        .parse::<u64>()
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

/// Empty or `0` means disabled; the outer `None` means invalid.
fn parse_optional_secs(value: &str) -> Option<Option<Duration>> {
    if value.is_empty() {
        return Some(None);
    }
    let secs = value.parse::<u64>().ok()?;
    Some((secs > 0).then(|| Duration::from_secs(secs)))
}

fn optional_secs(value: Option<Duration>) -> String {
    value.map(|d| d.as_secs().to_string()).unwrap_or_default()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
