//! `serve`: run a cache server until Ctrl+C.

use std::net::IpAddr;
use std::time::Duration;

use asset_cache::config::{format_size, parse_size, ConfigFile};
use asset_cache::CacheServer;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::error::CliError;

/// Seconds between stats lines unless overridden.
const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

/// Arguments for `serve`; unset values come from the `[server]` section.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Memory budget for cached values (e.g. 512M, 4G)
    #[arg(long, value_parser = parse_max_size)]
    pub max_size: Option<u64>,

    /// Evict entries this many seconds after they were stored (0 keeps them)
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Seconds between stats lines (0 disables)
    #[arg(long, default_value_t = DEFAULT_STATS_INTERVAL_SECS)]
    pub stats_interval: u64,
}

fn parse_max_size(input: &str) -> Result<u64, String> {
    parse_size(input)
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("invalid size '{}'", input))
}

/// Applies command-line overrides to the file settings.
fn apply(config: &ConfigFile, args: &ServeArgs, port: Option<u16>) -> ConfigFile {
    let mut config = config.clone();
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(max_size) = args.max_size {
        config.server.max_size = max_size;
    }
    if let Some(ttl) = args.ttl {
        config.server.ttl = (ttl > 0).then(|| Duration::from_secs(ttl));
    }
    config
}

/// Runs the server until interrupted.
pub async fn run(config: &ConfigFile, args: ServeArgs, port: Option<u16>) -> Result<(), CliError> {
    let config = apply(config, &args, port);
    let server = CacheServer::start(config.server_config()).await?;

    println!("Asset cache server");
    println!("  Address:  {}", server.local_addr());
    println!("  Max size: {}", format_size(config.server.max_size));
    match config.server.ttl {
        Some(ttl) => println!("  TTL:      {}s", ttl.as_secs()),
        None => println!("  TTL:      none"),
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, stopping...");
        signal.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    if args.stats_interval == 0 {
        shutdown.cancelled().await;
    } else {
        let mut interval = tokio::time::interval(Duration::from_secs(args.stats_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    println!(
                        "[{}] {}",
                        chrono::Local::now().format("%H:%M:%S"),
                        server.stats()
                    );
                }
            }
        }
    }

    let final_stats = server.stats();
    server.shutdown().await;
    println!("Server stopped. {}", final_stats);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServeArgs {
        ServeArgs {
            bind: None,
            max_size: None,
            ttl: None,
            stats_interval: DEFAULT_STATS_INTERVAL_SECS,
        }
    }

    #[test]
    fn test_defaults_come_from_file() {
        let file = ConfigFile::default();
        assert_eq!(apply(&file, &args(), None), file);
    }

    #[test]
    fn test_overrides() {
        let args = ServeArgs {
            bind: Some("127.0.0.1".parse().unwrap()),
            max_size: Some(1024),
            ttl: Some(0),
            ..args()
        };
        let mut file = ConfigFile::default();
        file.server.ttl = Some(Duration::from_secs(60));

        let config = apply(&file, &args, Some(9000));
        assert_eq!(config.server.bind.to_string(), "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_size, 1024);
        assert_eq!(config.server.ttl, None);
    }

    #[test]
    fn test_parse_max_size() {
        assert_eq!(parse_max_size("4G"), Ok(4 * 1024 * 1024 * 1024));
        assert!(parse_max_size("0").is_err());
        assert!(parse_max_size("lots").is_err());
    }
}
