//! Asset Cache CLI
//!
//! Runs a cache server or talks to one: store and fetch values, send
//! warm-up hints, derive keys and manage the configuration file.

mod commands;
mod error;

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

use asset_cache::config::ConfigFile;
use asset_cache::logging::init_logging;
use clap::{Parser, Subcommand};
use tracing::debug;

use commands::common::Endpoint;
use commands::config::ConfigCommands;
use commands::serve::ServeArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "asset-cache", version, about = "Shared cache for build artifacts")]
struct Cli {
    /// Cache server host (overrides client.host)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Cache server port (overrides client.port, or server.port for serve)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a cache server
    Serve(ServeArgs),

    /// Store files under a key
    Put {
        /// Hex cache key
        key: String,

        /// Files to store; each is kept under its file name
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Fetch the value stored under a key
    Get {
        /// Hex cache key
        key: String,

        /// Write the files into this directory instead of listing them
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Ask the server to keep a key resident
    Warm {
        /// Hex cache key
        key: String,
    },

    /// Print the cache key derived from the given inputs
    Key {
        /// Strings (or file paths with --files) to hash, in order
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Hash the contents of the named files
        #[arg(long)]
        files: bool,
    },

    /// View and modify configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let Cli {
        host,
        port,
        command,
    } = cli;

    match command {
        Commands::Serve(args) => {
            networked(|config| async move { commands::serve::run(&config, args, port).await })
        }
        Commands::Put { key, files } => networked(|config| async move {
            let endpoint = Endpoint::resolve(&config, host, port);
            commands::put::run(&config, &endpoint, &key, &files).await
        }),
        Commands::Get { key, out } => networked(|config| async move {
            let endpoint = Endpoint::resolve(&config, host, port);
            commands::get::run(&config, &endpoint, &key, out.as_deref()).await
        }),
        Commands::Warm { key } => networked(|config| async move {
            let endpoint = Endpoint::resolve(&config, host, port);
            commands::warm::run(&config, &endpoint, &key).await
        }),
        Commands::Key { inputs, files } => commands::key::run(&inputs, files),
        Commands::Config { command } => commands::config::run(command),
    }
}

/// Loads settings, installs logging and runs `command` on a fresh runtime.
fn networked<F, Fut>(command: F) -> Result<(), CliError>
where
    F: FnOnce(ConfigFile) -> Fut,
    Fut: Future<Output = Result<(), CliError>>,
{
    let config = ConfigFile::load().unwrap_or_default();
    // before the runtime starts, so local timestamps are available
    let _guard = init_logging(&config.logging_config())?;
    debug!(version = asset_cache::VERSION, "asset-cache starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(command(config))
}
