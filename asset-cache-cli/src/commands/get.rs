//! `get`: fetch a value and list or export it.

use std::path::Path;

use asset_cache::config::{format_size, ConfigFile};
use asset_cache::FetchStatus;

use super::common::{parse_key, ClientEvent, Endpoint, Session};
use crate::error::CliError;

/// Fetches `key`; writes its files into `out` when given.
pub async fn run(
    config: &ConfigFile,
    endpoint: &Endpoint,
    key: &str,
    out: Option<&Path>,
) -> Result<(), CliError> {
    let key = parse_key(key)?;

    let mut session = Session::connect(config, endpoint).await?;
    if !session.client.request_from_cache(key) {
        return Err(CliError::Operation("request was not accepted".into()));
    }
    let result = session
        .wait_for(|event| match event {
            ClientEvent::Received(k, status, value) if k == key => Some((status, value)),
            _ => None,
        })
        .await;
    session.close().await;

    let (status, value) = result?;
    match status {
        FetchStatus::Found => {}
        FetchStatus::NotFound => return Err(CliError::NotFound(key.to_string())),
        FetchStatus::Failed => {
            return Err(CliError::Operation(format!("fetching {} failed", key)))
        }
    }

    println!("{} ({} files, {})", key, value.len(), format_size(value.size()));
    match out {
        Some(dir) => {
            for path in value.export(dir)? {
                println!("  wrote {}", path.display());
            }
        }
        None => {
            for file in value.files() {
                println!("  {:<40} {}", file.name(), format_size(file.data().len() as u64));
            }
        }
    }
    Ok(())
}
