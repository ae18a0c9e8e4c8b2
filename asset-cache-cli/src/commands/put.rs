//! `put`: store files under a key.

use std::path::PathBuf;

use asset_cache::config::{format_size, ConfigFile};
use asset_cache::CacheValue;

use super::common::{parse_key, ClientEvent, Endpoint, Session};
use crate::error::CliError;

/// Reads `files` into one value and adds it under `key`.
pub async fn run(
    config: &ConfigFile,
    endpoint: &Endpoint,
    key: &str,
    files: &[PathBuf],
) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let value = CacheValue::from_files(files)?.with_description(describe(files));

    let mut session = Session::connect(config, endpoint).await?;
    if !session.client.add_to_cache(key, &value) {
        return Err(CliError::Operation("add was not accepted".into()));
    }
    let added = session
        .wait_for(|event| match event {
            ClientEvent::Added(k, added) if k == key => Some(added),
            _ => None,
        })
        .await;
    session.close().await;

    if added? {
        println!(
            "Stored {} ({} files, {})",
            key,
            value.len(),
            format_size(value.size())
        );
        if let Some(description) = value.description() {
            println!("  {}", description);
        }
        Ok(())
    } else {
        Err(CliError::Operation(format!("server refused {}", key)))
    }
}

fn describe(files: &[PathBuf]) -> String {
    let names: Vec<_> = files
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    format!(
        "{} at {}",
        names.join(", "),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}
