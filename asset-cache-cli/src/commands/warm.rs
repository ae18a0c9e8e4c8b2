//! `warm`: ask the server to keep a key resident.

use asset_cache::config::ConfigFile;

use super::common::{parse_key, ClientEvent, Endpoint, Session};
use crate::error::CliError;

/// Sends a warm-up hint for `key` and reports whether it was present.
pub async fn run(config: &ConfigFile, endpoint: &Endpoint, key: &str) -> Result<(), CliError> {
    let key = parse_key(key)?;

    // the outcome is the whole point here, so ask for it
    let mut config = config.clone();
    config.client.notify_warm_up = true;

    let mut session = Session::connect(&config, endpoint).await?;
    if !session.client.warming_up(key) {
        return Err(CliError::Operation("warm-up was not accepted".into()));
    }
    let present = session
        .wait_for(|event| match event {
            ClientEvent::Warmed(k, success) if k == key => Some(success),
            _ => None,
        })
        .await;
    session.close().await;

    if present? {
        println!("{} is cached", key);
        Ok(())
    } else {
        Err(CliError::NotFound(key.to_string()))
    }
}
