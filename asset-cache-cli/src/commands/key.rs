//! `key`: derive a cache key from inputs.

use std::path::Path;

use asset_cache::CacheKey;

use crate::error::CliError;

/// Prints the key for `inputs`, hashing file contents when `files` is set.
pub fn run(inputs: &[String], files: bool) -> Result<(), CliError> {
    println!("{}", derive(inputs, files)?);
    Ok(())
}

fn derive(inputs: &[String], files: bool) -> Result<CacheKey, CliError> {
    if !files {
        return Ok(CacheKey::digest(inputs));
    }
    let contents = inputs
        .iter()
        .map(|p| std::fs::read(Path::new(p)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CacheKey::digest(&contents))
}
