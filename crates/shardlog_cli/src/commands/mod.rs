//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod nodes;
pub mod records;

use shardlog_core::{Config, LogStore};
use std::path::Path;

/// Opens the store at `path`, applying the size cap if one was given.
pub fn open_store(
    path: &Path,
    max_size: Option<&str>,
) -> Result<LogStore, Box<dyn std::error::Error>> {
    let mut config = Config::new();
    if let Some(size) = max_size {
        config = config.max_segment_size_str(size);
    }
    Ok(LogStore::open(path, config)?)
}
