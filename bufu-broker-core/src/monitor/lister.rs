//! One-shot scan of a run directory

use crate::error::{BrokerError, Result};
use crate::monitor::{FileMode, FileRecord};
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// List the marker files of `path` accepted by the filter of `mode`, sorted
/// in delivery order.
///
/// A missing directory yields [`BrokerError::NoSuchRun`]. A name passing the
/// filter but failing to parse is a [`BrokerError::Parse`].
pub fn list_run_directory(path: &Path, mode: FileMode) -> Result<Vec<FileRecord>> {
    let entries = std::fs::read_dir(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => BrokerError::no_such_run(path),
        _ => BrokerError::listing(path, e.to_string()),
    })?;

    let filter = mode.filter();
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for entry in entries {
        let entry = entry.map_err(|e| BrokerError::listing(path, e.to_string()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            skipped += 1;
            continue;
        };

        if !filter.is_match(name) {
            skipped += 1;
            continue;
        }
        records.push(FileRecord::parse(name)?);
    }

    records.sort();
    debug!("Listed {} marker files in {:?} ({} other entries)", records.len(), path, skipped);

    Ok(records)
}
