//! Durable stores backing the engine.
//!
//! Both stores persist as pretty-printed JSON documents under a data
//! directory, guarded by an in-process `RwLock` and flushed with a
//! write-temp-then-rename so a crash mid-write never truncates the previous
//! good file. Both also run without a path (nothing is flushed), which is
//! what tests and ephemeral development use: same code path, no file.

pub mod orders;
pub mod rates;

use std::fs;
use std::path::{Path, PathBuf};

use coinforge_core::{OrderId, OrderStatus};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use orders::{Cas, FileOrderStore, OrderStore};
pub use rates::FileRateStore;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the store file failed.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The store file holds something that does not parse.
    #[error("store file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// No order with the given id.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// An event targeted a status the machine does not allow from here.
    /// Callers guard with expected-status sets, so hitting this means a bug.
    #[error("illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: OrderStatus,
        to: OrderStatus,
    },
}

/// Load a JSON document, returning `None` if the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Write a JSON document atomically: serialize to a sibling temp file, then
/// rename over the target.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_sibling(path);
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("store"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.json");
        let loaded: Option<serde_json::Value> = read_json(&path).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let value = serde_json::json!({ "a": 1, "b": ["x", "y"] });

        write_json_atomic(&path, &value).unwrap();
        let loaded: Option<serde_json::Value> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn test_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_json_atomic(&path, &serde_json::json!({ "v": 1 })).unwrap();
        write_json_atomic(&path, &serde_json::json!({ "v": 2 })).unwrap();

        let loaded: Option<serde_json::Value> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(serde_json::json!({ "v": 2 })));
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"not json").unwrap();

        let result: Result<Option<serde_json::Value>, _> = read_json(&path);
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
