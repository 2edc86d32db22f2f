//! Atomic JSON files under the state directory.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::PersistenceError;

/// Serialize `value` and replace `path` with it in one rename.
///
/// The temp file is created in the target directory so the rename never
/// crosses a filesystem boundary. Readers see either the old or the new
/// file, never a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Remove `path`. Returns whether it existed.
pub fn remove_file(path: &Path) -> Result<bool, PersistenceError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
