//! Sidecar journal persistence.
//!
//! The journal is a JSON document describing a task's configuration and the
//! progress of its shards. It is purely declarative: runtime handles are
//! never serialized, and loading returns plain data the orchestrator wires
//! back up. An empty journal path disables persistence entirely.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};

/// True when the path disables journaling.
pub fn is_disabled(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// Serialize a journal document to `path`.
///
/// The document is written to a temporary sibling and renamed into place,
/// so a crash mid-write leaves the previous snapshot intact.
pub fn save<T: Serialize>(document: &T, path: &Path) -> FetchResult<()> {
    if is_disabled(path) {
        return Ok(());
    }
    let json = serde_json::to_vec_pretty(document).map_err(|e| FetchError::Journal {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    std::fs::write(tmp, &json).map_err(|e| FetchError::io(tmp, e))?;
    std::fs::rename(tmp, path).map_err(|e| FetchError::io(path, e))?;
    debug!(path = %path.display(), "journal snapshot written");
    Ok(())
}

/// Load a journal document from `path`.
pub fn load<T: DeserializeOwned>(path: &Path) -> FetchResult<T> {
    let content = std::fs::read(path).map_err(|e| FetchError::io(path, e))?;
    serde_json::from_slice(&content).map_err(|e| FetchError::Journal {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Remove the journal after a successful run.
///
/// Best-effort: a journal that cannot be deleted is logged and left for the
/// user, the download itself already succeeded.
pub fn delete(path: &Path) {
    if is_disabled(path) {
        return;
    }
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "could not delete journal");
        }
    }
}
