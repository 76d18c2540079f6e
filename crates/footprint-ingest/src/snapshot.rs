//! Private point-in-time copies of live source databases.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{IngestError, IngestResult};

const STALE_SUFFIXES: [&str; 3] = ["", "-wal", "-shm"];
const WAL_SUFFIX: &str = "-wal";

/// A copied source database ready to be opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Snapshot file for `source` inside `snapshot_dir`
#[must_use]
pub fn snapshot_path(source: &str, snapshot_dir: &Path) -> PathBuf {
    snapshot_dir.join(format!("{source}.db"))
}

/// Copy `origin` (and its WAL, when present) to `<snapshot_dir>/<source>.db`.
///
/// Any earlier snapshot of the same source is removed first, including sidecars.
///
/// # Errors
/// [`IngestError::SourceAccessDenied`] when reading the source is not permitted,
/// [`IngestError::SnapshotCopyFailed`] for every other copy failure.
pub fn take_snapshot(source: &str, origin: &Path, snapshot_dir: &Path) -> IngestResult<Snapshot> {
    let dest = snapshot_path(source, snapshot_dir);
    let copy_failed = |path: &Path, error: io::Error| IngestError::SnapshotCopyFailed {
        source_name: source.to_string(),
        path: path.to_path_buf(),
        error,
    };

    fs::create_dir_all(snapshot_dir).map_err(|err| copy_failed(snapshot_dir, err))?;
    for suffix in STALE_SUFFIXES {
        let stale = with_suffix(&dest, suffix);
        match fs::remove_file(&stale) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(copy_failed(&stale, err)),
        }
    }

    let bytes = fs::copy(origin, &dest).map_err(|err| {
        if err.kind() == io::ErrorKind::PermissionDenied {
            IngestError::SourceAccessDenied { source_name: source.to_string(), path: origin.to_path_buf() }
        } else {
            copy_failed(origin, err)
        }
    })?;

    let wal = with_suffix(origin, WAL_SUFFIX);
    if wal.is_file() {
        if let Err(err) = fs::copy(&wal, with_suffix(&dest, WAL_SUFFIX)) {
            tracing::warn!(
                source,
                path = %wal.display(),
                error = %err,
                "failed to copy WAL sidecar; snapshot may miss recent rows"
            );
        }
    }

    Ok(Snapshot { path: dest, bytes })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
