//! Conflict resolution for incoming files, and timestamped file versions.
//!
//! Resolution happens on the local filesystem only, after an incoming file
//! has been fully written next to its destination:
//!
//!   Overwrite            rename incoming over existing
//!   BackupThenOverwrite  existing → existing.bak, then rename
//!   Abort                refuse if existing is present
//!
//! Versions are plain copies stored beside the file as `<path>.<id>`, where
//! `id` is a Unix-millisecond timestamp. Pruning is left to the caller.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use ferry_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    Overwrite,
    #[default]
    BackupThenOverwrite,
    Abort,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "backup" | "backup_then_overwrite" => Ok(Self::BackupThenOverwrite),
            "abort" => Ok(Self::Abort),
            other => Err(format!(
                "unknown conflict policy '{other}' (expected overwrite, backup or abort)"
            )),
        }
    }
}

/// `<path>.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, "bak")
}

/// Move `incoming` into place at `existing` according to `policy`.
///
/// Nothing is moved when an error is returned, with one exception: if the
/// final rename fails after a backup was taken, the backup is moved back.
pub fn resolve(existing: &Path, incoming: &Path, policy: ConflictPolicy) -> Result<()> {
    // Surface a missing incoming file before touching anything.
    fs::metadata(incoming)?;
    let occupied = existing.exists();

    match policy {
        ConflictPolicy::Overwrite => {
            fs::rename(incoming, existing)?;
        }
        ConflictPolicy::Abort => {
            if occupied {
                return Err(Error::conflict(existing, "destination exists"));
            }
            fs::rename(incoming, existing)?;
        }
        ConflictPolicy::BackupThenOverwrite => {
            if occupied {
                let backup = backup_path(existing);
                if backup.exists() {
                    return Err(Error::conflict(
                        existing,
                        format!("backup {} already exists", backup.display()),
                    ));
                }
                fs::rename(existing, &backup)?;
                if let Err(e) = fs::rename(incoming, existing) {
                    if let Err(restore) = fs::rename(&backup, existing) {
                        tracing::error!(
                            path = %existing.display(),
                            error = %restore,
                            "could not restore backup"
                        );
                    }
                    return Err(e.into());
                }
                tracing::debug!(path = %existing.display(), backup = %backup.display(), "backup taken");
            } else {
                fs::rename(incoming, existing)?;
            }
        }
    }

    tracing::info!(
        action = "resolve",
        identifier = %existing.display(),
        status = "ok",
        ?policy,
        replaced = occupied,
        "conflict resolved"
    );
    Ok(())
}

// ── Versions ──────────────────────────────────────────────────────────────────

/// Location of version `id` of `path`.
pub fn version_path(path: &Path, id: &str) -> PathBuf {
    with_suffix(path, id)
}

/// Snapshot `path` as `<path>.<unix millis>`. Returns the version id.
pub fn save_version(path: &Path) -> Result<String> {
    fs::metadata(path)?;

    let mut stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    while version_path(path, &stamp.to_string()).exists() {
        stamp += 1;
    }
    let id = stamp.to_string();

    fs::copy(path, version_path(path, &id))?;
    tracing::info!(
        action = "version_save",
        identifier = %path.display(),
        status = "ok",
        version = %id,
        "version saved"
    );
    Ok(id)
}

/// Restore `path` from version `id`. The live file is replaced atomically.
pub fn revert(path: &Path, id: &str) -> Result<()> {
    let snapshot = version_path(path, id);
    fs::metadata(&snapshot)?;

    let staging = with_suffix(path, &format!("{id}.restore"));
    fs::copy(&snapshot, &staging)?;
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }

    tracing::info!(
        action = "version_revert",
        identifier = %path.display(),
        status = "ok",
        version = %id,
        "version restored"
    );
    Ok(())
}

/// Version ids stored beside `path`, oldest first.
pub fn list_versions(path: &Path) -> Result<Vec<String>> {
    let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let prefix = format!("{base}.");

    let mut ids: Vec<u64> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(rest) = name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
            continue;
        };
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = rest.parse() {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids.into_iter().map(|id| id.to_string()).collect())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}
