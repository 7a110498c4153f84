//! Pristine-copy backups of containers
//!
//! Before a container is rewritten for the first time, its current bytes are
//! copied to `<container>.tpupbak`. An existing backup is never replaced, so
//! the original survives any number of repack runs until [`restore`] moves
//! it back over the live file.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::Builder;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::container::TEMP_PREFIX;
use crate::error::{Error, Result};

/// Extension appended to a container's file name to form its backup path
pub const BACKUP_SUFFIX: &str = "tpupbak";

/// Path of the backup for `container`
#[must_use]
pub fn backup_path(container: &Path) -> PathBuf {
    let mut name = container.as_os_str().to_os_string();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Whether `path` names a backup file
#[must_use]
pub fn is_backup(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(BACKUP_SUFFIX))
}

/// Live container path for a backup path
fn live_path(backup: &Path) -> Option<PathBuf> {
    let stem = backup.file_stem()?;
    Some(backup.with_file_name(stem))
}

/// Outcome of [`BackupManager::protect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// A new backup was written
    Created,
    /// A backup already existed and was left untouched
    AlreadyPresent,
}

/// Serializes protect/mutate access per container
#[derive(Default)]
pub struct BackupManager {
    guards: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    touched: Mutex<HashSet<PathBuf>>,
}

impl BackupManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard for one container, created on first use
    fn guard(&self, container: &Path) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(guards.entry(container.to_path_buf()).or_default())
    }

    /// Make sure a backup of `container` exists.
    ///
    /// # Errors
    /// Returns [`Error::BackupFailed`] if the copy cannot be made. Callers must
    /// not modify the container in that case.
    pub fn protect(&self, container: &Path) -> Result<Protection> {
        let guard = self.guard(container);
        let _held = guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.protect_locked(container)
    }

    /// Protect `container`, then run `mutate` while still holding its guard.
    ///
    /// `mutate` is not called if the backup cannot be created.
    pub fn with_container<T>(
        &self,
        container: &Path,
        mutate: impl FnOnce(&Path) -> Result<T>,
    ) -> Result<(Protection, T)> {
        let guard = self.guard(container);
        let _held = guard.lock().unwrap_or_else(PoisonError::into_inner);
        let protection = self.protect_locked(container)?;
        let value = mutate(container)?;
        Ok((protection, value))
    }

    /// Containers protected by this manager so far
    #[must_use]
    pub fn touched(&self) -> Vec<PathBuf> {
        let touched = self.touched.lock().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<_> = touched.iter().cloned().collect();
        paths.sort();
        paths
    }

    fn protect_locked(&self, container: &Path) -> Result<Protection> {
        let backup = backup_path(container);
        let failed = |reason: String| Error::BackupFailed {
            path: container.to_path_buf(),
            reason,
        };

        let protection = match backup.try_exists() {
            Ok(true) => {
                debug!("Backup already present: {}", backup.display());
                Protection::AlreadyPresent
            }
            Ok(false) => copy_to_backup(container, &backup).map_err(failed)?,
            Err(e) => return Err(failed(format!("cannot check {}: {e}", backup.display()))),
        };

        self.touched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container.to_path_buf());
        Ok(protection)
    }
}

/// Copy `container` to `backup` through a synced temp file, never replacing
/// an existing backup.
fn copy_to_backup(container: &Path, backup: &Path) -> std::result::Result<Protection, String> {
    let dir = match container.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let source = File::open(container).map_err(|e| format!("cannot open container: {e}"))?;
    let permissions = source
        .metadata()
        .map_err(|e| format!("cannot stat container: {e}"))?
        .permissions();
    let mut temp = Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| format!("cannot create temp file in {}: {e}", dir.display()))?;

    io::copy(&mut BufReader::new(source), temp.as_file_mut())
        .map_err(|e| format!("copy failed: {e}"))?;
    temp.as_file()
        .set_permissions(permissions)
        .map_err(|e| format!("cannot set permissions: {e}"))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| format!("sync failed: {e}"))?;

    match temp.persist_noclobber(backup) {
        Ok(_) => {
            info!("Created backup: {}", backup.display());
            Ok(Protection::Created)
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            // Someone else got there first; theirs is the older copy
            Ok(Protection::AlreadyPresent)
        }
        Err(e) => Err(format!("cannot place {}: {}", backup.display(), e.error)),
    }
}

/// Restore every backup under `root` over its live container.
///
/// Returns the number of backups restored. Each backup is consumed, so a
/// second call over the same tree returns 0.
///
/// # Errors
/// Returns [`Error::RootNotFound`] if `root` is not a directory, or an IO
/// error if a backup cannot be moved into place.
pub fn restore(root: &Path) -> Result<usize> {
    if !root.is_dir() {
        return Err(Error::RootNotFound(root.to_path_buf()));
    }

    let mut backups = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::RootUnreadable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_backup(entry.path()) {
            backups.push(entry.into_path());
        }
    }
    backups.sort();

    let mut restored = 0;
    for backup in backups {
        let Some(live) = live_path(&backup) else {
            warn!("Skipping backup with no live name: {}", backup.display());
            continue;
        };
        match std::fs::remove_file(&live) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_at(&live, e)),
        }
        std::fs::rename(&backup, &live).map_err(|e| Error::io_at(&backup, e))?;
        info!("Restored: {}", live.display());
        restored += 1;
    }

    Ok(restored)
}
