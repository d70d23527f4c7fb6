//! Run lock shared by both modes
//!
//! Guards the alert state and spill file against two agents at once: a
//! scheduler may start a new `once` invocation while the previous one (or a
//! `run` daemon) is still going. The lock file holds the owner's PID and is
//! removed on drop. A long-lived owner refreshes it every [`REFRESH_EVERY`];
//! a lock untouched for [`STALE_AFTER`] is treated as left behind by a
//! crashed run and reclaimed.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Age after which an existing lock is considered abandoned
pub const STALE_AFTER: Duration = Duration::from_secs(3600);

/// How often a long-lived owner rewrites the lock
pub const REFRESH_EVERY: Duration = Duration::from_secs(15 * 60);

/// Held run lock; released when dropped
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock, or return `None` if another run holds it
    pub fn acquire(path: &Path) -> Result<Option<Self>> {
        Self::acquire_with_stale_after(path, STALE_AFTER)
    }

    pub fn acquire_with_stale_after(path: &Path, stale_after: Duration) -> Result<Option<Self>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        if Self::try_create(path)? {
            return Ok(Some(Self {
                path: path.to_path_buf(),
            }));
        }

        if !is_stale(path, stale_after) {
            return Ok(None);
        }

        warn!(path = %path.display(), "Reclaiming stale run lock");
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()))
            }
        }

        // Another invocation may have reclaimed it first
        if Self::try_create(path)? {
            Ok(Some(Self {
                path: path.to_path_buf(),
            }))
        } else {
            Ok(None)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the PID, bumping the lock's modification time
    pub fn refresh(&self) -> Result<()> {
        fs::write(&self.path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to refresh {}", self.path.display()))
    }

    fn try_create(path: &Path) -> Result<bool> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let pid = std::process::id();
                writeln!(file, "{}", pid)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), pid = pid, "Acquired run lock");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to create {}", path.display())),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age >= stale_after)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alert_state.lock");

        let held = RunLock::acquire(&path).unwrap().unwrap();
        assert!(RunLock::acquire(&path).unwrap().is_none());

        let pid = fs::read_to_string(held.path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alert_state.lock");

        {
            let _lock = RunLock::acquire(&path).unwrap().unwrap();
            assert!(path.exists());
        }

        assert!(!path.exists());
        assert!(RunLock::acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_stale_lock_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alert_state.lock");
        fs::write(&path, "99999\n").unwrap();

        let lock = RunLock::acquire_with_stale_after(&path, Duration::ZERO).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn test_refresh_keeps_lock_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alert_state.lock");
        let lock = RunLock::acquire(&path).unwrap().unwrap();

        let two_hours_ago = SystemTime::now() - Duration::from_secs(2 * 3600);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(two_hours_ago)
            .unwrap();
        assert!(is_stale(&path, STALE_AFTER));

        lock.refresh().unwrap();
        assert!(!is_stale(&path, STALE_AFTER));
        assert!(RunLock::acquire(&path).unwrap().is_none());
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("alert_state.lock");

        assert!(RunLock::acquire(&path).unwrap().is_some());
    }
}
