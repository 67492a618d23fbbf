//! Lock file management for single-instance enforcement.
//!
//! Only one daemon may own a settings file at a time. The lock lives in the
//! runtime directory and records the owner's PID and settings path so a
//! conflicting start can say who is already running.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::common::utils;

/// Held for the daemon's lifetime. Dropping it releases the lock and
/// removes the file.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Default lock location: `$XDG_RUNTIME_DIR/appearanced.lock`, or `/tmp`.
pub fn get_lock_path() -> PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(runtime_dir).join("appearanced.lock")
}

/// Acquire the default lock.
pub fn acquire_lock(settings_path: &Path) -> Result<LockGuard> {
    acquire_lock_at(&get_lock_path(), settings_path)
}

/// Acquire an exclusive lock at `lock_path`.
///
/// A lock left behind by a dead process is removed and the acquisition is
/// retried once. A live owner is an error naming its PID.
pub fn acquire_lock_at(lock_path: &Path, settings_path: &Path) -> Result<LockGuard> {
    match try_acquire(lock_path, settings_path)? {
        Some(guard) => Ok(guard),
        None => {
            handle_lock_conflict(lock_path)?;
            try_acquire(lock_path, settings_path)?.with_context(|| {
                format!(
                    "Failed to acquire lock {} after cleanup attempt",
                    lock_path.display()
                )
            })
        }
    }
}

fn try_acquire(lock_path: &Path, settings_path: &Path) -> Result<Option<LockGuard>> {
    // Open without truncating so a live owner's content survives
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

    if file.try_lock_exclusive().is_err() {
        return Ok(None);
    }

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(&file, "{}", std::process::id())?;
    writeln!(&file, "{}", settings_path.display())?;
    file.flush()?;

    Ok(Some(LockGuard {
        file,
        path: lock_path.to_path_buf(),
    }))
}

/// Owner recorded in a lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub settings_path: PathBuf,
}

impl LockOwner {
    /// Lock file format: PID (line 1), settings path (line 2).
    pub fn from_lock_contents(contents: &str) -> Result<Self> {
        let mut lines = contents.trim().lines();
        let pid = lines
            .next()
            .context("Lock file is empty")?
            .trim()
            .parse::<u32>()
            .context("Invalid PID format in lock file")?;
        let settings_path = lines
            .next()
            .map(PathBuf::from)
            .context("Lock file is missing the settings path")?;
        if lines.next().is_some() {
            anyhow::bail!("Invalid lock file format (expected 2 lines)");
        }
        Ok(Self { pid, settings_path })
    }
}

/// Clear a stale lock, or fail if its owner is still alive.
fn handle_lock_conflict(lock_path: &Path) -> Result<()> {
    let Ok(contents) = std::fs::read_to_string(lock_path) else {
        // Gone in the meantime
        return Ok(());
    };

    let owner = match LockOwner::from_lock_contents(&contents) {
        Ok(owner) => owner,
        Err(e) => {
            log_warning!("Lock file unreadable ({e}), removing");
            let _ = std::fs::remove_file(lock_path);
            return Ok(());
        }
    };

    if !utils::is_process_running(owner.pid) {
        log_warning!(
            "Removing stale lock file (process {} no longer running)",
            owner.pid
        );
        let _ = std::fs::remove_file(lock_path);
        return Ok(());
    }

    anyhow::bail!(
        "appearanced is already running (PID: {}, settings: {})",
        owner.pid,
        owner.settings_path.display()
    )
}
