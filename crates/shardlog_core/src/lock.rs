//! Scoped advisory locks on segment files.
//!
//! Every access to a segment file goes through a [`SegmentLock`]: an open
//! handle holding an exclusive, non-blocking advisory lock. Acquisition
//! polls at a fixed interval until a total wait budget is spent and then
//! gives up; it never blocks indefinitely. The lock is released when the
//! guard is dropped, on every exit path.

use crate::config::Config;
use crate::error::CoreResult;
use fs2::FileExt;
use shardlog_storage::{Appender, Container, FileBackend};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long and how often to try for a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Total budget across all attempts.
    pub wait: Duration,
    /// Pause between attempts.
    pub poll: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            wait: crate::config::DEFAULT_LOCK_WAIT,
            poll: crate::config::DEFAULT_LOCK_POLL,
        }
    }
}

impl From<&Config> for LockPolicy {
    fn from(config: &Config) -> Self {
        Self {
            wait: config.lock_wait,
            poll: config.lock_poll,
        }
    }
}

enum Attempt {
    Locked(SegmentLock),
    Busy,
    Missing,
}

/// An exclusively locked segment file.
#[derive(Debug)]
pub struct SegmentLock {
    file: File,
    path: PathBuf,
}

impl SegmentLock {
    /// Locks the existing file at `path`, polling within `policy`.
    ///
    /// Returns `Ok(None)` if the budget ran out or the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for I/O failures other than contention or absence.
    pub fn acquire(path: &Path, policy: LockPolicy) -> CoreResult<Option<Self>> {
        let started = Instant::now();
        loop {
            match Self::attempt(path)? {
                Attempt::Locked(lock) => return Ok(Some(lock)),
                Attempt::Missing => return Ok(None),
                Attempt::Busy => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= policy.wait {
                debug!(path = %path.display(), waited = ?elapsed, "segment lock timed out");
                return Ok(None);
            }
            thread::sleep(policy.poll.min(policy.wait - elapsed));
        }
    }

    /// Makes a single attempt without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error for I/O failures other than contention or absence.
    pub fn try_acquire(path: &Path) -> CoreResult<Option<Self>> {
        match Self::attempt(path)? {
            Attempt::Locked(lock) => Ok(Some(lock)),
            Attempt::Busy | Attempt::Missing => Ok(None),
        }
    }

    fn attempt(path: &Path) -> CoreResult<Attempt> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Attempt::Missing),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Ok(Attempt::Busy);
            }
            return Err(e.into());
        }

        let lock = Self {
            file,
            path: path.to_path_buf(),
        };
        // A merge may have renamed the file between our open and our lock.
        match lock.still_at_path()? {
            Some(true) => Ok(Attempt::Locked(lock)),
            Some(false) => Ok(Attempt::Busy),
            None => Ok(Attempt::Missing),
        }
    }

    /// Path the locked file currently lives at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the locked file, keeping the lock.
    pub(crate) fn rename_to(&mut self, to: PathBuf) -> CoreResult<()> {
        fs::rename(&self.path, &to)?;
        self.path = to;
        Ok(())
    }

    /// Replaces the locked file with `image`, keeping the lock.
    ///
    /// The image is written to `staging` and synced, then renamed over the
    /// locked path. The staging file is locked before it is written, so the
    /// path is never unlocked while the guard lives. A crash leaves the old
    /// file or the new one at the path, never a partial image.
    ///
    /// The caller syncs the directory.
    pub(crate) fn replace_with(&mut self, staging: &Path, image: &[u8]) -> CoreResult<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(staging)?;
        file.try_lock_exclusive()?;
        file.write_all(image)?;
        file.sync_all()?;
        fs::rename(staging, &self.path)?;

        let old = std::mem::replace(&mut self.file, file);
        let _ = FileExt::unlock(&old);
        Ok(())
    }

    fn backend(&self) -> CoreResult<FileBackend> {
        // A duplicate of the locked handle, so the lock covers it.
        Ok(FileBackend::from_file(self.file.try_clone()?, &self.path)?)
    }

    /// Opens the container stored in the locked file, replaying it fully.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be duplicated or the container
    /// is corrupted.
    pub fn open_container(&self) -> CoreResult<Container<FileBackend>> {
        Ok(Container::open(self.backend()?)?)
    }

    /// Opens the locked file for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be duplicated or the file does
    /// not end in a valid frame and cannot be repaired.
    pub fn open_appender(&self) -> CoreResult<Appender<FileBackend>> {
        Ok(Appender::open(self.backend()?)?)
    }

    /// Reads one array from the locked file without modifying it.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or corruption.
    pub fn read_array(&self, group: &str, key: &str) -> CoreResult<Option<Vec<String>>> {
        Ok(shardlog_storage::read_array(&self.backend()?, group, key)?)
    }

    /// Live group names of the locked file, ascending, without modifying it.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or corruption.
    pub fn group_names(&self) -> CoreResult<Vec<String>> {
        Ok(shardlog_storage::group_names(&self.backend()?)?)
    }

    #[cfg(unix)]
    fn still_at_path(&self) -> io::Result<Option<bool>> {
        use std::os::unix::fs::MetadataExt;

        let held = self.file.metadata()?;
        match fs::metadata(&self.path) {
            Ok(now) => Ok(Some(held.dev() == now.dev() && held.ino() == now.ino())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[cfg(not(unix))]
    fn still_at_path(&self) -> io::Result<Option<bool>> {
        Ok(self.path.exists().then_some(true))
    }
}

impl Drop for SegmentLock {
    fn drop(&mut self) {
        // Closing the handle would release the lock too, but duplicated
        // handles handed to containers may still be open.
        let _ = FileExt::unlock(&self.file);
    }
}
