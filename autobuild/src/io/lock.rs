//! Advisory file locks shared by every `autobuild` process on a project.
//!
//! The lock lives as long as the returned guard; dropping it closes the file
//! and releases the lock.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fs4::FileExt;
use tracing::debug;

#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is ours.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .with_context(|| format!("lock {}", path.display()))?;
        debug!(path = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    /// Take the exclusive lock on `path`, or `None` if someone else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "lock acquired");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    _file: file,
                }))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err).with_context(|| format!("lock {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Single-writer guard for `.autobuild/state/`.
///
/// Every command that mutates the state document holds this for its whole
/// run, so a second writer fails fast instead of clobbering the first.
pub fn lock_state(path: &Path) -> Result<FileLock> {
    FileLock::try_acquire(path)?.ok_or_else(|| {
        anyhow!(
            "another autobuild process holds {}; wait for it to finish",
            path.display()
        )
    })
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_lock_is_exclusive_until_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state/autobuild.lock");

        let held = lock_state(&path).expect("first lock");
        assert_eq!(held.path(), path);
        let err = lock_state(&path).unwrap_err();
        assert!(err.to_string().contains("another autobuild process"), "{err:#}");
        assert!(FileLock::try_acquire(&path).expect("try").is_none());

        drop(held);
        assert!(FileLock::try_acquire(&path).expect("try again").is_some());
    }

    #[test]
    fn blocking_acquire_waits_for_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gate.lock");
        let held = FileLock::acquire(&path).expect("lock");

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| FileLock::acquire(&path).map(|_| ()));
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert!(!waiter.is_finished());
            drop(held);
            waiter.join().expect("join").expect("acquired after release");
        });
    }
}
