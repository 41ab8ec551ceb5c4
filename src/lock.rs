// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exclusive install lock.
//!
//! The install root and the shared autostart script are mutated in place.
//! Only one installer may run against a machine at a time, so every run holds
//! a lock file containing its PID for its whole duration. A lock file whose
//! PID no longer belongs to a live process is stale and gets taken over.

use std::{
    fs::{create_dir_all, read_to_string, remove_file, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Held install lock, released on drop.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    /// Acquire install lock at target path.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::AlreadyRunning`] if a live process holds the
    ///   lock.
    /// - Return [`LockError::Create`] if lock file cannot be created.
    /// - Return [`LockError::Stale`] if stale lock file cannot be removed.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            create_dir_all(parent).map_err(|err| LockError::Create {
                source: err,
                path: path.clone(),
            })?;
        }

        // INVARIANT: Take over a stale lock at most once.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id()).map_err(|err| LockError::Create {
                        source: err,
                        path: path.clone(),
                    })?;
                    debug!("acquired install lock {:?}", path.display());
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if let Some(pid) = holder_of(&path).filter(|pid| is_alive(*pid)) {
                        return Err(LockError::AlreadyRunning { pid, path });
                    }

                    warn!("remove stale install lock {:?}", path.display());
                    remove_file(&path).map_err(|err| LockError::Stale {
                        source: err,
                        path: path.clone(),
                    })?;
                }
                Err(err) => return Err(LockError::Create { source: err, path }),
            }
        }

        Err(LockError::Create {
            source: std::io::Error::from(ErrorKind::AlreadyExists),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(err) = remove_file(&self.path) {
            warn!("failed to release install lock {:?}: {err}", self.path.display());
        }
    }
}

fn holder_of(path: &Path) -> Option<u32> {
    read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_alive(pid: u32) -> bool {
    use std::process::{Command, Stdio};

    if pid == std::process::id() {
        return true;
    }

    // INVARIANT: Only a pid that `kill -0` rejects counts as dead.
    match Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(err) => {
            debug!("cannot check pid {pid}, assume it is alive: {err}");
            true
        }
    }
}

/// Install lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another installer holds the lock.
    #[error("installer already running as pid {pid} (lock file {:?})", path.display())]
    AlreadyRunning { pid: u32, path: PathBuf },

    /// Lock file cannot be created.
    #[error("failed to create install lock at {:?}", path.display())]
    Create {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Stale lock file cannot be removed.
    #[error("failed to remove stale install lock at {:?}", path.display())]
    Stale {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LockError> = std::result::Result<T, E>;
