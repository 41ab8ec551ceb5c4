// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::{
    ffi::OsStr,
    fs::{metadata, set_permissions},
    path::{Path, PathBuf},
};

/// Determine default absolute path to install profile.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/retrostage/profile.toml` as
/// the default absolute path for the install profile. Does not check if the
/// path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_profile_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("retrostage").join("profile.toml"))
        .ok_or(NoWayHome)
}

/// Locate program by name in a search path.
///
/// The search path follows the `PATH` format, i.e., directories separated by
/// colons. Only regular files with an executable bit count as a match.
pub fn find_program(name: impl AsRef<OsStr>, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let search_path = search_path?;
    std::env::split_paths(search_path)
        .map(|dir| dir.join(name.as_ref()))
        .find(|candidate| is_executable(candidate))
}

/// Check if path is a regular file with at least one executable bit set.
#[cfg(unix)]
pub fn is_executable(path: impl AsRef<Path>) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata(path.as_ref())
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: impl AsRef<Path>) -> bool {
    metadata(path.as_ref())
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Add executable bits for user, group, and other to target file.
///
/// # Errors
///
/// - Return [`std::io::Error`] if file metadata cannot be read or changed.
#[cfg(unix)]
pub fn mark_executable(path: impl AsRef<Path>) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = metadata(path.as_ref())?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    set_permissions(path.as_ref(), permissions)
}

#[cfg(not(unix))]
pub fn mark_executable(path: impl AsRef<Path>) -> std::io::Result<()> {
    metadata(path.as_ref()).map(|_| ())
}

/// Walk up from target path until an existing directory is found.
///
/// Useful for querying file system information about a directory that has
/// not been created yet.
pub fn nearest_existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|ancestor| ancestor.is_dir())
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
