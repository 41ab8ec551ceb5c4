// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment validation.
//!
//! Checks that must pass before the installer touches the network or the file
//! system: CPU architecture, free space below the install root, and presence
//! of external programs the pipeline shells out to.

use crate::{
    config::PreflightSettings,
    path::{find_program, nearest_existing_ancestor},
};

use std::{ffi::OsStr, path::Path};
use tracing::{debug, info, instrument};

const MEGABYTE: u64 = 1024 * 1024;

/// Facts gathered by a successful preflight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub arch: String,
    pub available_mb: u64,
}

/// Run every preflight check against the current machine.
///
/// # Errors
///
/// - Return [`PreflightError::UnsupportedArch`] if architecture mismatches.
/// - Return [`PreflightError::InsufficientSpace`] if free space is too low.
/// - Return [`PreflightError::MissingTools`] if required programs are absent.
/// - Return [`PreflightError::Space`] if free space cannot be queried.
#[instrument(skip(settings, install_root), level = "debug")]
pub fn check(settings: &PreflightSettings, install_root: &Path) -> Result<PreflightReport> {
    let arch = std::env::consts::ARCH;
    check_arch(&settings.arch, arch)?;

    let probe = nearest_existing_ancestor(install_root).unwrap_or(Path::new("/"));
    let available = fs2::available_space(probe).map_err(|err| PreflightError::Space {
        source: err,
        path: probe.display().to_string(),
    })?;
    let available_mb = check_space(settings.min_free_mb, available)?;

    let search_path = std::env::var_os("PATH");
    check_tools(&settings.required_tools, search_path.as_deref())?;

    info!("preflight passed: {arch}, {available_mb} MB free");
    Ok(PreflightReport {
        arch: arch.into(),
        available_mb,
    })
}

/// Compare required architecture with actual architecture.
pub fn check_arch(required: &str, actual: &str) -> Result<()> {
    if required != actual {
        return Err(PreflightError::UnsupportedArch {
            required: required.into(),
            actual: actual.into(),
        });
    }

    Ok(())
}

/// Compare required free space with available bytes, return free megabytes.
pub fn check_space(required_mb: u64, available_bytes: u64) -> Result<u64> {
    let available_mb = available_bytes / MEGABYTE;
    if available_mb < required_mb {
        return Err(PreflightError::InsufficientSpace {
            required_mb,
            available_mb,
        });
    }

    Ok(available_mb)
}

/// Ensure every required program can be found in search path.
pub fn check_tools(tools: &[String], search_path: Option<&OsStr>) -> Result<()> {
    let missing = tools
        .iter()
        .filter(|tool| {
            let found = find_program(tool.as_str(), search_path);
            debug!("tool {tool}: {found:?}");
            found.is_none()
        })
        .cloned()
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        return Err(PreflightError::MissingTools(missing));
    }

    Ok(())
}

/// Preflight error types.
#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    /// Machine does not run the required architecture.
    #[error("unsupported architecture {actual:?}, installer requires {required:?}")]
    UnsupportedArch { required: String, actual: String },

    /// Not enough free space below install root.
    #[error("insufficient free space: {available_mb} MB available, {required_mb} MB required")]
    InsufficientSpace { required_mb: u64, available_mb: u64 },

    /// Required programs are not installed.
    #[error("required tools not found in PATH: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    /// Free space cannot be determined.
    #[error("failed to query free space of {path:?}")]
    Space {
        #[source]
        source: std::io::Error,
        path: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PreflightError> = std::result::Result<T, E>;
