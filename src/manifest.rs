// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Persisted install manifest.
//!
//! The manifest records the last pipeline stage that finished successfully,
//! and the size plus SHA-256 digest of every part file that was downloaded.
//! Probing the file system still decides what gets skipped on resume. The
//! manifest makes that decision exact for part files whose contents changed
//! on disk between two runs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{read_to_string, remove_file, rename, write, File},
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Pipeline stages in the order they complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Downloaded,
    Combined,
    Extracted,
    Placed,
    Registered,
    Complete,
}

impl Display for Stage {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Downloaded => "downloaded",
            Self::Combined => "combined",
            Self::Extracted => "extracted",
            Self::Placed => "placed",
            Self::Registered => "registered",
            Self::Complete => "complete",
        };
        fmt.write_str(name)
    }
}

/// Size and digest of a downloaded part file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PartRecord {
    pub size: u64,
    pub sha256: String,
}

impl PartRecord {
    /// Record size and digest of file at target path.
    pub fn of(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let size = path.as_ref().metadata()?.len();
        let sha256 = file_sha256(path)?;
        Ok(Self { size, sha256 })
    }

    /// Check that file at target path still matches this record.
    ///
    /// A size mismatch is detected without hashing the file.
    pub fn matches(&self, path: impl AsRef<Path>) -> std::io::Result<bool> {
        if path.as_ref().metadata()?.len() != self.size {
            return Ok(false);
        }

        Ok(file_sha256(path)? == self.sha256)
    }
}

/// Install manifest layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstallManifest {
    /// Last stage that completed successfully.
    pub stage: Option<Stage>,

    /// Records of downloaded part files keyed by file name.
    #[serde(default, rename = "part")]
    pub parts: BTreeMap<String, PartRecord>,
}

impl InstallManifest {
    /// Mark stage as completed.
    ///
    /// Stages never move backwards, so marking an earlier stage is a no-op.
    pub fn advance(&mut self, stage: Stage) {
        if self.stage.is_none_or(|current| current < stage) {
            self.stage = Some(stage);
        }
    }

    pub fn reached(&self, stage: Stage) -> bool {
        self.stage.is_some_and(|current| current >= stage)
    }
}

impl FromStr for InstallManifest {
    type Err = ManifestError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ManifestError::Deserialize)
    }
}

impl Display for InstallManifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ManifestError::Serialize)?
                .as_str(),
        )
    }
}

/// Manifest file inside the install root.
#[derive(Debug, Clone)]
pub struct ManifestFile {
    path: PathBuf,
}

impl ManifestFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load manifest, or an empty manifest if the file does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Read`] if manifest cannot be read.
    /// - Return [`ManifestError::Deserialize`] if manifest is malformed.
    pub fn load(&self) -> Result<InstallManifest> {
        if !self.path.exists() {
            return Ok(InstallManifest::default());
        }

        read_to_string(&self.path)
            .map_err(|err| ManifestError::Read {
                source: err,
                path: self.path.clone(),
            })?
            .parse()
    }

    /// Save manifest.
    ///
    /// Writes to a sibling file first, and renames it over the manifest so a
    /// crash never leaves a truncated manifest behind.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Write`] if manifest cannot be written.
    pub fn save(&self, manifest: &InstallManifest) -> Result<()> {
        let staged = self.path.with_extension("toml.tmp");
        write(&staged, manifest.to_string().as_bytes())
            .and_then(|_| rename(&staged, &self.path))
            .map_err(|err| ManifestError::Write {
                source: err,
                path: self.path.clone(),
            })
    }

    /// Remove manifest if present.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Write`] if manifest cannot be removed.
    pub fn remove(&self) -> Result<()> {
        match remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(ManifestError::Write {
                source: err,
                path: self.path.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Compute hex-encoded SHA-256 digest of entire file.
pub fn file_sha256(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Manifest error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest file cannot be read.
    #[error("failed to read install manifest at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Manifest file cannot be written.
    #[error("failed to write install manifest at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

impl From<ManifestError> for FmtError {
    fn from(_: ManifestError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;
