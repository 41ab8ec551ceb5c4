// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Helper program resolution.
//!
//! The extractor used for the outer archive is not part of every appliance
//! image. It is looked up once per run through a fallback chain: the search
//! path, then the cache left by a previous install, then a fetch from the
//! release host into that cache. Each source is tried at most once.

use crate::{
    config::HelperSettings,
    fetch::{DownloadEngine, DownloadError, DownloadTask, Transport},
    path::{find_program, mark_executable},
};

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::create_dir_all,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Where the helper program was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperSource {
    SearchPath,
    Cache,
    Remote,
}

impl Display for HelperSource {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::SearchPath => "PATH",
            Self::Cache => "cache",
            Self::Remote => "remote",
        };
        fmt.write_str(name)
    }
}

/// Usable helper program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHelper {
    pub path: PathBuf,
    pub source: HelperSource,
}

/// Resolve helper program through fallback chain.
#[derive(Debug, Clone)]
pub struct HelperResolver {
    settings: HelperSettings,
    search_path: Option<OsString>,
}

impl HelperResolver {
    /// Construct new resolver using `PATH` of current process.
    pub fn new(settings: HelperSettings) -> Self {
        Self {
            settings,
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Use custom search path instead of `PATH`.
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Resolve helper program.
    ///
    /// # Errors
    ///
    /// - Return [`HelperError::CacheDir`] if cache directory cannot be made.
    /// - Return [`HelperError::Fetch`] if remote fetch fails.
    /// - Return [`HelperError::Permissions`] if helper cannot be made
    ///   executable.
    #[instrument(skip(self, engine), level = "debug")]
    pub async fn resolve<T>(&self, engine: &DownloadEngine<T>) -> Result<ResolvedHelper>
    where
        T: Transport,
    {
        let name = &self.settings.name;
        if let Some(path) = find_program(name, self.search_path.as_deref()) {
            return Ok(self.found(path, HelperSource::SearchPath));
        }

        let cached = self.settings.cache_dir.join(name);
        if cached.is_file() {
            self.make_executable(&cached)?;
            return Ok(self.found(cached, HelperSource::Cache));
        }

        info!("{name} not found locally, fetch from {}", self.settings.url);
        create_dir_all(&self.settings.cache_dir).map_err(|err| HelperError::CacheDir {
            source: err,
            path: self.settings.cache_dir.clone(),
        })?;
        engine
            .fetch(&DownloadTask::new(&self.settings.url, &cached))
            .await
            .map_err(|err| HelperError::Fetch {
                name: name.clone(),
                source: err,
            })?;
        self.make_executable(&cached)?;

        Ok(self.found(cached, HelperSource::Remote))
    }

    fn found(&self, path: PathBuf, source: HelperSource) -> ResolvedHelper {
        info!("using {} from {source}: {:?}", self.settings.name, path.display());
        ResolvedHelper { path, source }
    }

    fn make_executable(&self, path: &Path) -> Result<()> {
        mark_executable(path).map_err(|err| HelperError::Permissions {
            source: err,
            path: path.to_path_buf(),
        })
    }
}

/// Helper resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    /// Cache directory cannot be created.
    #[error("failed to create helper cache directory {:?}", path.display())]
    CacheDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Every source failed, including the remote fetch.
    #[error("helper {name} is not installed and cannot be fetched")]
    Fetch {
        name: String,
        #[source]
        source: DownloadError,
    },

    /// Helper cannot be made executable.
    #[error("failed to mark helper {:?} executable", path.display())]
    Permissions {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = HelperError> = std::result::Result<T, E>;
