// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installation pipeline.
//!
//! The [`Installer`] drives one install profile through a strict linear
//! pipeline:
//!
//! 1. Preflight checks.
//! 2. Helper resolution.
//! 3. Sequential part downloads.
//! 4. Concatenation into the archive bundle.
//! 5. Extraction of the payload subtree.
//! 6. Placement of the executable.
//! 7. Autostart registration.
//! 8. Launch and completion report.
//!
//! Every step whose output is already on disk is skipped, so an interrupted
//! run can be resumed by running again. Before touching anything, the
//! installer probes the install root and asks its caller for a [`Decision`]
//! whenever earlier artifacts exist.
//!
//! # Failure
//!
//! When a pipeline step fails, every part file, the archive bundle and any
//! staging directory are removed, and the manifest is reset. A placed
//! payload directory is never removed on failure.

use crate::{
    archive::{combine_parts, extract_payload, ArchiveError, SystemUnpacker, Unpacker},
    autostart::{launch_line, AutostartError, AutostartFile},
    config::{InstallLayout, InstallProfile, ReleaseSettings},
    fetch::{
        DownloadEngine, DownloadError, DownloadTask, HttpTransport, RetryPolicy, Transport,
        TransportError,
    },
    helper::{HelperError, HelperResolver},
    launch::{spawn_detached, wait_healthy, CompletionReport, LaunchError},
    lock::{InstallLock, LockError},
    manifest::{InstallManifest, ManifestError, ManifestFile, PartRecord, Stage},
    path::mark_executable,
    preflight::{self, PreflightError},
    state::{Decision, DecisionRequest, InstallationState, Phase, Plan},
};

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    ffi::OsString,
    fs::{create_dir_all, remove_dir_all, remove_file},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// What the installer found before doing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub state: InstallationState,
    pub phase: Phase,

    /// Question the caller must answer before installing, if any.
    pub request: Option<DecisionRequest>,
}

/// Result of an installation run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Pipeline ran to completion.
    Installed(CompletionReport),

    /// Operator declined, nothing was changed.
    Declined,
}

/// Install pipeline for one install profile.
pub struct Installer<T = HttpTransport>
where
    T: Transport,
{
    profile: InstallProfile,
    layout: InstallLayout,
    engine: DownloadEngine<T>,
    unpacker: Option<Box<dyn Unpacker>>,
    search_path: Option<OsString>,
    show_progress: bool,
}

impl Installer<HttpTransport> {
    /// Construct new installer that downloads over HTTP.
    ///
    /// # Errors
    ///
    /// - Return [`InstallerError::Transport`] if HTTP client cannot be built.
    pub fn new(profile: InstallProfile) -> Result<Self> {
        Ok(Self::with_transport(profile, HttpTransport::new()?))
    }
}

impl<T> Installer<T>
where
    T: Transport,
{
    /// Construct new installer on top of custom transport.
    pub fn with_transport(profile: InstallProfile, transport: T) -> Self {
        let engine = DownloadEngine::new(transport, retry_policy(&profile.release));
        Self {
            layout: profile.layout(),
            profile,
            engine,
            unpacker: None,
            search_path: std::env::var_os("PATH"),
            show_progress: true,
        }
    }

    /// Unpack with custom unpacker instead of the resolved helper program.
    pub fn with_unpacker(mut self, unpacker: Box<dyn Unpacker>) -> Self {
        self.unpacker = Some(unpacker);
        self
    }

    /// Look up helper program in custom search path instead of `PATH`.
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Draw progress bars while running.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.engine = self.engine.with_progress(show_progress);
        self.show_progress = show_progress;
        self
    }

    pub fn profile(&self) -> &InstallProfile {
        &self.profile
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn engine(&self) -> &DownloadEngine<T> {
        &self.engine
    }

    /// Probe install root without changing anything.
    pub fn assess(&self) -> Assessment {
        let state = InstallationState::probe(&self.layout);
        Assessment {
            state,
            phase: state.phase(),
            request: state.decision_request(),
        }
    }

    /// Run install pipeline.
    ///
    /// The decision answers the request returned by [`Installer::assess`].
    /// Install root is probed again under the install lock, so a decision
    /// made for a stale assessment still only applies to what is on disk.
    ///
    /// # Errors
    ///
    /// - Return [`InstallerError::Preflight`] if machine is unsuitable.
    /// - Return [`InstallerError::Lock`] if another installer is running.
    /// - Return any pipeline step's error after cleaning up debris.
    #[instrument(skip(self), level = "debug")]
    pub async fn install(&self, decision: Option<Decision>) -> Result<InstallOutcome> {
        preflight::check(&self.profile.preflight, self.layout.root())?;
        let _lock = InstallLock::acquire(self.layout.lock_path())?;

        let state = InstallationState::probe(&self.layout);
        let plan = Plan::decide(state.phase(), decision);
        info!("install root is {}, plan {plan:?}", state.phase());
        match plan {
            Plan::Decline => {
                info!("leave {:?} as it is", self.layout.root().display());
                return Ok(InstallOutcome::Declined);
            }
            Plan::Restart => self.remove_artifacts(true)?,
            Plan::Install | Plan::Resume => {}
        }

        match self.run_pipeline().await {
            Ok(report) => Ok(InstallOutcome::Installed(report)),
            Err(err) => {
                self.cleanup_after_failure();
                Err(err)
            }
        }
    }

    /// Remove install debris left by earlier runs.
    ///
    /// With `purge`, also remove the payload directory and the autostart
    /// entry.
    ///
    /// # Errors
    ///
    /// - Return [`InstallerError::Lock`] if another installer is running.
    /// - Return [`InstallerError::Io`] if an artifact cannot be removed.
    /// - Return [`InstallerError::Autostart`] if autostart entry cannot be
    ///   removed.
    #[instrument(skip(self), level = "debug")]
    pub fn clean(&self, purge: bool) -> Result<()> {
        if !self.layout.root().exists() {
            info!("nothing to clean at {:?}", self.layout.root().display());
            return Ok(());
        }

        let _lock = InstallLock::acquire(self.layout.lock_path())?;
        self.remove_artifacts(purge)?;
        if purge {
            let script = AutostartFile::new(&self.profile.autostart.file);
            script.unregister(&self.autostart_line())?;
        }

        Ok(())
    }

    async fn run_pipeline(&self) -> Result<CompletionReport> {
        let root = self.layout.root();
        create_dir_all(root).map_err(|err| io_err(err, root))?;
        self.sweep_staging()?;

        let manifest_file = ManifestFile::new(self.layout.manifest_path());
        let mut manifest = manifest_file.load()?;
        let state = InstallationState::probe(&self.layout);

        if state.has_extracted_payload {
            info!("payload already extracted, skipping to placement");
        } else {
            let helper = HelperResolver::new(self.profile.helper.clone())
                .with_search_path(self.search_path.clone())
                .resolve(&self.engine)
                .await?;

            if state.has_combined_archive {
                info!("archive bundle already combined, skipping downloads");
            } else {
                self.download_parts(&mut manifest, &manifest_file).await?;
                self.combine(&mut manifest, &manifest_file)?;
            }

            let system = SystemUnpacker::new(helper.path.clone());
            let unpacker: &dyn Unpacker = match self.unpacker.as_deref() {
                Some(unpacker) => unpacker,
                None => &system,
            };
            self.extract(unpacker)?;
            manifest.advance(Stage::Extracted);
            manifest_file.save(&manifest)?;

            if !self.profile.payload.keep_archive {
                self.remove_archive(&mut manifest, &manifest_file)?;
            }
        }

        let executable = self.place_executable().await?;
        manifest.advance(Stage::Placed);
        manifest_file.save(&manifest)?;

        AutostartFile::new(&self.profile.autostart.file).register(&self.autostart_line())?;
        manifest.advance(Stage::Registered);
        manifest_file.save(&manifest)?;

        let (pid, healthy) = if self.profile.settings.launch {
            let pid = spawn_detached(&executable)?;
            let healthy = match &self.profile.health {
                Some(health) => Some(wait_healthy(health).await),
                None => None,
            };
            (Some(pid), healthy)
        } else {
            debug!("launch disabled");
            (None, None)
        };

        manifest.advance(Stage::Complete);
        manifest_file.save(&manifest)?;

        Ok(CompletionReport::new(&self.profile, executable, pid, healthy))
    }

    #[instrument(skip(self, manifest, manifest_file), level = "debug")]
    async fn download_parts(
        &self,
        manifest: &mut InstallManifest,
        manifest_file: &ManifestFile,
    ) -> Result<()> {
        let release = &self.profile.release;
        for (name, path) in self.layout.part_names().iter().zip(self.layout.part_paths()) {
            // INVARIANT: Only a part with a matching record finished downloading.
            let finished = match manifest.parts.get(name) {
                Some(record) if path.is_file() => {
                    let matches = record.matches(&path).map_err(|err| io_err(err, &path))?;
                    if !matches {
                        warn!("{name} changed on disk since it was downloaded, fetch again");
                        remove_file(&path).map_err(|err| io_err(err, &path))?;
                    }
                    matches
                }
                _ => false,
            };
            if !finished && path.is_file() {
                info!("{name} was cut short, resume it");
            }

            let task = DownloadTask::new(release.url_of(name), &path)
                .with_min_size(self.layout.min_part_size())
                .with_sha256(release.checksums.get(name).cloned())
                .with_trust_existing(finished);
            self.engine.fetch(&task).await?;

            let record = PartRecord::of(&path).map_err(|err| io_err(err, &path))?;
            manifest.parts.insert(name.clone(), record);
            manifest_file.save(manifest)?;
        }

        manifest.advance(Stage::Downloaded);
        manifest_file.save(manifest)?;

        Ok(())
    }

    fn combine(&self, manifest: &mut InstallManifest, manifest_file: &ManifestFile) -> Result<()> {
        let bar = self.spinner("combine parts")?;
        let result = combine_parts(
            &self.layout.part_paths(),
            &self.layout.bundle_path(),
            &self.layout.bundle_partial_path(),
        );
        bar.finish_and_clear();
        result?;

        manifest.advance(Stage::Combined);
        manifest_file.save(manifest)?;

        Ok(())
    }

    fn extract(&self, unpacker: &dyn Unpacker) -> Result<()> {
        let bar = self.spinner("extract payload")?;
        let result = extract_payload(
            unpacker,
            &self.layout.bundle_path(),
            self.layout.root(),
            &self.profile.payload.subtree,
            &self.layout.payload_dir(),
        );
        bar.finish_and_clear();

        Ok(result?)
    }

    fn remove_archive(
        &self,
        manifest: &mut InstallManifest,
        manifest_file: &ManifestFile,
    ) -> Result<()> {
        remove_path(&self.layout.bundle_path())?;
        for part in self.layout.part_paths() {
            remove_path(&part)?;
        }
        manifest.parts.clear();
        manifest_file.save(manifest)?;
        debug!("removed archive bundle and part files");

        Ok(())
    }

    async fn place_executable(&self) -> Result<PathBuf> {
        let executable = self.layout.executable_path();
        if !executable.is_file() {
            let Some(url) = &self.profile.payload.executable_url else {
                return Err(InstallerError::MissingExecutable { path: executable });
            };

            info!("payload has no executable, fetch it from {url}");
            let payload_dir = self.layout.payload_dir();
            create_dir_all(&payload_dir).map_err(|err| io_err(err, &payload_dir))?;
            self.engine
                .fetch(&DownloadTask::new(url.as_str(), &executable))
                .await?;
        }

        mark_executable(&executable).map_err(|err| io_err(err, &executable))?;
        info!("placed executable {:?}", executable.display());

        Ok(executable)
    }

    fn autostart_line(&self) -> String {
        self.profile
            .autostart
            .line
            .clone()
            .unwrap_or_else(|| launch_line(&self.layout.executable_path()))
    }

    /// Part files, bundle, partial bundle, and staging directories.
    fn debris(&self) -> Vec<PathBuf> {
        let mut debris = self.layout.part_paths();
        debris.push(self.layout.bundle_path());
        debris.push(self.layout.bundle_partial_path());
        debris.extend(self.staging_dirs());

        debris
    }

    fn staging_dirs(&self) -> Vec<PathBuf> {
        match glob::glob(&self.layout.staging_pattern()) {
            Ok(entries) => entries.filter_map(|entry| entry.ok()).collect(),
            Err(err) => {
                warn!("cannot look for staging directories: {err}");
                Vec::new()
            }
        }
    }

    /// Remove staging directories an interrupted extraction left behind.
    fn sweep_staging(&self) -> Result<()> {
        for dir in self.staging_dirs() {
            info!("remove stale staging directory {:?}", dir.display());
            remove_path(&dir)?;
        }

        Ok(())
    }

    /// Remove debris and manifest, plus payload directory if asked to.
    fn remove_artifacts(&self, with_payload: bool) -> Result<()> {
        for path in self.debris() {
            remove_path(&path)?;
        }
        if with_payload {
            remove_path(&self.layout.payload_dir())?;
        }
        ManifestFile::new(self.layout.manifest_path()).remove()?;
        info!("removed previous artifacts from {:?}", self.layout.root().display());

        Ok(())
    }

    /// Best effort removal of debris after a failed pipeline step.
    fn cleanup_after_failure(&self) {
        warn!("installation failed, clean up");
        for path in self.debris() {
            if let Err(err) = remove_path(&path) {
                warn!("{err}");
            }
        }
        if let Err(err) = ManifestFile::new(self.layout.manifest_path()).remove() {
            warn!("{err}");
        }
    }

    fn spinner(&self, message: &str) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let style = ProgressStyle::with_template("{elapsed_precise:.green}  {msg:<50}  {spinner}")?
            .tick_chars("-Cco. ");
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(bar)
    }
}

/// Retry policy of release downloads.
pub fn retry_policy(release: &ReleaseSettings) -> RetryPolicy {
    RetryPolicy {
        max_attempts: release.max_retries.max(1),
        timeout: release.timeout(),
        backoff: release.backoff(),
    }
}

fn remove_path(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        remove_dir_all(path)
    } else {
        remove_file(path)
    };

    match result {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(io_err(err, path)),
        _ => Ok(()),
    }
}

fn io_err(err: std::io::Error, path: &Path) -> InstallerError {
    InstallerError::Io {
        source: err,
        path: path.to_path_buf(),
    }
}

/// Installer error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    /// Machine is unsuitable for installation.
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    /// Install lock cannot be held.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Install manifest cannot be read or written.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Helper program cannot be resolved.
    #[error(transparent)]
    Helper(#[from] HelperError),

    /// HTTP client cannot be built.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// File download fails.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Archive bundle cannot be combined or extracted.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Autostart script cannot be updated.
    #[error(transparent)]
    Autostart(#[from] AutostartError),

    /// Application cannot be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Payload lacks executable, and no URL to fetch it from is known.
    #[error("payload has no executable at {:?}", path.display())]
    MissingExecutable { path: PathBuf },

    /// Install artifact cannot be changed.
    #[error("failed to update {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = InstallerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn retry_policy_follows_release_settings() {
        let release = ReleaseSettings {
            max_retries: 5,
            timeout_secs: 60,
            backoff_secs: 2,
            ..Default::default()
        };
        let expect = RetryPolicy {
            max_attempts: 5,
            timeout: Duration::from_secs(60),
            backoff: Duration::from_secs(2),
        };
        assert_eq!(retry_policy(&release), expect);
    }

    #[test]
    fn retry_policy_always_makes_one_attempt() {
        let release = ReleaseSettings {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(retry_policy(&release).max_attempts, 1);
    }

    #[test]
    fn remove_path_ignores_missing_files() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        remove_path(&root.path().join("missing"))?;

        let dir = root.path().join("dir");
        create_dir_all(dir.join("nested"))?;
        remove_path(&dir)?;
        assert!(!dir.exists());

        Ok(())
    }
}
