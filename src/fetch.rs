// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Download engine.
//!
//! Fetches one file per [`DownloadTask`] with redirect resolution, byte-range
//! resume, a hard wall-clock limit per attempt, and a flat backoff between
//! attempts. The actual byte transfer goes through a [`Transport`] so the
//! retry logic can be exercised without a network.
//!
//! # Completeness
//!
//! A destination counts as complete when it exists and is larger than the
//! task's size threshold. Complete destinations of trusted tasks are never
//! fetched again, which keeps repeated runs idempotent. Destinations of
//! untrusted tasks are handed to the transport as a prefix to continue. When the task carries a SHA-256
//! digest it is checked after every transfer, and a mismatch fails the
//! attempt.

pub mod transport;

pub use transport::{HttpTransport, Transport, TransportError};

use crate::{manifest::file_sha256, state::is_part_complete};

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fs::remove_file,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// One retryable network fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub source_url: String,
    pub destination: PathBuf,
    pub min_size: u64,
    pub sha256: Option<String>,

    /// Treat a destination above the size threshold as finished without
    /// asking the remote.
    pub trust_existing: bool,
}

impl DownloadTask {
    /// Construct new download task with no size threshold or digest.
    pub fn new(source_url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            destination: destination.into(),
            min_size: 0,
            sha256: None,
            trust_existing: true,
        }
    }

    /// Require destination to be larger than threshold.
    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    /// Require destination to match SHA-256 digest.
    pub fn with_sha256(mut self, sha256: Option<String>) -> Self {
        self.sha256 = sha256;
        self
    }

    /// Continue existing destination instead of skipping it.
    pub fn with_trust_existing(mut self, trust_existing: bool) -> Self {
        self.trust_existing = trust_existing;
        self
    }

    /// File name used to identify task in logs and errors.
    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.destination.display().to_string())
    }

    pub fn is_complete(&self) -> bool {
        is_part_complete(&self.destination, self.min_size)
    }
}

/// Attempt limits of the download engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per task.
    pub max_attempts: u32,

    /// Wall-clock limit per attempt.
    pub timeout: Duration,

    /// Flat delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(300),
            backoff: Duration::from_secs(5),
        }
    }
}

/// Result of a finished download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchReport {
    /// Attempts made, zero when the destination was already complete.
    pub attempts: u32,

    /// Final size of destination.
    pub bytes: u64,
}

impl FetchReport {
    pub fn skipped(&self) -> bool {
        self.attempts == 0
    }
}

/// Retrying downloader.
#[derive(Debug)]
pub struct DownloadEngine<T = HttpTransport>
where
    T: Transport,
{
    transport: T,
    policy: RetryPolicy,
    show_progress: bool,
}

impl<T> DownloadEngine<T>
where
    T: Transport,
{
    /// Construct new download engine.
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            show_progress: true,
        }
    }

    /// Draw progress bars while downloading.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch task's source into its destination.
    ///
    /// # Errors
    ///
    /// - Return [`DownloadError::Exhausted`] naming the file if every attempt
    ///   failed. The partial destination is removed in that case.
    /// - Return [`DownloadError::ProgressTemplate`] if progress bar style is
    ///   invalid.
    #[instrument(skip(self, task), fields(file = %task.file_name()), level = "debug")]
    pub async fn fetch(&self, task: &DownloadTask) -> Result<FetchReport> {
        if task.trust_existing && task.is_complete() {
            info!("{} already downloaded, skipping", task.file_name());
            return Ok(FetchReport {
                attempts: 0,
                bytes: file_len(&task.destination),
            });
        }

        let url = self.transport.resolve(&task.source_url).await;
        debug!("effective url {url}");

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(
                "download {} (attempt {attempt}/{})",
                task.file_name(),
                self.policy.max_attempts
            );

            let bar = self.progress_bar(task)?;
            let result = self.attempt(&url, task, &bar).await;
            bar.finish_and_clear();

            let failure = match result {
                Ok(bytes) => {
                    info!("downloaded {} ({bytes} bytes)", task.file_name());
                    return Ok(FetchReport {
                        attempts: attempt,
                        bytes,
                    });
                }
                Err(failure) => failure,
            };

            warn!("attempt {attempt} for {} failed: {failure}", task.file_name());
            if attempt >= self.policy.max_attempts {
                discard(&task.destination);
                return Err(DownloadError::Exhausted {
                    file: task.file_name(),
                    attempts: attempt,
                    source: failure,
                });
            }

            tokio::time::sleep(self.policy.backoff).await;
        }
    }

    async fn attempt(
        &self,
        url: &str,
        task: &DownloadTask,
        bar: &ProgressBar,
    ) -> Result<u64, AttemptFailure> {
        tokio::time::timeout(
            self.policy.timeout,
            self.transport.transfer(url, &task.destination, bar),
        )
        .await
        .map_err(|_| AttemptFailure::TimedOut(self.policy.timeout))??;

        let bytes = file_len(&task.destination);
        if bytes == 0 || !task.is_complete() {
            // INVARIANT: Transfer claimed success, so the bytes on disk are
            // wrong rather than incomplete.
            discard(&task.destination);
            return Err(AttemptFailure::TooSmall {
                bytes,
                min_size: task.min_size,
            });
        }

        if let Some(expect) = &task.sha256 {
            let actual = file_sha256(&task.destination).map_err(AttemptFailure::Verify)?;
            if !actual.eq_ignore_ascii_case(expect) {
                discard(&task.destination);
                return Err(AttemptFailure::ChecksumMismatch {
                    expect: expect.clone(),
                    actual,
                });
            }
        }

        Ok(bytes)
    }

    fn progress_bar(&self, task: &DownloadTask) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}] {bytes}/{total_bytes}",
        )?
        .progress_chars("-Cco.");
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_message(task.file_name());
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(bar)
    }
}

fn file_len(path: &Path) -> u64 {
    path.metadata().map(|meta| meta.len()).unwrap_or(0)
}

fn discard(path: &Path) {
    match remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            warn!("failed to remove {:?}: {err}", path.display())
        }
        _ => {}
    }
}

/// Reason a single download attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptFailure {
    /// Attempt exceeded wall-clock limit.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Transfer itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Output missing, empty, or below threshold.
    #[error("output has {bytes} bytes, expected more than {min_size}")]
    TooSmall { bytes: u64, min_size: u64 },

    /// Output digest differs from expected digest.
    #[error("checksum mismatch: expected {expect}, got {actual}")]
    ChecksumMismatch { expect: String, actual: String },

    /// Output cannot be hashed.
    #[error("failed to hash output")]
    Verify(#[source] std::io::Error),
}

/// Download error types.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Every attempt failed.
    #[error("failed to download {file} after {attempts} attempts")]
    Exhausted {
        file: String,
        attempts: u32,
        #[source]
        source: AttemptFailure,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    ProgressTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = DownloadError> = std::result::Result<T, E>;
