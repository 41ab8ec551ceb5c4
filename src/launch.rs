// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Application launch and completion report.

use crate::config::{HealthSettings, InstallProfile};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Start executable as detached background process.
///
/// The child gets its own process group and no standard streams, and is never
/// waited on. Returns the PID of the child.
///
/// # Errors
///
/// - Return [`LaunchError::Spawn`] if executable cannot be started.
#[instrument(skip(executable), level = "debug")]
pub fn spawn_detached(executable: &Path) -> Result<u32> {
    let mut command = Command::new(executable);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = executable.parent() {
        command.current_dir(dir);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().map_err(|err| LaunchError::Spawn {
        source: err,
        path: executable.to_path_buf(),
    })?;
    let pid = child.id();
    info!("started {:?} as pid {pid}", executable.display());

    Ok(pid)
}

/// Poll health check URL until it answers with a success status.
///
/// Best effort: returns `false` once every attempt failed.
#[instrument(skip(settings), fields(url = %settings.url), level = "debug")]
pub async fn wait_healthy(settings: &HealthSettings) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            warn!("cannot build health check client: {err}");
            return false;
        }
    };

    for attempt in 1..=settings.attempts {
        match client.get(&settings.url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("application healthy after {attempt} probe(s)");
                return true;
            }
            Ok(response) => debug!("probe {attempt}: status {}", response.status()),
            Err(err) => debug!("probe {attempt}: {err}"),
        }

        if attempt < settings.attempts {
            tokio::time::sleep(settings.interval()).await;
        }
    }

    warn!(
        "application did not answer at {} after {} probes",
        settings.url, settings.attempts
    );
    false
}

/// Final human-readable summary of an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub name: String,
    pub executable: PathBuf,
    pub autostart: PathBuf,
    pub pid: Option<u32>,
    pub healthy: Option<bool>,
    pub endpoints: Vec<String>,
    pub credentials: Vec<String>,
    pub commands: Vec<String>,
}

impl CompletionReport {
    /// Construct new report from profile and launch results.
    pub fn new(
        profile: &InstallProfile,
        executable: PathBuf,
        pid: Option<u32>,
        healthy: Option<bool>,
    ) -> Self {
        Self {
            name: profile.settings.name.clone(),
            executable,
            autostart: profile.autostart.file.clone(),
            pid,
            healthy,
            endpoints: profile.summary.endpoints.clone(),
            credentials: profile.summary.credentials.clone(),
            commands: profile.summary.commands.clone(),
        }
    }
}

impl Display for CompletionReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "{} is installed.", self.name)?;
        writeln!(fmt)?;
        writeln!(fmt, "executable: {}", self.executable.display())?;
        writeln!(fmt, "autostart:  {}", self.autostart.display())?;
        match self.pid {
            Some(pid) => writeln!(fmt, "running:    pid {pid}")?,
            None => writeln!(fmt, "running:    not started")?,
        }
        match self.healthy {
            Some(true) => writeln!(fmt, "health:     ok")?,
            Some(false) => writeln!(fmt, "health:     not answering yet")?,
            None => {}
        }

        for (title, lines) in [
            ("Access", &self.endpoints),
            ("Default credentials", &self.credentials),
            ("Management", &self.commands),
        ] {
            if lines.is_empty() {
                continue;
            }
            writeln!(fmt)?;
            writeln!(fmt, "{title}:")?;
            for line in lines {
                writeln!(fmt, "  {line}")?;
            }
        }

        Ok(())
    }
}

/// Launch error types.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Executable cannot be started.
    #[error("failed to start {:?}", path.display())]
    Spawn {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LaunchError> = std::result::Result<T, E>;
