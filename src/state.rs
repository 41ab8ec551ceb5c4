// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installation state and recovery decisions.
//!
//! Progress of an installation is reconstructed at the start of every run by
//! probing the fixed artifact paths of the [`InstallLayout`]. The result is
//! classified into a [`Phase`]. Partial and complete installations need an
//! operator [`Decision`] before the pipeline may continue, which the pipeline
//! hands back to its caller as a [`DecisionRequest`] instead of prompting on
//! its own.

use crate::{config::InstallLayout, path::is_executable};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};

/// Snapshot of installation artifacts found on disk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstallationState {
    /// Every part file exists above the size threshold.
    pub has_all_part_files: bool,

    /// At least one part file exists, complete or not.
    pub has_any_part_file: bool,

    /// Combined archive exists.
    pub has_combined_archive: bool,

    /// Application directory exists.
    pub has_extracted_payload: bool,

    /// Executable exists with an executable bit set.
    pub has_executable: bool,
}

impl InstallationState {
    /// Probe file system for installation artifacts.
    ///
    /// Pure function of disk state.
    pub fn probe(layout: &InstallLayout) -> Self {
        let parts = layout.part_paths();
        let has_all_part_files = parts
            .iter()
            .all(|part| is_part_complete(part, layout.min_part_size()));
        let has_any_part_file = parts.iter().any(|part| part.is_file());

        Self {
            has_all_part_files,
            has_any_part_file,
            has_combined_archive: layout.bundle_path().is_file(),
            has_extracted_payload: layout.payload_dir().is_dir(),
            has_executable: is_executable(layout.executable_path()),
        }
    }

    /// Classify snapshot into installation phase.
    pub fn phase(&self) -> Phase {
        if self.has_executable {
            Phase::Complete
        } else if self.has_any_part_file
            || self.has_combined_archive
            || self.has_extracted_payload
        {
            Phase::Partial
        } else {
            Phase::Fresh
        }
    }

    /// Decision the operator must make before the pipeline may continue.
    pub fn decision_request(&self) -> Option<DecisionRequest> {
        match self.phase() {
            Phase::Fresh => None,
            Phase::Partial => Some(DecisionRequest::ResumeOrRestart),
            Phase::Complete => Some(DecisionRequest::Reinstall),
        }
    }
}

impl Display for InstallationState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let mark = |flag: bool| if flag { "yes" } else { "no" };
        writeln!(fmt, "part files complete: {}", mark(self.has_all_part_files))?;
        writeln!(fmt, "combined archive:    {}", mark(self.has_combined_archive))?;
        writeln!(fmt, "extracted payload:   {}", mark(self.has_extracted_payload))?;
        write!(fmt, "executable:          {}", mark(self.has_executable))
    }
}

/// Completeness heuristic of a part file.
///
/// A part counts as complete once it exists and exceeds the size threshold.
pub fn is_part_complete(path: impl AsRef<Path>, min_size: u64) -> bool {
    path.as_ref()
        .metadata()
        .map(|meta| meta.is_file() && meta.len() > min_size)
        .unwrap_or(false)
}

/// Installation phase derived from [`InstallationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing installed yet.
    Fresh,

    /// Some artifacts exist, but no executable.
    Partial,

    /// Executable is in place.
    Complete,
}

impl Display for Phase {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Fresh => "fresh",
            Self::Partial => "partial",
            Self::Complete => "complete",
        };
        fmt.write_str(name)
    }
}

/// Question the pipeline needs answered before it continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionRequest {
    /// Partial installation: resume, restart, or abort.
    ResumeOrRestart,

    /// Complete installation: reinstall or exit.
    Reinstall,
}

impl DecisionRequest {
    /// Decisions that make sense for this request.
    pub fn choices(&self) -> &'static [Decision] {
        match self {
            Self::ResumeOrRestart => &[Decision::Resume, Decision::Restart, Decision::Abort],
            Self::Reinstall => &[Decision::Restart, Decision::Abort],
        }
    }
}

impl Display for DecisionRequest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::ResumeOrRestart => fmt.write_str("A previous installation was interrupted."),
            Self::Reinstall => fmt.write_str("The application is already installed."),
        }
    }
}

/// Operator answer to a [`DecisionRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Skip every step whose output is already complete.
    Resume,

    /// Remove all artifacts and start over. Answers a reinstall request.
    Restart,

    /// Leave everything as it is and exit successfully.
    Abort,
}

/// What the pipeline does after a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Run pipeline from scratch on an empty install root.
    Install,

    /// Run pipeline, skipping completed steps.
    Resume,

    /// Remove artifacts, then run pipeline from scratch.
    Restart,

    /// Do nothing.
    Decline,
}

impl Plan {
    /// Apply decision to phase.
    ///
    /// A missing decision is never taken as consent, so it declines.
    pub fn decide(phase: Phase, decision: Option<Decision>) -> Self {
        match (phase, decision) {
            (Phase::Fresh, _) => Self::Install,
            (Phase::Partial, Some(Decision::Resume)) => Self::Resume,
            (_, Some(Decision::Restart)) => Self::Restart,
            _ => Self::Decline,
        }
    }
}
