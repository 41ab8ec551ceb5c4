// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Resumable installer for retro-gaming appliances.
//!
//! Retrostage installs one application onto an appliance from a release host
//! that serves the application as a split archive. The parts are downloaded
//! one after another with retries and byte-range resume, concatenated back
//! into one archive, and extracted through a staging directory. The
//! application's executable is then placed, registered in the appliance's
//! shared autostart script, and launched.
//!
//! # Re-entrancy
//!
//! Every artifact lives at a fixed name below the install root. Running the
//! installer again after an interruption picks up where the last run left
//! off, once the operator agrees to resume. See [`installer::Installer`].
//!
//! # Install Profiles
//!
//! What to install, and where from, is described by an
//! [`config::InstallProfile`] written in TOML.

pub mod archive;
pub mod autostart;
pub mod config;
pub mod fetch;
pub mod helper;
pub mod installer;
pub mod launch;
pub mod lock;
pub mod manifest;
pub mod path;
pub mod preflight;
pub mod state;

pub use installer::{Assessment, InstallOutcome, Installer, InstallerError};
