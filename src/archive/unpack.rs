// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Unpacking through external programs.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::debug;

/// Layer of indirection for unpacking archives.
pub trait Unpacker {
    /// Unpack outer 7-Zip archive into directory.
    fn unpack_archive(&self, archive: &Path, into: &Path) -> Result<()>;

    /// Unpack tarball into directory.
    fn unpack_tarball(&self, tarball: &Path, into: &Path) -> Result<()>;
}

/// Unpack with 7-Zip and tar binaries.
#[derive(Debug, Clone)]
pub struct SystemUnpacker {
    extractor: PathBuf,
    tar: PathBuf,
}

impl SystemUnpacker {
    /// Construct new unpacker from path to 7-Zip extractor.
    ///
    /// Uses `tar` from `PATH` for inner tarballs.
    pub fn new(extractor: impl Into<PathBuf>) -> Self {
        Self {
            extractor: extractor.into(),
            tar: PathBuf::from("tar"),
        }
    }
}

impl Unpacker for SystemUnpacker {
    fn unpack_archive(&self, archive: &Path, into: &Path) -> Result<()> {
        let mut out_flag = std::ffi::OsString::from("-o");
        out_flag.push(into);
        syscall_non_interactive(
            &self.extractor,
            [OsStr::new("x"), OsStr::new("-y"), out_flag.as_os_str(), archive.as_os_str()],
        )?;

        Ok(())
    }

    fn unpack_tarball(&self, tarball: &Path, into: &Path) -> Result<()> {
        syscall_non_interactive(
            &self.tar,
            [
                OsStr::new("-xf"),
                tarball.as_os_str(),
                OsStr::new("-C"),
                into.as_os_str(),
            ],
        )?;

        Ok(())
    }
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect::<Vec<_>>();
    debug!("run {:?} {:?}", cmd.as_ref(), args);

    let output = Command::new(cmd.as_ref())
        .args(&args)
        .output()
        .map_err(|err| UnpackError::Spawn {
            source: err,
            program: PathBuf::from(cmd.as_ref()),
        })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(format!("stdout: {stdout}").as_str());
    }

    if !stderr.is_empty() {
        message.push_str(format!("stderr: {stderr}").as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message);

    if !output.status.success() {
        return Err(UnpackError::Failed {
            program: PathBuf::from(cmd.as_ref()),
            code: output.status.code(),
            message,
        });
    }

    Ok(message)
}

/// Unpacking error types.
#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    /// Program cannot be started.
    #[error("failed to run {:?}", program.display())]
    Spawn {
        #[source]
        source: std::io::Error,
        program: PathBuf,
    },

    /// Program exited unsuccessfully.
    #[error("command {:?} failed with exit code {code:?}:\n{message}", program.display())]
    Failed {
        program: PathBuf,
        code: Option<i32>,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = UnpackError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn syscall_reports_failure_with_output() {
        let result = syscall_non_interactive("sh", ["-c", "echo broken archive >&2; exit 2"]);
        match result {
            Err(UnpackError::Failed { code, message, .. }) => {
                assert_eq!(code, Some(2));
                assert_eq!(message, "stderr: broken archive");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn syscall_missing_program_fails_to_spawn() {
        let result = syscall_non_interactive("definitely-not-a-7zz", ["x"]);
        assert!(matches!(result, Err(UnpackError::Spawn { .. })));
    }
}
