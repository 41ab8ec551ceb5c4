// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Autostart registration.
//!
//! The appliance runs one shared shell script at boot. Installers register
//! their application by appending a launch line to it. Other installers use
//! the same script, so the file is only ever appended to, and a line is only
//! appended if the script does not already contain it.

use std::{
    fs::{create_dir_all, read_to_string, write, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Default launch line for executable.
///
/// Runs executable in the background so the boot script keeps going.
pub fn launch_line(executable: &Path) -> String {
    format!("\"{}\" &", executable.display())
}

/// Shared autostart script.
#[derive(Debug, Clone)]
pub struct AutostartFile {
    path: PathBuf,
}

impl AutostartFile {
    /// Construct new autostart script handle.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Check if script contains launch line.
    ///
    /// A missing script contains nothing.
    ///
    /// # Errors
    ///
    /// - Return [`AutostartError::Read`] if script cannot be read.
    pub fn contains(&self, line: &str) -> Result<bool> {
        Ok(self
            .read()?
            .lines()
            .any(|existing| existing.trim() == line.trim()))
    }

    /// Append launch line to script unless already present.
    ///
    /// Returns `true` if the line was appended.
    ///
    /// # Errors
    ///
    /// - Return [`AutostartError::Read`] if script cannot be read.
    /// - Return [`AutostartError::Write`] if script cannot be appended to.
    #[instrument(skip(self), level = "debug")]
    pub fn register(&self, line: &str) -> Result<bool> {
        let content = self.read()?;
        if content.lines().any(|existing| existing.trim() == line.trim()) {
            debug!("{:?} already registers launch line", self.path.display());
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            create_dir_all(parent).map_err(|err| self.write_err(err))?;
        }

        let mut entry = String::new();
        if !content.is_empty() && !content.ends_with('\n') {
            entry.push('\n');
        }
        entry.push_str(line.trim());
        entry.push('\n');

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(entry.as_bytes()))
            .map_err(|err| self.write_err(err))?;

        info!("registered autostart entry in {:?}", self.path.display());
        Ok(true)
    }

    /// Remove every occurrence of launch line from script.
    ///
    /// Returns `true` if anything was removed.
    ///
    /// # Errors
    ///
    /// - Return [`AutostartError::Read`] if script cannot be read.
    /// - Return [`AutostartError::Write`] if script cannot be rewritten.
    pub fn unregister(&self, line: &str) -> Result<bool> {
        let content = self.read()?;
        let kept = content
            .lines()
            .filter(|existing| existing.trim() != line.trim())
            .collect::<Vec<_>>();
        if kept.len() == content.lines().count() {
            return Ok(false);
        }

        let mut out = kept.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        write(&self.path, out.as_bytes()).map_err(|err| self.write_err(err))?;

        info!("removed autostart entry from {:?}", self.path.display());
        Ok(true)
    }

    fn read(&self) -> Result<String> {
        match read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(AutostartError::Read {
                source: err,
                path: self.path.clone(),
            }),
        }
    }

    fn write_err(&self, err: std::io::Error) -> AutostartError {
        AutostartError::Write {
            source: err,
            path: self.path.clone(),
        }
    }
}

/// Autostart error types.
#[derive(Debug, thiserror::Error)]
pub enum AutostartError {
    /// Autostart script cannot be read from.
    #[error("failed to read autostart script at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Autostart script cannot be written to.
    #[error("failed to write autostart script at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = AutostartError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn register_is_idempotent() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let script = AutostartFile::new(root.path().join("system").join("custom.sh"));
        let line = launch_line(Path::new("/userdata/system/retrostage/app/app"));

        assert!(script.register(&line)?);
        let once = read_to_string(script.path())?;
        assert!(!script.register(&line)?);
        let twice = read_to_string(script.path())?;

        assert_eq!(once, twice);
        assert_eq!(twice.lines().filter(|existing| *existing == line).count(), 1);
        assert!(script.contains(&line)?);

        Ok(())
    }

    #[test]
    fn register_appends_after_foreign_entries() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let script = AutostartFile::new(root.path().join("custom.sh"));
        write(script.path(), "#!/bin/bash\n/usr/bin/other-service &")?;

        script.register("\"/opt/app/app\" &")?;
        let result = read_to_string(script.path())?;
        let expect = indoc! {r#"
            #!/bin/bash
            /usr/bin/other-service &
            "/opt/app/app" &
        "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn unregister_keeps_foreign_entries() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let script = AutostartFile::new(root.path().join("custom.sh"));
        write(
            script.path(),
            indoc! {r#"
                #!/bin/bash
                "/opt/app/app" &
                /usr/bin/other-service &
            "#},
        )?;

        assert!(script.unregister("\"/opt/app/app\" &")?);
        assert!(!script.unregister("\"/opt/app/app\" &")?);
        let result = read_to_string(script.path())?;
        let expect = indoc! {r#"
            #!/bin/bash
            /usr/bin/other-service &
        "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn missing_script_contains_nothing() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let script = AutostartFile::new(root.path().join("custom.sh"));
        assert!(!script.contains("anything")?);
        assert!(!script.unregister("anything")?);

        Ok(())
    }
}
