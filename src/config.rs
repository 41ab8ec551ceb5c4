// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the install profile that Retrostage uses to decide
//! what to download, where to put it, and how to announce it afterwards.
//!
//! # Install Profile
//!
//! An __install profile__ describes one installable product. It names the
//! release host and the split archive it serves, the install root on the
//! appliance, the payload subtree expected inside the archive, the helper
//! extractor to fetch when missing, the shared autostart script, and the
//! summary shown to the user once everything is up.
//!
//! When no profile file exists the built-in default profile is used. The
//! default profile can be printed and edited through `retrostage profile`.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// Install profile layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallProfile {
    /// General settings of the installation.
    pub settings: ProfileSettings,

    /// Environment requirements checked before anything is touched.
    pub preflight: PreflightSettings,

    /// Release host and split archive layout.
    pub release: ReleaseSettings,

    /// Archive payload and executable placement.
    pub payload: PayloadSettings,

    /// Helper extractor resolution chain.
    pub helper: HelperSettings,

    /// Shared autostart script.
    pub autostart: AutostartSettings,

    /// Local liveness probe of the launched application.
    pub health: Option<HealthSettings>,

    /// Completion report lines.
    pub summary: SummarySettings,
}

impl InstallProfile {
    /// Load install profile from file.
    ///
    /// Falls back to the built-in default profile if the file does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if profile file exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if profile is malformed.
    /// - Return [`ConfigError::ShellExpansion`] if path expansion fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }

        read_to_string(path.as_ref())
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.as_ref().to_path_buf(),
            })?
            .parse()
    }

    /// Resolve on-disk layout of the installation.
    pub fn layout(&self) -> InstallLayout {
        InstallLayout::new(self)
    }
}

impl FromStr for InstallProfile {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut profile: InstallProfile =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        profile.settings.install_root = expand(&profile.settings.install_root)?;
        profile.helper.cache_dir = expand(&profile.helper.cache_dir)?;
        profile.autostart.file = expand(&profile.autostart.file)?;

        Ok(profile)
    }
}

impl Display for InstallProfile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// General settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// Human readable product name.
    pub name: String,

    /// Directory that receives downloads, the manifest, and the payload.
    pub install_root: PathBuf,

    /// Name of the application directory inside the install root.
    pub app_dir: String,

    /// Seconds to wait for an operator decision before aborting.
    pub prompt_timeout_secs: u64,

    /// Start the application once it is installed.
    pub launch: bool,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            name: "Retrostage".into(),
            install_root: PathBuf::from("/userdata/system/retrostage"),
            app_dir: "app".into(),
            prompt_timeout_secs: 300,
            launch: true,
        }
    }
}

impl ProfileSettings {
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
}

/// Environment requirements.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreflightSettings {
    /// Required CPU architecture as reported by the compiler target.
    pub arch: String,

    /// Minimum free space on the install root in megabytes.
    pub min_free_mb: u64,

    /// External programs that must be on `PATH`.
    pub required_tools: Vec<String>,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            arch: "x86_64".into(),
            min_free_mb: 2048,
            required_tools: vec!["tar".into()],
        }
    }
}

/// Release host and split archive layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReleaseSettings {
    /// Base URL the part files are served from.
    pub base_url: String,

    /// Name of the combined archive, e.g., `app.7z`.
    pub archive: String,

    /// Number of part files, named `<archive>.001` onward.
    pub part_count: u32,

    /// Size a part must exceed to count as completely downloaded.
    pub min_part_size: u64,

    /// Total attempts per download.
    pub max_retries: u32,

    /// Wall-clock limit of a single download attempt in seconds.
    pub timeout_secs: u64,

    /// Flat delay between download attempts in seconds.
    pub backoff_secs: u64,

    /// Optional SHA-256 digests keyed by part file name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            base_url: "https://releases.example.com/retrostage/latest".into(),
            archive: "app.7z".into(),
            part_count: 4,
            min_part_size: 1_000_000,
            max_retries: 3,
            timeout_secs: 300,
            backoff_secs: 5,
            checksums: BTreeMap::new(),
        }
    }
}

impl ReleaseSettings {
    /// Names of every part file in concatenation order.
    pub fn part_names(&self) -> Vec<String> {
        (1..=self.part_count)
            .map(|index| format!("{}.{index:03}", self.archive))
            .collect()
    }

    /// Remote URL of file served by the release host.
    pub fn url_of(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Archive payload and executable placement.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PayloadSettings {
    /// Directory expected at the top of the extracted archive tree.
    pub subtree: String,

    /// Executable file name inside the application directory.
    pub executable: String,

    /// Direct download URL of the executable, if not shipped in the archive.
    pub executable_url: Option<String>,

    /// Keep part files and combined archive after extraction.
    pub keep_archive: bool,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            subtree: "app".into(),
            executable: "app".into(),
            executable_url: None,
            keep_archive: false,
        }
    }
}

/// Helper extractor resolution chain.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HelperSettings {
    /// Program name searched on `PATH` and inside the cache.
    pub name: String,

    /// Cache directory from a previous install.
    pub cache_dir: PathBuf,

    /// Remote URL to fetch program from when everything else fails.
    pub url: String,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            name: "7zz".into(),
            cache_dir: PathBuf::from("/userdata/system/.cache/retrostage/bin"),
            url: "https://releases.example.com/retrostage/tools/7zz".into(),
        }
    }
}

/// Shared autostart script.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutostartSettings {
    /// Script executed at boot that launch lines are appended to.
    pub file: PathBuf,

    /// Custom launch line, defaults to running the executable in background.
    pub line: Option<String>,
}

impl Default for AutostartSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from("/userdata/system/custom.sh"),
            line: None,
        }
    }
}

/// Local liveness probe.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthSettings {
    /// URL answered by the launched application.
    pub url: String,

    /// Number of probes before giving up.
    pub attempts: u32,

    /// Seconds between probes.
    pub interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/".into(),
            attempts: 30,
            interval_secs: 1,
        }
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Completion report lines.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SummarySettings {
    /// Addresses the application can be reached at.
    pub endpoints: Vec<String>,

    /// Default credentials of the application.
    pub credentials: Vec<String>,

    /// Commands to manage the application.
    pub commands: Vec<String>,
}

/// On-disk layout of an installation.
///
/// Every artifact that the installer creates lives at a fixed name below the
/// install root, so probing for them is enough to reconstruct progress.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InstallLayout {
    root: PathBuf,
    app_dir: String,
    archive: String,
    part_names: Vec<String>,
    executable: String,
    min_part_size: u64,
}

impl InstallLayout {
    /// Construct new layout from install profile.
    pub fn new(profile: &InstallProfile) -> Self {
        Self {
            root: profile.settings.install_root.clone(),
            app_dir: profile.settings.app_dir.clone(),
            archive: profile.release.archive.clone(),
            part_names: profile.release.part_names(),
            executable: profile.payload.executable.clone(),
            min_part_size: profile.release.min_part_size,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn part_names(&self) -> &[String] {
        self.part_names.as_slice()
    }

    /// Local paths of every part file in concatenation order.
    pub fn part_paths(&self) -> Vec<PathBuf> {
        self.part_names
            .iter()
            .map(|name| self.root.join(name))
            .collect()
    }

    pub fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.root.join(&self.archive)
    }

    /// Temporary path the bundle is written to before being renamed.
    pub fn bundle_partial_path(&self) -> PathBuf {
        self.root.join(format!("{}.partial", self.archive))
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.root.join(&self.app_dir)
    }

    pub fn executable_path(&self) -> PathBuf {
        self.payload_dir().join(&self.executable)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(".retrostage-manifest.toml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".retrostage.lock")
    }

    /// Glob pattern matching leftover staging directories.
    pub fn staging_pattern(&self) -> String {
        format!("{}/.staging-*", glob::Pattern::escape(&self.root.to_string_lossy()))
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read profile file.
    #[error("failed to read install profile at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
