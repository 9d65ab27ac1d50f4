//! Materialization configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::merge::CopyMode;

/// How the image contents reach the staging directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
    /// Unpack the image with `debugfs rdump` into a private scratch copy.
    #[default]
    Extract,
    /// Attach the image to a loop device and mount it read-only.
    Mount,
}

impl Strategy {
    /// Returns how regular files leave the staging directory under this
    /// strategy.
    ///
    /// A scratch extraction is disposable, so its files are moved. A
    /// read-only mount can only be read, so its files are duplicated.
    #[must_use]
    pub const fn copy_mode(self) -> CopyMode {
        match self {
            Self::Extract => CopyMode::Move,
            Self::Mount => CopyMode::Duplicate,
        }
    }

    /// Returns the strategy name as used on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Mount => "mount",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "extract" => Ok(Self::Extract),
            "mount" => Ok(Self::Mount),
            other => Err(format!("unknown strategy '{other}' (expected 'extract' or 'mount')")),
        }
    }
}

/// Configuration for a materialization run.
///
/// Every field has a working default for ext4 images on a stock Linux
/// system; tests and unusual hosts override individual fields.
///
/// # Examples
///
/// ```
/// use workspacefs_core::MaterializeConfig;
/// use workspacefs_core::Strategy;
///
/// let config = MaterializeConfig {
///     debugfs_path: "/usr/sbin/debugfs".into(),
///     ..MaterializeConfig::default().with_strategy(Strategy::Extract)
/// };
/// assert!(config.is_reserved(std::path::Path::new("lost+found")));
/// ```
#[derive(Debug, Clone)]
pub struct MaterializeConfig {
    /// Extraction strategy.
    pub strategy: Strategy,

    /// Path of the `debugfs` binary used by the extract strategy.
    pub debugfs_path: PathBuf,

    /// Path of the loop control device.
    pub loop_control_path: PathBuf,

    /// Prefix of loop device nodes; the slot index is appended.
    pub loop_device_prefix: String,

    /// Filesystem type passed to `mount(2)`.
    pub filesystem_type: String,

    /// Filesystem-specific mount data passed to `mount(2)`.
    pub mount_options: String,

    /// Top-level directories of the image that are never materialized.
    pub reserved_dirs: Vec<String>,

    /// Name prefix of the staging directory created in the output directory.
    pub staging_prefix: String,

    /// Permission bits for directories created in the output directory.
    pub dir_mode: u32,
}

impl Default for MaterializeConfig {
    /// Default values:
    /// - `strategy`: `Extract`
    /// - `debugfs_path`: `/sbin/debugfs`
    /// - `loop_control_path`: `/dev/loop-control`
    /// - `loop_device_prefix`: `/dev/loop`
    /// - `filesystem_type`: `ext4`
    /// - `mount_options`: `norecovery` (the image is never writable, so the
    ///   journal must not be replayed)
    /// - `reserved_dirs`: `["lost+found"]`
    /// - `staging_prefix`: `workspacefs-`
    /// - `dir_mode`: `0o755`
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            debugfs_path: PathBuf::from("/sbin/debugfs"),
            loop_control_path: PathBuf::from("/dev/loop-control"),
            loop_device_prefix: "/dev/loop".to_string(),
            filesystem_type: "ext4".to_string(),
            mount_options: "norecovery".to_string(),
            reserved_dirs: vec!["lost+found".to_string()],
            staging_prefix: "workspacefs-".to_string(),
            dir_mode: 0o755,
        }
    }
}

impl MaterializeConfig {
    /// Returns this configuration with a different strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Returns `true` if `relative` names a reserved directory of the image.
    ///
    /// Only exact matches against the path relative to the image root count;
    /// a nested `a/lost+found` is ordinary content.
    #[must_use]
    pub fn is_reserved(&self, relative: &std::path::Path) -> bool {
        self.reserved_dirs
            .iter()
            .any(|reserved| relative == std::path::Path::new(reserved))
    }

    /// Returns the device node path for loop slot `index`.
    #[must_use]
    pub fn loop_device_path(&self, index: u32) -> PathBuf {
        PathBuf::from(format!("{}{index}", self.loop_device_prefix))
    }
}
