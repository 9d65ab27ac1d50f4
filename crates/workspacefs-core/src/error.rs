//! Error types for image materialization.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Result type alias using `MaterializeError`.
pub type Result<T> = std::result::Result<T, MaterializeError>;

/// A single step of the loop-mount lifecycle.
///
/// Carried by acquisition and release errors so callers can tell exactly
/// which kernel resource was involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountStep {
    /// Opening the loop control file.
    OpenControl,
    /// Opening the backing image file.
    OpenImage,
    /// Requesting a free loop device slot.
    AllocateSlot,
    /// Opening the loop device node.
    OpenDevice,
    /// Binding the image descriptor to the loop device.
    BindDevice,
    /// Mounting the loop device.
    Mount,
    /// Unmounting the loop device.
    Unmount,
    /// Detaching the image from the loop device.
    DetachDevice,
    /// Returning the loop device slot to the kernel.
    RemoveSlot,
}

impl fmt::Display for MountStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::OpenControl => "open loop control",
            Self::OpenImage => "open image",
            Self::AllocateSlot => "allocate loop device",
            Self::OpenDevice => "open loop device",
            Self::BindDevice => "bind image to loop device",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::DetachDevice => "detach loop device",
            Self::RemoveSlot => "remove loop device",
        };
        f.write_str(step)
    }
}

/// Broad classification of a [`MaterializeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller passed arguments that violate a precondition.
    PreconditionViolation,
    /// A kernel resource could not be acquired.
    ResourceAcquisition,
    /// A kernel resource could not be released.
    ResourceRelease,
    /// An external tool exited unsuccessfully.
    ExternalTool,
    /// The image contains an entry that cannot be materialized.
    UnsupportedFileType,
    /// The operation was cancelled or ran past its deadline.
    Cancellation,
    /// Plain filesystem I/O failed.
    Io,
}

/// Errors that can occur while materializing an image.
#[derive(Error, Debug)]
pub enum MaterializeError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Walking the staged tree failed.
    #[error("failed to walk staged tree at {path}: {source}")]
    Walk {
        /// Path the walker was visiting.
        path: PathBuf,
        /// Underlying walker error.
        #[source]
        source: walkdir::Error,
    },

    /// Direct extraction requires an empty destination.
    #[error("destination directory is not empty: {path}")]
    NonEmptyDirectory {
        /// The offending directory.
        path: PathBuf,
    },

    /// The output directory failed validation.
    #[error("invalid output directory {path}: {reason}")]
    InvalidOutputDir {
        /// The rejected path.
        path: PathBuf,
        /// Why the path was rejected.
        reason: String,
    },

    /// Loop mounting is not available on this platform.
    #[error("loop-device mounting is only supported on Linux")]
    UnsupportedPlatform,

    /// A loop-mount resource could not be acquired.
    #[error("failed to {step}: {source}")]
    ResourceAcquisition {
        /// The step that failed.
        step: MountStep,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A loop-mount resource could not be released.
    #[error("failed to release loop mount ({step}): {source}")]
    ResourceRelease {
        /// The step that failed.
        step: MountStep,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited with a failure status.
    #[error("{program} failed ({status}): {}", output.trim())]
    ExternalTool {
        /// Program that was run.
        program: String,
        /// Exit status of the program.
        status: ExitStatus,
        /// Combined stdout and stderr.
        output: String,
    },

    /// The staged tree contains an entry that is not a directory, regular
    /// file or symlink.
    #[error("unsupported file type ({kind}) at {path}")]
    UnsupportedFileType {
        /// Path of the entry in the staging directory.
        path: PathBuf,
        /// Human-readable file type.
        kind: String,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation ran past its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl MaterializeError {
    /// Returns the broad category of this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use workspacefs_core::ErrorKind;
    /// use workspacefs_core::MaterializeError;
    ///
    /// let err = MaterializeError::NonEmptyDirectory {
    ///     path: PathBuf::from("/tmp/out"),
    /// };
    /// assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
    /// ```
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Walk { .. } => ErrorKind::Io,
            Self::NonEmptyDirectory { .. }
            | Self::InvalidOutputDir { .. }
            | Self::UnsupportedPlatform => ErrorKind::PreconditionViolation,
            Self::ResourceAcquisition { .. } => ErrorKind::ResourceAcquisition,
            Self::ResourceRelease { .. } => ErrorKind::ResourceRelease,
            Self::ExternalTool { .. } => ErrorKind::ExternalTool,
            Self::UnsupportedFileType { .. } => ErrorKind::UnsupportedFileType,
            Self::Cancelled | Self::DeadlineExceeded => ErrorKind::Cancellation,
        }
    }

    /// Returns `true` if the caller must change its inputs before retrying.
    #[must_use]
    pub const fn is_precondition_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::PreconditionViolation)
    }

    /// Returns `true` if the same call may succeed when retried unchanged.
    ///
    /// Loop device exhaustion and failed releases are transient kernel
    /// states; everything else needs a different input.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceAcquisition {
                step: MountStep::AllocateSlot | MountStep::OpenDevice,
                ..
            } | Self::ResourceRelease { .. }
        )
    }

    /// Returns the loop-mount step involved in this error, if any.
    #[must_use]
    pub const fn mount_step(&self) -> Option<MountStep> {
        match self {
            Self::ResourceAcquisition { step, .. } | Self::ResourceRelease { step, .. } => {
                Some(*step)
            }
            _ => None,
        }
    }

    /// Returns the captured diagnostic output of a failed external tool.
    #[must_use]
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::ExternalTool { output, .. } => Some(output),
            _ => None,
        }
    }
}
