//! Error conversion utilities for CLI.
//!
//! Converts workspacefs-core's typed errors (thiserror) into user-friendly
//! contextual errors (anyhow) with actionable guidance.

use anyhow::anyhow;
use std::io;
use std::path::Path;
use workspacefs_core::MaterializeError;
use workspacefs_core::MountStep;

/// Converts `MaterializeError` to user-friendly anyhow error with context
pub fn convert_materialize_error(err: MaterializeError, image: &Path) -> anyhow::Error {
    match err {
        MaterializeError::InvalidOutputDir { path, reason } => {
            anyhow!(
                "Cannot materialize into '{}': {reason}\n\
                 HINT: The output directory must already exist and be writable.",
                path.display()
            )
        }
        MaterializeError::NonEmptyDirectory { path } => {
            anyhow!(
                "Unpack target '{}' is not empty\n\
                 HINT: Images are unpacked into an empty staging directory; remove stray entries and retry.",
                path.display()
            )
        }
        MaterializeError::ResourceAcquisition { step, source } => {
            let hint = match (step, source.kind()) {
                (_, io::ErrorKind::PermissionDenied) => {
                    "HINT: Loop mounting needs root. Run as root or drop --mount to unpack with debugfs."
                }
                (MountStep::OpenControl, io::ErrorKind::NotFound) => {
                    "HINT: The loop driver is not available. Load the loop kernel module or drop --mount."
                }
                (MountStep::AllocateSlot | MountStep::OpenDevice, _) => {
                    "HINT: No free loop device; retry once other mounts are released."
                }
                (MountStep::Mount, _) => {
                    "HINT: The image may not be a valid ext4 filesystem."
                }
                _ => "HINT: Check that the image is readable.",
            };
            anyhow!(
                "Failed to mount '{}': could not {step}: {source}\n{hint}",
                image.display()
            )
        }
        MaterializeError::ResourceRelease { step, source } => {
            anyhow!(
                "Failed to release the mount of '{}' ({step}): {source}\n\
                 HINT: The staging directory was left in place; unmount it manually.",
                image.display()
            )
        }
        MaterializeError::ExternalTool {
            program, output, ..
        } => {
            anyhow!(
                "Unpacking '{}' with {program} failed:\n{}\n\
                 HINT: The image may be corrupted or not an ext4 filesystem.",
                image.display(),
                output.trim()
            )
        }
        MaterializeError::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {
            anyhow!(
                "File not found while materializing '{}': {io_err}\n\
                 HINT: Check the image path, or pass --debugfs if debugfs is not in /sbin.",
                image.display()
            )
        }
        MaterializeError::UnsupportedFileType { path, kind } => {
            anyhow!(
                "Image '{}' contains a {kind} at '{}'\n\
                 HINT: Only directories, regular files and symlinks can be materialized.",
                image.display(),
                path.display()
            )
        }
        MaterializeError::DeadlineExceeded => {
            anyhow!(
                "Unpacking '{}' timed out\n\
                 HINT: Use --timeout to allow more time.",
                image.display()
            )
        }
        MaterializeError::Cancelled => {
            anyhow!(
                "Materializing '{}' was interrupted\n\
                 HINT: Entries already placed were kept; rerun to add the rest.",
                image.display()
            )
        }
        MaterializeError::UnsupportedPlatform => {
            anyhow!("--mount is only supported on Linux\nHINT: Drop --mount to unpack with debugfs.")
        }
        _ => anyhow::Error::from(err)
            .context(format!("Error materializing image '{}'", image.display())),
    }
}

/// Adds context to a materialization result
pub fn add_image_context<T>(
    result: Result<T, MaterializeError>,
    image: &Path,
) -> anyhow::Result<T> {
    result.map_err(|e| convert_materialize_error(e, image))
}
