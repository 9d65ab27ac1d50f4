//! Tool-based image extraction.
//!
//! Unpacks an ext4 image with `debugfs rdump` instead of mounting it. This
//! needs no privileges and no loop devices, at the cost of writing a full
//! copy of the image contents.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::debug;
use tracing::info;

use crate::CancelToken;
use crate::MaterializeConfig;
use crate::MaterializeError;
use crate::Result;
use crate::process::run_captured;

/// Printed by `debugfs` for every request after it failed to open the image.
const FILESYSTEM_NOT_OPEN: &str = "Filesystem not open";

/// Returns `true` if `dir` contains no entries.
///
/// Only the first entry is read, so this is cheap on large directories.
///
/// # Errors
///
/// Returns an error if `dir` cannot be opened or read.
pub fn is_dir_empty(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir)?;
    match entries.next() {
        None => Ok(true),
        Some(Ok(_)) => Ok(false),
        Some(Err(err)) => Err(err.into()),
    }
}

/// Unpacks the whole tree of `image_path` into `output_dir`.
///
/// `output_dir` must exist and be empty; otherwise
/// [`MaterializeError::NonEmptyDirectory`] is returned and nothing is run.
/// Directory structure, file contents and symlink targets are reproduced by
/// `debugfs`.
///
/// # Errors
///
/// Returns an error if the directory is not empty, `debugfs` cannot be
/// spawned or exits unsuccessfully, or `cancel` fires while it runs.
/// A path that cannot be quoted in a `debugfs` request (not UTF-8, or
/// containing `"`) is rejected with [`MaterializeError::InvalidOutputDir`].
///
/// # Examples
///
/// ```no_run
/// use workspacefs_core::CancelToken;
/// use workspacefs_core::MaterializeConfig;
/// use workspacefs_core::extract::extract_image;
/// use std::path::Path;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = MaterializeConfig::default();
/// let token = CancelToken::new();
/// extract_image(Path::new("image.ext4"), Path::new("/tmp/empty"), &config, &token)?;
/// # Ok(())
/// # }
/// ```
pub fn extract_image(
    image_path: &Path,
    output_dir: &Path,
    config: &MaterializeConfig,
    cancel: &CancelToken,
) -> Result<()> {
    if !is_dir_empty(output_dir)? {
        return Err(MaterializeError::NonEmptyDirectory {
            path: output_dir.to_path_buf(),
        });
    }

    let request = rdump_request(output_dir)?;
    let mut command = Command::new(&config.debugfs_path);
    command.arg(image_path).arg("-R").arg(request);

    let captured = run_captured(command, cancel)?;
    debug!(output = %captured.output.trim(), "debugfs finished");

    // debugfs exits zero even when the image cannot be opened.
    if captured.output.contains(FILESYSTEM_NOT_OPEN) {
        return Err(MaterializeError::ExternalTool {
            program: config.debugfs_path.display().to_string(),
            status: captured.status,
            output: captured.output,
        });
    }

    info!(
        image = %image_path.display(),
        dest = %output_dir.display(),
        "extracted image"
    );
    Ok(())
}

/// Builds the `debugfs` request that dumps the image root into `output_dir`.
fn rdump_request(output_dir: &Path) -> Result<String> {
    let path = quotable_path(output_dir)?;
    Ok(format!("rdump \"/\" \"{path}\""))
}

/// Returns `path` as text that can sit between quotes in a `debugfs` request.
pub(crate) fn quotable_path(path: &Path) -> Result<&str> {
    let invalid = |reason: &str| MaterializeError::InvalidOutputDir {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let text = path
        .to_str()
        .ok_or_else(|| invalid("path is not valid UTF-8"))?;
    if text.contains('"') {
        return Err(invalid("path contains a double quote"));
    }
    Ok(text)
}
