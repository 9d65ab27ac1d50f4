//! Validated output directory type.

use crate::MaterializeError;
use crate::Result;
use std::path::Path;
use std::path::PathBuf;

/// A validated materialization target.
///
/// Once constructed, the directory existed, was a directory, was writable by
/// the current process, and is held as an absolute canonical path. The
/// staging directory is created inside it, which keeps staged files on the
/// same filesystem so they can be renamed into place.
///
/// # Examples
///
/// ```no_run
/// use workspacefs_core::types::OutputDir;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let out = OutputDir::new("/srv/workspace")?;
/// println!("Materializing into: {}", out.as_path().display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDir(PathBuf);

impl OutputDir {
    /// Creates a new `OutputDir` after validating the path.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::InvalidOutputDir`] if the path does not
    /// exist, is not a directory, cannot be canonicalized, or is not
    /// writable.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let invalid = |reason: String| MaterializeError::InvalidOutputDir {
            path: path.clone(),
            reason,
        };

        if !path.exists() {
            return Err(invalid("directory does not exist".to_string()));
        }

        if !path.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }

        let canonical = path
            .canonicalize()
            .map_err(|e| invalid(format!("cannot canonicalize: {e}")))?;

        if !is_writable(&canonical) {
            return Err(invalid("directory is not writable".to_string()));
        }

        Ok(Self(canonical))
    }

    /// Returns the path as a `&Path`.
    #[inline]
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Converts into the inner `PathBuf`.
    #[inline]
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for OutputDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Checks effective write permission with `access(2)`.
fn is_writable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };

    // SAFETY: access() only reads the NUL-terminated string, which outlives
    // the call.
    #[allow(unsafe_code)]
    let result = unsafe { libc::access(c_path.as_ptr(), libc::W_OK) };
    result == 0
}
