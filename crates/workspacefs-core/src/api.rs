//! High-level public API for materializing images.

use std::path::Path;
use std::time::Instant;

use tempfile::TempDir;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::CancelToken;
use crate::MaterializeConfig;
use crate::MaterializeReport;
use crate::NoopProgress;
use crate::ProgressCallback;
use crate::Result;
use crate::Strategy;
use crate::extract::extract_image;
use crate::extract::quotable_path;
use crate::merge::TreeMerger;
use crate::types::OutputDir;

#[cfg(target_os = "linux")]
use crate::loopdev::LoopMount;

/// Materializes the contents of an ext4 image into `output_dir`.
///
/// Entries already present in `output_dir` are never modified; only paths
/// missing from it are created. The image's top-level reserved directories
/// (`lost+found` by default) are not materialized. Running the same call
/// twice leaves the directory unchanged the second time.
///
/// # Errors
///
/// Returns an error if `output_dir` is not a writable directory, the image
/// cannot be staged with the configured strategy, a staged entry has an
/// unsupported type, or a filesystem operation fails.
///
/// # Examples
///
/// ```no_run
/// use workspacefs_core::MaterializeConfig;
/// use workspacefs_core::materialize_image;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let report = materialize_image("layer.ext4", "/srv/workspace", &MaterializeConfig::default())?;
/// println!("Added {} entries", report.entries_added());
/// # Ok(())
/// # }
/// ```
pub fn materialize_image<P: AsRef<Path>, Q: AsRef<Path>>(
    image: P,
    output_dir: Q,
    config: &MaterializeConfig,
) -> Result<MaterializeReport> {
    materialize_image_with_cancel(image, output_dir, config, &CancelToken::new())
}

/// Materializes an image, aborting the external extraction step when
/// `cancel` fires.
///
/// Cleanup still runs after cancellation.
///
/// # Errors
///
/// Same as [`materialize_image`], plus
/// [`MaterializeError::Cancelled`](crate::MaterializeError::Cancelled) and
/// [`MaterializeError::DeadlineExceeded`](crate::MaterializeError::DeadlineExceeded).
pub fn materialize_image_with_cancel<P: AsRef<Path>, Q: AsRef<Path>>(
    image: P,
    output_dir: Q,
    config: &MaterializeConfig,
    cancel: &CancelToken,
) -> Result<MaterializeReport> {
    let mut noop = NoopProgress;
    materialize_image_with_progress(image, output_dir, config, cancel, &mut noop)
}

/// Materializes an image with progress reporting.
///
/// # Errors
///
/// Same as [`materialize_image_with_cancel`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use workspacefs_core::CancelToken;
/// use workspacefs_core::MaterializeConfig;
/// use workspacefs_core::NoopProgress;
/// use workspacefs_core::materialize_image_with_progress;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let token = CancelToken::with_timeout(Duration::from_secs(60));
/// let mut progress = NoopProgress;
/// let report = materialize_image_with_progress(
///     "layer.ext4",
///     "/srv/workspace",
///     &MaterializeConfig::default(),
///     &token,
///     &mut progress,
/// )?;
/// println!("Skipped {} existing entries", report.entries_skipped);
/// # Ok(())
/// # }
/// ```
pub fn materialize_image_with_progress<P: AsRef<Path>, Q: AsRef<Path>>(
    image: P,
    output_dir: Q,
    config: &MaterializeConfig,
    cancel: &CancelToken,
    progress: &mut dyn ProgressCallback,
) -> Result<MaterializeReport> {
    let start = Instant::now();
    let image = image.as_ref();
    let output = OutputDir::new(output_dir.as_ref())?;
    if config.strategy == Strategy::Extract {
        quotable_path(output.as_path())?;
    }

    info!(
        image = %image.display(),
        output = %output.as_path().display(),
        strategy = %config.strategy,
        "materializing image"
    );

    let dir = tempfile::Builder::new()
        .prefix(&config.staging_prefix)
        .tempdir_in(output.as_path())?;
    debug!(staging = %dir.path().display(), "created staging directory");

    let mut staging = Staging {
        #[cfg(target_os = "linux")]
        mount: None,
        dir,
    };
    let mut report = MaterializeReport::new(config.strategy);

    let outcome = staging.run(image, output.as_path(), config, cancel, &mut report, progress);
    let cleanup = staging.cleanup();
    report.duration = start.elapsed();

    match (outcome, cleanup) {
        (Ok(()), Ok(())) => {
            info!(
                added = report.entries_added(),
                skipped = report.entries_skipped,
                bytes = report.bytes_written,
                elapsed_ms = report.duration.as_millis(),
                "image materialized"
            );
            Ok(report)
        }
        (Ok(()), Err(err)) | (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            warn!(error = %cleanup_err, "cleanup failed after an earlier error");
            Err(err)
        }
    }
}

/// A staging directory inside the output directory and whatever is
/// mounted on it.
struct Staging {
    // Declared first so a mounted image is released before the directory is
    // removed when dropped during unwinding.
    #[cfg(target_os = "linux")]
    mount: Option<LoopMount>,
    dir: TempDir,
}

impl Staging {
    fn run(
        &mut self,
        image: &Path,
        output: &Path,
        config: &MaterializeConfig,
        cancel: &CancelToken,
        report: &mut MaterializeReport,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        cancel.check()?;

        match config.strategy {
            Strategy::Extract => extract_image(image, self.dir.path(), config, cancel)?,
            Strategy::Mount => self.mount_image(image, config)?,
        }
        cancel.check()?;

        TreeMerger::new(config, config.strategy.copy_mode()).merge(
            self.dir.path(),
            output,
            report,
            progress,
        )?;
        progress.on_complete();
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn mount_image(&mut self, image: &Path, config: &MaterializeConfig) -> Result<()> {
        self.mount = Some(LoopMount::mount(image, self.dir.path(), config)?);
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    #[allow(clippy::unused_self)]
    fn mount_image(&mut self, _image: &Path, _config: &MaterializeConfig) -> Result<()> {
        Err(crate::MaterializeError::UnsupportedPlatform)
    }

    #[cfg(target_os = "linux")]
    fn unmount(&mut self) -> Result<()> {
        if let Some(mount) = self.mount.as_mut() {
            mount.unmount()?;
        }
        self.mount = None;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    #[allow(clippy::unused_self)]
    fn unmount(&mut self) -> Result<()> {
        Ok(())
    }

    /// Unmounts the image if needed and removes the staging directory.
    ///
    /// A staging directory whose image is still mounted is left on disk.
    fn cleanup(mut self) -> Result<()> {
        if let Err(err) = self.unmount() {
            let kept = self.dir.keep();
            warn!(
                staging = %kept.display(),
                error = %err,
                "image still mounted, leaving staging directory in place"
            );
            return Err(err);
        }

        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(staging = %path.display(), "removed staging directory");
        Ok(())
    }
}
