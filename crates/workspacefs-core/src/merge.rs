//! Overlay merge of a staged tree into the output directory.
//!
//! The walk adds every staged entry that is absent at the destination and
//! leaves everything else alone: pre-existing destination content always
//! wins, and running the same merge twice changes nothing the second time.

use std::fs;
use std::fs::DirBuilder;
use std::fs::FileType;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use tracing::debug;
use tracing::trace;
use walkdir::DirEntry;
use walkdir::WalkDir;

use crate::MaterializeConfig;
use crate::MaterializeError;
use crate::MaterializeReport;
use crate::MergeAction;
use crate::NoopProgress;
use crate::ProgressCallback;
use crate::Result;
use crate::copy::CopyBuffer;
use crate::copy::duplicate_file;

/// How regular files and symlinks leave the staging directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyMode {
    /// Rename entries into place, copying where the destination directory
    /// is on another filesystem. Only valid when staging is disposable.
    Move,
    /// Copy file bytes and recreate symlinks, leaving staging untouched.
    Duplicate,
}

/// Walks a staged tree and overlays it onto an output directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use workspacefs_core::MaterializeConfig;
/// use workspacefs_core::MaterializeReport;
/// use workspacefs_core::NoopProgress;
/// use workspacefs_core::merge::CopyMode;
/// use workspacefs_core::merge::TreeMerger;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = MaterializeConfig::default();
/// let mut report = MaterializeReport::default();
/// TreeMerger::new(&config, CopyMode::Duplicate).merge(
///     Path::new("/mnt/image"),
///     Path::new("/srv/workspace"),
///     &mut report,
///     &mut NoopProgress,
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TreeMerger<'a> {
    config: &'a MaterializeConfig,
    mode: CopyMode,
    buffer: Option<CopyBuffer>,
}

impl<'a> TreeMerger<'a> {
    /// Creates a merger for the given copy mode.
    #[must_use]
    pub fn new(config: &'a MaterializeConfig, mode: CopyMode) -> Self {
        Self {
            config,
            mode,
            buffer: None,
        }
    }

    /// Returns the copy mode of this merger.
    #[must_use]
    pub fn mode(&self) -> CopyMode {
        self.mode
    }

    /// Merges everything under `staging` into `output`.
    ///
    /// Directories are visited before their contents. Reserved top-level
    /// directories are skipped with their whole subtree. The first failure,
    /// including a failure to read a staged directory, stops the walk.
    ///
    /// # Errors
    ///
    /// Returns an error if the walk fails, a staged entry is neither a
    /// directory, regular file nor symlink, or an entry cannot be placed.
    pub fn merge(
        &mut self,
        staging: &Path,
        output: &Path,
        report: &mut MaterializeReport,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        let mut walker = WalkDir::new(staging).follow_links(false).into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|source| MaterializeError::Walk {
                path: source
                    .path()
                    .map_or_else(|| staging.to_path_buf(), Path::to_path_buf),
                source,
            })?;

            let relative = relative_path(staging, entry.path())?;
            if relative.as_os_str().is_empty() {
                continue;
            }

            let is_dir = entry.file_type().is_dir();

            if self.config.is_reserved(relative) {
                if is_dir {
                    walker.skip_current_dir();
                }
                trace!(path = %relative.display(), "skipping reserved entry");
                report.record(MergeAction::SkippedReserved);
                progress.on_entry(relative, MergeAction::SkippedReserved);
                continue;
            }

            let target = output.join(relative);
            if let Some(existing) = existing_type(&target)? {
                // A staged directory only descends into a real destination
                // directory; anything else, symlinks included, shadows the
                // whole subtree.
                if is_dir && !existing.is_dir() {
                    walker.skip_current_dir();
                }
                trace!(path = %relative.display(), "destination exists, skipping");
                report.record(MergeAction::SkippedExisting);
                progress.on_entry(relative, MergeAction::SkippedExisting);
                continue;
            }

            let action = self.place(&entry, &target, report, progress)?;
            trace!(path = %relative.display(), ?action, "merged entry");
            report.record(action);
            progress.on_entry(relative, action);
        }

        debug!(
            staging = %staging.display(),
            output = %output.display(),
            added = report.entries_added(),
            skipped = report.entries_skipped,
            "merge finished"
        );
        Ok(())
    }

    /// Creates the destination counterpart of one staged entry.
    fn place(
        &mut self,
        entry: &DirEntry,
        target: &Path,
        report: &mut MaterializeReport,
        progress: &mut dyn ProgressCallback,
    ) -> Result<MergeAction> {
        let source = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            DirBuilder::new()
                .mode(self.config.dir_mode)
                .create(target)?;
            return Ok(MergeAction::CreatedDirectory);
        }

        if !file_type.is_file() && !file_type.is_symlink() {
            return Err(MaterializeError::UnsupportedFileType {
                path: source.to_path_buf(),
                kind: describe_file_type(file_type).to_string(),
            });
        }

        match self.mode {
            CopyMode::Move => match fs::rename(source, target) {
                Ok(()) => Ok(MergeAction::Moved),
                // An existing destination directory can be a mount point.
                Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                    debug!(
                        path = %target.display(),
                        "destination is on another filesystem, copying instead"
                    );
                    self.duplicate(source, target, file_type, report, progress)
                }
                Err(err) => Err(err.into()),
            },
            CopyMode::Duplicate => self.duplicate(source, target, file_type, report, progress),
        }
    }

    fn duplicate(
        &mut self,
        source: &Path,
        target: &Path,
        file_type: FileType,
        report: &mut MaterializeReport,
        progress: &mut dyn ProgressCallback,
    ) -> Result<MergeAction> {
        if file_type.is_symlink() {
            let link_target = fs::read_link(source)?;
            std::os::unix::fs::symlink(&link_target, target)?;
            return Ok(MergeAction::CreatedSymlink);
        }

        let buffer = self.buffer.get_or_insert_with(CopyBuffer::new);
        let bytes = duplicate_file(source, target, buffer)?;
        report.bytes_written += bytes;
        progress.on_bytes_written(bytes);
        Ok(MergeAction::CopiedFile)
    }
}

/// Merges `staging` into `output` and returns what was done.
///
/// Convenience wrapper over [`TreeMerger`] without progress reporting.
///
/// # Errors
///
/// See [`TreeMerger::merge`].
pub fn merge_tree(
    staging: &Path,
    output: &Path,
    mode: CopyMode,
    config: &MaterializeConfig,
) -> Result<MaterializeReport> {
    let mut report = MaterializeReport::default();
    TreeMerger::new(config, mode).merge(staging, output, &mut report, &mut NoopProgress)?;
    Ok(report)
}

fn relative_path<'p>(root: &Path, path: &'p Path) -> Result<&'p Path> {
    path.strip_prefix(root).map_err(|_| {
        MaterializeError::Io(io::Error::other(format!(
            "walked path {} is outside {}",
            path.display(),
            root.display()
        )))
    })
}

/// Returns the type of whatever exists at `path` without following a
/// final symlink, so a dangling link still counts.
fn existing_type(path: &Path) -> Result<Option<FileType>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta.file_type())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn describe_file_type(file_type: FileType) -> &'static str {
    if file_type.is_socket() {
        "socket"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_block_device() {
        "block device"
    } else if file_type.is_char_device() {
        "character device"
    } else {
        "unknown"
    }
}
