//! Materialization reporting.

use std::path::Path;
use std::time::Duration;

use crate::Strategy;

/// What the merge walk did with one staged entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeAction {
    /// A directory was created at the destination.
    CreatedDirectory,
    /// A regular file was duplicated into the destination.
    CopiedFile,
    /// A regular file or symlink was moved into the destination.
    Moved,
    /// A symlink was recreated at the destination.
    CreatedSymlink,
    /// The destination already had an entry; nothing changed.
    SkippedExisting,
    /// The entry is a reserved directory and its subtree was skipped.
    SkippedReserved,
}

/// Report of a materialization.
#[derive(Debug, Clone, Default)]
pub struct MaterializeReport {
    /// Strategy used to populate the staging directory.
    pub strategy: Strategy,

    /// Number of directories created.
    pub directories_created: usize,

    /// Number of regular files duplicated.
    pub files_copied: usize,

    /// Number of regular files and symlinks moved out of staging.
    pub files_moved: usize,

    /// Number of symlinks recreated.
    pub symlinks_created: usize,

    /// Number of staged entries left alone because the destination already
    /// had an entry at that path.
    pub entries_skipped: usize,

    /// Number of reserved directories skipped.
    pub reserved_skipped: usize,

    /// Total bytes written by duplication. Moves write nothing.
    pub bytes_written: u64,

    /// Duration of the whole materialization.
    pub duration: Duration,
}

impl MaterializeReport {
    /// Creates a new empty report.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Records one merge action.
    pub fn record(&mut self, action: MergeAction) {
        match action {
            MergeAction::CreatedDirectory => self.directories_created += 1,
            MergeAction::CopiedFile => self.files_copied += 1,
            MergeAction::Moved => self.files_moved += 1,
            MergeAction::CreatedSymlink => self.symlinks_created += 1,
            MergeAction::SkippedExisting => self.entries_skipped += 1,
            MergeAction::SkippedReserved => self.reserved_skipped += 1,
        }
    }

    /// Returns the number of entries added to the destination.
    #[must_use]
    pub fn entries_added(&self) -> usize {
        self.directories_created + self.files_copied + self.files_moved + self.symlinks_created
    }

    /// Returns `true` if the destination was left unchanged.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.entries_added() == 0
    }
}

/// Callback trait for progress reporting during a merge.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use workspacefs_core::MergeAction;
/// use workspacefs_core::ProgressCallback;
///
/// struct PrintProgress;
///
/// impl ProgressCallback for PrintProgress {
///     fn on_entry(&mut self, path: &Path, action: MergeAction) {
///         println!("{action:?}: {}", path.display());
///     }
///
///     fn on_bytes_written(&mut self, _bytes: u64) {}
///
///     fn on_complete(&mut self) {}
/// }
/// ```
pub trait ProgressCallback {
    /// Called once per staged entry with the path relative to the image
    /// root.
    fn on_entry(&mut self, path: &Path, action: MergeAction);

    /// Called after a regular file was duplicated.
    fn on_bytes_written(&mut self, bytes: u64);

    /// Called when the merge has finished successfully.
    fn on_complete(&mut self);
}

/// No-op implementation of `ProgressCallback`.
#[derive(Debug, Default)]
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn on_entry(&mut self, _path: &Path, _action: MergeAction) {}

    fn on_bytes_written(&mut self, _bytes: u64) {}

    fn on_complete(&mut self) {}
}
