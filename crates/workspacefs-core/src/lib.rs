//! Non-destructive materialization of ext4 images into a workspace.
//!
//! `workspacefs-core` copies the contents of a filesystem image into an
//! existing directory without touching anything already there: only paths
//! missing from the directory are created. The image is staged either by
//! unpacking it with `debugfs` or by loop-mounting it read-only, then merged
//! into the destination.
//!
//! # Examples
//!
//! ```no_run
//! use workspacefs_core::MaterializeConfig;
//! use workspacefs_core::Strategy;
//! use workspacefs_core::materialize_image;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MaterializeConfig::default().with_strategy(Strategy::Mount);
//! let report = materialize_image("layer.ext4", "/srv/workspace", &config)?;
//! println!("Added {} entries", report.entries_added());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod cancel;
pub mod config;
pub mod copy;
pub mod error;
pub mod extract;
#[cfg(target_os = "linux")]
pub mod loopdev;
pub mod merge;
pub mod process;
pub mod report;
pub mod types;

// Re-export main API types
pub use api::materialize_image;
pub use api::materialize_image_with_cancel;
pub use api::materialize_image_with_progress;
pub use cancel::CancelToken;
pub use config::MaterializeConfig;
pub use config::Strategy;
pub use error::ErrorKind;
pub use error::MaterializeError;
pub use error::MountStep;
pub use error::Result;
#[cfg(target_os = "linux")]
pub use loopdev::LoopMount;
pub use merge::CopyMode;
pub use merge::merge_tree;
pub use report::MaterializeReport;
pub use report::MergeAction;
pub use report::NoopProgress;
pub use report::ProgressCallback;

pub use types::OutputDir;
