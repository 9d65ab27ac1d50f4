//! Validated path types.

pub mod output_dir;

pub use output_dir::OutputDir;
