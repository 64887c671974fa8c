//! # ncstitch
//!
//! A Rust library for stitching the per-block NetCDF output of a
//! block-decomposed simulation into a single domain file.
//!
//! ## Features
//!
//! - **Record concatenation**: every timestep file of a block is merged into one file
//! - **Decomposition metadata**: coordinate variables are tagged with `domain_decomposition`
//! - **Combination**: the per-block files are merged by an external combination tool
//! - **Safe cleanup**: intermediates are removed only after a verified combination
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ncstitch::{stitch, config::PipelineConfig};
//!
//! let config = PipelineConfig::from_file("jupiter.yaml").expect("Failed to load config");
//! let report = stitch(&config).expect("Failed to stitch blocks");
//! println!("Combined file: {}", report.combined.display());
//! ```
//!
//! ## Configuration Example
//!
//! ```json
//! {
//!   "source_directory": "/data/2d-jupiter",
//!   "problem_name": "jupole",
//!   "block_counts": [4, 4, 1],
//!   "block_cell_dims": [256, 256, 1]
//! }
//! ```

pub mod block;
pub mod cli;
pub mod config;
pub mod decomposition;
pub mod error;
pub mod inspect;
pub mod log;
pub mod pipeline;
pub mod tools;

#[cfg(test)]
mod tests;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::pipeline::{Pipeline, PipelineReport};

/// Stitches the block files described by `config` into one combined file.
///
/// This function orchestrates the entire pipeline:
/// 1. Concatenates the timestep files of every block
/// 2. Tags each block file with `NumFilesInSet`
/// 3. Writes `domain_decomposition` on the coordinate variables
/// 4. Runs the combination tool
/// 5. Removes the per-block intermediates
///
/// # Errors
///
/// This function will return an error if:
/// - The configuration is invalid
/// - A block has no input files
/// - Any external tool exits with a non-zero status
/// - A block file lacks `logical_location` or a coordinate variable
/// - The combination tool produces no output
pub fn stitch(config: &PipelineConfig) -> PipelineResult<PipelineReport> {
    Pipeline::new(config).run()
}
