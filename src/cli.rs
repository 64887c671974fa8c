//! # CLI Module
//!
//! This module provides the command-line interface for ncstitch, including:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the NCSTITCH_ prefix
//! - Merging of configuration file values with command-line overrides
//! - Subcommands for running, planning, validating and inspecting

use crate::config::{ConfigFormat, ConfigTemplate, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stitch per-block NetCDF simulation output into a single domain file
#[derive(Parser, Debug)]
#[command(name = "ncstitch")]
#[command(about = "Stitch per-block NetCDF output into one combined domain file")]
#[command(version)]
#[command(long_about = "
ncstitch merges the output of a block-decomposed simulation, written as one
NetCDF file per block and per timestep, into a single dataset.

For every block it concatenates the timestep files along the record
dimension, tags the result with the number of blocks, and writes the
domain_decomposition attribute on the coordinate variables. The per-block
files are then merged by the combination tool and removed.

REQUIRED TOOLS:
  • ncrcat and ncatted (NCO)
  • mppnccombine (or any tool honouring the domain_decomposition convention)

EXAMPLES:
  # Stitch a 4x4x1 block grid of 256x256x1 cells
  ncstitch run --source-dir /data/2d-jupiter --problem jupole \\
    --blocks 4,4,1 --cells 256,256,1

  # Show what would be run
  ncstitch plan --config jupiter.yaml

  # Start from a preset
  ncstitch template jupiter --format yaml -o jupiter.yaml
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "NCSTITCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stitch block files into one combined file
    #[command(long_about = "
Concatenate, annotate and combine the block files of one simulation.

Values given on the command line override those from the configuration
file. Intermediates are removed only after the combination tool succeeded.

EXAMPLES:
  ncstitch run --source-dir /data/3d-rt --problem rt --blocks 2,2,2 --cells 32,32,32
  ncstitch run --config rt.json --work-dir /scratch/rt --keep-intermediates
  ncstitch run --config rt.json --dry-run
")]
    Run {
        #[command(flatten)]
        stitch: StitchArgs,

        /// Print the planned commands without running them
        #[arg(long, env = "NCSTITCH_DRY_RUN")]
        dry_run: bool,
    },

    /// Show the commands and decomposition a run would use
    Plan {
        #[command(flatten)]
        stitch: StitchArgs,
    },

    /// Validate a configuration file
    #[command(long_about = "
Validate a configuration file without processing anything.

With --detailed the input directory is scanned and blocks without input
files are reported.

EXAMPLES:
  ncstitch validate rt.json
  ncstitch validate --config rt.yaml --detailed
")]
    Validate {
        /// Configuration file to validate
        config_file: Option<PathBuf>,

        /// Also check that every block has input files
        #[arg(long)]
        detailed: bool,
    },

    /// Show the decomposition metadata of a block file
    Inspect {
        /// NetCDF file path
        file: PathBuf,

        /// Output format for file information
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Generate a configuration from a known simulation setup
    Template {
        /// Preset to generate
        #[arg(value_enum)]
        preset: ConfigTemplate,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Options shared by `run` and `plan`
#[derive(Args, Debug, Clone, Default)]
pub struct StitchArgs {
    /// Directory containing <problem>.block<i>.<domain>.<time>.nc files
    #[arg(long, env = "NCSTITCH_SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    /// Problem name, the prefix of every input file
    #[arg(short = 'p', long, env = "NCSTITCH_PROBLEM")]
    pub problem: Option<String>,

    /// Blocks along each axis: nrb1,nrb2,nrb3
    #[arg(long, value_parser = parse_triple, env = "NCSTITCH_BLOCKS")]
    pub blocks: Option<[usize; 3]>,

    /// Cells per block along each axis: bx1,bx2,bx3
    #[arg(long, value_parser = parse_triple, env = "NCSTITCH_CELLS")]
    pub cells: Option<[usize; 3]>,

    /// Directory for intermediates and the combined output
    #[arg(long, env = "NCSTITCH_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Also annotate the axis-3 cell-center coordinate x3b
    #[arg(long, env = "NCSTITCH_WRITE_X3B")]
    pub write_x3b: bool,

    /// Keep the per-block files after combining
    #[arg(long, env = "NCSTITCH_KEEP_INTERMEDIATES")]
    pub keep_intermediates: bool,

    /// Overwrite an existing combined file
    #[arg(long, env = "NCSTITCH_FORCE")]
    pub force: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
}

/// Parse a comma separated triple of positive integers
/// Format: n1,n2,n3
fn parse_triple(s: &str) -> Result<[usize; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err("Expected three comma separated values 'n1,n2,n3'".to_string());
    }

    let mut values = [0usize; 3];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .parse::<usize>()
            .map_err(|_| format!("Invalid integer '{}'", part))?;
        if *slot == 0 {
            return Err("Values must be at least 1".to_string());
        }
    }
    Ok(values)
}

impl StitchArgs {
    /// Builds the effective configuration: the configuration file (if any)
    /// overridden by every value given on the command line or environment.
    pub fn resolve(&self, config_file: Option<&Path>) -> PipelineResult<PipelineConfig> {
        let mut config = match config_file {
            Some(path) => PipelineConfig::from_file(path)?,
            None => {
                let missing = |what: &str, flag: &str| {
                    PipelineError::Config(format!(
                        "{} is required (use {} or a configuration file)",
                        what, flag
                    ))
                };
                PipelineConfig::new(
                    self.source_dir
                        .clone()
                        .ok_or_else(|| missing("source directory", "--source-dir"))?,
                    self.problem
                        .clone()
                        .ok_or_else(|| missing("problem name", "--problem"))?,
                    self.blocks.ok_or_else(|| missing("block counts", "--blocks"))?,
                    self.cells.ok_or_else(|| missing("block cell dims", "--cells"))?,
                )
            }
        };

        if let Some(dir) = &self.source_dir {
            config.source_directory = dir.clone();
        }
        if let Some(problem) = &self.problem {
            config.problem_name = problem.clone();
        }
        if let Some(blocks) = self.blocks {
            config.block_counts = blocks;
        }
        if let Some(cells) = self.cells {
            config.block_cell_dims = cells;
        }
        if let Some(dir) = &self.work_dir {
            config.working_directory = dir.clone();
        }
        config.write_x3b |= self.write_x3b;
        config.keep_intermediates |= self.keep_intermediates;
        config.force |= self.force;

        config.validate()?;
        Ok(config)
    }
}
