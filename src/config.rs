//! # Pipeline Configuration Module
//!
//! This module provides configuration parsing and validation for ncstitch runs.
//! A configuration describes where the per-block simulation output lives, how
//! the block grid is laid out, and which external tools to call.
//!
//! ## Configuration Structure
//!
//! - **source_directory**: Directory holding `<problem>.block<i>.<domain>.<time>.nc` files
//! - **problem_name**: Problem identifier used in every file name
//! - **block_counts**: Number of blocks along each axis `[nrb1, nrb2, nrb3]`
//! - **block_cell_dims**: Number of cells per block along each axis `[bx1, bx2, bx3]`
//! - **working_directory**: Where intermediates and the combined file are written
//! - **tools**: External tool names and arguments
//!
//! ## Example Usage
//!
//! ```rust
//! use ncstitch::config::PipelineConfig;
//!
//! let json = r#"
//! {
//!   "source_directory": "/data/2d-sw",
//!   "problem_name": "sw",
//!   "block_counts": [4, 2, 1],
//!   "block_cell_dims": [64, 64, 1]
//! }"#;
//! let config = PipelineConfig::from_json(json)?;
//! assert_eq!(config.num_blocks(), 8);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::decomposition::{BlockDims, BlockGrid};
use crate::error::{PipelineError, PipelineResult};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Largest block count addressable by the 4-digit intermediate suffix
pub const MAX_BLOCKS: usize = 10_000;

/// Main configuration structure for ncstitch runs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Directory containing the per-block, per-timestep input files
    pub source_directory: PathBuf,
    /// Problem identifier, the common prefix of every file name
    pub problem_name: String,
    /// Blocks along each axis
    pub block_counts: [usize; 3],
    /// Cells per block along each axis
    pub block_cell_dims: [usize; 3],
    /// Directory for intermediates and the combined output
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    /// Also annotate the axis-3 cell-center coordinate `x3b`
    #[serde(default)]
    pub write_x3b: bool,
    /// Leave the per-block intermediates on disk after combining
    #[serde(default)]
    pub keep_intermediates: bool,
    /// Replace an existing combined output file
    #[serde(default)]
    pub force: bool,
    /// External tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Names and arguments of the external collaborators
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Record concatenation tool
    pub concat: String,
    /// Arguments placed before the input files.
    ///
    /// Must request netCDF-4 output (`-4`, `--4`, `--netcdf4` or
    /// `--fl_fmt=netcdf4`): block files are annotated in place, which classic
    /// and netCDF-4 classic-model files do not allow outside define mode.
    pub concat_args: Vec<String>,
    /// Attribute editing tool
    pub attribute_editor: String,
    /// Combination executable
    pub combine: String,
    /// Arguments placed before the output file name
    pub combine_args: Vec<String>,
    /// Compile the combination executable before running it
    pub build: Option<BuildConfig>,
}

/// How to compile the combination executable from source
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    pub compiler: String,
    /// Source file, relative to the working directory
    pub source: PathBuf,
    pub flags: Vec<String>,
    pub libraries: Vec<String>,
}

fn is_netcdf4_flag(arg: &str) -> bool {
    matches!(arg, "-4" | "--4" | "--netcdf4" | "--fl_fmt=netcdf4")
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            concat: "ncrcat".to_string(),
            // -O overwrites a stale target without prompting, -4 writes
            // netCDF-4 so attributes can be added without a redefine pass.
            concat_args: vec!["-h".to_string(), "-O".to_string(), "-4".to_string()],
            attribute_editor: "ncatted".to_string(),
            combine: "mppnccombine".to_string(),
            combine_args: Vec::new(),
            build: None,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            compiler: "gcc".to_string(),
            source: PathBuf::from("mppnccombine.c"),
            flags: vec!["-O".to_string()],
            libraries: vec!["-lnetcdf".to_string()],
        }
    }
}

/// On-disk configuration formats
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

impl ConfigFormat {
    /// Guesses the format from a file extension, defaulting to JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with default tools and the current directory
    /// as working directory.
    pub fn new(
        source_directory: impl Into<PathBuf>,
        problem_name: impl Into<String>,
        block_counts: [usize; 3],
        block_cell_dims: [usize; 3],
    ) -> Self {
        Self {
            source_directory: source_directory.into(),
            problem_name: problem_name.into(),
            block_counts,
            block_cell_dims,
            working_directory: default_working_directory(),
            write_x3b: false,
            keep_intermediates: false,
            force: false,
            tools: ToolsConfig::default(),
        }
    }

    /// Loads a configuration from a JSON or YAML file, chosen by extension.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use ncstitch::config::PipelineConfig;
    ///
    /// let config = PipelineConfig::from_file("jupiter.yaml")?;
    /// println!("Stitching {} blocks", config.num_blocks());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match ConfigFormat::from_path(path) {
            ConfigFormat::Yaml => Self::from_yaml(&content),
            ConfigFormat::Json => Self::from_json(&content),
        }
    }

    pub fn from_json(json_str: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json_str)?)
    }

    pub fn from_yaml(yaml_str: &str) -> PipelineResult<Self> {
        Ok(serde_yaml::from_str(yaml_str)?)
    }

    pub fn to_string_as(&self, format: ConfigFormat) -> PipelineResult<String> {
        match format {
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ConfigFormat::Yaml => Ok(serde_yaml::to_string(self)?),
        }
    }

    pub fn grid(&self) -> BlockGrid {
        BlockGrid::new(self.block_counts)
    }

    pub fn dims(&self) -> BlockDims {
        BlockDims::new(self.block_cell_dims)
    }

    /// `nrb1 * nrb2 * nrb3`
    pub fn num_blocks(&self) -> usize {
        self.grid().num_blocks()
    }

    /// Path of the final combined dataset, `<working_directory>/<problem>.nc`
    pub fn combined_path(&self) -> PathBuf {
        self.working_directory
            .join(format!("{}.nc", self.problem_name))
    }

    /// Checks the configuration for values the pipeline cannot work with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.problem_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "problem_name must not be empty".to_string(),
            ));
        }
        if let Some(c) = self
            .problem_name
            .chars()
            .find(|c| matches!(c, '/' | '\\' | '*' | '?' | '[' | ']'))
        {
            return Err(PipelineError::Config(format!(
                "problem_name '{}' contains forbidden character '{}'",
                self.problem_name, c
            )));
        }

        if self.source_directory.as_os_str().is_empty() {
            return Err(PipelineError::Config(
                "source_directory must not be empty".to_string(),
            ));
        }
        if self.working_directory.as_os_str().is_empty() {
            return Err(PipelineError::Config(
                "working_directory must not be empty".to_string(),
            ));
        }

        for (axis, (&nrb, &bx)) in self
            .block_counts
            .iter()
            .zip(self.block_cell_dims.iter())
            .enumerate()
        {
            if nrb == 0 {
                return Err(PipelineError::Config(format!(
                    "block count along axis {} must be at least 1",
                    axis + 1
                )));
            }
            if bx == 0 {
                return Err(PipelineError::Config(format!(
                    "block cell count along axis {} must be at least 1",
                    axis + 1
                )));
            }
            match nrb.checked_mul(bx) {
                Some(extent) if extent <= i32::MAX as usize => {}
                _ => {
                    return Err(PipelineError::Config(format!(
                        "global extent along axis {} does not fit in a 32-bit attribute",
                        axis + 1
                    )));
                }
            }
        }

        let num_blocks = self
            .block_counts
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n));
        match num_blocks {
            Some(n) if n <= MAX_BLOCKS => {}
            _ => {
                return Err(PipelineError::Config(format!(
                    "at most {} blocks are supported",
                    MAX_BLOCKS
                )));
            }
        }

        if self.tools.concat.trim().is_empty()
            || self.tools.attribute_editor.trim().is_empty()
            || self.tools.combine.trim().is_empty()
        {
            return Err(PipelineError::Config(
                "tool names must not be empty".to_string(),
            ));
        }
        if !self.tools.concat_args.iter().any(|a| is_netcdf4_flag(a)) {
            return Err(PipelineError::Config(format!(
                "concat_args {:?} must request netCDF-4 output (e.g. -4)",
                self.tools.concat_args
            )));
        }

        Ok(())
    }
}

/// Parameter sets of simulations this tool has been used with
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigTemplate {
    /// 3D Held-Suarez 1994 benchmark
    Hs94,
    /// 3D Rayleigh-Taylor instability
    Rt,
    /// 2D shallow water
    Sw,
    /// 2D Galewsky 2004 barotropic jet
    Galewsky04,
    /// 2D Showman 2006 shallow water
    Showman06,
    /// 2D Jupiter polar vortices
    Jupole,
    /// 2D shallow water with gravity waves
    Swgv,
    /// 2D Jupiter, high resolution
    Jupiter,
}

impl ConfigTemplate {
    pub fn config(self) -> PipelineConfig {
        let (dir, problem, counts, cells) = match self {
            ConfigTemplate::Hs94 => ("3d-hs94", "hs94", [1, 2, 4], [32, 16, 16]),
            ConfigTemplate::Rt => ("3d-rt", "rt", [2, 2, 2], [32, 32, 32]),
            ConfigTemplate::Sw => ("2d-sw", "sw", [4, 2, 1], [64, 64, 1]),
            ConfigTemplate::Galewsky04 => ("2d-galewsky04", "galewsky04", [4, 4, 1], [128, 64, 1]),
            ConfigTemplate::Showman06 => ("2d-showman06", "showman06", [4, 4, 1], [64, 32, 1]),
            ConfigTemplate::Jupole => ("2d-jupole", "jupole", [4, 4, 1], [128, 128, 1]),
            ConfigTemplate::Swgv => ("2d-swgv", "swgv", [8, 4, 1], [100, 50, 1]),
            ConfigTemplate::Jupiter => ("2d-jupiter", "jupole", [4, 4, 1], [256, 256, 1]),
        };
        PipelineConfig::new(dir, problem, counts, cells)
    }
}
