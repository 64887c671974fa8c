//! # Error Types
//!
//! Every fallible operation in the library returns [`PipelineResult`]. The
//! pipeline never retries: the first error aborts the run, and intermediates
//! are left on disk for inspection.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while stitching block files together
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no input files for block {block} (pattern: {pattern})")]
    MissingBlockData { block: usize, pattern: String },

    #[error("external tool failed with {}: {command}{}", ExitDisplay(.code), stderr_suffix(.stderr))]
    ExternalToolFailure {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not launch '{command}': {source}")]
    ToolLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dataset {}: {reason}", .path.display())]
    MalformedDataset { path: PathBuf, reason: String },

    #[error("output file already exists: {} (use --force to overwrite)", .0.display())]
    OutputExists(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("error while expanding file pattern: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedDataset {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

struct ExitDisplay<'a>(&'a Option<i32>);

impl fmt::Display for ExitDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "no exit code (terminated by signal)"),
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{}", trimmed)
    }
}
