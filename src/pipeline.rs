//! # Block Post-Processor
//!
//! Drives the whole run, strictly in order:
//!
//! 1. For every block index: concatenate its timestep files, tag the result
//!    with `NumFilesInSet`, annotate the coordinate variables.
//! 2. Optionally compile the combination executable.
//! 3. Combine all `<problem>.nc.NNNN` files into `<problem>.nc`.
//! 4. Delete the intermediates, only once the combined file is verified.
//!
//! The first error aborts the run. Intermediates already written are left in
//! place so a failed run can be inspected.

use crate::block::{
    NUM_FILES_IN_SET_ATTR, annotate_block_file, block_file_pattern, block_target_name,
    expand_pattern, find_block_files, intermediate_pattern,
};
use crate::config::PipelineConfig;
use crate::decomposition::{CoordinateAnnotation, LogicalLocation, coordinate_annotations};
use crate::error::{PipelineError, PipelineResult};
use crate::tools::{
    CommandRunner, SystemRunner, ToolCommand, build_command, combine_command, concat_command,
    set_global_int_command,
};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of processing one block
#[derive(Debug, Clone, Serialize)]
pub struct BlockReport {
    pub index: usize,
    pub input_files: usize,
    pub target: PathBuf,
    pub logical_location: LogicalLocation,
    pub annotations: Vec<CoordinateAnnotation>,
}

/// Outcome of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub problem_name: String,
    pub num_blocks: usize,
    pub blocks: Vec<BlockReport>,
    pub combined: PathBuf,
    /// Intermediates deleted during cleanup
    pub removed: Vec<PathBuf>,
    pub kept_intermediates: bool,
}

/// One step of a planned run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PlannedStep {
    Concatenate { block: usize, command: ToolCommand },
    SetAttribute { block: usize, command: ToolCommand },
    Annotate { block: usize, target: PathBuf },
    Build { command: ToolCommand },
    Combine { command: ToolCommand },
    Cleanup { pattern: String },
}

impl PlannedStep {
    pub fn command(&self) -> Option<&ToolCommand> {
        match self {
            PlannedStep::Concatenate { command, .. }
            | PlannedStep::SetAttribute { command, .. }
            | PlannedStep::Build { command }
            | PlannedStep::Combine { command } => Some(command),
            PlannedStep::Annotate { .. } | PlannedStep::Cleanup { .. } => None,
        }
    }
}

/// Expected annotations for one logical location of the grid
#[derive(Debug, Clone, Serialize)]
pub struct PlannedLocation {
    pub logical_location: LogicalLocation,
    pub annotations: Vec<CoordinateAnnotation>,
}

/// What a run would do, computed without touching any file
#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    pub steps: Vec<PlannedStep>,
    /// Block indices whose input pattern matched nothing
    pub missing_blocks: Vec<usize>,
    pub decomposition: Vec<PlannedLocation>,
}

impl PipelinePlan {
    pub fn is_runnable(&self) -> bool {
        self.missing_blocks.is_empty()
    }
}

/// Runs the stitching pipeline for one configuration
pub struct Pipeline<'a, R: CommandRunner = SystemRunner> {
    config: &'a PipelineConfig,
    runner: R,
    progress: Option<ProgressBar>,
}

impl<'a> Pipeline<'a, SystemRunner> {
    /// Creates a pipeline that runs the external tools as child processes
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self::with_runner(config, SystemRunner)
    }
}

impl<'a, R: CommandRunner> Pipeline<'a, R> {
    pub fn with_runner(config: &'a PipelineConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            progress: None,
        }
    }

    /// Advances `progress` once per processed block
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Lists every step of a run. Only the input patterns are expanded; no
    /// file is created, changed or deleted.
    pub fn plan(&self) -> PipelineResult<PipelinePlan> {
        let config = self.config;
        config.validate()?;

        let mut steps = Vec::new();
        let mut missing_blocks = Vec::new();

        for index in 0..config.num_blocks() {
            let pattern = block_file_pattern(&config.source_directory, &config.problem_name, index);
            let inputs = expand_pattern(&pattern)?;
            if inputs.is_empty() {
                missing_blocks.push(index);
            }
            let target = self.block_target(index);
            steps.push(PlannedStep::Concatenate {
                block: index,
                command: concat_command(&config.tools, &inputs, &target),
            });
            steps.push(PlannedStep::SetAttribute {
                block: index,
                command: set_global_int_command(
                    &config.tools,
                    NUM_FILES_IN_SET_ATTR,
                    config.num_blocks() as i64,
                    &target,
                ),
            });
            steps.push(PlannedStep::Annotate {
                block: index,
                target,
            });
        }

        if let Some(build) = &config.tools.build {
            steps.push(PlannedStep::Build {
                command: build_command(build, &config.tools.combine, &config.working_directory),
            });
        }
        steps.push(PlannedStep::Combine {
            command: combine_command(&config.tools, &config.problem_name, &config.working_directory),
        });
        if !config.keep_intermediates {
            steps.push(PlannedStep::Cleanup {
                pattern: intermediate_pattern(&config.working_directory, &config.problem_name),
            });
        }

        let grid = config.grid();
        let dims = config.dims();
        let decomposition = grid
            .locations()
            .into_iter()
            .map(|location| PlannedLocation {
                logical_location: location,
                annotations: coordinate_annotations(&grid, &dims, &location, config.write_x3b),
            })
            .collect();

        Ok(PipelinePlan {
            steps,
            missing_blocks,
            decomposition,
        })
    }

    /// Runs every step and returns a report of what was done.
    pub fn run(&mut self) -> PipelineResult<PipelineReport> {
        let config = self.config;
        config.validate()?;

        let combined = config.combined_path();
        if combined.exists() && !config.force {
            return Err(PipelineError::OutputExists(combined));
        }
        fs::create_dir_all(&config.working_directory)?;

        info!(
            "Stitching {} blocks of '{}' from {}",
            config.num_blocks(),
            config.problem_name,
            config.source_directory.display()
        );

        let mut blocks = Vec::with_capacity(config.num_blocks());
        for index in 0..config.num_blocks() {
            let report = self.process_block(index)?;
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
            blocks.push(report);
        }
        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }

        self.build_combiner()?;
        self.combine(&combined)?;

        let removed = if config.keep_intermediates {
            info!("Keeping per-block intermediates");
            Vec::new()
        } else {
            self.cleanup()?
        };

        Ok(PipelineReport {
            problem_name: config.problem_name.clone(),
            num_blocks: config.num_blocks(),
            blocks,
            combined,
            removed,
            kept_intermediates: config.keep_intermediates,
        })
    }

    fn block_target(&self, index: usize) -> PathBuf {
        self.config
            .working_directory
            .join(block_target_name(&self.config.problem_name, index))
    }

    /// Concatenates, tags and annotates one block
    pub fn process_block(&mut self, index: usize) -> PipelineResult<BlockReport> {
        let config = self.config;
        info!("Processing block {} ...", index);

        let inputs = find_block_files(&config.source_directory, &config.problem_name, index)?;
        let target = self.block_target(index);

        self.runner
            .run(&concat_command(&config.tools, &inputs, &target))?;
        self.runner.run(&set_global_int_command(
            &config.tools,
            NUM_FILES_IN_SET_ATTR,
            config.num_blocks() as i64,
            &target,
        ))?;

        let (logical_location, annotations) =
            annotate_block_file(&target, &config.grid(), &config.dims(), config.write_x3b)?;
        debug!("Block {} sits at logical location {}", index, logical_location);

        Ok(BlockReport {
            index,
            input_files: inputs.len(),
            target,
            logical_location,
            annotations,
        })
    }

    fn build_combiner(&mut self) -> PipelineResult<()> {
        let config = self.config;
        if let Some(build) = &config.tools.build {
            info!("Building {} from {}", config.tools.combine, build.source.display());
            self.runner
                .run(&build_command(build, &config.tools.combine, &config.working_directory))?;
        }
        Ok(())
    }

    fn combine(&mut self, combined: &Path) -> PipelineResult<()> {
        let config = self.config;
        if combined.exists() {
            warn!("Replacing existing {}", combined.display());
            fs::remove_file(combined)?;
        }

        info!("Combining blocks into {}", combined.display());
        self.runner.run(&combine_command(
            &config.tools,
            &config.problem_name,
            &config.working_directory,
        ))?;

        if !combined.is_file() {
            return Err(PipelineError::malformed(
                combined,
                "combination tool exited successfully but produced no output",
            ));
        }
        Ok(())
    }

    /// Deletes `<problem>.nc.????` from the working directory
    fn cleanup(&mut self) -> PipelineResult<Vec<PathBuf>> {
        let pattern = intermediate_pattern(&self.config.working_directory, &self.config.problem_name);
        let intermediates = expand_pattern(&pattern)?;
        for path in &intermediates {
            debug!("Removing {}", path.display());
            fs::remove_file(path)?;
        }
        info!("Removed {} intermediate files", intermediates.len());
        Ok(intermediates)
    }
}
