use crate::block::*;
use crate::config::*;
use crate::decomposition::*;
use crate::error::*;
use crate::inspect::*;
use crate::pipeline::*;
use crate::tools::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

/// Writes one timestep file of a block the way the simulation lays it out:
/// an unlimited `time` dimension, coordinate variables `x1,x1b,x2,x2b,x3,x3b`
/// and a `logical_location` global attribute.
fn write_timestep_file(
    path: &Path,
    logical_location: [i32; 3],
    cells: [usize; 3],
    time: f64,
) -> Result<(), netcdf::Error> {
    let mut file = netcdf::create(path)?;
    file.add_attribute(LOGICAL_LOCATION_ATTR, logical_location.to_vec())?;
    file.add_unlimited_dimension("time")?;

    for axis in Axis::ALL {
        let n = cells[axis.index()];
        for kind in [CoordinateKind::Edge, CoordinateKind::Center] {
            let name = axis.variable_name(kind);
            file.add_dimension(name, n)?;
            let mut var = file.add_variable::<f32>(name, &[name])?;
            let values: Vec<f32> = (0..n).map(|i| i as f32).collect();
            var.put_values(&values, ..)?;
        }
    }

    let mut time_var = file.add_variable::<f64>("time", &["time"])?;
    time_var.put_value(time, [0])?;
    Ok(())
}

/// Lays out a source directory with `timesteps` files for every block of the
/// grid. Block `i` sits at the `i`-th location of `BlockGrid::locations`.
fn write_source_tree(
    dir: &Path,
    problem: &str,
    counts: [usize; 3],
    cells: [usize; 3],
    timesteps: usize,
) -> Result<(), netcdf::Error> {
    let grid = BlockGrid::new(counts);
    for (index, location) in grid.locations().iter().enumerate() {
        let [l0, l1, l2] = location.as_array();
        for t in 0..timesteps {
            let path = dir.join(format!("{}.block{}.out2.{:05}.nc", problem, index, t));
            write_timestep_file(&path, [l0 as i32, l1 as i32, l2 as i32], cells, t as f64)?;
        }
    }
    Ok(())
}

/// Stands in for ncrcat, ncatted, gcc and mppnccombine.
///
/// Concatenation copies the first input, the attribute editor writes the
/// global attribute with the netcdf crate, and combination copies the first
/// block file to `<problem>.nc`.
#[derive(Default)]
struct FakeTools {
    commands: Vec<ToolCommand>,
    fail_program: Option<String>,
    fail_after: usize,
    combine_produces_nothing: bool,
}

impl FakeTools {
    fn failing(program: &str, after: usize) -> Self {
        Self {
            fail_program: Some(program.to_string()),
            fail_after: after,
            ..Default::default()
        }
    }

    fn programs(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|c| {
                Path::new(&c.program)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect()
    }

    fn count(&self, program: &str) -> usize {
        self.programs().iter().filter(|p| *p == program).count()
    }
}

impl CommandRunner for FakeTools {
    fn run(&mut self, command: &ToolCommand) -> PipelineResult<ToolOutput> {
        self.commands.push(command.clone());
        let program = Path::new(&command.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.fail_program.as_deref() == Some(program.as_str()) {
            if self.fail_after == 0 {
                return Err(PipelineError::ExternalToolFailure {
                    command: command.to_string(),
                    code: Some(1),
                    stderr: format!("{}: simulated failure", program),
                });
            }
            self.fail_after -= 1;
        }

        let in_dir = |arg: &String| match &command.current_dir {
            Some(dir) => dir.join(arg),
            None => PathBuf::from(arg),
        };

        match program.as_str() {
            "ncrcat" => {
                let target = PathBuf::from(command.args.last().expect("target"));
                let first_input = command
                    .args
                    .iter()
                    .find(|a| !a.starts_with('-'))
                    .expect("input");
                fs::copy(first_input, &target)?;
            }
            "ncatted" => {
                let descriptor = &command.args[2];
                let parts: Vec<&str> = descriptor.split(',').collect();
                assert_eq!(parts[1], "global");
                assert_eq!(parts[3], "i");
                let value: i32 = parts[4].parse().expect("integer attribute");
                let mut file = netcdf::append(command.args.last().expect("target"))?;
                file.add_attribute(parts[0], value)?;
            }
            "gcc" => {
                let output = command
                    .args
                    .iter()
                    .position(|a| a == "-o")
                    .map(|i| in_dir(&command.args[i + 1]))
                    .expect("-o");
                fs::write(output, b"#!/bin/sh\n")?;
            }
            "mppnccombine" => {
                if !self.combine_produces_nothing {
                    let output = in_dir(command.args.last().expect("output"));
                    let first_block = PathBuf::from(format!("{}.0000", output.display()));
                    fs::copy(first_block, output)?;
                }
            }
            other => panic!("unexpected program {}", other),
        }
        Ok(ToolOutput::default())
    }
}

struct Fixture {
    _source: TempDir,
    _work: TempDir,
    config: PipelineConfig,
}

fn fixture(problem: &str, counts: [usize; 3], cells: [usize; 3], timesteps: usize) -> Fixture {
    let source = tempdir().unwrap();
    let work = tempdir().unwrap();
    write_source_tree(source.path(), problem, counts, cells, timesteps).unwrap();

    let mut config = PipelineConfig::new(source.path(), problem, counts, cells);
    config.working_directory = work.path().to_path_buf();
    Fixture {
        _source: source,
        _work: work,
        config,
    }
}

fn read_decomposition(path: &Path, variable: &str) -> Option<Vec<i64>> {
    let file = netcdf::open(path).unwrap();
    let var = file.variable(variable)?;
    let attr = var.attribute(DOMAIN_DECOMPOSITION_ATTR)?;
    Some(match attr.value().unwrap() {
        netcdf::AttributeValue::Ints(v) => v.into_iter().map(i64::from).collect(),
        other => panic!("unexpected attribute type {:?}", other),
    })
}

#[cfg(test)]
mod annotate_tests {
    use super::*;

    #[test]
    fn test_annotate_two_block_scenario() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let grid = BlockGrid::new([2, 1, 1]);
        let dims = BlockDims::new([10, 5, 5]);

        let block0 = dir.path().join("p.nc.0000");
        let block1 = dir.path().join("p.nc.0001");
        write_timestep_file(&block0, [0, 0, 0], [10, 5, 5], 0.0)?;
        write_timestep_file(&block1, [1, 0, 0], [10, 5, 5], 0.0)?;

        let (loc0, _) = annotate_block_file(&block0, &grid, &dims, false)?;
        let (loc1, _) = annotate_block_file(&block1, &grid, &dims, false)?;
        assert_eq!(loc0, LogicalLocation::new([0, 0, 0]));
        assert_eq!(loc1, LogicalLocation::new([1, 0, 0]));

        assert_eq!(read_decomposition(&block0, "x1"), Some(vec![1, 20, 1, 10]));
        assert_eq!(read_decomposition(&block0, "x1b"), Some(vec![0, 20, 0, 10]));
        assert_eq!(read_decomposition(&block1, "x1"), Some(vec![1, 20, 11, 20]));
        assert_eq!(read_decomposition(&block1, "x2b"), Some(vec![0, 5, 0, 5]));
        assert_eq!(read_decomposition(&block1, "x3"), Some(vec![1, 5, 1, 5]));
        assert_eq!(read_decomposition(&block1, "x3b"), None);
        Ok(())
    }

    #[test]
    fn test_annotate_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("p.nc.0003");
        write_timestep_file(&path, [1, 1, 0], [8, 4, 1], 0.0)?;
        let grid = BlockGrid::new([2, 2, 1]);
        let dims = BlockDims::new([8, 4, 1]);

        annotate_block_file(&path, &grid, &dims, true)?;
        let first = inspect_block_file(&path)?;
        annotate_block_file(&path, &grid, &dims, true)?;
        let second = inspect_block_file(&path)?;

        assert_eq!(first, second);
        assert_eq!(read_decomposition(&path, "x2"), Some(vec![1, 8, 5, 8]));
        assert_eq!(read_decomposition(&path, "x3b"), Some(vec![0, 1, 0, 1]));
        Ok(())
    }

    #[test]
    fn test_annotate_missing_logical_location() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("p.nc.0000");
        {
            let mut file = netcdf::create(&path)?;
            file.add_dimension("x1", 4)?;
            file.add_variable::<f32>("x1", &["x1"])?;
        }

        let err = annotate_block_file(&path, &BlockGrid::new([1, 1, 1]), &BlockDims::new([4, 1, 1]), false)
            .unwrap_err();
        match err {
            PipelineError::MalformedDataset { reason, .. } => {
                assert!(reason.contains("logical_location"));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn test_annotate_missing_coordinate_variable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("p.nc.0000");
        {
            let mut file = netcdf::create(&path)?;
            file.add_attribute(LOGICAL_LOCATION_ATTR, vec![0i32, 0, 0])?;
            file.add_dimension("x1", 4)?;
            file.add_variable::<f32>("x1", &["x1"])?;
        }

        let err = annotate_block_file(&path, &BlockGrid::new([1, 1, 1]), &BlockDims::new([4, 1, 1]), false)
            .unwrap_err();
        match err {
            PipelineError::MalformedDataset { reason, .. } => assert!(reason.contains("x1b")),
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn test_annotate_rejects_wrong_location_shape() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("p.nc.0000");
        {
            let mut file = netcdf::create(&path)?;
            file.add_attribute(LOGICAL_LOCATION_ATTR, vec![0i32, 0])?;
        }
        let err = annotate_block_file(&path, &BlockGrid::new([1, 1, 1]), &BlockDims::new([4, 1, 1]), false)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDataset { .. }));
        Ok(())
    }

    #[test]
    fn test_annotate_rejects_location_outside_grid() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("p.nc.0001");
        write_timestep_file(&path, [5, 0, 0], [10, 5, 5], 0.0)?;

        let err = annotate_block_file(&path, &BlockGrid::new([2, 1, 1]), &BlockDims::new([10, 5, 5]), false)
            .unwrap_err();
        match err {
            PipelineError::MalformedDataset { reason, .. } => {
                assert!(reason.contains("(5, 0, 0)"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(read_decomposition(&path, "x1"), None);
        Ok(())
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    #[test]
    fn test_full_run_combines_and_cleans_up() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture("rt", [2, 1, 1], [10, 5, 5], 3);
        let mut tools = FakeTools::default();

        let report = Pipeline::with_runner(&fx.config, &mut tools).run()?;

        assert_eq!(report.num_blocks, 2);
        assert_eq!(report.blocks.len(), 2);
        assert_eq!(report.blocks[0].input_files, 3);
        assert_eq!(report.blocks[1].logical_location, LogicalLocation::new([1, 0, 0]));

        let combined = fx.config.combined_path();
        assert!(combined.is_file());
        assert_eq!(report.removed.len(), 2);

        let work = &fx.config.working_directory;
        let leftovers = expand_pattern(&intermediate_pattern(work, "rt"))?;
        assert!(leftovers.is_empty());

        let info = inspect_block_file(&combined)?;
        assert_eq!(info.num_files_in_set, Some(2));
        assert_eq!(
            info.coordinates
                .iter()
                .find(|c| c.variable == "x1")
                .and_then(|c| c.decomposition)
                .map(|d| d.to_attribute()),
            Some(vec![1, 20, 1, 10])
        );

        assert_eq!(
            tools.programs(),
            vec!["ncrcat", "ncatted", "ncrcat", "ncatted", "mppnccombine"]
        );
        Ok(())
    }

    #[test]
    fn test_concat_receives_sorted_inputs() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture("sw", [1, 1, 1], [4, 4, 1], 3);
        let mut tools = FakeTools::default();
        Pipeline::with_runner(&fx.config, &mut tools).run()?;

        let concat = &tools.commands[0];
        let inputs: Vec<&String> = concat.args.iter().filter(|a| a.contains(".block0.")).collect();
        assert_eq!(inputs.len(), 3);
        assert!(inputs[0].ends_with("sw.block0.out2.00000.nc"));
        assert!(inputs[2].ends_with("sw.block0.out2.00002.nc"));
        assert!(concat.args.last().unwrap().ends_with("sw.nc.0000"));
        Ok(())
    }

    #[test]
    fn test_missing_block_aborts_before_combination() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture("rt", [2, 1, 1], [10, 5, 5], 1);
        fs::remove_file(fx.config.source_directory.join("rt.block1.out2.00000.nc"))?;
        let mut tools = FakeTools::default();

        let err = Pipeline::with_runner(&fx.config, &mut tools).run().unwrap_err();
        match err {
            PipelineError::MissingBlockData { block, .. } => assert_eq!(block, 1),
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(tools.count("mppnccombine"), 0);
        assert!(!fx.config.combined_path().exists());
        // Block 0 was already merged and stays for inspection
        assert!(fx.config.working_directory.join("rt.nc.0000").exists());
        Ok(())
    }

    #[test]
    fn test_tool_failure_aborts_remaining_blocks() {
        let fx = fixture("rt", [2, 2, 1], [4, 4, 1], 1);
        let mut tools = FakeTools::failing("ncatted", 1);

        let err = Pipeline::with_runner(&fx.config, &mut tools).run().unwrap_err();
        assert!(matches!(err, PipelineError::ExternalToolFailure { code: Some(1), .. }));
        assert_eq!(tools.count("ncrcat"), 2);
        assert_eq!(tools.count("ncatted"), 2);
        assert_eq!(tools.count("mppnccombine"), 0);
    }

    #[test]
    fn test_combination_failure_keeps_intermediates() {
        let fx = fixture("rt", [2, 1, 1], [4, 4, 4], 1);
        let mut tools = FakeTools::failing("mppnccombine", 0);

        let err = Pipeline::with_runner(&fx.config, &mut tools).run().unwrap_err();
        assert!(matches!(err, PipelineError::ExternalToolFailure { .. }));

        let work = &fx.config.working_directory;
        assert!(work.join("rt.nc.0000").exists());
        assert!(work.join("rt.nc.0001").exists());
    }

    #[test]
    fn test_combination_without_output_keeps_intermediates() {
        let fx = fixture("rt", [1, 1, 1], [4, 4, 4], 1);
        let mut tools = FakeTools {
            combine_produces_nothing: true,
            ..Default::default()
        };

        let err = Pipeline::with_runner(&fx.config, &mut tools).run().unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDataset { .. }));
        assert!(fx.config.working_directory.join("rt.nc.0000").exists());
    }

    #[test]
    fn test_cleanup_is_scoped_to_problem() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture("rt", [1, 1, 1], [4, 4, 4], 1);
        let unrelated = fx.config.working_directory.join("other.nc.0000");
        fs::write(&unrelated, b"keep me")?;
        let mut tools = FakeTools::default();

        Pipeline::with_runner(&fx.config, &mut tools).run()?;
        assert!(unrelated.exists());
        assert!(!fx.config.working_directory.join("rt.nc.0000").exists());
        Ok(())
    }

    #[test]
    fn test_keep_intermediates() -> Result<(), Box<dyn std::error::Error>> {
        let mut fx = fixture("rt", [2, 1, 1], [4, 4, 4], 1);
        fx.config.keep_intermediates = true;
        let mut tools = FakeTools::default();

        let report = Pipeline::with_runner(&fx.config, &mut tools).run()?;
        assert!(report.kept_intermediates);
        assert!(report.removed.is_empty());
        assert!(fx.config.working_directory.join("rt.nc.0001").exists());
        Ok(())
    }

    #[test]
    fn test_existing_output_requires_force() -> Result<(), Box<dyn std::error::Error>> {
        let mut fx = fixture("rt", [1, 1, 1], [4, 4, 4], 1);
        fs::write(fx.config.combined_path(), b"stale")?;

        let mut tools = FakeTools::default();
        let err = Pipeline::with_runner(&fx.config, &mut tools).run().unwrap_err();
        assert!(matches!(err, PipelineError::OutputExists(_)));
        assert!(tools.commands.is_empty());

        fx.config.force = true;
        Pipeline::with_runner(&fx.config, &mut tools).run()?;
        let info = inspect_block_file(&fx.config.combined_path())?;
        assert_eq!(info.num_files_in_set, Some(1));
        Ok(())
    }

    #[test]
    fn test_build_runs_after_blocks_and_before_combine() -> Result<(), Box<dyn std::error::Error>> {
        let mut fx = fixture("rt", [2, 1, 1], [4, 4, 4], 1);
        fx.config.tools.build = Some(BuildConfig::default());
        let mut tools = FakeTools::default();

        Pipeline::with_runner(&fx.config, &mut tools).run()?;
        assert_eq!(
            tools.programs(),
            vec!["ncrcat", "ncatted", "ncrcat", "ncatted", "gcc", "mppnccombine"]
        );
        // The freshly built binary in the working directory is preferred
        let combine = tools.commands.last().unwrap();
        assert!(Path::new(&combine.program).is_absolute());
        Ok(())
    }

    #[test]
    fn test_build_failure_prevents_combination() {
        let mut fx = fixture("rt", [1, 1, 1], [4, 4, 4], 1);
        fx.config.tools.build = Some(BuildConfig::default());
        let mut tools = FakeTools::failing("gcc", 0);

        assert!(Pipeline::with_runner(&fx.config, &mut tools).run().is_err());
        assert_eq!(tools.count("mppnccombine"), 0);
        assert!(fx.config.working_directory.join("rt.nc.0000").exists());
    }

    #[test]
    fn test_invalid_config_runs_nothing() {
        let mut fx = fixture("rt", [1, 1, 1], [4, 4, 4], 1);
        fx.config.block_counts = [1, 0, 1];
        let mut tools = FakeTools::default();

        let err = Pipeline::with_runner(&fx.config, &mut tools).run().unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(tools.commands.is_empty());
    }
}

#[cfg(test)]
mod plan_tests {
    use super::*;

    #[test]
    fn test_plan_lists_steps_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture("sw", [2, 1, 1], [4, 4, 1], 2);
        let plan = Pipeline::with_runner(&fx.config, FakeTools::default()).plan()?;

        assert!(plan.is_runnable());
        let kinds: Vec<&str> = plan
            .steps
            .iter()
            .map(|s| match s {
                PlannedStep::Concatenate { .. } => "concat",
                PlannedStep::SetAttribute { .. } => "attr",
                PlannedStep::Annotate { .. } => "annotate",
                PlannedStep::Build { .. } => "build",
                PlannedStep::Combine { .. } => "combine",
                PlannedStep::Cleanup { .. } => "cleanup",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["concat", "attr", "annotate", "concat", "attr", "annotate", "combine", "cleanup"]
        );
        assert_eq!(plan.decomposition.len(), 2);

        // Planning touches nothing in the working directory
        assert_eq!(fs::read_dir(&fx.config.working_directory)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_plan_reports_missing_blocks() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture("sw", [2, 1, 1], [4, 4, 1], 1);
        fs::remove_file(fx.config.source_directory.join("sw.block1.out2.00000.nc"))?;

        let plan = Pipeline::with_runner(&fx.config, FakeTools::default()).plan()?;
        assert!(!plan.is_runnable());
        assert_eq!(plan.missing_blocks, vec![1]);
        Ok(())
    }

    #[test]
    fn test_plan_serializes_to_json() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture("sw", [1, 1, 1], [4, 4, 1], 1);
        let plan = Pipeline::with_runner(&fx.config, FakeTools::default()).plan()?;
        let json = serde_json::to_value(&plan)?;
        assert_eq!(json["steps"][0]["step"], "concatenate");
        assert_eq!(json["steps"][0]["command"]["program"], "ncrcat");
        Ok(())
    }
}

#[cfg(test)]
mod inspect_tests {
    use super::*;

    #[test]
    fn test_inspect_unannotated_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("rt.block0.out2.00000.nc");
        write_timestep_file(&path, [0, 1, 0], [6, 3, 2], 0.0)?;

        let info = inspect_block_file(&path)?;
        assert_eq!(info.num_files_in_set, None);
        assert_eq!(info.logical_location, Some(vec![0, 1, 0]));
        assert_eq!(info.coordinates.len(), 6);
        assert!(info.coordinates.iter().all(|c| c.decomposition.is_none()));
        assert_eq!(info.coordinates[0].length, 6);
        assert_eq!(info.record_count, Some(1));
        Ok(())
    }
}
