//! # External Tools
//!
//! The pipeline delegates record concatenation, attribute editing and the
//! final combination to external programs. Each invocation is described by a
//! [`ToolCommand`] and executed through the [`CommandRunner`] trait, so the
//! pipeline can be driven by a fake runner in tests.
//!
//! Every invocation is checked: a non-zero exit status becomes
//! [`PipelineError::ExternalToolFailure`] carrying the command line and the
//! captured standard error.

use crate::config::{BuildConfig, ToolsConfig};
use crate::error::{PipelineError, PipelineResult};
use log::{debug, trace};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A single external program invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Directory to run in; the caller's directory when `None`
    pub current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'') {
                write!(f, " '{}'", arg.replace('\'', r"'\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes external tool invocations.
///
/// Implementations must block until the program has exited and must report a
/// non-zero exit status as an error.
pub trait CommandRunner {
    fn run(&mut self, command: &ToolCommand) -> PipelineResult<ToolOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &mut R {
    fn run(&mut self, command: &ToolCommand) -> PipelineResult<ToolOutput> {
        (**self).run(command)
    }
}

/// Runs commands as child processes of the current process
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, command: &ToolCommand) -> PipelineResult<ToolOutput> {
        debug!("Running: {}", command);

        let mut process = Command::new(&command.program);
        process.args(&command.args);
        if let Some(dir) = &command.current_dir {
            process.current_dir(dir);
        }

        let output = process.output().map_err(|source| PipelineError::ToolLaunch {
            command: command.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stdout.trim().is_empty() {
            trace!("{} stdout: {}", command.program, stdout.trim());
        }

        if !output.status.success() {
            return Err(PipelineError::ExternalToolFailure {
                command: command.to_string(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

/// `<concat> <concat_args...> <inputs...> <target>`
pub fn concat_command(tools: &ToolsConfig, inputs: &[PathBuf], target: &Path) -> ToolCommand {
    inputs
        .iter()
        .fold(
            ToolCommand::new(&tools.concat).args(&tools.concat_args),
            |cmd, input| cmd.path_arg(input),
        )
        .path_arg(target)
}

/// Sets (creating or overwriting) an integer global attribute in place
pub fn set_global_int_command(
    tools: &ToolsConfig,
    name: &str,
    value: i64,
    target: &Path,
) -> ToolCommand {
    ToolCommand::new(&tools.attribute_editor)
        .arg("-O")
        .arg("-a")
        .arg(format!("{},global,o,i,{}", name, value))
        .path_arg(target)
}

/// Compiles the combination executable into the working directory
pub fn build_command(build: &BuildConfig, combine: &str, working_directory: &Path) -> ToolCommand {
    ToolCommand::new(&build.compiler)
        .args(&build.flags)
        .arg("-o")
        .arg(combine)
        .path_arg(&build.source)
        .args(&build.libraries)
        .in_dir(working_directory)
}

/// `<combine> <combine_args...> <problem>.nc`, run inside the working
/// directory where the `<problem>.nc.NNNN` inputs live.
///
/// A program file of the same name in the working directory takes precedence
/// over one found on `PATH`.
pub fn combine_command(tools: &ToolsConfig, problem_name: &str, working_directory: &Path) -> ToolCommand {
    let program = resolve_local_program(&tools.combine, working_directory);
    ToolCommand::new(program)
        .args(&tools.combine_args)
        .arg(format!("{}.nc", problem_name))
        .in_dir(working_directory)
}

// Resolved to an absolute path: a relative program path would be looked up
// relative to the child's directory on some platforms.
fn resolve_local_program(program: &str, working_directory: &Path) -> String {
    let is_bare_name = Path::new(program).components().count() == 1;
    let local = working_directory.join(program);
    if is_bare_name && local.is_file() {
        if let Ok(absolute) = local.canonicalize() {
            return absolute.to_string_lossy().into_owned();
        }
    }
    program.to_string()
}
