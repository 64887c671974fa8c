use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use ncstitch::cli::{Cli, Commands, OutputFormat, StitchArgs};
use ncstitch::config::PipelineConfig;
use ncstitch::inspect::{
    inspect_block_file, print_block_info_human, print_block_info_json, print_block_info_yaml,
};
use ncstitch::log::{
    block_progress_bar, config_echo, show_farewell_with_timing, show_greeting, show_plan,
    show_report,
};
use ncstitch::pipeline::Pipeline;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    run(cli)
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.as_deref();
    let human = cli.output_format == OutputFormat::Human && !cli.quiet;

    match &cli.command {
        Commands::Run { stitch, dry_run } => {
            let config = load_config(stitch, config_file)?;
            if *dry_run {
                return plan(&config, cli.output_format, human);
            }
            stitch_blocks(&config, config_file, &cli, human)
        }
        Commands::Plan { stitch } => {
            let config = load_config(stitch, config_file)?;
            plan(&config, cli.output_format, human)
        }
        Commands::Validate {
            config_file: file,
            detailed,
        } => {
            let path = file
                .as_deref()
                .or(config_file)
                .context("No configuration file given")?;
            validate(path, *detailed, human)
        }
        Commands::Inspect { file, format } => {
            let info = inspect_block_file(file)
                .with_context(|| format!("Failed to inspect {}", file.display()))?;
            match format.unwrap_or(cli.output_format) {
                OutputFormat::Human => print_block_info_human(&info),
                OutputFormat::Json => print_block_info_json(&info)?,
                OutputFormat::Yaml => print_block_info_yaml(&info)?,
            }
            Ok(())
        }
        Commands::Template {
            preset,
            output,
            format,
        } => {
            let text = preset.config().to_string_as(*format)?;
            write_output(output.as_deref(), text.as_bytes())
        }
        Commands::Completions { shell, output } => {
            let mut buffer = Vec::new();
            clap_complete::generate(*shell, &mut Cli::command(), "ncstitch", &mut buffer);
            write_output(output.as_deref(), &buffer)
        }
    }
}

fn load_config(stitch: &StitchArgs, config_file: Option<&Path>) -> Result<PipelineConfig> {
    stitch
        .resolve(config_file)
        .context("Failed to load configuration")
}

fn stitch_blocks(
    config: &PipelineConfig,
    config_file: Option<&Path>,
    cli: &Cli,
    human: bool,
) -> Result<()> {
    let start_time = Instant::now();

    if human {
        show_greeting(
            &config_file
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "command line".to_string()),
        );
        config_echo(config);
    }

    let mut pipeline = Pipeline::new(config);
    if human && !cli.verbose {
        pipeline = pipeline.with_progress(block_progress_bar(config.num_blocks()));
    }
    let report = pipeline
        .run()
        .with_context(|| format!("Failed to stitch '{}'", config.problem_name))?;

    if human {
        show_report(&report);
        show_farewell_with_timing(start_time.elapsed());
    } else if !cli.quiet {
        print_structured(&report, cli.output_format)?;
    }
    Ok(())
}

fn plan(config: &PipelineConfig, format: OutputFormat, human: bool) -> Result<()> {
    let plan = Pipeline::new(config).plan()?;
    if human {
        config_echo(config);
        show_plan(&plan);
    } else {
        print_structured(&plan, format)?;
    }
    Ok(())
}

fn validate(path: &Path, detailed: bool, human: bool) -> Result<()> {
    let config = PipelineConfig::from_file(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("{} is not valid", path.display()))?;

    if detailed {
        let plan = Pipeline::new(&config).plan()?;
        if !plan.is_runnable() {
            anyhow::bail!(
                "{} is valid but blocks {:?} have no input files",
                path.display(),
                plan.missing_blocks
            );
        }
    }

    if human {
        println!("✓ {} is valid", path.display());
        if detailed {
            config_echo(&config);
        }
    }
    Ok(())
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn write_output(path: Option<&Path>, contents: &[u8]) -> Result<()> {
    match path {
        Some(path) => fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => io::stdout()
            .write_all(contents)
            .context("Failed to write to stdout"),
    }
}
