use crate::config::PipelineConfig;
use crate::pipeline::{PipelinePlan, PipelineReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn show_greeting(config_source: &str) {
    println!("=== NetCDF Block Stitcher ===");
    println!("Configuration from: {}", config_source);
}

pub fn config_echo(config: &PipelineConfig) {
    let [n1, n2, n3] = config.block_counts;
    let [b1, b2, b3] = config.block_cell_dims;
    println!("\nConfiguration:");
    println!("  Source directory: {}", config.source_directory.display());
    println!("  Problem: {}", config.problem_name);
    println!("  Block grid: {} x {} x {} ({} blocks)", n1, n2, n3, config.num_blocks());
    println!("  Cells per block: {} x {} x {}", b1, b2, b3);
    println!("  Working directory: {}", config.working_directory.display());
    println!("  Output: {}", config.combined_path().display());
    if config.write_x3b {
        println!("  Annotating x3b: yes");
    }
    if config.keep_intermediates {
        println!("  Keeping intermediates: yes");
    }
}

pub fn show_plan(plan: &PipelinePlan) {
    println!("\nPlanned steps:");
    for (i, step) in plan.steps.iter().enumerate() {
        match step.command() {
            Some(command) => println!("  {:>3}. {}", i + 1, command),
            None => println!("  {:>3}. {:?}", i + 1, step),
        }
    }

    println!("\nDomain decomposition:");
    for location in &plan.decomposition {
        let cells: Vec<String> = location
            .annotations
            .iter()
            .map(|a| format!("{}={}", a.variable, a.decomposition))
            .collect();
        println!("  {}: {}", location.logical_location, cells.join(" "));
    }

    if !plan.missing_blocks.is_empty() {
        println!("\nBlocks without input files: {:?}", plan.missing_blocks);
    }
}

pub fn show_report(report: &PipelineReport) {
    println!("\nProcessed blocks:");
    for block in &report.blocks {
        println!(
            "  block {:>4}: {} files -> {} at {}",
            block.index,
            block.input_files,
            block.target.display(),
            block.logical_location
        );
    }
    println!("Combined output: {}", report.combined.display());
    if report.kept_intermediates {
        println!("Intermediates kept");
    } else {
        println!("Removed {} intermediate files", report.removed.len());
    }
}

pub fn block_progress_bar(num_blocks: usize) -> ProgressBar {
    let progress = ProgressBar::new(num_blocks as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} blocks ({elapsed})") {
        progress.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    progress
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!("\n=== Stitching completed in {:.2?} ===", elapsed);
}
