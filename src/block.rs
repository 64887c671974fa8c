//! # Block Files
//!
//! Locates the per-timestep files of a block, names the merged per-block
//! intermediates and performs the NetCDF read-modify-write that annotates a
//! merged block file with its place in the global domain.

use crate::decomposition::{
    BlockDims, BlockGrid, CoordinateAnnotation, DOMAIN_DECOMPOSITION_ATTR, LogicalLocation,
    coordinate_annotations,
};
use crate::error::{PipelineError, PipelineResult};
use log::debug;
use netcdf::AttributeValue;
use std::path::{Path, PathBuf};

/// Global attribute holding the block's `(loc0, loc1, loc2)` position
pub const LOGICAL_LOCATION_ATTR: &str = "logical_location";
/// Global attribute holding the number of blocks in the set
pub const NUM_FILES_IN_SET_ATTR: &str = "NumFilesInSet";

/// Glob matching every timestep file of block `index`:
/// `<source_directory>/<problem>.block<index>.*.*.nc`
pub fn block_file_pattern(source_directory: &Path, problem_name: &str, index: usize) -> String {
    let dir = glob::Pattern::escape(&source_directory.to_string_lossy());
    let dir = dir.trim_end_matches('/');
    format!("{}/{}.block{}.*.*.nc", dir, problem_name, index)
}

/// File name of the merged intermediate for block `index`, `<problem>.nc.NNNN`
pub fn block_target_name(problem_name: &str, index: usize) -> String {
    format!("{}.nc.{:04}", problem_name, index)
}

/// Glob matching every merged intermediate of a problem in `directory`
pub fn intermediate_pattern(directory: &Path, problem_name: &str) -> String {
    let dir = glob::Pattern::escape(&directory.to_string_lossy());
    let dir = dir.trim_end_matches('/');
    format!("{}/{}.nc.????", dir, glob::Pattern::escape(problem_name))
}

/// Expands a glob pattern into a lexicographically sorted list of files
pub fn expand_pattern(pattern: &str) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in glob::glob(pattern)? {
        let path = entry?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Finds the timestep files of one block.
///
/// An empty match is an error: a missing block would silently leave a hole
/// in the combined domain.
pub fn find_block_files(
    source_directory: &Path,
    problem_name: &str,
    index: usize,
) -> PipelineResult<Vec<PathBuf>> {
    let pattern = block_file_pattern(source_directory, problem_name, index);
    let files = expand_pattern(&pattern)?;
    if files.is_empty() {
        return Err(PipelineError::MissingBlockData {
            block: index,
            pattern,
        });
    }
    debug!("Block {}: {} timestep files", index, files.len());
    Ok(files)
}

/// Converts any integer attribute payload into `i64`s
pub(crate) fn attribute_integers(value: &AttributeValue) -> Option<Vec<i64>> {
    let values = match value {
        AttributeValue::Schar(v) => vec![*v as i64],
        AttributeValue::Uchar(v) => vec![*v as i64],
        AttributeValue::Short(v) => vec![*v as i64],
        AttributeValue::Ushort(v) => vec![*v as i64],
        AttributeValue::Int(v) => vec![*v as i64],
        AttributeValue::Uint(v) => vec![*v as i64],
        AttributeValue::Longlong(v) => vec![*v],
        AttributeValue::Ulonglong(v) => vec![i64::try_from(*v).ok()?],
        AttributeValue::Schars(v) => v.iter().map(|&x| x as i64).collect(),
        AttributeValue::Uchars(v) => v.iter().map(|&x| x as i64).collect(),
        AttributeValue::Shorts(v) => v.iter().map(|&x| x as i64).collect(),
        AttributeValue::Ushorts(v) => v.iter().map(|&x| x as i64).collect(),
        AttributeValue::Ints(v) => v.iter().map(|&x| x as i64).collect(),
        AttributeValue::Uints(v) => v.iter().map(|&x| x as i64).collect(),
        AttributeValue::Longlongs(v) => v.clone(),
        AttributeValue::Ulonglongs(v) => v
            .iter()
            .map(|&x| i64::try_from(x).ok())
            .collect::<Option<Vec<_>>>()?,
        _ => return None,
    };
    Some(values)
}

/// Reads the `logical_location` global attribute of an open dataset
pub fn read_logical_location(file: &netcdf::File, path: &Path) -> PipelineResult<LogicalLocation> {
    let attr = file.attribute(LOGICAL_LOCATION_ATTR).ok_or_else(|| {
        PipelineError::malformed(path, format!("missing global attribute '{}'", LOGICAL_LOCATION_ATTR))
    })?;
    let value = attr.value()?;
    let ints = attribute_integers(&value).ok_or_else(|| {
        PipelineError::malformed(
            path,
            format!("'{}' is not an integer attribute: {:?}", LOGICAL_LOCATION_ATTR, value),
        )
    })?;

    match ints.as_slice() {
        [l0, l1, l2] if *l0 >= 0 && *l1 >= 0 && *l2 >= 0 => Ok(LogicalLocation::new([
            *l0 as usize,
            *l1 as usize,
            *l2 as usize,
        ])),
        _ => Err(PipelineError::malformed(
            path,
            format!(
                "'{}' must hold three non-negative integers, found {:?}",
                LOGICAL_LOCATION_ATTR, ints
            ),
        )),
    }
}

/// Writes the `domain_decomposition` attribute on every coordinate variable
/// of a merged block file and returns the block's logical location.
///
/// A location outside `grid` is rejected before anything is written.
///
/// The file is opened for appending and closed before returning. Attribute
/// writes overwrite, so calling this twice leaves the file unchanged.
pub fn annotate_block_file(
    path: &Path,
    grid: &BlockGrid,
    dims: &BlockDims,
    include_x3b: bool,
) -> PipelineResult<(LogicalLocation, Vec<CoordinateAnnotation>)> {
    let mut file = netcdf::append(path)?;

    let location = read_logical_location(&file, path)?;
    if !grid.contains(&location) {
        return Err(PipelineError::malformed(
            path,
            format!(
                "logical location {} lies outside the {:?} block grid",
                location,
                grid.counts()
            ),
        ));
    }

    let annotations = coordinate_annotations(grid, dims, &location, include_x3b);
    for annotation in &annotations {
        let mut var = file.variable_mut(annotation.variable).ok_or_else(|| {
            PipelineError::malformed(
                path,
                format!("missing coordinate variable '{}'", annotation.variable),
            )
        })?;
        var.put_attribute(
            DOMAIN_DECOMPOSITION_ATTR,
            annotation.decomposition.to_attribute(),
        )?;
        debug!(
            "{}: {}.{} = {}",
            path.display(),
            annotation.variable,
            DOMAIN_DECOMPOSITION_ATTR,
            annotation.decomposition
        );
    }

    // Dropping the handle closes the file and flushes the attribute writes
    drop(file);

    Ok((location, annotations))
}
