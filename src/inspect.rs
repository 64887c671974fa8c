//! # Block File Inspection
//!
//! Reads back the decomposition metadata of a merged block file (or of any
//! dataset carrying the same attributes) and renders it for humans or
//! scripts.

use crate::block::{LOGICAL_LOCATION_ATTR, NUM_FILES_IN_SET_ATTR, attribute_integers};
use crate::decomposition::{Axis, CoordinateKind, DOMAIN_DECOMPOSITION_ATTR, DomainDecomposition};
use crate::error::{PipelineError, PipelineResult};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Decomposition attribute found on one coordinate variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateInfo {
    pub variable: String,
    pub length: usize,
    /// `None` when the variable carries no `domain_decomposition` attribute
    pub decomposition: Option<DomainDecomposition>,
}

/// Decomposition metadata of one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockFileInfo {
    pub path: String,
    pub num_files_in_set: Option<i64>,
    pub logical_location: Option<Vec<i64>>,
    pub coordinates: Vec<CoordinateInfo>,
    pub record_count: Option<usize>,
}

/// Reads `NumFilesInSet`, `logical_location` and every coordinate variable's
/// `domain_decomposition` attribute. Absent attributes are reported as
/// `None`; attributes of the wrong shape are errors.
pub fn inspect_block_file(path: &Path) -> PipelineResult<BlockFileInfo> {
    debug!("Opening NetCDF file: {}", path.display());
    let file = netcdf::open(path)?;

    let num_files_in_set = match file.attribute(NUM_FILES_IN_SET_ATTR) {
        Some(attr) => {
            let value = attr.value()?;
            match attribute_integers(&value).as_deref() {
                Some([n]) => Some(*n),
                _ => {
                    return Err(PipelineError::malformed(
                        path,
                        format!("'{}' must be a single integer", NUM_FILES_IN_SET_ATTR),
                    ));
                }
            }
        }
        None => None,
    };

    let logical_location = match file.attribute(LOGICAL_LOCATION_ATTR) {
        Some(attr) => Some(attribute_integers(&attr.value()?).ok_or_else(|| {
            PipelineError::malformed(path, format!("'{}' is not an integer attribute", LOGICAL_LOCATION_ATTR))
        })?),
        None => None,
    };

    let mut coordinates = Vec::new();
    for axis in Axis::ALL {
        for kind in [CoordinateKind::Edge, CoordinateKind::Center] {
            let name = axis.variable_name(kind);
            let Some(var) = file.variable(name) else {
                continue;
            };
            let length = var.dimensions().iter().map(|d| d.len()).product();
            let decomposition = match var.attribute(DOMAIN_DECOMPOSITION_ATTR) {
                Some(attr) => {
                    let ints = attribute_integers(&attr.value()?).unwrap_or_default();
                    Some(DomainDecomposition::from_attribute(&ints).ok_or_else(|| {
                        PipelineError::malformed(
                            path,
                            format!("{}.{} is not a valid 4-tuple: {:?}", name, DOMAIN_DECOMPOSITION_ATTR, ints),
                        )
                    })?)
                }
                None => None,
            };
            coordinates.push(CoordinateInfo {
                variable: name.to_string(),
                length,
                decomposition,
            });
        }
    }

    let record_count = file
        .dimensions()
        .find(|d| d.is_unlimited())
        .map(|d| d.len());

    Ok(BlockFileInfo {
        path: path.display().to_string(),
        num_files_in_set,
        logical_location,
        coordinates,
        record_count,
    })
}

/// Print block file info in human-readable format
pub fn print_block_info_human(info: &BlockFileInfo) {
    println!("Block File Information:");
    println!("  Path: {}", info.path);
    match info.num_files_in_set {
        Some(n) => println!("  NumFilesInSet: {}", n),
        None => println!("  NumFilesInSet: (not set)"),
    }
    match &info.logical_location {
        Some(loc) => println!("  Logical location: {:?}", loc),
        None => println!("  Logical location: (not set)"),
    }
    if let Some(records) = info.record_count {
        println!("  Records: {}", records);
    }
    println!("  Coordinates:");
    for coord in &info.coordinates {
        match &coord.decomposition {
            Some(d) => println!("    {:<4} ({:>5}) {}", coord.variable, coord.length, d),
            None => println!("    {:<4} ({:>5}) -", coord.variable, coord.length),
        }
    }
}

/// Print block file info in JSON format
pub fn print_block_info_json(info: &BlockFileInfo) -> PipelineResult<()> {
    println!("{}", serde_json::to_string_pretty(info)?);
    Ok(())
}

/// Print block file info in YAML format
pub fn print_block_info_yaml(info: &BlockFileInfo) -> PipelineResult<()> {
    println!("{}", serde_yaml::to_string(info)?);
    Ok(())
}
