//! # Domain Decomposition
//!
//! Computes where a block's slice of each coordinate array sits within the
//! global domain. The result is written to the `domain_decomposition`
//! attribute of the block's coordinate variables as four integers:
//!
//! ```text
//! [is_cell_edge_flag, global_extent, start_index, end_index]
//! ```
//!
//! Edge coordinates (`x1`, `x2`, `x3`) use a 1-based start, center
//! coordinates (`x1b`, `x2b`, `x3b`) a 0-based one. Both share the end index
//! `bx * (loc + 1)`.
//!
//! ## Example
//!
//! ```rust
//! use ncstitch::decomposition::{Axis, BlockDims, BlockGrid, CoordinateKind, DomainDecomposition, LogicalLocation};
//!
//! let grid = BlockGrid::new([2, 1, 1]);
//! let dims = BlockDims::new([10, 5, 5]);
//! let loc = LogicalLocation::new([1, 0, 0]);
//!
//! let x1 = DomainDecomposition::compute(Axis::X1, CoordinateKind::Edge, &grid, &dims, &loc);
//! assert_eq!(x1.to_attribute(), vec![1, 20, 11, 20]);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the per-variable attribute holding the decomposition tuple
pub const DOMAIN_DECOMPOSITION_ATTR: &str = "domain_decomposition";

/// One of the three spatial axes of the block grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X1,
    X2,
    X3,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X1, Axis::X2, Axis::X3];

    /// Zero-based position of the axis in `[nrb1, nrb2, nrb3]` style triples
    pub fn index(self) -> usize {
        match self {
            Axis::X1 => 0,
            Axis::X2 => 1,
            Axis::X3 => 2,
        }
    }

    /// Name of the coordinate variable for this axis and coordinate kind
    pub fn variable_name(self, kind: CoordinateKind) -> &'static str {
        match (self, kind) {
            (Axis::X1, CoordinateKind::Edge) => "x1",
            (Axis::X1, CoordinateKind::Center) => "x1b",
            (Axis::X2, CoordinateKind::Edge) => "x2",
            (Axis::X2, CoordinateKind::Center) => "x2b",
            (Axis::X3, CoordinateKind::Edge) => "x3",
            (Axis::X3, CoordinateKind::Center) => "x3b",
        }
    }
}

/// Whether a coordinate variable samples cell interfaces or cell centers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateKind {
    Edge,
    Center,
}

impl CoordinateKind {
    fn flag(self) -> i64 {
        match self {
            CoordinateKind::Edge => 1,
            CoordinateKind::Center => 0,
        }
    }

    fn base_offset(self) -> i64 {
        match self {
            CoordinateKind::Edge => 1,
            CoordinateKind::Center => 0,
        }
    }
}

/// Number of blocks along each axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGrid {
    counts: [usize; 3],
}

impl BlockGrid {
    pub fn new(counts: [usize; 3]) -> Self {
        Self { counts }
    }

    pub fn count(&self, axis: Axis) -> usize {
        self.counts[axis.index()]
    }

    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    /// Total number of blocks, `nrb1 * nrb2 * nrb3`
    pub fn num_blocks(&self) -> usize {
        self.counts.iter().product()
    }

    /// Every logical location in the grid, axis 1 varying fastest
    pub fn locations(&self) -> Vec<LogicalLocation> {
        let [n1, n2, n3] = self.counts;
        let mut locations = Vec::with_capacity(self.num_blocks());
        for l2 in 0..n3 {
            for l1 in 0..n2 {
                for l0 in 0..n1 {
                    locations.push(LogicalLocation::new([l0, l1, l2]));
                }
            }
        }
        locations
    }

    pub fn contains(&self, location: &LogicalLocation) -> bool {
        Axis::ALL
            .iter()
            .all(|&axis| location.get(axis) < self.count(axis))
    }
}

/// Number of cells per block along each axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDims {
    cells: [usize; 3],
}

impl BlockDims {
    pub fn new(cells: [usize; 3]) -> Self {
        Self { cells }
    }

    pub fn cells(&self, axis: Axis) -> usize {
        self.cells[axis.index()]
    }

    pub fn as_array(&self) -> [usize; 3] {
        self.cells
    }
}

/// Logical position of a block within the block grid
///
/// Always read back from the block's own `logical_location` attribute, never
/// derived from the block's linear index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalLocation {
    loc: [usize; 3],
}

impl LogicalLocation {
    pub fn new(loc: [usize; 3]) -> Self {
        Self { loc }
    }

    pub fn get(&self, axis: Axis) -> usize {
        self.loc[axis.index()]
    }

    pub fn as_array(&self) -> [usize; 3] {
        self.loc
    }
}

impl fmt::Display for LogicalLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.loc[0], self.loc[1], self.loc[2])
    }
}

/// The `[flag, global_extent, start, end]` tuple for one coordinate variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDecomposition {
    pub is_cell_edge: bool,
    pub global_extent: i64,
    pub start_index: i64,
    pub end_index: i64,
}

impl DomainDecomposition {
    pub fn compute(
        axis: Axis,
        kind: CoordinateKind,
        grid: &BlockGrid,
        dims: &BlockDims,
        location: &LogicalLocation,
    ) -> Self {
        let bx = dims.cells(axis) as i64;
        let nrb = grid.count(axis) as i64;
        let loc = location.get(axis) as i64;

        Self {
            is_cell_edge: kind == CoordinateKind::Edge,
            global_extent: bx * nrb,
            start_index: bx * loc + kind.base_offset(),
            end_index: bx * (loc + 1),
        }
    }

    /// Attribute payload as stored in the dataset.
    ///
    /// Values are assumed to fit in an `i32`; `PipelineConfig::validate`
    /// rejects grids whose global extent does not.
    pub fn to_attribute(&self) -> Vec<i32> {
        let flag = if self.is_cell_edge {
            CoordinateKind::Edge.flag()
        } else {
            CoordinateKind::Center.flag()
        };
        [flag, self.global_extent, self.start_index, self.end_index]
            .iter()
            .map(|&v| v as i32)
            .collect()
    }

    /// Parses an attribute payload read back from a dataset
    pub fn from_attribute(values: &[i64]) -> Option<Self> {
        match values {
            [flag, extent, start, end] if *flag == 0 || *flag == 1 => Some(Self {
                is_cell_edge: *flag == 1,
                global_extent: *extent,
                start_index: *start,
                end_index: *end,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for DomainDecomposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            if self.is_cell_edge { 1 } else { 0 },
            self.global_extent,
            self.start_index,
            self.end_index
        )
    }
}

/// A coordinate variable together with the decomposition to write on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinateAnnotation {
    pub variable: &'static str,
    pub decomposition: DomainDecomposition,
}

/// Computes the annotations for every coordinate variable of one block.
///
/// `x3b` is left out unless `include_x3b` is set, matching the datasets this
/// tool has been run against so far.
pub fn coordinate_annotations(
    grid: &BlockGrid,
    dims: &BlockDims,
    location: &LogicalLocation,
    include_x3b: bool,
) -> Vec<CoordinateAnnotation> {
    let mut annotations = Vec::with_capacity(6);
    for axis in Axis::ALL {
        let kinds: &[CoordinateKind] = if axis != Axis::X3 || include_x3b {
            &[CoordinateKind::Edge, CoordinateKind::Center]
        } else {
            &[CoordinateKind::Edge]
        };
        for &kind in kinds {
            annotations.push(CoordinateAnnotation {
                variable: axis.variable_name(kind),
                decomposition: DomainDecomposition::compute(axis, kind, grid, dims, location),
            });
        }
    }
    annotations
}
