//! Coarse spatial partition of the bounding box used to split refinement
//! queues into bins, so idle workers pick up spatially coherent work.

use serde::{Deserialize, Serialize};

use crate::geometry::point::{Bbox3, Point};

/// Index of the grid cell containing `p` in a regular `n × n × n` grid
/// over `bbox`. Points outside the box map to the nearest boundary cell.
#[must_use]
pub fn grid_cell_index(bbox: &Bbox3, cells_per_axis: usize, p: &Point) -> usize {
    let n = cells_per_axis.max(1);
    let extent = bbox.extent();
    let mut index = 0;
    for axis in (0..3).rev() {
        let t = if extent[axis] > 0.0 {
            (p.coords()[axis] - bbox.min[axis]) / extent[axis]
        } else {
            0.0
        };
        // Saturating float to int cast; NaN maps to 0.
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let k = ((t * n as f64).floor().max(0.0) as usize).min(n - 1);
        index = index * n + k;
    }
    index
}

/// Regular bin grid over the meshing bounding box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorksharingGrid {
    bbox: Bbox3,
    cells_per_axis: usize,
}

impl WorksharingGrid {
    /// Creates a grid with `cells_per_axis` bins along each axis.
    #[must_use]
    pub fn new(bbox: Bbox3, cells_per_axis: usize) -> Self {
        Self {
            bbox,
            cells_per_axis: cells_per_axis.max(1),
        }
    }

    /// Replaces the covered box, keeping the resolution.
    pub fn set_bbox(&mut self, bbox: Bbox3) {
        self.bbox = bbox;
    }

    /// The covered box.
    #[must_use]
    pub const fn bbox(&self) -> &Bbox3 {
        &self.bbox
    }

    /// Total number of bins.
    #[must_use]
    pub const fn num_bins(&self) -> usize {
        self.cells_per_axis * self.cells_per_axis * self.cells_per_axis
    }

    /// Bin containing `p`.
    #[must_use]
    pub fn bin_of(&self, p: &Point) -> usize {
        grid_cell_index(&self.bbox, self.cells_per_axis, p)
    }
}
