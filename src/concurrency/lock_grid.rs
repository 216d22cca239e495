//! Spatial lock grid for parallel refinement.
//!
//! The bounding box is divided into a regular grid; each grid cell holds the
//! id of the worker owning it (`0` = free). A worker locks every grid cell
//! containing a vertex of the triangulation neighborhood it is about to
//! modify. Acquisition never blocks: a failed `try_lock` tells the caller to
//! release what it holds and retry the element later, which rules out
//! deadlocks.

use std::sync::atomic::{AtomicUsize, Ordering};

use smallvec::SmallVec;

use crate::concurrency::worksharing::grid_cell_index;
use crate::geometry::point::{Bbox3, Point};

/// Owner id meaning "free".
pub const NO_OWNER: usize = 0;

/// Grid of owner slots over a bounding box.
#[derive(Debug)]
pub struct LockGrid {
    bbox: Bbox3,
    cells_per_axis: usize,
    owners: Vec<AtomicUsize>,
}

impl LockGrid {
    /// Creates a free grid with `cells_per_axis` cells along each axis.
    #[must_use]
    pub fn new(bbox: Bbox3, cells_per_axis: usize) -> Self {
        let n = cells_per_axis.max(1);
        Self {
            bbox,
            cells_per_axis: n,
            owners: (0..n * n * n).map(|_| AtomicUsize::new(NO_OWNER)).collect(),
        }
    }

    /// The covered box.
    #[must_use]
    pub const fn bbox(&self) -> &Bbox3 {
        &self.bbox
    }

    /// Cells along each axis.
    #[must_use]
    pub const fn cells_per_axis(&self) -> usize {
        self.cells_per_axis
    }

    /// Total number of grid cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Always `false`; a grid has at least one cell.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Grid cell containing `p`, clamped to the grid.
    #[must_use]
    pub fn grid_index(&self, p: &Point) -> usize {
        grid_cell_index(&self.bbox, self.cells_per_axis, p)
    }

    /// Tries to take grid cell `index` for `owner` (non-zero).
    ///
    /// Succeeds if the cell is free or already held by `owner`.
    #[must_use]
    pub fn try_lock(&self, index: usize, owner: usize) -> bool {
        debug_assert_ne!(owner, NO_OWNER);
        let Some(slot) = self.owners.get(index) else {
            return false;
        };
        match slot.compare_exchange(NO_OWNER, owner, Ordering::Acquire, Ordering::Relaxed) {
            Ok(_) => true,
            Err(current) => current == owner,
        }
    }

    /// Releases grid cell `index` if `owner` holds it.
    pub fn unlock(&self, index: usize, owner: usize) {
        if let Some(slot) = self.owners.get(index) {
            let _ = slot.compare_exchange(owner, NO_OWNER, Ordering::Release, Ordering::Relaxed);
        }
    }

    /// Current owner of grid cell `index`.
    #[must_use]
    pub fn owner_of(&self, index: usize) -> Option<usize> {
        self.owners
            .get(index)
            .map(|slot| slot.load(Ordering::Acquire))
            .filter(|&owner| owner != NO_OWNER)
    }

    /// Number of grid cells currently held by anyone.
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.owners
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed) != NO_OWNER)
            .count()
    }

    /// Starts a scoped acquisition for `owner`.
    #[must_use]
    pub fn guard(&self, owner: usize) -> LockGuard<'_> {
        LockGuard {
            grid: self,
            owner,
            held: SmallVec::new(),
        }
    }
}

/// Grid cells acquired by one worker for one insertion; released on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    grid: &'a LockGrid,
    owner: usize,
    held: SmallVec<[usize; 16]>,
}

impl LockGuard<'_> {
    /// Tries to take grid cell `index`.
    #[must_use]
    pub fn try_lock_cell(&mut self, index: usize) -> bool {
        if self.held.contains(&index) {
            return true;
        }
        if self.grid.try_lock(index, self.owner) {
            self.held.push(index);
            true
        } else {
            false
        }
    }

    /// Tries to take the grid cell containing `p`.
    #[must_use]
    pub fn try_lock_point(&mut self, p: &Point) -> bool {
        let index = self.grid.grid_index(p);
        self.try_lock_cell(index)
    }

    /// Grid cells held so far.
    #[must_use]
    pub fn held(&self) -> &[usize] {
        &self.held
    }

    /// Owner id of the guard.
    #[must_use]
    pub const fn owner(&self) -> usize {
        self.owner
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        for &index in &self.held {
            self.grid.unlock(index, self.owner);
        }
    }
}
