//! Tetrahedral cells of the triangulation.
//!
//! # Invariants
//!
//! - `neighbors[i]` is the cell sharing the facet opposite `vertices[i]`.
//! - A finite cell is positively oriented:
//!   `orientation(v0, v1, v2, v3) == POSITIVE`.
//! - The orientation of every cell, finite or infinite, is combinatorially
//!   consistent with its neighbors, so replacing the infinite vertex of an
//!   infinite cell by a point strictly beyond its hull facet yields a
//!   positively oriented tetrahedron.

use serde::{Deserialize, Serialize};

use crate::core::collections::{CellKey, FacetIndex, VertexKey};

/// For facet `i`, the indices of its three vertices ordered so that
/// `orientation(v[a], v[b], v[c], v[i])` has the sign of the cell.
pub const FACET_VERTEX_INDICES: [[usize; 3]; 4] = [[1, 3, 2], [0, 2, 3], [0, 3, 1], [0, 1, 2]];

/// A tetrahedron given by four vertex keys and its four neighbors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    vertices: [VertexKey; 4],
    #[serde(skip)]
    pub(crate) neighbors: [Option<CellKey>; 4],
}

impl Cell {
    /// Creates a cell with no neighbors.
    #[must_use]
    pub const fn new(vertices: [VertexKey; 4]) -> Self {
        Self {
            vertices,
            neighbors: [None; 4],
        }
    }

    /// The four vertices.
    #[must_use]
    pub const fn vertices(&self) -> &[VertexKey; 4] {
        &self.vertices
    }

    /// Vertex `i`.
    #[must_use]
    pub const fn vertex(&self, i: usize) -> VertexKey {
        self.vertices[i]
    }

    /// The four neighbors, `None` only while a cell is being wired.
    #[must_use]
    pub const fn neighbors(&self) -> &[Option<CellKey>; 4] {
        &self.neighbors
    }

    /// Neighbor opposite vertex `i`.
    #[must_use]
    pub const fn neighbor(&self, i: usize) -> Option<CellKey> {
        self.neighbors[i]
    }

    /// Index of `v` in the cell.
    #[must_use]
    pub fn index_of(&self, v: VertexKey) -> Option<usize> {
        self.vertices.iter().position(|&w| w == v)
    }

    /// Index of the facet shared with `neighbor`.
    #[must_use]
    pub fn index_of_neighbor(&self, neighbor: CellKey) -> Option<usize> {
        self.neighbors.iter().position(|&n| n == Some(neighbor))
    }

    /// Returns `true` if `v` is a vertex of the cell.
    #[must_use]
    pub fn contains_vertex(&self, v: VertexKey) -> bool {
        self.vertices.contains(&v)
    }

    /// Vertices of facet `i`, oriented as in [`FACET_VERTEX_INDICES`].
    #[must_use]
    pub fn facet_vertices(&self, i: FacetIndex) -> [VertexKey; 3] {
        FACET_VERTEX_INDICES[usize::from(i)].map(|j| self.vertices[j])
    }

    pub(crate) fn set_neighbor(&mut self, i: usize, neighbor: Option<CellKey>) {
        self.neighbors[i] = neighbor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_facet_vertex_indices_exclude_opposite_vertex() {
        for (i, facet) in FACET_VERTEX_INDICES.iter().enumerate() {
            assert!(!facet.contains(&i));
            let mut sorted = *facet;
            sorted.sort_unstable();
            let expected: Vec<usize> = (0..4).filter(|&j| j != i).collect();
            assert_eq!(sorted.to_vec(), expected);
        }
    }

    #[test]
    fn test_cell_accessors() {
        let mut keys: SlotMap<VertexKey, ()> = SlotMap::with_key();
        let v: Vec<VertexKey> = (0..5).map(|_| keys.insert(())).collect();
        let mut cell = Cell::new([v[0], v[1], v[2], v[3]]);
        assert!(!cell.contains_vertex(v[4]));
        assert_eq!(cell.index_of(v[2]), Some(2));
        assert_eq!(cell.index_of(v[4]), None);
        assert!(cell.contains_vertex(v[3]));
        assert_eq!(cell.facet_vertices(0), [v[1], v[3], v[2]]);

        assert!(cell.neighbors().iter().all(Option::is_none));
        let mut other: SlotMap<CellKey, ()> = SlotMap::with_key();
        let n = other.insert(());
        cell.set_neighbor(2, Some(n));
        assert_eq!(cell.index_of_neighbor(n), Some(2));
        assert_eq!(cell.neighbor(2), Some(n));
    }
}
