//! Facet handles and canonical facet keys.
//!
//! A [`Facet`] names a triangle through one of its two incident cells.
//! A [`FacetKey`] names it by its sorted vertex triple, independently of the
//! cell it is seen from, and survives insertions that keep the triangle.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::collections::{CellKey, FacetIndex, VertexKey};

/// A facet seen from one of its incident cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Facet {
    cell: CellKey,
    index: FacetIndex,
}

impl Facet {
    /// Facet of `cell` opposite its vertex `index`.
    #[must_use]
    pub const fn new(cell: CellKey, index: FacetIndex) -> Self {
        Self { cell, index }
    }

    /// The cell the facet is seen from.
    #[must_use]
    pub const fn cell(&self) -> CellKey {
        self.cell
    }

    /// Index of the facet in its cell.
    #[must_use]
    pub const fn index(&self) -> FacetIndex {
        self.index
    }

    /// Index of the facet in its cell as `usize`.
    #[must_use]
    pub fn index_usize(&self) -> usize {
        usize::from(self.index)
    }
}

/// Canonical identifier of a triangle: its vertex keys in sorted order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FacetKey([VertexKey; 3]);

impl FacetKey {
    /// Builds the key of the triangle `vertices`, in any order.
    #[must_use]
    pub fn new(mut vertices: [VertexKey; 3]) -> Self {
        vertices.sort_unstable();
        Self(vertices)
    }

    /// Sorted vertices of the triangle.
    #[must_use]
    pub const fn vertices(&self) -> &[VertexKey; 3] {
        &self.0
    }

    /// Returns `true` if `v` is a vertex of the triangle.
    #[must_use]
    pub fn contains(&self, v: VertexKey) -> bool {
        self.0.contains(&v)
    }

    /// The three edges of the triangle.
    #[must_use]
    pub const fn edges(&self) -> [EdgeKey; 3] {
        let [a, b, c] = self.0;
        [EdgeKey([a, b]), EdgeKey([a, c]), EdgeKey([b, c])]
    }
}

impl fmt::Display for FacetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Canonical identifier of an edge: its two vertex keys in sorted order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey([VertexKey; 2]);

impl EdgeKey {
    /// Builds the key of the edge `(a, b)`.
    #[must_use]
    pub fn new(a: VertexKey, b: VertexKey) -> Self {
        if a <= b { Self([a, b]) } else { Self([b, a]) }
    }

    /// Sorted endpoints.
    #[must_use]
    pub const fn vertices(&self) -> &[VertexKey; 2] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_facet_key_is_order_independent() {
        let mut keys: SlotMap<VertexKey, ()> = SlotMap::with_key();
        let (a, b, c) = (keys.insert(()), keys.insert(()), keys.insert(()));
        assert_eq!(FacetKey::new([a, b, c]), FacetKey::new([c, a, b]));
        assert_eq!(EdgeKey::new(a, b), EdgeKey::new(b, a));

        let key = FacetKey::new([b, c, a]);
        assert!(key.contains(a));
        assert!(key.edges().contains(&EdgeKey::new(c, a)));
    }
}
