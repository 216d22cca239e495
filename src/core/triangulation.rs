//! Three-dimensional Delaunay triangulation with an infinite vertex.
//!
//! Following CGAL's Triangulation_3, the convex hull is closed by a single
//! infinite vertex: every hull facet is shared by one finite cell and one
//! infinite cell, so every cell has exactly four neighbors.
//!
//! Points inserted before four affinely independent points are known are
//! held as unconnected vertices; the first tetrahedron is built as soon as
//! they span 3D and the held points are then inserted incrementally.

use std::sync::Arc;

use crate::concurrency::lock_grid::LockGrid;
use crate::core::algorithms::incremental_insertion::{
    InsertionError, InsertionOutcome, insert_vertex_in_conflict_zone,
};
use crate::core::algorithms::locate::{
    ConflictError, ConflictZone, LocateError, LocateResult, find_conflict_zone, locate,
};
use crate::core::cell::{Cell, FACET_VERTEX_INDICES};
use crate::core::collections::{
    CellKey, FacetIndex, FastHashMap, FastHashSet, StorageMap, VertexKey,
};
use crate::core::facet::{Facet, FacetKey};
use crate::core::vertex::Vertex;
use crate::geometry::point::Point;
use crate::geometry::predicates::{InSphere, Orientation, insphere, orientation};
use crate::geometry::util::{circumcenter, triangle_normal};

/// Errors reported by triangulation construction and validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TriangulationError {
    /// The combinatorial or geometric structure is inconsistent.
    #[error("Invalid triangulation structure: {message}")]
    InvalidStructure {
        /// Description of the inconsistency
        message: String,
    },

    /// A point could not be inserted.
    #[error("Insertion failed: {0}")]
    Insertion(#[from] InsertionError),
}

/// A 3D Delaunay triangulation.
#[derive(Clone, Debug)]
pub struct Triangulation {
    pub(crate) vertices: StorageMap<VertexKey, Vertex>,
    pub(crate) cells: StorageMap<CellKey, Cell>,
    infinite: VertexKey,
    pending: Vec<VertexKey>,
    hint: Option<CellKey>,
    lock_data_structure: Option<Arc<LockGrid>>,
}

impl Default for Triangulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Triangulation {
    /// Creates an empty triangulation.
    #[must_use]
    pub fn new() -> Self {
        let mut vertices = StorageMap::with_key();
        let infinite = vertices.insert(Vertex::new(Point::ORIGIN));
        Self {
            vertices,
            cells: StorageMap::with_key(),
            infinite,
            pending: Vec::new(),
            hint: None,
            lock_data_structure: None,
        }
    }

    /// Builds the Delaunay triangulation of `points`.
    ///
    /// Points equal to an earlier point are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a point is not finite or cannot be inserted.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tetmesh::core::triangulation::Triangulation;
    /// use tetmesh::geometry::point::Point;
    ///
    /// let tr = Triangulation::from_points(&[
    ///     Point::new([0.0, 0.0, 0.0]),
    ///     Point::new([1.0, 0.0, 0.0]),
    ///     Point::new([0.0, 1.0, 0.0]),
    ///     Point::new([0.0, 0.0, 1.0]),
    ///     Point::new([1.0, 1.0, 1.0]),
    /// ])
    /// .unwrap();
    /// assert_eq!(tr.number_of_vertices(), 5);
    /// assert_eq!(tr.dimension(), 3);
    /// assert!(tr.is_delaunay());
    /// ```
    pub fn from_points(points: &[Point]) -> Result<Self, TriangulationError> {
        let mut tr = Self::new();
        for p in points {
            match tr.insert(*p) {
                Ok(_) => {}
                Err(InsertionError::ConflictRegion(ConflictError::DuplicateVertex { vertex })) => {
                    tracing::debug!("Skipping duplicate point {p} (vertex {vertex:?})");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(tr)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Affine dimension of the vertex set: `-1` when empty, `3` once the
    /// first tetrahedron exists.
    #[must_use]
    pub fn dimension(&self) -> i32 {
        if !self.cells.is_empty() {
            return 3;
        }
        let points: Vec<Point> = self
            .pending
            .iter()
            .filter_map(|&v| self.point(v).copied())
            .collect();
        affine_dimension(&points)
    }

    /// The infinite vertex.
    #[must_use]
    pub const fn infinite_vertex(&self) -> VertexKey {
        self.infinite
    }

    /// Returns `true` if `v` is the infinite vertex.
    #[must_use]
    pub fn is_infinite_vertex(&self, v: VertexKey) -> bool {
        v == self.infinite
    }

    /// Returns `true` if `c` has the infinite vertex.
    #[must_use]
    pub fn is_infinite_cell(&self, c: CellKey) -> bool {
        self.cells
            .get(c)
            .is_some_and(|cell| cell.contains_vertex(self.infinite))
    }

    /// Returns `true` if the facet has the infinite vertex.
    #[must_use]
    pub fn is_infinite_facet(&self, f: Facet) -> bool {
        self.cells
            .get(f.cell())
            .is_none_or(|cell| cell.facet_vertices(f.index()).contains(&self.infinite))
    }

    /// Number of finite vertices.
    #[must_use]
    pub fn number_of_vertices(&self) -> usize {
        self.vertices.len() - 1
    }

    /// Number of cells, infinite cells included.
    #[must_use]
    pub fn number_of_cells(&self) -> usize {
        self.cells.len()
    }

    /// Number of finite cells.
    #[must_use]
    pub fn number_of_finite_cells(&self) -> usize {
        self.finite_cells().count()
    }

    /// Vertex `v`.
    #[must_use]
    pub fn vertex(&self, v: VertexKey) -> Option<&Vertex> {
        self.vertices.get(v)
    }

    /// Position of the finite vertex `v`.
    #[must_use]
    pub fn point(&self, v: VertexKey) -> Option<&Point> {
        if v == self.infinite {
            return None;
        }
        self.vertices.get(v).map(Vertex::point)
    }

    /// Cell `c`.
    #[must_use]
    pub fn cell(&self, c: CellKey) -> Option<&Cell> {
        self.cells.get(c)
    }

    /// Returns `true` if `c` is a live cell.
    #[must_use]
    pub fn contains_cell(&self, c: CellKey) -> bool {
        self.cells.contains_key(c)
    }

    /// Iterates over the finite vertices.
    pub fn finite_vertices(&self) -> impl Iterator<Item = (VertexKey, &Vertex)> {
        let infinite = self.infinite;
        self.vertices.iter().filter(move |&(k, _)| k != infinite)
    }

    /// Iterates over the keys of the finite cells.
    pub fn finite_cells(&self) -> impl Iterator<Item = CellKey> + '_ {
        let infinite = self.infinite;
        self.cells
            .iter()
            .filter(move |(_, cell)| !cell.contains_vertex(infinite))
            .map(|(k, _)| k)
    }

    /// Iterates over the finite facets, each seen from exactly one side.
    ///
    /// An interior facet is reported from the cell with the smaller key;
    /// a hull facet from its finite cell.
    pub fn finite_facets(&self) -> impl Iterator<Item = Facet> + '_ {
        let infinite = self.infinite;
        self.cells.iter().flat_map(move |(ck, cell)| {
            let finite = !cell.contains_vertex(infinite);
            (0..4u8).filter(move |_| finite).filter_map(move |i| {
                let n = cell.neighbor(usize::from(i))?;
                let n_infinite = self
                    .cells
                    .get(n)
                    .is_some_and(|nc| nc.contains_vertex(infinite));
                (n_infinite || ck < n).then_some(Facet::new(ck, i))
            })
        })
    }

    /// Vertex positions of the finite cell `c`.
    #[must_use]
    pub fn cell_points(&self, c: CellKey) -> Option<[Point; 4]> {
        let cell = self.cells.get(c)?;
        let [a, b, c, d] = *cell.vertices();
        Some([
            *self.point(a)?,
            *self.point(b)?,
            *self.point(c)?,
            *self.point(d)?,
        ])
    }

    /// Vertex positions of a finite facet, ordered so that the facet normal
    /// points into the cell it is seen from.
    #[must_use]
    pub fn facet_points(&self, f: Facet) -> Option<[Point; 3]> {
        let cell = self.cells.get(f.cell())?;
        let [a, b, c] = cell.facet_vertices(f.index());
        Some([*self.point(a)?, *self.point(b)?, *self.point(c)?])
    }

    /// Unit normal of a finite facet pointing out of the cell it is seen from.
    #[must_use]
    pub fn facet_outward_normal(&self, f: Facet) -> Option<nalgebra::Vector3<f64>> {
        let [a, b, c] = self.facet_points(f)?;
        let n = -triangle_normal(&a, &b, &c);
        let norm = n.norm();
        (norm > 0.0).then(|| n / norm)
    }

    /// Canonical key of the facet.
    #[must_use]
    pub fn facet_key(&self, f: Facet) -> Option<FacetKey> {
        self.cells
            .get(f.cell())
            .map(|cell| FacetKey::new(cell.facet_vertices(f.index())))
    }

    /// The same facet seen from the other incident cell.
    #[must_use]
    pub fn mirror_facet(&self, f: Facet) -> Option<Facet> {
        let n = self.cells.get(f.cell())?.neighbor(f.index_usize())?;
        let j = self.cells.get(n)?.index_of_neighbor(f.cell())?;
        Some(Facet::new(n, FacetIndex::try_from(j).ok()?))
    }

    /// Finds a cell-relative handle for the triangle `key`, if it is a facet
    /// of the triangulation.
    #[must_use]
    pub fn facet_from_key(&self, key: &FacetKey) -> Option<Facet> {
        let [a, b, c] = *key.vertices();
        self.incident_cells(a).into_iter().find_map(|ck| {
            let cell = self.cells.get(ck)?;
            if !(cell.contains_vertex(b) && cell.contains_vertex(c)) {
                return None;
            }
            let i = (0..4).find(|&i| !key.contains(cell.vertex(i)))?;
            Some(Facet::new(ck, FacetIndex::try_from(i).ok()?))
        })
    }

    /// All cells incident to `v`, found by walking its star.
    #[must_use]
    pub fn incident_cells(&self, v: VertexKey) -> Vec<CellKey> {
        let Some(start) = self.vertices.get(v).and_then(Vertex::incident_cell) else {
            return Vec::new();
        };
        let mut seen = FastHashSet::default();
        let mut stack = vec![start];
        let mut out = Vec::new();
        while let Some(ck) = stack.pop() {
            let Some(cell) = self.cells.get(ck) else {
                continue;
            };
            if !cell.contains_vertex(v) || !seen.insert(ck) {
                continue;
            }
            out.push(ck);
            for (i, n) in cell.neighbors().iter().enumerate() {
                if cell.vertex(i) != v
                    && let Some(n) = n
                {
                    stack.push(*n);
                }
            }
        }
        out
    }

    /// Vertices adjacent to `v` through an edge, the infinite vertex included.
    #[must_use]
    pub fn adjacent_vertices(&self, v: VertexKey) -> Vec<VertexKey> {
        let mut out: Vec<VertexKey> = self
            .incident_cells(v)
            .into_iter()
            .filter_map(|ck| self.cells.get(ck))
            .flat_map(|cell| cell.vertices().iter().copied())
            .filter(|&w| w != v)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Keys of the facets incident to the edge `(a, b)`.
    #[must_use]
    pub fn edge_facet_keys(&self, a: VertexKey, b: VertexKey) -> Vec<FacetKey> {
        let mut keys: Vec<FacetKey> = self
            .incident_cells(a)
            .into_iter()
            .filter_map(|ck| self.cells.get(ck))
            .filter(|cell| cell.contains_vertex(b))
            .flat_map(|cell| {
                cell.vertices()
                    .iter()
                    .copied()
                    .filter(|&w| w != a && w != b)
                    .map(|w| FacetKey::new([a, b, w]))
                    .collect::<Vec<_>>()
            })
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Circumcenter of the finite cell `c`.
    #[must_use]
    pub fn circumcenter(&self, c: CellKey) -> Option<Point> {
        let [a, b, c, d] = self.cell_points(c)?;
        circumcenter(&a, &b, &c, &d)
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Locates `p`, walking from `hint` when given.
    ///
    /// # Errors
    ///
    /// See [`locate`].
    pub fn locate(&self, p: &Point, hint: Option<CellKey>) -> Result<LocateResult, LocateError> {
        locate(self, p, hint)
    }

    /// Computes the conflict zone of `p` without modifying the triangulation.
    ///
    /// # Errors
    ///
    /// Returns an error if `p` is not finite, coincides with a vertex, or the
    /// triangulation has no tetrahedron yet.
    pub fn find_conflicts(
        &self,
        p: &Point,
        hint: Option<CellKey>,
    ) -> Result<ConflictZone, InsertionError> {
        if !p.is_finite() {
            return Err(InsertionError::NonFinitePoint { point: *p });
        }
        let located = locate(self, p, hint.or(self.hint))?;
        Ok(find_conflict_zone(self, p, located)?)
    }

    /// Inserts `p`, restoring the Delaunay property.
    ///
    /// # Errors
    ///
    /// Returns an error if `p` is not finite or equals an existing vertex.
    /// The triangulation is unchanged on error.
    pub fn insert(&mut self, p: Point) -> Result<InsertionOutcome, InsertionError> {
        if !p.is_finite() {
            return Err(InsertionError::NonFinitePoint { point: p });
        }
        if self.cells.is_empty() {
            return self.insert_pending(p);
        }
        let zone = self.find_conflicts(&p, None)?;
        self.insert_in_conflict_zone(p, &zone)
    }

    /// Inserts `p` into the precomputed conflict zone `zone`.
    ///
    /// # Errors
    ///
    /// Returns an error if the zone refers to cells that no longer exist
    /// or does not form a valid cavity for `p`. The triangulation is
    /// unchanged on error.
    pub fn insert_in_conflict_zone(
        &mut self,
        p: Point,
        zone: &ConflictZone,
    ) -> Result<InsertionOutcome, InsertionError> {
        if !p.is_finite() {
            return Err(InsertionError::NonFinitePoint { point: p });
        }
        let vertex = self.vertices.insert(Vertex::new(p));
        match insert_vertex_in_conflict_zone(self, vertex, zone) {
            Ok(outcome) => {
                self.hint = outcome.new_cells.first().copied();
                Ok(outcome)
            }
            Err(e) => {
                self.vertices.remove(vertex);
                Err(e)
            }
        }
    }

    fn insert_pending(&mut self, p: Point) -> Result<InsertionOutcome, InsertionError> {
        if let Some(&vertex) = self.pending.iter().find(|&&v| self.point(v) == Some(&p)) {
            return Err(ConflictError::DuplicateVertex { vertex }.into());
        }
        let vertex = self.vertices.insert(Vertex::new(p));
        self.pending.push(vertex);

        let points: Vec<Point> = self
            .pending
            .iter()
            .filter_map(|&v| self.point(v).copied())
            .collect();
        let Some(simplex) = independent_simplex(&points) else {
            return Ok(InsertionOutcome {
                vertex,
                ..InsertionOutcome::default()
            });
        };

        let held = std::mem::take(&mut self.pending);
        let chosen = simplex.map(|i| held[i]);
        self.build_initial_tetrahedron(chosen)?;
        for &v in held.iter().filter(|v| !chosen.contains(v)) {
            let Some(q) = self.point(v).copied() else {
                continue;
            };
            let zone = self.find_conflicts(&q, None)?;
            insert_vertex_in_conflict_zone(self, v, &zone)?;
        }
        Ok(InsertionOutcome {
            vertex,
            new_cells: self.cells.keys().collect(),
            removed_cells: Vec::new(),
        })
    }

    /// Creates one positively oriented tetrahedron and its four infinite
    /// cells from unconnected vertices.
    fn build_initial_tetrahedron(&mut self, mut v: [VertexKey; 4]) -> Result<(), InsertionError> {
        let pts = v.map(|k| self.point(k).copied().unwrap_or(Point::ORIGIN));
        if orientation(&pts[0], &pts[1], &pts[2], &pts[3]) == Orientation::NEGATIVE {
            v.swap(0, 1);
        }

        let mut keys = Vec::with_capacity(5);
        keys.push(self.cells.insert(Cell::new(v)));
        for i in 0..4 {
            let mut w = v;
            w[i] = self.infinite;
            w.swap((i + 1) % 4, (i + 2) % 4);
            keys.push(self.cells.insert(Cell::new(w)));
        }

        let mut facet_map: FastHashMap<FacetKey, Vec<(CellKey, usize)>> = FastHashMap::default();
        for &ck in &keys {
            if let Some(cell) = self.cells.get(ck) {
                for i in 0..4 {
                    let tri = FACET_VERTEX_INDICES[i].map(|j| cell.vertex(j));
                    facet_map.entry(FacetKey::new(tri)).or_default().push((ck, i));
                }
            }
        }
        for (key, sides) in facet_map {
            let [(c1, i1), (c2, i2)] = sides[..] else {
                return Err(InsertionError::NeighborWiring {
                    message: format!("Initial facet {key} has {} incident cells", sides.len()),
                });
            };
            if let Some(cell) = self.cells.get_mut(c1) {
                cell.set_neighbor(i1, Some(c2));
            }
            if let Some(cell) = self.cells.get_mut(c2) {
                cell.set_neighbor(i2, Some(c1));
            }
        }

        for &ck in &keys {
            if let Some(cell) = self.cells.get(ck).copied() {
                for w in cell.vertices() {
                    if let Some(vertex) = self.vertices.get_mut(*w) {
                        vertex.incident_cell = Some(ck);
                    }
                }
            }
        }
        self.hint = keys.first().copied();
        tracing::debug!("Built initial tetrahedron {:?}", v);
        Ok(())
    }

    /// Finite vertex nearest to `p`, found by a greedy walk on the
    /// Delaunay graph.
    #[must_use]
    pub fn nearest_vertex(&self, p: &Point) -> Option<VertexKey> {
        if self.cells.is_empty() {
            return self
                .pending
                .iter()
                .copied()
                .filter_map(|v| Some((v, self.point(v)?.squared_distance(p))))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(v, _)| v);
        }
        let start = self
            .hint
            .and_then(|c| self.cells.get(c))
            .or_else(|| self.cells.values().next())?;
        let mut current = start
            .vertices()
            .iter()
            .copied()
            .find(|&v| v != self.infinite)?;
        let mut best = self.point(current)?.squared_distance(p);
        loop {
            let next = self
                .adjacent_vertices(current)
                .into_iter()
                .filter_map(|w| Some((w, self.point(w)?.squared_distance(p))))
                .filter(|&(_, d)| d < best)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match next {
                Some((w, d)) => {
                    current = w;
                    best = d;
                }
                None => return Some(current),
            }
        }
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    /// Attaches the lock grid used by parallel refinement.
    pub fn set_lock_data_structure(&mut self, grid: Option<Arc<LockGrid>>) {
        self.lock_data_structure = grid;
    }

    /// The attached lock grid, if any.
    #[must_use]
    pub fn lock_data_structure(&self) -> Option<&Arc<LockGrid>> {
        self.lock_data_structure.as_ref()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Checks the combinatorial and orientation invariants.
    ///
    /// # Errors
    ///
    /// Returns [`TriangulationError::InvalidStructure`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), TriangulationError> {
        let invalid = |message: String| TriangulationError::InvalidStructure { message };

        for (ck, cell) in &self.cells {
            for v in cell.vertices() {
                if !self.vertices.contains_key(*v) {
                    return Err(invalid(format!("Cell {ck:?} references missing vertex {v:?}")));
                }
            }
            let mut distinct = *cell.vertices();
            distinct.sort_unstable();
            if distinct.windows(2).any(|w| w[0] == w[1]) {
                return Err(invalid(format!("Cell {ck:?} has a repeated vertex")));
            }
            for i in 0..4 {
                let n = cell
                    .neighbor(i)
                    .ok_or_else(|| invalid(format!("Cell {ck:?} has no neighbor {i}")))?;
                let ncell = self
                    .cells
                    .get(n)
                    .ok_or_else(|| invalid(format!("Cell {ck:?} has dead neighbor {n:?}")))?;
                let j = ncell.index_of_neighbor(ck).ok_or_else(|| {
                    invalid(format!("Neighbor {n:?} of {ck:?} does not point back"))
                })?;
                let here = FacetKey::new(cell.facet_vertices(facet_index(i)));
                let there = FacetKey::new(ncell.facet_vertices(facet_index(j)));
                if here != there {
                    return Err(invalid(format!(
                        "Cells {ck:?} and {n:?} disagree on their shared facet"
                    )));
                }
            }
            if let Some([a, b, c, d]) = self.cell_points(ck)
                && orientation(&a, &b, &c, &d) != Orientation::POSITIVE
            {
                return Err(invalid(format!("Finite cell {ck:?} is not positively oriented")));
            }
        }

        if !self.cells.is_empty() {
            for (vk, vertex) in &self.vertices {
                let ok = vertex
                    .incident_cell()
                    .and_then(|c| self.cells.get(c))
                    .is_some_and(|cell| cell.contains_vertex(vk));
                if !ok {
                    return Err(invalid(format!("Vertex {vk:?} has a stale incident cell")));
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if no finite vertex lies strictly inside the
    /// circumsphere of an adjacent finite cell.
    ///
    /// Local Delaunayness across every finite facet implies the global
    /// empty-sphere property.
    #[must_use]
    pub fn is_delaunay(&self) -> bool {
        self.finite_cells().all(|ck| {
            let (Some(cell), Some([a, b, c, d])) = (self.cells.get(ck), self.cell_points(ck))
            else {
                return false;
            };
            cell.neighbors().iter().all(|n| {
                let Some(ncell) = n.and_then(|n| self.cells.get(n)) else {
                    return false;
                };
                ncell
                    .vertices()
                    .iter()
                    .filter(|w| !cell.contains_vertex(**w))
                    .filter_map(|&w| self.point(w))
                    .all(|e| insphere(&a, &b, &c, &d, e) != InSphere::INSIDE)
            })
        })
    }
}

fn facet_index(i: usize) -> FacetIndex {
    FacetIndex::try_from(i).unwrap_or_default()
}

/// Indices of four affinely independent points, taken greedily.
fn independent_simplex(points: &[Point]) -> Option<[usize; 4]> {
    let a = 0;
    let first = points.first()?;
    let b = points.iter().position(|p| p != first)?;
    let ab = points[b] - *first;
    let c = points
        .iter()
        .position(|p| ab.cross(&(*p - *first)).norm_squared() > 0.0)?;
    let d = points.iter().position(|p| {
        orientation(first, &points[b], &points[c], p) != Orientation::DEGENERATE
    })?;
    Some([a, b, c, d])
}

fn affine_dimension(points: &[Point]) -> i32 {
    let Some(first) = points.first() else {
        return -1;
    };
    let Some(b) = points.iter().find(|p| *p != first) else {
        return 0;
    };
    let ab = *b - *first;
    let Some(c) = points
        .iter()
        .find(|p| ab.cross(&(**p - *first)).norm_squared() > 0.0)
    else {
        return 1;
    };
    if points
        .iter()
        .any(|p| orientation(first, b, c, p) != Orientation::DEGENERATE)
    {
        3
    } else {
        2
    }
}
