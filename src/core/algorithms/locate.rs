//! Point location and conflict-zone search.
//!
//! Implements facet-walking point location for finding the cell containing
//! a query point, and the breadth-first search collecting every cell whose
//! circumsphere strictly contains a new point (its conflict zone).
//!
//! # Algorithm
//!
//! The facet walking algorithm starts from a hint cell (or an arbitrary
//! finite cell) and walks toward the query point by repeatedly:
//! 1. Testing the orientation of the query point against each facet
//! 2. Crossing to the neighbor on the side containing the query point
//! 3. Stopping when no facet separates the cell from the query point, or
//!    when a convex hull facet is crossed (the point is outside the hull)
//!
//! The first facet tested rotates with the step count so that degenerate
//! configurations do not trap the walk in a fixed cycle.
//!
//! # References
//!
//! - O. Devillers, S. Pion, and M. Teillaud, "Walking in a Triangulation",
//!   International Journal of Foundations of Computer Science, 2001.
//! - CGAL Triangulation_3 documentation

use std::collections::VecDeque;

use crate::core::collections::{CellKey, FacetIndex, FastHashMap, FastHashSet, VertexKey};
use crate::core::facet::Facet;
use crate::core::triangulation::Triangulation;
use crate::geometry::point::Point;
use crate::geometry::predicates::{
    InSphere, Orientation, coplanar_side_of_bounded_circle, insphere, orientation,
};

/// Result of point location query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateResult {
    /// Point is strictly inside the cell
    InsideCell(CellKey),
    /// Point is on a facet between two cells
    OnFacet(CellKey, FacetIndex),
    /// Point is on an edge of the cell
    OnEdge(CellKey),
    /// Point coincides with a vertex
    OnVertex(VertexKey),
    /// Point is outside the convex hull, beyond the hull facet of this infinite cell
    Outside(CellKey),
}

impl LocateResult {
    /// The cell the point was located in, if any.
    #[must_use]
    pub const fn cell(&self) -> Option<CellKey> {
        match *self {
            Self::InsideCell(c) | Self::OnFacet(c, _) | Self::OnEdge(c) | Self::Outside(c) => {
                Some(c)
            }
            Self::OnVertex(_) => None,
        }
    }
}

/// Error during point location.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocateError {
    /// Triangulation has no cells
    #[error("Cannot locate in a triangulation without tetrahedra")]
    EmptyTriangulation,

    /// Cell reference is invalid
    #[error("Invalid cell reference: {cell_key:?}")]
    InvalidCell {
        /// The invalid cell key
        cell_key: CellKey,
    },

    /// Cycle detected during walking (numerical issues)
    #[error("Cycle detected after {steps} steps - possible numerical degeneracy")]
    CycleDetected {
        /// Number of steps before cycle detection
        steps: usize,
    },
}

/// Error during conflict region finding.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConflictError {
    /// Starting cell is invalid
    #[error("Invalid starting cell: {cell_key:?}")]
    InvalidStartCell {
        /// The invalid cell key
        cell_key: CellKey,
    },

    /// The point coincides with an existing vertex
    #[error("Point coincides with existing vertex {vertex:?}")]
    DuplicateVertex {
        /// The existing vertex
        vertex: VertexKey,
    },

    /// Point location failed
    #[error("Location error: {0}")]
    Locate(#[from] LocateError),
}

/// Cells and facets affected by the insertion of a point.
#[derive(Debug, Clone, Default)]
pub struct ConflictZone {
    /// The point whose conflicts were collected.
    pub point: Point,
    /// Cells whose circumsphere strictly contains the point, located cell first.
    pub cells: Vec<CellKey>,
    /// Facets of conflict cells whose other cell is not in conflict,
    /// seen from the conflict cell.
    pub boundary_facets: Vec<Facet>,
    /// Facets shared by two conflict cells, each listed once.
    pub internal_facets: Vec<Facet>,
    /// Every cell the search tested: the conflict cells and their neighbors.
    pub tested_cells: Vec<CellKey>,
}

impl ConflictZone {
    /// Returns `true` if `cell` is in conflict.
    #[must_use]
    pub fn contains_cell(&self, cell: CellKey) -> bool {
        self.cells.contains(&cell)
    }

    /// All facets of conflict cells, boundary facets first.
    pub fn facets(&self) -> impl Iterator<Item = &Facet> {
        self.boundary_facets.iter().chain(&self.internal_facets)
    }
}

/// Locate a point in the triangulation using facet walking.
///
/// # Arguments
///
/// * `tr` - The triangulation
/// * `point` - Query point to locate
/// * `hint` - Optional starting cell (uses arbitrary finite cell if None)
///
/// # Returns
///
/// Returns `LocateResult` indicating where the point is located.
///
/// # Errors
///
/// Returns `LocateError` if:
/// - The triangulation has no tetrahedron yet
/// - A cell reference is broken
/// - A cycle is detected (numerical degeneracy)
///
/// # Examples
///
/// ```rust
/// use tetmesh::core::algorithms::locate::{locate, LocateResult};
/// use tetmesh::core::triangulation::Triangulation;
/// use tetmesh::geometry::point::Point;
///
/// let tr = Triangulation::from_points(&[
///     Point::new([0.0, 0.0, 0.0]),
///     Point::new([1.0, 0.0, 0.0]),
///     Point::new([0.0, 1.0, 0.0]),
///     Point::new([0.0, 0.0, 1.0]),
/// ])
/// .unwrap();
///
/// let inside = locate(&tr, &Point::new([0.1, 0.1, 0.1]), None).unwrap();
/// assert!(matches!(inside, LocateResult::InsideCell(_)));
///
/// let outside = locate(&tr, &Point::new([2.0, 2.0, 2.0]), None).unwrap();
/// assert!(matches!(outside, LocateResult::Outside(_)));
/// ```
pub fn locate(
    tr: &Triangulation,
    point: &Point,
    hint: Option<CellKey>,
) -> Result<LocateResult, LocateError> {
    const MAX_STEPS: usize = 100_000;

    let mut current = start_cell(tr, hint).ok_or(LocateError::EmptyTriangulation)?;
    let mut previous: Option<CellKey> = None;
    let mut visited = FastHashSet::default();

    for step in 0..MAX_STEPS {
        if !visited.insert(current) {
            return Err(LocateError::CycleDetected { steps: step });
        }

        let cell = tr.cell(current).ok_or(LocateError::InvalidCell {
            cell_key: current,
        })?;
        let points = tr.cell_points(current).ok_or(LocateError::InvalidCell {
            cell_key: current,
        })?;

        let mut degenerate_facets: smallvec::SmallVec<[usize; 4]> = smallvec::SmallVec::new();
        let mut exit_facet = None;
        for k in 0..4 {
            let i = (k + step) % 4;
            let neighbor = cell.neighbor(i);
            if previous.is_some() && neighbor == previous {
                continue;
            }
            let mut query = points;
            query[i] = *point;
            match orientation(&query[0], &query[1], &query[2], &query[3]) {
                Orientation::NEGATIVE => {
                    exit_facet = Some(i);
                    break;
                }
                Orientation::DEGENERATE => degenerate_facets.push(i),
                Orientation::POSITIVE => {}
            }
        }

        let Some(i) = exit_facet else {
            return Ok(match degenerate_facets.len() {
                0 => LocateResult::InsideCell(current),
                1 => LocateResult::OnFacet(current, facet_index(degenerate_facets[0])),
                2 => LocateResult::OnEdge(current),
                _ => {
                    let apex = (0..4)
                        .find(|j| !degenerate_facets.contains(j))
                        .unwrap_or(0);
                    LocateResult::OnVertex(cell.vertex(apex))
                }
            });
        };

        let next = cell.neighbor(i).ok_or(LocateError::InvalidCell {
            cell_key: current,
        })?;
        if tr.is_infinite_cell(next) {
            return Ok(LocateResult::Outside(next));
        }
        previous = Some(current);
        current = next;
    }

    Err(LocateError::CycleDetected { steps: MAX_STEPS })
}

fn facet_index(i: usize) -> FacetIndex {
    FacetIndex::try_from(i).unwrap_or_default()
}

/// Finite cell to start a walk from.
fn start_cell(tr: &Triangulation, hint: Option<CellKey>) -> Option<CellKey> {
    if let Some(h) = hint
        && let Some(cell) = tr.cell(h)
    {
        match cell.index_of(tr.infinite_vertex()) {
            None => return Some(h),
            Some(i) => {
                if let Some(n) = cell.neighbor(i) {
                    return Some(n);
                }
            }
        }
    }
    tr.finite_cells().next()
}

/// Returns `true` if `point` lies strictly inside the circumsphere of `cell`.
///
/// For an infinite cell the circumsphere degenerates to the half-space
/// beyond its hull facet; a point on the supporting plane of the hull
/// facet conflicts when it lies strictly inside the facet circumcircle.
#[must_use]
pub fn cell_in_conflict(tr: &Triangulation, cell_key: CellKey, point: &Point) -> bool {
    let Some(cell) = tr.cell(cell_key) else {
        return false;
    };
    match cell.index_of(tr.infinite_vertex()) {
        Some(j) => {
            let mut query = [Point::ORIGIN; 4];
            for (k, slot) in query.iter_mut().enumerate() {
                if k == j {
                    *slot = *point;
                } else if let Some(p) = tr.point(cell.vertex(k)) {
                    *slot = *p;
                } else {
                    return false;
                }
            }
            match orientation(&query[0], &query[1], &query[2], &query[3]) {
                Orientation::POSITIVE => true,
                Orientation::NEGATIVE => false,
                Orientation::DEGENERATE => {
                    let others: smallvec::SmallVec<[Point; 3]> = (0..4)
                        .filter(|&k| k != j)
                        .map(|k| query[k])
                        .collect();
                    coplanar_side_of_bounded_circle(&others[0], &others[1], &others[2], point)
                        == InSphere::INSIDE
                }
            }
        }
        None => tr.cell_points(cell_key).is_some_and(|[a, b, c, d]| {
            insphere(&a, &b, &c, &d, point) == InSphere::INSIDE
        }),
    }
}

/// Find all cells whose circumspheres contain the query point (conflict region).
///
/// Uses BFS traversal starting from the located cell, which is in conflict
/// by construction. Neighbors of conflict cells are tested once; the
/// boundary and internal facets of the region are collected on the way.
///
/// # Errors
///
/// Returns `ConflictError` if:
/// - The point was located on an existing vertex
/// - The starting cell or a neighbor reference is invalid
pub fn find_conflict_zone(
    tr: &Triangulation,
    point: &Point,
    located: LocateResult,
) -> Result<ConflictZone, ConflictError> {
    let start = match located {
        LocateResult::OnVertex(vertex) => return Err(ConflictError::DuplicateVertex { vertex }),
        LocateResult::InsideCell(c)
        | LocateResult::OnFacet(c, _)
        | LocateResult::OnEdge(c)
        | LocateResult::Outside(c) => c,
    };
    if !tr.contains_cell(start) {
        return Err(ConflictError::InvalidStartCell { cell_key: start });
    }

    let mut zone = ConflictZone {
        point: *point,
        ..ConflictZone::default()
    };
    let mut tested: FastHashMap<CellKey, bool> = FastHashMap::default();
    let mut queue = VecDeque::new();
    tested.insert(start, true);
    zone.cells.push(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        let cell = tr
            .cell(current)
            .ok_or(ConflictError::InvalidStartCell { cell_key: current })?;
        for i in 0..4 {
            let neighbor = cell
                .neighbor(i)
                .ok_or(ConflictError::InvalidStartCell { cell_key: current })?;
            let facet = Facet::new(current, facet_index(i));
            let in_conflict = match tested.get(&neighbor) {
                Some(&known) => known,
                None => {
                    let known = cell_in_conflict(tr, neighbor, point);
                    tested.insert(neighbor, known);
                    if known {
                        zone.cells.push(neighbor);
                        queue.push_back(neighbor);
                    }
                    known
                }
            };
            if !in_conflict {
                zone.boundary_facets.push(facet);
            } else if current < neighbor {
                zone.internal_facets.push(facet);
            }
        }
    }

    zone.tested_cells = tested.into_keys().collect();
    Ok(zone)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> Triangulation {
        Triangulation::from_points(&[
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([0.0, 1.0, 0.0]),
            Point::new([0.0, 0.0, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_locate_inside_and_outside() {
        let tr = tetrahedron();
        assert!(matches!(
            locate(&tr, &Point::new([0.2, 0.2, 0.2]), None),
            Ok(LocateResult::InsideCell(_))
        ));
        match locate(&tr, &Point::new([-1.0, 0.2, 0.2]), None).unwrap() {
            LocateResult::Outside(c) => assert!(tr.is_infinite_cell(c)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_locate_degenerate_positions() {
        let tr = tetrahedron();
        assert!(matches!(
            locate(&tr, &Point::new([0.2, 0.2, 0.0]), None),
            Ok(LocateResult::OnFacet(_, _))
        ));
        assert!(matches!(
            locate(&tr, &Point::new([0.5, 0.0, 0.0]), None),
            Ok(LocateResult::OnEdge(_))
        ));
        assert!(matches!(
            locate(&tr, &Point::new([1.0, 0.0, 0.0]), None),
            Ok(LocateResult::OnVertex(_))
        ));
    }

    #[test]
    fn test_locate_empty_triangulation() {
        let tr = Triangulation::new();
        assert!(matches!(
            locate(&tr, &Point::ORIGIN, None),
            Err(LocateError::EmptyTriangulation)
        ));
    }

    #[test]
    fn test_conflict_zone_inside_single_tetrahedron() {
        let tr = tetrahedron();
        let p = Point::new([0.2, 0.2, 0.2]);
        let located = locate(&tr, &p, None).unwrap();
        let zone = find_conflict_zone(&tr, &p, located).unwrap();
        assert_eq!(zone.cells.len(), 1);
        assert_eq!(zone.boundary_facets.len(), 4);
        assert!(zone.internal_facets.is_empty());
        assert_eq!(zone.tested_cells.len(), 5);
    }

    #[test]
    fn test_conflict_zone_outside_hull() {
        let tr = tetrahedron();
        // Beyond the facet x + y + z = 1 only, and outside the circumsphere.
        let p = Point::new([2.0, 2.0, 2.0]);
        let located = locate(&tr, &p, None).unwrap();
        let zone = find_conflict_zone(&tr, &p, located).unwrap();
        assert!(zone.cells.iter().all(|&c| tr.is_infinite_cell(c)));
        assert_eq!(zone.cells.len(), 1);
        assert_eq!(zone.boundary_facets.len(), 4);
    }

    #[test]
    fn test_duplicate_vertex_is_reported() {
        let tr = tetrahedron();
        let p = Point::new([0.0, 1.0, 0.0]);
        let located = locate(&tr, &p, None).unwrap();
        assert!(matches!(
            find_conflict_zone(&tr, &p, located),
            Err(ConflictError::DuplicateVertex { .. })
        ));
    }
}
